//! TCP listener: accept loop, admission policy and per-client echo handlers
//!
//! Every admitted connection gets its own OS thread that echoes messages
//! back until the peer leaves. The accept loop runs on the thread that
//! calls [`Listener::run`]; [`Listener::stop`] may be called from any other
//! thread.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::protocol::{parse_port, SERVER_BUSY_NOTICE};
use crate::registry::{Admission, ClientRegistry};
use crate::session::WireSession;

/// How long `stop` waits for the wake-up connection to the accept loop
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// How long `stop` waits for the accept loop to release the socket
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for a listener
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    /// Interface to bind to
    pub bind_host: String,
    /// Maximum tracked sessions; `None` admits everyone
    pub max_clients: Option<usize>,
    /// Close sessions that stay silent this long; `None` waits forever
    pub idle_timeout: Option<Duration>,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            max_clients: None,
            idle_timeout: None,
        }
    }
}

/// A bound listening socket and the sessions it spawned
pub struct Listener {
    /// Present until the accept loop takes ownership of it (or stop drops it)
    socket: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    events: Arc<dyn EventSink>,
    settings: ListenerSettings,
    stopped: AtomicBool,
    /// Set by the accept loop once it has dropped the socket
    released: (Mutex<bool>, Condvar),
}

impl Listener {
    /// Parse `port` and bind the listening socket.
    ///
    /// Fails with [`Error::InvalidPort`] before any socket exists when the
    /// port text is malformed or negative.
    pub fn bind(
        port: &str,
        settings: ListenerSettings,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let port = parse_port(port)?;
        let host = settings.bind_host.as_str();

        let socket = TcpListener::bind((host, port)).map_err(|source| Error::BindFailed {
            addr: format!("{}:{}", host, port),
            source,
        })?;
        let local_addr = socket.local_addr()?;

        info!(addr = %local_addr, max_clients = ?settings.max_clients, "Listener bound");

        Ok(Self {
            socket: Mutex::new(Some(socket)),
            local_addr,
            registry: Arc::new(ClientRegistry::new(events.clone())),
            events,
            settings,
            stopped: AtomicBool::new(false),
            released: (Mutex::new(false), Condvar::new()),
        })
    }

    /// Address the socket is bound to (useful when binding port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sessions currently being served
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Whether `stop` has been requested
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn lock_socket(&self) -> MutexGuard<'_, Option<TcpListener>> {
        self.socket.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run the accept loop until [`stop`](Self::stop) is called.
    ///
    /// Individual accept or session failures are logged and do not end the
    /// loop. Returns immediately if the listener was stopped first.
    pub fn run(&self) -> Result<()> {
        let socket = match self.lock_socket().take() {
            Some(socket) => socket,
            None if self.is_stopped() => {
                debug!("Listener stopped before accepting");
                return Ok(());
            }
            None => return Err(Error::AlreadyRunning),
        };

        info!(addr = %self.local_addr, "Accepting connections");

        loop {
            match socket.accept() {
                Ok((stream, peer)) => {
                    if self.is_stopped() {
                        debug!(peer = %peer, "Dropping connection accepted during shutdown");
                        break;
                    }
                    self.handle_connection(stream, peer);
                }
                Err(e) => {
                    if self.is_stopped() {
                        break;
                    }
                    error!(error = %e, "Accept failed");
                    self.log(format!("Accept failed: {}", e));
                }
            }
        }

        drop(socket);
        self.mark_released();
        info!(addr = %self.local_addr, "Accept loop stopped");
        Ok(())
    }

    /// Stop accepting and close every session. Only the first call acts.
    ///
    /// The listening socket is closed by the time this returns, unless the
    /// accept loop fails to let go of it within a few seconds.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        // Never started: dropping the socket closes it. Otherwise the accept
        // loop owns it and has to be woken to notice the flag.
        let idle_socket = self.lock_socket().take();
        match idle_socket {
            Some(socket) => drop(socket),
            None => {
                self.wake_accept_loop();
                self.wait_released();
            }
        }

        for identity in self.registry.close_all() {
            self.log(format!("Closing client: {}", identity));
        }

        info!(addr = %self.local_addr, "Listener stopped");
    }

    fn mark_released(&self) {
        let (lock, signal) = &self.released;
        *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
        signal.notify_all();
    }

    fn wait_released(&self) {
        let (lock, signal) = &self.released;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (_guard, timeout) = signal
            .wait_timeout_while(guard, CLOSE_TIMEOUT, |released| !*released)
            .unwrap_or_else(|e| e.into_inner());
        if timeout.timed_out() {
            warn!(addr = %self.local_addr, "Accept loop did not release the socket in time");
        }
    }

    fn wake_accept_loop(&self) {
        let target = SocketAddr::new(loopback_for(self.local_addr.ip()), self.local_addr.port());
        if let Err(e) = TcpStream::connect_timeout(&target, WAKE_TIMEOUT) {
            debug!(addr = %target, error = %e, "Wake-up connection failed");
        }
    }

    /// Apply the admission policy and dispatch a handler thread
    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        debug!(peer = %peer, "New connection");

        let session = match WireSession::new(stream) {
            Ok(session) => Arc::new(session),
            Err(e) => {
                warn!(peer = %peer, error = %e, "Could not set up session");
                self.log(format!("Could not set up session for {}: {}", peer, e));
                return;
            }
        };

        if let Err(e) = session.set_read_timeout(self.settings.idle_timeout) {
            warn!(identity = %session.identity(), error = %e, "Could not set idle timeout");
        }

        let admission = self
            .registry
            .admit(session.clone(), self.settings.max_clients);
        if let Admission::Full(session) = admission {
            self.reject(&session);
            return;
        }

        // stop() may have swept the registry while this connection was set up.
        if self.is_stopped() {
            self.registry.remove(session.identity());
            session.close();
            return;
        }

        let identity = session.identity().to_string();
        let registry = self.registry.clone();
        let events = self.events.clone();

        let spawned = thread::Builder::new()
            .name(format!("session-{}", peer))
            .spawn(move || serve(session, registry, events));

        if let Err(e) = spawned {
            // Dropping the registry's reference releases the last handle.
            error!(identity = %identity, error = %e, "Failed to spawn session thread");
            self.registry.remove(&identity);
            self.log(format!("Failed to serve {}: {}", identity, e));
        }
    }

    /// Tell a connection over capacity that the server is busy, then close it
    fn reject(&self, session: &WireSession) {
        warn!(
            identity = %session.identity(),
            max_clients = ?self.settings.max_clients,
            "Server full, rejecting connection"
        );

        if let Err(e) = session.send(SERVER_BUSY_NOTICE) {
            debug!(identity = %session.identity(), error = %e, "Could not deliver busy notice");
        }
        session.close();

        self.log(format!("Rejected {}: server busy", session.identity()));
    }

    fn log(&self, text: String) {
        self.events.on_log(&format!("[SERVER] {}", text));
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Echo loop for one admitted session
fn serve(session: Arc<WireSession>, registry: Arc<ClientRegistry>, events: Arc<dyn EventSink>) {
    let identity = session.identity().to_string();
    info!(identity = %identity, "Client connected");
    events.on_log(&format!("New client connected: {}", identity));

    loop {
        let payload = match session.receive_bytes() {
            Ok(payload) => payload,
            Err(Error::ConnectionClosed) => {
                debug!(identity = %identity, "Peer closed connection");
                break;
            }
            Err(Error::Timeout) => {
                info!(identity = %identity, "Session idle timeout");
                events.on_log(&format!("[CLIENT] {} idle, closing", identity));
                break;
            }
            Err(e) => {
                if !session.is_closed() {
                    warn!(identity = %identity, error = %e, "Read error");
                }
                break;
            }
        };

        let text = String::from_utf8_lossy(&payload);
        debug!(identity = %identity, bytes = payload.len(), "Echoing message");
        events.on_log(&format!("[CLIENT] {} SAYS ({}B): {}", identity, payload.len(), text));

        if let Err(e) = session.send_bytes(&payload) {
            if !e.is_connection_closed() && !session.is_closed() {
                warn!(identity = %identity, error = %e, "Echo failed");
            }
            break;
        }
    }

    // Deregister before closing so the registry never holds a dead socket.
    registry.remove(&identity);
    session.close();

    let seconds = (Utc::now() - session.connected_at()).num_seconds();
    info!(identity = %identity, seconds, "Client disconnected");
    events.on_log(&format!("Client disconnected: {}", identity));
}

/// Loopback address reaching a socket bound to `ip`
fn loopback_for(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        other => other,
    }
}
