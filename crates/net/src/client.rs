//! Client connection manager
//!
//! Owns at most one outbound [`WireSession`] and runs entirely on the
//! caller's thread. State only changes through `connect`/`disconnect`, or
//! when `send` or `receive` learns that the server went away.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::protocol::{Endpoint, Received, Status, SERVER_BUSY_NOTICE};
use crate::session::WireSession;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Status shown to observers
    pub fn status(self) -> Status {
        match self {
            ConnectionState::Connected => Status::Online,
            _ => Status::Offline,
        }
    }
}

/// Client-side timeouts
#[derive(Debug, Clone, Default)]
pub struct ClientSettings {
    /// Give up connecting after this long; `None` uses the OS default
    pub connect_timeout: Option<Duration>,
    /// Fail `receive` with [`Error::Timeout`] after this long
    pub read_timeout: Option<Duration>,
}

/// One send and the reply to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Bytes written
    pub sent: usize,
    pub received: Received,
}

/// Manages a single connection to an echo server
pub struct ConnectionManager {
    state: ConnectionState,
    session: Option<WireSession>,
    endpoint: Option<Endpoint>,
    settings: ClientSettings,
    events: Arc<dyn EventSink>,
}

impl ConnectionManager {
    pub fn new(settings: ClientSettings, events: Arc<dyn EventSink>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            session: None,
            endpoint: None,
            settings,
            events,
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Endpoint of the current connection
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Identity of the current session
    pub fn identity(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.identity())
    }

    /// Connect to `host:port`.
    ///
    /// On network failure the manager stays `Disconnected`; it can be used
    /// for another attempt since every attempt opens a fresh socket.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        let endpoint = Endpoint::new(host, port)?;
        self.connect_to(endpoint)
    }

    /// Connect to an already validated endpoint
    pub fn connect_to(&mut self, endpoint: Endpoint) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            self.events.on_log("Already connected to the server!");
            return Err(Error::AlreadyConnected);
        }

        info!(endpoint = %endpoint, "Connecting to server");
        self.state = ConnectionState::Connecting;

        let session = match self.open(&endpoint) {
            Ok(session) => session,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                warn!(endpoint = %endpoint, error = %e, "Connection failed");
                self.events.on_log(&e.to_string());
                return Err(e);
            }
        };

        info!(identity = %session.identity(), "Connected to server");
        self.session = Some(session);
        self.endpoint = Some(endpoint);
        self.state = ConnectionState::Connected;

        self.events.on_log("Connected to the server!");
        self.events.on_status_change(Status::Online);
        Ok(())
    }

    fn open(&self, endpoint: &Endpoint) -> Result<WireSession> {
        let label = endpoint.to_string();
        let failed = |source| Error::ConnectFailed {
            addr: label.clone(),
            source,
        };

        let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(failed)?
            .collect();

        let mut last_error = None;
        let mut stream = None;
        for addr in addrs {
            let attempt = match self.settings.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    debug!(addr = %addr, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let stream = match stream {
            Some(stream) => stream,
            None => {
                let source = last_error.unwrap_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "host resolved to no addresses",
                    )
                });
                return Err(failed(source));
            }
        };

        let session = WireSession::new(stream)?;
        session.set_read_timeout(self.settings.read_timeout)?;
        Ok(session)
    }

    fn session(&self) -> Result<&WireSession> {
        match (&self.state, &self.session) {
            (ConnectionState::Connected, Some(session)) => Ok(session),
            _ => Err(Error::NotConnected),
        }
    }

    /// Send a message; anything past the protocol cap is cut off.
    ///
    /// A socket the server has already reset fails with
    /// [`Error::ConnectionClosed`] and ends the connection, as in `receive`.
    pub fn send(&mut self, message: &str) -> Result<usize> {
        let result = self.session()?.send(message);
        match result {
            Ok(sent) => {
                debug!(bytes = sent, "Sent message");
                Ok(sent)
            }
            Err(Error::ConnectionClosed) | Err(Error::NotConnected) => {
                info!("Connection lost while sending");
                self.teardown();
                self.events.on_log("Server closed the connection!");
                Err(Error::ConnectionClosed)
            }
            Err(e) => Err(e),
        }
    }

    /// Wait for the next chunk from the server.
    ///
    /// [`Error::ConnectionClosed`] ends the connection: the session is
    /// closed and the state becomes `Disconnected` before the error is
    /// returned.
    pub fn receive(&mut self) -> Result<Received> {
        let result = self.session()?.receive();
        match result {
            Ok(received) => {
                debug!(bytes = received.bytes, "Received message");
                Ok(received)
            }
            Err(Error::ConnectionClosed) => {
                info!("Server closed the connection");
                self.teardown();
                self.events.on_log("Server closed the connection!");
                Err(Error::ConnectionClosed)
            }
            Err(e) => Err(e),
        }
    }

    /// Send a message and wait for the reply.
    ///
    /// A busy notice from the server ends the connection with
    /// [`Error::ServerBusy`].
    pub fn exchange(&mut self, message: &str) -> Result<Exchange> {
        let sent = self.send(message)?;
        let received = self.receive()?;

        if received.message == SERVER_BUSY_NOTICE {
            warn!("Server is busy");
            self.events.on_log(SERVER_BUSY_NOTICE);
            self.teardown();
            return Err(Error::ServerBusy);
        }

        Ok(Exchange { sent, received })
    }

    /// Close the connection. Fails with [`Error::NotConnected`] otherwise.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.state != ConnectionState::Connected {
            self.events.on_log("You are not connected to a server!");
            return Err(Error::NotConnected);
        }

        self.teardown();
        info!("Disconnected from server");
        self.events.on_log("Disconnected from the server!");
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.endpoint = None;
        if self.state != ConnectionState::Disconnected {
            self.state = ConnectionState::Disconnected;
            self.events.on_status_change(Status::Offline);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
    }
}
