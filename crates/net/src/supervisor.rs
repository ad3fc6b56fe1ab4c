//! Server supervisor - owns the listener thread
//!
//! The front end only talks to this type: `start` binds and launches the
//! accept loop on its own thread, `stop` asks the listener to shut down
//! without waiting for the thread, `wait` joins it.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::{error, info};

use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::listener::{Listener, ListenerSettings};
use crate::protocol::Status;

/// Start/stop handle for one listener at a time
pub struct ServerSupervisor {
    settings: ListenerSettings,
    events: Arc<dyn EventSink>,
    listener: Mutex<Option<Arc<Listener>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ServerSupervisor {
    pub fn new(settings: ListenerSettings, events: Arc<dyn EventSink>) -> Self {
        Self {
            settings,
            events,
            listener: Mutex::new(None),
            thread: Mutex::new(None),
        }
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<Arc<Listener>>> {
        self.listener.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_thread(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.thread.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bind `port` and run the accept loop on a new thread.
    ///
    /// Port and bind errors are returned to the caller; nothing is left
    /// running in that case.
    pub fn start(&self, port: &str) -> Result<SocketAddr> {
        let mut active = self.lock_listener();
        if active.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let listener = match Listener::bind(port, self.settings.clone(), self.events.clone()) {
            Ok(listener) => Arc::new(listener),
            Err(e) => {
                match &e {
                    Error::InvalidPort(_) => self.events.on_log("Incorrect port number!"),
                    other => self.events.on_log(&other.to_string()),
                }
                return Err(e);
            }
        };
        let addr = listener.local_addr();

        let runner = listener.clone();
        let handle = thread::Builder::new()
            .name("echolink-listener".to_string())
            .spawn(move || {
                if let Err(e) = runner.run() {
                    error!(error = %e, "Listener terminated");
                }
            })
            .map_err(|e| {
                listener.stop();
                Error::Io(e)
            })?;

        // A previous accept loop has already been told to stop; let it go.
        *self.lock_thread() = Some(handle);
        *active = Some(listener);

        info!(addr = %addr, "Server started");
        self.events.on_log("Server started!");
        self.events.on_status_change(Status::Online);
        self.events.on_connection_count_change(0);
        self.events.on_connection_list_change(&[]);

        Ok(addr)
    }

    /// Stop the running listener. Returns `false` if nothing was running.
    pub fn stop(&self) -> bool {
        let Some(listener) = self.lock_listener().take() else {
            self.events.on_log("Server is not online!");
            return false;
        };

        listener.stop();

        info!(addr = %listener.local_addr(), "Server stopped");
        self.events.on_log("Server stopped!");
        self.events.on_status_change(Status::Offline);
        true
    }

    /// Block until the current accept loop thread exits
    pub fn wait(&self) {
        let handle = self.lock_thread().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Listener thread panicked");
            }
        }
    }

    pub fn status(&self) -> Status {
        if self.lock_listener().is_some() {
            Status::Online
        } else {
            Status::Offline
        }
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_listener().as_ref().map(|l| l.local_addr())
    }

    /// Number of sessions currently served
    pub fn connection_count(&self) -> usize {
        self.lock_listener()
            .as_ref()
            .map(|l| l.registry().len())
            .unwrap_or(0)
    }

    /// Identities of the sessions currently served
    pub fn connections(&self) -> Vec<String> {
        self.lock_listener()
            .as_ref()
            .map(|l| l.registry().snapshot_identities())
            .unwrap_or_default()
    }
}

impl Drop for ServerSupervisor {
    fn drop(&mut self) {
        if let Some(listener) = self.lock_listener().take() {
            listener.stop();
        }
    }
}
