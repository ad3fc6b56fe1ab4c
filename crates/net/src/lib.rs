//! Echolink Network Library
//!
//! Blocking TCP echo server and client with a managed connection lifecycle.
//!
//! # Architecture
//!
//! - **Session**: one connected socket plus its identity
//! - **Registry**: the server's set of live sessions, guarded by one mutex
//! - **Listener**: accept loop, admission and one echo thread per client
//! - **Supervisor**: start/stop handle running the listener on its own thread
//! - **Client**: connection manager driving a single outbound session
//!
//! Everything the presentation layer needs to know arrives through an
//! [`EventSink`].
//!
//! # Usage
//!
//! ```ignore
//! // Host starts a server
//! let server = ServerSupervisor::new(ListenerSettings::default(), Arc::new(TracingSink));
//! let addr = server.start("7070")?;
//!
//! // Client connects and exchanges one message
//! let mut client = ConnectionManager::new(ClientSettings::default(), Arc::new(TracingSink));
//! client.connect("127.0.0.1", addr.port())?;
//! let echo = client.exchange("hello")?;
//! assert_eq!(echo.received.message, "hello");
//!
//! client.disconnect()?;
//! server.stop();
//! ```

pub mod client;
pub mod error;
pub mod events;
pub mod listener;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod supervisor;

pub use client::{ClientSettings, ConnectionManager, ConnectionState, Exchange};
pub use error::{Error, Result};
pub use events::{EventSink, NullSink, TracingSink};
pub use listener::{Listener, ListenerSettings};
pub use protocol::{
    parse_port, truncate_message, Endpoint, Received, Status, MAX_MESSAGE_BYTES,
    SERVER_BUSY_NOTICE,
};
pub use registry::{Admission, ClientRegistry};
pub use session::WireSession;
pub use supervisor::ServerSupervisor;

/// Default port for echolink servers
pub const DEFAULT_PORT: u16 = 7070;
