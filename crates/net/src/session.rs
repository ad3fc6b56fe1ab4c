//! Wire session: one connected TCP socket and its identity
//!
//! Both directions go through `&TcpStream`, so a session can be shared
//! behind an `Arc` between the thread driving it and the registry that may
//! close it during shutdown. Closing shuts the socket down, which unblocks a
//! read pending on another thread.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::{truncate_message, Received, MAX_MESSAGE_BYTES};

/// A live, bidirectional TCP connection
#[derive(Debug)]
pub struct WireSession {
    stream: TcpStream,
    peer: SocketAddr,
    identity: String,
    connected_at: DateTime<Utc>,
    closed: AtomicBool,
}

impl WireSession {
    /// Wrap an already connected or accepted socket
    pub fn new(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        let identity = format!("{}:{} ({})", peer.ip(), peer.port(), Uuid::new_v4());

        Ok(Self {
            stream,
            peer,
            identity,
            connected_at: Utc::now(),
            closed: AtomicBool::new(false),
        })
    }

    /// Unique name of this session: peer address, port and a random token
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Remote address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// When the session was established
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Limit how long `receive` blocks. `None` blocks indefinitely.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Send a text message, truncated to the protocol cap.
    ///
    /// Returns the number of bytes written, which is the truncated length.
    pub fn send(&self, message: &str) -> Result<usize> {
        self.send_bytes(truncate_message(message).as_bytes())
    }

    /// Send raw bytes, cut to at most [`MAX_MESSAGE_BYTES`]
    pub fn send_bytes(&self, payload: &[u8]) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::NotConnected);
        }
        if let Err(e) = self.stream.peer_addr() {
            if e.kind() == io::ErrorKind::NotConnected {
                return Err(Error::NotConnected);
            }
            return Err(e.into());
        }

        let payload = &payload[..payload.len().min(MAX_MESSAGE_BYTES)];

        let mut writer = &self.stream;
        writer.write_all(payload).map_err(map_io_error)?;
        writer.flush().map_err(map_io_error)?;

        Ok(payload.len())
    }

    /// Block until data arrives or the peer goes away, then decode it.
    ///
    /// A zero-length read means the peer closed the connection and is
    /// reported as [`Error::ConnectionClosed`].
    pub fn receive(&self) -> Result<Received> {
        let payload = self.receive_bytes()?;
        Ok(Received {
            bytes: payload.len(),
            message: String::from_utf8_lossy(&payload).into_owned(),
        })
    }

    /// Like [`receive`](Self::receive) but returns the bytes undecoded
    pub fn receive_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = [0u8; MAX_MESSAGE_BYTES];
        let mut reader = &self.stream;

        let bytes = loop {
            match reader.read(&mut buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_io_error(e)),
            }
        };

        if bytes == 0 {
            return Err(Error::ConnectionClosed);
        }

        Ok(buf[..bytes].to_vec())
    }

    /// Shut the socket down in both directions. Only the first call acts.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // The peer may already be gone; nothing left to release then.
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                tracing::debug!(identity = %self.identity, error = %e, "Socket shutdown failed");
            }
        }
    }
}

impl Drop for WireSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Classify socket errors: a vanished peer is a normal session end
fn map_io_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => Error::ConnectionClosed,
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout,
        io::ErrorKind::NotConnected => Error::NotConnected,
        _ => Error::Io(e),
    }
}
