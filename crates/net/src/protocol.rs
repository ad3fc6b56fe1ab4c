//! Wire protocol constants and endpoint parsing
//!
//! There is no framing: a send writes at most [`MAX_MESSAGE_BYTES`] raw
//! UTF-8 bytes and a receive returns whatever arrived, up to the same cap.

use std::fmt;

use crate::error::{Error, Result};

/// Hard cap for one send and for one receive buffer
pub const MAX_MESSAGE_BYTES: usize = 1024;

/// Notice written to a connection refused by the admission policy
pub const SERVER_BUSY_NOTICE: &str = "SERVER BUSY";

/// Online/offline status reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Offline,
    Online,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Offline => write!(f, "OFFLINE"),
            Status::Online => write!(f, "ONLINE"),
        }
    }
}

/// Result of a single receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    /// Bytes actually read from the socket
    pub bytes: usize,
    /// The bytes decoded as UTF-8 (invalid sequences replaced)
    pub message: String,
}

/// Cut `message` to at most [`MAX_MESSAGE_BYTES`] bytes.
///
/// Truncation is byte based; when the cap falls inside a multi-byte
/// character the cut moves back to the previous character boundary.
pub fn truncate_message(message: &str) -> &str {
    if message.len() <= MAX_MESSAGE_BYTES {
        return message;
    }

    let mut end = MAX_MESSAGE_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

/// Parse a listener port given as text
pub fn parse_port(text: &str) -> Result<u16> {
    let trimmed = text.trim();
    let value: i64 = trimmed
        .parse()
        .map_err(|_| Error::InvalidPort(format!("'{}' is not a number", trimmed)))?;

    if value < 0 {
        return Err(Error::InvalidPort("port cannot be less than zero".into()));
    }

    u16::try_from(value).map_err(|_| Error::InvalidPort(format!("{} is out of range", value)))
}

/// Remote address a client connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Build an endpoint, rejecting an empty host
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        let host = host.trim();
        if host.is_empty() {
            return Err(Error::InvalidEndpoint("host cannot be empty".into()));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Build an endpoint from user input where the port is still text
    pub fn parse(host: &str, port: &str) -> Result<Self> {
        let port = parse_port(port).map_err(|e| match e {
            Error::InvalidPort(reason) => Error::InvalidEndpoint(reason),
            other => other,
        })?;
        Self::new(host, port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_message_untouched() {
        assert_eq!(truncate_message("hello"), "hello");
        let exact = "a".repeat(MAX_MESSAGE_BYTES);
        assert_eq!(truncate_message(&exact).len(), MAX_MESSAGE_BYTES);
    }

    #[test]
    fn test_long_message_truncated_to_cap() {
        let long = "x".repeat(2000);
        let cut = truncate_message(&long);
        assert_eq!(cut.len(), MAX_MESSAGE_BYTES);
        assert!(long.starts_with(cut));
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        // 1023 ASCII bytes then a 3-byte character straddling the cap
        let message = format!("{}€tail", "a".repeat(MAX_MESSAGE_BYTES - 1));
        let cut = truncate_message(&message);
        assert_eq!(cut.len(), MAX_MESSAGE_BYTES - 1);
        assert!(!cut.contains('€'));
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("7070").unwrap(), 7070);
        assert_eq!(parse_port(" 0 ").unwrap(), 0);
        assert!(matches!(parse_port("-1"), Err(Error::InvalidPort(_))));
        assert!(matches!(parse_port("abc"), Err(Error::InvalidPort(_))));
        assert!(matches!(parse_port("70000"), Err(Error::InvalidPort(_))));
    }

    #[test]
    fn test_endpoint_validation() {
        let endpoint = Endpoint::parse("localhost", "8080").unwrap();
        assert_eq!(endpoint.to_string(), "localhost:8080");

        assert!(matches!(Endpoint::new("  ", 80), Err(Error::InvalidEndpoint(_))));
        assert!(matches!(
            Endpoint::parse("localhost", "-5"),
            Err(Error::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_ipv6_endpoint_display() {
        let endpoint = Endpoint::new("::1", 9000).unwrap();
        assert_eq!(endpoint.to_string(), "[::1]:9000");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Online.to_string(), "ONLINE");
        assert_eq!(Status::Offline.to_string(), "OFFLINE");
    }
}
