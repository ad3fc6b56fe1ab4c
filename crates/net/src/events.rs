//! Observer callbacks for the presentation layer
//!
//! The listener, registry and connection manager report what happens to
//! them through an injected [`EventSink`]. Callbacks arrive on whichever
//! thread caused them (accept loop, session handlers, caller), so
//! implementations marshal to their own rendering context themselves.

use crate::protocol::Status;

/// Receiver of log lines and state changes
///
/// Every method defaults to a no-op. Registry notifications are delivered
/// while the registry lock is held; an implementation must not call back
/// into the registry from them.
pub trait EventSink: Send + Sync {
    /// Human readable log line
    fn on_log(&self, _text: &str) {}

    /// Server or client went online/offline
    fn on_status_change(&self, _status: Status) {}

    /// Number of tracked sessions changed
    fn on_connection_count_change(&self, _count: usize) {}

    /// Identities of the tracked sessions changed
    fn on_connection_list_change(&self, _identities: &[String]) {}
}

/// Sink that forwards everything to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_log(&self, text: &str) {
        tracing::info!(target: "echolink::events", "{}", text);
    }

    fn on_status_change(&self, status: Status) {
        tracing::info!(target: "echolink::events", status = %status, "Status changed");
    }

    fn on_connection_count_change(&self, count: usize) {
        tracing::debug!(target: "echolink::events", count, "Connection count changed");
    }

    fn on_connection_list_change(&self, identities: &[String]) {
        tracing::debug!(target: "echolink::events", ?identities, "Connection list changed");
    }
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {}
