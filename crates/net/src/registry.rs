//! Client registry - the server's set of active sessions
//!
//! One mutex guards the ordered session list. It is held only for the
//! mutation or read itself plus the observer notification that describes
//! it, never across a blocking socket read or write.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::events::EventSink;
use crate::session::WireSession;

/// Outcome of [`ClientRegistry::admit`]
#[derive(Debug)]
pub enum Admission {
    /// Session is now tracked
    Admitted,
    /// Capacity reached; the session is handed back untracked
    Full(Arc<WireSession>),
}

/// Thread-safe collection of active sessions, in insertion order
pub struct ClientRegistry {
    sessions: Mutex<Vec<Arc<WireSession>>>,
    events: Arc<dyn EventSink>,
}

impl ClientRegistry {
    /// Create an empty registry reporting to `events`
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<WireSession>>> {
        // A panicking observer must not take the whole server down with it.
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Track a session unconditionally
    pub fn add(&self, session: Arc<WireSession>) {
        let mut sessions = self.lock();
        sessions.push(session);
        self.notify(&sessions);
    }

    /// Track a session unless `capacity` sessions are already tracked
    pub fn admit(&self, session: Arc<WireSession>, capacity: Option<usize>) -> Admission {
        let mut sessions = self.lock();
        if capacity.is_some_and(|max| sessions.len() >= max) {
            return Admission::Full(session);
        }

        sessions.push(session);
        self.notify(&sessions);
        Admission::Admitted
    }

    /// Stop tracking the session with `identity`. Returns whether it was present.
    pub fn remove(&self, identity: &str) -> bool {
        let mut sessions = self.lock();
        let Some(index) = sessions.iter().position(|s| s.identity() == identity) else {
            return false;
        };

        sessions.remove(index);
        self.notify(&sessions);
        true
    }

    /// Identities of all tracked sessions, in insertion order
    pub fn snapshot_identities(&self) -> Vec<String> {
        identities(&self.lock())
    }

    /// Number of tracked sessions
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if no session is tracked
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Close every tracked session and forget them all.
    ///
    /// Returns the identities that were closed.
    pub fn close_all(&self) -> Vec<String> {
        let mut sessions = self.lock();
        let closed = identities(&sessions);

        for session in sessions.drain(..) {
            debug!(identity = %session.identity(), "Closing session");
            session.close();
        }

        self.notify(&sessions);
        closed
    }

    fn notify(&self, sessions: &[Arc<WireSession>]) {
        self.events.on_connection_count_change(sessions.len());
        self.events.on_connection_list_change(&identities(sessions));
    }
}

fn identities(sessions: &[Arc<WireSession>]) -> Vec<String> {
    sessions.iter().map(|s| s.identity().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingSink;
    use crate::events::NullSink;
    use std::net::{TcpListener, TcpStream};

    /// Server-side session plus the client socket keeping it alive
    fn server_session(listener: &TcpListener) -> (Arc<WireSession>, TcpStream) {
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, _) = listener.accept().unwrap();
        (Arc::new(WireSession::new(stream).unwrap()), client)
    }

    #[test]
    fn test_add_remove_snapshot() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = ClientRegistry::new(Arc::new(NullSink));

        let (a, _ca) = server_session(&listener);
        let (b, _cb) = server_session(&listener);
        registry.add(a.clone());
        registry.add(b.clone());

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.snapshot_identities(),
            vec![a.identity().to_string(), b.identity().to_string()]
        );

        assert!(registry.remove(a.identity()));
        assert!(!registry.remove(a.identity()));
        assert_eq!(registry.snapshot_identities(), vec![b.identity().to_string()]);
    }

    #[test]
    fn test_admit_respects_capacity() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = ClientRegistry::new(Arc::new(NullSink));

        let (a, _ca) = server_session(&listener);
        let (b, _cb) = server_session(&listener);

        assert!(matches!(registry.admit(a, Some(1)), Admission::Admitted));
        match registry.admit(b.clone(), Some(1)) {
            Admission::Full(rejected) => assert_eq!(rejected.identity(), b.identity()),
            Admission::Admitted => panic!("capacity ignored"),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_admit_unlimited() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = ClientRegistry::new(Arc::new(NullSink));

        let mut clients = Vec::new();
        for _ in 0..5 {
            let (session, client) = server_session(&listener);
            clients.push(client);
            assert!(matches!(registry.admit(session, None), Admission::Admitted));
        }
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_close_all_closes_and_empties() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = ClientRegistry::new(Arc::new(NullSink));

        let (a, _ca) = server_session(&listener);
        let (b, _cb) = server_session(&listener);
        registry.add(a.clone());
        registry.add(b.clone());

        let closed = registry.close_all();
        assert_eq!(closed.len(), 2);
        assert!(registry.is_empty());
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[test]
    fn test_notifications_follow_mutations() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let sink = Arc::new(RecordingSink::default());
        let registry = ClientRegistry::new(sink.clone());

        let (a, _ca) = server_session(&listener);
        registry.add(a.clone());
        registry.remove(a.identity());
        registry.remove(a.identity());

        assert_eq!(sink.counts(), vec![1, 0]);
        assert_eq!(sink.lists(), vec![vec![a.identity().to_string()], vec![]]);
    }

    #[test]
    fn test_concurrent_removals_keep_count_consistent() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = Arc::new(ClientRegistry::new(Arc::new(NullSink)));

        let mut clients = Vec::new();
        let mut sessions = Vec::new();
        for _ in 0..8 {
            let (session, client) = server_session(&listener);
            registry.add(session.clone());
            sessions.push(session);
            clients.push(client);
        }

        let handles: Vec<_> = sessions
            .iter()
            .take(5)
            .map(|s| {
                let registry = registry.clone();
                let identity = s.identity().to_string();
                std::thread::spawn(move || registry.remove(&identity))
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(registry.len(), 3);
    }
}
