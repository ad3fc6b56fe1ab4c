//! Multi-client lifecycle scenarios against a real loopback server

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use echolink_net::{
    ClientSettings, ConnectionManager, ConnectionState, Error, EventSink, ListenerSettings,
    NullSink, ServerSupervisor, Status, SERVER_BUSY_NOTICE,
};

/// Keeps the observed connection counts and statuses
#[derive(Default)]
struct CountingSink {
    counts: Mutex<Vec<usize>>,
    statuses: Mutex<Vec<Status>>,
}

impl EventSink for CountingSink {
    fn on_status_change(&self, status: Status) {
        self.statuses.lock().unwrap().push(status);
    }

    fn on_connection_count_change(&self, count: usize) {
        self.counts.lock().unwrap().push(count);
    }
}

fn local_settings(max_clients: Option<usize>) -> ListenerSettings {
    ListenerSettings {
        bind_host: "127.0.0.1".to_string(),
        max_clients,
        ..Default::default()
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn hello_scenario() {
    let server = ServerSupervisor::new(local_settings(None), Arc::new(NullSink));
    let addr = server.start("0").unwrap();

    let mut client = ConnectionManager::new(ClientSettings::default(), Arc::new(NullSink));
    client.connect("localhost", addr.port()).unwrap();

    let exchange = client.exchange("hello").unwrap();
    assert_eq!(exchange.sent, 5);
    assert_eq!(exchange.received.bytes, 5);
    assert_eq!(exchange.received.message, "hello");

    client.disconnect().unwrap();
    assert!(wait_for(|| server.connection_count() == 0));

    assert!(server.stop());
    server.wait();
}

#[test]
fn stop_with_no_clients() {
    let sink = Arc::new(CountingSink::default());
    let server = ServerSupervisor::new(local_settings(None), sink.clone());
    server.start("0").unwrap();

    assert!(server.stop());
    server.wait();

    assert_eq!(server.status(), Status::Offline);
    assert_eq!(server.connection_count(), 0);
    assert_eq!(
        *sink.statuses.lock().unwrap(),
        vec![Status::Online, Status::Offline]
    );
}

#[test]
fn concurrent_admission_respects_capacity() {
    const CAPACITY: usize = 2;
    const CLIENTS: usize = 6;

    let sink = Arc::new(CountingSink::default());
    let server = ServerSupervisor::new(local_settings(Some(CAPACITY)), sink.clone());
    let addr = server.start("0").unwrap();

    let settings = ClientSettings {
        read_timeout: Some(Duration::from_millis(500)),
        ..Default::default()
    };

    let handles: Vec<_> = (0..CLIENTS)
        .map(|_| {
            let settings = settings.clone();
            thread::spawn(move || {
                let mut client = ConnectionManager::new(settings, Arc::new(NullSink));
                client.connect("127.0.0.1", addr.port()).unwrap();
                // Admitted clients hear nothing; rejected ones get the notice.
                let admitted = match client.receive() {
                    Err(Error::Timeout) => true,
                    Ok(received) => {
                        assert_eq!(received.message, SERVER_BUSY_NOTICE);
                        false
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                };
                (admitted, client)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let admitted = results.iter().filter(|(admitted, _)| *admitted).count();

    assert_eq!(admitted, CAPACITY);
    assert_eq!(server.connection_count(), CAPACITY);
    assert!(sink.counts.lock().unwrap().iter().all(|&c| c <= CAPACITY));

    drop(results);
    assert!(wait_for(|| server.connection_count() == 0));

    server.stop();
    server.wait();
}

#[test]
fn stop_closes_connected_clients() {
    let server = ServerSupervisor::new(local_settings(None), Arc::new(NullSink));
    let addr = server.start("0").unwrap();

    let mut clients: Vec<_> = (0..3)
        .map(|_| {
            let mut client = ConnectionManager::new(ClientSettings::default(), Arc::new(NullSink));
            client.connect("127.0.0.1", addr.port()).unwrap();
            client.exchange("ping").unwrap();
            client
        })
        .collect();
    assert!(wait_for(|| server.connection_count() == 3));

    server.stop();
    server.wait();

    for client in &mut clients {
        assert!(matches!(client.receive(), Err(Error::ConnectionClosed)));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}

#[test]
fn clients_are_isolated() {
    let server = ServerSupervisor::new(local_settings(None), Arc::new(NullSink));
    let addr = server.start("0").unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            thread::spawn(move || {
                let mut client =
                    ConnectionManager::new(ClientSettings::default(), Arc::new(NullSink));
                client.connect("127.0.0.1", addr.port()).unwrap();
                for round in 0..5 {
                    let message = format!("client {i} round {round}");
                    let exchange = client.exchange(&message).unwrap();
                    assert_eq!(exchange.received.message, message);
                }
                client.disconnect().unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(wait_for(|| server.connection_count() == 0));

    server.stop();
    server.wait();
}
