//! Terminal rendering of library events

use echolink_net::{EventSink, Status, TracingSink};

/// Prints callbacks to stdout
///
/// State changes are also recorded through [`TracingSink`]; log lines are
/// already human readable and only go to the terminal.
///
/// Callbacks may come from any server thread; `println!` locks stdout per
/// line so output never interleaves mid-line.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink {
    /// Also print connection count/list changes
    pub show_connections: bool,
}

impl EventSink for ConsoleSink {
    fn on_log(&self, text: &str) {
        println!("{}", text);
    }

    fn on_status_change(&self, status: Status) {
        TracingSink.on_status_change(status);
        println!("Status: {}", status);
    }

    fn on_connection_count_change(&self, count: usize) {
        TracingSink.on_connection_count_change(count);
        if self.show_connections {
            println!("Connections: {}", count);
        }
    }

    fn on_connection_list_change(&self, identities: &[String]) {
        TracingSink.on_connection_list_change(identities);
        if self.show_connections {
            for identity in identities {
                println!("  {}", identity);
            }
        }
    }
}
