//! Command line arguments and subcommand runners

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use echolink_net::{ConnectionManager, Error as NetError, Exchange, ServerSupervisor};
use tracing::{debug, info};

use crate::config::Config;
use crate::console::ConsoleSink;

/// Line typed in the interactive client to leave
const QUIT_COMMAND: &str = "/quit";

/// TCP echo server and client
#[derive(Parser, Debug)]
#[command(name = "echolink")]
#[command(about = "TCP echo server and client with managed connections")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter used when RUST_LOG is unset
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the echo server until Ctrl-C
    Server {
        /// Port to listen on
        #[arg(short, long, allow_hyphen_values = true)]
        port: Option<String>,

        /// Maximum number of simultaneous clients
        #[arg(short, long)]
        max_clients: Option<usize>,
    },
    /// Interactive client: every line typed is echoed back
    Client {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Send one message and print the echo
    Send {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        /// Text to send
        message: String,
    },
}

/// Dispatch the parsed subcommand
pub fn run(command: Command, config: Config) -> Result<()> {
    match command {
        Command::Server { port, max_clients } => run_server(config, port, max_clients),
        Command::Client { host, port } => run_client(config, host, port),
        Command::Send {
            host,
            port,
            message,
        } => run_send(config, host, port, &message),
    }
}

fn run_server(config: Config, port: Option<String>, max_clients: Option<usize>) -> Result<()> {
    let mut settings = config.server.listener_settings();
    if max_clients.is_some() {
        settings.max_clients = max_clients;
    }
    let port = port.unwrap_or_else(|| config.server.port.to_string());

    let sink = ConsoleSink {
        show_connections: true,
    };
    let supervisor = ServerSupervisor::new(settings, Arc::new(sink));

    let addr = supervisor
        .start(&port)
        .with_context(|| format!("Failed to start server on port {}", port))?;
    info!(addr = %addr, "Listening");
    println!("Listening on {} (Ctrl-C to stop)", addr);

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("Failed to install Ctrl-C handler")?;

    // A closed channel means the handler is gone; stop either way.
    let _ = shutdown_rx.recv();

    debug!("Shutdown requested");
    supervisor.stop();
    supervisor.wait();
    Ok(())
}

fn connect(config: &Config, host: Option<String>, port: Option<u16>) -> Result<ConnectionManager> {
    let host = host.unwrap_or_else(|| config.client.host.clone());
    let port = port.unwrap_or(config.client.port);

    let mut manager =
        ConnectionManager::new(config.client.client_settings(), Arc::new(ConsoleSink::default()));
    manager
        .connect(&host, port)
        .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
    Ok(manager)
}

fn print_exchange(message: &str, exchange: &Exchange) {
    println!("Sent ({}B): {}", exchange.sent, message);
    println!(
        "Recv ({}B): {}",
        exchange.received.bytes, exchange.received.message
    );
}

fn run_client(config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut manager = connect(&config, host, port)?;
    println!("Type a message and press Enter; {} leaves.", QUIT_COMMAND);

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush().context("Failed to flush stdout")?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("Failed to read stdin")?;
        let message = line.trim_end_matches('\r');

        if message == QUIT_COMMAND {
            break;
        }
        if message.is_empty() {
            continue;
        }

        match manager.exchange(message) {
            Ok(exchange) => print_exchange(message, &exchange),
            Err(NetError::ConnectionClosed) | Err(NetError::ServerBusy) => return Ok(()),
            Err(NetError::Timeout) => println!("No reply from the server yet"),
            Err(e) => return Err(e).context("Exchange failed"),
        }
    }

    if manager.is_connected() {
        manager.disconnect()?;
    }
    Ok(())
}

fn run_send(config: Config, host: Option<String>, port: Option<u16>, message: &str) -> Result<()> {
    let mut manager = connect(&config, host, port)?;

    let exchange = manager.exchange(message).context("Exchange failed")?;
    print_exchange(message, &exchange);

    manager.disconnect()?;
    Ok(())
}
