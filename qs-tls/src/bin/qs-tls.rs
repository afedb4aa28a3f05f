use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use qs_tls::{connect, QsServer, QsTlsConfig, QsTransport, SessionEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "qs-tls", about = "Pre-shared key + X25519 secure chat transport")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Listen for clients and log what they send
    Server(Endpoint),
    /// Connect to a server and send lines from stdin
    Client(Endpoint),
}

#[derive(Args, Debug)]
struct Endpoint {
    #[arg(long, env = "QS_TLS_HOST", default_value = qs_tls::config::DEFAULT_HOST)]
    host: String,
    #[arg(long, env = "QS_TLS_PORT", default_value_t = qs_tls::config::DEFAULT_PORT)]
    port: u16,
    #[arg(long, env = "QS_TLS_KEY_FILE", default_value = qs_tls::keys::DEFAULT_KEY_PATH)]
    key_file: PathBuf,
    #[arg(long)]
    verbose: bool,
}

impl Endpoint {
    fn into_config(self) -> Result<QsTlsConfig> {
        qs_tls::QsTlsConfigBuilder::new()
            .host(self.host)
            .port(self.port)
            .key_path(self.key_file)
            .verbose(self.verbose)
            .build()
            .context("invalid configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    match cli.command {
        Command::Server(endpoint) => run_server(endpoint.into_config()?).await,
        Command::Client(endpoint) => run_client(endpoint.into_config()?).await,
    }
}

async fn run_server(config: QsTlsConfig) -> Result<()> {
    let server = QsServer::bind(QsTransport::new(config))
        .await
        .context("failed to bind server")?;
    tokio::select! {
        result = server.run() => result.context("server stopped")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to install signal handler")?;
            info!("shutting down");
        }
    }
    Ok(())
}

async fn run_client(config: QsTlsConfig) -> Result<()> {
    let transport = QsTransport::new(config);
    let (session, mut events) = connect(&transport)
        .await
        .context("failed to establish secure session")?;
    let handle = session.handle();
    let session_task = tokio::spawn(session.run());

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Chat { text } => println!("[server] {}", text),
                SessionEvent::HeartbeatAck {
                    rtt: Some(rtt),
                    server_timestamp,
                } => println!(
                    "[heartbeat] rtt {:.3} ms (server time {:.6})",
                    rtt.as_secs_f64() * 1000.0,
                    server_timestamp
                ),
                SessionEvent::HeartbeatAck {
                    rtt: None,
                    server_timestamp,
                } => println!("[heartbeat] ack (server time {:.6})", server_timestamp),
                SessionEvent::PeerQuit => println!("[server] quit"),
                SessionEvent::HeartbeatReceived { .. } | SessionEvent::Closed { .. } => {}
            }
        }
    });

    println!("Type messages; /ping sends a heartbeat, /quit exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = handle.closed() => break,
        };
        let Some(line) = line else {
            // stdin closed
            if let Err(e) = handle.send_quit().await {
                warn!(error = %e, "failed to send quit");
            }
            break;
        };
        let line = line.trim();
        let sent = match line {
            "" => continue,
            "/quit" => {
                handle.send_quit().await.context("failed to send quit")?;
                break;
            }
            "/ping" => handle.send_heartbeat().await.map(|_| ()),
            text => handle.send_chat(text).await,
        };
        if let Err(e) = sent {
            warn!(error = %e, "send failed");
            break;
        }
    }

    let reason = session_task
        .await
        .context("session task panicked")?
        .context("session failed")?;
    let _ = printer.await;
    info!(reason = ?reason, "disconnected");
    Ok(())
}
