//! TCP entry points: the accept loop and the connect path

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::Result;
use crate::session::{SecureSession, SessionEvent, SessionEvents};
use crate::transport::QsTransport;

/// Events from every connection, tagged with the peer address
pub type ServerEventSink = mpsc::UnboundedSender<(SocketAddr, SessionEvent)>;

/// Accepts connections and runs one session task per peer
pub struct QsServer {
    transport: QsTransport,
    listener: TcpListener,
    events: Option<ServerEventSink>,
}

impl QsServer {
    /// Bind the configured host and port
    pub async fn bind(transport: QsTransport) -> Result<Self> {
        let endpoint = transport.config().endpoint();
        let listener = TcpListener::bind(&endpoint).await?;
        info!("qs-tls server listening on {}", listener.local_addr()?);
        Ok(Self {
            transport,
            listener,
            events: None,
        })
    }

    /// Forward every session event to `sink` in addition to logging it
    pub fn with_event_sink(mut self, sink: ServerEventSink) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever
    ///
    /// Each connection gets its own task; a failed handshake or session is
    /// logged and closes only that connection.
    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((socket, addr)) => {
                    info!(peer = %addr, "accepted connection");
                    let transport = self.transport.clone();
                    let events = self.events.clone();
                    tokio::spawn(async move {
                        serve_connection(transport, socket, addr, events).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                }
            }
        }
    }
}

async fn serve_connection(
    transport: QsTransport,
    socket: TcpStream,
    addr: SocketAddr,
    sink: Option<ServerEventSink>,
) {
    let (session, mut events) = match transport.upgrade_inbound(socket).await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            warn!("handshake failed with {}: {}", addr, e);
            return;
        }
    };
    info!(peer = %addr, "secure session established");

    let forward = async {
        while let Some(event) = events.recv().await {
            log_event(addr, &event);
            if let Some(sink) = &sink {
                let _ = sink.send((addr, event));
            }
        }
    };

    let (result, ()) = tokio::join!(session.run(), forward);
    match result {
        Ok(reason) => info!(peer = %addr, reason = ?reason, "connection finished"),
        Err(e) => warn!("session with {} ended with error: {}", addr, e),
    }
}

fn log_event(addr: SocketAddr, event: &SessionEvent) {
    match event {
        SessionEvent::Chat { text } => info!(peer = %addr, "chat: {}", text),
        SessionEvent::HeartbeatReceived { timestamp } => {
            info!(peer = %addr, client_ts = timestamp, "heartbeat")
        }
        SessionEvent::HeartbeatAck {
            rtt,
            server_timestamp,
        } => info!(peer = %addr, rtt = ?rtt, server_ts = server_timestamp, "heartbeat ack"),
        SessionEvent::PeerQuit => info!(peer = %addr, "peer quit"),
        SessionEvent::Closed { .. } => {}
    }
}

/// Connect to the configured endpoint and run the initiator handshake
pub async fn connect(transport: &QsTransport) -> Result<(SecureSession<TcpStream>, SessionEvents)> {
    let endpoint = transport.config().endpoint();
    let socket = TcpStream::connect(&endpoint).await?;
    info!("connected to {}", endpoint);
    transport.upgrade_outbound(socket).await
}
