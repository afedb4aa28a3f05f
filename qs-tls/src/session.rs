//! Secure session and inbound dispatch loop
//!
//! A [`SecureSession`] owns the read half of the connection and runs the
//! inbound loop; any number of cloned [`SessionHandle`]s share the write half
//! behind an async mutex, so each record is written as one uninterrupted
//! frame. Everything the loop delivers to the application goes out through an
//! unbounded channel of [`SessionEvent`]s.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex};

use crate::error::{QsTlsError, Result};
use crate::framing::{self, RecordReader, RecordWriter};
use crate::message::Message;
use crate::record;
use crate::types::{Role, SessionKey, SessionState};

/// Something the inbound loop reports to the application
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Chat text from the peer
    Chat { text: String },
    /// A heartbeat arrived and was acknowledged (responder side)
    HeartbeatReceived { timestamp: f64 },
    /// A heartbeat acknowledgement arrived (initiator side)
    HeartbeatAck {
        /// Round-trip time, when the ack echoed a numeric timestamp
        rtt: Option<Duration>,
        server_timestamp: f64,
    },
    /// The peer sent `quit`
    PeerQuit,
    /// The session reached its terminal state
    Closed { reason: CloseReason },
}

/// Receiving end of a session's output sink
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Why a session ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// This side sent `quit` or failed to write
    LocalClose,
    /// The peer sent `quit`
    PeerQuit,
    /// The peer closed the stream
    PeerClosed,
    /// An unrecoverable protocol or I/O error
    Error(String),
}

/// Statistics about a secure session
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    /// Total record bytes sent
    pub bytes_sent: u64,
    /// Total record bytes received
    pub bytes_received: u64,
    /// Messages sent
    pub messages_sent: u64,
    /// Messages received
    pub messages_received: u64,
    /// Session duration in milliseconds
    pub duration_ms: u64,
}

#[derive(Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

struct Shared<W> {
    role: Role,
    key: SessionKey,
    writer: Mutex<RecordWriter<W>>,
    state: watch::Sender<SessionState>,
    last_heartbeat: Mutex<Option<f64>>,
    counters: Counters,
    established_at: Instant,
}

impl<W> Shared<W> {
    /// Move to `next` if it is later than the current state
    fn advance(&self, next: SessionState) -> bool {
        let moved = self.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });
        if moved {
            tracing::debug!(role = %self.role, state = %next, "session state changed");
        }
        moved
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }
}

async fn closing(state: &mut watch::Receiver<SessionState>) {
    let _ = state.wait_for(|s| *s >= SessionState::Closing).await;
}

/// Current UNIX time in fractional seconds
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Round-trip time for an echoed heartbeat timestamp, clamped at zero
pub fn rtt_since(orig_timestamp: f64, now: f64) -> Option<Duration> {
    Duration::try_from_secs_f64((now - orig_timestamp).max(0.0)).ok()
}

/// Cloneable sending side of a session
pub struct SessionHandle<W> {
    shared: Arc<Shared<W>>,
}

impl<W> Clone for SessionHandle<W> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<W> SessionHandle<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Send one message as a single record
    ///
    /// Sending `quit` moves the session to `Closing`; nothing can be sent
    /// afterwards. A message that cannot be encoded is rejected without
    /// touching the connection; only a failed write closes the session.
    pub async fn send(&self, message: &Message) -> Result<()> {
        if let Message::Unknown { kind } = message {
            return Err(QsTlsError::Session(format!(
                "cannot send message of unknown type {:?}",
                kind
            )));
        }

        let mut writer = self.shared.writer.lock().await;
        let state = self.shared.state();
        if state != SessionState::Established {
            return Err(QsTlsError::Session(format!(
                "cannot send {} while {}",
                message.kind(),
                state
            )));
        }

        let sealed = framing::seal_record(&self.shared.key, message)?;
        match framing::write_record(&mut writer, sealed).await {
            Ok(len) => {
                let counters = &self.shared.counters;
                counters.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
                counters.messages_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(role = %self.shared.role, error = %e, "failed to send record");
                self.shared.advance(SessionState::Closing);
                return Err(e);
            }
        }

        if matches!(message, Message::Quit) {
            self.shared.advance(SessionState::Closing);
        }
        Ok(())
    }

    pub async fn send_chat(&self, text: impl Into<String>) -> Result<()> {
        self.send(&Message::chat(text)).await
    }

    /// Send a heartbeat stamped with the current time and return that stamp
    pub async fn send_heartbeat(&self) -> Result<f64> {
        let timestamp = unix_timestamp();
        self.send(&Message::Heartbeat { timestamp }).await?;
        *self.shared.last_heartbeat.lock().await = Some(timestamp);
        Ok(timestamp)
    }

    pub async fn send_quit(&self) -> Result<()> {
        self.send(&Message::Quit).await
    }

    /// Timestamp of the most recent heartbeat sent on this session
    pub async fn last_heartbeat(&self) -> Option<f64> {
        *self.shared.last_heartbeat.lock().await
    }

    /// Snapshot of the session counters
    pub fn stats(&self) -> SessionStats {
        let counters = &self.shared.counters;
        SessionStats {
            bytes_sent: counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: counters.bytes_received.load(Ordering::Relaxed),
            messages_sent: counters.messages_sent.load(Ordering::Relaxed),
            messages_received: counters.messages_received.load(Ordering::Relaxed),
            duration_ms: self.shared.established_at.elapsed().as_millis() as u64,
        }
    }

    /// Wait until the session has fully closed
    pub async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|s| *s == SessionState::Closed).await;
    }
}

/// A secure, encrypted session established after a successful handshake
pub struct SecureSession<S> {
    /// Inbound record stream
    reader: RecordReader<ReadHalf<S>>,
    /// Sending side shared with every handle
    handle: SessionHandle<WriteHalf<S>>,
    /// Output sink
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl<S> SecureSession<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Wrap a connection whose handshake produced `key`
    ///
    /// The session starts `Established`; the returned receiver is the
    /// session's output sink.
    pub fn new(stream: S, key: SessionKey, role: Role) -> (Self, SessionEvents) {
        let (read_half, write_half) = tokio::io::split(stream);
        let (state, _) = watch::channel(SessionState::Established);
        let (events, events_rx) = mpsc::unbounded_channel();

        let shared = Shared {
            role,
            key,
            writer: Mutex::new(framing::record_writer(write_half)),
            state,
            last_heartbeat: Mutex::new(None),
            counters: Counters::default(),
            established_at: Instant::now(),
        };

        let session = Self {
            reader: framing::record_reader(read_half),
            handle: SessionHandle {
                shared: Arc::new(shared),
            },
            events,
        };
        (session, events_rx)
    }

    /// Handle for sending on this session from another task
    pub fn handle(&self) -> SessionHandle<WriteHalf<S>> {
        self.handle.clone()
    }

    pub fn role(&self) -> Role {
        self.handle.shared.role
    }

    pub fn state(&self) -> SessionState {
        self.handle.shared.state()
    }

    /// Run the inbound dispatch loop until the session ends
    ///
    /// A quit from either side or the peer hanging up is a normal close and
    /// returns `Ok`; protocol and I/O faults are returned as errors after the
    /// connection has been released.
    pub async fn run(mut self) -> Result<CloseReason> {
        let shared = Arc::clone(&self.handle.shared);
        let mut state_rx = shared.state.subscribe();

        let outcome = loop {
            let frame = tokio::select! {
                biased;
                _ = closing(&mut state_rx) => {
                    break Ok(CloseReason::LocalClose);
                }
                frame = framing::recv_frame(&mut self.reader) => frame,
            };

            let frame = match frame {
                Ok(frame) => frame,
                Err(e) if e.is_connection_closed() => {
                    tracing::info!(role = %shared.role, "connection closed by peer");
                    break Ok(CloseReason::PeerClosed);
                }
                Err(e) => break Err(e),
            };

            shared
                .counters
                .bytes_received
                .fetch_add(frame.len() as u64, Ordering::Relaxed);
            shared
                .counters
                .messages_received
                .fetch_add(1, Ordering::Relaxed);

            let message = match record::decode(&shared.key, &frame) {
                Ok(message) => message,
                Err(e) => break Err(e),
            };

            match self.dispatch(message).await {
                Ok(Some(reason)) => break Ok(reason),
                Ok(None) => {}
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = &outcome {
            tracing::warn!(role = %shared.role, error = %e, "session failed");
        }

        // Release the connection.
        shared.advance(SessionState::Closing);
        {
            let mut writer = shared.writer.lock().await;
            if let Err(e) = framing::close_writer(&mut writer).await {
                tracing::debug!(role = %shared.role, error = %e, "error shutting down write half");
            }
        }
        shared.advance(SessionState::Closed);

        let reason = match &outcome {
            Ok(reason) => reason.clone(),
            Err(e) => CloseReason::Error(e.to_string()),
        };
        tracing::info!(role = %shared.role, reason = ?reason, "session closed");
        let _ = self.events.send(SessionEvent::Closed { reason });

        outcome
    }

    /// Handle one inbound message; `Some` ends the loop
    async fn dispatch(&self, message: Message) -> Result<Option<CloseReason>> {
        let role = self.role();
        match message {
            Message::Chat { text } => {
                tracing::debug!(role = %role, len = text.len(), "chat received");
                self.emit(SessionEvent::Chat { text });
            }
            Message::Heartbeat { timestamp } => match role {
                Role::Responder => {
                    let now = unix_timestamp();
                    tracing::debug!(client_ts = timestamp, server_ts = now, "heartbeat received");
                    self.handle
                        .send(&Message::HeartbeatAck {
                            orig_timestamp: Some(timestamp),
                            server_timestamp: now,
                        })
                        .await?;
                    self.emit(SessionEvent::HeartbeatReceived { timestamp });
                }
                Role::Initiator => {
                    tracing::warn!(timestamp, "unexpected heartbeat from responder, ignoring");
                }
            },
            Message::HeartbeatAck {
                orig_timestamp,
                server_timestamp,
            } => match role {
                Role::Initiator => {
                    let rtt = orig_timestamp.and_then(|ts| rtt_since(ts, unix_timestamp()));
                    match rtt {
                        Some(rtt) => tracing::info!(
                            rtt_ms = rtt.as_secs_f64() * 1000.0,
                            server_ts = server_timestamp,
                            "heartbeat ack received"
                        ),
                        None => tracing::info!(
                            server_ts = server_timestamp,
                            "heartbeat ack received without timestamp"
                        ),
                    }
                    self.emit(SessionEvent::HeartbeatAck {
                        rtt,
                        server_timestamp,
                    });
                }
                Role::Responder => {
                    tracing::warn!("unexpected heartbeat ack from initiator, ignoring");
                }
            },
            Message::Quit => {
                tracing::info!(role = %role, "peer requested quit");
                self.handle.shared.advance(SessionState::Closing);
                self.emit(SessionEvent::PeerQuit);
                return Ok(Some(CloseReason::PeerQuit));
            }
            Message::Unknown { kind } => {
                tracing::warn!(role = %role, kind = %kind, "unknown message type, ignoring");
            }
        }
        Ok(None)
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("session event receiver dropped");
        }
    }
}
