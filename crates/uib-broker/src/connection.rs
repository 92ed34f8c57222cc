//! Outbound side of one connected client.
//!
//! The broker never writes to a socket. It pushes [`Outbound`] items into a
//! bounded queue that the transport's writer task drains; a full queue
//! drops the item instead of blocking fan-out to other clients.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uib_core::{ConnectionId, ControlMessage, WireMessage, estimate_size};

/// One item in a client's outbound queue.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    /// A data or control message with its estimated wire size.
    Message {
        /// The message.
        message: WireMessage,
        /// Estimated size used by the payload packer.
        size: usize,
    },
    /// Acknowledgement of a client message that carried an `ackId`.
    Ack(u64),
}

impl Outbound {
    /// Queue item for `message`, sized once up front.
    pub fn message(message: WireMessage) -> Self {
        let size = estimate_size(&message.payload);
        Self::Message { message, size }
    }
}

/// A connected client as seen by the broker.
pub struct ClientConnection {
    /// Ephemeral connection id.
    pub id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    /// When this connection was established.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
    closed: CancellationToken,
    close_reason: Mutex<Option<String>>,
}

impl ClientConnection {
    /// Create a connection around the sending half of its queue.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            closed: CancellationToken::new(),
            close_reason: Mutex::new(None),
        }
    }

    /// Create a connection and its queue receiver.
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(id, tx), rx)
    }

    /// Enqueue an item without waiting.
    ///
    /// Returns `false` if the queue is full or closed, and increments the
    /// dropped counter.
    pub fn send(&self, item: Outbound) -> bool {
        if self.tx.try_send(item).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Enqueue a message.
    pub fn send_message(&self, message: WireMessage) -> bool {
        self.send(Outbound::message(message))
    }

    /// Enqueue a control message.
    pub fn send_control(&self, message: &ControlMessage) -> bool {
        self.send_message(WireMessage::control(message))
    }

    /// Total items dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if a pong arrived since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Ask the transport to close this connection.
    ///
    /// The first reason wins; later calls only re-signal.
    pub fn disconnect(&self, reason: impl Into<String>) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason.into());
            }
        }
        self.closed.cancel();
    }

    /// Token cancelled when [`disconnect`](Self::disconnect) is called.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Whether a disconnect was requested.
    pub fn is_disconnected(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Reason given to the first [`disconnect`](Self::disconnect).
    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().clone()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("dropped", &self.drop_count())
            .field("disconnected", &self.is_disconnected())
            .finish_non_exhaustive()
    }
}
