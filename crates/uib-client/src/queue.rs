//! Ordered outbound buffer with partial flush.

use std::collections::VecDeque;

use uib_core::{Frame, WireMessage, estimate_size, pack_prefix};

/// FIFO of messages not yet written to the transport.
///
/// A flush takes a prefix sized to the payload limit, writes it, and only
/// then [`commit`](Self::commit)s exactly that many messages.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    items: VecDeque<(WireMessage, usize)>,
}

impl OutboundQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    pub fn push(&mut self, message: WireMessage) {
        let size = estimate_size(&message.payload);
        self.items.push_back((message, size));
    }

    /// Queued message count.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The next write: how many messages it covers and the frame to send.
    pub fn next_frame(&self, limit: Option<usize>) -> Option<(usize, Frame)> {
        if self.items.is_empty() {
            return None;
        }
        let count = pack_prefix(self.items.iter().map(|(_, size)| *size), limit);
        let messages = self
            .items
            .iter()
            .take(count)
            .map(|(m, _)| m.clone())
            .collect();
        Some((count, Frame::from_messages(messages)))
    }

    /// Drop the first `count` messages after they were written.
    pub fn commit(&mut self, count: usize) {
        let count = count.min(self.items.len());
        drop(self.items.drain(..count));
    }
}
