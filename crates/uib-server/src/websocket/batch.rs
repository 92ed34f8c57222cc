//! Turning queued outbound items into frames.

use std::collections::VecDeque;

use uib_broker::Outbound;
use uib_core::{Frame, WireMessage, pack_prefix};

/// Pop the next frame off the pending queue.
///
/// An ack at the head becomes an `ack` frame. Otherwise the run of messages
/// up to the next ack is packed: as many as fit in `limit` (at least one)
/// go into a single `message` or `batch` frame, in queue order.
pub fn next_frame(pending: &mut VecDeque<Outbound>, limit: Option<usize>) -> Option<Frame> {
    if matches!(pending.front()?, Outbound::Ack(_)) {
        return match pending.pop_front() {
            Some(Outbound::Ack(ack_id)) => Some(Frame::Ack { ack_id }),
            _ => None,
        };
    }

    let sizes = pending.iter().map_while(|item| match item {
        Outbound::Message { size, .. } => Some(*size),
        Outbound::Ack(_) => None,
    });
    let count = pack_prefix(sizes, limit);
    let messages: Vec<WireMessage> = pending
        .drain(..count)
        .filter_map(|item| match item {
            Outbound::Message { message, .. } => Some(message),
            Outbound::Ack(_) => None,
        })
        .collect();
    Some(Frame::from_messages(messages))
}

/// Short label for metrics.
pub fn frame_kind(frame: &Frame) -> &'static str {
    match frame {
        Frame::Open { .. } => "open",
        Frame::Ping {} => "ping",
        Frame::Pong {} => "pong",
        Frame::Message(_) => "message",
        Frame::Batch { .. } => "batch",
        Frame::Ack { .. } => "ack",
        Frame::Close { .. } => "close",
    }
}
