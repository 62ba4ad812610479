//! Outbound queue
//!
//! Requests made while the link is down are buffered here and replayed in
//! strict FIFO order once the handshake completes. Reply timeouts are armed
//! at actual transmission, never at enqueue, so a long outage does not burn
//! the timeout budget of queued requests.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use wavelink_core::{Frame, ReplyOutcome};

// ----------------------------------------------------------------------------
// Pending Request
// ----------------------------------------------------------------------------

/// One outbound frame, optionally awaited by a caller.
///
/// For correlated requests, `responder` hands the caller the reply receiver
/// at transmit time; fire-and-forget sends carry no responder.
pub struct PendingRequest {
    pub frame: Frame,
    pub responder: Option<oneshot::Sender<oneshot::Receiver<ReplyOutcome>>>,
}

impl PendingRequest {
    pub fn fire_and_forget(frame: Frame) -> Self {
        Self {
            frame,
            responder: None,
        }
    }
}

// ----------------------------------------------------------------------------
// Outbound Queue
// ----------------------------------------------------------------------------

/// FIFO buffer of requests awaiting transmission
#[derive(Default)]
pub struct OutboundQueue {
    items: VecDeque<PendingRequest>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request; it transmits after everything already queued
    pub fn push(&mut self, request: PendingRequest) {
        self.items.push_back(request);
    }

    /// Put a request back at the head after a failed transmission so replay
    /// order is preserved
    pub fn requeue_front(&mut self, request: PendingRequest) {
        self.items.push_front(request);
    }

    /// Next request to transmit
    pub fn pop(&mut self) -> Option<PendingRequest> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
