//! Request/reply correlation over a multiplexed connection
//!
//! Every outbound action carries a fresh correlation id; the sender registers
//! a pending waiter before transmitting and the receive loop resolves it when
//! a frame with a matching id arrives. Each waiter resolves exactly once:
//! either with the reply frame or, after the bounded timeout, with a soft
//! timeout outcome. Late or duplicate replies find no waiter and fall through
//! to unsolicited-event handling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand_core::{OsRng, RngCore};
use tokio::sync::oneshot;

use crate::frame::Frame;

// ----------------------------------------------------------------------------
// Correlation Identifier
// ----------------------------------------------------------------------------

/// Opaque token matching a request frame to its eventual reply.
///
/// Built from a high-resolution timestamp and a short random suffix;
/// uniqueness is the requirement, not unpredictability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh correlation id
    pub fn generate() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or(0);
        let suffix = OsRng.next_u32() & 0xffff;
        CorrelationId(format!("{micros:x}-{suffix:04x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        CorrelationId(s)
    }
}

impl core::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

// ----------------------------------------------------------------------------
// Reply Outcome
// ----------------------------------------------------------------------------

/// Resolution of a pending request.
///
/// A timeout is a soft failure observable to the caller; it never affects
/// the connection or other in-flight requests.
#[derive(Debug, PartialEq)]
pub enum ReplyOutcome {
    /// The matching reply frame arrived in time
    Reply(Frame),
    /// No reply arrived within the bounded timeout
    TimedOut,
}

// ----------------------------------------------------------------------------
// Request Correlator
// ----------------------------------------------------------------------------

type Waiters = HashMap<String, oneshot::Sender<ReplyOutcome>>;
type PendingMap = Arc<Mutex<Waiters>>;

/// Lock the pending map, tolerating poisoning: the map stays consistent
/// under every operation, so a panicked holder leaves nothing half-done.
fn lock_pending(pending: &Mutex<Waiters>) -> MutexGuard<'_, Waiters> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks pending waiters keyed by correlation id.
///
/// Cloneable handle; all clones share the same pending map.
#[derive(Clone)]
pub struct RequestCorrelator {
    pending: PendingMap,
    timeout: Duration,
}

impl RequestCorrelator {
    /// Create a correlator with the given reply timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Register a waiter for `id` and arm its timeout.
    ///
    /// Must be called before the request frame is transmitted so the reply
    /// cannot race the registration.
    pub fn register(&self, id: &CorrelationId) -> oneshot::Receiver<ReplyOutcome> {
        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id.as_str().to_string(), tx);

        let pending = Arc::clone(&self.pending);
        let key = id.as_str().to_string();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let waiter = lock_pending(&pending).remove(&key);
            if let Some(tx) = waiter {
                tracing::debug!(id = %key, "request timed out");
                // Receiver may already be gone; a dropped caller is fine.
                let _ = tx.send(ReplyOutcome::TimedOut);
            }
        });

        rx
    }

    /// Resolve the waiter matching the frame's correlation id, if any.
    ///
    /// Returns false when no waiter is registered (unknown id, already
    /// resolved, or timed out); such frames are dispatched as unsolicited
    /// events by the caller.
    pub fn resolve(&self, frame: Frame) -> bool {
        let Some(id) = frame.correlation_id.clone() else {
            return false;
        };

        // Remove-then-send under the lock: exactly one resolution per id.
        let waiter = lock_pending(&self.pending).remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(ReplyOutcome::Reply(frame));
                true
            }
            None => false,
        }
    }

    /// Number of requests currently awaiting a reply
    pub fn pending_count(&self) -> usize {
        lock_pending(&self.pending).len()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;

    fn reply_for(id: &CorrelationId) -> Frame {
        Frame {
            correlation_id: Some(id.as_str().to_string()),
            category: "social".into(),
            action: None,
            payload: Some(Value::Null),
            error: None,
        }
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(CorrelationId::generate().as_str().to_string()));
        }
    }

    #[tokio::test]
    async fn test_reply_resolves_waiter() {
        let correlator = RequestCorrelator::new(Duration::from_secs(5));
        let id = CorrelationId::generate();
        let rx = correlator.register(&id);

        assert!(correlator.resolve(reply_for(&id)));
        match rx.await.unwrap() {
            ReplyOutcome::Reply(frame) => {
                assert_eq!(frame.correlation_id.as_deref(), Some(id.as_str()));
            }
            ReplyOutcome::TimedOut => panic!("expected reply"),
        }
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_soft_and_late_reply_ignored() {
        let correlator = RequestCorrelator::new(Duration::from_millis(20));
        let id = CorrelationId::generate();
        let rx = correlator.register(&id);

        assert_eq!(rx.await.unwrap(), ReplyOutcome::TimedOut);

        // A reply arriving after the timeout finds no waiter.
        assert!(!correlator.resolve(reply_for(&id)));
    }

    #[tokio::test]
    async fn test_exactly_one_resolution() {
        let correlator = RequestCorrelator::new(Duration::from_secs(5));
        let id = CorrelationId::generate();
        let rx = correlator.register(&id);

        assert!(correlator.resolve(reply_for(&id)));
        // Duplicate reply for the same id is not delivered twice.
        assert!(!correlator.resolve(reply_for(&id)));

        assert!(matches!(rx.await.unwrap(), ReplyOutcome::Reply(_)));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_resolved() {
        let correlator = RequestCorrelator::new(Duration::from_secs(5));
        let id = CorrelationId::generate();
        assert!(!correlator.resolve(reply_for(&id)));
    }

    #[tokio::test]
    async fn test_frame_without_id_is_unsolicited() {
        let correlator = RequestCorrelator::new(Duration::from_secs(5));
        let frame = Frame::event("messenger", Value::Null);
        assert!(!correlator.resolve(frame));
    }

    #[tokio::test]
    async fn test_poisoned_lock_does_not_propagate() {
        let correlator = RequestCorrelator::new(Duration::from_secs(5));

        // Panic while holding the lock to poison it.
        let pending = Arc::clone(&correlator.pending);
        let _ = std::thread::spawn(move || {
            let _guard = pending.lock().unwrap();
            panic!("holder panicked");
        })
        .join();

        let id = CorrelationId::generate();
        let rx = correlator.register(&id);
        assert!(correlator.resolve(reply_for(&id)));
        assert!(matches!(rx.await.unwrap(), ReplyOutcome::Reply(_)));
    }
}
