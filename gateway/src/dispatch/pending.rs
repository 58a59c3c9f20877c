//! Registry of bounded-wait calls waiting for their reply.
//!
//! Flow:
//! 1. The caller registers a fresh reply tag and receives a guard and a oneshot receiver
//! 2. The caller publishes with that tag and awaits the receiver (with a timeout)
//! 3. The reply listener calls `complete()` with the tag found on each incoming reply
//! 4. Dropping the guard (timeout, cancellation) removes a slot that was never resolved

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::oneshot;

/// Reply body delivered to a waiting call.
pub type ReplyBody = Vec<u8>;

struct PendingSlot {
    sender: oneshot::Sender<ReplyBody>,
    created_at: Instant,
}

/// Thread-safe map from reply tag to waiting slot.
#[derive(Default)]
pub struct PendingRegistry {
    slots: DashMap<String, PendingSlot>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot for `tag`.
    ///
    /// Tags must be unique; callers use random UUIDs.
    pub fn register(self: &Arc<Self>, tag: &str) -> (PendingGuard, oneshot::Receiver<ReplyBody>) {
        let (tx, rx) = oneshot::channel();
        self.slots.insert(
            tag.to_string(),
            PendingSlot {
                sender: tx,
                created_at: Instant::now(),
            },
        );
        tracing::trace!(tag, "Registered pending reply slot");

        let guard = PendingGuard {
            registry: Arc::clone(self),
            tag: tag.to_string(),
        };
        (guard, rx)
    }

    /// Deliver a reply to the slot registered under `tag`.
    ///
    /// Returns false when no live slot exists: the call already timed out, was
    /// cancelled, or the tag was never issued by this gateway.
    pub fn complete(&self, tag: &str, body: ReplyBody) -> bool {
        let Some((_, slot)) = self.slots.remove(tag) else {
            return false;
        };

        let waited = slot.created_at.elapsed();
        match slot.sender.send(body) {
            Ok(()) => {
                tracing::debug!(tag, waited = ?waited, "Delivered reply");
                true
            }
            Err(_) => {
                tracing::debug!(tag, "Waiter dropped before reply was delivered");
                false
            }
        }
    }

    /// Drop every slot; their waiters observe a closed channel.
    pub fn fail_all(&self) -> usize {
        let count = self.slots.len();
        self.slots.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Age of the oldest outstanding slot.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.slots.iter().map(|s| s.created_at.elapsed()).max()
    }

    fn abandon(&self, tag: &str) {
        if self.slots.remove(tag).is_some() {
            tracing::debug!(tag, "Abandoned pending reply slot");
        }
    }
}

/// Removes its slot from the registry when dropped, unless it was already resolved.
pub struct PendingGuard {
    registry: Arc<PendingRegistry>,
    tag: String,
}

impl PendingGuard {
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.registry.abandon(&self.tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_delivers_to_matching_slot() {
        let registry = Arc::new(PendingRegistry::new());
        let (_guard_a, rx_a) = registry.register("a");
        let (_guard_b, rx_b) = registry.register("b");
        assert_eq!(registry.len(), 2);

        assert!(registry.complete("b", b"for-b".to_vec()));
        assert!(registry.complete("a", b"for-a".to_vec()));

        assert_eq!(rx_a.await.unwrap(), b"for-a");
        assert_eq!(rx_b.await.unwrap(), b"for-b");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_slot_resolves_only_once() {
        let registry = Arc::new(PendingRegistry::new());
        let (_guard, rx) = registry.register("a");

        assert!(registry.complete("a", b"first".to_vec()));
        assert!(!registry.complete("a", b"second".to_vec()));
        assert_eq!(rx.await.unwrap(), b"first");
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let registry = Arc::new(PendingRegistry::new());
        let (_guard, _rx) = registry.register("a");
        assert!(!registry.complete("z", b"stray".to_vec()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_dropping_guard_abandons_slot() {
        let registry = Arc::new(PendingRegistry::new());
        let (guard, _rx) = registry.register("a");
        drop(guard);

        assert!(registry.is_empty());
        assert!(!registry.complete("a", b"late".to_vec()));
    }

    #[tokio::test]
    async fn test_dropped_receiver_reports_undelivered() {
        let registry = Arc::new(PendingRegistry::new());
        let (_guard, rx) = registry.register("a");
        drop(rx);
        assert!(!registry.complete("a", b"nobody".to_vec()));
    }

    #[tokio::test]
    async fn test_fail_all_closes_waiters() {
        let registry = Arc::new(PendingRegistry::new());
        let (_ga, rx_a) = registry.register("a");
        let (_gb, rx_b) = registry.register("b");

        assert!(registry.oldest_age().is_some());
        assert_eq!(registry.fail_all(), 2);
        assert!(rx_a.await.is_err());
        assert!(rx_b.await.is_err());
        assert!(registry.oldest_age().is_none());
    }
}
