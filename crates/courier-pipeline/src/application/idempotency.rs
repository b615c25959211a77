//! Bounded memory of handled event ids.
//!
//! Replay is at-least-once, so the subscriber claims an id before invoking
//! handlers and skips ids it has already claimed. The oldest ids are
//! forgotten once capacity is reached.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use uuid::Uuid;

/// Default number of remembered ids.
pub const DEFAULT_IDEMPOTENCY_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct Seen {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

/// Tracks which event ids have been claimed for handling.
#[derive(Debug)]
pub struct IdempotencyGuard {
    seen: Mutex<Seen>,
    capacity: usize,
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self::new(DEFAULT_IDEMPOTENCY_CAPACITY)
    }
}

impl IdempotencyGuard {
    /// Creates a guard remembering at most `capacity` ids. A capacity of
    /// zero disables deduplication.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: Mutex::new(Seen::default()),
            capacity,
        }
    }

    /// Claims `id`. Returns `false` if it was already claimed.
    pub fn try_claim(&self, id: Uuid) -> bool {
        if self.capacity == 0 {
            return true;
        }
        let mut seen = self.lock();
        if !seen.ids.insert(id) {
            return false;
        }
        seen.order.push_back(id);
        while seen.order.len() > self.capacity {
            if let Some(evicted) = seen.order.pop_front() {
                seen.ids.remove(&evicted);
            }
        }
        true
    }

    /// Forgets a claim so a later delivery of `id` is handled again. Used
    /// when handling failed.
    pub fn release(&self, id: Uuid) {
        let mut seen = self.lock();
        if seen.ids.remove(&id) {
            seen.order.retain(|claimed| *claimed != id);
        }
    }

    /// Whether `id` is currently claimed.
    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().ids.contains(&id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Seen> {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_of_same_id_is_rejected() {
        let guard = IdempotencyGuard::default();
        let id = Uuid::new_v4();

        assert!(guard.try_claim(id));
        assert!(!guard.try_claim(id));
        assert!(guard.contains(id));
    }

    #[test]
    fn test_released_id_can_be_claimed_again() {
        let guard = IdempotencyGuard::default();
        let id = Uuid::new_v4();
        guard.try_claim(id);

        guard.release(id);

        assert!(!guard.contains(id));
        assert!(guard.try_claim(id));
    }

    #[test]
    fn test_oldest_ids_are_evicted_past_capacity() {
        // Arrange
        let guard = IdempotencyGuard::new(2);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

        // Act
        for id in &ids {
            assert!(guard.try_claim(*id));
        }

        // Assert
        assert!(!guard.contains(ids[0]));
        assert!(guard.contains(ids[1]));
        assert!(guard.contains(ids[2]));
    }

    #[test]
    fn test_zero_capacity_never_deduplicates() {
        let guard = IdempotencyGuard::new(0);
        let id = Uuid::new_v4();

        assert!(guard.try_claim(id));
        assert!(guard.try_claim(id));
    }
}
