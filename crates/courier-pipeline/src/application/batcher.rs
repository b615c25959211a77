//! In-memory batching in front of a dispatcher.
//!
//! Events accumulate until the buffer reaches `batch_size` or `flush_timeout`
//! elapses after the first buffered event, whichever comes first. A flush
//! groups the snapshot by type and dispatches each group in concurrent chunks.
//! Failed dispatches are logged and not re-queued; the event store's replay
//! covers them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use courier_core::event::{Event, EventType};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::application::dispatch::EventDispatcher;

/// Batching thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Buffer length that triggers an immediate flush.
    pub batch_size: usize,
    /// Delay after the first buffered event before a timed flush.
    pub flush_timeout: Duration,
    /// Events dispatched concurrently within one type group.
    pub chunk_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_timeout: Duration::from_millis(5_000),
            chunk_size: 10,
        }
    }
}

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Events the dispatcher accepted.
    pub dispatched: usize,
    /// Events whose dispatch failed.
    pub failed: usize,
}

#[derive(Debug, Default)]
struct BatchState {
    buffer: Vec<Event>,
    timer: Option<JoinHandle<()>>,
}

struct BatcherInner {
    dispatcher: Arc<dyn EventDispatcher>,
    config: BatchConfig,
    state: Mutex<BatchState>,
    flushes: AtomicU64,
}

/// Buffers events and flushes them to a dispatcher by size or timeout.
#[derive(Clone)]
pub struct EventBatcher {
    inner: Arc<BatcherInner>,
}

impl std::fmt::Debug for EventBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBatcher")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl EventBatcher {
    /// Creates a batcher in front of `dispatcher`.
    pub fn new(dispatcher: Arc<dyn EventDispatcher>, config: BatchConfig) -> Self {
        Self {
            inner: Arc::new(BatcherInner {
                dispatcher,
                config,
                state: Mutex::new(BatchState::default()),
                flushes: AtomicU64::new(0),
            }),
        }
    }

    /// Appends `event`. Flushes immediately when the buffer reaches the batch
    /// size, otherwise arms the flush timer if it is not already running.
    pub async fn add(&self, event: Event) {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            state.buffer.push(event);

            if state.buffer.len() >= self.inner.config.batch_size.max(1) {
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
                std::mem::take(&mut state.buffer)
            } else {
                if state.timer.is_none() {
                    state.timer = Some(self.arm_timer());
                }
                return;
            }
        };

        self.inner.dispatch_all(snapshot).await;
    }

    /// Cancels any pending timer and dispatches whatever is buffered.
    pub async fn flush(&self) -> BatchReport {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            std::mem::take(&mut state.buffer)
        };
        self.inner.dispatch_all(snapshot).await
    }

    /// Number of buffered events.
    pub async fn pending(&self) -> usize {
        self.inner.state.lock().await.buffer.len()
    }

    /// Whether a timed flush is scheduled.
    pub async fn has_pending_timer(&self) -> bool {
        self.inner.state.lock().await.timer.is_some()
    }

    /// Number of non-empty flushes performed so far.
    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.inner.flushes.load(Ordering::Relaxed)
    }

    fn arm_timer(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let timeout = inner.config.flush_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            inner.flush_on_timer().await;
        })
    }
}

impl BatcherInner {
    async fn flush_on_timer(&self) {
        let snapshot = {
            let mut state = self.state.lock().await;
            // Dropped without abort: this task is the timer.
            state.timer.take();
            std::mem::take(&mut state.buffer)
        };
        debug!(events = snapshot.len(), "batch flush timer fired");
        self.dispatch_all(snapshot).await;
    }

    async fn dispatch_all(&self, snapshot: Vec<Event>) -> BatchReport {
        if snapshot.is_empty() {
            return BatchReport::default();
        }
        self.flushes.fetch_add(1, Ordering::Relaxed);
        let total = snapshot.len();

        let mut groups: BTreeMap<EventType, Vec<Event>> = BTreeMap::new();
        for event in snapshot {
            groups.entry(event.event_type).or_default().push(event);
        }

        let mut report = BatchReport::default();
        for (event_type, events) in &groups {
            for chunk in events.chunks(self.config.chunk_size.max(1)) {
                let results = join_all(chunk.iter().map(|event| self.dispatcher.dispatch(event))).await;
                for (event, result) in chunk.iter().zip(results) {
                    match result {
                        Ok(()) => report.dispatched += 1,
                        Err(err) => {
                            report.failed += 1;
                            error!(
                                event_id = %event.id,
                                event_type = %event_type,
                                error = %err,
                                "batched event dispatch failed"
                            );
                        }
                    }
                }
            }
        }

        info!(
            events = total,
            groups = groups.len(),
            dispatched = report.dispatched,
            failed = report.failed,
            "event batch flushed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use courier_core::broker::BrokerError;
    use courier_test_support::FixedClock;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::error::PipelineError;

    #[derive(Default)]
    struct RecordingDispatcher {
        dispatched: StdMutex<Vec<Event>>,
        fail_ids: StdMutex<Vec<Uuid>>,
    }

    impl RecordingDispatcher {
        fn dispatched(&self) -> Vec<Event> {
            self.dispatched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventDispatcher for RecordingDispatcher {
        async fn dispatch(&self, event: &Event) -> Result<(), PipelineError> {
            if self.fail_ids.lock().unwrap().contains(&event.id) {
                return Err(BrokerError::NotConnected.into());
            }
            self.dispatched.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn event(event_type: EventType, n: u32) -> Event {
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());
        Event::new(event_type, json!({"entityId": format!("t{n}")}), "task-service", &clock)
    }

    fn batcher() -> (Arc<RecordingDispatcher>, EventBatcher) {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let batcher = EventBatcher::new(
            Arc::clone(&dispatcher) as Arc<dyn EventDispatcher>,
            BatchConfig::default(),
        );
        (dispatcher, batcher)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaching_batch_size_flushes_once_without_timer() {
        // Arrange
        let (dispatcher, batcher) = batcher();

        // Act
        for n in 0..50 {
            batcher.add(event(EventType::TaskCreated, n)).await;
        }

        // Assert
        assert_eq!(batcher.flush_count(), 1);
        assert_eq!(dispatcher.dispatched().len(), 50);
        assert_eq!(batcher.pending().await, 0);
        assert!(!batcher.has_pending_timer().await);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(batcher.flush_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_event_is_flushed_after_timeout() {
        let (dispatcher, batcher) = batcher();

        batcher.add(event(EventType::TaskUpdated, 1)).await;
        assert_eq!(batcher.flush_count(), 0);
        assert!(batcher.has_pending_timer().await);

        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(batcher.flush_count(), 1);
        assert_eq!(dispatcher.dispatched().len(), 1);
        assert!(!batcher.has_pending_timer().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_flush_before_timeout_elapses() {
        let (dispatcher, batcher) = batcher();

        for n in 0..49 {
            batcher.add(event(EventType::TaskCreated, n)).await;
        }
        tokio::time::sleep(Duration::from_millis(4_900)).await;

        assert_eq!(batcher.flush_count(), 0);
        assert_eq!(batcher.pending().await, 49);
        assert!(dispatcher.dispatched().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_flush_cancels_pending_timer() {
        let (dispatcher, batcher) = batcher();
        batcher.add(event(EventType::TaskDeleted, 1)).await;

        let report = batcher.flush().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(report, BatchReport { dispatched: 1, failed: 0 });
        assert_eq!(batcher.flush_count(), 1);
        assert_eq!(dispatcher.dispatched().len(), 1);
        assert!(!batcher.has_pending_timer().await);
    }

    #[tokio::test]
    async fn test_flushing_empty_buffer_is_a_no_op() {
        let (_, batcher) = batcher();

        assert_eq!(batcher.flush().await, BatchReport::default());
        assert_eq!(batcher.flush_count(), 0);
    }

    #[tokio::test]
    async fn test_flush_groups_by_type_preserving_order_within_group() {
        // Arrange
        let (dispatcher, batcher) = batcher();
        let added = vec![
            event(EventType::TaskCompleted, 1),
            event(EventType::TaskCreated, 2),
            event(EventType::TaskCompleted, 3),
            event(EventType::TaskCreated, 4),
        ];
        for e in added.clone() {
            batcher.add(e).await;
        }

        // Act
        batcher.flush().await;

        // Assert
        let ids: Vec<Uuid> = dispatcher.dispatched().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![added[1].id, added[3].id, added[0].id, added[2].id]);
    }

    #[tokio::test]
    async fn test_failed_dispatch_is_reported_and_not_requeued() {
        let (dispatcher, batcher) = batcher();
        let doomed = event(EventType::TaskAssigned, 2);
        dispatcher.fail_ids.lock().unwrap().push(doomed.id);
        batcher.add(event(EventType::TaskAssigned, 1)).await;
        batcher.add(doomed).await;
        batcher.add(event(EventType::TaskAssigned, 3)).await;

        let report = batcher.flush().await;

        assert_eq!(report, BatchReport { dispatched: 2, failed: 1 });
        assert_eq!(batcher.pending().await, 0);
        assert_eq!(batcher.flush().await, BatchReport::default());
    }

    #[tokio::test]
    async fn test_large_group_is_dispatched_in_chunks() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let batcher = EventBatcher::new(
            Arc::clone(&dispatcher) as Arc<dyn EventDispatcher>,
            BatchConfig {
                batch_size: 1_000,
                chunk_size: 3,
                ..BatchConfig::default()
            },
        );
        for n in 0..7 {
            batcher.add(event(EventType::TaskCreated, n)).await;
        }

        let report = batcher.flush().await;

        assert_eq!(report.dispatched, 7);
        assert_eq!(dispatcher.dispatched().len(), 7);
    }
}
