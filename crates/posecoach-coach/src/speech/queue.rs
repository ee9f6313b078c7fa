//! Single-flight speech queue.
//!
//! At most one utterance is audible at a time. Enqueueing never blocks: the
//! item is either queued, replaces a queued item, or is dropped, and the
//! caller learns which from [`EnqueueOutcome`]. Playback happens on a worker
//! task and completion is reported through the item's callback.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use posecoach_core::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::backend::{SpeechBackend, SpeechError};
use crate::arbitration::{CoachingCue, CueId, Priority};

/// Queue tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechQueueConfig {
    /// Items waiting behind the one playing
    pub max_pending: usize,
    /// Extra attempts after a backend failure
    pub retry_budget: u32,
    /// Re-speak interval for items that do not carry one
    pub default_category_interval_ms: u64,
}

impl Default for SpeechQueueConfig {
    fn default() -> Self {
        Self {
            max_pending: 1,
            retry_budget: 2,
            default_category_interval_ms: 4000,
        }
    }
}

impl SpeechQueueConfig {
    /// Create a builder for custom configuration
    pub fn builder() -> SpeechQueueConfigBuilder {
        SpeechQueueConfigBuilder::default()
    }
}

/// Builder for [`SpeechQueueConfig`]
#[derive(Debug, Default)]
pub struct SpeechQueueConfigBuilder {
    config: SpeechQueueConfig,
}

impl SpeechQueueConfigBuilder {
    /// Set the pending capacity
    #[must_use]
    pub fn max_pending(mut self, max: usize) -> Self {
        self.config.max_pending = max.max(1);
        self
    }

    /// Set the retry budget
    #[must_use]
    pub fn retry_budget(mut self, retries: u32) -> Self {
        self.config.retry_budget = retries;
        self
    }

    /// Set the fallback category interval
    #[must_use]
    pub fn default_category_interval_ms(mut self, ms: u64) -> Self {
        self.config.default_category_interval_ms = ms;
        self
    }

    /// Build the configuration
    pub fn build(self) -> SpeechQueueConfig {
        self.config
    }
}

/// How an item finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechOutcome {
    /// Played to completion
    Spoken,
    /// Retry budget exhausted
    Failed,
    /// Dropped, replaced or flushed before it finished
    Cancelled,
}

/// Result of [`SpeechQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
    /// Waiting for the worker
    Queued,
    /// Took the place of a queued item
    Replaced,
    /// Same category spoke within its interval
    DroppedCooldown,
    /// Queue full of more urgent items
    DroppedLowPriority,
}

impl EnqueueOutcome {
    /// `true` if the item will be played.
    pub fn accepted(&self) -> bool {
        matches!(self, Self::Queued | Self::Replaced)
    }
}

/// Completion callback.
pub type CompletionCallback = Box<dyn FnOnce(SpeechOutcome) + Send + 'static>;

/// One utterance.
pub struct SpeechItem {
    /// Identifier, shared with the cue it came from
    pub id: CueId,
    /// Text to speak
    pub text: String,
    /// Priority
    pub priority: Priority,
    /// Speech category
    pub category: String,
    /// Re-speak interval, `None` for the queue default
    pub category_interval_ms: Option<u64>,
    /// Session time of the request
    pub timestamp: Timestamp,
    /// Failed attempts so far
    pub retries: u32,
    on_complete: Option<CompletionCallback>,
}

impl SpeechItem {
    /// Create an item using the default category interval.
    pub fn new(
        text: impl Into<String>,
        priority: Priority,
        category: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: CueId::new(),
            text: text.into(),
            priority,
            category: category.into(),
            category_interval_ms: None,
            timestamp,
            retries: 0,
            on_complete: None,
        }
    }

    /// Item for a rendered cue.
    pub fn from_cue(cue: &CoachingCue) -> Self {
        Self {
            id: cue.id,
            category_interval_ms: Some(cue.category_interval_ms),
            ..Self::new(cue.text.clone(), cue.priority, cue.category.clone(), cue.issued_at)
        }
    }

    /// Set the re-speak interval.
    #[must_use]
    pub fn with_interval(mut self, ms: u64) -> Self {
        self.category_interval_ms = Some(ms);
        self
    }

    /// Set the completion callback.
    #[must_use]
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(SpeechOutcome) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    fn complete(mut self, outcome: SpeechOutcome) {
        if let Some(callback) = self.on_complete.take() {
            callback(outcome);
        }
    }
}

impl std::fmt::Debug for SpeechItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechItem")
            .field("id", &self.id)
            .field("text", &self.text)
            .field("priority", &self.priority)
            .field("category", &self.category)
            .field("timestamp", &self.timestamp)
            .field("retries", &self.retries)
            .finish()
    }
}

#[derive(Default)]
struct QueueState {
    pending: Vec<SpeechItem>,
    last_spoken: HashMap<String, Timestamp>,
    playing: Option<CueId>,
    generation: u64,
    closed: bool,
}

impl QueueState {
    /// Most urgent pending item, oldest first on ties.
    fn pop_next(&mut self) -> Option<SpeechItem> {
        let index = self
            .pending
            .iter()
            .enumerate()
            .min_by_key(|(i, item)| (item.priority.value(), *i))
            .map(|(i, _)| i)?;
        Some(self.pending.remove(index))
    }

    /// Least urgent pending item, newest first on ties.
    fn lowest(&self) -> Option<usize> {
        self.pending
            .iter()
            .enumerate()
            .max_by_key(|(i, item)| (item.priority.value(), *i))
            .map(|(i, _)| i)
    }
}

struct Inner {
    config: SpeechQueueConfig,
    backend: Arc<dyn SpeechBackend>,
    state: Mutex<QueueState>,
    notify: Notify,
}

/// Handle to the queue and its worker task.
pub struct SpeechQueue {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SpeechQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechQueue")
            .field("config", &self.inner.config)
            .field("backend", &self.inner.backend.name())
            .field("pending", &self.pending())
            .finish()
    }
}

impl SpeechQueue {
    /// Start a queue and spawn its worker on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Runtime`] when called outside a runtime.
    pub fn start(
        config: SpeechQueueConfig,
        backend: Arc<dyn SpeechBackend>,
    ) -> Result<Self, SpeechError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| SpeechError::Runtime(e.to_string()))?;

        let inner = Arc::new(Inner {
            config,
            backend,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        });
        let worker = handle.spawn(run_worker(Arc::clone(&inner)));

        tracing::debug!(backend = %inner.backend.name(), "Speech worker started");
        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Configuration.
    pub fn config(&self) -> &SpeechQueueConfig {
        &self.inner.config
    }

    /// Offer an item. Never waits for playback.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Closed`] after [`shutdown`](Self::shutdown).
    pub fn enqueue(&self, item: SpeechItem) -> Result<EnqueueOutcome, SpeechError> {
        let (outcome, displaced) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                drop(state);
                item.complete(SpeechOutcome::Cancelled);
                return Err(SpeechError::Closed);
            }
            self.admit(&mut state, item)
        };

        if let Some(item) = displaced {
            tracing::debug!(
                category = %item.category,
                priority = %item.priority,
                outcome = ?outcome,
                "Speech item not played"
            );
            item.complete(SpeechOutcome::Cancelled);
        }
        if outcome.accepted() {
            self.inner.notify.notify_one();
        }
        Ok(outcome)
    }

    /// Apply admission rules; returns the outcome and any item that will not
    /// be played (the new one or the one it replaced).
    fn admit(
        &self,
        state: &mut QueueState,
        item: SpeechItem,
    ) -> (EnqueueOutcome, Option<SpeechItem>) {
        let interval = item
            .category_interval_ms
            .unwrap_or(self.inner.config.default_category_interval_ms) as i64;
        let cooling = state
            .last_spoken
            .get(&item.category)
            .is_some_and(|at| item.timestamp.millis_since(*at) < interval);
        if cooling {
            return (EnqueueOutcome::DroppedCooldown, Some(item));
        }

        if let Some(index) = state
            .pending
            .iter()
            .position(|queued| queued.category == item.category)
        {
            if !item.priority.at_least(state.pending[index].priority) {
                return (EnqueueOutcome::DroppedLowPriority, Some(item));
            }
            let old = std::mem::replace(&mut state.pending[index], item);
            return (EnqueueOutcome::Replaced, Some(old));
        }

        if state.pending.len() < self.inner.config.max_pending.max(1) {
            state.pending.push(item);
            return (EnqueueOutcome::Queued, None);
        }

        match state.lowest() {
            Some(index) if item.priority.at_least(state.pending[index].priority) => {
                let old = state.pending.remove(index);
                state.pending.push(item);
                (EnqueueOutcome::Replaced, Some(old))
            }
            _ => (EnqueueOutcome::DroppedLowPriority, Some(item)),
        }
    }

    /// Items waiting to play.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// `true` while an utterance is playing.
    pub fn is_speaking(&self) -> bool {
        self.inner.state.lock().playing.is_some()
    }

    /// Drop every queued item and stop the current utterance.
    pub async fn flush(&self) {
        let drained = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            std::mem::take(&mut state.pending)
        };
        let count = drained.len();
        for item in drained {
            item.complete(SpeechOutcome::Cancelled);
        }
        self.inner.backend.cancel().await;
        tracing::debug!(dropped = count, "Speech queue flushed");
    }

    /// Flush, stop the worker and wait for it to exit.
    pub async fn shutdown(&self) {
        self.inner.state.lock().closed = true;
        self.flush().await;
        self.inner.notify.notify_one();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Speech worker ended abnormally");
            }
        }
    }
}

impl Drop for SpeechQueue {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.abort();
        }
    }
}

async fn run_worker(inner: Arc<Inner>) {
    loop {
        let next = {
            let mut state = inner.state.lock();
            if state.closed {
                break;
            }
            let generation = state.generation;
            state.pop_next().map(|item| {
                state.last_spoken.insert(item.category.clone(), item.timestamp);
                state.playing = Some(item.id);
                (item, generation)
            })
        };

        let Some((mut item, generation)) = next else {
            inner.notify.notified().await;
            continue;
        };

        let outcome = play(&inner, &mut item, generation).await;
        inner.state.lock().playing = None;
        item.complete(outcome);
    }
}

async fn play(inner: &Inner, item: &mut SpeechItem, generation: u64) -> SpeechOutcome {
    loop {
        let error = match inner.backend.speak(&item.text).await {
            Ok(()) => return SpeechOutcome::Spoken,
            Err(e) => e,
        };

        if inner.state.lock().generation != generation {
            return SpeechOutcome::Cancelled;
        }
        if item.retries >= inner.config.retry_budget {
            tracing::warn!(
                backend = %inner.backend.name(),
                category = %item.category,
                attempts = item.retries + 1,
                error = %error,
                "Speech failed, dropping utterance"
            );
            return SpeechOutcome::Failed;
        }
        item.retries += 1;
        tracing::debug!(category = %item.category, error = %error, "Retrying speech");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::RecordingSpeechBackend;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::{mpsc, Semaphore};

    /// Reports each utterance as it starts and holds it until released.
    struct GatedBackend {
        started: mpsc::UnboundedSender<String>,
        gate: Semaphore,
    }

    impl GatedBackend {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let backend = Arc::new(Self {
                started: tx,
                gate: Semaphore::new(0),
            });
            (backend, rx)
        }

        fn release(&self) {
            self.gate.add_permits(1);
        }
    }

    #[async_trait::async_trait]
    impl SpeechBackend for GatedBackend {
        fn name(&self) -> &str {
            "gated"
        }

        async fn speak(&self, text: &str) -> Result<(), SpeechError> {
            let _ = self.started.send(text.to_string());
            match self.gate.acquire().await {
                Ok(permit) => {
                    permit.forget();
                    Ok(())
                }
                Err(_) => Err(SpeechError::Interrupted),
            }
        }

        async fn cancel(&self) {
            self.gate.close();
        }
    }

    struct FlakyBackend {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl SpeechBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn speak(&self, _text: &str) -> Result<(), SpeechError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(SpeechError::Backend("device busy".into()));
            }
            Ok(())
        }
    }

    fn item(text: &str, priority: Priority, category: &str, ts: i64) -> SpeechItem {
        SpeechItem::new(text, priority, category, Timestamp::from_millis(ts)).with_interval(4000)
    }

    fn reporting(
        item: SpeechItem,
        tx: &mpsc::UnboundedSender<(String, SpeechOutcome)>,
    ) -> SpeechItem {
        let tx = tx.clone();
        let text = item.text.clone();
        item.on_complete(move |outcome| {
            let _ = tx.send((text, outcome));
        })
    }

    #[tokio::test]
    async fn test_same_category_within_interval_speaks_once() {
        let (backend, mut started) = GatedBackend::new();
        let queue = SpeechQueue::start(SpeechQueueConfig::default(), backend.clone()).unwrap();

        let first = queue.enqueue(item("Lift your hips", Priority::High, "plank.hip_sag", 0));
        assert_eq!(first.unwrap(), EnqueueOutcome::Queued);
        assert_eq!(started.recv().await.unwrap(), "Lift your hips");

        let second = queue.enqueue(item("Lift your hips", Priority::High, "plank.hip_sag", 1000));
        assert_eq!(second.unwrap(), EnqueueOutcome::DroppedCooldown);

        backend.release();
        let later = queue.enqueue(item("Lift your hips", Priority::High, "plank.hip_sag", 4000));
        assert_eq!(later.unwrap(), EnqueueOutcome::Queued);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_higher_priority_replaces_queued_item() {
        let (backend, mut started) = GatedBackend::new();
        let queue = SpeechQueue::start(SpeechQueueConfig::default(), backend.clone()).unwrap();
        let (done_tx, mut done) = mpsc::unbounded_channel();

        queue
            .enqueue(reporting(item("hold", Priority::Low, "plank.hold_good", 0), &done_tx))
            .unwrap();
        assert_eq!(started.recv().await.unwrap(), "hold");

        // Playing item is never interrupted; the queued one is replaced.
        let queued = queue.enqueue(reporting(
            item("step back", Priority::Medium, "plank.reframe", 100),
            &done_tx,
        ));
        assert_eq!(queued.unwrap(), EnqueueOutcome::Queued);
        let replaced = queue.enqueue(reporting(
            item("hips up", Priority::Critical, "plank.hip_sag", 200),
            &done_tx,
        ));
        assert_eq!(replaced.unwrap(), EnqueueOutcome::Replaced);
        assert_eq!(
            done.recv().await.unwrap(),
            ("step back".to_string(), SpeechOutcome::Cancelled)
        );

        backend.release();
        assert_eq!(
            done.recv().await.unwrap(),
            ("hold".to_string(), SpeechOutcome::Spoken)
        );
        assert_eq!(started.recv().await.unwrap(), "hips up");
        backend.release();
        assert_eq!(
            done.recv().await.unwrap(),
            ("hips up".to_string(), SpeechOutcome::Spoken)
        );
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_lower_priority_dropped_when_full() {
        let (backend, mut started) = GatedBackend::new();
        let queue = SpeechQueue::start(SpeechQueueConfig::default(), backend.clone()).unwrap();

        queue.enqueue(item("a", Priority::High, "a", 0)).unwrap();
        started.recv().await.unwrap();
        queue.enqueue(item("b", Priority::High, "b", 0)).unwrap();

        let outcome = queue.enqueue(item("c", Priority::Low, "c", 0)).unwrap();
        assert_eq!(outcome, EnqueueOutcome::DroppedLowPriority);
        assert_eq!(queue.pending(), 1);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_retries_then_fails() {
        let backend = Arc::new(FlakyBackend {
            failures: AtomicU32::new(10),
            calls: AtomicU32::new(0),
        });
        let queue = SpeechQueue::start(SpeechQueueConfig::default(), backend.clone()).unwrap();
        let (done_tx, mut done) = mpsc::unbounded_channel();

        queue
            .enqueue(reporting(item("x", Priority::High, "x", 0), &done_tx))
            .unwrap();
        assert_eq!(done.recv().await.unwrap().1, SpeechOutcome::Failed);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let backend = Arc::new(FlakyBackend {
            failures: AtomicU32::new(1),
            calls: AtomicU32::new(0),
        });
        let queue = SpeechQueue::start(SpeechQueueConfig::default(), backend.clone()).unwrap();
        let (done_tx, mut done) = mpsc::unbounded_channel();

        queue
            .enqueue(reporting(item("x", Priority::High, "x", 0), &done_tx))
            .unwrap();
        assert_eq!(done.recv().await.unwrap().1, SpeechOutcome::Spoken);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_flush_cancels_pending() {
        let (backend, mut started) = GatedBackend::new();
        let queue = SpeechQueue::start(SpeechQueueConfig::default(), backend.clone()).unwrap();
        let (done_tx, mut done) = mpsc::unbounded_channel();

        queue.enqueue(item("a", Priority::High, "a", 0)).unwrap();
        started.recv().await.unwrap();
        queue
            .enqueue(reporting(item("b", Priority::High, "b", 0), &done_tx))
            .unwrap();

        queue.flush().await;
        assert_eq!(done.recv().await.unwrap(), ("b".to_string(), SpeechOutcome::Cancelled));
        assert_eq!(queue.pending(), 0);

        backend.release();
        queue.shutdown().await;
        assert!(matches!(
            queue.enqueue(item("c", Priority::High, "c", 0)),
            Err(SpeechError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_recording_backend_receives_text() {
        let backend = Arc::new(RecordingSpeechBackend::new());
        let queue = SpeechQueue::start(SpeechQueueConfig::default(), backend.clone()).unwrap();
        let (done_tx, mut done) = mpsc::unbounded_channel();
        queue
            .enqueue(reporting(item("Good. Hold that.", Priority::Low, "h", 0), &done_tx))
            .unwrap();
        done.recv().await.unwrap();
        assert_eq!(backend.spoken(), vec!["Good. Hold that.".to_string()]);
        queue.shutdown().await;
    }

    #[test]
    fn test_start_requires_runtime() {
        let result = SpeechQueue::start(
            SpeechQueueConfig::default(),
            Arc::new(RecordingSpeechBackend::new()),
        );
        assert!(matches!(result, Err(SpeechError::Runtime(_))));
    }
}
