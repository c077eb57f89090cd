//! Disapproval monitor: turns backlog pressure into a saturating score.
//!
//! A periodic sampler raises the score in proportion to how full the backlog
//! is and publishes the new value. Every issue the worker completes lowers the
//! score by that issue's complexity, silently. The score stays within
//! `[0, 100]`; reaching 100 ends a session.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::errors::{ArgPosition, SimError, SimResult};
use crate::domain::models::{round2, IssueSnapshot, MonitorConfig};
use crate::domain::ports::QueueGauge;
use crate::services::bounded_queue::QueueEvent;
use crate::services::event_bus::{self, Emitter, Subscriber, Subscription, DEFAULT_CHANNEL_CAPACITY};
use crate::services::lifecycle::StopSignal;

/// Upper bound of the disapproval score.
pub const MAX_DISAPPROVAL: f64 = 100.0;

/// Default sampling period.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(1000);

/// Default score added per sample while the backlog is full.
pub const DEFAULT_MAX_INCREASE: f64 = 8.0;

/// Events published by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MonitorEvent {
    /// Score after a sample.
    DisapprovalUpdated(f64),
}

impl MonitorEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DisapprovalUpdated(_) => "disapproval/update",
        }
    }

    /// Score carried by the event.
    pub fn disapproval(&self) -> f64 {
        match self {
            Self::DisapprovalUpdated(value) => *value,
        }
    }
}

struct MonitorInner {
    backlog: Arc<dyn QueueGauge>,
    completions: Subscriber<QueueEvent>,
    sample_interval: Duration,
    max_increase: f64,
    disapproval: Mutex<f64>,
    emitter: Emitter<MonitorEvent>,
    stop: StopSignal,
    started: AtomicBool,
    samples: AtomicU64,
}

/// Turns backlog pressure into a disapproval score, relieved by completions.
#[derive(Clone)]
pub struct DisapprovalMonitor {
    inner: Arc<MonitorInner>,
}

impl DisapprovalMonitor {
    /// Watch `backlog` and credit completions published on `completions`.
    pub fn new(backlog: Arc<dyn QueueGauge>, completions: Subscriber<QueueEvent>) -> SimResult<Self> {
        Self::with_options(backlog, completions, DEFAULT_SAMPLE_INTERVAL, DEFAULT_MAX_INCREASE)
    }

    /// Create a monitor from configuration.
    pub fn from_config(
        backlog: Arc<dyn QueueGauge>,
        completions: Subscriber<QueueEvent>,
        config: &MonitorConfig,
    ) -> SimResult<Self> {
        Self::with_options(
            backlog,
            completions,
            Duration::from_millis(config.sample_interval_ms),
            config.max_increase,
        )
    }

    /// Create a monitor with an explicit sample period and maximum increase per sample.
    pub fn with_options(
        backlog: Arc<dyn QueueGauge>,
        completions: Subscriber<QueueEvent>,
        sample_interval: Duration,
        max_increase: f64,
    ) -> SimResult<Self> {
        if backlog.capacity() == 0 {
            return Err(SimError::validation(
                ArgPosition::First,
                "backlog",
                "a queue with positive capacity",
                backlog.capacity(),
            ));
        }
        if sample_interval.is_zero() {
            return Err(SimError::validation(
                ArgPosition::Third,
                "sampleInterval",
                "a positive duration",
                sample_interval,
            ));
        }
        if !max_increase.is_finite() || max_increase < 0.0 {
            return Err(SimError::validation(
                ArgPosition::Fourth,
                "maxIncrease",
                "a non-negative number",
                max_increase,
            ));
        }

        let (emitter, _) = event_bus::channel(DEFAULT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(MonitorInner {
                backlog,
                completions,
                sample_interval,
                max_increase,
                disapproval: Mutex::new(0.0),
                emitter,
                stop: StopSignal::new(),
                started: AtomicBool::new(false),
                samples: AtomicU64::new(0),
            }),
        })
    }

    /// Current score.
    pub fn disapproval(&self) -> f64 {
        self.inner.read()
    }

    /// Whether the score reached its maximum.
    pub fn is_saturated(&self) -> bool {
        self.inner.read() >= MAX_DISAPPROVAL
    }

    /// Number of samples taken so far.
    pub fn samples_taken(&self) -> u64 {
        self.inner.samples.load(Ordering::Relaxed)
    }

    /// `disapproval/update` events.
    pub fn events(&self) -> Subscriber<MonitorEvent> {
        self.inner.emitter.subscriber()
    }

    /// Stop both triggers for good.
    pub fn stop(&self) {
        if self.inner.stop.stop() {
            info!(disapproval = self.inner.read(), "disapproval monitor stopped");
        }
    }

    /// Whether the monitor was stopped.
    pub fn is_stopped(&self) -> bool {
        self.inner.stop.is_stopped()
    }

    /// Spawn the sampler and the completion listener.
    ///
    /// The listener is attached before this returns; the first sample is
    /// taken right away. Only the first call spawns; later calls return
    /// `None`.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            warn!("disapproval monitor already started");
            return None;
        }
        let inner = Arc::clone(&self.inner);
        let completions = inner.completions.subscribe();
        Some(tokio::spawn(async move {
            info!(
                sample_interval_ms = inner.sample_interval.as_millis() as u64,
                "disapproval monitor started"
            );
            tokio::join!(inner.sample_loop(), inner.listen(completions));
        }))
    }

    /// Take one sample now and publish the result.
    ///
    /// Returns `None` once stopped.
    pub fn sample(&self) -> Option<f64> {
        self.inner.sample()
    }
}

impl MonitorInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, f64> {
        self.disapproval.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> f64 {
        *self.lock()
    }

    fn sample(&self) -> Option<f64> {
        if self.stop.is_stopped() {
            return None;
        }

        let size = self.backlog.size();
        let capacity = self.backlog.capacity();
        let increase = round2(self.max_increase * size as f64 / capacity as f64);

        let value = {
            let mut disapproval = self.lock();
            *disapproval = (*disapproval + increase).min(MAX_DISAPPROVAL);
            *disapproval
        };
        self.samples.fetch_add(1, Ordering::Relaxed);
        debug!(size, capacity, increase, disapproval = value, "backlog sampled");

        self.emitter.emit(MonitorEvent::DisapprovalUpdated(value));
        Some(value)
    }

    fn record_completion(&self, issue: &IssueSnapshot) {
        if self.stop.is_stopped() {
            return;
        }

        let mut disapproval = self.lock();
        *disapproval = round2((*disapproval - f64::from(issue.complexity)).max(0.0));
        debug!(issue = %issue.id, disapproval = *disapproval, "completion credited");
    }

    async fn sample_loop(&self) {
        loop {
            if self.stop.is_stopped() {
                break;
            }
            self.sample();
            if !self.stop.sleep(self.sample_interval).await {
                break;
            }
        }
    }

    async fn listen(&self, mut completions: Subscription<QueueEvent>) {
        loop {
            tokio::select! {
                () = self.stop.stopped() => break,
                envelope = completions.recv() => match envelope {
                    Some(envelope) => {
                        if let QueueEvent::Popped(issue) = envelope.payload {
                            self.record_completion(&issue);
                        }
                    }
                    None => break,
                },
            }
        }
    }
}

impl std::fmt::Debug for DisapprovalMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisapprovalMonitor")
            .field("disapproval", &self.inner.read())
            .field("sample_interval", &self.inner.sample_interval)
            .field("stopped", &self.inner.stop.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Issue, IssueStatus};
    use crate::services::bounded_queue::BoundedQueue;
    use crate::services::worker::Worker;

    fn backlog_with(capacity: usize, size: usize) -> BoundedQueue {
        let backlog = BoundedQueue::backlog(capacity).unwrap();
        for _ in 0..size {
            backlog.push(Issue::new("Test project", 1, 1).unwrap()).unwrap();
        }
        backlog
    }

    fn monitor_for(backlog: &BoundedQueue, worker: &Worker) -> DisapprovalMonitor {
        DisapprovalMonitor::new(Arc::new(backlog.clone()), worker.events()).unwrap()
    }

    fn dev_issue(complexity: u8) -> Issue {
        let mut issue = Issue::new("Test project", 1, complexity).unwrap();
        issue.set_status(IssueStatus::Dev);
        issue
    }

    #[test]
    fn test_rejects_invalid_options() {
        let backlog = backlog_with(5, 0);
        let worker = Worker::new(5, 5.0).unwrap();
        let gauge: Arc<dyn QueueGauge> = Arc::new(backlog);

        let err = DisapprovalMonitor::with_options(
            Arc::clone(&gauge),
            worker.events(),
            Duration::ZERO,
            8.0,
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("3rd argument"));

        let err = DisapprovalMonitor::with_options(gauge, worker.events(), DEFAULT_SAMPLE_INTERVAL, -1.0)
            .unwrap_err();
        assert!(err.to_string().starts_with("4th argument"));
    }

    #[test]
    fn test_starts_at_zero() {
        let backlog = backlog_with(5, 0);
        let worker = Worker::new(5, 5.0).unwrap();
        let monitor = monitor_for(&backlog, &worker);
        assert!(monitor.disapproval().abs() < f64::EPSILON);
        assert!(!monitor.is_saturated());
    }

    #[test]
    fn test_sample_scales_with_backlog_pressure() {
        let backlog = backlog_with(5, 3);
        let worker = Worker::new(5, 5.0).unwrap();
        let monitor = monitor_for(&backlog, &worker);

        assert_eq!(monitor.sample(), Some(4.8));
        assert_eq!(monitor.sample(), Some(9.6));
        assert_eq!(monitor.samples_taken(), 2);
    }

    #[test]
    fn test_sample_saturates_at_maximum() {
        let backlog = backlog_with(2, 2);
        let worker = Worker::new(5, 5.0).unwrap();
        let monitor = monitor_for(&backlog, &worker);

        for _ in 0..20 {
            monitor.sample();
        }
        assert!((monitor.disapproval() - MAX_DISAPPROVAL).abs() < f64::EPSILON);
        assert!(monitor.is_saturated());
    }

    #[tokio::test]
    async fn test_sample_publishes_update() {
        let backlog = backlog_with(5, 5);
        let worker = Worker::new(5, 5.0).unwrap();
        let monitor = monitor_for(&backlog, &worker);
        let mut events = monitor.events().subscribe();

        monitor.sample();
        let envelope = events.recv().await.unwrap();
        assert_eq!(envelope.payload.name(), "disapproval/update");
        assert!((envelope.payload.disapproval() - 8.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_sample_is_immediate() {
        let backlog = backlog_with(5, 3);
        let worker = Worker::new(5, 5.0).unwrap();
        let monitor = monitor_for(&backlog, &worker);
        let handle = monitor.start().unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!((monitor.disapproval() - 4.8).abs() < f64::EPSILON);

        monitor.stop();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_keeps_one_sample_per_period() {
        let backlog = backlog_with(5, 5);
        let worker = Worker::new(5, 5.0).unwrap();
        let monitor = monitor_for(&backlog, &worker);
        let handle = monitor.start().unwrap();
        assert!(monitor.start().is_none());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(monitor.samples_taken(), 3);
        assert!((monitor.disapproval() - 24.0).abs() < f64::EPSILON);

        monitor.stop();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_lowers_score_without_update() {
        let backlog = backlog_with(5, 5);
        let worker = Worker::new(5, 5.0).unwrap();
        let monitor = monitor_for(&backlog, &worker);
        let mut updates = monitor.events().subscribe();
        let handle = monitor.start().unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!((monitor.disapproval() - 8.0).abs() < f64::EPSILON);
        assert!(updates.try_recv().is_some());

        worker.queue().push(dev_issue(3)).unwrap();
        let report = worker.run_term().unwrap();
        assert_eq!(report.completed.len(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!((monitor.disapproval() - 5.0).abs() < f64::EPSILON);
        assert!(updates.try_recv().is_none());

        monitor.stop();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_never_goes_below_zero() {
        let backlog = backlog_with(5, 0);
        let worker = Worker::new(5, 10.0).unwrap();
        let monitor = monitor_for(&backlog, &worker);
        let handle = monitor.start().unwrap();

        worker.queue().push(dev_issue(10)).unwrap();
        worker.run_term().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(monitor.disapproval().abs() < f64::EPSILON);

        monitor.stop();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_freezes_score() {
        let backlog = backlog_with(5, 3);
        let worker = Worker::new(5, 5.0).unwrap();
        let monitor = monitor_for(&backlog, &worker);
        let handle = monitor.start().unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        monitor.stop();
        monitor.stop();
        handle.await.unwrap();

        worker.queue().push(dev_issue(1)).unwrap();
        worker.run_term().unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!((monitor.disapproval() - 4.8).abs() < f64::EPSILON);
        assert_eq!(monitor.sample(), None);
        assert_eq!(monitor.samples_taken(), 1);
    }
}
