//! Session: one headless run of the simulation.
//!
//! Wires a backlog, a worker, a generator feeding the backlog, a disapproval
//! monitor and a clock together from [`Config`]. Issues move from the backlog
//! to the worker through [`Session::assign`], either on request or through the
//! autopilot. The session ends when disapproval reaches its maximum.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::errors::{SimError, SimResult};
use crate::domain::models::{AutopilotConfig, Config, IssueId, IssueSnapshot, IssueStatus};
use crate::services::bounded_queue::BoundedQueue;
use crate::services::clock::{format_elapsed, Clock};
use crate::services::disapproval_monitor::{DisapprovalMonitor, MonitorEvent, MAX_DISAPPROVAL};
use crate::services::event_bus::Subscription;
use crate::services::issue_generator::IssueGenerator;
use crate::services::lifecycle::StopSignal;
use crate::services::worker::Worker;

/// Outcome of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    /// Time survived, in milliseconds.
    pub elapsed_ms: u64,
    /// Elapsed time as `mm:ss`.
    pub elapsed: String,
    /// Issues the generator pushed.
    pub issues_generated: u64,
    /// Issues the worker finished.
    pub issues_completed: u64,
    /// Issues left in the backlog.
    pub backlog_size: usize,
    /// Issues left with the worker.
    pub active_size: usize,
    /// Disapproval when the session ended.
    pub final_disapproval: f64,
}

struct SessionInner {
    backlog: BoundedQueue,
    worker: Worker,
    generator: IssueGenerator,
    monitor: DisapprovalMonitor,
    clock: Clock,
    autopilot: AutopilotConfig,
    started: AtomicBool,
    ended: StopSignal,
    ended_after: Mutex<Option<Duration>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// One game: every component wired together from a `Config`.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Build every component. Nothing runs until [`start`](Session::start).
    pub fn new(config: &Config) -> SimResult<Self> {
        let backlog = BoundedQueue::backlog(config.backlog.capacity)?;
        let worker = Worker::from_config(&config.worker)?;
        let generator = IssueGenerator::from_config(backlog.clone(), &config.generator)?;
        let monitor =
            DisapprovalMonitor::from_config(Arc::new(backlog.clone()), worker.events(), &config.monitor)?;
        let clock = Clock::from_config(&config.clock)?;

        Ok(Self {
            inner: Arc::new(SessionInner {
                backlog,
                worker,
                generator,
                monitor,
                clock,
                autopilot: config.autopilot.clone(),
                started: AtomicBool::new(false),
                ended: StopSignal::new(),
                ended_after: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Backlog queue.
    pub fn backlog(&self) -> &BoundedQueue {
        &self.inner.backlog
    }

    /// The worker.
    pub fn worker(&self) -> &Worker {
        &self.inner.worker
    }

    /// The issue generator.
    pub fn generator(&self) -> &IssueGenerator {
        &self.inner.generator
    }

    /// The disapproval monitor.
    pub fn monitor(&self) -> &DisapprovalMonitor {
        &self.inner.monitor
    }

    /// The session clock.
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    /// Whether disapproval saturated or the session was stopped.
    pub fn is_ended(&self) -> bool {
        self.inner.ended.is_stopped()
    }

    /// Start every component, plus the autopilot when enabled.
    ///
    /// Starting twice does nothing.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            warn!("session already started");
            return;
        }

        // Subscribe before the monitor takes its first sample.
        let updates = self.inner.monitor.events().subscribe();

        let mut tasks = vec![
            tokio::spawn(Arc::clone(&self.inner).watch_disapproval(updates)),
            self.inner.clock.start(),
        ];
        tasks.extend(
            [
                self.inner.worker.start(),
                self.inner.generator.start(),
                self.inner.monitor.start(),
            ]
            .into_iter()
            .flatten(),
        );
        if self.inner.autopilot.enabled {
            tasks.push(tokio::spawn(Arc::clone(&self.inner).autopilot_loop()));
        }
        self.inner.lock_tasks().extend(tasks);

        info!(
            worker = %self.inner.worker,
            generator = %self.inner.generator,
            backlog_capacity = self.inner.backlog.capacity(),
            autopilot = self.inner.autopilot.enabled,
            "session started"
        );
    }

    /// Move a backlog issue to the worker.
    ///
    /// Fails with [`SimError::Capacity`] when the worker has no room, leaving
    /// the backlog untouched, and with [`SimError::NotFound`] for an id the
    /// backlog does not hold.
    pub fn assign(&self, id: IssueId) -> SimResult<IssueSnapshot> {
        self.inner.assign(id)
    }

    /// End the session now. Ending twice does nothing.
    pub fn stop(&self) {
        self.inner.end();
    }

    /// Wait until the session ends and all its loops have exited.
    pub async fn wait_for_end(&self) -> SessionSummary {
        self.inner.ended.stopped().await;

        let tasks = std::mem::take(&mut *self.inner.lock_tasks());
        for task in tasks {
            if let Err(error) = task.await {
                warn!(%error, "session task failed");
            }
        }

        self.summary()
    }

    /// Summary of the session so far.
    pub fn summary(&self) -> SessionSummary {
        let inner = &self.inner;
        let recorded = *inner
            .ended_after
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let elapsed = recorded.unwrap_or_else(|| inner.clock.spent_time());

        SessionSummary {
            elapsed_ms: elapsed.as_millis() as u64,
            elapsed: format_elapsed(elapsed),
            issues_generated: inner.generator.generated_count(),
            issues_completed: inner.worker.completed_count(),
            backlog_size: inner.backlog.size(),
            active_size: inner.worker.queue().size(),
            final_disapproval: inner.monitor.disapproval(),
        }
    }
}

impl SessionInner {
    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn assign(&self, id: IssueId) -> SimResult<IssueSnapshot> {
        let active = self.worker.queue();
        if active.is_full() {
            return Err(SimError::Capacity {
                capacity: active.capacity(),
            });
        }

        let mut issue = self.backlog.pop_by_id(id)?;
        issue.set_status(IssueStatus::Dev);
        let snapshot = issue.snapshot();

        match active.push(issue) {
            Ok(()) => {
                debug!(issue = %id, "issue assigned");
                Ok(snapshot)
            }
            Err(rejected) => {
                let mut issue = rejected.issue;
                issue.set_status(IssueStatus::initial());
                if let Err(returned) = self.backlog.push(issue) {
                    warn!(issue = %id, error = %returned.error, "issue lost after failed assignment");
                }
                Err(rejected.error)
            }
        }
    }

    fn end(&self) {
        if !self.ended.stop() {
            return;
        }

        let elapsed = self.clock.spent_time();
        *self.ended_after.lock().unwrap_or_else(PoisonError::into_inner) = Some(elapsed);

        self.monitor.stop();
        self.clock.stop();
        self.worker.stop();
        self.generator.stop();

        info!(
            elapsed = %format_elapsed(elapsed),
            disapproval = self.monitor.disapproval(),
            completed = self.worker.completed_count(),
            "session ended"
        );
    }

    async fn watch_disapproval(self: Arc<Self>, mut updates: Subscription<MonitorEvent>) {
        loop {
            tokio::select! {
                () = self.ended.stopped() => break,
                envelope = updates.recv() => match envelope {
                    Some(envelope) => {
                        if envelope.payload.disapproval() >= MAX_DISAPPROVAL {
                            self.end();
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    }

    async fn autopilot_loop(self: Arc<Self>) {
        let period = Duration::from_millis(self.autopilot.poll_interval_ms);
        debug!(poll_interval_ms = self.autopilot.poll_interval_ms, "autopilot engaged");

        loop {
            if self.ended.is_stopped() {
                break;
            }
            self.autopilot_step();
            if !self.ended.sleep(period).await {
                break;
            }
        }
    }

    /// Assign the most urgent backlog issue if the worker can take it.
    fn autopilot_step(&self) -> Option<IssueId> {
        if self.worker.queue().is_full() || self.worker.last_stress() >= self.autopilot.max_stress {
            return None;
        }

        let candidate = self
            .backlog
            .snapshot_issues()
            .into_iter()
            .min_by_key(|issue| issue.priority)?;

        match self.assign(candidate.id) {
            Ok(_) => Some(candidate.id),
            Err(error) => {
                debug!(issue = %candidate.id, %error, "autopilot could not assign");
                None
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backlog", &self.inner.backlog)
            .field("worker", &self.inner.worker)
            .field("monitor", &self.inner.monitor)
            .field("ended", &self.inner.ended.is_stopped())
            .finish()
    }
}
