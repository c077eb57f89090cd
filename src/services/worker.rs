//! Worker: owns an active queue and works it down term by term.
//!
//! Each term the worker plans its budget with a [`TermPlanner`], applies the
//! plan to the live issues, reports its stress and pops every issue it
//! finished. While its queue is empty it sleeps until the next push instead of
//! polling.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::errors::{ArgPosition, SimError, SimResult};
use crate::domain::models::{IdSequence, Issue, IssueSnapshot, IssueStatus, WorkerConfig};
use crate::services::bounded_queue::{BoundedQueue, QueueEvent, MAX_QUEUE_CAPACITY};
use crate::services::event_bus::{Emitter, Subscriber};
use crate::services::lifecycle::StopSignal;
use crate::services::work_term::{PenaltyWeights, TermPlan, TermPlanner};

static WORKER_IDS: IdSequence = IdSequence::new();

/// Default length of a work term.
pub const DEFAULT_TERM_INTERVAL: Duration = Duration::from_millis(1000);

/// Process-unique worker identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub u64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happened during one term.
#[derive(Debug)]
pub struct TermReport {
    /// Budget, stress and allocations computed for the term.
    pub plan: TermPlan,
    /// State of every issue that received work, after the work was applied.
    pub worked: Vec<IssueSnapshot>,
    /// Issues finished this term, now owned by the caller.
    pub completed: Vec<Issue>,
}

struct WorkerInner {
    id: WorkerId,
    max_active_issues: usize,
    planner: TermPlanner,
    term_interval: Duration,
    queue: BoundedQueue,
    emitter: Emitter<QueueEvent>,
    stop: StopSignal,
    started: AtomicBool,
    terms: AtomicU64,
    completed: AtomicU64,
    last_stress: AtomicU64,
}

/// A worker with finite throughput per term.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl Worker {
    /// Create a worker with the default term length and penalty weights.
    pub fn new(max_active_issues: usize, work_points: f64) -> SimResult<Self> {
        Self::with_options(
            max_active_issues,
            work_points,
            DEFAULT_TERM_INTERVAL,
            PenaltyWeights::default(),
        )
    }

    /// Create a worker from configuration.
    pub fn from_config(config: &WorkerConfig) -> SimResult<Self> {
        Self::with_options(
            config.max_active_issues,
            config.work_points,
            Duration::from_millis(config.term_interval_ms),
            PenaltyWeights {
                issue: config.issue_penalty,
                project: config.project_penalty,
            },
        )
    }

    /// Create a worker with every knob explicit.
    pub fn with_options(
        max_active_issues: usize,
        work_points: f64,
        term_interval: Duration,
        weights: PenaltyWeights,
    ) -> SimResult<Self> {
        if max_active_issues == 0 || max_active_issues > MAX_QUEUE_CAPACITY {
            return Err(SimError::validation(
                ArgPosition::First,
                "maxActiveIssues",
                format!("a positive integer no greater than {MAX_QUEUE_CAPACITY}"),
                max_active_issues,
            ));
        }
        if !work_points.is_finite() || work_points <= 0.0 {
            return Err(SimError::validation(
                ArgPosition::Second,
                "workPoints",
                "a positive number",
                work_points,
            ));
        }
        if term_interval.is_zero() {
            return Err(SimError::validation(
                ArgPosition::Third,
                "termInterval",
                "a positive duration",
                term_interval,
            ));
        }

        let (queue, emitter) = BoundedQueue::active(max_active_issues)?;

        Ok(Self {
            inner: Arc::new(WorkerInner {
                id: WorkerId(WORKER_IDS.next_id()),
                max_active_issues,
                planner: TermPlanner::with_weights(max_active_issues, work_points, weights),
                term_interval,
                queue,
                emitter,
                stop: StopSignal::new(),
                started: AtomicBool::new(false),
                terms: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                last_stress: AtomicU64::new(0f64.to_bits()),
            }),
        })
    }

    /// Process-unique identifier.
    pub fn id(&self) -> WorkerId {
        self.inner.id
    }

    /// Capacity of the active queue.
    pub fn max_active_issues(&self) -> usize {
        self.inner.max_active_issues
    }

    /// Nominal work points per term.
    pub fn work_points(&self) -> f64 {
        self.inner.planner.work_points()
    }

    /// Length of a term.
    pub fn term_interval(&self) -> Duration {
        self.inner.term_interval
    }

    /// The active queue. Push `dev` issues here to assign them.
    pub fn queue(&self) -> &BoundedQueue {
        &self.inner.queue
    }

    /// Everything the worker reports: pushes, progress, stress, completions.
    pub fn events(&self) -> Subscriber<QueueEvent> {
        self.inner.queue.events()
    }

    /// Number of terms worked so far.
    pub fn terms_run(&self) -> u64 {
        self.inner.terms.load(Ordering::Relaxed)
    }

    /// Number of issues completed so far.
    pub fn completed_count(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    /// Stress reported by the most recent term, 0 before the first one.
    pub fn last_stress(&self) -> f64 {
        f64::from_bits(self.inner.last_stress.load(Ordering::Relaxed))
    }

    /// Stop working for good.
    pub fn stop(&self) {
        if self.inner.stop.stop() {
            info!(worker = %self.inner.id, "worker stopped");
        }
    }

    /// Whether the worker was stopped.
    pub fn is_stopped(&self) -> bool {
        self.inner.stop.is_stopped()
    }

    /// Spawn the term loop.
    ///
    /// Only the first call spawns; later calls return `None`.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            warn!(worker = %self.inner.id, "worker already started");
            return None;
        }
        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move { inner.run_loop().await }))
    }

    /// Work a single term right now.
    ///
    /// Returns `None` when stopped or when there is nothing to work on.
    pub fn run_term(&self) -> Option<TermReport> {
        self.inner.run_term()
    }
}

impl WorkerInner {
    async fn run_loop(self: Arc<Self>) {
        info!(worker = %self.id, max_active_issues = self.max_active_issues, "worker started");

        loop {
            if self.stop.is_stopped() {
                break;
            }

            // Register before looking at the queue so a push landing in
            // between still wakes us.
            let pushed = self.queue.events().once(QueueEvent::is_pushed);
            if self.queue.is_empty() {
                debug!(worker = %self.id, "queue empty, waiting for work");
                tokio::select! {
                    () = self.stop.stopped() => break,
                    event = pushed => {
                        if event.is_none() {
                            break;
                        }
                    }
                }
                // Let every other subscriber see the push before working it.
                tokio::task::yield_now().await;
                continue;
            }
            drop(pushed);

            self.run_term();

            if !self.stop.sleep(self.term_interval).await {
                break;
            }
        }

        debug!(worker = %self.id, "term loop exited");
    }

    fn run_term(&self) -> Option<TermReport> {
        if self.stop.is_stopped() {
            return None;
        }

        let issues = self.queue.snapshot_issues();
        if issues.is_empty() {
            return None;
        }

        let plan = self.planner.plan(&issues);
        self.last_stress
            .store(plan.stress.to_bits(), Ordering::Relaxed);
        self.emitter.emit(QueueEvent::Stress(plan.stress));

        let mut worked = Vec::with_capacity(plan.allocations.len());
        let mut completed = Vec::new();

        for allocation in &plan.allocations {
            let applied = self.queue.with_issue_mut(allocation.id, |issue| {
                if allocation.work > 0.0 {
                    issue.add_work(allocation.work)?;
                }
                if allocation.completes {
                    issue.set_status(IssueStatus::Done);
                }
                Ok::<_, SimError>(issue.snapshot())
            });

            let snapshot = match applied.and_then(|result| result) {
                Ok(snapshot) => snapshot,
                Err(error) => {
                    warn!(worker = %self.id, issue = %allocation.id, %error, "could not apply work");
                    continue;
                }
            };
            self.emitter.emit(QueueEvent::Worked(snapshot.clone()));
            worked.push(snapshot);

            if allocation.completes {
                match self.queue.pop_by_id(allocation.id) {
                    Ok(issue) => {
                        debug!(worker = %self.id, issue = %issue.id(), "issue completed");
                        completed.push(issue);
                    }
                    Err(error) => {
                        warn!(worker = %self.id, issue = %allocation.id, %error, "could not pop completed issue");
                    }
                }
            }
        }

        let term = self.terms.fetch_add(1, Ordering::Relaxed) + 1;
        self.completed
            .fetch_add(completed.len() as u64, Ordering::Relaxed);

        debug!(
            worker = %self.id,
            term,
            budget = plan.budget,
            stress = plan.stress,
            worked = worked.len(),
            completed = completed.len(),
            "term finished"
        );

        Some(TermReport {
            plan,
            worked,
            completed,
        })
    }
}

impl std::fmt::Display for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Worker #{}; maximum issues in the queue {}; maximum working points {}",
            self.inner.id,
            self.inner.max_active_issues,
            self.inner.planner.work_points()
        )
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.inner.id)
            .field("max_active_issues", &self.inner.max_active_issues)
            .field("work_points", &self.inner.planner.work_points())
            .field("stopped", &self.inner.stop.is_stopped())
            .finish()
    }
}
