//! Periodic producer of random backlog issues.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::errors::{ArgPosition, SimError, SimResult};
use crate::domain::models::issue::{MAX_COMPLEXITY, MAX_PRIORITY, MIN_COMPLEXITY, MIN_PRIORITY};
use crate::domain::models::{GeneratorConfig, Issue, IssueId, IssueStatus};
use crate::services::bounded_queue::BoundedQueue;
use crate::services::lifecycle::StopSignal;

struct GeneratorInner {
    queue: BoundedQueue,
    project_names: Vec<String>,
    rate_bits: AtomicU64,
    rng: Mutex<StdRng>,
    stop: StopSignal,
    started: AtomicBool,
    generated: AtomicU64,
}

/// Fills a backlog queue with random issues at a rate relative to its
/// capacity.
///
/// The period between cycles is `1 / (capacity * rate)` seconds and is
/// recomputed every cycle, so [`set_rate`](IssueGenerator::set_rate) takes
/// effect without a restart.
#[derive(Clone)]
pub struct IssueGenerator {
    inner: Arc<GeneratorInner>,
}

impl IssueGenerator {
    /// Create a generator seeded from entropy.
    pub fn new(queue: BoundedQueue, project_names: Vec<String>, rate: f64) -> SimResult<Self> {
        Self::with_seed(queue, project_names, rate, None)
    }

    /// Create a generator from configuration.
    pub fn from_config(queue: BoundedQueue, config: &GeneratorConfig) -> SimResult<Self> {
        Self::with_seed(queue, config.project_names.clone(), config.rate, config.seed)
    }

    /// Create a generator whose draws are reproducible when `seed` is set.
    pub fn with_seed(
        queue: BoundedQueue,
        project_names: Vec<String>,
        rate: f64,
        seed: Option<u64>,
    ) -> SimResult<Self> {
        if queue.gate_status() != IssueStatus::initial() {
            return Err(SimError::validation(
                ArgPosition::First,
                "queue",
                format!("a queue accepting \"{}\" issues", IssueStatus::initial()),
                queue.gate_status(),
            ));
        }
        if project_names.is_empty() || project_names.iter().any(|name| name.trim().is_empty()) {
            return Err(SimError::validation(
                ArgPosition::Second,
                "projectNames",
                "a non-empty list of non-empty names",
                &project_names,
            ));
        }
        validate_rate(rate)?;

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            inner: Arc::new(GeneratorInner {
                queue,
                project_names,
                rate_bits: AtomicU64::new(rate.to_bits()),
                rng: Mutex::new(rng),
                stop: StopSignal::new(),
                started: AtomicBool::new(false),
                generated: AtomicU64::new(0),
            }),
        })
    }

    /// Backlog being filled.
    pub fn queue(&self) -> &BoundedQueue {
        &self.inner.queue
    }

    /// Names new issues are drawn from.
    pub fn project_names(&self) -> &[String] {
        &self.inner.project_names
    }

    /// Current generation rate.
    pub fn rate(&self) -> f64 {
        self.inner.rate()
    }

    /// Change the generation rate. Applies from the next cycle on.
    pub fn set_rate(&self, rate: f64) -> SimResult<()> {
        validate_rate(rate)?;
        self.inner.rate_bits.store(rate.to_bits(), Ordering::Relaxed);
        debug!(rate, "generation rate changed");
        Ok(())
    }

    /// Time until the next cycle at the current rate and capacity.
    pub fn period(&self) -> Duration {
        self.inner.period()
    }

    /// Number of issues successfully pushed so far.
    pub fn generated_count(&self) -> u64 {
        self.inner.generated.load(Ordering::Relaxed)
    }

    /// Stop generating for good.
    pub fn stop(&self) {
        if self.inner.stop.stop() {
            info!("issue generator stopped");
        }
    }

    /// Whether the generator was stopped.
    pub fn is_stopped(&self) -> bool {
        self.inner.stop.is_stopped()
    }

    /// Spawn the generation loop. The first cycle runs immediately.
    ///
    /// Only the first call spawns; later calls return `None`.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            warn!("issue generator already started");
            return None;
        }
        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move { inner.run_loop().await }))
    }

    /// Run one generation cycle now.
    ///
    /// Returns the id of the pushed issue, or `None` if the generator is
    /// stopped, the queue was full, or the push was refused.
    pub fn cycle(&self) -> Option<IssueId> {
        self.inner.cycle()
    }
}

fn validate_rate(rate: f64) -> SimResult<()> {
    if rate.is_finite() && rate > 0.0 && rate < 1.0 {
        Ok(())
    } else {
        Err(SimError::validation(
            ArgPosition::Third,
            "rate",
            "a number between (0, 1) (both excluded)",
            rate,
        ))
    }
}

impl GeneratorInner {
    fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }

    fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / (self.queue.capacity() as f64 * self.rate()))
    }

    async fn run_loop(self: Arc<Self>) {
        info!(rate = self.rate(), capacity = self.queue.capacity(), "issue generator started");

        loop {
            if self.stop.is_stopped() {
                break;
            }
            self.cycle();
            if !self.stop.sleep(self.period()).await {
                break;
            }
        }

        debug!(generated = self.generated.load(Ordering::Relaxed), "generation loop exited");
    }

    fn cycle(&self) -> Option<IssueId> {
        if self.stop.is_stopped() {
            return None;
        }
        if self.queue.is_full() {
            debug!("backlog full, skipping generation");
            return None;
        }

        let mut issue = match self.draw() {
            Ok(issue) => issue,
            Err(error) => {
                warn!(%error, "could not create issue");
                return None;
            }
        };
        if issue.status() != IssueStatus::initial() {
            issue.set_status(IssueStatus::initial());
        }

        let id = issue.id();
        match self.queue.push(issue) {
            Ok(()) => {
                self.generated.fetch_add(1, Ordering::Relaxed);
                debug!(issue = %id, "issue generated");
                Some(id)
            }
            Err(rejected) => {
                warn!(issue = %id, error = %rejected.error, "generated issue rejected");
                None
            }
        }
    }

    fn draw(&self) -> SimResult<Issue> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let project = self
            .project_names
            .choose(&mut *rng)
            .cloned()
            .unwrap_or_default();
        let priority = rng.gen_range(MIN_PRIORITY..=MAX_PRIORITY);
        let complexity = rng.gen_range(MIN_COMPLEXITY..=MAX_COMPLEXITY);
        Issue::new(project, priority, complexity)
    }
}

impl std::fmt::Display for IssueGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Projects {}; Generation rate {}",
            self.inner.project_names.join(", "),
            self.inner.rate()
        )
    }
}

impl std::fmt::Debug for IssueGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssueGenerator")
            .field("project_names", &self.inner.project_names)
            .field("rate", &self.inner.rate())
            .field("stopped", &self.inner.stop.is_stopped())
            .finish()
    }
}
