//! Issue domain model.
//!
//! Issues are the units of work moving through the pipeline: generated into
//! the backlog, assigned to a worker, worked across terms and finally done.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::errors::{ArgPosition, SimError, SimResult};

/// Lowest (most urgent) priority value.
pub const MIN_PRIORITY: u8 = 1;
/// Highest (least urgent) priority value.
pub const MAX_PRIORITY: u8 = 3;
/// Smallest amount of work an issue can require.
pub const MIN_COMPLEXITY: u8 = 1;
/// Largest amount of work an issue can require.
pub const MAX_COMPLEXITY: u8 = 10;

/// Round to two decimal places.
///
/// Every work and disapproval figure in the simulation is kept at this
/// precision after each mutation.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Process-unique issue identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IssueId(pub u64);

impl std::fmt::Display for IssueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic id generator.
///
/// A process-wide instance backs [`Issue::new`]; tests can inject their own
/// through [`Issue::with_sequence`].
#[derive(Debug, Default)]
pub struct IdSequence {
    next: AtomicU64,
}

impl IdSequence {
    /// Start a sequence at zero.
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Hand out the next id. Ids are never reused.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of ids handed out so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

static ISSUE_IDS: IdSequence = IdSequence::new();

/// Status of an issue in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    /// Waiting in the backlog
    Todo,
    /// Assigned to a worker
    Dev,
    /// Fully worked
    Done,
}

impl Default for IssueStatus {
    fn default() -> Self {
        Self::Todo
    }
}

impl IssueStatus {
    /// Lowercase name, as used in events and config.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Dev => "dev",
            Self::Done => "done",
        }
    }

    /// Every status an issue may hold, in pipeline order.
    ///
    /// Returns a fresh vector on each call; callers may mutate it freely.
    pub fn allowed() -> Vec<IssueStatus> {
        vec![Self::Todo, Self::Dev, Self::Done]
    }

    /// Status every freshly created issue starts in.
    pub fn initial() -> Self {
        Self::Todo
    }

    fn allowed_list() -> String {
        Self::allowed()
            .iter()
            .map(|s| format!("\"{}\"", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for IssueStatus {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "dev" => Ok(Self::Dev),
            "done" => Ok(Self::Done),
            other => Err(SimError::State {
                requested: other.to_string(),
                allowed: Self::allowed_list(),
            }),
        }
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable copy of an issue, safe to hand across component boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueSnapshot {
    /// Identifier of the issue.
    pub id: IssueId,
    /// Project the issue belongs to.
    pub project_name: String,
    /// 1 is the most urgent, 3 the least.
    pub priority: u8,
    /// Work points needed to finish.
    pub complexity: u8,
    /// Status when the snapshot was taken.
    pub status: IssueStatus,
    /// Work points received so far.
    pub spent_work: f64,
}

impl IssueSnapshot {
    /// Work still required to finish the issue, never negative.
    pub fn remaining_work(&self) -> f64 {
        round2((f64::from(self.complexity) - self.spent_work).max(0.0))
    }
}

/// A unit of work.
///
/// Identity, project, priority and complexity are fixed at creation. Status and
/// spent work change only through [`Issue::set_status`] and
/// [`Issue::add_work`]. `Issue` is not `Clone`: whoever holds the
/// value owns it, and observers get [`IssueSnapshot`]s instead.
#[derive(Debug, PartialEq)]
pub struct Issue {
    id: IssueId,
    project_name: String,
    priority: u8,
    complexity: u8,
    status: IssueStatus,
    spent_work: f64,
}

impl Issue {
    /// Create an issue with an id from the process-wide sequence.
    pub fn new(project_name: impl Into<String>, priority: u8, complexity: u8) -> SimResult<Self> {
        Self::with_sequence(&ISSUE_IDS, project_name, priority, complexity)
    }

    /// Create an issue with an id drawn from `sequence`.
    pub fn with_sequence(
        sequence: &IdSequence,
        project_name: impl Into<String>,
        priority: u8,
        complexity: u8,
    ) -> SimResult<Self> {
        let project_name = project_name.into();
        if project_name.is_empty() {
            return Err(SimError::validation(
                ArgPosition::First,
                "projectName",
                "a non-empty string",
                project_name,
            ));
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(SimError::validation(
                ArgPosition::Second,
                "priority",
                format!("an integer between [{MIN_PRIORITY}, {MAX_PRIORITY}] (both included)"),
                priority,
            ));
        }
        if !(MIN_COMPLEXITY..=MAX_COMPLEXITY).contains(&complexity) {
            return Err(SimError::validation(
                ArgPosition::Third,
                "complexity",
                format!(
                    "an integer between [{MIN_COMPLEXITY}, {MAX_COMPLEXITY}] (both included)"
                ),
                complexity,
            ));
        }

        // Validate before drawing so rejected inputs never burn an id.
        Ok(Self {
            id: IssueId(sequence.next_id()),
            project_name,
            priority,
            complexity,
            status: IssueStatus::initial(),
            spent_work: 0.0,
        })
    }

    /// Identifier of the issue.
    pub fn id(&self) -> IssueId {
        self.id
    }

    /// Project the issue belongs to.
    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    /// Priority, 1 being the most urgent.
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Work points needed to finish.
    pub fn complexity(&self) -> u8 {
        self.complexity
    }

    /// Current status.
    pub fn status(&self) -> IssueStatus {
        self.status
    }

    /// Work points received so far.
    pub fn spent_work(&self) -> f64 {
        self.spent_work
    }

    /// Statuses an issue may be set to. Same as [`IssueStatus::allowed`].
    pub fn allowed_statuses() -> Vec<IssueStatus> {
        IssueStatus::allowed()
    }

    /// Move the issue to `status`.
    ///
    /// Only membership in the allowed set is enforced here; pipeline ordering
    /// is the queues' job.
    pub fn set_status(&mut self, status: IssueStatus) {
        self.status = status;
    }

    /// Move the issue to the status named `status`.
    pub fn set_status_named(&mut self, status: &str) -> SimResult<()> {
        self.status = status.parse()?;
        Ok(())
    }

    /// Record `work` more units of effort. `work` must be positive.
    pub fn add_work(&mut self, work: f64) -> SimResult<()> {
        if !work.is_finite() || work <= 0.0 {
            return Err(SimError::validation(
                ArgPosition::First,
                "work",
                "a positive number",
                work,
            ));
        }
        self.spent_work = round2(self.spent_work + work);
        Ok(())
    }

    /// Work still required to finish, rounded to two decimals.
    pub fn remaining_work(&self) -> f64 {
        round2((f64::from(self.complexity) - self.spent_work).max(0.0))
    }

    /// Completion percentage, rounded to two decimals.
    pub fn progress(&self) -> f64 {
        round2(self.spent_work / f64::from(self.complexity) * 100.0)
    }

    /// Detached copy of the current state.
    pub fn snapshot(&self) -> IssueSnapshot {
        IssueSnapshot {
            id: self.id,
            project_name: self.project_name.clone(),
            priority: self.priority,
            complexity: self.complexity,
            status: self.status,
            spent_work: self.spent_work,
        }
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{}; Project \"{}\"; Priority {}; Complexity {}; Spent work {}",
            self.id, self.project_name, self.priority, self.complexity, self.spent_work
        )
    }
}
