//! Capacity-limited, status-gated issue queue.
//!
//! A queue owns the issues it holds. Pushing moves an issue in, popping moves
//! it back out to the caller; observers only ever see [`IssueSnapshot`]s.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::errors::{ArgPosition, SimError, SimResult};
use crate::domain::models::{Issue, IssueId, IssueSnapshot, IssueStatus};
use crate::domain::ports::QueueGauge;
use crate::services::event_bus::{self, Emitter, Subscriber, DEFAULT_CHANNEL_CAPACITY};

/// Smallest allowed queue capacity.
pub const MIN_QUEUE_CAPACITY: usize = 1;
/// Largest allowed queue capacity.
pub const MAX_QUEUE_CAPACITY: usize = 20;

/// Events published on a queue's channel.
///
/// `Pushed` and `Popped` come from the queue itself. `Worked` and `Stress` are
/// only ever published through a privileged emitter, by the worker owning the
/// queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum QueueEvent {
    /// An issue entered the queue.
    Pushed(IssueSnapshot),
    /// An issue left the queue.
    Popped(IssueSnapshot),
    /// An issue received work during a term.
    Worked(IssueSnapshot),
    /// Share of nominal throughput lost in a term, in percent.
    Stress(f64),
}

impl QueueEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pushed(_) => "issue/push",
            Self::Popped(_) => "issue/pop",
            Self::Worked(_) => "issue/work",
            Self::Stress(_) => "worker/stress",
        }
    }

    /// Whether this is a push event.
    pub fn is_pushed(&self) -> bool {
        matches!(self, Self::Pushed(_))
    }

    /// Whether this is a pop event.
    pub fn is_popped(&self) -> bool {
        matches!(self, Self::Popped(_))
    }
}

/// A push that was refused. The issue is handed back to the caller.
#[derive(Debug)]
pub struct PushRejected {
    /// The issue that was not stored.
    pub issue: Issue,
    /// Why the push was refused.
    pub error: SimError,
}

impl PushRejected {
    /// Take the issue back.
    pub fn into_issue(self) -> Issue {
        self.issue
    }
}

impl std::fmt::Display for PushRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "issue #{} rejected: {}", self.issue.id(), self.error)
    }
}

impl std::error::Error for PushRejected {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<PushRejected> for SimError {
    fn from(rejected: PushRejected) -> Self {
        rejected.error
    }
}

struct QueueInner {
    gate: IssueStatus,
    capacity: usize,
    issues: Mutex<Vec<Issue>>,
    emitter: Emitter<QueueEvent>,
}

/// Bounded store of issues sharing one gate status.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct BoundedQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for BoundedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("gate", &self.inner.gate)
            .field("capacity", &self.inner.capacity)
            .field("size", &self.size())
            .finish()
    }
}

impl BoundedQueue {
    /// Create an empty queue accepting only issues in `gate` status.
    pub fn new(gate: IssueStatus, capacity: usize) -> SimResult<Self> {
        Self::build(gate, capacity).map(|(queue, _)| queue)
    }

    /// Create a queue and hand the caller the right to publish custom events
    /// on its channel.
    pub fn privileged(
        gate: IssueStatus,
        capacity: usize,
    ) -> SimResult<(Self, Emitter<QueueEvent>)> {
        Self::build(gate, capacity)
    }

    /// Backlog queue: holds issues in their initial status.
    pub fn backlog(capacity: usize) -> SimResult<Self> {
        Self::new(IssueStatus::initial(), capacity)
    }

    /// Active queue for a worker: holds `dev` issues, with emit rights.
    pub fn active(capacity: usize) -> SimResult<(Self, Emitter<QueueEvent>)> {
        Self::privileged(IssueStatus::Dev, capacity)
    }

    fn build(gate: IssueStatus, capacity: usize) -> SimResult<(Self, Emitter<QueueEvent>)> {
        if !(MIN_QUEUE_CAPACITY..=MAX_QUEUE_CAPACITY).contains(&capacity) {
            return Err(SimError::validation(
                ArgPosition::Second,
                "capacity",
                format!(
                    "an integer between [{MIN_QUEUE_CAPACITY}, {MAX_QUEUE_CAPACITY}] (both included)"
                ),
                capacity,
            ));
        }

        let (emitter, _) = event_bus::channel(DEFAULT_CHANNEL_CAPACITY);
        let queue = Self {
            inner: Arc::new(QueueInner {
                gate,
                capacity,
                issues: Mutex::new(Vec::with_capacity(capacity)),
                emitter: emitter.clone(),
            }),
        };
        Ok((queue, emitter))
    }

    fn issues(&self) -> MutexGuard<'_, Vec<Issue>> {
        // Every critical section leaves the vector consistent, so a poisoned
        // lock still guards valid data.
        self.inner.issues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move `issue` into the queue.
    ///
    /// Capacity is checked before anything else. On success a `Pushed` event
    /// with a snapshot of the issue is published.
    pub fn push(&self, issue: Issue) -> Result<(), PushRejected> {
        let mut issues = self.issues();

        if issues.len() >= self.inner.capacity {
            return Err(PushRejected {
                issue,
                error: SimError::Capacity {
                    capacity: self.inner.capacity,
                },
            });
        }

        if issue.status() != self.inner.gate {
            let error = SimError::validation(
                ArgPosition::First,
                "issue",
                format!("an issue with status \"{}\"", self.inner.gate),
                issue.status(),
            );
            return Err(PushRejected { issue, error });
        }

        if issues.iter().any(|held| held.id() == issue.id()) {
            let error = SimError::validation(
                ArgPosition::First,
                "issue",
                "an issue not already held by this queue",
                issue.id(),
            );
            return Err(PushRejected { issue, error });
        }

        let snapshot = issue.snapshot();
        issues.push(issue);
        self.inner.emitter.emit(QueueEvent::Pushed(snapshot));
        Ok(())
    }

    /// Remove the issue with `id` and hand it to the caller.
    ///
    /// The `Popped` event is buffered on the channel, so the caller holds the
    /// returned issue before any subscriber reacts. Its snapshot is taken at
    /// the pop: changes the caller makes afterwards, such as moving a backlog
    /// issue to `Dev`, do not show up in it.
    pub fn pop_by_id(&self, id: IssueId) -> SimResult<Issue> {
        let mut issues = self.issues();
        let index = issues
            .iter()
            .position(|issue| issue.id() == id)
            .ok_or(SimError::NotFound { id })?;

        let issue = issues.remove(index);
        self.inner.emitter.emit(QueueEvent::Popped(issue.snapshot()));
        Ok(issue)
    }

    /// Number of issues held.
    pub fn size(&self) -> usize {
        self.issues().len()
    }

    /// Maximum number of issues held.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Whether the queue holds no issues.
    pub fn is_empty(&self) -> bool {
        self.issues().is_empty()
    }

    /// Whether a push would be refused for capacity.
    pub fn is_full(&self) -> bool {
        self.size() >= self.inner.capacity
    }

    /// Status every pushed issue must have.
    pub fn gate_status(&self) -> IssueStatus {
        self.inner.gate
    }

    /// Whether an issue with `id` is held.
    pub fn contains(&self, id: IssueId) -> bool {
        self.issues().iter().any(|issue| issue.id() == id)
    }

    /// Snapshots of every held issue, in insertion order.
    pub fn snapshot_issues(&self) -> Vec<IssueSnapshot> {
        self.issues().iter().map(Issue::snapshot).collect()
    }

    /// Subscribing half of the queue's event channel.
    pub fn events(&self) -> Subscriber<QueueEvent> {
        self.inner.emitter.subscriber()
    }

    /// Mutate a held issue in place. Reserved for the queue's owner.
    pub(crate) fn with_issue_mut<R>(
        &self,
        id: IssueId,
        f: impl FnOnce(&mut Issue) -> R,
    ) -> SimResult<R> {
        let mut issues = self.issues();
        let issue = issues
            .iter_mut()
            .find(|issue| issue.id() == id)
            .ok_or(SimError::NotFound { id })?;
        Ok(f(issue))
    }
}

impl QueueGauge for BoundedQueue {
    fn size(&self) -> usize {
        BoundedQueue::size(self)
    }

    fn capacity(&self) -> usize {
        BoundedQueue::capacity(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn todo_issue() -> Issue {
        Issue::new("Test project", 1, 1).unwrap()
    }

    fn dev_issue() -> Issue {
        let mut issue = todo_issue();
        issue.set_status(IssueStatus::Dev);
        issue
    }

    #[test]
    fn test_rejects_invalid_capacity() {
        for capacity in [0, 21, 100] {
            let err = BoundedQueue::backlog(capacity).unwrap_err();
            assert!(err.to_string().starts_with("2nd argument \"capacity\""));
        }
        assert!(BoundedQueue::backlog(1).is_ok());
        assert!(BoundedQueue::backlog(20).is_ok());
    }

    #[test]
    fn test_push_and_pop() {
        let queue = BoundedQueue::backlog(3).unwrap();
        let issue = todo_issue();
        let id = issue.id();

        queue.push(issue).unwrap();
        assert_eq!(queue.size(), 1);
        assert!(queue.contains(id));

        let popped = queue.pop_by_id(id).unwrap();
        assert_eq!(popped.id(), id);
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn test_push_beyond_capacity_fails() {
        let queue = BoundedQueue::backlog(2).unwrap();
        queue.push(todo_issue()).unwrap();
        queue.push(todo_issue()).unwrap();

        let overflow = todo_issue();
        let id = overflow.id();
        let rejected = queue.push(overflow).unwrap_err();
        assert!(matches!(rejected.error, SimError::Capacity { capacity: 2 }));
        assert_eq!(rejected.issue.id(), id);
        assert_eq!(queue.size(), 2);
    }

    #[test]
    fn test_capacity_checked_before_gate() {
        let queue = BoundedQueue::backlog(1).unwrap();
        queue.push(todo_issue()).unwrap();
        let rejected = queue.push(dev_issue()).unwrap_err();
        assert!(matches!(rejected.error, SimError::Capacity { .. }));
    }

    #[test]
    fn test_push_wrong_status_fails() {
        let queue = BoundedQueue::backlog(5).unwrap();
        let rejected = queue.push(dev_issue()).unwrap_err();
        assert!(matches!(rejected.error, SimError::Validation { .. }));
        assert!(rejected.error.to_string().contains("status \"todo\""));
        assert_eq!(queue.size(), 0);

        let (active, _) = BoundedQueue::active(5).unwrap();
        assert!(active.push(todo_issue()).is_err());
        let mut done = todo_issue();
        done.set_status(IssueStatus::Done);
        assert!(active.push(done).is_err());
        assert!(active.push(dev_issue()).is_ok());
    }

    #[test]
    fn test_pop_unknown_id_fails() {
        let queue = BoundedQueue::backlog(2).unwrap();
        queue.push(todo_issue()).unwrap();
        let err = queue.pop_by_id(IssueId(u64::MAX)).unwrap_err();
        assert_eq!(err, SimError::NotFound { id: IssueId(u64::MAX) });
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_pop_twice_fails() {
        let queue = BoundedQueue::backlog(2).unwrap();
        let issue = todo_issue();
        let id = issue.id();
        queue.push(issue).unwrap();
        queue.pop_by_id(id).unwrap();
        assert!(matches!(queue.pop_by_id(id), Err(SimError::NotFound { .. })));
    }

    #[test]
    fn test_rejected_error_converts() {
        let queue = BoundedQueue::backlog(1).unwrap();
        let result: SimResult<()> = queue.push(dev_issue()).map_err(SimError::from);
        assert_eq!(result.unwrap_err().kind(), "validation");
    }

    #[test]
    fn test_snapshot_order_is_insertion_order() {
        let queue = BoundedQueue::backlog(5).unwrap();
        let ids: Vec<IssueId> = (0..3)
            .map(|_| {
                let issue = todo_issue();
                let id = issue.id();
                queue.push(issue).unwrap();
                id
            })
            .collect();
        queue.pop_by_id(ids[1]).unwrap();

        let snapshot: Vec<IssueId> = queue.snapshot_issues().iter().map(|s| s.id).collect();
        assert_eq!(snapshot, vec![ids[0], ids[2]]);
    }

    #[test]
    fn test_snapshots_do_not_alias_queue_state() {
        let (queue, _) = BoundedQueue::active(2).unwrap();
        let issue = dev_issue();
        let id = issue.id();
        queue.push(issue).unwrap();

        let mut snapshot = queue.snapshot_issues();
        snapshot[0].spent_work = 99.0;
        assert!(queue.snapshot_issues()[0].spent_work.abs() < f64::EPSILON);

        queue.with_issue_mut(id, |issue| issue.add_work(0.5)).unwrap().unwrap();
        assert!((queue.snapshot_issues()[0].spent_work - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_push_publishes_snapshot() {
        let queue = BoundedQueue::backlog(2).unwrap();
        let mut events = queue.events().subscribe();

        let issue = todo_issue();
        let id = issue.id();
        queue.push(issue).unwrap();

        let envelope = events.recv().await.unwrap();
        match envelope.payload {
            QueueEvent::Pushed(snapshot) => {
                assert_eq!(snapshot.id, id);
                assert_eq!(snapshot.status, IssueStatus::Todo);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pop_event_follows_return() {
        let queue = BoundedQueue::backlog(2).unwrap();
        let issue = todo_issue();
        let id = issue.id();
        queue.push(issue).unwrap();

        let popped_event = queue.events().once(QueueEvent::is_popped);
        let popped = queue.pop_by_id(id).unwrap();
        assert_eq!(popped.id(), id);

        let envelope = popped_event.await.unwrap();
        assert_eq!(envelope.payload.name(), "issue/pop");
    }

    #[tokio::test]
    async fn test_pop_event_keeps_state_at_pop() {
        let queue = BoundedQueue::backlog(2).unwrap();
        let issue = todo_issue();
        let id = issue.id();
        queue.push(issue).unwrap();

        let popped_event = queue.events().once(QueueEvent::is_popped);
        let mut popped = queue.pop_by_id(id).unwrap();
        popped.set_status(IssueStatus::Dev);

        let envelope = popped_event.await.unwrap();
        match envelope.payload {
            QueueEvent::Popped(snapshot) => {
                assert_eq!(snapshot.id, id);
                assert_eq!(snapshot.status, IssueStatus::Todo);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_push_publishes_nothing() {
        let queue = BoundedQueue::backlog(1).unwrap();
        let mut events = queue.events().subscribe();
        assert!(queue.push(dev_issue()).is_err());
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_privileged_emitter_shares_channel() {
        let (queue, emitter) = BoundedQueue::active(2).unwrap();
        let mut events = queue.events().subscribe();
        emitter.emit(QueueEvent::Stress(12.5));
        assert_eq!(events.recv().await.unwrap().payload, QueueEvent::Stress(12.5));
    }

    #[test]
    fn test_gauge() {
        let queue = BoundedQueue::backlog(4).unwrap();
        queue.push(todo_issue()).unwrap();
        let gauge: &dyn QueueGauge = &queue;
        assert_eq!(gauge.size(), 1);
        assert_eq!(gauge.capacity(), 4);
        assert!((gauge.occupancy() - 0.25).abs() < f64::EPSILON);
    }
}
