pub mod bounded_queue;
pub mod clock;
pub mod disapproval_monitor;
pub mod event_bus;
pub mod issue_generator;
pub mod lifecycle;
pub mod session;
pub mod work_term;
pub mod worker;

pub use bounded_queue::{BoundedQueue, PushRejected, QueueEvent};
pub use clock::{format_elapsed, Clock, ClockEvent};
pub use disapproval_monitor::{DisapprovalMonitor, MonitorEvent};
pub use event_bus::{Emitter, Envelope, SequenceNumber, Subscriber, Subscription};
pub use issue_generator::IssueGenerator;
pub use lifecycle::StopSignal;
pub use session::{Session, SessionSummary};
pub use work_term::{PenaltyWeights, TermPlan, TermPlanner};
pub use worker::{TermReport, Worker, WorkerId};
