//! Work-term planning.
//!
//! Pure computation of how a worker spends one term: the penalty-adjusted
//! budget, the stress it reports and which issues receive how much work. The
//! [`Worker`](super::worker::Worker) applies the resulting plan to the live
//! issues in its queue.

use serde::{Deserialize, Serialize};

use crate::domain::models::{round2, IssueId, IssueSnapshot};

/// Weights of the two context-switch penalties.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltyWeights {
    /// Applied per queued issue when more than one issue is queued.
    pub issue: f64,
    /// Applied per project when issues span more than one project.
    /// Switching projects costs more than switching issues.
    pub project: f64,
}

impl Default for PenaltyWeights {
    fn default() -> Self {
        Self {
            issue: 0.5,
            project: 0.8,
        }
    }
}

/// Work assigned to one issue during a term.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Issue receiving the work.
    pub id: IssueId,
    /// Work points handed to it.
    pub work: f64,
    /// The allocation covers all remaining work.
    pub completes: bool,
}

/// Outcome of planning a term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermPlan {
    /// Budget after penalties.
    pub budget: f64,
    /// Percentage of nominal throughput lost to penalties.
    pub stress: f64,
    /// Issues in the order they are worked.
    pub order: Vec<IssueId>,
    /// Work handed out, in walk order.
    pub allocations: Vec<Allocation>,
    /// Budget left once every queued issue was completed.
    pub leftover: f64,
}

/// Plans work terms for one worker.
#[derive(Debug, Clone)]
pub struct TermPlanner {
    max_active_issues: usize,
    work_points: f64,
    weights: PenaltyWeights,
}

impl TermPlanner {
    /// Create a planner with the default penalty weights
    pub fn new(max_active_issues: usize, work_points: f64) -> Self {
        Self::with_weights(max_active_issues, work_points, PenaltyWeights::default())
    }

    /// Create a planner with custom penalty weights
    pub fn with_weights(max_active_issues: usize, work_points: f64, weights: PenaltyWeights) -> Self {
        Self {
            max_active_issues,
            work_points,
            weights,
        }
    }

    /// Nominal work points per term.
    pub fn work_points(&self) -> f64 {
        self.work_points
    }

    /// Penalty weights in use.
    pub fn weights(&self) -> PenaltyWeights {
        self.weights
    }

    /// Budget for a term over `issues`, after penalties.
    ///
    /// Each penalty applies only when its trigger count exceeds one; the two
    /// factors compound.
    pub fn budget(&self, issues: &[IssueSnapshot]) -> f64 {
        let mut budget = self.work_points;

        let total_issues = issues.len();
        if total_issues > 1 {
            budget *= self.penalty_factor(self.weights.issue, total_issues);
        }

        let total_projects = group_by_project(issues).len();
        if total_projects > 1 {
            budget *= self.penalty_factor(self.weights.project, total_projects);
        }

        budget
    }

    /// `1 - weight * count / max_active_issues`, never below zero.
    fn penalty_factor(&self, weight: f64, count: usize) -> f64 {
        let factor = 1.0 - weight * count as f64 / self.max_active_issues as f64;
        if factor < 0.0 {
            tracing::warn!(
                factor,
                count,
                max_active_issues = self.max_active_issues,
                "negative penalty factor clamped to zero"
            );
            return 0.0;
        }
        factor
    }

    /// Stress reported for a term with `budget`.
    pub fn stress(&self, budget: f64) -> f64 {
        round2(100.0 - round2(budget / self.work_points * 100.0))
    }

    /// Plan one term over the queued `issues`.
    pub fn plan(&self, issues: &[IssueSnapshot]) -> TermPlan {
        let budget = self.budget(issues);
        let stress = self.stress(budget);
        let ordered = work_order(issues);

        let mut remaining = budget;
        let mut allocations = Vec::new();
        for issue in &ordered {
            if remaining <= 0.0 {
                break;
            }

            let needed = issue.remaining_work();
            if needed > remaining {
                allocations.push(Allocation {
                    id: issue.id,
                    work: remaining,
                    completes: false,
                });
                remaining = 0.0;
            } else {
                allocations.push(Allocation {
                    id: issue.id,
                    work: needed,
                    completes: true,
                });
                remaining = round2((remaining - needed).max(0.0));
            }
        }

        TermPlan {
            budget,
            stress,
            order: ordered.iter().map(|issue| issue.id).collect(),
            allocations,
            leftover: remaining,
        }
    }
}

/// Group issues by project in first-seen order.
pub fn group_by_project(issues: &[IssueSnapshot]) -> Vec<(&str, Vec<&IssueSnapshot>)> {
    let mut groups: Vec<(&str, Vec<&IssueSnapshot>)> = Vec::new();
    for issue in issues {
        match groups
            .iter_mut()
            .find(|(project, _)| *project == issue.project_name)
        {
            Some((_, members)) => members.push(issue),
            None => groups.push((issue.project_name.as_str(), vec![issue])),
        }
    }
    groups
}

/// Order in which issues are worked: project groups in first-seen order,
/// each group by ascending priority value (1 first), ties kept in queue order.
pub fn work_order(issues: &[IssueSnapshot]) -> Vec<&IssueSnapshot> {
    group_by_project(issues)
        .into_iter()
        .flat_map(|(_, mut members)| {
            members.sort_by_key(|issue| issue.priority);
            members
        })
        .collect()
}
