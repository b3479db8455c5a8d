//! The schedule-quality score shared by the Genetic and MonteCarlo
//! meta-heuristics (§4.10). Favours, in lexicographic order: fewer
//! failures, fewer overloaded days, smaller deadline-slack variance, lower
//! total span.

use std::cmp::Ordering;

use shared::allocation::Grid;
use shared::dto::AllocationFailure;
use shared::task::Task;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleScore {
    pub failures: usize,
    pub overloaded_days: usize,
    pub deadline_slack_variance: f64,
    pub total_span_days: f64,
}

impl ScheduleScore {
    /// `Less` means `self` is the better schedule.
    pub fn cmp_better(&self, other: &Self) -> Ordering {
        self.failures
            .cmp(&other.failures)
            .then(self.overloaded_days.cmp(&other.overloaded_days))
            .then(self.deadline_slack_variance.total_cmp(&other.deadline_slack_variance))
            .then(self.total_span_days.total_cmp(&other.total_span_days))
    }
}

pub fn score(
    successes: &[Task],
    failures: &[AllocationFailure],
    grid: &Grid,
    max_hours_per_day: f64,
) -> ScheduleScore {
    let overloaded_days = grid
        .values()
        .filter(|&&hours| hours > max_hours_per_day + 1e-6)
        .count();

    let slacks: Vec<f64> = successes
        .iter()
        .filter_map(|task| {
            let deadline = task.deadline()?;
            let end = task.planned_end()?;
            Some((deadline - end).num_minutes() as f64 / 60.0)
        })
        .collect();
    let deadline_slack_variance = if slacks.len() > 1 {
        let mean = slacks.iter().sum::<f64>() / slacks.len() as f64;
        slacks.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / slacks.len() as f64
    } else {
        0.0
    };

    let starts: Vec<_> = successes.iter().filter_map(|t| t.planned_start()).collect();
    let ends: Vec<_> = successes.iter().filter_map(|t| t.planned_end()).collect();
    let total_span_days = match (starts.iter().min(), ends.iter().max()) {
        (Some(min_start), Some(max_end)) => {
            (*max_end - *min_start).num_minutes() as f64 / (60.0 * 24.0)
        }
        _ => 0.0,
    };

    ScheduleScore {
        failures: failures.len(),
        overloaded_days,
        deadline_slack_variance,
        total_span_days,
    }
}
