//! The nine optimization strategies (§4.6-§4.10), unified behind a single
//! tagged enum with a name-keyed factory (§9 "Dynamic dispatch").

mod balanced;
mod backward;
mod greedy;
mod meta;
mod round_robin;
mod scoring;

use std::time::Duration as StdDuration;

use shared::allocation::Grid;
use shared::dto::AllocationFailure;
use shared::task::Task;
use shared::time::AllocationParams;

pub use scoring::{score, ScheduleScore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Greedy,
    PriorityFirst,
    EarliestDeadline,
    DependencyAware,
    Balanced,
    Backward,
    RoundRobin,
    Genetic,
    MonteCarlo,
}

impl Strategy {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "greedy" => Strategy::Greedy,
            "priority_first" => Strategy::PriorityFirst,
            "earliest_deadline" => Strategy::EarliestDeadline,
            "dependency_aware" => Strategy::DependencyAware,
            "balanced" => Strategy::Balanced,
            "backward" => Strategy::Backward,
            "round_robin" => Strategy::RoundRobin,
            "genetic" => Strategy::Genetic,
            "monte_carlo" => Strategy::MonteCarlo,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Greedy => "greedy",
            Strategy::PriorityFirst => "priority_first",
            Strategy::EarliestDeadline => "earliest_deadline",
            Strategy::DependencyAware => "dependency_aware",
            Strategy::Balanced => "balanced",
            Strategy::Backward => "backward",
            Strategy::RoundRobin => "round_robin",
            Strategy::Genetic => "genetic",
            Strategy::MonteCarlo => "monte_carlo",
        }
    }

    /// `budget` is only honoured by the Genetic/MonteCarlo meta-heuristics
    /// (§5); the other strategies are bounded by `O(tasks x maxDays)` and
    /// run to completion.
    pub fn run(
        &self,
        tasks: &[Task],
        grid: &mut Grid,
        params: &AllocationParams,
        budget: Option<StdDuration>,
    ) -> (Vec<Task>, Vec<AllocationFailure>) {
        match self {
            Strategy::Greedy | Strategy::PriorityFirst => {
                let sorted = greedy::sort_greedy(tasks);
                greedy::run_ordered(sorted.iter(), grid, params)
            }
            Strategy::EarliestDeadline => {
                let sorted = greedy::sort_earliest_deadline(tasks);
                greedy::run_ordered(sorted.iter(), grid, params)
            }
            Strategy::DependencyAware => {
                let (sorted, mut cycle_failures) = greedy::sort_dependency_aware(tasks);
                let (successes, mut allocation_failures) =
                    greedy::run_ordered(sorted.iter(), grid, params);
                cycle_failures.append(&mut allocation_failures);
                (successes, cycle_failures)
            }
            Strategy::Balanced => balanced::allocate_balanced(tasks, grid, params),
            Strategy::Backward => backward::allocate_backward(tasks, grid, params),
            Strategy::RoundRobin => round_robin::allocate_round_robin(tasks, grid, params),
            Strategy::Genetic => meta::run_genetic(
                tasks,
                grid,
                params,
                meta::DEFAULT_GENETIC_POPULATION,
                meta::DEFAULT_GENETIC_GENERATIONS,
                budget,
            ),
            Strategy::MonteCarlo => meta::run_monte_carlo(
                tasks,
                grid,
                params,
                meta::DEFAULT_MONTE_CARLO_TRIALS,
                budget,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_round_trips_every_strategy_name() {
        let names = [
            "greedy",
            "priority_first",
            "earliest_deadline",
            "dependency_aware",
            "balanced",
            "backward",
            "round_robin",
            "genetic",
            "monte_carlo",
        ];
        for name in names {
            let strategy = Strategy::from_name(name).expect("known strategy name");
            assert_eq!(strategy.name(), name);
        }
    }

    #[test]
    fn unknown_strategy_name_is_rejected() {
        assert!(Strategy::from_name("quantum_anneal").is_none());
    }
}
