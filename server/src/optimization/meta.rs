//! The `Genetic` and `MonteCarlo` meta-heuristics (§4.10): both wrap the
//! shared greedy allocator and explore the space of task orderings, scored
//! by [`crate::optimization::scoring::score`]. Both accept a wall-clock
//! budget and abort at the next trial/generation boundary (§5).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{Duration as StdDuration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use shared::allocation::Grid;
use shared::dto::AllocationFailure;
use shared::task::{Task, TaskId};
use shared::time::AllocationParams;

use super::greedy::run_ordered;
use super::scoring::{score, ScheduleScore};

pub const DEFAULT_MONTE_CARLO_TRIALS: usize = 200;
pub const DEFAULT_GENETIC_POPULATION: usize = 30;
pub const DEFAULT_GENETIC_GENERATIONS: usize = 40;

type Evaluated = (Vec<TaskId>, ScheduleScore, Vec<Task>, Vec<AllocationFailure>);

fn evaluate(
    order: &[TaskId],
    by_id: &HashMap<TaskId, Task>,
    base_grid: &Grid,
    params: &AllocationParams,
) -> (ScheduleScore, Vec<Task>, Vec<AllocationFailure>) {
    let ordered_tasks: Vec<Task> = order.iter().map(|id| by_id[id].clone()).collect();
    let mut grid = base_grid.clone();
    let (successes, failures) = run_ordered(ordered_tasks.iter(), &mut grid, params);
    let schedule_score = score(&successes, &failures, &grid, params.max_hours_per_day);
    (schedule_score, successes, failures)
}

pub fn run_monte_carlo(
    tasks: &[Task],
    base_grid: &Grid,
    params: &AllocationParams,
    trials: usize,
    budget: Option<StdDuration>,
) -> (Vec<Task>, Vec<AllocationFailure>) {
    let by_id: HashMap<TaskId, Task> = tasks.iter().map(|t| (t.id(), t.clone())).collect();
    let ids: Vec<TaskId> = tasks.iter().map(|t| t.id()).collect();
    let start = Instant::now();
    let mut rng = rand::rng();

    let mut best: Option<(ScheduleScore, Vec<Task>, Vec<AllocationFailure>)> = None;
    for _ in 0..trials.max(1) {
        if let Some(budget) = budget {
            if start.elapsed() >= budget {
                break;
            }
        }
        let mut order = ids.clone();
        order.shuffle(&mut rng);
        let candidate = evaluate(&order, &by_id, base_grid, params);
        if best
            .as_ref()
            .is_none_or(|(best_score, _, _)| candidate.0.cmp_better(best_score) == Ordering::Less)
        {
            best = Some(candidate);
        }
    }

    match best {
        Some((_, successes, failures)) => (successes, failures),
        None => {
            let mut grid = base_grid.clone();
            run_ordered(tasks.iter(), &mut grid, params)
        }
    }
}

fn order_crossover(parent_a: &[TaskId], parent_b: &[TaskId], rng: &mut impl Rng) -> Vec<TaskId> {
    let n = parent_a.len();
    if n == 0 {
        return Vec::new();
    }
    let mut i = rng.random_range(0..n);
    let mut j = rng.random_range(0..n);
    if i > j {
        std::mem::swap(&mut i, &mut j);
    }

    let mut child: Vec<Option<TaskId>> = vec![None; n];
    let mut used = std::collections::HashSet::new();
    for k in i..=j {
        child[k] = Some(parent_a[k]);
        used.insert(parent_a[k]);
    }

    let mut fill_pos = (j + 1) % n;
    for offset in 0..n {
        let candidate = parent_b[(j + 1 + offset) % n];
        if used.contains(&candidate) {
            continue;
        }
        while child[fill_pos].is_some() {
            fill_pos = (fill_pos + 1) % n;
        }
        child[fill_pos] = Some(candidate);
        used.insert(candidate);
    }

    child.into_iter().map(|slot| slot.unwrap()).collect()
}

fn tournament_select<'a>(population: &'a [Evaluated], rng: &mut impl Rng) -> &'a [TaskId] {
    let n = population.len();
    let mut best = rng.random_range(0..n);
    for _ in 0..2 {
        let challenger = rng.random_range(0..n);
        if population[challenger].1.cmp_better(&population[best].1) == Ordering::Less {
            best = challenger;
        }
    }
    &population[best].0
}

fn best_index(population: &[Evaluated]) -> usize {
    let mut best = 0;
    for i in 1..population.len() {
        if population[i].1.cmp_better(&population[best].1) == Ordering::Less {
            best = i;
        }
    }
    best
}

pub fn run_genetic(
    tasks: &[Task],
    base_grid: &Grid,
    params: &AllocationParams,
    population_size: usize,
    generations: usize,
    budget: Option<StdDuration>,
) -> (Vec<Task>, Vec<AllocationFailure>) {
    let by_id: HashMap<TaskId, Task> = tasks.iter().map(|t| (t.id(), t.clone())).collect();
    let ids: Vec<TaskId> = tasks.iter().map(|t| t.id()).collect();
    if ids.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let start = Instant::now();
    let mut rng = rand::rng();

    let population_size = population_size.max(2);
    let mut population: Vec<Evaluated> = (0..population_size)
        .map(|_| {
            let mut order = ids.clone();
            order.shuffle(&mut rng);
            let (s, successes, failures) = evaluate(&order, &by_id, base_grid, params);
            (order, s, successes, failures)
        })
        .collect();

    for _ in 0..generations {
        if let Some(budget) = budget {
            if start.elapsed() >= budget {
                break;
            }
        }
        let mut next_gen = Vec::with_capacity(population.len());
        while next_gen.len() < population.len() {
            let parent_a = tournament_select(&population, &mut rng).to_vec();
            let parent_b = tournament_select(&population, &mut rng).to_vec();
            let mut child = order_crossover(&parent_a, &parent_b, &mut rng);
            if child.len() >= 2 && rng.random_bool(0.1) {
                let i = rng.random_range(0..child.len());
                let j = rng.random_range(0..child.len());
                child.swap(i, j);
            }
            let (s, successes, failures) = evaluate(&child, &by_id, base_grid, params);
            next_gen.push((child, s, successes, failures));
        }
        population = next_gen;
    }

    let winner = population.swap_remove(best_index(&population));
    (winner.2, winner.3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use shared::task::TaskDraft;
    use shared::time::NoHolidays;

    fn dt(y: i32, m: u32, d: u32, h: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn params(holidays: &dyn shared::time::HolidayChecker) -> AllocationParams {
        AllocationParams {
            start_date: dt(2025, 10, 20, 9),
            current_time: None,
            max_hours_per_day: 6.0,
            holiday_checker: holidays,
            include_all_days: false,
            default_start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            default_end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        }
    }

    fn sample_tasks() -> Vec<Task> {
        (1..=4)
            .map(|id| {
                let mut draft = TaskDraft::new(id, format!("t{id}"), dt(2025, 10, 20, 9));
                draft.estimated_duration = Some(4.0);
                draft.priority = Some(id as i32 * 10);
                draft.build().unwrap()
            })
            .collect()
    }

    #[test]
    fn monte_carlo_schedules_every_task() {
        let holidays = NoHolidays;
        let p = params(&holidays);
        let tasks = sample_tasks();
        let grid = Grid::new();
        let (successes, failures) = run_monte_carlo(&tasks, &grid, &p, 20, None);
        assert_eq!(successes.len(), 4);
        assert!(failures.is_empty());
    }

    #[test]
    fn genetic_schedules_every_task() {
        let holidays = NoHolidays;
        let p = params(&holidays);
        let tasks = sample_tasks();
        let grid = Grid::new();
        let (successes, failures) = run_genetic(&tasks, &grid, &p, 8, 5, None);
        assert_eq!(successes.len(), 4);
        assert!(failures.is_empty());
    }

    #[test]
    fn monte_carlo_respects_wall_clock_budget() {
        let holidays = NoHolidays;
        let p = params(&holidays);
        let tasks = sample_tasks();
        let grid = Grid::new();
        let (successes, _) =
            run_monte_carlo(&tasks, &grid, &p, 1_000_000, Some(StdDuration::from_millis(5)));
        assert_eq!(successes.len(), 4);
    }
}
