//! The `RoundRobin` strategy (§4.9): equal daily share among all tasks still
//! active, giving every task parallel progress instead of front-loading one
//! task at a time.

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};
use shared::allocation::{prepare_task_for_allocation, set_planned_times, Grid};
use shared::dto::AllocationFailure;
use shared::task::{Task, TaskDraft, TaskId};
use shared::time::{is_workday, AllocationParams};
use tracing::warn;

/// Kept from the source's `RoundRobinOptimizationStrategy` (§9 open
/// question: whether pathological inputs can reach it in practice is
/// unclear; the limit stays and a hit is logged).
const MAX_ITERATIONS: usize = 10_000;

pub fn allocate_round_robin(
    tasks: &[Task],
    grid: &mut Grid,
    params: &AllocationParams,
) -> (Vec<Task>, Vec<AllocationFailure>) {
    let mut remaining: HashMap<TaskId, f64> = HashMap::new();
    let mut drafts: HashMap<TaskId, TaskDraft> = HashMap::new();
    let mut per_task: HashMap<TaskId, Grid> = HashMap::new();
    let mut first_stamped: HashMap<TaskId, NaiveDateTime> = HashMap::new();
    let mut last_stamped: HashMap<TaskId, NaiveDateTime> = HashMap::new();
    let mut failed: HashMap<TaskId, AllocationFailure> = HashMap::new();

    for task in tasks {
        match prepare_task_for_allocation(task) {
            Some(draft) => {
                remaining.insert(task.id(), draft.estimated_duration.unwrap());
                drafts.insert(task.id(), draft);
                per_task.insert(task.id(), Grid::new());
            }
            None => {
                failed.insert(
                    task.id(),
                    AllocationFailure {
                        task_id: task.id(),
                        task_name: task.name().to_string(),
                        reason: "task is fixed or has no estimated_duration".to_string(),
                    },
                );
            }
        }
    }

    let mut cursor = params.start_date;
    let mut iterations = 0usize;
    loop {
        iterations += 1;
        if iterations > MAX_ITERATIONS {
            warn!("round-robin safety iteration limit reached");
            for (&id, draft) in &drafts {
                if remaining[&id] > 1e-9 && !failed.contains_key(&id) {
                    failed.insert(
                        id,
                        AllocationFailure {
                            task_id: id,
                            task_name: draft.name.clone(),
                            reason: "round-robin safety iteration limit reached".to_string(),
                        },
                    );
                }
            }
            break;
        }

        if !params.include_all_days && !is_workday(cursor.date(), params.holiday_checker) {
            cursor += Duration::days(1);
            continue;
        }

        let expired: Vec<TaskId> = drafts
            .keys()
            .copied()
            .filter(|id| {
                remaining[id] > 1e-9
                    && !failed.contains_key(id)
                    && drafts[id]
                        .deadline
                        .is_some_and(|deadline| cursor.date() > deadline.date())
            })
            .collect();
        for id in expired {
            if let Some(allocated) = per_task.get(&id) {
                for (date, hours) in allocated {
                    if let Some(existing) = grid.get_mut(date) {
                        *existing -= hours;
                    }
                }
            }
            failed.insert(
                id,
                AllocationFailure {
                    task_id: id,
                    task_name: drafts[&id].name.clone(),
                    reason: "deadline exceeded".to_string(),
                },
            );
        }

        let mut active: Vec<TaskId> = drafts
            .keys()
            .copied()
            .filter(|id| remaining[id] > 1e-9 && !failed.contains_key(id))
            .collect();
        if active.is_empty() {
            break;
        }
        active.sort_by(|a, b| {
            drafts[b]
                .priority
                .unwrap_or(0)
                .cmp(&drafts[a].priority.unwrap_or(0))
                .then(a.cmp(b))
        });

        let fixed_on_day = grid.get(&cursor.date()).copied().unwrap_or(0.0);
        let capacity = (params.max_hours_per_day - fixed_on_day).max(0.0);
        let share = capacity / active.len() as f64;

        for id in &active {
            let take = share.min(remaining[id]);
            if take > 1e-9 {
                *grid.entry(cursor.date()).or_insert(0.0) += take;
                per_task
                    .get_mut(id)
                    .unwrap()
                    .entry(cursor.date())
                    .and_modify(|h| *h += take)
                    .or_insert(take);
                *remaining.get_mut(id).unwrap() -= take;
                first_stamped.entry(*id).or_insert(cursor);
                last_stamped.insert(*id, cursor);
            }
        }

        cursor += Duration::days(1);
    }

    let mut successes = Vec::new();
    for task in tasks {
        if failed.contains_key(&task.id()) || !drafts.contains_key(&task.id()) {
            continue;
        }
        if remaining[&task.id()] > 1e-9 {
            continue;
        }
        let mut draft = drafts[&task.id()].clone();
        let first = first_stamped[&task.id()];
        let last = last_stamped[&task.id()];
        set_planned_times(
            &mut draft,
            first.date(),
            last.date(),
            per_task[&task.id()].clone(),
            params.default_start_time,
            params.default_end_time,
        );
        match draft.build() {
            Ok(updated) => successes.push(updated),
            Err(e) => {
                failed.insert(
                    task.id(),
                    AllocationFailure {
                        task_id: task.id(),
                        task_name: task.name().to_string(),
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    (successes, failed.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use shared::task::TaskDraft;
    use shared::time::NoHolidays;

    fn dt(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn equal_share_scenario() {
        let holidays = NoHolidays;
        let params = AllocationParams {
            start_date: dt(2025, 10, 20, 9),
            current_time: None,
            max_hours_per_day: 6.0,
            holiday_checker: &holidays,
            include_all_days: false,
            default_start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            default_end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        };
        let mut d1 = TaskDraft::new(1, "t1", dt(2025, 10, 20, 9));
        d1.estimated_duration = Some(12.0);
        let mut d2 = TaskDraft::new(2, "t2", dt(2025, 10, 20, 9));
        d2.estimated_duration = Some(12.0);
        let tasks = [d1.build().unwrap(), d2.build().unwrap()];

        let mut grid = Grid::new();
        let (successes, failures) = allocate_round_robin(&tasks, &mut grid, &params);
        assert!(failures.is_empty());
        assert_eq!(successes.len(), 2);
        let monday = NaiveDate::from_ymd_opt(2025, 10, 20).unwrap();
        for task in &successes {
            assert_eq!(task.daily_allocations().get(&monday).copied(), Some(3.0));
        }
    }
}
