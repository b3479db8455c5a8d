//! The `Balanced` strategy (§4.7): even spread within the deadline window,
//! falling back to the shared greedy allocator when an even spread can't
//! meet the deadline within `maxHoursPerDay`.

use chrono::Duration;
use shared::allocation::{prepare_task_for_allocation, set_planned_times, Grid};
use shared::dto::AllocationFailure;
use shared::task::Task;
use shared::time::{is_workday, AllocationParams};

use super::greedy::{allocate_one, sort_greedy};

pub fn allocate_balanced(
    tasks: &[Task],
    grid: &mut Grid,
    params: &AllocationParams,
) -> (Vec<Task>, Vec<AllocationFailure>) {
    let mut successes = Vec::new();
    let mut failures = Vec::new();

    for task in sort_greedy(tasks) {
        match allocate_one_evenly(&task, grid, params) {
            Some(updated) => successes.push(updated),
            None => match allocate_one(&task, grid, params) {
                Ok(updated) => successes.push(updated),
                Err(failure) => failures.push(failure),
            },
        }
    }

    (successes, failures)
}

fn allocate_one_evenly(task: &Task, grid: &mut Grid, params: &AllocationParams) -> Option<Task> {
    let mut draft = prepare_task_for_allocation(task)?;
    let duration = draft.estimated_duration?;
    let effective_deadline = draft
        .deadline
        .unwrap_or(params.start_date + Duration::days(14));

    let mut workdays = Vec::new();
    let mut cursor = params.start_date.date();
    while cursor <= effective_deadline.date() {
        if params.include_all_days || is_workday(cursor, params.holiday_checker) {
            workdays.push(cursor);
        }
        cursor = cursor.succ_opt()?;
    }
    if workdays.is_empty() {
        return None;
    }

    let hours_per_day = duration / workdays.len() as f64;
    if hours_per_day > params.max_hours_per_day + 1e-9 {
        return None;
    }
    if hours_per_day * workdays.len() as f64 + 1e-9 < duration {
        return None;
    }
    for day in &workdays {
        let used = grid.get(day).copied().unwrap_or(0.0);
        if used + hours_per_day > params.max_hours_per_day + 1e-9 {
            return None;
        }
    }

    let mut per_task = Grid::new();
    for day in &workdays {
        *grid.entry(*day).or_insert(0.0) += hours_per_day;
        per_task.insert(*day, hours_per_day);
    }
    set_planned_times(
        &mut draft,
        workdays[0],
        *workdays.last().unwrap(),
        per_task,
        params.default_start_time,
        params.default_end_time,
    );
    draft.build().ok()
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

    #[test]
    fn spreads_evenly_across_the_deadline_window() {
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
        let mut draft = TaskDraft::new(1, "t", dt(2025, 10, 20, 9));
        draft.estimated_duration = Some(8.0);
        draft.deadline = Some(dt(2025, 10, 21, 18));
        let task = draft.build().unwrap();

        let mut grid = Grid::new();
        let (successes, failures) = allocate_balanced(&[task], &mut grid, &params);
        assert!(failures.is_empty());
        assert_eq!(successes.len(), 1);
        for hours in successes[0].daily_allocations().values() {
            assert!((*hours - 4.0).abs() < 1e-9);
        }
    }
}
