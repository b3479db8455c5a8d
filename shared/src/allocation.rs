//! Allocation primitives shared by every optimization strategy (§4.4).

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::task::{DailyAllocations, Task, TaskDraft};

pub type Grid = DailyAllocations;

/// Sums every task's `daily_allocations` into a fresh grid. The starting
/// point of every optimization run: fixed bookings and previously scheduled
/// tasks are folded in before any new allocation happens.
pub fn initialize_allocations<'a>(context_tasks: impl IntoIterator<Item = &'a Task>) -> Grid {
    let mut grid = Grid::new();
    for task in context_tasks {
        for (date, hours) in task.daily_allocations() {
            *grid.entry(*date).or_insert(0.0) += hours;
        }
    }
    grid
}

/// A copy of `task` with its plan cleared, ready for (re)allocation.
/// Returns `None` if the task is fixed or has no `estimated_duration`
/// (unschedulable).
pub fn prepare_task_for_allocation(task: &Task) -> Option<TaskDraft> {
    if task.is_fixed() || task.estimated_duration().is_none() {
        return None;
    }
    let mut draft = task.draft();
    draft.planned_start = None;
    draft.planned_end = None;
    draft.daily_allocations = DailyAllocations::new();
    Some(draft)
}

/// `maxHoursPerDay - grid[date]`, clamped to >= 0; additionally clamped by
/// the wall-clock hours remaining in the workday when `date` is "today".
pub fn calculate_available_hours(
    grid: &Grid,
    date: NaiveDate,
    max_hours_per_day: f64,
    current_time: Option<NaiveDateTime>,
    default_end_time: NaiveTime,
) -> f64 {
    let used = grid.get(&date).copied().unwrap_or(0.0);
    let mut available = (max_hours_per_day - used).max(0.0);

    if let Some(now) = current_time {
        if now.date() == date {
            let remaining_seconds = (default_end_time - now.time()).num_seconds();
            let remaining_hours = (remaining_seconds.max(0) as f64) / 3600.0;
            available = available.min(remaining_hours);
        }
    }

    available
}

/// Stamps `planned_start`/`planned_end`/`daily_allocations` on `draft`.
pub fn set_planned_times(
    draft: &mut TaskDraft,
    first_date: NaiveDate,
    last_date: NaiveDate,
    allocations: DailyAllocations,
    default_start_time: NaiveTime,
    default_end_time: NaiveTime,
) {
    draft.planned_start = Some(first_date.and_time(default_start_time));
    draft.planned_end = Some(last_date.and_time(default_end_time));
    draft.daily_allocations = allocations;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn available_hours_clamped_to_zero_when_full() {
        let mut grid = Grid::new();
        grid.insert(day(2025, 10, 20), 6.0);
        let hours = calculate_available_hours(
            &grid,
            day(2025, 10, 20),
            6.0,
            None,
            NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        );
        assert_eq!(hours, 0.0);
    }

    #[test]
    fn available_hours_clamped_by_current_time_same_day() {
        let grid = Grid::new();
        let now = day(2025, 10, 20).and_hms_opt(16, 0, 0).unwrap();
        let hours = calculate_available_hours(
            &grid,
            day(2025, 10, 20),
            6.0,
            Some(now),
            NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        );
        assert_eq!(hours, 2.0);
    }

    #[test]
    fn fixed_task_is_not_schedulable() {
        let mut draft = TaskDraft::new(1, "t", day(2025, 10, 20).and_hms_opt(9, 0, 0).unwrap());
        draft.is_fixed = true;
        draft.estimated_duration = Some(4.0);
        let task = draft.build().unwrap();
        assert!(prepare_task_for_allocation(&task).is_none());
    }
}
