//! Pure functions that spread an estimated duration across a planned period
//! (§4.3). Neither touches a grid or any other task; both are total.

use chrono::Datelike;

use crate::task::{DailyAllocations, Task};
use crate::time::HolidayChecker;

fn workdays_in_period(
    task: &Task,
    holidays: &dyn HolidayChecker,
) -> Option<Vec<chrono::NaiveDate>> {
    let start = task.planned_start()?.date();
    let end = task.planned_end()?.date();
    if start > end {
        return Some(Vec::new());
    }
    let mut days = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        if crate::time::is_workday(cursor, holidays) {
            days.push(cursor);
        }
        cursor = cursor.succ_opt().expect("date overflow");
    }
    Some(days)
}

fn all_days_in_period(task: &Task) -> Option<Vec<chrono::NaiveDate>> {
    let start = task.planned_start()?.date();
    let end = task.planned_end()?.date();
    if start > end {
        return Some(Vec::new());
    }
    let mut days = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        days.push(cursor);
        cursor = cursor.succ_opt().expect("date overflow");
    }
    Some(days)
}

fn distribute_equally(days: &[chrono::NaiveDate], total_hours: f64) -> DailyAllocations {
    let mut grid = DailyAllocations::new();
    if days.is_empty() {
        return grid;
    }
    let per_day = total_hours / days.len() as f64;
    for day in days {
        grid.insert(*day, per_day);
    }
    grid
}

/// Used during optimization: generated plans never imply weekend work.
pub fn weekday_only(task: &Task, holidays: &dyn HolidayChecker) -> DailyAllocations {
    let Some(duration) = task.estimated_duration() else {
        return DailyAllocations::new();
    };
    let Some(days) = workdays_in_period(task, holidays) else {
        return DailyAllocations::new();
    };
    distribute_equally(&days, duration)
}

/// Used for display/Gantt: honours manual weekend bookings by falling back
/// to all calendar days if the period is entirely weekend/holiday.
pub fn actual_schedule(task: &Task, holidays: &dyn HolidayChecker) -> DailyAllocations {
    let Some(duration) = task.estimated_duration() else {
        return DailyAllocations::new();
    };
    let Some(weekdays) = workdays_in_period(task, holidays) else {
        return DailyAllocations::new();
    };
    if !weekdays.is_empty() {
        return distribute_equally(&weekdays, duration);
    }
    let Some(all_days) = all_days_in_period(task) else {
        return DailyAllocations::new();
    };
    distribute_equally(&all_days, duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskDraft;
    use crate::time::NoHolidays;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32, h: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn weekday_only_skips_weekend() {
        let mut draft = TaskDraft::new(1, "t", dt(2025, 10, 20, 9));
        draft.estimated_duration = Some(10.0);
        draft.planned_start = Some(dt(2025, 10, 24, 9)); // Friday
        draft.planned_end = Some(dt(2025, 10, 27, 18)); // Monday
        let task = draft.build().unwrap();
        let grid = weekday_only(&task, &NoHolidays);
        assert_eq!(grid.len(), 2);
        assert!(grid.contains_key(&NaiveDate::from_ymd_opt(2025, 10, 24).unwrap()));
        assert!(grid.contains_key(&NaiveDate::from_ymd_opt(2025, 10, 27).unwrap()));
    }

    #[test]
    fn actual_schedule_falls_back_to_all_days_on_weekend_only_period() {
        let mut draft = TaskDraft::new(1, "t", dt(2025, 10, 20, 9));
        draft.estimated_duration = Some(4.0);
        draft.planned_start = Some(dt(2025, 10, 25, 9)); // Saturday
        draft.planned_end = Some(dt(2025, 10, 26, 18)); // Sunday
        let task = draft.build().unwrap();
        let grid = actual_schedule(&task, &NoHolidays);
        assert_eq!(grid.len(), 2);
    }

    #[test]
    fn missing_estimated_duration_yields_empty_grid() {
        let mut draft = TaskDraft::new(1, "t", dt(2025, 10, 20, 9));
        draft.planned_start = Some(dt(2025, 10, 20, 9));
        draft.planned_end = Some(dt(2025, 10, 21, 18));
        let task = draft.build().unwrap();
        assert!(weekday_only(&task, &NoHolidays).is_empty());
    }
}
