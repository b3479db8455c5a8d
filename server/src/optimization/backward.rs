//! The `Backward` strategy (§4.8): run the greedy allocator in reverse from
//! the deadline, producing "just-in-time" plans that cluster work near
//! deadlines.

use chrono::Duration;
use shared::allocation::{calculate_available_hours, prepare_task_for_allocation, set_planned_times, Grid};
use shared::dto::AllocationFailure;
use shared::task::Task;
use shared::time::{is_workday, AllocationParams};

const MAX_ALLOCATION_DAYS: i64 = 3650;

pub fn allocate_backward(
    tasks: &[Task],
    grid: &mut Grid,
    params: &AllocationParams,
) -> (Vec<Task>, Vec<AllocationFailure>) {
    let mut sorted = tasks.to_vec();
    sorted.sort_by(|a, b| {
        let da = a.deadline().unwrap_or(params.start_date + Duration::days(7));
        let db = b.deadline().unwrap_or(params.start_date + Duration::days(7));
        db.cmp(&da).then(a.id().cmp(&b.id()))
    });

    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for task in &sorted {
        match allocate_one_backward(task, grid, params) {
            Ok(updated) => successes.push(updated),
            Err(failure) => failures.push(failure),
        }
    }
    (successes, failures)
}

fn allocate_one_backward(
    task: &Task,
    grid: &mut Grid,
    params: &AllocationParams,
) -> Result<Task, AllocationFailure> {
    let fail = |reason: &str| AllocationFailure {
        task_id: task.id(),
        task_name: task.name().to_string(),
        reason: reason.to_string(),
    };

    let Some(mut draft) = prepare_task_for_allocation(task) else {
        return Err(fail("task is fixed or has no estimated_duration"));
    };
    let mut remaining = draft.estimated_duration.expect("checked by prepare_task_for_allocation");
    let effective_deadline = draft.deadline.unwrap_or(params.start_date + Duration::days(7));

    let mut cursor = effective_deadline;
    let mut earliest_stamped = None;
    let mut latest_stamped = None;
    let mut per_task = Grid::new();

    for _ in 0..MAX_ALLOCATION_DAYS {
        if remaining <= 1e-9 {
            break;
        }
        if cursor.date() < params.start_date.date() {
            for (date, hours) in &per_task {
                if let Some(existing) = grid.get_mut(date) {
                    *existing -= hours;
                }
            }
            return Err(fail("start date reached before task could be fully allocated"));
        }
        if !params.include_all_days && !is_workday(cursor.date(), params.holiday_checker) {
            cursor -= Duration::days(1);
            continue;
        }

        let avail = calculate_available_hours(
            grid,
            cursor.date(),
            params.max_hours_per_day,
            params.current_time,
            params.default_end_time,
        );
        if avail > 1e-9 {
            let take = remaining.min(avail);
            *grid.entry(cursor.date()).or_insert(0.0) += take;
            *per_task.entry(cursor.date()).or_insert(0.0) += take;
            remaining -= take;
            latest_stamped.get_or_insert(cursor);
            earliest_stamped = Some(cursor);
        }
        cursor -= Duration::days(1);
    }

    let Some(latest) = latest_stamped else {
        return Err(fail("no capacity available before the safety horizon"));
    };
    let earliest = earliest_stamped.unwrap();
    set_planned_times(
        &mut draft,
        earliest.date(),
        latest.date(),
        per_task,
        params.default_start_time,
        params.default_end_time,
    );
    draft.build().map_err(|e| fail(&e.to_string()))
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
    fn backward_just_in_time_scenario() {
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
        draft.estimated_duration = Some(6.0);
        draft.deadline = Some(dt(2025, 10, 24, 18));
        let task = draft.build().unwrap();

        let mut grid = Grid::new();
        let (successes, failures) = allocate_backward(&[task], &mut grid, &params);
        assert!(failures.is_empty());
        let allocations = successes[0].daily_allocations();
        assert_eq!(allocations.len(), 1);
        let friday = NaiveDate::from_ymd_opt(2025, 10, 24).unwrap();
        assert_eq!(allocations.get(&friday).copied(), Some(6.0));
    }
}
