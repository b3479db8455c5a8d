//! The shared forward greedy allocator (§4.5) and the four strategies built
//! directly on top of it (§4.6): they differ only in how the input tasks
//! are ordered before the loop runs.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Datelike;
use shared::allocation::{
    calculate_available_hours, prepare_task_for_allocation, set_planned_times, Grid,
};
use shared::dto::AllocationFailure;
use shared::task::Task;
use shared::time::AllocationParams;

/// Bounds the per-task day-by-day walk. Not a spec-mandated number (only
/// RoundRobin names an explicit safety limit); this exists so a task with a
/// multi-decade deadline can't spin forever.
const MAX_ALLOCATION_DAYS: i64 = 3650;

/// Run §4.5 for a single task against the shared `grid`. Never panics and
/// never returns an `Err` that should propagate past the optimize use-case:
/// failures are data, recorded in `OptimizeResult.failed_tasks`.
pub fn allocate_one(task: &Task, grid: &mut Grid, params: &AllocationParams) -> Result<Task, AllocationFailure> {
    let fail = |reason: &str| AllocationFailure {
        task_id: task.id(),
        task_name: task.name().to_string(),
        reason: reason.to_string(),
    };

    let Some(mut draft) = prepare_task_for_allocation(task) else {
        return Err(fail("task is fixed or has no estimated_duration"));
    };
    let mut remaining = draft.estimated_duration.expect("checked by prepare_task_for_allocation");

    let mut cursor = params.start_date;
    let mut first_stamped = None;
    let mut last_stamped = None;
    let mut per_task = Grid::new();

    for _ in 0..MAX_ALLOCATION_DAYS {
        if remaining <= 1e-9 {
            break;
        }
        if !params.include_all_days && !shared::time::is_workday(cursor.date(), params.holiday_checker) {
            cursor += chrono::Duration::days(1);
            continue;
        }
        if let Some(deadline) = draft.deadline {
            if cursor.date() > deadline.date() {
                for (date, hours) in &per_task {
                    if let Some(existing) = grid.get_mut(date) {
                        *existing -= hours;
                    }
                }
                return Err(fail("deadline exceeded before task could be fully allocated"));
            }
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
            first_stamped.get_or_insert(cursor);
            last_stamped = Some(cursor);
        }
        cursor += chrono::Duration::days(1);
    }

    let Some(first) = first_stamped else {
        return Err(fail("no capacity available before the safety horizon"));
    };
    set_planned_times(
        &mut draft,
        first.date(),
        last_stamped.unwrap().date(),
        per_task,
        params.default_start_time,
        params.default_end_time,
    );
    draft.build().map_err(|e| fail(&e.to_string()))
}

/// Run the shared allocator over `tasks` in the order given, mutating the
/// shared grid as it goes. Returns updated successful tasks (in the input
/// order) and the recorded failures.
pub fn run_ordered<'a>(
    tasks: impl IntoIterator<Item = &'a Task>,
    grid: &mut Grid,
    params: &AllocationParams,
) -> (Vec<Task>, Vec<AllocationFailure>) {
    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for task in tasks {
        match allocate_one(task, grid, params) {
            Ok(updated) => successes.push(updated),
            Err(failure) => failures.push(failure),
        }
    }
    (successes, failures)
}

fn priority_desc_id_asc(a: &Task, b: &Task) -> Ordering {
    b.priority()
        .unwrap_or(0)
        .cmp(&a.priority().unwrap_or(0))
        .then(a.id().cmp(&b.id()))
}

fn deadline_asc_id_asc(a: &Task, b: &Task) -> Ordering {
    match (a.deadline(), b.deadline()) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then(a.id().cmp(&b.id()))
}

fn deadline_asc_priority_desc_id_asc(a: &Task, b: &Task) -> Ordering {
    match (a.deadline(), b.deadline()) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then(priority_desc_id_asc(a, b))
}

/// `priority desc, id asc` — shared by `Greedy` and `PriorityFirst`.
pub fn sort_greedy(tasks: &[Task]) -> Vec<Task> {
    let mut sorted = tasks.to_vec();
    sorted.sort_by(priority_desc_id_asc);
    sorted
}

/// `deadline asc (absent last), id asc`.
pub fn sort_earliest_deadline(tasks: &[Task]) -> Vec<Task> {
    let mut sorted = tasks.to_vec();
    sorted.sort_by(deadline_asc_id_asc);
    sorted
}

/// `deadline asc, priority desc, id asc`, plus a topological pre-pass so a
/// task never precedes a task it depends on (§4.6). Kahn's algorithm with
/// the comparator above as the tiebreaker among ready nodes; a detected
/// cycle records each member as a failure with reason "dependency cycle"
/// and schedules the remainder.
pub fn sort_dependency_aware(tasks: &[Task]) -> (Vec<Task>, Vec<AllocationFailure>) {
    let by_id: HashMap<i64, &Task> = tasks.iter().map(|t| (t.id(), t)).collect();
    let mut indegree: HashMap<i64, usize> = tasks.iter().map(|t| (t.id(), 0)).collect();
    let mut dependents: HashMap<i64, Vec<i64>> = HashMap::new();

    for task in tasks {
        for dep_id in task.depends_on() {
            if by_id.contains_key(dep_id) {
                *indegree.get_mut(&task.id()).unwrap() += 1;
                dependents.entry(*dep_id).or_default().push(task.id());
            }
        }
    }

    let mut ready: Vec<i64> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    ready.sort_by(|a, b| deadline_asc_priority_desc_id_asc(by_id[a], by_id[b]));
    let mut ready: VecDeque<i64> = ready.into();

    let mut ordered = Vec::with_capacity(tasks.len());
    let mut remaining_indegree = indegree.clone();

    while let Some(id) = ready.pop_front() {
        ordered.push(by_id[&id].clone());
        if let Some(deps) = dependents.get(&id) {
            let mut newly_ready = Vec::new();
            for &dependent in deps {
                let entry = remaining_indegree.get_mut(&dependent).unwrap();
                *entry -= 1;
                if *entry == 0 {
                    newly_ready.push(dependent);
                }
            }
            newly_ready.sort_by(|a, b| deadline_asc_priority_desc_id_asc(by_id[a], by_id[b]));
            for id in newly_ready {
                // keep the whole ready set sorted by re-sorting after insert;
                // the ready sets are small relative to a single optimize run.
                let pos = ready
                    .iter()
                    .position(|other| {
                        deadline_asc_priority_desc_id_asc(by_id[&id], by_id[other]) == Ordering::Less
                    })
                    .unwrap_or(ready.len());
                ready.insert(pos, id);
            }
        }
    }

    let scheduled_ids: HashSet<i64> = ordered.iter().map(|t| t.id()).collect();
    let failures = tasks
        .iter()
        .filter(|t| !scheduled_ids.contains(&t.id()))
        .map(|t| AllocationFailure {
            task_id: t.id(),
            task_name: t.name().to_string(),
            reason: "dependency cycle".to_string(),
        })
        .collect();

    (ordered, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use shared::task::TaskDraft;
    use shared::time::NoHolidays;

    fn dt(y: i32, m: u32, d: u32, h: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn params(start: chrono::NaiveDateTime, holidays: &dyn shared::time::HolidayChecker) -> AllocationParams {
        AllocationParams {
            start_date: start,
            current_time: None,
            max_hours_per_day: 6.0,
            holiday_checker: holidays,
            include_all_days: false,
            default_start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            default_end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        }
    }

    fn task(id: i64, duration: f64) -> Task {
        let mut draft = TaskDraft::new(id, "t", dt(2025, 10, 20, 9));
        draft.estimated_duration = Some(duration);
        draft.build().unwrap()
    }

    #[test]
    fn greedy_front_load_scenario() {
        let holidays = NoHolidays;
        let p = params(dt(2025, 10, 20, 9), &holidays);
        let mut grid = Grid::new();
        let t = task(1, 12.0);
        let updated = allocate_one(&t, &mut grid, &p).unwrap();
        assert_eq!(updated.planned_start(), Some(dt(2025, 10, 20, 9)));
        assert_eq!(updated.planned_end(), Some(dt(2025, 10, 21, 18)));
        assert_eq!(updated.daily_allocations().len(), 2);
        assert!(updated
            .daily_allocations()
            .values()
            .all(|h| (*h - 6.0).abs() < 1e-9));
    }

    #[test]
    fn weekend_skip_scenario() {
        let holidays = NoHolidays;
        let p = params(dt(2025, 10, 24, 9), &holidays);
        let mut grid = Grid::new();
        let t = task(1, 12.0);
        let updated = allocate_one(&t, &mut grid, &p).unwrap();
        assert_eq!(updated.planned_start(), Some(dt(2025, 10, 24, 9)));
        assert_eq!(updated.planned_end(), Some(dt(2025, 10, 27, 18)));
        assert_eq!(updated.daily_allocations().len(), 2);
        let sat = NaiveDate::from_ymd_opt(2025, 10, 25).unwrap();
        let sun = NaiveDate::from_ymd_opt(2025, 10, 26).unwrap();
        assert!(!updated.daily_allocations().contains_key(&sat));
        assert!(!updated.daily_allocations().contains_key(&sun));
    }

    #[test]
    fn deadline_infeasible_scenario_rolls_back_grid() {
        let holidays = NoHolidays;
        let p = params(dt(2025, 10, 20, 9), &holidays);
        let mut grid = Grid::new();
        let mut draft = TaskDraft::new(1, "t", dt(2025, 10, 20, 9));
        draft.estimated_duration = Some(30.0);
        draft.deadline = Some(dt(2025, 10, 22, 18));
        let t = draft.build().unwrap();
        let err = allocate_one(&t, &mut grid, &p).unwrap_err();
        assert_eq!(err.reason, "deadline exceeded before task could be fully allocated");
        assert!(grid.values().all(|h| *h == 0.0) || grid.is_empty());
    }

    #[test]
    fn fixed_task_capacity_is_respected() {
        let holidays = NoHolidays;
        let p = params(dt(2025, 10, 20, 9), &holidays);
        let mut grid = Grid::new();
        grid.insert(NaiveDate::from_ymd_opt(2025, 10, 20).unwrap(), 4.0);
        grid.insert(NaiveDate::from_ymd_opt(2025, 10, 21).unwrap(), 4.0);
        grid.insert(NaiveDate::from_ymd_opt(2025, 10, 22).unwrap(), 4.0);
        let t = task(1, 6.0);
        let updated = allocate_one(&t, &mut grid, &p).unwrap();
        assert_eq!(updated.daily_allocations().len(), 3);
        for hours in updated.daily_allocations().values() {
            assert!((*hours - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn earliest_deadline_ignores_priority() {
        let mut low_priority_urgent = TaskDraft::new(1, "urgent", dt(2025, 10, 20, 9));
        low_priority_urgent.priority = Some(50);
        low_priority_urgent.deadline = Some(dt(2025, 10, 22, 18));
        low_priority_urgent.estimated_duration = Some(6.0);
        let urgent = low_priority_urgent.build().unwrap();

        let mut high_priority_later = TaskDraft::new(2, "later", dt(2025, 10, 20, 9));
        high_priority_later.priority = Some(100);
        high_priority_later.deadline = Some(dt(2025, 10, 25, 18));
        high_priority_later.estimated_duration = Some(6.0);
        let later = high_priority_later.build().unwrap();

        let sorted = sort_earliest_deadline(&[later, urgent]);
        assert_eq!(sorted[0].id(), 1);
    }

    #[test]
    fn dependency_aware_orders_dependency_before_dependent() {
        let dep = task(1, 4.0);
        let mut draft = TaskDraft::new(2, "dependent", dt(2025, 10, 20, 9));
        draft.estimated_duration = Some(4.0);
        draft.depends_on = vec![1];
        let dependent = draft.build().unwrap();

        let (ordered, failures) = sort_dependency_aware(&[dependent, dep]);
        assert!(failures.is_empty());
        assert_eq!(ordered[0].id(), 1);
        assert_eq!(ordered[1].id(), 2);
    }

    #[test]
    fn dependency_cycle_is_reported_as_failure() {
        let mut a = TaskDraft::new(1, "a", dt(2025, 10, 20, 9));
        a.estimated_duration = Some(1.0);
        a.depends_on = vec![2];
        let mut b = TaskDraft::new(2, "b", dt(2025, 10, 20, 9));
        b.estimated_duration = Some(1.0);
        b.depends_on = vec![1];

        let (ordered, failures) = sort_dependency_aware(&[a.build().unwrap(), b.build().unwrap()]);
        assert!(ordered.is_empty());
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|f| f.reason == "dependency cycle"));
    }
}
