//! Calendar helpers: the workday predicate and the allocator's parameter
//! bundle (§4.4, §9 "Configuration objects").

use std::collections::HashSet;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

/// Injected holiday predicate. `NoHolidays` is used when no region is
/// configured; `FixedDateHolidaySet` covers a literal list of dates (region
/// calendars themselves are out of scope, see SPEC_FULL.md §4.16).
pub trait HolidayChecker: Send + Sync {
    fn is_holiday(&self, date: NaiveDate) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoHolidays;

impl HolidayChecker for NoHolidays {
    fn is_holiday(&self, _date: NaiveDate) -> bool {
        false
    }
}

#[derive(Debug, Default, Clone)]
pub struct FixedDateHolidaySet(HashSet<NaiveDate>);

impl FixedDateHolidaySet {
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self(dates.into_iter().collect())
    }
}

impl HolidayChecker for FixedDateHolidaySet {
    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.0.contains(&date)
    }
}

/// A weekday (Mon-Fri) that is not in the configured holiday set.
pub fn is_workday(date: NaiveDate, holidays: &dyn HolidayChecker) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !holidays.is_holiday(date)
}

/// Shared parameter bundle threaded through every allocation strategy
/// instead of individual positional arguments (§9).
#[derive(Clone, Copy)]
pub struct AllocationParams<'a> {
    pub start_date: NaiveDateTime,
    pub current_time: Option<NaiveDateTime>,
    pub max_hours_per_day: f64,
    pub holiday_checker: &'a dyn HolidayChecker,
    pub include_all_days: bool,
    pub default_start_time: NaiveTime,
    pub default_end_time: NaiveTime,
}

impl<'a> AllocationParams<'a> {
    pub fn new(
        start_date: NaiveDateTime,
        max_hours_per_day: f64,
        holiday_checker: &'a dyn HolidayChecker,
    ) -> Self {
        AllocationParams {
            start_date,
            current_time: None,
            max_hours_per_day,
            holiday_checker,
            include_all_days: false,
            default_start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            default_end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn weekend_is_not_a_workday() {
        let saturday = NaiveDate::from_ymd_opt(2025, 10, 25).unwrap();
        assert!(!is_workday(saturday, &NoHolidays));
    }

    #[test]
    fn holiday_weekday_is_not_a_workday() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 25).unwrap();
        let holidays = FixedDateHolidaySet::new([date]);
        assert!(!is_workday(date, &holidays));
    }
}
