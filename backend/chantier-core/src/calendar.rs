// src/calendar.rs
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// --- Error Types ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    #[error("Invalid ISO week: {year}-W{week:02}")]
    InvalidWeek { year: i32, week: u32 },
    #[error("Invalid month: {year}-{month:02}")]
    InvalidMonth { year: i32, month: u32 },
    #[error("Unrecognised {kind} '{value}'")]
    InvalidFormat { kind: &'static str, value: String },
}

// --- Work Days ---

/// The five days a weekly sheet covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
}

impl WorkDay {
    pub const ALL: [WorkDay; 5] = [
        WorkDay::Monday,
        WorkDay::Tuesday,
        WorkDay::Wednesday,
        WorkDay::Thursday,
        WorkDay::Friday,
    ];

    pub fn weekday(self) -> Weekday {
        match self {
            WorkDay::Monday => Weekday::Mon,
            WorkDay::Tuesday => Weekday::Tue,
            WorkDay::Wednesday => Weekday::Wed,
            WorkDay::Thursday => Weekday::Thu,
            WorkDay::Friday => Weekday::Fri,
        }
    }

    pub fn from_weekday(weekday: Weekday) -> Option<Self> {
        match weekday {
            Weekday::Mon => Some(WorkDay::Monday),
            Weekday::Tue => Some(WorkDay::Tuesday),
            Weekday::Wed => Some(WorkDay::Wednesday),
            Weekday::Thu => Some(WorkDay::Thursday),
            Weekday::Fri => Some(WorkDay::Friday),
            Weekday::Sat | Weekday::Sun => None,
        }
    }

    fn offset(self) -> i64 {
        self.weekday().num_days_from_monday() as i64
    }
}

impl FromStr for WorkDay {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // chrono accepts both "mon" and "monday"
        s.trim()
            .to_ascii_lowercase()
            .parse::<Weekday>()
            .ok()
            .and_then(WorkDay::from_weekday)
            .ok_or_else(|| CalendarError::InvalidFormat {
                kind: "day name",
                value: s.to_string(),
            })
    }
}

/// Standard contractual hours for a weekday: 8h Monday to Thursday, 7h Friday.
pub fn standard_day_hours(day: WorkDay) -> Decimal {
    match day {
        WorkDay::Friday => dec!(7),
        _ => dec!(8),
    }
}

/// Hours an absence is worth on a given date. Friday is 7, any other day 8.
pub fn absence_day_hours(date: NaiveDate) -> Decimal {
    if date.weekday() == Weekday::Fri {
        dec!(7)
    } else {
        dec!(8)
    }
}

// --- ISO Week ---

/// An ISO year-week, stored as its Monday. Text form is `2025-W11`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WeekId(NaiveDate);

impl WeekId {
    pub fn new(year: i32, week: u32) -> Result<Self, CalendarError> {
        NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
            .map(WeekId)
            .ok_or(CalendarError::InvalidWeek { year, week })
    }

    /// The week containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        let back = date.weekday().num_days_from_monday() as i64;
        WeekId(date - Duration::days(back))
    }

    pub fn year(&self) -> i32 {
        self.0.iso_week().year()
    }

    pub fn week(&self) -> u32 {
        self.0.iso_week().week()
    }

    pub fn monday(&self) -> NaiveDate {
        self.0
    }

    pub fn friday(&self) -> NaiveDate {
        self.date_of(WorkDay::Friday)
    }

    pub fn date_of(&self, day: WorkDay) -> NaiveDate {
        self.0 + Duration::days(day.offset())
    }

    /// Monday to Friday of this week, in order.
    pub fn workdays(&self) -> [(WorkDay, NaiveDate); 5] {
        WorkDay::ALL.map(|day| (day, self.date_of(day)))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.0 && date <= self.friday()
    }

    pub fn next(&self) -> Self {
        WeekId(self.0 + Duration::days(7))
    }
}

impl fmt::Display for WeekId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-W{:02}", self.year(), self.week())
    }
}

impl FromStr for WeekId {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CalendarError::InvalidFormat {
            kind: "ISO week",
            value: s.to_string(),
        };
        let (year, week) = s.trim().split_once("-W").ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let week = week.parse::<u32>().map_err(|_| invalid())?;
        WeekId::new(year, week)
    }
}

impl TryFrom<String> for WeekId {
    type Error = CalendarError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WeekId> for String {
    fn from(week: WeekId) -> Self {
        week.to_string()
    }
}

// --- Calendar Month ---

/// A payroll period: one calendar month. Text form is `2025-03`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, CalendarError> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|_| Period { year, month })
            .ok_or(CalendarError::InvalidMonth { year, month })
    }

    pub fn containing(date: NaiveDate) -> Self {
        Period {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        // Validated in the constructor.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// ISO weeks with at least one Monday-to-Friday date inside this month.
    pub fn weeks(&self) -> Vec<WeekId> {
        let last = self.last_day();
        let mut weeks = Vec::new();
        let mut week = WeekId::containing(self.first_day());
        while week.monday() <= last {
            if week.workdays().iter().any(|(_, date)| self.contains(*date)) {
                weeks.push(week);
            }
            week = week.next();
        }
        weeks
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CalendarError::InvalidFormat {
            kind: "period",
            value: s.to_string(),
        };
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Period::new(year, month)
    }
}

impl TryFrom<String> for Period {
    type Error = CalendarError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

#[cfg(test)]
mod calendar_tests {
    use super::*;
    use crate::test_support::d;

    #[test]
    fn week_round_trips_through_text() {
        let week: WeekId = "2025-W11".parse().unwrap();
        assert_eq!(week.monday(), d("2025-03-10"));
        assert_eq!(week.friday(), d("2025-03-14"));
        assert_eq!(week.to_string(), "2025-W11");
    }

    #[test]
    fn week_53_only_exists_in_long_years() {
        assert!(WeekId::new(2020, 53).is_ok());
        assert_eq!(
            WeekId::new(2025, 53),
            Err(CalendarError::InvalidWeek { year: 2025, week: 53 })
        );
    }

    #[test]
    fn week_belongs_to_iso_year_not_calendar_year() {
        // 2024-12-30 is the Monday of 2025-W01
        let week = WeekId::containing(d("2025-01-01"));
        assert_eq!(week.monday(), d("2024-12-30"));
        assert_eq!(week.to_string(), "2025-W01");
    }

    #[test]
    fn workdays_are_monday_to_friday_in_order() {
        let week = WeekId::new(2025, 11).unwrap();
        let days = week.workdays();
        assert_eq!(days[0], (WorkDay::Monday, d("2025-03-10")));
        assert_eq!(days[4], (WorkDay::Friday, d("2025-03-14")));
    }

    #[test]
    fn containing_a_sunday_returns_its_week() {
        assert_eq!(
            WeekId::containing(d("2025-03-16")),
            WeekId::new(2025, 11).unwrap()
        );
    }

    #[test]
    fn march_2025_spans_weeks_10_to_14() {
        let period: Period = "2025-03".parse().unwrap();
        let weeks: Vec<String> = period.weeks().iter().map(|w| w.to_string()).collect();
        // 1-2 March fall on a weekend so week 9 has no working day in March
        assert_eq!(
            weeks,
            vec!["2025-W10", "2025-W11", "2025-W12", "2025-W13", "2025-W14"]
        );
    }

    #[test]
    fn period_bounds_handle_december() {
        let period = Period::new(2024, 12).unwrap();
        assert_eq!(period.first_day(), d("2024-12-01"));
        assert_eq!(period.last_day(), d("2024-12-31"));
        assert!(Period::new(2024, 13).is_err());
    }

    #[test]
    fn day_names_parse_short_and_long() {
        assert_eq!("mon".parse::<WorkDay>().unwrap(), WorkDay::Monday);
        assert_eq!("Friday".parse::<WorkDay>().unwrap(), WorkDay::Friday);
        assert!("saturday".parse::<WorkDay>().is_err());
    }

    #[test]
    fn absence_hours_depend_only_on_weekday() {
        assert_eq!(absence_day_hours(d("2025-03-14")), dec!(7));
        assert_eq!(absence_day_hours(d("2025-03-11")), dec!(8));
    }
}
