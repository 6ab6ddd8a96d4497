// src/model.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::calendar::{standard_day_hours, WeekId, WorkDay};

// --- Error Types ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unrecognised trip code '{0}'")]
    InvalidTripCode(String),
}

// --- Identifiers ---

pub type TenantId = String;
pub type EmployeeId = String;
pub type SupervisorId = String;
pub type WorksiteCode = String;
pub type Plate = String;
pub type SheetId = u64;

// --- Employees ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeKind {
    Permanent,
    Temporary,
    Apprentice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub display_name: String,
    pub kind: EmployeeKind,
}

// --- Sheet Status ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SheetStatus {
    Draft,
    SupervisorValidated,
    SentToHr,
    AutoValidated,
    Closed,
}

impl SheetStatus {
    /// Sheets in these states feed payroll; drafts and pending validations do not.
    pub fn is_payroll_ready(self) -> bool {
        matches!(
            self,
            SheetStatus::SentToHr | SheetStatus::AutoValidated | SheetStatus::Closed
        )
    }

    pub fn is_locked(self) -> bool {
        self == SheetStatus::Closed
    }

    /// Lifecycle moves outside of period closure. `Closed` is only reached by closing a period.
    pub fn can_advance_to(self, target: SheetStatus) -> bool {
        use SheetStatus::*;
        matches!(
            (self, target),
            (Draft, SupervisorValidated)
                | (Draft, AutoValidated)
                | (SupervisorValidated, SentToHr)
                | (SupervisorValidated, AutoValidated)
        )
    }
}

// --- Absence Types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsenceType {
    /// Entered as absent but not yet classified by HR.
    ToClassify,
    PaidLeave,
    Sickness,
    WorkAccident,
    UnpaidLeave,
    Training,
    PublicHoliday,
    WeatherStoppage,
    Unjustified,
}

impl AbsenceType {
    pub const ALL: [AbsenceType; 9] = [
        AbsenceType::ToClassify,
        AbsenceType::PaidLeave,
        AbsenceType::Sickness,
        AbsenceType::WorkAccident,
        AbsenceType::UnpaidLeave,
        AbsenceType::Training,
        AbsenceType::PublicHoliday,
        AbsenceType::WeatherStoppage,
        AbsenceType::Unjustified,
    ];

    pub fn is_qualified(self) -> bool {
        self != AbsenceType::ToClassify
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AbsenceType::ToClassify => "to_classify",
            AbsenceType::PaidLeave => "paid_leave",
            AbsenceType::Sickness => "sickness",
            AbsenceType::WorkAccident => "work_accident",
            AbsenceType::UnpaidLeave => "unpaid_leave",
            AbsenceType::Training => "training",
            AbsenceType::PublicHoliday => "public_holiday",
            AbsenceType::WeatherStoppage => "weather_stoppage",
            AbsenceType::Unjustified => "unjustified",
        }
    }
}

// --- Trip Codes ---

/// Travel indemnity zones, nearest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TripZone {
    Z1A,
    Z1B,
    Z2,
    Z3,
    Z4,
    Z5,
}

impl TripZone {
    pub const ALL: [TripZone; 6] = [
        TripZone::Z1A,
        TripZone::Z1B,
        TripZone::Z2,
        TripZone::Z3,
        TripZone::Z4,
        TripZone::Z5,
    ];

    pub fn code(self) -> &'static str {
        match self {
            TripZone::Z1A => "1A",
            TripZone::Z1B => "1B",
            TripZone::Z2 => "2",
            TripZone::Z3 => "3",
            TripZone::Z4 => "4",
            TripZone::Z5 => "5",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TripCode {
    /// Worker travelled in their own vehicle.
    Personal,
    /// Trip flag set but the route has not been chosen yet.
    ToBeCompleted,
    Zone(TripZone),
}

impl fmt::Display for TripCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripCode::Personal => write!(f, "PERSONAL"),
            TripCode::ToBeCompleted => write!(f, "TO_COMPLETE"),
            TripCode::Zone(zone) => write!(f, "ZONE_{}", zone.code()),
        }
    }
}

impl FromStr for TripCode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "PERSONAL" => Ok(TripCode::Personal),
            "TO_COMPLETE" => Ok(TripCode::ToBeCompleted),
            other => other
                .strip_prefix("ZONE_")
                .and_then(|code| TripZone::ALL.into_iter().find(|z| z.code() == code))
                .map(TripCode::Zone)
                .ok_or_else(|| ModelError::InvalidTripCode(s.to_string())),
        }
    }
}

impl TryFrom<String> for TripCode {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TripCode> for String {
    fn from(code: TripCode) -> Self {
        code.to_string()
    }
}

// --- Sheets & Day Records ---

/// Upper bound for the hours of a single day, worked or lost to weather.
pub const MAX_DAY_HOURS: Decimal = dec!(24);

pub fn is_valid_day_hours(hours: Decimal) -> bool {
    hours >= Decimal::ZERO && hours <= MAX_DAY_HOURS
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorksiteRef {
    pub code: WorksiteCode,
    #[serde(default)]
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklySheet {
    pub id: SheetId,
    pub employee_id: EmployeeId,
    pub week: WeekId,
    /// `None` when the employee spans several worksites and each day carries its own.
    pub worksite: Option<WorksiteCode>,
    pub supervisor_id: SupervisorId,
    pub status: SheetStatus,
    pub total_hours: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSheet {
    pub employee_id: EmployeeId,
    pub week: WeekId,
    pub worksite: Option<WorksiteCode>,
    pub supervisor_id: SupervisorId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayRecord {
    pub date: NaiveDate,
    pub hours: Decimal,
    pub weather_hours: Decimal,
    pub trip_code: Option<TripCode>,
    pub meal: bool,
    pub worksite_of_day: Option<WorksiteRef>,
    pub note: Option<String>,
    pub absent: bool,
    pub absence_type: Option<AbsenceType>,
}

impl DayRecord {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            hours: Decimal::ZERO,
            weather_hours: Decimal::ZERO,
            trip_code: None,
            meal: false,
            worksite_of_day: None,
            note: None,
            absent: false,
            absence_type: None,
        }
    }

    /// Default day for a freshly created sheet: standard hours, meal on, trip pending.
    pub fn seeded(day: WorkDay, date: NaiveDate) -> Self {
        Self {
            hours: standard_day_hours(day),
            trip_code: Some(TripCode::ToBeCompleted),
            meal: true,
            ..Self::empty(date)
        }
    }

    /// The shape a week has when it was copied forward unchanged.
    pub fn looks_copied(&self) -> bool {
        self.hours == dec!(7) && !self.absent && self.weather_hours.is_zero()
    }

    pub fn has_valid_hours(&self) -> bool {
        is_valid_day_hours(self.hours) && is_valid_day_hours(self.weather_hours)
    }

    pub fn has_unqualified_absence(&self) -> bool {
        self.absent && !self.absence_type.map(AbsenceType::is_qualified).unwrap_or(false)
    }

    /// Worksite a day counts towards: its own override, else the sheet's.
    pub fn effective_worksite<'a>(&'a self, sheet: &'a WeeklySheet) -> Option<&'a str> {
        self.worksite_of_day
            .as_ref()
            .map(|w| w.code.as_str())
            .or(sheet.worksite.as_deref())
    }
}

// --- Assignments ---

/// Binds an employee to a supervisor and worksite over a date range; `end` is open when `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub employee_id: EmployeeId,
    pub supervisor_id: SupervisorId,
    pub worksite: WorksiteCode,
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

impl Assignment {
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start && self.end.map_or(true, |end| date <= end)
    }

    pub fn overlaps(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.start <= to && self.end.map_or(true, |end| end >= from)
    }
}

/// Day-level override: this supervisor owns this employee on this date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayAssignment {
    pub employee_id: EmployeeId,
    pub supervisor_id: SupervisorId,
    pub worksite: Option<WorksiteCode>,
    pub date: NaiveDate,
}

// --- Vehicles ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverShift {
    Morning,
    Evening,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleDayEntry {
    pub date: NaiveDate,
    pub week: WeekId,
    pub plate: Plate,
    pub morning_driver: Option<EmployeeId>,
    pub evening_driver: Option<EmployeeId>,
}

impl VehicleDayEntry {
    pub fn new(date: NaiveDate, plate: &str) -> Self {
        Self {
            date,
            week: WeekId::containing(date),
            plate: plate.to_string(),
            morning_driver: None,
            evening_driver: None,
        }
    }

    pub fn driver(&self, shift: DriverShift) -> Option<&EmployeeId> {
        match shift {
            DriverShift::Morning => self.morning_driver.as_ref(),
            DriverShift::Evening => self.evening_driver.as_ref(),
        }
    }

    pub fn set_driver(&mut self, shift: DriverShift, employee: &str) {
        let slot = match shift {
            DriverShift::Morning => &mut self.morning_driver,
            DriverShift::Evening => &mut self.evening_driver,
        };
        *slot = Some(employee.to_string());
    }

    /// Frees `shift` when `employee` holds it. Returns whether anything changed.
    pub fn clear_driver(&mut self, shift: DriverShift, employee: &str) -> bool {
        let slot = match shift {
            DriverShift::Morning => &mut self.morning_driver,
            DriverShift::Evening => &mut self.evening_driver,
        };
        if slot.as_deref() == Some(employee) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn is_unused(&self) -> bool {
        self.morning_driver.is_none() && self.evening_driver.is_none()
    }

    /// Another driver already holding this plate on either shift.
    pub fn held_by_other(&self, employee: &str) -> Option<&EmployeeId> {
        [self.morning_driver.as_ref(), self.evening_driver.as_ref()]
            .into_iter()
            .flatten()
            .find(|driver| driver.as_str() != employee)
    }
}
