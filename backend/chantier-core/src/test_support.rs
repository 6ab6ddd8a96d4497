// src/test_support.rs
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::calendar::{Period, WeekId};
use crate::closure::{ClosedPeriod, ClosureEngine, ClosureTotals, FixedClock};
use crate::consolidation::{Aggregator, ConsolidatedRow, OvertimePolicy};
use crate::export::{ArtifactGenerator, ArtifactRef, ExportError};
use crate::model::*;
use crate::normalizer::DayInput;
use crate::store::{InMemoryStore, TimesheetStore};

pub const TENANT: &str = "acme";

pub fn d(date: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap()
}

pub fn week(text: &str) -> WeekId {
    text.parse().unwrap()
}

pub fn period(text: &str) -> Period {
    text.parse().unwrap()
}

pub fn worked(hours: Decimal) -> DayInput {
    DayInput {
        hours,
        meal: true,
        trip_code: Some(TripCode::Zone(TripZone::Z1A)),
        ..Default::default()
    }
}

// --- Day Builders ---

pub fn work_day(date: &str, hours: Decimal) -> DayRecord {
    DayRecord {
        hours,
        meal: true,
        trip_code: Some(TripCode::Zone(TripZone::Z1A)),
        ..DayRecord::empty(d(date))
    }
}

pub fn absent_day(date: &str, absence_type: Option<AbsenceType>) -> DayRecord {
    DayRecord {
        absent: true,
        absence_type,
        ..DayRecord::empty(d(date))
    }
}

// --- Stubs ---

pub fn closed_period_stub(period_text: &str) -> ClosedPeriod {
    ClosedPeriod {
        period: period(period_text),
        totals: ClosureTotals::default(),
        artifact: ArtifactRef {
            file_name: format!("payroll_{}.csv", period_text),
            row_count: 0,
            sha256: String::new(),
        },
        closed_by: "tester".to_string(),
        closed_at: Utc.with_ymd_and_hms(2025, 4, 1, 9, 0, 0).unwrap(),
        note: None,
    }
}

pub fn sample_row(employee_id: &str, normal_hours: Decimal) -> ConsolidatedRow {
    let mut row = ConsolidatedRow::new(employee_id, None);
    row.normal_hours = normal_hours;
    row.days_worked = 5;
    row.meal_count = 5;
    row.trip_days = 5;
    row.trip_codes.insert(TripCode::Zone(TripZone::Z1A), 5);
    row.worksites.insert("CH-01".to_string());
    row
}

/// Artifact generator that keeps artifacts in memory and can be told to fail.
#[derive(Default)]
pub struct StubArtifacts {
    pub fail: AtomicBool,
    pub generated: Mutex<Vec<(Period, usize)>>,
}

impl ArtifactGenerator for StubArtifacts {
    fn generate(
        &self,
        tenant: &str,
        period: Period,
        rows: &[ConsolidatedRow],
    ) -> Result<ArtifactRef, ExportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ExportError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.generated.lock().unwrap().push((period, rows.len()));
        Ok(ArtifactRef {
            file_name: format!("payroll_{}_{}.csv", tenant, period),
            row_count: rows.len(),
            sha256: "0".repeat(64),
        })
    }
}

// --- Environment ---

pub struct TestEnvironment {
    pub store: Arc<InMemoryStore>,
    pub aggregator: Aggregator,
    pub closure: ClosureEngine,
    pub artifacts: Arc<StubArtifacts>,
    pub clock: FixedClock,
}

impl TestEnvironment {
    pub fn add_employee(&self, id: &str, name: &str, kind: EmployeeKind) {
        self.store
            .upsert_employee(
                TENANT,
                Employee {
                    id: id.to_string(),
                    display_name: name.to_string(),
                    kind,
                },
            )
            .unwrap();
    }

    /// Creates a sheet, writes its days, then moves it to `status`.
    pub fn seed_sheet(
        &self,
        employee_id: &str,
        week_text: &str,
        worksite: Option<&str>,
        status: SheetStatus,
        days: Vec<DayRecord>,
    ) -> SheetId {
        let sheet = self
            .store
            .create_sheet(
                TENANT,
                NewSheet {
                    employee_id: employee_id.to_string(),
                    week: week(week_text),
                    worksite: worksite.map(String::from),
                    supervisor_id: "S1".to_string(),
                },
            )
            .unwrap();
        for day in days {
            self.store.upsert_day_record(TENANT, sheet.id, day).unwrap();
        }
        self.store.set_sheet_status(TENANT, sheet.id, status).unwrap();
        sheet.id
    }

    /// A full Monday-to-Friday week at 8/8/8/8/7 on `worksite`.
    pub fn seed_standard_week(&self, employee_id: &str, week_text: &str, worksite: &str) -> SheetId {
        let week_id = week(week_text);
        let days = week_id
            .workdays()
            .into_iter()
            .map(|(day, date)| {
                let hours = crate::calendar::standard_day_hours(day);
                work_day(&date.to_string(), hours)
            })
            .collect();
        self.seed_sheet(employee_id, week_text, Some(worksite), SheetStatus::SentToHr, days)
    }
}

/// In-memory store, aggregator and closure engine with the clock pinned at `now`.
pub fn setup_test_environment(now: &str) -> TestEnvironment {
    let at = NaiveDateTime::parse_from_str(now, "%Y-%m-%d %H:%M:%S").unwrap();
    let clock = FixedClock(Utc.from_utc_datetime(&at));
    let store = Arc::new(InMemoryStore::new());
    let aggregator = Aggregator::new(store.clone(), OvertimePolicy::default());
    let artifacts = Arc::new(StubArtifacts::default());
    let closure = ClosureEngine::new(
        store.clone(),
        aggregator.clone(),
        artifacts.clone(),
        Arc::new(clock),
    );
    TestEnvironment {
        store,
        aggregator,
        closure,
        artifacts,
        clock,
    }
}
