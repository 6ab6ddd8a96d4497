// src/normalizer.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::assignment::AssignmentResolver;
use crate::calendar::{standard_day_hours, Period, WeekId, WorkDay};
use crate::model::*;
use crate::store::{StoreError, TimesheetStore};

// --- Error Types ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Employee {employee_id} already has a worksite-bound sheet for {week}; refusing a second sheet without worksite")]
    DuplicateUnboundSheet { employee_id: EmployeeId, week: WeekId },
    #[error("Sheet {sheet_id} cannot move from {from:?} to {to:?}")]
    IllegalTransition {
        sheet_id: SheetId,
        from: SheetStatus,
        to: SheetStatus,
    },
    #[error("Invalid {field} on {date}: {value} is outside 0 to 24")]
    InvalidHours {
        date: NaiveDate,
        field: &'static str,
        value: Decimal,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

// --- Inputs ---

/// One day of the supervisor's form for one employee.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DayInput {
    pub hours: Decimal,
    pub absent: bool,
    pub absence_type: Option<AbsenceType>,
    pub trip_code: Option<TripCode>,
    pub meal: bool,
    pub weather_hours: Decimal,
    pub worksite_of_day: Option<WorksiteRef>,
    pub note: Option<String>,
}

impl DayInput {
    /// Hours on an absent day are ignored, so only weather hours are checked there.
    fn check_hours(&self, date: NaiveDate) -> Result<(), NormalizeError> {
        let mut fields = vec![("weather_hours", self.weather_hours)];
        if !self.absent {
            fields.push(("hours", self.hours));
        }
        match fields.into_iter().find(|(_, value)| !is_valid_day_hours(*value)) {
            Some((field, value)) => Err(NormalizeError::InvalidHours { date, field, value }),
            None => Ok(()),
        }
    }

    fn into_record(self, date: NaiveDate) -> DayRecord {
        DayRecord {
            date,
            // Absent days never carry worked hours.
            hours: if self.absent { Decimal::ZERO } else { self.hours },
            weather_hours: self.weather_hours,
            trip_code: self.trip_code,
            meal: self.meal,
            worksite_of_day: self.worksite_of_day,
            note: self.note,
            absent: self.absent,
            absence_type: if self.absent { self.absence_type } else { None },
        }
    }
}

pub type WeekInput = BTreeMap<WorkDay, DayInput>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeWeekInput {
    pub employee_id: EmployeeId,
    pub days: WeekInput,
}

/// Who is saving, and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveContext {
    pub tenant: TenantId,
    pub supervisor_id: SupervisorId,
    /// Worksite the supervisor is entering hours for, when there is one.
    #[serde(default)]
    pub worksite: Option<WorksiteCode>,
    /// The employee's sheet is resolved per day rather than bound to one worksite.
    #[serde(default)]
    pub per_day_worksites: bool,
    /// Seed and re-normalize standard hours (week rollover).
    #[serde(default)]
    pub normalize: bool,
}

// --- Outputs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No worksite could be found for a new sheet; the employee is not assigned yet.
    UnresolvableWorksite,
    /// The supervisor owns none of the submitted days.
    NoOwnedDays,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpsertOutcome {
    Saved {
        sheet_id: SheetId,
        created: bool,
        days_written: usize,
    },
    Skipped {
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEmployee {
    pub employee_id: EmployeeId,
    pub reason: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub saved: Vec<EmployeeId>,
    pub skipped: Vec<(EmployeeId, SkipReason)>,
    pub failed: Vec<FailedEmployee>,
}

// --- Cache Invalidation ---

/// Read caches downstream of day records (dashboards, previews) that must be
/// dropped after a save.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate_week(&self, tenant: &str, employee_id: &str, week: WeekId);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogInvalidator;

impl CacheInvalidator for LogInvalidator {
    fn invalidate_week(&self, tenant: &str, employee_id: &str, week: WeekId) {
        info!(
            "Cache INVALIDATED for day records: Tenant={}, Emp={}, Week={}",
            tenant, employee_id, week
        );
    }
}

// --- Normalizer ---

enum SheetResolution {
    Existing(WeeklySheet),
    Create(Option<WorksiteCode>),
    Skip(SkipReason),
}

#[derive(Clone)]
pub struct DayNormalizer {
    store: Arc<dyn TimesheetStore>,
    resolver: AssignmentResolver,
    invalidator: Arc<dyn CacheInvalidator>,
}

impl DayNormalizer {
    pub fn new(store: Arc<dyn TimesheetStore>, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        Self {
            resolver: AssignmentResolver::new(store.clone()),
            store,
            invalidator,
        }
    }

    /// Saves a single day of one employee's week.
    pub fn upsert_day(
        &self,
        ctx: &SaveContext,
        employee_id: &str,
        week: WeekId,
        day: WorkDay,
        input: DayInput,
    ) -> Result<UpsertOutcome, NormalizeError> {
        let mut days = WeekInput::new();
        days.insert(day, input);
        self.upsert_week(ctx, employee_id, week, days)
    }

    /// Saves the submitted days of one employee's week, creating the sheet if needed.
    pub fn upsert_week(
        &self,
        ctx: &SaveContext,
        employee_id: &str,
        week: WeekId,
        days: WeekInput,
    ) -> Result<UpsertOutcome, NormalizeError> {
        let tenant = ctx.tenant.as_str();
        debug!(
            "Upserting week: Tenant={}, Sup={}, Emp={}, Week={}, Days={}",
            tenant,
            ctx.supervisor_id,
            employee_id,
            week,
            days.len()
        );

        for (day, input) in &days {
            input.check_hours(week.date_of(*day))?;
        }
        let frozen = self.closed_dates(tenant, week)?;
        if let Some(date) = days
            .keys()
            .map(|day| week.date_of(*day))
            .find(|date| frozen.contains(date))
        {
            warn!(
                "Refusing input for closed period: Emp={}, Date={}",
                employee_id, date
            );
            return Err(StoreError::PeriodAlreadyClosed {
                period: Period::containing(date),
            }
            .into());
        }

        let (sheet, created) = match self.resolve_sheet(ctx, employee_id, week, &days)? {
            SheetResolution::Existing(sheet) => (sheet, false),
            SheetResolution::Create(worksite) => {
                let sheet = self.store.create_sheet(
                    tenant,
                    NewSheet {
                        employee_id: employee_id.to_string(),
                        week,
                        worksite,
                        supervisor_id: ctx.supervisor_id.clone(),
                    },
                )?;
                (sheet, true)
            }
            SheetResolution::Skip(reason) => {
                if reason == SkipReason::UnresolvableWorksite {
                    warn!(
                        "Nothing to save yet, no worksite resolvable: Emp={}, Week={}",
                        employee_id, week
                    );
                }
                return Ok(UpsertOutcome::Skipped { reason });
            }
        };

        let mut owned = self.resolver.resolve_owned_days(
            tenant,
            &ctx.supervisor_id,
            employee_id,
            sheet.worksite.as_deref(),
            week,
        )?;
        owned.retain(|date| !frozen.contains(date));
        if owned.is_empty() {
            info!(
                "Supervisor {} owns no day of Emp={} in Week={}",
                ctx.supervisor_id, employee_id, week
            );
            return Ok(UpsertOutcome::Skipped {
                reason: SkipReason::NoOwnedDays,
            });
        }

        let existing: BTreeMap<NaiveDate, DayRecord> = self
            .store
            .day_records(tenant, sheet.id)?
            .into_iter()
            .map(|r| (r.date, r))
            .collect();
        let to_write = build_week(week, &existing, days, &owned, created, ctx.normalize);

        for record in to_write.values() {
            self.store
                .upsert_day_record(tenant, sheet.id, record.clone())?;
        }
        self.invalidator.invalidate_week(tenant, employee_id, week);

        info!(
            "Saved {} day(s) on sheet {}: Emp={}, Week={}, Created={}",
            to_write.len(),
            sheet.id,
            employee_id,
            week,
            created
        );
        Ok(UpsertOutcome::Saved {
            sheet_id: sheet.id,
            created,
            days_written: to_write.len(),
        })
    }

    /// Saves a supervisor's whole week view. A failure on one employee never stops the others.
    pub fn upsert_batch(
        &self,
        ctx: &SaveContext,
        week: WeekId,
        entries: Vec<EmployeeWeekInput>,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for entry in entries {
            let employee_id = entry.employee_id;
            match self.upsert_week(ctx, &employee_id, week, entry.days) {
                Ok(UpsertOutcome::Saved { .. }) => report.saved.push(employee_id),
                Ok(UpsertOutcome::Skipped { reason }) => report.skipped.push((employee_id, reason)),
                Err(e) => {
                    error!(
                        "Failed to save week for Emp={}, Week={}: {}",
                        employee_id, week, e
                    );
                    let retryable = matches!(&e, NormalizeError::Store(s) if s.is_retryable());
                    report.failed.push(FailedEmployee {
                        employee_id,
                        reason: e.to_string(),
                        retryable,
                    });
                }
            }
        }
        info!(
            "Batch for Sup={}, Week={}: {} saved, {} skipped, {} failed",
            ctx.supervisor_id,
            week,
            report.saved.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    // --- Sheet Lifecycle ---

    pub fn advance_sheet_status(
        &self,
        tenant: &str,
        sheet_id: SheetId,
        target: SheetStatus,
    ) -> Result<WeeklySheet, NormalizeError> {
        let sheet = self
            .store
            .sheet(tenant, sheet_id)?
            .ok_or(StoreError::SheetNotFound { sheet_id })?;
        if !sheet.status.can_advance_to(target) {
            return Err(NormalizeError::IllegalTransition {
                sheet_id,
                from: sheet.status,
                to: target,
            });
        }
        info!(
            "Sheet {} moves {:?} -> {:?} (Emp={}, Week={})",
            sheet_id, sheet.status, target, sheet.employee_id, sheet.week
        );
        Ok(self.store.set_sheet_status(tenant, sheet_id, target)?)
    }

    // --- Helpers ---

    /// Dates of `week` that belong to an already closed period.
    fn closed_dates(&self, tenant: &str, week: WeekId) -> Result<BTreeSet<NaiveDate>, StoreError> {
        let mut frozen = BTreeSet::new();
        let periods: BTreeSet<Period> = week
            .workdays()
            .iter()
            .map(|(_, date)| Period::containing(*date))
            .collect();
        for period in periods {
            if self.store.closed_period(tenant, period)?.is_some() {
                frozen.extend(
                    week.workdays()
                        .iter()
                        .map(|(_, date)| *date)
                        .filter(|date| period.contains(*date)),
                );
            }
        }
        Ok(frozen)
    }

    fn resolve_sheet(
        &self,
        ctx: &SaveContext,
        employee_id: &str,
        week: WeekId,
        days: &WeekInput,
    ) -> Result<SheetResolution, NormalizeError> {
        let existing = self.store.sheets_for_week(&ctx.tenant, employee_id, week)?;

        if ctx.per_day_worksites {
            if let Some(sheet) = existing.iter().find(|s| s.worksite.is_none()) {
                return Ok(SheetResolution::Existing(sheet.clone()));
            }
            if existing.iter().any(|s| s.worksite.is_some()) {
                warn!(
                    "Refusing unbound sheet next to a worksite-bound one: Emp={}, Week={}",
                    employee_id, week
                );
                return Err(NormalizeError::DuplicateUnboundSheet {
                    employee_id: employee_id.to_string(),
                    week,
                });
            }
            return Ok(SheetResolution::Create(None));
        }

        let worksite = ctx.worksite.clone().or_else(|| {
            days.values()
                .find_map(|d| d.worksite_of_day.as_ref().map(|w| w.code.clone()))
        });
        match worksite {
            Some(code) => Ok(existing
                .into_iter()
                .find(|s| s.worksite.as_deref() == Some(code.as_str()))
                .map(SheetResolution::Existing)
                .unwrap_or(SheetResolution::Create(Some(code)))),
            None => {
                // Only an existing sheet can take input without a worksite.
                let mut existing = existing;
                if existing.len() == 1 {
                    Ok(SheetResolution::Existing(existing.remove(0)))
                } else {
                    Ok(SheetResolution::Skip(SkipReason::UnresolvableWorksite))
                }
            }
        }
    }
}

/// Computes the records to write for one sheet-week.
///
/// Only owned days are returned. A new sheet under normalization gets the standard
/// pattern on days the input leaves out; a week that still reads 7h on all five
/// days is rewritten to the standard pattern, keeping meal and trip choices.
fn build_week(
    week: WeekId,
    existing: &BTreeMap<NaiveDate, DayRecord>,
    input: WeekInput,
    owned: &BTreeSet<NaiveDate>,
    created: bool,
    normalize: bool,
) -> BTreeMap<NaiveDate, DayRecord> {
    let mut working = existing.clone();
    let mut touched: BTreeSet<NaiveDate> = BTreeSet::new();

    if created && normalize {
        for (day, date) in week.workdays() {
            if owned.contains(&date) && !input.contains_key(&day) {
                working.insert(date, DayRecord::seeded(day, date));
                touched.insert(date);
            }
        }
    }

    for (day, day_input) in input {
        let date = week.date_of(day);
        if !owned.contains(&date) {
            debug!("Skipping {} ({:?}): not owned by this supervisor", date, day);
            continue;
        }
        working.insert(date, day_input.into_record(date));
        touched.insert(date);
    }

    if normalize {
        let all_copied = week
            .workdays()
            .iter()
            .all(|(_, date)| working.get(date).map_or(false, DayRecord::looks_copied));
        if all_copied {
            debug!("Week {} reads 7h on every day, applying standard pattern", week);
            for (day, date) in week.workdays() {
                if let Some(record) = working.get_mut(&date) {
                    record.hours = standard_day_hours(day);
                    touched.insert(date);
                }
            }
        }
    }

    working
        .into_iter()
        .filter(|(date, _)| touched.contains(date) && owned.contains(date))
        .map(|(date, mut record)| {
            if record.absent {
                record.hours = Decimal::ZERO;
            }
            (date, record)
        })
        .collect()
}

#[cfg(test)]
mod normalizer_tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::test_support::{closed_period_stub, d, week, worked};
    use rust_decimal_macros::dec;

    fn setup() -> (Arc<InMemoryStore>, DayNormalizer) {
        let store = Arc::new(InMemoryStore::new());
        let normalizer = DayNormalizer::new(store.clone(), Arc::new(LogInvalidator));
        (store, normalizer)
    }

    fn ctx(worksite: Option<&str>, normalize: bool) -> SaveContext {
        SaveContext {
            tenant: "acme".into(),
            supervisor_id: "S1".into(),
            worksite: worksite.map(String::from),
            per_day_worksites: false,
            normalize,
        }
    }

    fn hours_by_date(store: &InMemoryStore, sheet_id: SheetId) -> Vec<(NaiveDate, Decimal)> {
        store
            .day_records("acme", sheet_id)
            .unwrap()
            .into_iter()
            .map(|r| (r.date, r.hours))
            .collect()
    }

    fn saved_sheet(outcome: UpsertOutcome) -> SheetId {
        match outcome {
            UpsertOutcome::Saved { sheet_id, .. } => sheet_id,
            other => panic!("expected a save, got {:?}", other),
        }
    }

    #[test]
    fn new_sheet_with_normalization_is_seeded_with_standard_week() {
        let (store, normalizer) = setup();
        let outcome = normalizer
            .upsert_week(&ctx(Some("CH-01"), true), "E1", week("2025-W11"), WeekInput::new())
            .unwrap();
        let sheet_id = saved_sheet(outcome);

        let days = store.day_records("acme", sheet_id).unwrap();
        assert_eq!(days.len(), 5);
        assert_eq!(
            days.iter().map(|r| r.hours).collect::<Vec<_>>(),
            vec![dec!(8), dec!(8), dec!(8), dec!(8), dec!(7)]
        );
        assert!(days.iter().all(|r| r.meal));
        assert!(days
            .iter()
            .all(|r| r.trip_code == Some(TripCode::ToBeCompleted)));
    }

    #[test]
    fn new_sheet_without_normalization_is_not_seeded() {
        let (store, normalizer) = setup();
        let outcome = normalizer
            .upsert_day(
                &ctx(Some("CH-01"), false),
                "E1",
                week("2025-W11"),
                WorkDay::Tuesday,
                worked(dec!(9)),
            )
            .unwrap();
        let sheet_id = saved_sheet(outcome);
        assert_eq!(
            hours_by_date(&store, sheet_id),
            vec![(d("2025-03-11"), dec!(9))]
        );
    }

    #[test]
    fn copied_seven_hour_week_is_renormalized_keeping_meal_and_trip() {
        let (store, normalizer) = setup();
        let mut days = WeekInput::new();
        for day in WorkDay::ALL {
            let mut input = worked(dec!(7));
            input.meal = day != WorkDay::Wednesday;
            input.trip_code = Some(TripCode::Zone(TripZone::Z2));
            days.insert(day, input);
        }
        let sheet_id = saved_sheet(
            normalizer
                .upsert_week(&ctx(Some("CH-01"), true), "E1", week("2025-W11"), days)
                .unwrap(),
        );

        let records = store.day_records("acme", sheet_id).unwrap();
        assert_eq!(
            records.iter().map(|r| r.hours).collect::<Vec<_>>(),
            vec![dec!(8), dec!(8), dec!(8), dec!(8), dec!(7)]
        );
        assert!(!records[2].meal);
        assert!(records[0].meal);
        assert!(records
            .iter()
            .all(|r| r.trip_code == Some(TripCode::Zone(TripZone::Z2))));
    }

    #[test]
    fn week_with_one_adjusted_day_is_left_alone() {
        let (store, normalizer) = setup();
        let mut days = WeekInput::new();
        for day in WorkDay::ALL {
            days.insert(day, worked(dec!(7)));
        }
        days.insert(WorkDay::Monday, worked(dec!(6)));
        let sheet_id = saved_sheet(
            normalizer
                .upsert_week(&ctx(Some("CH-01"), true), "E1", week("2025-W11"), days)
                .unwrap(),
        );
        let hours: Vec<Decimal> = hours_by_date(&store, sheet_id)
            .into_iter()
            .map(|(_, h)| h)
            .collect();
        assert_eq!(hours, vec![dec!(6), dec!(7), dec!(7), dec!(7), dec!(7)]);
    }

    #[test]
    fn absent_days_are_coerced_to_zero_hours() {
        let (store, normalizer) = setup();
        let input = DayInput {
            hours: dec!(8),
            absent: true,
            absence_type: Some(AbsenceType::Sickness),
            ..Default::default()
        };
        let sheet_id = saved_sheet(
            normalizer
                .upsert_day(
                    &ctx(Some("CH-01"), false),
                    "E1",
                    week("2025-W11"),
                    WorkDay::Friday,
                    input,
                )
                .unwrap(),
        );
        let records = store.day_records("acme", sheet_id).unwrap();
        assert_eq!(records[0].hours, Decimal::ZERO);
        assert_eq!(records[0].absence_type, Some(AbsenceType::Sickness));
    }

    #[test]
    fn existing_day_is_updated_in_place() {
        let (store, normalizer) = setup();
        let c = ctx(Some("CH-01"), false);
        normalizer
            .upsert_day(&c, "E1", week("2025-W11"), WorkDay::Monday, worked(dec!(8)))
            .unwrap();
        let sheet_id = saved_sheet(
            normalizer
                .upsert_day(&c, "E1", week("2025-W11"), WorkDay::Monday, worked(dec!(10)))
                .unwrap(),
        );
        assert_eq!(
            hours_by_date(&store, sheet_id),
            vec![(d("2025-03-10"), dec!(10))]
        );
        assert_eq!(
            store.sheets_for_week("acme", "E1", week("2025-W11")).unwrap().len(),
            1
        );
    }

    #[test]
    fn worksite_falls_back_to_first_day_with_explicit_worksite() {
        let (store, normalizer) = setup();
        let mut days = WeekInput::new();
        days.insert(WorkDay::Monday, worked(dec!(8)));
        let mut wed = worked(dec!(8));
        wed.worksite_of_day = Some(WorksiteRef {
            code: "CH-07".into(),
            city: Some("Lyon".into()),
        });
        days.insert(WorkDay::Wednesday, wed);
        normalizer
            .upsert_week(&ctx(None, false), "E1", week("2025-W11"), days)
            .unwrap();
        let sheets = store.sheets_for_week("acme", "E1", week("2025-W11")).unwrap();
        assert_eq!(sheets[0].worksite.as_deref(), Some("CH-07"));
    }

    #[test]
    fn unresolvable_worksite_is_a_skip_not_an_error() {
        let (store, normalizer) = setup();
        let outcome = normalizer
            .upsert_day(&ctx(None, false), "E1", week("2025-W11"), WorkDay::Monday, worked(dec!(8)))
            .unwrap();
        assert_eq!(
            outcome,
            UpsertOutcome::Skipped {
                reason: SkipReason::UnresolvableWorksite
            }
        );
        assert!(store
            .sheets_for_week("acme", "E1", week("2025-W11"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn no_unbound_sheet_next_to_a_worksite_bound_one() {
        let (store, normalizer) = setup();
        normalizer
            .upsert_day(
                &ctx(Some("CH-01"), false),
                "E1",
                week("2025-W11"),
                WorkDay::Monday,
                worked(dec!(8)),
            )
            .unwrap();

        let mut per_day = ctx(None, true);
        per_day.per_day_worksites = true;
        let err = normalizer
            .upsert_week(&per_day, "E1", week("2025-W11"), WeekInput::new())
            .unwrap_err();
        assert!(matches!(err, NormalizeError::DuplicateUnboundSheet { .. }));
        assert_eq!(
            store.sheets_for_week("acme", "E1", week("2025-W11")).unwrap().len(),
            1
        );
    }

    #[test]
    fn days_not_owned_by_the_supervisor_are_not_written() {
        let (store, normalizer) = setup();
        store
            .add_day_assignment(
                "acme",
                DayAssignment {
                    employee_id: "E1".into(),
                    supervisor_id: "S2".into(),
                    worksite: Some("CH-02".into()),
                    date: d("2025-03-12"),
                },
            )
            .unwrap();
        let mut days = WeekInput::new();
        days.insert(WorkDay::Tuesday, worked(dec!(8)));
        days.insert(WorkDay::Wednesday, worked(dec!(8)));
        let sheet_id = saved_sheet(
            normalizer
                .upsert_week(&ctx(Some("CH-01"), false), "E1", week("2025-W11"), days)
                .unwrap(),
        );
        assert_eq!(
            hours_by_date(&store, sheet_id),
            vec![(d("2025-03-11"), dec!(8))]
        );
    }

    #[test]
    fn batch_isolates_failures_per_employee() {
        let (_store, normalizer) = setup();
        let c = ctx(Some("CH-01"), false);
        let entry = |id: &str, hours| EmployeeWeekInput {
            employee_id: id.to_string(),
            days: [(WorkDay::Tuesday, worked(hours))].into_iter().collect(),
        };
        let report = normalizer.upsert_batch(
            &c,
            week("2025-W11"),
            vec![entry("E1", dec!(8)), entry("E2", dec!(-3)), entry("E3", dec!(8))],
        );

        assert_eq!(report.saved, vec!["E1", "E3"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].employee_id, "E2");
        assert!(!report.failed[0].retryable);
    }

    #[test]
    fn out_of_range_hours_are_refused_before_anything_is_written() {
        let (store, normalizer) = setup();
        let c = ctx(Some("CH-01"), false);
        let mut days = WeekInput::new();
        days.insert(WorkDay::Monday, worked(Decimal::MAX));
        days.insert(WorkDay::Tuesday, worked(Decimal::MAX));
        let err = normalizer
            .upsert_week(&c, "E1", week("2025-W11"), days)
            .unwrap_err();
        assert_eq!(
            err,
            NormalizeError::InvalidHours {
                date: d("2025-03-10"),
                field: "hours",
                value: Decimal::MAX,
            }
        );
        assert!(store.sheets_for_week("acme", "E1", week("2025-W11")).unwrap().is_empty());

        let mut stormy = worked(dec!(8));
        stormy.weather_hours = dec!(-1);
        assert!(matches!(
            normalizer.upsert_day(&c, "E1", week("2025-W11"), WorkDay::Monday, stormy),
            Err(NormalizeError::InvalidHours { field: "weather_hours", .. })
        ));

        // The store is still usable afterwards.
        normalizer
            .upsert_day(&c, "E2", week("2025-W11"), WorkDay::Monday, worked(dec!(8)))
            .unwrap();
    }

    #[test]
    fn hours_on_an_absent_day_are_ignored_not_refused() {
        let (store, normalizer) = setup();
        let input = DayInput {
            absent: true,
            absence_type: Some(AbsenceType::Sickness),
            hours: dec!(-5),
            ..Default::default()
        };
        let sheet_id = saved_sheet(
            normalizer
                .upsert_day(&ctx(Some("CH-01"), false), "E1", week("2025-W11"), WorkDay::Monday, input)
                .unwrap(),
        );
        assert_eq!(hours_by_date(&store, sheet_id), vec![(d("2025-03-10"), Decimal::ZERO)]);
    }

    #[test]
    fn closed_period_takes_no_new_input() {
        let (store, normalizer) = setup();
        store
            .archive_and_lock("acme", closed_period_stub("2025-03"), &[])
            .unwrap();

        let err = normalizer
            .upsert_day(
                &ctx(Some("CH-02"), false),
                "E1",
                week("2025-W11"),
                WorkDay::Monday,
                worked(dec!(10)),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            NormalizeError::Store(StoreError::PeriodAlreadyClosed { .. })
        ));
        assert!(store.sheets_for_week("acme", "E1", week("2025-W11")).unwrap().is_empty());

        // W14 straddles March and April: only the April days are seeded.
        let sheet_id = saved_sheet(
            normalizer
                .upsert_week(&ctx(Some("CH-01"), true), "E1", week("2025-W14"), WeekInput::new())
                .unwrap(),
        );
        let dates: Vec<NaiveDate> = hours_by_date(&store, sheet_id)
            .into_iter()
            .map(|(date, _)| date)
            .collect();
        assert_eq!(dates.len(), 4);
        assert_eq!(dates[0], d("2025-04-01"));

        let err = normalizer
            .upsert_day(
                &ctx(Some("CH-01"), false),
                "E1",
                week("2025-W14"),
                WorkDay::Monday,
                worked(dec!(8)),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            NormalizeError::Store(StoreError::PeriodAlreadyClosed { .. })
        ));
    }

    #[test]
    fn sheet_lifecycle_rejects_illegal_moves() {
        let (_store, normalizer) = setup();
        let sheet_id = saved_sheet(
            normalizer
                .upsert_day(
                    &ctx(Some("CH-01"), false),
                    "E1",
                    week("2025-W11"),
                    WorkDay::Monday,
                    worked(dec!(8)),
                )
                .unwrap(),
        );
        let err = normalizer
            .advance_sheet_status("acme", sheet_id, SheetStatus::SentToHr)
            .unwrap_err();
        assert!(matches!(err, NormalizeError::IllegalTransition { .. }));

        normalizer
            .advance_sheet_status("acme", sheet_id, SheetStatus::SupervisorValidated)
            .unwrap();
        let sheet = normalizer
            .advance_sheet_status("acme", sheet_id, SheetStatus::SentToHr)
            .unwrap();
        assert_eq!(sheet.status, SheetStatus::SentToHr);
    }

    #[derive(Default)]
    struct RecordingInvalidator {
        calls: std::sync::Mutex<Vec<(String, WeekId)>>,
    }

    impl CacheInvalidator for RecordingInvalidator {
        fn invalidate_week(&self, _tenant: &str, employee_id: &str, week: WeekId) {
            self.calls
                .lock()
                .unwrap()
                .push((employee_id.to_string(), week));
        }
    }

    #[test]
    fn saves_invalidate_the_employee_week_and_skips_do_not() {
        let store = Arc::new(InMemoryStore::new());
        let invalidator = Arc::new(RecordingInvalidator::default());
        let normalizer = DayNormalizer::new(store, invalidator.clone());

        normalizer
            .upsert_day(
                &ctx(Some("CH-01"), false),
                "E1",
                week("2025-W11"),
                WorkDay::Monday,
                worked(dec!(8)),
            )
            .unwrap();
        let skipped = normalizer
            .upsert_week(&ctx(None, false), "E2", week("2025-W11"), WeekInput::new())
            .unwrap();
        assert!(matches!(skipped, UpsertOutcome::Skipped { .. }));

        assert_eq!(
            *invalidator.calls.lock().unwrap(),
            vec![("E1".to_string(), week("2025-W11"))]
        );
    }
}
