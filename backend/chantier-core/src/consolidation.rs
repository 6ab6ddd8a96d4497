// src/consolidation.rs
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::calendar::{absence_day_hours, standard_day_hours, Period, WeekId, WorkDay};
use crate::model::*;
use crate::store::{StoreError, TimesheetStore};

// --- Filter & Policy ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationFilter {
    pub period: Period,
    #[serde(default)]
    pub worksite: Option<WorksiteCode>,
    #[serde(default)]
    pub supervisor: Option<SupervisorId>,
    #[serde(default)]
    pub employee: Option<EmployeeId>,
    #[serde(default)]
    pub employee_kind: Option<EmployeeKind>,
}

impl ConsolidationFilter {
    pub fn for_period(period: Period) -> Self {
        Self {
            period,
            worksite: None,
            supervisor: None,
            employee: None,
            employee_kind: None,
        }
    }

    /// No worksite, supervisor, employee or kind restriction.
    pub fn is_whole_period(&self) -> bool {
        self.worksite.is_none()
            && self.supervisor.is_none()
            && self.employee.is_none()
            && self.employee_kind.is_none()
    }
}

/// Weekly overtime rule. Worked hours above the week's standard hours are overtime;
/// the first `tier1_ceiling - weekly_normal_hours` of them are paid at 25%, the rest at 50%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OvertimePolicy {
    pub weekly_normal_hours: Decimal,
    pub tier1_ceiling: Decimal,
}

impl Default for OvertimePolicy {
    fn default() -> Self {
        Self {
            weekly_normal_hours: dec!(39),
            tier1_ceiling: dec!(43),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HourSplit {
    pub normal: Decimal,
    pub overtime_25: Decimal,
    pub overtime_50: Decimal,
}

impl OvertimePolicy {
    /// Splits `worked` hours against a `threshold` of normal hours.
    pub fn split(&self, worked: Decimal, threshold: Decimal) -> HourSplit {
        let normal = worked.min(threshold);
        let overtime = (worked - normal).max(Decimal::ZERO);
        let tier1_span = (self.tier1_ceiling - self.weekly_normal_hours).max(Decimal::ZERO);
        let overtime_25 = overtime.min(tier1_span);
        HourSplit {
            normal,
            overtime_25,
            overtime_50: overtime - overtime_25,
        }
    }

    /// Normal-hours threshold for `week` within `period`: the standard hours of the
    /// week's weekdays that fall in the period, scaled so a full week equals
    /// `weekly_normal_hours`.
    pub fn threshold_for(&self, week: WeekId, period: Period) -> Decimal {
        let full_week: Decimal = WorkDay::ALL.iter().map(|d| standard_day_hours(*d)).sum();
        if full_week.is_zero() {
            return Decimal::ZERO;
        }
        let covered: Decimal = week
            .workdays()
            .into_iter()
            .filter(|(_, date)| period.contains(*date))
            .map(|(day, _)| standard_day_hours(day))
            .sum();
        covered * self.weekly_normal_hours / full_week
    }
}

// --- Output Rows ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedRow {
    pub employee_id: EmployeeId,
    pub employee_name: String,
    pub employee_kind: Option<EmployeeKind>,
    pub sheet_count: u32,
    pub days_worked: u32,
    pub normal_hours: Decimal,
    pub overtime_25_hours: Decimal,
    pub overtime_50_hours: Decimal,
    pub absence_days: u32,
    pub absence_hours: BTreeMap<AbsenceType, Decimal>,
    pub weather_loss_hours: Decimal,
    pub meal_count: u32,
    pub trip_days: u32,
    pub personal_trip_days: u32,
    pub trips_to_complete: u32,
    pub trip_codes: BTreeMap<TripCode, u32>,
    pub worksites: BTreeSet<WorksiteCode>,
    pub has_unqualified_absences: bool,
    pub unqualified_absence_dates: Vec<chrono::NaiveDate>,
}

impl ConsolidatedRow {
    pub(crate) fn new(employee_id: &str, employee: Option<&Employee>) -> Self {
        Self {
            employee_id: employee_id.to_string(),
            employee_name: employee
                .map(|e| e.display_name.clone())
                .unwrap_or_else(|| employee_id.to_string()),
            employee_kind: employee.map(|e| e.kind),
            sheet_count: 0,
            days_worked: 0,
            normal_hours: Decimal::ZERO,
            overtime_25_hours: Decimal::ZERO,
            overtime_50_hours: Decimal::ZERO,
            absence_days: 0,
            absence_hours: BTreeMap::new(),
            weather_loss_hours: Decimal::ZERO,
            meal_count: 0,
            trip_days: 0,
            personal_trip_days: 0,
            trips_to_complete: 0,
            trip_codes: BTreeMap::new(),
            worksites: BTreeSet::new(),
            has_unqualified_absences: false,
            unqualified_absence_dates: Vec::new(),
        }
    }

    pub fn worked_hours(&self) -> Decimal {
        self.normal_hours + self.overtime_25_hours + self.overtime_50_hours
    }

    pub fn total_absence_hours(&self) -> Decimal {
        self.absence_hours.values().copied().sum()
    }

    pub fn worksite_count(&self) -> usize {
        self.worksites.len()
    }
}

/// Result of one consolidation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consolidation {
    pub filter: ConsolidationFilter,
    pub rows: Vec<ConsolidatedRow>,
    /// Sheets that contributed, i.e. the sheets a closure would lock.
    pub sheet_ids: Vec<SheetId>,
    /// Days across the period whose trip code is still "to be completed".
    pub trips_to_complete: u32,
}

impl Consolidation {
    pub fn unqualified_rows(&self) -> impl Iterator<Item = &ConsolidatedRow> {
        self.rows.iter().filter(|r| r.has_unqualified_absences)
    }
}

// --- Aggregator ---

/// Per-employee working state while scanning sheets.
#[derive(Default)]
struct EmployeeAccumulator {
    sheets: BTreeSet<SheetId>,
    worked_by_week: BTreeMap<WeekId, Decimal>,
}

/// Builds payroll rows from day records. Pure reads: running it twice over the same
/// data yields the same rows.
#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn TimesheetStore>,
    policy: OvertimePolicy,
}

impl Aggregator {
    pub fn new(store: Arc<dyn TimesheetStore>, policy: OvertimePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> OvertimePolicy {
        self.policy
    }

    pub fn consolidate(
        &self,
        tenant: &str,
        filter: &ConsolidationFilter,
    ) -> Result<Consolidation, StoreError> {
        let period = filter.period;
        info!("Consolidating period {} for tenant {}: {:?}", period, tenant, filter);

        let sheets = self
            .store
            .sheets_overlapping(tenant, period.first_day(), period.last_day())?;

        let mut directory: HashMap<EmployeeId, Option<Employee>> = HashMap::new();
        let mut rows: BTreeMap<EmployeeId, ConsolidatedRow> = BTreeMap::new();
        let mut accumulators: BTreeMap<EmployeeId, EmployeeAccumulator> = BTreeMap::new();
        let mut trips_to_complete = 0u32;

        for sheet in sheets {
            if !sheet.status.is_payroll_ready() {
                debug!("Skipping sheet {} in status {:?}", sheet.id, sheet.status);
                continue;
            }
            if filter.supervisor.as_deref().is_some_and(|s| s != sheet.supervisor_id) {
                continue;
            }
            if filter.employee.as_deref().is_some_and(|e| e != sheet.employee_id) {
                continue;
            }

            if !directory.contains_key(&sheet.employee_id) {
                let employee = self.store.employee(tenant, &sheet.employee_id)?;
                directory.insert(sheet.employee_id.clone(), employee);
            }
            let employee = directory.get(&sheet.employee_id).and_then(Option::as_ref);
            if let Some(kind) = filter.employee_kind {
                if employee.map(|e| e.kind) != Some(kind) {
                    continue;
                }
            }

            let records: Vec<DayRecord> = self
                .store
                .day_records(tenant, sheet.id)?
                .into_iter()
                .filter(|r| period.contains(r.date))
                .filter(|r| match filter.worksite.as_deref() {
                    Some(w) => r.effective_worksite(&sheet) == Some(w),
                    None => true,
                })
                .collect();
            if records.is_empty() {
                continue;
            }

            let row = rows
                .entry(sheet.employee_id.clone())
                .or_insert_with(|| ConsolidatedRow::new(&sheet.employee_id, employee));
            let acc = accumulators.entry(sheet.employee_id.clone()).or_default();
            acc.sheets.insert(sheet.id);

            for record in &records {
                trips_to_complete += accumulate_day(row, acc, &sheet, record)?;
            }
        }

        let mut sheet_ids: BTreeSet<SheetId> = BTreeSet::new();
        for (employee_id, acc) in accumulators {
            let Some(row) = rows.get_mut(&employee_id) else {
                continue;
            };
            for (week, worked) in &acc.worked_by_week {
                let threshold = self.policy.threshold_for(*week, period);
                let split = self.policy.split(*worked, threshold);
                add_hours(&mut row.normal_hours, split.normal, &employee_id)?;
                add_hours(&mut row.overtime_25_hours, split.overtime_25, &employee_id)?;
                add_hours(&mut row.overtime_50_hours, split.overtime_50, &employee_id)?;
            }
            row.sheet_count = acc.sheets.len() as u32;
            sheet_ids.extend(acc.sheets);
        }

        let rows: Vec<ConsolidatedRow> = rows.into_values().collect();
        info!(
            "Consolidated {} employee(s) from {} sheet(s) for {}; {} trip(s) to complete",
            rows.len(),
            sheet_ids.len(),
            period,
            trips_to_complete
        );
        Ok(Consolidation {
            filter: filter.clone(),
            rows,
            sheet_ids: sheet_ids.into_iter().collect(),
            trips_to_complete,
        })
    }
}

fn add_hours(total: &mut Decimal, hours: Decimal, employee_id: &str) -> Result<(), StoreError> {
    *total = total
        .checked_add(hours)
        .ok_or_else(|| StoreError::HoursOverflow {
            employee_id: employee_id.to_string(),
        })?;
    Ok(())
}

/// Folds one day into the employee's row. Returns 1 when the day's trip is still to complete.
fn accumulate_day(
    row: &mut ConsolidatedRow,
    acc: &mut EmployeeAccumulator,
    sheet: &WeeklySheet,
    record: &DayRecord,
) -> Result<u32, StoreError> {
    let week = WeekId::containing(record.date);
    let employee_id = sheet.employee_id.as_str();

    if let Some(site) = record.effective_worksite(sheet) {
        row.worksites.insert(site.to_string());
    }
    add_hours(&mut row.weather_loss_hours, record.weather_hours, employee_id)?;

    if record.absent {
        row.absence_days += 1;
        let kind = record.absence_type.unwrap_or(AbsenceType::ToClassify);
        if !kind.is_qualified() {
            row.has_unqualified_absences = true;
            row.unqualified_absence_dates.push(record.date);
        }
        // Weather hours on the record already count this day.
        let weather_counted =
            kind == AbsenceType::WeatherStoppage && !record.weather_hours.is_zero();
        if !weather_counted {
            let bucket = row.absence_hours.entry(kind).or_insert(Decimal::ZERO);
            add_hours(bucket, absence_day_hours(record.date), employee_id)?;
        }
    } else {
        let worked = acc.worked_by_week.entry(week).or_insert(Decimal::ZERO);
        add_hours(worked, record.hours, employee_id)?;
        if !record.hours.is_zero() {
            row.days_worked += 1;
        }
    }
    if record.meal {
        row.meal_count += 1;
    }
    match record.trip_code {
        Some(code) => {
            *row.trip_codes.entry(code).or_insert(0) += 1;
            match code {
                TripCode::Zone(_) => row.trip_days += 1,
                TripCode::Personal => row.personal_trip_days += 1,
                TripCode::ToBeCompleted => {
                    row.trips_to_complete += 1;
                    return Ok(1);
                }
            }
        }
        None => {}
    }
    Ok(0)
}
