// src/store.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::calendar::{Period, WeekId};
use crate::closure::ClosedPeriod;
use crate::model::*;

// --- Error Types ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Sheet {sheet_id} belongs to a closed period and can no longer be edited")]
    SheetLocked { sheet_id: SheetId },
    #[error("Sheet {sheet_id} not found")]
    SheetNotFound { sheet_id: SheetId },
    #[error("Period {period} is already closed")]
    PeriodAlreadyClosed { period: Period },
    #[error("Plate {plate} is already driven by {holder} on {date}")]
    PlateHeld {
        plate: Plate,
        date: NaiveDate,
        holder: EmployeeId,
    },
    #[error("Hours out of range on {date}: worked and weather hours must lie between 0 and 24")]
    InvalidHours { date: NaiveDate },
    #[error("Hour total of {employee_id} overflowed")]
    HoursOverflow { employee_id: EmployeeId },
    #[error("Storage lock poisoned")]
    LockPoisoned,
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same idempotent call may succeed. A poisoned lock stays
    /// poisoned, so it is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

// --- Store Interface ---

/// Persistence collaborator. Every call is scoped to one tenant and every write
/// is an upsert on a natural key, so retries are safe.
pub trait TimesheetStore: Send + Sync {
    fn upsert_employee(&self, tenant: &str, employee: Employee) -> Result<(), StoreError>;
    fn employee(&self, tenant: &str, employee_id: &str) -> Result<Option<Employee>, StoreError>;

    fn sheet(&self, tenant: &str, sheet_id: SheetId) -> Result<Option<WeeklySheet>, StoreError>;
    fn sheets_for_week(
        &self,
        tenant: &str,
        employee_id: &str,
        week: WeekId,
    ) -> Result<Vec<WeeklySheet>, StoreError>;
    /// Sheets whose Monday-to-Friday span overlaps `[from, to]`.
    fn sheets_overlapping(
        &self,
        tenant: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<WeeklySheet>, StoreError>;
    /// Refused once every weekday of the sheet's week lies in a closed period.
    fn create_sheet(&self, tenant: &str, new_sheet: NewSheet) -> Result<WeeklySheet, StoreError>;
    /// Refused for closed sheets and for sheets holding a day of a closed period.
    fn set_sheet_status(
        &self,
        tenant: &str,
        sheet_id: SheetId,
        status: SheetStatus,
    ) -> Result<WeeklySheet, StoreError>;

    fn day_records(&self, tenant: &str, sheet_id: SheetId) -> Result<Vec<DayRecord>, StoreError>;
    /// Keyed by (sheet, date). Rejected once the sheet is closed, when the date
    /// belongs to a closed period, or when its hours do not fit in a day.
    fn upsert_day_record(
        &self,
        tenant: &str,
        sheet_id: SheetId,
        record: DayRecord,
    ) -> Result<(), StoreError>;

    fn add_assignment(&self, tenant: &str, assignment: Assignment) -> Result<(), StoreError>;
    fn assignments_for_employee(
        &self,
        tenant: &str,
        employee_id: &str,
    ) -> Result<Vec<Assignment>, StoreError>;
    fn assignments_for_supervisor(
        &self,
        tenant: &str,
        supervisor_id: &str,
    ) -> Result<Vec<Assignment>, StoreError>;
    fn add_day_assignment(&self, tenant: &str, day: DayAssignment) -> Result<(), StoreError>;
    fn day_assignments_between(
        &self,
        tenant: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DayAssignment>, StoreError>;

    fn vehicle_entries_for_week(
        &self,
        tenant: &str,
        week: WeekId,
    ) -> Result<Vec<VehicleDayEntry>, StoreError>;
    /// Fills one shift of the (date, plate) entry, merging with the other shift.
    /// The driver's previous plate for that shift and date is released.
    /// Fails with `PlateHeld` when a different driver already holds the plate that day.
    fn upsert_vehicle_shift(
        &self,
        tenant: &str,
        date: NaiveDate,
        plate: &str,
        shift: DriverShift,
        driver: &str,
    ) -> Result<VehicleDayEntry, StoreError>;
    /// Drops `driver` from `shift` on whatever plate they held that date.
    /// Returns whether a plate was released.
    fn release_vehicle_shift(
        &self,
        tenant: &str,
        date: NaiveDate,
        shift: DriverShift,
        driver: &str,
    ) -> Result<bool, StoreError>;

    fn closed_period(&self, tenant: &str, period: Period)
        -> Result<Option<ClosedPeriod>, StoreError>;
    /// Writes the archive and marks every listed sheet `Closed` as one unit:
    /// either both happen or neither does.
    fn archive_and_lock(
        &self,
        tenant: &str,
        archive: ClosedPeriod,
        sheet_ids: &[SheetId],
    ) -> Result<(), StoreError>;
}

// --- In-Memory Store ---

type VehicleMap = BTreeMap<(TenantId, NaiveDate, Plate), VehicleDayEntry>;

type SheetKey = (TenantId, SheetId);
type ArchiveMap = HashMap<(TenantId, Period), ClosedPeriod>;

#[derive(Clone, Default)]
pub struct InMemoryStore {
    employees: Arc<Mutex<HashMap<(TenantId, EmployeeId), Employee>>>,
    sheets: Arc<Mutex<BTreeMap<SheetKey, WeeklySheet>>>,
    day_records: Arc<Mutex<HashMap<SheetKey, BTreeMap<NaiveDate, DayRecord>>>>,
    assignments: Arc<Mutex<HashMap<TenantId, Vec<Assignment>>>>,
    day_assignments: Arc<Mutex<HashMap<TenantId, Vec<DayAssignment>>>>,
    vehicle_entries: Arc<Mutex<VehicleMap>>,
    // Lock order: closed_periods, then sheets, then day_records.
    closed_periods: Arc<Mutex<ArchiveMap>>,
    next_sheet_id: Arc<AtomicU64>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex.lock().map_err(|_| StoreError::LockPoisoned)
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(tenant: &str, sheet_id: SheetId) -> SheetKey {
        (tenant.to_string(), sheet_id)
    }
}

/// The closed period `date` falls in, if any.
fn closed_period_of(archives: &ArchiveMap, tenant: &str, date: NaiveDate) -> Option<Period> {
    let period = Period::containing(date);
    archives
        .contains_key(&(tenant.to_string(), period))
        .then_some(period)
}

/// Clears `driver` from `shift` on every plate of `date` except `keep`, dropping
/// entries left without any driver.
fn release_shift(
    entries: &mut VehicleMap,
    tenant: &str,
    date: NaiveDate,
    shift: DriverShift,
    driver: &str,
    keep: Option<&str>,
) -> bool {
    let mut released = false;
    entries.retain(|(t, day, plate), entry| {
        if t != tenant || *day != date || Some(plate.as_str()) == keep {
            return true;
        }
        if entry.clear_driver(shift, driver) {
            debug!(
                "Released {:?} shift on {} for Emp={}, Date={}",
                shift, plate, driver, date
            );
            released = true;
        }
        !entry.is_unused()
    });
    released
}

impl TimesheetStore for InMemoryStore {
    fn upsert_employee(&self, tenant: &str, employee: Employee) -> Result<(), StoreError> {
        debug!("Upserting employee: Tenant={}, Emp={}", tenant, employee.id);
        lock(&self.employees)?.insert((tenant.to_string(), employee.id.clone()), employee);
        Ok(())
    }

    fn employee(&self, tenant: &str, employee_id: &str) -> Result<Option<Employee>, StoreError> {
        Ok(lock(&self.employees)?
            .get(&(tenant.to_string(), employee_id.to_string()))
            .cloned())
    }

    fn sheet(&self, tenant: &str, sheet_id: SheetId) -> Result<Option<WeeklySheet>, StoreError> {
        Ok(lock(&self.sheets)?.get(&Self::key(tenant, sheet_id)).cloned())
    }

    fn sheets_for_week(
        &self,
        tenant: &str,
        employee_id: &str,
        week: WeekId,
    ) -> Result<Vec<WeeklySheet>, StoreError> {
        Ok(lock(&self.sheets)?
            .iter()
            .filter(|((t, _), s)| t == tenant && s.employee_id == employee_id && s.week == week)
            .map(|(_, s)| s.clone())
            .collect())
    }

    fn sheets_overlapping(
        &self,
        tenant: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<WeeklySheet>, StoreError> {
        Ok(lock(&self.sheets)?
            .iter()
            .filter(|((t, _), s)| t == tenant && s.week.monday() <= to && s.week.friday() >= from)
            .map(|(_, s)| s.clone())
            .collect())
    }

    fn create_sheet(&self, tenant: &str, new_sheet: NewSheet) -> Result<WeeklySheet, StoreError> {
        let archives = lock(&self.closed_periods)?;
        let closed: Vec<Period> = new_sheet
            .week
            .workdays()
            .iter()
            .filter_map(|(_, date)| closed_period_of(&archives, tenant, *date))
            .collect();
        if closed.len() == new_sheet.week.workdays().len() {
            warn!(
                "Refused new sheet in closed period: Tenant={}, Emp={}, Week={}",
                tenant, new_sheet.employee_id, new_sheet.week
            );
            return Err(StoreError::PeriodAlreadyClosed { period: closed[0] });
        }

        let id = self.next_sheet_id.fetch_add(1, Ordering::SeqCst) + 1;
        let sheet = WeeklySheet {
            id,
            employee_id: new_sheet.employee_id,
            week: new_sheet.week,
            worksite: new_sheet.worksite,
            supervisor_id: new_sheet.supervisor_id,
            status: SheetStatus::Draft,
            total_hours: Default::default(),
        };
        info!(
            "Created sheet {}: Tenant={}, Emp={}, Week={}, Worksite={:?}",
            id, tenant, sheet.employee_id, sheet.week, sheet.worksite
        );
        lock(&self.sheets)?.insert(Self::key(tenant, id), sheet.clone());
        Ok(sheet)
    }

    fn set_sheet_status(
        &self,
        tenant: &str,
        sheet_id: SheetId,
        status: SheetStatus,
    ) -> Result<WeeklySheet, StoreError> {
        let archives = lock(&self.closed_periods)?;
        let mut sheets = lock(&self.sheets)?;
        let key = Self::key(tenant, sheet_id);
        let sheet = sheets
            .get_mut(&key)
            .ok_or(StoreError::SheetNotFound { sheet_id })?;
        if sheet.status.is_locked() {
            return Err(StoreError::SheetLocked { sheet_id });
        }
        let frozen = lock(&self.day_records)?
            .get(&key)
            .and_then(|days| {
                days.keys()
                    .find_map(|date| closed_period_of(&archives, tenant, *date))
            });
        if let Some(period) = frozen {
            warn!(
                "Refused status change on sheet {} with days in closed period {}",
                sheet_id, period
            );
            return Err(StoreError::PeriodAlreadyClosed { period });
        }
        sheet.status = status;
        Ok(sheet.clone())
    }

    fn day_records(&self, tenant: &str, sheet_id: SheetId) -> Result<Vec<DayRecord>, StoreError> {
        Ok(lock(&self.day_records)?
            .get(&Self::key(tenant, sheet_id))
            .map(|days| days.values().cloned().collect())
            .unwrap_or_default())
    }

    fn upsert_day_record(
        &self,
        tenant: &str,
        sheet_id: SheetId,
        record: DayRecord,
    ) -> Result<(), StoreError> {
        if !record.has_valid_hours() {
            return Err(StoreError::InvalidHours { date: record.date });
        }
        let key = Self::key(tenant, sheet_id);
        let archives = lock(&self.closed_periods)?;
        let mut sheets = lock(&self.sheets)?;
        let sheet = sheets
            .get_mut(&key)
            .ok_or(StoreError::SheetNotFound { sheet_id })?;
        if sheet.status.is_locked() {
            warn!(
                "Rejected edit on closed sheet {}: Emp={}, Date={}",
                sheet_id, sheet.employee_id, record.date
            );
            return Err(StoreError::SheetLocked { sheet_id });
        }
        if let Some(period) = closed_period_of(&archives, tenant, record.date) {
            warn!(
                "Rejected edit in closed period {}: Sheet={}, Emp={}, Date={}",
                period, sheet_id, sheet.employee_id, record.date
            );
            return Err(StoreError::PeriodAlreadyClosed { period });
        }

        let mut records = lock(&self.day_records)?;
        let days = records.entry(key).or_default();
        // Keep the sheet's hour total in step with its days.
        let total = days
            .values()
            .filter(|d| d.date != record.date)
            .chain(std::iter::once(&record))
            .filter(|d| !d.absent)
            .try_fold(Decimal::ZERO, |acc, d| acc.checked_add(d.hours))
            .ok_or_else(|| StoreError::HoursOverflow {
                employee_id: sheet.employee_id.clone(),
            })?;
        days.insert(record.date, record);
        sheet.total_hours = total;
        Ok(())
    }

    fn add_assignment(&self, tenant: &str, assignment: Assignment) -> Result<(), StoreError> {
        lock(&self.assignments)?
            .entry(tenant.to_string())
            .or_default()
            .push(assignment);
        Ok(())
    }

    fn assignments_for_employee(
        &self,
        tenant: &str,
        employee_id: &str,
    ) -> Result<Vec<Assignment>, StoreError> {
        Ok(lock(&self.assignments)?
            .get(tenant)
            .map(|all| {
                all.iter()
                    .filter(|a| a.employee_id == employee_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn assignments_for_supervisor(
        &self,
        tenant: &str,
        supervisor_id: &str,
    ) -> Result<Vec<Assignment>, StoreError> {
        Ok(lock(&self.assignments)?
            .get(tenant)
            .map(|all| {
                all.iter()
                    .filter(|a| a.supervisor_id == supervisor_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn add_day_assignment(&self, tenant: &str, day: DayAssignment) -> Result<(), StoreError> {
        let mut all = lock(&self.day_assignments)?;
        let rows = all.entry(tenant.to_string()).or_default();
        if !rows.contains(&day) {
            rows.push(day);
        }
        Ok(())
    }

    fn day_assignments_between(
        &self,
        tenant: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DayAssignment>, StoreError> {
        Ok(lock(&self.day_assignments)?
            .get(tenant)
            .map(|all| {
                all.iter()
                    .filter(|a| a.date >= from && a.date <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn vehicle_entries_for_week(
        &self,
        tenant: &str,
        week: WeekId,
    ) -> Result<Vec<VehicleDayEntry>, StoreError> {
        Ok(lock(&self.vehicle_entries)?
            .iter()
            .filter(|((t, _, _), e)| t == tenant && e.week == week)
            .map(|(_, e)| e.clone())
            .collect())
    }

    fn upsert_vehicle_shift(
        &self,
        tenant: &str,
        date: NaiveDate,
        plate: &str,
        shift: DriverShift,
        driver: &str,
    ) -> Result<VehicleDayEntry, StoreError> {
        let mut entries = lock(&self.vehicle_entries)?;
        let key = (tenant.to_string(), date, plate.to_string());
        if let Some(holder) = entries.get(&key).and_then(|e| e.held_by_other(driver)) {
            return Err(StoreError::PlateHeld {
                plate: plate.to_string(),
                date,
                holder: holder.clone(),
            });
        }

        release_shift(&mut entries, tenant, date, shift, driver, Some(plate));
        let entry = entries
            .entry(key)
            .or_insert_with(|| VehicleDayEntry::new(date, plate));
        entry.set_driver(shift, driver);
        Ok(entry.clone())
    }

    fn release_vehicle_shift(
        &self,
        tenant: &str,
        date: NaiveDate,
        shift: DriverShift,
        driver: &str,
    ) -> Result<bool, StoreError> {
        let mut entries = lock(&self.vehicle_entries)?;
        Ok(release_shift(&mut entries, tenant, date, shift, driver, None))
    }

    fn closed_period(
        &self,
        tenant: &str,
        period: Period,
    ) -> Result<Option<ClosedPeriod>, StoreError> {
        Ok(lock(&self.closed_periods)?
            .get(&(tenant.to_string(), period))
            .cloned())
    }

    fn archive_and_lock(
        &self,
        tenant: &str,
        archive: ClosedPeriod,
        sheet_ids: &[SheetId],
    ) -> Result<(), StoreError> {
        let mut archives = lock(&self.closed_periods)?;
        let mut sheets = lock(&self.sheets)?;

        let archive_key = (tenant.to_string(), archive.period);
        if archives.contains_key(&archive_key) {
            return Err(StoreError::PeriodAlreadyClosed {
                period: archive.period,
            });
        }
        if let Some(missing) = sheet_ids
            .iter()
            .find(|id| !sheets.contains_key(&Self::key(tenant, **id)))
        {
            return Err(StoreError::SheetNotFound { sheet_id: *missing });
        }

        for id in sheet_ids {
            if let Some(sheet) = sheets.get_mut(&Self::key(tenant, *id)) {
                sheet.status = SheetStatus::Closed;
            }
        }
        info!(
            "Archived period {} for tenant {} and locked {} sheets",
            archive.period,
            tenant,
            sheet_ids.len()
        );
        archives.insert(archive_key, archive);
        Ok(())
    }
}
