// src/vehicle.rs
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::calendar::WeekId;
use crate::model::{DriverShift, EmployeeId, Plate, VehicleDayEntry};
use crate::store::{StoreError, TimesheetStore};

static PLATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]+(-[A-Z0-9]+)*$").expect("plate pattern is valid"));

// --- Error Types ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VehicleError {
    #[error("Invalid plate '{0}'")]
    InvalidPlate(String),
    #[error("Day {index} is out of range ({len} slots)")]
    SlotOutOfRange { index: usize, len: usize },
    #[error("{date} is a personal-vehicle day")]
    PersonalDay { date: NaiveDate },
    #[error("Plate {plate} is already used by {holder} on {date}")]
    PlateInUse {
        plate: Plate,
        date: NaiveDate,
        holder: EmployeeId,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Upper-cases, strips whitespace and checks the plate shape.
pub fn normalize_plate(raw: &str) -> Result<Plate, VehicleError> {
    let plate: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    if PLATE_PATTERN.is_match(&plate) {
        Ok(plate)
    } else {
        Err(VehicleError::InvalidPlate(raw.to_string()))
    }
}

// --- Week Slots ---

/// One day of a worker's week as far as vehicles are concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleSlot {
    pub date: NaiveDate,
    pub plate: Option<Plate>,
    /// Worker came with their own vehicle; never propagated, never checked.
    #[serde(default)]
    pub personal: bool,
}

impl VehicleSlot {
    pub fn new(date: NaiveDate, plate: Option<&str>) -> Self {
        Self {
            date,
            plate: plate.map(String::from),
            personal: false,
        }
    }

    pub fn personal(date: NaiveDate) -> Self {
        Self {
            date,
            plate: None,
            personal: true,
        }
    }
}

/// Selections other workers have made in the current session but not saved yet.
/// Short-lived and supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct PendingSelections {
    by_date: HashMap<NaiveDate, HashMap<Plate, EmployeeId>>,
}

impl PendingSelections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, date: NaiveDate, plate: &str, employee: &str) {
        let day = self.by_date.entry(date).or_default();
        day.retain(|_, holder| holder != employee);
        day.insert(plate.to_string(), employee.to_string());
    }

    pub fn release(&mut self, date: NaiveDate, employee: &str) {
        if let Some(day) = self.by_date.get_mut(&date) {
            day.retain(|_, holder| holder != employee);
        }
    }

    pub fn holder(&self, date: NaiveDate, plate: &str) -> Option<&EmployeeId> {
        self.by_date.get(&date).and_then(|day| day.get(plate))
    }
}

/// What a plate check looks at: saved entries for the week and unsaved selections.
#[derive(Debug, Clone, Copy)]
pub struct CollisionContext<'a> {
    pub persisted: &'a [VehicleDayEntry],
    pub pending: &'a PendingSelections,
}

impl<'a> CollisionContext<'a> {
    /// The other employee holding `plate` on `date`, if any. Saved entries are checked first.
    pub fn holder(&self, date: NaiveDate, plate: &str, employee: &str) -> Option<EmployeeId> {
        let saved = self
            .persisted
            .iter()
            .filter(|e| e.date == date && e.plate == plate)
            .find_map(|e| e.held_by_other(employee).cloned());
        saved.or_else(|| {
            self.pending
                .holder(date, plate)
                .filter(|holder| holder.as_str() != employee)
                .cloned()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlateChoice {
    pub plate: Plate,
    pub held_by: Option<EmployeeId>,
}

impl PlateChoice {
    pub fn is_selectable(&self) -> bool {
        self.held_by.is_none()
    }
}

/// Every fleet plate for a date with its availability, so a selector can disable
/// taken plates instead of catching the clash later.
pub fn plate_choices(
    fleet: &[Plate],
    date: NaiveDate,
    employee: &str,
    ctx: CollisionContext<'_>,
) -> Vec<PlateChoice> {
    fleet
        .iter()
        .map(|plate| PlateChoice {
            plate: plate.clone(),
            held_by: ctx.holder(date, plate, employee),
        })
        .collect()
}

/// Sets `plate` on slot `day_index` and carries it forward.
///
/// A later slot takes the new plate while, before this edit, it was empty or matched
/// the plate of the slot before it. The first slot that differed from its predecessor
/// stops the run, and so does a slot where the plate is held by somebody else.
/// Earlier slots are never touched and personal-vehicle slots are skipped over.
pub fn set_vehicle_for_day(
    employee: &str,
    slots: &[VehicleSlot],
    day_index: usize,
    plate: &str,
    ctx: CollisionContext<'_>,
) -> Result<Vec<VehicleSlot>, VehicleError> {
    let plate = normalize_plate(plate)?;
    let target = slots.get(day_index).ok_or(VehicleError::SlotOutOfRange {
        index: day_index,
        len: slots.len(),
    })?;
    if target.personal {
        return Err(VehicleError::PersonalDay { date: target.date });
    }
    if let Some(holder) = ctx.holder(target.date, &plate, employee) {
        return Err(VehicleError::PlateInUse {
            plate,
            date: target.date,
            holder,
        });
    }

    let mut updated = slots.to_vec();
    updated[day_index].plate = Some(plate.clone());

    let mut previous = slots[day_index].plate.as_deref();
    for (index, slot) in slots.iter().enumerate().skip(day_index + 1) {
        if slot.personal {
            continue;
        }
        let before = slot.plate.as_deref();
        if before.is_some() && before != previous {
            debug!("Propagation barrier at {} ({:?} after {:?})", slot.date, before, previous);
            break;
        }
        if let Some(holder) = ctx.holder(slot.date, &plate, employee) {
            debug!("Propagation stops at {}: {} held by {}", slot.date, plate, holder);
            break;
        }
        updated[index].plate = Some(plate.clone());
        previous = before;
    }
    Ok(updated)
}

// --- Persistence ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedDay {
    pub date: NaiveDate,
    pub plate: Plate,
    pub holder: EmployeeId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleSaveReport {
    pub saved: Vec<NaiveDate>,
    /// Days where the shift no longer has a fleet plate and the previous one was freed.
    pub released: Vec<NaiveDate>,
    pub rejected: Vec<RejectedDay>,
}

#[derive(Clone)]
pub struct VehicleLedger {
    store: Arc<dyn TimesheetStore>,
}

impl VehicleLedger {
    pub fn new(store: Arc<dyn TimesheetStore>) -> Self {
        Self { store }
    }

    pub fn entries_for_week(
        &self,
        tenant: &str,
        week: WeekId,
    ) -> Result<Vec<VehicleDayEntry>, VehicleError> {
        Ok(self.store.vehicle_entries_for_week(tenant, week)?)
    }

    /// Persists one shift for each plated slot. A day whose plate was taken in the
    /// meantime is rejected on its own; the other days are still saved. Empty and
    /// personal-vehicle slots give back whatever plate the shift held.
    pub fn save_week(
        &self,
        tenant: &str,
        employee: &str,
        shift: DriverShift,
        slots: &[VehicleSlot],
    ) -> Result<VehicleSaveReport, VehicleError> {
        let mut report = VehicleSaveReport::default();
        for slot in slots {
            let plate = match slot.plate.as_deref() {
                Some(plate) if !slot.personal => plate,
                _ => {
                    if self
                        .store
                        .release_vehicle_shift(tenant, slot.date, shift, employee)?
                    {
                        report.released.push(slot.date);
                    }
                    continue;
                }
            };
            match self
                .store
                .upsert_vehicle_shift(tenant, slot.date, plate, shift, employee)
            {
                Ok(_) => report.saved.push(slot.date),
                Err(StoreError::PlateHeld { plate, date, holder }) => {
                    warn!(
                        "Vehicle collision at save: Plate={}, Date={}, Emp={}, Holder={}",
                        plate, date, employee, holder
                    );
                    report.rejected.push(RejectedDay { date, plate, holder });
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!(
            "Saved {:?} vehicle shift for Emp={}: {} day(s), {} released, {} rejected",
            shift,
            employee,
            report.saved.len(),
            report.released.len(),
            report.rejected.len()
        );
        Ok(report)
    }
}
