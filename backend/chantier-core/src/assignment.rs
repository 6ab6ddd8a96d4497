// src/assignment.rs
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::calendar::WeekId;
use crate::model::{Assignment, DayAssignment, EmployeeId};
use crate::store::{StoreError, TimesheetStore};

/// Works out which days of a week a supervisor is responsible for.
///
/// Nothing here is cached: ownership is read fresh from the store on every call,
/// so a mid-week reassignment takes effect on the next save.
#[derive(Clone)]
pub struct AssignmentResolver {
    store: Arc<dyn TimesheetStore>,
}

impl AssignmentResolver {
    pub fn new(store: Arc<dyn TimesheetStore>) -> Self {
        Self { store }
    }

    /// Dates of `week` owned by `supervisor` for `employee`.
    ///
    /// `worksite` is `None` for an employee spread over several worksites that week;
    /// such days are owned only through day-level overrides.
    pub fn resolve_owned_days(
        &self,
        tenant: &str,
        supervisor: &str,
        employee: &str,
        worksite: Option<&str>,
        week: WeekId,
    ) -> Result<BTreeSet<NaiveDate>, StoreError> {
        let overrides: Vec<DayAssignment> = self
            .store
            .day_assignments_between(tenant, week.monday(), week.friday())?
            .into_iter()
            .filter(|o| o.employee_id == employee)
            .collect();

        let mine: BTreeSet<NaiveDate> = overrides
            .iter()
            .filter(|o| o.supervisor_id == supervisor)
            .filter(|o| worksite.is_none() || o.worksite.as_deref() == worksite)
            .map(|o| o.date)
            .collect();

        if !mine.is_empty() {
            debug!(
                "Ownership from day overrides: Sup={}, Emp={}, Week={}, Days={:?}",
                supervisor, employee, week, mine
            );
            return Ok(mine);
        }
        if worksite.is_none() {
            debug!(
                "No day override for multi-worksite employee: Sup={}, Emp={}, Week={}",
                supervisor, employee, week
            );
            return Ok(BTreeSet::new());
        }

        // Fallback: the whole week, minus days an override places with another
        // supervisor or on another worksite, and days a range assignment gives
        // exclusively to someone else.
        let claimed_elsewhere: BTreeSet<NaiveDate> = overrides
            .iter()
            .filter(|o| {
                o.supervisor_id != supervisor
                    || o.worksite.as_deref().is_some_and(|w| Some(w) != worksite)
            })
            .map(|o| o.date)
            .collect();
        let ranges = self.store.assignments_for_employee(tenant, employee)?;

        let owned: BTreeSet<NaiveDate> = week
            .workdays()
            .into_iter()
            .map(|(_, date)| date)
            .filter(|date| !claimed_elsewhere.contains(date))
            .filter(|date| range_allows(&ranges, supervisor, *date))
            .collect();
        debug!(
            "Ownership from weekly fallback: Sup={}, Emp={}, Week={}, Days={}",
            supervisor,
            employee,
            week,
            owned.len()
        );
        Ok(owned)
    }

    /// Employees a supervisor owns at least one day of during `week`.
    pub fn team_for_week(
        &self,
        tenant: &str,
        supervisor: &str,
        week: WeekId,
    ) -> Result<BTreeSet<EmployeeId>, StoreError> {
        let mut team: BTreeSet<EmployeeId> = self
            .store
            .assignments_for_supervisor(tenant, supervisor)?
            .into_iter()
            .filter(|a| a.overlaps(week.monday(), week.friday()))
            .map(|a| a.employee_id)
            .collect();
        team.extend(
            self.store
                .day_assignments_between(tenant, week.monday(), week.friday())?
                .into_iter()
                .filter(|o| o.supervisor_id == supervisor)
                .map(|o| o.employee_id),
        );
        Ok(team)
    }
}

/// A date is open to `supervisor` unless range assignments cover it and none is theirs.
fn range_allows(ranges: &[Assignment], supervisor: &str, date: NaiveDate) -> bool {
    let mut covering = ranges.iter().filter(|a| a.covers(date)).peekable();
    covering.peek().is_none() || covering.any(|a| a.supervisor_id == supervisor)
}
