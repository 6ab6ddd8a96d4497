// src/closure.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::calendar::Period;
use crate::consolidation::{Aggregator, ConsolidatedRow, Consolidation, ConsolidationFilter};
use crate::export::{ArtifactGenerator, ArtifactRef, ExportError};
use crate::model::TripCode;
use crate::store::{StoreError, TimesheetStore};

// --- Clock ---

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// --- Archive ---

/// Aggregate figures frozen into the archive when a period closes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClosureTotals {
    pub employee_count: usize,
    pub sheet_count: usize,
    pub normal_hours: Decimal,
    pub overtime_25_hours: Decimal,
    pub overtime_50_hours: Decimal,
    pub absence_days: u32,
    pub weather_loss_hours: Decimal,
    pub meal_count: u32,
    pub trip_days: u32,
    pub trip_codes: BTreeMap<TripCode, u32>,
    pub worksite_count: usize,
}

impl ClosureTotals {
    pub fn from_consolidation(consolidation: &Consolidation) -> Self {
        let mut totals = ClosureTotals {
            employee_count: consolidation.rows.len(),
            sheet_count: consolidation.sheet_ids.len(),
            ..Default::default()
        };
        let mut worksites = BTreeSet::new();
        for row in &consolidation.rows {
            totals.normal_hours += row.normal_hours;
            totals.overtime_25_hours += row.overtime_25_hours;
            totals.overtime_50_hours += row.overtime_50_hours;
            totals.absence_days += row.absence_days;
            totals.weather_loss_hours += row.weather_loss_hours;
            totals.meal_count += row.meal_count;
            totals.trip_days += row.trip_days;
            for (code, count) in &row.trip_codes {
                *totals.trip_codes.entry(*code).or_insert(0) += count;
            }
            worksites.extend(row.worksites.iter().cloned());
        }
        totals.worksite_count = worksites.len();
        totals
    }
}

/// Immutable record of a closed period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedPeriod {
    pub period: Period,
    pub totals: ClosureTotals,
    pub artifact: ArtifactRef,
    pub closed_by: String,
    pub closed_at: DateTime<Utc>,
    pub note: Option<String>,
}

// --- Errors ---

/// Blocking conditions found while validating a period for closure.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClosureRejection {
    /// Display names of employees with absences still "to classify".
    pub unqualified_employees: Vec<String>,
    pub trips_to_complete: u32,
}

impl ClosureRejection {
    pub fn from_consolidation(consolidation: &Consolidation) -> Option<Self> {
        let unqualified_employees: Vec<String> = consolidation
            .unqualified_rows()
            .map(|r| r.employee_name.clone())
            .collect();
        if unqualified_employees.is_empty() && consolidation.trips_to_complete == 0 {
            return None;
        }
        Some(Self {
            unqualified_employees,
            trips_to_complete: consolidation.trips_to_complete,
        })
    }
}

impl fmt::Display for ClosureRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reasons = Vec::new();
        if !self.unqualified_employees.is_empty() {
            reasons.push(format!(
                "unqualified absences for {}",
                self.unqualified_employees.join(", ")
            ));
        }
        if self.trips_to_complete > 0 {
            reasons.push(format!("{} trip code(s) still to complete", self.trips_to_complete));
        }
        write!(f, "{}", reasons.join("; "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureStep {
    Validate,
    GenerateArtifact,
    PersistArchive,
    LockSheets,
}

impl fmt::Display for ClosureStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClosureStep::Validate => "validate",
            ClosureStep::GenerateArtifact => "generate artifact",
            ClosureStep::PersistArchive => "persist archive",
            ClosureStep::LockSheets => "lock sheets",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum StepFailure {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Artifact(#[from] ExportError),
}

#[derive(Error, Debug)]
pub enum ClosureError {
    #[error("Period cannot be closed: {0}")]
    Rejected(ClosureRejection),
    #[error("Period {period} is already closed")]
    AlreadyClosed { period: Period },
    #[error("Period {period} closes as a whole; worksite, supervisor, employee and kind filters only narrow the preview")]
    PartialScope { period: Period },
    #[error("Closure failed at step '{step}': {source}")]
    StepFailed {
        step: ClosureStep,
        #[source]
        source: StepFailure,
    },
}

impl ClosureError {
    fn at(step: ClosureStep, source: impl Into<StepFailure>) -> Self {
        ClosureError::StepFailed {
            step,
            source: source.into(),
        }
    }

    pub fn failed_step(&self) -> Option<ClosureStep> {
        match self {
            ClosureError::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Nothing was written, so the same call can be repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClosureError::StepFailed {
                source: StepFailure::Store(e),
                ..
            } => e.is_retryable(),
            ClosureError::StepFailed {
                source: StepFailure::Artifact(_),
                ..
            } => true,
            _ => false,
        }
    }
}

// --- Closure Engine ---

/// Drives a period from open to closed. Closed is terminal.
#[derive(Clone)]
pub struct ClosureEngine {
    store: Arc<dyn TimesheetStore>,
    aggregator: Aggregator,
    artifacts: Arc<dyn ArtifactGenerator>,
    clock: Arc<dyn Clock>,
}

impl ClosureEngine {
    pub fn new(
        store: Arc<dyn TimesheetStore>,
        aggregator: Aggregator,
        artifacts: Arc<dyn ArtifactGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            aggregator,
            artifacts,
            clock,
        }
    }

    /// Fresh consolidation plus whatever would block closing it.
    pub fn check(
        &self,
        tenant: &str,
        filter: &ConsolidationFilter,
    ) -> Result<(Consolidation, Option<ClosureRejection>), StoreError> {
        let consolidation = self.aggregator.consolidate(tenant, filter)?;
        let rejection = ClosureRejection::from_consolidation(&consolidation);
        Ok((consolidation, rejection))
    }

    pub fn can_close(&self, tenant: &str, filter: &ConsolidationFilter) -> Result<bool, StoreError> {
        let (_, rejection) = self.check(tenant, filter)?;
        Ok(rejection.is_none())
    }

    pub fn archive(&self, tenant: &str, period: Period) -> Result<Option<ClosedPeriod>, StoreError> {
        self.store.closed_period(tenant, period)
    }

    /// Validates, writes the payroll artifact, then archives and locks in one store call.
    /// Any failure leaves the period open with no archive and no locked sheet.
    ///
    /// The archive covers the whole period, so a filter narrowed beyond the period
    /// is refused.
    pub fn close(
        &self,
        tenant: &str,
        filter: &ConsolidationFilter,
        closed_by: &str,
        note: Option<String>,
    ) -> Result<ClosedPeriod, ClosureError> {
        let period = filter.period;
        info!("Closing period {} for tenant {} (by {})", period, tenant, closed_by);
        if !filter.is_whole_period() {
            warn!("Refusing partial closure of {}: {:?}", period, filter);
            return Err(ClosureError::PartialScope { period });
        }

        let existing = self
            .store
            .closed_period(tenant, period)
            .map_err(|e| ClosureError::at(ClosureStep::Validate, e))?;
        if existing.is_some() {
            warn!("Period {} for tenant {} is already closed", period, tenant);
            return Err(ClosureError::AlreadyClosed { period });
        }

        let (consolidation, rejection) = self
            .check(tenant, filter)
            .map_err(|e| ClosureError::at(ClosureStep::Validate, e))?;
        if let Some(rejection) = rejection {
            warn!("Closure of {} rejected: {}", period, rejection);
            return Err(ClosureError::Rejected(rejection));
        }

        let totals = ClosureTotals::from_consolidation(&consolidation);
        let artifact = self
            .artifacts
            .generate(tenant, period, &consolidation.rows)
            .map_err(|e| {
                error!("Artifact generation failed for {}: {}", period, e);
                ClosureError::at(ClosureStep::GenerateArtifact, e)
            })?;

        let archive = ClosedPeriod {
            period,
            totals,
            artifact,
            closed_by: closed_by.to_string(),
            closed_at: self.clock.now(),
            note,
        };
        self.store
            .archive_and_lock(tenant, archive.clone(), &consolidation.sheet_ids)
            .map_err(|e| {
                error!("Archiving {} failed: {}", period, e);
                match e {
                    StoreError::PeriodAlreadyClosed { period } => {
                        ClosureError::AlreadyClosed { period }
                    }
                    StoreError::SheetNotFound { .. } | StoreError::SheetLocked { .. } => {
                        ClosureError::at(ClosureStep::LockSheets, e)
                    }
                    other => ClosureError::at(ClosureStep::PersistArchive, other),
                }
            })?;

        info!(
            "Period {} closed for tenant {}: {} employees, {} sheets locked",
            period, tenant, archive.totals.employee_count, archive.totals.sheet_count
        );
        Ok(archive)
    }
}

/// Rows of a period that hold up closure, for display next to the rejection.
pub fn blocking_rows(rows: &[ConsolidatedRow]) -> Vec<&ConsolidatedRow> {
    rows.iter()
        .filter(|r| r.has_unqualified_absences || r.trips_to_complete > 0)
        .collect()
}
