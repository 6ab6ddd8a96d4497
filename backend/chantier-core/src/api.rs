// src/api.rs
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::calendar::{CalendarError, Period, WeekId};
use crate::closure::{
    blocking_rows, ClosedPeriod, ClosureEngine, ClosureError, ClosureRejection, Clock,
};
use crate::consolidation::{Aggregator, ConsolidatedRow, Consolidation, ConsolidationFilter, OvertimePolicy};
use crate::export::ArtifactGenerator;
use crate::model::*;
use crate::normalizer::{
    BatchReport, DayNormalizer, EmployeeWeekInput, LogInvalidator, NormalizeError, SaveContext,
};
use crate::store::{StoreError, TimesheetStore};
use crate::vehicle::{normalize_plate, VehicleError, VehicleLedger, VehicleSaveReport, VehicleSlot};

// --- Application State ---

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TimesheetStore>,
    pub normalizer: DayNormalizer,
    pub aggregator: Aggregator,
    pub closure: ClosureEngine,
    pub vehicles: VehicleLedger,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TimesheetStore>,
        policy: OvertimePolicy,
        artifacts: Arc<dyn ArtifactGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let aggregator = Aggregator::new(store.clone(), policy);
        Self {
            normalizer: DayNormalizer::new(store.clone(), Arc::new(LogInvalidator)),
            vehicles: VehicleLedger::new(store.clone()),
            closure: ClosureEngine::new(store.clone(), aggregator.clone(), artifacts, clock),
            aggregator,
            store,
        }
    }
}

// --- Error Handling ---

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    Calendar(#[from] CalendarError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Closure(#[from] ClosureError),
    #[error(transparent)]
    Vehicle(#[from] VehicleError),
    #[error("Internal error: {0}")]
    Internal(String),
}

fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::SheetNotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::InvalidHours { .. } => StatusCode::BAD_REQUEST,
        StoreError::SheetLocked { .. }
        | StoreError::PeriodAlreadyClosed { .. }
        | StoreError::PlateHeld { .. } => StatusCode::CONFLICT,
        StoreError::HoursOverflow { .. } | StoreError::LockPoisoned => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, details) = match &self {
            AppError::Calendar(_) => (StatusCode::BAD_REQUEST, None),
            AppError::Normalize(NormalizeError::Store(e)) | AppError::Store(e) => {
                (store_status(e), None)
            }
            AppError::Normalize(NormalizeError::InvalidHours { .. }) => {
                (StatusCode::BAD_REQUEST, None)
            }
            AppError::Normalize(_) => (StatusCode::CONFLICT, None),
            AppError::Vehicle(VehicleError::Store(e)) => (store_status(e), None),
            AppError::Vehicle(VehicleError::PlateInUse { .. }) => (StatusCode::CONFLICT, None),
            AppError::Vehicle(_) => (StatusCode::BAD_REQUEST, None),
            AppError::Closure(ClosureError::Rejected(rejection)) => (
                StatusCode::CONFLICT,
                serde_json::to_value(rejection).ok(),
            ),
            AppError::Closure(ClosureError::AlreadyClosed { .. }) => (StatusCode::CONFLICT, None),
            AppError::Closure(ClosureError::PartialScope { .. }) => (StatusCode::BAD_REQUEST, None),
            AppError::Closure(e @ ClosureError::StepFailed { step, .. }) => {
                let status = if e.is_retryable() {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                (status, Some(json!({ "failed_step": step })))
            }
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        if status.is_server_error() {
            error!("Request failed: {}", message);
        } else {
            warn!("Request rejected: {}", message);
        }

        let mut body = json!({ "error": message });
        if let Some(details) = details {
            body["details"] = details;
        }
        (status, Json(body)).into_response()
    }
}

// --- Request & Response Bodies ---

#[derive(Debug, Deserialize)]
pub struct SaveWeekRequest {
    pub supervisor_id: SupervisorId,
    #[serde(default)]
    pub worksite: Option<WorksiteCode>,
    #[serde(default)]
    pub per_day_worksites: bool,
    #[serde(default)]
    pub normalize: bool,
    pub employees: Vec<EmployeeWeekInput>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FilterQuery {
    pub worksite: Option<WorksiteCode>,
    pub supervisor: Option<SupervisorId>,
    pub employee: Option<EmployeeId>,
    pub employee_kind: Option<EmployeeKind>,
}

impl FilterQuery {
    fn into_filter(self, period: Period) -> ConsolidationFilter {
        ConsolidationFilter {
            period,
            worksite: self.worksite,
            supervisor: self.supervisor,
            employee: self.employee,
            employee_kind: self.employee_kind,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CloseRequest {
    pub closed_by: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(flatten)]
    pub filter: FilterQuery,
}

#[derive(Debug, Deserialize)]
pub struct SaveVehiclesRequest {
    pub shift: DriverShift,
    pub slots: Vec<VehicleSlot>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: SheetStatus,
}

#[derive(Debug, Deserialize)]
pub struct EmployeeRequest {
    pub display_name: String,
    pub kind: EmployeeKind,
}

#[derive(Debug, Serialize)]
pub struct ClosureStatus {
    pub period: Period,
    pub can_close: bool,
    pub rejection: Option<ClosureRejection>,
    pub blocking_rows: Vec<ConsolidatedRow>,
    pub archive: Option<ClosedPeriod>,
}

// --- Handlers ---

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn save_week_days(
    State(state): State<AppState>,
    Path((tenant, week)): Path<(String, String)>,
    Json(request): Json<SaveWeekRequest>,
) -> Result<Json<BatchReport>, AppError> {
    let week: WeekId = week.parse()?;
    info!(
        "Saving {} employee week(s): Tenant={}, Sup={}, Week={}",
        request.employees.len(),
        tenant,
        request.supervisor_id,
        week
    );
    let ctx = SaveContext {
        tenant,
        supervisor_id: request.supervisor_id,
        worksite: request.worksite,
        per_day_worksites: request.per_day_worksites,
        normalize: request.normalize,
    };
    Ok(Json(state.normalizer.upsert_batch(&ctx, week, request.employees)))
}

async fn list_week_sheets(
    State(state): State<AppState>,
    Path((tenant, week)): Path<(String, String)>,
) -> Result<Json<Vec<WeeklySheet>>, AppError> {
    let week: WeekId = week.parse()?;
    let sheets = state
        .store
        .sheets_overlapping(&tenant, week.monday(), week.friday())?
        .into_iter()
        .filter(|s| s.week == week)
        .collect();
    Ok(Json(sheets))
}

async fn advance_sheet(
    State(state): State<AppState>,
    Path((tenant, sheet_id)): Path<(String, SheetId)>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<WeeklySheet>, AppError> {
    let sheet = state
        .normalizer
        .advance_sheet_status(&tenant, sheet_id, request.status)?;
    Ok(Json(sheet))
}

async fn save_employee(
    State(state): State<AppState>,
    Path((tenant, employee_id)): Path<(String, String)>,
    Json(request): Json<EmployeeRequest>,
) -> Result<Json<Employee>, AppError> {
    let employee = Employee {
        id: employee_id,
        display_name: request.display_name,
        kind: request.kind,
    };
    info!("Registering employee: Tenant={}, Emp={}", tenant, employee.id);
    state.store.upsert_employee(&tenant, employee.clone())?;
    Ok(Json(employee))
}

async fn add_assignment(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(assignment): Json<Assignment>,
) -> Result<(StatusCode, Json<Assignment>), AppError> {
    info!(
        "Assigning Emp={} to Sup={} on {} from {}",
        assignment.employee_id, assignment.supervisor_id, assignment.worksite, assignment.start
    );
    state.store.add_assignment(&tenant, assignment.clone())?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

async fn add_day_assignment(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(day): Json<DayAssignment>,
) -> Result<(StatusCode, Json<DayAssignment>), AppError> {
    info!(
        "Day override: Emp={} to Sup={} on {}",
        day.employee_id, day.supervisor_id, day.date
    );
    state.store.add_day_assignment(&tenant, day.clone())?;
    Ok((StatusCode::CREATED, Json(day)))
}

async fn get_week_vehicles(
    State(state): State<AppState>,
    Path((tenant, week)): Path<(String, String)>,
) -> Result<Json<Vec<VehicleDayEntry>>, AppError> {
    let week: WeekId = week.parse()?;
    Ok(Json(state.vehicles.entries_for_week(&tenant, week)?))
}

async fn save_week_vehicles(
    State(state): State<AppState>,
    Path((tenant, week, employee)): Path<(String, String, String)>,
    Json(request): Json<SaveVehiclesRequest>,
) -> Result<Json<VehicleSaveReport>, AppError> {
    let week: WeekId = week.parse()?;
    let mut slots = request.slots;
    for slot in &mut slots {
        if !week.contains(slot.date) {
            return Err(CalendarError::InvalidFormat {
                kind: "date in week",
                value: slot.date.to_string(),
            }
            .into());
        }
        if let Some(raw) = slot.plate.take() {
            slot.plate = Some(normalize_plate(&raw)?);
        }
    }
    let report = state
        .vehicles
        .save_week(&tenant, &employee, request.shift, &slots)?;
    Ok(Json(report))
}

async fn get_consolidation(
    State(state): State<AppState>,
    Path((tenant, period)): Path<(String, String)>,
    Query(query): Query<FilterQuery>,
) -> Result<Json<Consolidation>, AppError> {
    let period: Period = period.parse()?;
    let filter = query.into_filter(period);
    Ok(Json(state.aggregator.consolidate(&tenant, &filter)?))
}

async fn get_closure_status(
    State(state): State<AppState>,
    Path((tenant, period)): Path<(String, String)>,
    Query(query): Query<FilterQuery>,
) -> Result<Json<ClosureStatus>, AppError> {
    let period: Period = period.parse()?;
    let archive = state.closure.archive(&tenant, period)?;
    let (consolidation, rejection) = state.closure.check(&tenant, &query.into_filter(period))?;
    Ok(Json(ClosureStatus {
        period,
        can_close: archive.is_none() && rejection.is_none(),
        blocking_rows: blocking_rows(&consolidation.rows)
            .into_iter()
            .cloned()
            .collect(),
        rejection,
        archive,
    }))
}

async fn close_period(
    State(state): State<AppState>,
    Path((tenant, period)): Path<(String, String)>,
    Json(request): Json<CloseRequest>,
) -> Result<(StatusCode, Json<ClosedPeriod>), AppError> {
    let period: Period = period.parse()?;
    let filter = request.filter.into_filter(period);
    // Closing writes the artifact file and takes store locks.
    let closure = state.closure.clone();
    let archive = tokio::task::spawn_blocking(move || {
        closure.close(&tenant, &filter, &request.closed_by, request.note)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;
    Ok((StatusCode::CREATED, Json(archive)))
}

// --- Router ---

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/{tenant}/employees/{employee}", put(save_employee))
        .route("/api/{tenant}/assignments", post(add_assignment))
        .route("/api/{tenant}/day-assignments", post(add_day_assignment))
        .route("/api/{tenant}/weeks/{week}/days", put(save_week_days))
        .route("/api/{tenant}/weeks/{week}/sheets", get(list_week_sheets))
        .route("/api/{tenant}/sheets/{sheet_id}/status", put(advance_sheet))
        .route("/api/{tenant}/weeks/{week}/vehicles", get(get_week_vehicles))
        .route(
            "/api/{tenant}/weeks/{week}/vehicles/{employee}",
            put(save_week_vehicles),
        )
        .route(
            "/api/{tenant}/periods/{period}/consolidation",
            get(get_consolidation),
        )
        .route(
            "/api/{tenant}/periods/{period}/closure",
            get(get_closure_status).post(close_period),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
