// src/api.rs
use axum::{
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::approval::{ApprovalError, ApprovalService};
use crate::attendance::{AttendanceClock, AttendanceError, ClockAction, ClockService};
use crate::claims::{ClaimApplication, ClaimError, ClaimService};
use crate::clock::Clock;
use crate::config::{Config, ConfigError};
use crate::employees::{EmployeeError, EmployeeService, NewEmployee};
use crate::face::{decode_image_payload, FaceVerifier};
use crate::leave_ledger::{LeaveApplication, LeaveError, LeaveLedger};
use crate::models::*;
use crate::notification::NotificationQueue;
use crate::payroll::{PayrollCalculator, PayrollError};
use crate::storage::{ObjectStorage, StorageError, UploadDocument};
use crate::store::{HrStore, StoreError};

pub const PRINCIPAL_HEADER: &str = "x-user-id";

// --- Error Handling ---

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Leave(#[from] LeaveError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Payroll(#[from] PayrollError),
    #[error(transparent)]
    Attendance(#[from] AttendanceError),
    #[error(transparent)]
    Employee(#[from] EmployeeError),
    #[error(transparent)]
    Claim(#[from] ClaimError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Missing x-user-id header")]
    MissingPrincipal,
    #[error("Invalid request: {0}")]
    BadRequest(String),
}

fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::UniqueViolation { .. } => StatusCode::CONFLICT,
        StoreError::LockPoisoned(_) | StoreError::Snapshot(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn storage_status(e: &StorageError) -> StatusCode {
    match e {
        StorageError::InvalidFileType(_) => StatusCode::BAD_REQUEST,
        StorageError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn leave_status(e: &LeaveError) -> StatusCode {
    match e {
        LeaveError::InvalidRange { .. } => StatusCode::BAD_REQUEST,
        LeaveError::EmployeeNotFound(_) | LeaveError::LeaveTypeNotFound(_) => StatusCode::NOT_FOUND,
        LeaveError::NoEntitlement { .. }
        | LeaveError::InsufficientBalance { .. }
        | LeaveError::ProofRequired(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LeaveError::UploadFailed(e) => storage_status(e),
        LeaveError::Store(e) => store_status(e),
    }
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Leave(e) => e.code(),
            AppError::Approval(e) => e.code(),
            AppError::Payroll(e) => e.code(),
            AppError::Attendance(e) => e.code(),
            AppError::Employee(e) => e.code(),
            AppError::Claim(e) => e.code(),
            AppError::Store(e) => e.code(),
            AppError::MissingPrincipal => "MISSING_PRINCIPAL",
            AppError::BadRequest(_) => "BAD_REQUEST",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Leave(e) => leave_status(e),
            AppError::Approval(e) => match e {
                ApprovalError::NotFound { .. } => StatusCode::NOT_FOUND,
                ApprovalError::AlreadyProcessed { .. } => StatusCode::CONFLICT,
                ApprovalError::ApproverNotFound(_) => StatusCode::FORBIDDEN,
                ApprovalError::RejectReasonRequired => StatusCode::BAD_REQUEST,
                ApprovalError::Store(e) => store_status(e),
            },
            AppError::Payroll(e) => match e {
                PayrollError::InvalidPeriod { .. } => StatusCode::BAD_REQUEST,
                PayrollError::EmployeeNotFound(_) => StatusCode::NOT_FOUND,
                PayrollError::Overflow { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                PayrollError::Store(e) => store_status(e),
            },
            AppError::Attendance(e) => match e {
                AttendanceError::NoActiveSession { .. } => StatusCode::CONFLICT,
                AttendanceError::EmployeeNotFound(_) => StatusCode::NOT_FOUND,
                AttendanceError::InvalidPeriod { .. } => StatusCode::BAD_REQUEST,
                AttendanceError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
                AttendanceError::Store(e) => store_status(e),
            },
            AppError::Employee(e) => match e {
                EmployeeError::InvalidEmail(_)
                | EmployeeError::MissingName
                | EmployeeError::MissingUserId
                | EmployeeError::SalaryOutOfRange(_) => StatusCode::BAD_REQUEST,
                EmployeeError::DuplicateEmail(_)
                | EmployeeError::DuplicateContact(_)
                | EmployeeError::DuplicateUser(_) => StatusCode::CONFLICT,
                EmployeeError::Photo(e) => storage_status(e),
                EmployeeError::NotFound(_) => StatusCode::NOT_FOUND,
                EmployeeError::Leave(e) => leave_status(e),
                EmployeeError::Store(e) => store_status(e),
            },
            AppError::Claim(e) => match e {
                ClaimError::EmployeeNotFound(_) => StatusCode::NOT_FOUND,
                ClaimError::InvalidAmount | ClaimError::DocumentRequired => StatusCode::BAD_REQUEST,
                ClaimError::UploadFailed(e) => storage_status(e),
                ClaimError::Store(e) => store_status(e),
            },
            AppError::Store(e) => store_status(e),
            AppError::MissingPrincipal => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected ({}): {}", self.code(), self);
        }
        let body = serde_json::json!({
            "success": false,
            "code": self.code(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

fn principal(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(PRINCIPAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or(AppError::MissingPrincipal)
}

// --- Application State ---

/// External collaborators handed to the services.
pub struct Adapters {
    pub storage: Arc<dyn ObjectStorage>,
    pub verifier: Arc<dyn FaceVerifier>,
    pub notifications: NotificationQueue,
}

#[derive(Clone)]
pub struct AppState {
    pub store: HrStore,
    pub clock: Arc<dyn Clock>,
    pub ledger: LeaveLedger,
    pub approvals: ApprovalService,
    pub payroll: PayrollCalculator,
    pub attendance: AttendanceClock,
    pub clock_service: ClockService,
    pub employees: EmployeeService,
    pub claims: ClaimService,
}

impl AppState {
    pub fn assemble(
        store: HrStore,
        clock: Arc<dyn Clock>,
        adapters: Adapters,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        let ledger = LeaveLedger::new(
            store.clone(),
            clock.clone(),
            adapters.storage.clone(),
            config.storage_bucket.clone(),
            config.upload_timeout(),
        );
        let attendance = AttendanceClock::new(store.clone(), clock.clone(), config.late_threshold()?);
        Ok(Self {
            approvals: ApprovalService::new(store.clone(), adapters.notifications),
            payroll: PayrollCalculator::new(store.clone(), clock.clone()),
            clock_service: ClockService::new(
                store.clone(),
                attendance.clone(),
                adapters.verifier,
                config.face_timeout(),
            ),
            employees: EmployeeService::new(
                store.clone(),
                ledger.clone(),
                adapters.storage.clone(),
                config.storage_bucket.clone(),
                config.upload_timeout(),
            ),
            claims: ClaimService::new(
                store.clone(),
                clock.clone(),
                adapters.storage,
                config.storage_bucket.clone(),
                config.upload_timeout(),
            ),
            attendance,
            ledger,
            store,
            clock,
        })
    }
}

pub fn router(state: AppState) -> Router {
    let leave_routes = Router::new()
        .route("/", post(submit_leave))
        .route("/{id}/approve", post(approve_leave))
        .route("/{id}/reject", post(reject_leave));
    let claim_routes = Router::new()
        .route("/", post(submit_claim))
        .route("/{id}/approve", post(approve_claim))
        .route("/{id}/reject", post(reject_claim));
    let payroll_routes = Router::new()
        .route("/preview", get(payroll_preview))
        .route("/payslips", get(payroll_payslips))
        .route("/summary", get(payroll_summary))
        .route("/process", post(process_payroll));
    let attendance_routes = Router::new()
        .route("/verify", post(verify_attendance))
        .route("/status/{employee_id}", get(attendance_status))
        .route("/daily", get(attendance_daily))
        .route("/report.csv", get(attendance_report_csv));
    let report_routes = Router::new()
        .route("/leave", get(leave_report))
        .route("/claims", get(claims_report))
        .route("/attendance", get(attendance_report));
    let employee_routes = Router::new()
        .route("/", post(create_employee))
        .route("/{id}/leave-balances", get(leave_balances))
        .route("/{id}/deactivate", post(deactivate_employee));

    let api_routes = Router::new()
        .nest("/leaves", leave_routes)
        .nest("/claims", claim_routes)
        .nest("/payroll", payroll_routes)
        .nest("/attendance", attendance_routes)
        .nest("/reports", report_routes)
        .nest("/employees", employee_routes);

    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Request Types ---

#[derive(Debug, Deserialize)]
pub struct AttachmentPayload {
    pub file_name: String,
    pub content_type: Option<String>,
    /// Base64 content, optionally as a data URL.
    pub data_base64: String,
}

impl AttachmentPayload {
    fn into_document(self) -> Result<UploadDocument, AppError> {
        let bytes = decode_image_payload(&self.data_base64)
            .map_err(|e| AppError::BadRequest(format!("attachment is not valid base64: {e}")))?;
        if bytes.is_empty() {
            return Err(AppError::BadRequest("attachment is empty".into()));
        }
        Ok(UploadDocument {
            content_type: self
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            file_name: self.file_name,
            bytes: Bytes::from(bytes),
        })
    }
}

fn into_document(payload: Option<AttachmentPayload>) -> Result<Option<UploadDocument>, AppError> {
    payload.map(AttachmentPayload::into_document).transpose()
}

#[derive(Debug, Deserialize)]
pub struct SubmitLeaveRequest {
    pub employee_id: EmployeeId,
    pub leave_type_id: LeaveTypeId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub reason: String,
    pub proof: Option<AttachmentPayload>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitClaimRequest {
    pub employee_id: EmployeeId,
    pub amount: Decimal,
    pub expense_date: NaiveDate,
    #[serde(default)]
    pub description: String,
    pub document: Option<AttachmentPayload>,
}

#[derive(Debug, Deserialize)]
pub struct PeriodQuery {
    pub month: u32,
    pub year: i32,
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub employee_id: EmployeeId,
    pub month: u32,
    pub year: i32,
}

#[derive(Debug, Deserialize)]
pub struct YearQuery {
    pub year: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct DailyQuery {
    pub date: Option<NaiveDate>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub employee_id: EmployeeId,
    pub image_base64: String,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateEmployeeRequest {
    #[serde(flatten)]
    pub employee: NewEmployee,
    pub photo: Option<AttachmentPayload>,
}

// --- Handlers ---

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn leave_balances(
    State(state): State<AppState>,
    Path(employee_id): Path<EmployeeId>,
    Query(query): Query<YearQuery>,
) -> ApiResult<Vec<crate::leave_ledger::LeaveBalance>> {
    let year = query.year.unwrap_or_else(|| state.clock.today().year());
    Ok(ok(state.ledger.compute_balances(employee_id, year)?))
}

async fn submit_leave(
    State(state): State<AppState>,
    Json(req): Json<SubmitLeaveRequest>,
) -> Result<(StatusCode, Json<ApiResponse<LeaveRequest>>), AppError> {
    let leave = state
        .ledger
        .submit_leave(LeaveApplication {
            employee_id: req.employee_id,
            leave_type_id: req.leave_type_id,
            start_date: req.start_date,
            end_date: req.end_date,
            reason: req.reason,
            proof: into_document(req.proof)?,
        })
        .await?;
    Ok((StatusCode::CREATED, ok(leave)))
}

async fn approve_leave(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<LeaveId>,
) -> ApiResult<LeaveRequest> {
    let user = principal(&headers)?;
    Ok(ok(state.approvals.approve_leave(id, &user)?))
}

async fn reject_leave(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<LeaveId>,
    body: Option<Json<RejectRequest>>,
) -> ApiResult<LeaveRequest> {
    let user = principal(&headers)?;
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(ok(state.approvals.reject_leave(id, &user, reason)?))
}

async fn submit_claim(
    State(state): State<AppState>,
    Json(req): Json<SubmitClaimRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ExpenseClaim>>), AppError> {
    let claim = state
        .claims
        .submit_claim(ClaimApplication {
            employee_id: req.employee_id,
            amount: req.amount,
            expense_date: req.expense_date,
            description: req.description,
            document: into_document(req.document)?,
        })
        .await?;
    Ok((StatusCode::CREATED, ok(claim)))
}

async fn approve_claim(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ClaimId>,
) -> ApiResult<ExpenseClaim> {
    let user = principal(&headers)?;
    Ok(ok(state.approvals.approve_claim(id, &user)?))
}

async fn reject_claim(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ClaimId>,
    body: Option<Json<RejectRequest>>,
) -> ApiResult<ExpenseClaim> {
    let user = principal(&headers)?;
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(ok(state.approvals.reject_claim(id, &user, reason)?))
}

async fn payroll_preview(
    State(state): State<AppState>,
    Query(q): Query<PreviewQuery>,
) -> ApiResult<crate::payroll::PayslipView> {
    Ok(ok(state.payroll.preview_payslip(q.employee_id, q.month, q.year)?))
}

async fn payroll_payslips(
    State(state): State<AppState>,
    Query(q): Query<PeriodQuery>,
) -> ApiResult<Vec<crate::payroll::PayslipView>> {
    Ok(ok(state.payroll.payslips_for_month(q.month, q.year)?))
}

async fn payroll_summary(
    State(state): State<AppState>,
    Query(q): Query<PeriodQuery>,
) -> ApiResult<crate::payroll::MonthlyPayrollSummary> {
    Ok(ok(state.payroll.monthly_summary(q.month, q.year)?))
}

async fn process_payroll(
    State(state): State<AppState>,
    Json(q): Json<PeriodQuery>,
) -> ApiResult<crate::payroll::PayrollRunReport> {
    info!("Payroll run requested for {:02}/{}", q.month, q.year);
    Ok(ok(state.payroll.process_payroll(q.month, q.year)?))
}

/// Always 200; the outcome carries its own success flag.
async fn verify_attendance(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Json<crate::attendance::ClockOutcome> {
    let action = ClockAction::parse(&req.action);
    Json(
        state
            .clock_service
            .verify_and_process(req.employee_id, &req.image_base64, action)
            .await,
    )
}

async fn attendance_status(
    State(state): State<AppState>,
    Path(employee_id): Path<EmployeeId>,
) -> ApiResult<crate::attendance::AttendanceStatus> {
    if state.store.get_employee(employee_id)?.is_none() {
        return Err(AttendanceError::EmployeeNotFound(employee_id).into());
    }
    Ok(ok(state.attendance.status(employee_id)?))
}

async fn attendance_daily(
    State(state): State<AppState>,
    Query(q): Query<DailyQuery>,
) -> ApiResult<crate::attendance::DailyAttendanceSummary> {
    let date = q.date.unwrap_or_else(|| state.clock.today());
    Ok(ok(state.attendance.daily_summary(date, q.search.as_deref())?))
}

async fn attendance_report(
    State(state): State<AppState>,
    Query(q): Query<PeriodQuery>,
) -> ApiResult<Vec<crate::attendance::DayAttendanceCount>> {
    Ok(ok(state.attendance.monthly_report(q.month, q.year)?))
}

async fn attendance_report_csv(
    State(state): State<AppState>,
    Query(q): Query<PeriodQuery>,
) -> Result<Response, AppError> {
    let csv = state.attendance.export_month_csv(q.month, q.year)?;
    Ok(([(CONTENT_TYPE, "text/csv; charset=utf-8")], csv).into_response())
}

async fn leave_report(
    State(state): State<AppState>,
    Query(q): Query<PeriodQuery>,
) -> ApiResult<Vec<crate::leave_ledger::LeaveTypeUsage>> {
    Ok(ok(state.ledger.leave_summary(q.month, q.year)?))
}

async fn claims_report(
    State(state): State<AppState>,
    Query(q): Query<PeriodQuery>,
) -> ApiResult<Vec<crate::claims::ClaimStatusSummary>> {
    Ok(ok(state.claims.claim_summary(q.month, q.year)?))
}

async fn create_employee(
    State(state): State<AppState>,
    Json(req): Json<CreateEmployeeRequest>,
) -> Result<(StatusCode, Json<ApiResponse<crate::employees::Onboarding>>), AppError> {
    let photo = into_document(req.photo)?;
    let onboarding = state.employees.create_employee(req.employee, photo).await?;
    Ok((StatusCode::CREATED, ok(onboarding)))
}

async fn deactivate_employee(
    State(state): State<AppState>,
    Path(id): Path<EmployeeId>,
) -> ApiResult<Employee> {
    Ok(ok(state.employees.deactivate_employee(id)?))
}
