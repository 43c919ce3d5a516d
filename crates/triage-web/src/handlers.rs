//! HTTP处理器

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Path, Query, State},
    http::{request::Parts, Extensions, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    Extension,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use triage_core::{Actor, CareNotes, Diagnosis, TriageError};
use triage_workflow::{
    AccountChanges, AccountRequest, AssignmentStep, HistoryFilter, IdentityStep, RegistrationDraft,
    StepInput, StepOutcome, VitalsStep,
};
use uuid::Uuid;

use crate::server::AppState;
use crate::session::SessionToken;

// ========== 错误响应 ==========

/// HTTP 层错误包装
#[derive(Debug)]
pub struct ApiError(pub TriageError);

impl From<TriageError> for ApiError {
    fn from(error: TriageError) -> Self {
        Self(error)
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let message = error.to_string();

        let (status, kind) = match &error {
            TriageError::InvalidInput(_) | TriageError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
            TriageError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            TriageError::Permission(_) => (StatusCode::FORBIDDEN, "permission_denied"),
            TriageError::Conflict(_) | TriageError::InvalidStateTransition { .. } => (StatusCode::CONFLICT, "conflict"),
            TriageError::AccountLocked { .. } => (StatusCode::LOCKED, "account_locked"),
            TriageError::InvalidCredentials { .. } => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            TriageError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            TriageError::Serialization(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            TriageError::Config(_) | TriageError::Database(_) | TriageError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", message);
        }

        let mut body = json!({
            "error": kind,
            "message": message,
            "status": status.as_u16()
        });
        match &error {
            TriageError::NotFound(_) => body["redirect"] = json!("/dashboard"),
            TriageError::Permission(_) | TriageError::Conflict(_) | TriageError::InvalidStateTransition { .. } => {
                body["redirect"] = json!("/historial")
            }
            TriageError::InvalidInput(fields) => body["fields"] = json!(fields),
            TriageError::AccountLocked { until } => body["locked_until"] = json!(until),
            TriageError::InvalidCredentials {
                remaining_attempts: Some(remaining),
            } => body["remaining_attempts"] = json!(remaining),
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

// ========== 客户端地址 ==========

/// 客户端 IP：X-Forwarded-For 的第一个地址，否则为套接字对端地址
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub Option<IpAddr>);

pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok());

    forwarded.or_else(|| {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(client_ip(&parts.headers, &parts.extensions)))
    }
}

// ========== 系统 ==========

/// 健康检查处理器
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ========== 面板与队列 ==========

pub async fn dashboard(State(state): State<AppState>, Extension(actor): Extension<Actor>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.dashboard(&actor).await?))
}

pub async fn api_queue(State(state): State<AppState>, Extension(actor): Extension<Actor>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.queue(&actor).await?))
}

// ========== 患者登记 ==========

#[derive(Debug, Deserialize)]
pub struct StepParams {
    pub step: Option<u8>,
}

#[derive(Debug, Serialize)]
struct DraftView {
    current_step: u8,
    draft: Option<RegistrationDraft>,
}

pub async fn registration_state(
    State(state): State<AppState>,
    Extension(SessionToken(token)): Extension<SessionToken>,
) -> ApiResult<impl IntoResponse> {
    let draft = state.sessions.draft(token).await;
    Ok(Json(DraftView {
        current_step: draft.as_ref().map_or(1, |d| d.current_step),
        draft,
    }))
}

fn step_body<T: serde::de::DeserializeOwned>(step: u8, body: Value) -> ApiResult<T> {
    serde_json::from_value(body)
        .map_err(|e| TriageError::Validation(format!("Invalid data for step {}: {}", step, e)).into())
}

fn parse_step(step: u8, body: Value) -> ApiResult<StepInput> {
    let input = match step {
        1 => StepInput::Identity(step_body::<IdentityStep>(step, body)?),
        2 => StepInput::Assignment(step_body::<AssignmentStep>(step, body)?),
        3 => StepInput::Vitals(step_body::<VitalsStep>(step, body)?),
        4 => StepInput::Diagnosis(step_body::<Diagnosis>(step, body)?),
        other => {
            return Err(TriageError::Validation(format!("Unknown registration step {}", other)).into());
        }
    };
    Ok(input)
}

pub async fn registration_step(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Extension(SessionToken(token)): Extension<SessionToken>,
    Query(params): Query<StepParams>,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    let input = parse_step(params.step.unwrap_or(1), body)?;
    let mut draft = state.sessions.draft(token).await.unwrap_or_default();

    let outcome = state.registration.submit(&actor, &mut draft, input).await;
    match outcome {
        Ok(StepOutcome::Advanced { next_step }) => {
            state.sessions.store_draft(token, draft).await;
            Ok(Json(json!({ "next_step": next_step })).into_response())
        }
        Ok(StepOutcome::Committed(registration)) => {
            state.sessions.take_draft(token).await;
            let body = json!({
                "triage_id": registration.triage.id,
                "patient_id": registration.patient.id,
                "patient_created": registration.patient_created,
                "redirect": "/dashboard"
            });
            Ok((StatusCode::CREATED, Json(body)).into_response())
        }
        Err(e) => {
            // 提交失败时保留草稿
            state.sessions.store_draft(token, draft).await;
            Err(e.into())
        }
    }
}

pub async fn registration_cancel(
    State(state): State<AppState>,
    Extension(SessionToken(token)): Extension<SessionToken>,
) -> ApiResult<impl IntoResponse> {
    let mut draft = state.sessions.take_draft(token).await;
    state.registration.abandon(&mut draft);
    Ok(Json(json!({ "cancelled": true, "redirect": "/dashboard" })))
}

// ========== 就诊 ==========

pub async fn open_care(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(triage_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.open_care(&actor, triage_id).await?))
}

pub async fn complete_care(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(triage_id): Path<Uuid>,
    Json(notes): Json<CareNotes>,
) -> ApiResult<impl IntoResponse> {
    let attention = state.engine.complete_care(&actor, triage_id, notes).await?;
    Ok(Json(json!({ "attention": attention, "redirect": "/dashboard" })))
}

pub async fn remove_from_queue(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(triage_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let removed = state.engine.remove_from_queue(&actor, triage_id).await?;
    Ok(Json(json!({ "removed": removed, "redirect": "/dashboard" })))
}

// ========== 历史与详情 ==========

pub async fn history(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(filter): Query<HistoryFilter>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.history(&actor, filter).await?))
}

pub async fn record_detail(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(triage_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.record_detail(&actor, triage_id).await?))
}

pub async fn delete_record(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(triage_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let deletion = state.engine.delete_record(&actor, triage_id).await?;
    Ok(Json(json!({ "deleted": deletion, "redirect": "/historial" })))
}

// ========== 报表 ==========

#[derive(Debug, Deserialize)]
pub struct ReportParams {
    pub from: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
}

pub async fn reports(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(params): Query<ReportParams>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.generate_report(&actor, params.from, params.until).await?))
}

pub async fn api_reports(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(params): Query<ReportParams>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.report_chart(&actor, params.from, params.until).await?))
}

// ========== 用户管理 ==========

pub async fn list_users(State(state): State<AppState>, Extension(actor): Extension<Actor>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.accounts.list_users(&actor).await?))
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<AccountRequest>,
) -> ApiResult<impl IntoResponse> {
    let account = state.accounts.create_user(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn edit_user(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(user_id): Path<Uuid>,
    Json(changes): Json<AccountChanges>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.accounts.edit_user(&actor, user_id, changes).await?))
}
