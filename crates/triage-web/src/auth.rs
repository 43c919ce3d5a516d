//! 用户认证
//!
//! 登录成功后发放不透明的会话令牌，请求通过 `Authorization: Bearer <token>` 携带。

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use triage_core::{Actor, Role, TriageError};
use uuid::Uuid;

use crate::handlers::{client_ip, ApiError, ApiResult, ClientIp};
use crate::server::AppState;
use crate::session::SessionToken;

/// 登录请求
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// 用户信息（不包含敏感数据）
#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub role: Role,
}

impl From<&Actor> for UserInfo {
    fn from(actor: &Actor) -> Self {
        Self {
            id: actor.user_id,
            username: actor.username.clone(),
            display_name: actor.display_name.clone(),
            role: actor.role,
        }
    }
}

/// 登录响应
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: Uuid,
    pub user: UserInfo,
    pub expires_at: DateTime<Utc>,
}

fn bearer_token(request: &Request) -> Option<Uuid> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .and_then(|token| Uuid::parse_str(token.trim()).ok())
}

/// 认证中间件
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request)
        .ok_or_else(|| TriageError::Unauthenticated("Missing or malformed session token".to_string()))?;

    let mut actor = state
        .sessions
        .touch(token)
        .await
        .ok_or_else(|| TriageError::Unauthenticated("Session expired, please log in again".to_string()))?;

    // 账户被停用或删除后会话立即失效
    let Some(account) = state.accounts.active_account(actor.user_id).await? else {
        state.sessions.remove(token).await;
        warn!("Session {} rejected: account {} is no longer active", token, actor.username);
        return Err(TriageError::Unauthenticated("Account is disabled".to_string()).into());
    };
    actor.role = account.role;
    actor.display_name = account.display_name;
    actor.client_ip = client_ip(request.headers(), request.extensions());

    request.extensions_mut().insert(actor);
    request.extensions_mut().insert(SessionToken(token));
    Ok(next.run(request).await)
}

/// 登录处理器
pub async fn login_handler(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(request): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    info!("Login attempt for user: {}", request.username);

    let actor = match state.accounts.authenticate(&request.username, &request.password, ip).await {
        Ok(actor) => actor,
        Err(e) => {
            warn!("Login failed: {}", e);
            return Err(e.into());
        }
    };

    let user = UserInfo::from(&actor);
    let (token, expires_at) = state.sessions.create(actor).await;
    info!("User logged in successfully: {}", user.username);

    Ok(Json(LoginResponse {
        token,
        user,
        expires_at,
    }))
}

/// 登出处理器
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Extension(SessionToken(token)): Extension<SessionToken>,
) -> ApiResult<impl IntoResponse> {
    state.sessions.remove(token).await;
    state.accounts.logout(&actor).await;
    Ok(Json(json!({ "logged_out": true, "redirect": "/login" })))
}

/// 当前用户信息
pub async fn current_user(Extension(actor): Extension<Actor>) -> impl IntoResponse {
    Json(UserInfo::from(&actor))
}
