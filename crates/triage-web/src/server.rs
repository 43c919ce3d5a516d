//! Web服务器

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use triage_workflow::{AccountService, RegistrationPipeline, WorkflowEngine};

use crate::auth::{auth_middleware, current_user, login_handler, logout_handler};
use crate::handlers::{
    api_queue, api_reports, complete_care, create_user, dashboard, delete_record, edit_user, health, history,
    list_users, open_care, record_detail, registration_cancel, registration_state, registration_step,
    remove_from_queue, reports,
};
use crate::session::SessionStore;

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    pub engine: WorkflowEngine,
    pub registration: RegistrationPipeline,
    pub accounts: AccountService,
    pub sessions: SessionStore,
}

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
    sessions: SessionStore,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        let sessions = state.sessions.clone();
        let app = create_app(state);

        Self { addr, app, sessions }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!("Starting web server on {}", self.addr);

        // 定期清理过期会话
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let purged = sessions.purge_expired().await;
                if purged > 0 {
                    tracing::debug!("Purged {} expired sessions", purged);
                }
            }
        });

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start web server: {}", e))?;

        Ok(())
    }
}

/// 构建路由
pub fn create_app(state: AppState) -> Router {
    // 需要认证的路由
    let protected = Router::new()
        .route("/logout", post(logout_handler))
        .route("/me", get(current_user))
        .route("/dashboard", get(dashboard))
        .route("/api/queue", get(api_queue))
        .route("/registrar", get(registration_state).post(registration_step))
        .route("/registrar/cancelar", post(registration_cancel))
        .route("/atencion/:id", get(open_care).post(complete_care))
        .route("/quitar-cola/:id", post(remove_from_queue))
        .route("/historial", get(history))
        .route("/paciente/:id", get(record_detail))
        .route("/paciente/:id/eliminar", post(delete_record))
        .route("/reportes", get(reports))
        .route("/api/reportes", get(api_reports))
        .route("/usuarios", get(list_users))
        .route("/usuarios/crear", post(create_user))
        .route("/usuarios/:id/editar", post(edit_user))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        // 认证路由（无需token）
        .route("/login", post(login_handler))
        // 健康检查
        .route("/health", get(health))
        .merge(protected)
        // 全局中间件
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}
