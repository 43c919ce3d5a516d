//! # Triage Web
//!
//! 分诊系统的 HTTP 接口：登录与会话、队列面板、登记向导、就诊、历史、报表和用户管理。

pub mod auth;
pub mod handlers;
pub mod server;
pub mod session;

pub use auth::{auth_middleware, LoginRequest, LoginResponse, UserInfo};
pub use handlers::{client_ip, ApiError, ApiResult, ClientIp};
pub use server::{create_app, AppState, WebServer};
pub use session::{SessionStore, SessionToken};
