//! 错误定义模块

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// 字段级校验错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// 分诊系统统一错误类型
#[derive(Error, Debug)]
pub enum TriageError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("字段验证错误: {}", join_fields(.0))]
    InvalidInput(Vec<FieldError>),

    #[error("权限错误: {0}")]
    Permission(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("状态冲突: {0}")]
    Conflict(String),

    #[error("未登录: {0}")]
    Unauthenticated(String),

    #[error("账户已锁定至 {until}")]
    AccountLocked { until: DateTime<Utc> },

    #[error("用户名或密码错误")]
    InvalidCredentials { remaining_attempts: Option<u32> },

    #[error("系统内部错误: {0}")]
    Internal(String),

    #[error("无效状态转换: 从 {from} 经 {event}")]
    InvalidStateTransition { from: String, event: String },
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for TriageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => TriageError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                TriageError::Conflict(db.message().to_string())
            }
            other => TriageError::Database(other.to_string()),
        }
    }
}

/// 分诊系统统一结果类型
pub type Result<T> = std::result::Result<T, TriageError>;
