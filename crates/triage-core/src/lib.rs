//! # Triage Core
//!
//! 分诊系统的核心模块，提供领域数据结构、错误定义、存储接口和通用工具。

pub mod error;
pub mod models;
pub mod store;
pub mod utils;

pub use error::{FieldError, Result, TriageError};
pub use models::*;
pub use store::{AuditSink, EncounterQuery, TriageStore};
