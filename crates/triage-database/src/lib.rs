//! # 分诊数据库模块
//!
//! 负责患者、分诊记录、就诊会话、用户账户和审计事件的持久化。
//! 提供 PostgreSQL 实现和进程内存实现，二者都实现 `TriageStore` 与 `AuditSink`。

pub mod connection;
pub mod memory;
pub mod models;
pub mod queries;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use memory::MemoryStore;
pub use queries::DatabaseQueries;
