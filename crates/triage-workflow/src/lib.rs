//! # 分诊工作流模块
//!
//! 提供分诊业务流程，包括：
//! - 就诊状态机：候诊、就诊中、已完成、已移出
//! - 候诊队列：按优先级和到达时间排序的实时视图
//! - 登记流程：四步草稿，最后一步原子提交
//! - 访问控制、登录锁定、审计与统计报表

pub mod access;
pub mod account_guard;
pub mod accounts;
pub mod audit;
pub mod engine;
pub mod queue;
pub mod registration;
pub mod reports;
pub mod state_machine;

// 重新导出主要类型
pub use access::{authorize, check, Action, Decision, DecisionReason};
pub use account_guard::{AccountGuard, LockoutPolicy};
pub use accounts::{hash_password, AccountChanges, AccountRequest, AccountService};
pub use audit::AuditTrail;
pub use engine::{Dashboard, EngineSettings, HistoryFilter, HistoryPage, RecordDetail, WorkflowEngine};
pub use queue::{PriorityQueue, QueueEntry, QueueSnapshot, QueueStats};
pub use registration::{
    AssignmentStep, IdentityStep, RegistrationDraft, RegistrationPipeline, StepInput, StepOutcome, VitalsStep,
};
pub use reports::{ChartData, Report, ReportRange};
pub use state_machine::{CareEvent, CareStateMachine};
