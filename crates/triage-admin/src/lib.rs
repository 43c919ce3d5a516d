//! # 分诊管理模块
//!
//! 运维相关功能：分层配置加载与校验、初始管理员账户。

pub mod bootstrap;
pub mod config;

pub use bootstrap::seed_admin;
pub use config::{
    BootstrapConfig, ClinicConfig, ClinicSettings, ConfigManager, ConfigValidator, DatabaseConfig, LoggingConfig,
    SecurityConfig, ServerConfig,
};
