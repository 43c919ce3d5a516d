//! 配置管理
//!
//! 配置按以下顺序叠加：内置默认值 → 可选的 TOML 文件 → `TRIAGE__*` 环境变量。
//! 加载后统一校验。

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::{error, info};

/// 分诊系统完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClinicConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 安全配置
    pub security: SecurityConfig,
    /// 诊所业务配置
    pub clinic: ClinicSettings,
    /// 日志配置
    pub logging: LoggingConfig,
    /// 初始管理员
    pub bootstrap: BootstrapConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听主机
    pub host: String,
    /// 监听端口
    pub port: u16,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL 连接字符串，未设置时使用内存存储
    pub url: Option<String>,
    /// 最大连接数
    pub max_connections: u32,
}

/// 安全配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub max_failed_attempts: u32,
    pub lockout_minutes: i64,
    pub session_idle_minutes: i64,
    pub bcrypt_cost: u32,
}

/// 诊所业务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClinicSettings {
    /// 诊所所在时区相对 UTC 的分钟偏移
    pub utc_offset_minutes: i32,
    pub report_default_days: u32,
    pub history_page_size: usize,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
}

/// 初始管理员配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub admin_username: String,
    pub admin_display_name: String,
    /// 没有任何账户且设置了密码时才创建管理员
    #[serde(skip_serializing)]
    pub admin_password: Option<String>,
}

impl ClinicConfig {
    /// 监听地址
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.server.host, self.server.port))
    }

    /// 导出为 TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

// ========== 加载 ==========

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    config: ClinicConfig,
    config_path: Option<String>,
}

impl ConfigManager {
    /// 从可选文件和进程环境加载配置
    pub fn new(config_path: Option<&str>) -> Result<Self> {
        let environment = Environment::with_prefix("TRIAGE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true);
        Self::load(config_path, environment)
    }

    fn load(config_path: Option<&str>, environment: Environment) -> Result<Self> {
        let defaults = toml::to_string(&ClinicConfig::default()).context("Failed to serialize default configuration")?;

        let mut builder = Config::builder().add_source(File::from_str(&defaults, FileFormat::Toml));
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        let settings = builder
            .add_source(environment)
            .build()
            .with_context(|| format!("Failed to read configuration from {}", config_path.unwrap_or("defaults")))?;

        let config: ClinicConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        ConfigValidator::new().validate(&config)?;

        match config_path {
            Some(path) => info!("Configuration loaded successfully from: {}", path),
            None => info!("Configuration loaded from defaults and environment"),
        }

        Ok(Self {
            config,
            config_path: config_path.map(str::to_string),
        })
    }

    /// 获取配置
    pub fn config(&self) -> &ClinicConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&str> {
        self.config_path.as_deref()
    }

    /// 命令行参数覆盖后重新校验
    pub fn override_with<F>(&mut self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut ClinicConfig),
    {
        let mut updated = self.config.clone();
        apply(&mut updated);
        ConfigValidator::new().validate(&updated)?;
        self.config = updated;
        Ok(())
    }

    pub fn into_config(self) -> ClinicConfig {
        self.config
    }
}

// ========== 校验 ==========

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    field_path: &'static str,
    validator: fn(&ClinicConfig) -> bool,
    error_message: &'static str,
}

impl ConfigValidator {
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "server.port",
                validator: |c| c.server.port != 0,
                error_message: "Server port cannot be 0",
            },
            ValidationRule {
                field_path: "database.max_connections",
                validator: |c| c.database.max_connections > 0,
                error_message: "Database max connections cannot be 0",
            },
            ValidationRule {
                field_path: "database.url",
                validator: |c| c.database.url.as_deref().map_or(true, |url| !url.trim().is_empty()),
                error_message: "Database url cannot be empty when set",
            },
            ValidationRule {
                field_path: "security.max_failed_attempts",
                validator: |c| c.security.max_failed_attempts > 0,
                error_message: "At least one login attempt must be allowed",
            },
            ValidationRule {
                field_path: "security.lockout_minutes",
                validator: |c| c.security.lockout_minutes > 0,
                error_message: "Lockout duration must be positive",
            },
            ValidationRule {
                field_path: "security.session_idle_minutes",
                validator: |c| c.security.session_idle_minutes > 0,
                error_message: "Session idle timeout must be positive",
            },
            ValidationRule {
                field_path: "security.bcrypt_cost",
                validator: |c| (4..=31).contains(&c.security.bcrypt_cost),
                error_message: "Bcrypt cost must be between 4 and 31",
            },
            ValidationRule {
                field_path: "clinic.utc_offset_minutes",
                validator: |c| (-14 * 60..=14 * 60).contains(&c.clinic.utc_offset_minutes),
                error_message: "UTC offset must be within 14 hours",
            },
            ValidationRule {
                field_path: "clinic.history_page_size",
                validator: |c| c.clinic.history_page_size > 0,
                error_message: "History page size cannot be 0",
            },
            ValidationRule {
                field_path: "clinic.report_default_days",
                validator: |c| c.clinic.report_default_days > 0,
                error_message: "Default report window cannot be 0 days",
            },
            ValidationRule {
                field_path: "logging.level",
                validator: |c| {
                    matches!(
                        c.logging.level.to_ascii_lowercase().as_str(),
                        "trace" | "debug" | "info" | "warn" | "error"
                    )
                },
                error_message: "Unknown log level",
            },
            ValidationRule {
                field_path: "bootstrap.admin_username",
                validator: |c| !c.bootstrap.admin_username.trim().is_empty(),
                error_message: "Bootstrap admin username cannot be empty",
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &ClinicConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if !(rule.validator)(config) {
                error!("Configuration validation failed for {}", rule.field_path);
                return Err(anyhow::anyhow!("{}: {}", rule.field_path, rule.error_message));
            }
        }

        info!("Configuration validation passed");
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

// ========== 默认值 ==========

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 3,
            lockout_minutes: 15,
            session_idle_minutes: 30,
            bcrypt_cost: 12,
        }
    }
}

impl Default for ClinicSettings {
    fn default() -> Self {
        Self {
            // America/La_Paz
            utc_offset_minutes: -240,
            report_default_days: 30,
            history_page_size: 20,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            admin_username: "admin".to_string(),
            admin_display_name: "System Administrator".to_string(),
            admin_password: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Environment::with_prefix("TRIAGE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let manager = ConfigManager::load(None, env(&[])).unwrap();
        let config = manager.config();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.security.max_failed_attempts, 3);
        assert_eq!(config.security.session_idle_minutes, 30);
        assert_eq!(config.clinic.utc_offset_minutes, -240);
        assert!(config.database.url.is_none());
        assert!(config.bootstrap.admin_password.is_none());
        assert_eq!(config.listen_addr().unwrap().port(), 8000);
    }

    #[test]
    fn test_file_then_environment() {
        let path = std::env::temp_dir().join(format!("triage-config-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "[server]\nport = 9100\n\n[clinic]\nhistory_page_size = 50\n",
        )
        .unwrap();

        let manager = ConfigManager::load(
            path.to_str(),
            env(&[
                ("TRIAGE__SERVER__PORT", "9200"),
                ("TRIAGE__BOOTSTRAP__ADMIN_PASSWORD", "cambiar-esto"),
            ]),
        )
        .unwrap();
        std::fs::remove_file(&path).ok();

        let config = manager.config();
        assert_eq!(config.server.port, 9200);
        assert_eq!(config.clinic.history_page_size, 50);
        assert_eq!(config.security.bcrypt_cost, 12);
        assert_eq!(config.bootstrap.admin_password.as_deref(), Some("cambiar-esto"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = ConfigManager::load(None, env(&[("TRIAGE__SECURITY__BCRYPT_COST", "2")])).unwrap_err();
        assert!(err.to_string().contains("security.bcrypt_cost"));

        let mut manager = ConfigManager::load(None, env(&[])).unwrap();
        assert!(manager.override_with(|c| c.server.port = 0).is_err());
        assert_eq!(manager.config().server.port, 8000);
        manager.override_with(|c| c.logging.level = "debug".to_string()).unwrap();
        assert_eq!(manager.config().logging.level, "debug");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(ConfigManager::load(Some("/nonexistent/triage.toml"), env(&[])).is_err());
    }

    #[test]
    fn test_password_is_not_exported() {
        let mut config = ClinicConfig::default();
        config.bootstrap.admin_password = Some("secreto".to_string());
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("admin_username"));
        assert!(!toml.contains("secreto"));
    }
}
