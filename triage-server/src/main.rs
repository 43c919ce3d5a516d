//! 分诊服务器主程序

use anyhow::Context;
use chrono::Duration;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use triage_admin::{seed_admin, ClinicConfig, ConfigManager};
use triage_core::utils::{clinic_offset, Clock, SystemClock};
use triage_core::{AuditSink, TriageStore};
use triage_database::{DatabasePool, DatabaseQueries, MemoryStore};
use triage_web::{AppState, SessionStore, WebServer};
use triage_workflow::{
    AccountGuard, AccountService, AuditTrail, EngineSettings, LockoutPolicy, RegistrationPipeline, WorkflowEngine,
};

/// 分诊服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "triage-server")]
#[command(about = "诊所分诊与候诊队列服务器")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 服务器端口，覆盖配置文件
    #[arg(short, long)]
    port: Option<u16>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,

    /// 打印生效配置后退出
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut manager = ConfigManager::new(args.config.as_deref())?;
    manager.override_with(|config| {
        if let Some(port) = args.port {
            config.server.port = port;
        }
        if let Some(level) = &args.log_level {
            config.logging.level = level.clone();
        }
    })?;
    let config = manager.into_config();

    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    // 初始化日志，RUST_LOG 优先
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting clinic triage server...");
    run(config).await
}

async fn run(config: ClinicConfig) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (store, sink) = open_store(&config).await?;

    seed_admin(&store, &clock, &config.bootstrap, &config.security).await?;

    let offset = clinic_offset(config.clinic.utc_offset_minutes);
    let audit = AuditTrail::new(sink, clock.clone());
    let guard = AccountGuard::new(LockoutPolicy {
        max_failed_attempts: config.security.max_failed_attempts,
        lockout: Duration::minutes(config.security.lockout_minutes),
    });

    let state = AppState {
        engine: WorkflowEngine::new(
            store.clone(),
            audit.clone(),
            clock.clone(),
            EngineSettings {
                offset,
                history_page_size: config.clinic.history_page_size,
                report_default_days: config.clinic.report_default_days,
            },
        ),
        registration: RegistrationPipeline::new(store.clone(), audit.clone(), clock.clone(), offset),
        accounts: AccountService::new(store, audit, guard, clock.clone(), config.security.bcrypt_cost),
        sessions: SessionStore::new(Duration::minutes(config.security.session_idle_minutes), clock),
    };

    let addr = config.listen_addr()?;
    info!("Triage server configuration:");
    info!("  Listen address: {}", addr);
    info!("  Clinic UTC offset: {} minutes", config.clinic.utc_offset_minutes);
    info!("  Session idle timeout: {} minutes", config.security.session_idle_minutes);

    WebServer::new(addr, state).run().await
}

/// 配置了数据库地址时使用 PostgreSQL，否则使用内存存储
async fn open_store(config: &ClinicConfig) -> anyhow::Result<(Arc<dyn TriageStore>, Arc<dyn AuditSink>)> {
    match config.database.url.as_deref() {
        Some(url) => {
            let pool = DatabasePool::connect(url, config.database.max_connections)
                .await
                .context("Failed to connect to database")?;
            let queries = Arc::new(DatabaseQueries::new(pool));
            queries.create_tables().await.context("Failed to create database schema")?;
            info!("Using PostgreSQL store");
            let store: Arc<dyn TriageStore> = queries.clone();
            let sink: Arc<dyn AuditSink> = queries;
            Ok((store, sink))
        }
        None => {
            warn!("No database url configured, records are kept in memory only");
            let memory = Arc::new(MemoryStore::new());
            let store: Arc<dyn TriageStore> = memory.clone();
            let sink: Arc<dyn AuditSink> = memory;
            Ok((store, sink))
        }
    }
}
