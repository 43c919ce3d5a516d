//! 数据库连接管理

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use triage_core::Result;

/// 数据库连接池
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;

        tracing::info!("Connected to database with up to {} connections", max_connections);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
