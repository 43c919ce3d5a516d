//! 初始管理员
//!
//! 账户表为空且配置了密码时创建一个管理员账户，否则不做任何事。

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use triage_core::utils::Clock;
use triage_core::{NewUser, Role, TriageStore, UserAccount};
use triage_workflow::hash_password;

use crate::config::{BootstrapConfig, SecurityConfig};

pub async fn seed_admin(
    store: &Arc<dyn TriageStore>,
    clock: &Arc<dyn Clock>,
    bootstrap: &BootstrapConfig,
    security: &SecurityConfig,
) -> Result<Option<UserAccount>> {
    let existing = store.list_users().await.context("Failed to list user accounts")?;
    if !existing.is_empty() {
        return Ok(None);
    }

    let Some(password) = bootstrap.admin_password.as_deref().filter(|p| !p.is_empty()) else {
        warn!("No user accounts exist and no bootstrap admin password is configured; nobody can log in");
        return Ok(None);
    };

    let password_hash = hash_password(password, security.bcrypt_cost)
        .await
        .context("Failed to hash bootstrap admin password")?;
    let account = store
        .create_user(NewUser {
            username: bootstrap.admin_username.trim().to_string(),
            password_hash,
            display_name: bootstrap.admin_display_name.clone(),
            role: Role::Administrator,
            created_at: clock.now(),
        })
        .await
        .context("Failed to create bootstrap admin account")?;

    info!("Created bootstrap administrator {}", account.username);
    Ok(Some(account))
}
