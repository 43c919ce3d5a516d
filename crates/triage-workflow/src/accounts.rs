//! 用户账户服务
//!
//! 登录认证（含失败锁定）以及管理员的账户管理。密码以 bcrypt 哈希保存。

use crate::access::{authorize, Action};
use crate::account_guard::AccountGuard;
use crate::audit::AuditTrail;
use crate::registration::{check_max_chars, MAX_NAME_CHARS};
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use triage_core::utils::Clock;
use triage_core::{
    Actor, AuditAction, FieldError, NewUser, Result, Role, TriageError, TriageStore, UserAccount,
};
use uuid::Uuid;

/// 新账户请求
#[derive(Debug, Clone, Deserialize)]
pub struct AccountRequest {
    pub username: String,
    pub password: String,
    pub display_name: String,
    pub role: Role,
}

/// 账户修改请求
#[derive(Debug, Clone, Deserialize)]
pub struct AccountChanges {
    pub display_name: String,
    pub role: Role,
    pub active: bool,
    /// 留空表示不修改密码
    #[serde(default)]
    pub password: Option<String>,
}

/// 计算密码的 bcrypt 哈希
pub async fn hash_password(password: &str, cost: u32) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| TriageError::Internal(format!("Password hashing task failed: {}", e)))?
        .map_err(|e| TriageError::Internal(format!("Password hashing failed: {}", e)))
}

async fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| TriageError::Internal(format!("Password verification task failed: {}", e)))?
        .map_err(|e| TriageError::Internal(format!("Stored password hash is invalid: {}", e)))
}

pub const MAX_USERNAME_CHARS: usize = 150;

fn require(errors: &mut Vec<FieldError>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, "This field is required"));
    }
}

/// 用户账户服务
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn TriageStore>,
    audit: AuditTrail,
    guard: AccountGuard,
    clock: Arc<dyn Clock>,
    bcrypt_cost: u32,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn TriageStore>,
        audit: AuditTrail,
        guard: AccountGuard,
        clock: Arc<dyn Clock>,
        bcrypt_cost: u32,
    ) -> Self {
        Self {
            store,
            audit,
            guard,
            clock,
            bcrypt_cost,
        }
    }

    // ========== 认证 ==========

    /// 用户名密码登录，成功时返回操作者并记录审计
    pub async fn authenticate(&self, username: &str, password: &str, client_ip: Option<IpAddr>) -> Result<Actor> {
        let now = self.clock.now();
        let Some(account) = self.store.get_user_by_username(username.trim()).await? else {
            tracing::warn!("Login attempt for unknown user {}", username);
            return Err(TriageError::InvalidCredentials { remaining_attempts: None });
        };

        self.guard.check_lock(&account, now)?;

        if !verify_password(password, &account.password_hash).await? {
            let policy = self.guard.policy();
            let (failed_attempts, locked_until) = self
                .store
                .register_failed_login(account.id, policy.max_failed_attempts, self.guard.lock_deadline(now))
                .await?;
            tracing::warn!("Failed login for user {} ({} attempts)", account.username, failed_attempts);
            if failed_attempts >= policy.max_failed_attempts {
                tracing::warn!("Account {} locked until {:?}", account.username, locked_until);
            }
            return Err(self.guard.failure_error(failed_attempts, locked_until, now));
        }

        if !account.active {
            tracing::warn!("Login rejected for inactive user {}", account.username);
            return Err(TriageError::InvalidCredentials { remaining_attempts: None });
        }

        // 并发的失败请求可能已在密码校验期间锁定账户
        if let Some(until) = self.store.clear_failed_logins(account.id, now).await? {
            tracing::warn!("Login for user {} rejected: account locked until {}", account.username, until);
            return Err(TriageError::AccountLocked { until });
        }

        let actor = Actor::from_account(&account, client_ip);
        tracing::info!("User {} logged in", actor.username);
        self.audit.record(&actor, AuditAction::Login, "Inicio de sesión exitoso").await;
        Ok(actor)
    }

    pub async fn logout(&self, actor: &Actor) {
        tracing::info!("User {} logged out", actor.username);
        self.audit.record(actor, AuditAction::Logout, "Cierre de sesión").await;
    }

    /// 会话仍指向一个可用账户时返回该账户
    pub async fn active_account(&self, user_id: Uuid) -> Result<Option<UserAccount>> {
        Ok(self.store.get_user(user_id).await?.filter(|a| a.active))
    }

    // ========== 账户管理 ==========

    pub async fn list_users(&self, actor: &Actor) -> Result<Vec<UserAccount>> {
        authorize(actor, None, Action::ManageUsers)?;
        self.store.list_users().await
    }

    pub async fn create_user(&self, actor: &Actor, request: AccountRequest) -> Result<UserAccount> {
        authorize(actor, None, Action::ManageUsers)?;

        let mut errors = Vec::new();
        require(&mut errors, "username", &request.username);
        require(&mut errors, "password", &request.password);
        require(&mut errors, "display_name", &request.display_name);
        check_max_chars(&mut errors, "username", &request.username, MAX_USERNAME_CHARS);
        check_max_chars(&mut errors, "display_name", &request.display_name, MAX_NAME_CHARS);
        if !errors.is_empty() {
            return Err(TriageError::InvalidInput(errors));
        }

        let password_hash = hash_password(&request.password, self.bcrypt_cost).await?;
        let account = self
            .store
            .create_user(NewUser {
                username: request.username.trim().to_string(),
                password_hash,
                display_name: request.display_name.trim().to_string(),
                role: request.role,
                created_at: self.clock.now(),
            })
            .await?;

        tracing::info!("User {} created account {}", actor.username, account.username);
        self.audit
            .record(actor, AuditAction::UserCreated, format!("Usuario creado: {}", account.username))
            .await;
        Ok(account)
    }

    pub async fn edit_user(&self, actor: &Actor, user_id: Uuid, changes: AccountChanges) -> Result<UserAccount> {
        authorize(actor, None, Action::ManageUsers)?;

        let mut errors = Vec::new();
        require(&mut errors, "display_name", &changes.display_name);
        check_max_chars(&mut errors, "display_name", &changes.display_name, MAX_NAME_CHARS);
        if !errors.is_empty() {
            return Err(TriageError::InvalidInput(errors));
        }

        let mut account = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| TriageError::NotFound(format!("User {} not found", user_id)))?;

        account.display_name = changes.display_name.trim().to_string();
        account.role = changes.role;
        account.active = changes.active;
        if let Some(password) = changes.password.as_deref().filter(|p| !p.is_empty()) {
            account.password_hash = hash_password(password, self.bcrypt_cost).await?;
        }
        self.store.update_user(&account).await?;

        tracing::info!("User {} edited account {}", actor.username, account.username);
        self.audit
            .record(actor, AuditAction::UserEdited, format!("Usuario editado: {}", account.username))
            .await;
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account_guard::LockoutPolicy;
    use chrono::{Duration, TimeZone, Utc};
    use triage_core::utils::ManualClock;
    use triage_database::MemoryStore;

    // 测试用最低成本
    const COST: u32 = 4;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        service: AccountService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap()));
        let audit = AuditTrail::new(store.clone(), clock.clone());
        let service = AccountService::new(
            store.clone(),
            audit,
            AccountGuard::new(LockoutPolicy::default()),
            clock.clone(),
            COST,
        );
        Fixture { store, clock, service }
    }

    async fn seed(store: &MemoryStore, username: &str, password: &str, role: Role) -> UserAccount {
        store
            .create_user(NewUser {
                username: username.to_string(),
                password_hash: hash_password(password, COST).await.unwrap(),
                display_name: username.to_uppercase(),
                role,
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_lockout_cycle() {
        let f = fixture();
        seed(&f.store, "nurse", "correcta", Role::Nursing).await;

        for _ in 0..2 {
            let err = f.service.authenticate("nurse", "mala", None).await.unwrap_err();
            assert!(matches!(err, TriageError::InvalidCredentials { remaining_attempts: Some(_) }));
        }
        let err = f.service.authenticate("nurse", "mala", None).await.unwrap_err();
        assert!(matches!(err, TriageError::AccountLocked { .. }));

        // 锁定期内正确密码也被拒绝
        let err = f.service.authenticate("nurse", "correcta", None).await.unwrap_err();
        assert!(matches!(err, TriageError::AccountLocked { .. }));

        f.clock.advance(Duration::minutes(16));
        let actor = f.service.authenticate("nurse", "correcta", None).await.unwrap();
        let account = f.store.get_user(actor.user_id).await.unwrap().unwrap();
        assert_eq!(account.failed_attempts, 0);
        assert!(account.locked_until.is_none());

        let logins = f
            .store
            .audit_events()
            .await
            .into_iter()
            .filter(|e| e.action == AuditAction::Login)
            .count();
        assert_eq!(logins, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_failures_still_lock() {
        let f = fixture();
        let seeded = seed(&f.store, "nurse", "correcta", Role::Nursing).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let service = f.service.clone();
            handles.push(tokio::spawn(async move { service.authenticate("nurse", "mala", None).await }));
        }
        let mut invalid = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap_err() {
                TriageError::InvalidCredentials { .. } => invalid += 1,
                TriageError::AccountLocked { .. } => {}
                other => panic!("unexpected error {:?}", other),
            }
        }
        assert!(invalid <= 2, "{} attempts reported as plain failures", invalid);

        let account = f.store.get_user(seeded.id).await.unwrap().unwrap();
        assert!(account.failed_attempts >= 3);
        assert!(account.locked_until.is_some());

        let err = f.service.authenticate("nurse", "correcta", None).await.unwrap_err();
        assert!(matches!(err, TriageError::AccountLocked { .. }));
    }

    #[tokio::test]
    async fn test_profile_edit_keeps_failure_counter() {
        let f = fixture();
        seed(&f.store, "admin", "admin-pass", Role::Administrator).await;
        let nurse = seed(&f.store, "nurse", "correcta", Role::Nursing).await;
        let admin = f.service.authenticate("admin", "admin-pass", None).await.unwrap();

        for _ in 0..2 {
            f.service.authenticate("nurse", "mala", None).await.unwrap_err();
        }
        f.service
            .edit_user(
                &admin,
                nurse.id,
                AccountChanges {
                    display_name: "Enfermera".to_string(),
                    role: Role::Nursing,
                    active: true,
                    password: None,
                },
            )
            .await
            .unwrap();

        let err = f.service.authenticate("nurse", "mala", None).await.unwrap_err();
        assert!(matches!(err, TriageError::AccountLocked { .. }));
    }

    #[tokio::test]
    async fn test_unknown_user_has_no_counter() {
        let f = fixture();
        let err = f.service.authenticate("ghost", "x", None).await.unwrap_err();
        assert!(matches!(err, TriageError::InvalidCredentials { remaining_attempts: None }));
    }

    #[tokio::test]
    async fn test_inactive_account_cannot_login() {
        let f = fixture();
        let mut account = seed(&f.store, "pharma", "secreto", Role::Pharmacy).await;
        account.active = false;
        f.store.update_user(&account).await.unwrap();

        let err = f.service.authenticate("pharma", "secreto", None).await.unwrap_err();
        assert!(matches!(err, TriageError::InvalidCredentials { .. }));
    }

    #[tokio::test]
    async fn test_account_management_is_admin_only() {
        let f = fixture();
        seed(&f.store, "admin", "admin-pass", Role::Administrator).await;
        seed(&f.store, "doc", "doc-pass", Role::Doctor).await;
        let admin = f.service.authenticate("admin", "admin-pass", None).await.unwrap();
        let doctor = f.service.authenticate("doc", "doc-pass", None).await.unwrap();

        let request = AccountRequest {
            username: "new".to_string(),
            password: "pw".to_string(),
            display_name: "Nuevo".to_string(),
            role: Role::Nursing,
        };
        let err = f.service.create_user(&doctor, request.clone()).await.unwrap_err();
        assert!(matches!(err, TriageError::Permission(_)));

        let created = f.service.create_user(&admin, request.clone()).await.unwrap();
        assert_eq!(created.role, Role::Nursing);
        let dup = f.service.create_user(&admin, request).await.unwrap_err();
        assert!(matches!(dup, TriageError::Conflict(_)));

        let edited = f
            .service
            .edit_user(
                &admin,
                created.id,
                AccountChanges {
                    display_name: "Renombrado".to_string(),
                    role: Role::Doctor,
                    active: true,
                    password: Some("otra".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.display_name, "Renombrado");
        assert!(f.service.authenticate("new", "otra", None).await.is_ok());

        let users = f.service.list_users(&admin).await.unwrap();
        assert_eq!(users.len(), 3);
    }

    #[tokio::test]
    async fn test_create_user_reports_all_missing_fields() {
        let f = fixture();
        seed(&f.store, "admin", "admin-pass", Role::Administrator).await;
        let admin = f.service.authenticate("admin", "admin-pass", None).await.unwrap();

        let err = f
            .service
            .create_user(
                &admin,
                AccountRequest {
                    username: " ".to_string(),
                    password: String::new(),
                    display_name: String::new(),
                    role: Role::Doctor,
                },
            )
            .await
            .unwrap_err();
        match err {
            TriageError::InvalidInput(fields) => assert_eq!(fields.len(), 3),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_account_fields_longer_than_column_rejected() {
        let f = fixture();
        let admin_account = seed(&f.store, "admin", "admin-pass", Role::Administrator).await;
        let admin = f.service.authenticate("admin", "admin-pass", None).await.unwrap();

        let err = f
            .service
            .create_user(
                &admin,
                AccountRequest {
                    username: "u".repeat(MAX_USERNAME_CHARS + 1),
                    password: "pw".to_string(),
                    display_name: "d".repeat(MAX_NAME_CHARS + 1),
                    role: Role::Doctor,
                },
            )
            .await
            .unwrap_err();
        match err {
            TriageError::InvalidInput(fields) => {
                let names: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
                assert_eq!(names, vec!["username", "display_name"]);
            }
            other => panic!("unexpected error {:?}", other),
        }

        let err = f
            .service
            .edit_user(
                &admin,
                admin_account.id,
                AccountChanges {
                    display_name: "d".repeat(MAX_NAME_CHARS + 1),
                    role: Role::Administrator,
                    active: true,
                    password: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::InvalidInput(_)));
        assert_eq!(f.service.list_users(&admin).await.unwrap().len(), 1);
    }
}
