//! 审计记录
//!
//! 审计写入失败只记日志，不影响已经提交的业务操作。

use std::sync::Arc;
use triage_core::utils::Clock;
use triage_core::{Actor, AuditAction, AuditEvent, AuditSink};
use uuid::Uuid;

/// 审计记录器
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail").field("clock", &self.clock).finish_non_exhaustive()
    }
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self { sink, clock }
    }

    /// 记录操作者的一次操作
    pub async fn record(&self, actor: &Actor, action: AuditAction, description: impl Into<String>) {
        let event = AuditEvent {
            id: Uuid::new_v4(),
            user_id: Some(actor.user_id),
            action,
            description: description.into(),
            client_ip: actor.client_ip,
            occurred_at: self.clock.now(),
        };
        self.append(event).await;
    }

    async fn append(&self, event: AuditEvent) {
        let action = event.action;
        if let Err(e) = self.sink.append(event).await {
            tracing::warn!("Failed to record audit event {}: {}", action.as_str(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use triage_core::utils::ManualClock;
    use triage_core::{Result, Role, TriageError};
    use triage_database::MemoryStore;

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn append(&self, _event: AuditEvent) -> Result<()> {
            Err(TriageError::Database("audit table unavailable".to_string()))
        }
    }

    fn actor() -> Actor {
        Actor {
            user_id: Uuid::new_v4(),
            username: "farmacia".to_string(),
            display_name: "Farmacia".to_string(),
            role: Role::Pharmacy,
            client_ip: "10.0.0.7".parse().ok(),
        }
    }

    #[tokio::test]
    async fn test_record_appends_event() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let trail = AuditTrail::new(store.clone(), Arc::new(ManualClock::new(now)));
        let actor = actor();

        trail.record(&actor, AuditAction::Login, "Inicio de sesión").await;

        let events = store.audit_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::Login);
        assert_eq!(events[0].user_id, Some(actor.user_id));
        assert_eq!(events[0].client_ip, actor.client_ip);
        assert_eq!(events[0].occurred_at, now);
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let trail = AuditTrail::new(Arc::new(FailingSink), Arc::new(ManualClock::new(Utc::now())));
        // 不应 panic，也不返回错误
        trail.record(&actor(), AuditAction::Logout, "Cierre de sesión").await;
    }
}
