//! 会话表
//!
//! 令牌到会话的映射，空闲超时后失效，每次已认证请求刷新最后活动时间。
//! 登记草稿保存在会话中。

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use triage_core::utils::Clock;
use triage_core::Actor;
use triage_workflow::RegistrationDraft;
use uuid::Uuid;

/// 会话令牌，由认证中间件放入请求扩展
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionToken(pub Uuid);

#[derive(Debug, Clone)]
struct Session {
    actor: Actor,
    last_seen: DateTime<Utc>,
    draft: Option<RegistrationDraft>,
}

/// 会话存储
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
    idle_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle_timeout,
            clock,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// 新建会话，返回令牌和当前过期时间
    pub async fn create(&self, actor: Actor) -> (Uuid, DateTime<Utc>) {
        let token = Uuid::new_v4();
        let now = self.clock.now();
        self.sessions.write().await.insert(
            token,
            Session {
                actor,
                last_seen: now,
                draft: None,
            },
        );
        (token, now + self.idle_timeout)
    }

    /// 校验令牌并刷新活动时间；过期的会话被移除
    pub async fn touch(&self, token: Uuid) -> Option<Actor> {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;

        let session = sessions.get_mut(&token)?;
        if now - session.last_seen < self.idle_timeout {
            session.last_seen = now;
            return Some(session.actor.clone());
        }

        sessions.remove(&token);
        tracing::info!("Session {} expired after inactivity", token);
        None
    }

    pub async fn remove(&self, token: Uuid) -> Option<Actor> {
        self.sessions.write().await.remove(&token).map(|s| s.actor)
    }

    /// 清理所有过期会话，返回清理数量
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| now - s.last_seen < self.idle_timeout);
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    // ========== 登记草稿 ==========

    pub async fn draft(&self, token: Uuid) -> Option<RegistrationDraft> {
        self.sessions.read().await.get(&token).and_then(|s| s.draft.clone())
    }

    pub async fn store_draft(&self, token: Uuid, draft: RegistrationDraft) {
        if let Some(session) = self.sessions.write().await.get_mut(&token) {
            session.draft = Some(draft);
        }
    }

    /// 取出并清除草稿
    pub async fn take_draft(&self, token: Uuid) -> Option<RegistrationDraft> {
        self.sessions
            .write()
            .await
            .get_mut(&token)
            .and_then(|s| s.draft.take())
    }
}
