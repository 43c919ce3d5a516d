//! 存储接口
//!
//! 工作流只通过这里的 trait 访问持久化层。所有状态转换方法都必须在
//! 同一次写操作内重新读取当前状态再修改（check-then-act）。

use crate::error::Result;
use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 就诊查询条件
#[derive(Debug, Clone, Default)]
pub struct EncounterQuery {
    /// 仅返回该用户负责的就诊
    pub attended_by: Option<Uuid>,
    /// 患者姓名或身份证号的子串（不区分大小写）
    pub search: Option<String>,
    pub status: Option<CareStatus>,
    /// 就诊时间下界（含）
    pub from: Option<DateTime<Utc>>,
    /// 就诊时间上界（不含）
    pub until: Option<DateTime<Utc>>,
}

impl EncounterQuery {
    /// 内存实现与测试共用的过滤逻辑
    pub fn matches(&self, encounter: &Encounter) -> bool {
        if let Some(user_id) = self.attended_by {
            if encounter.owner() != Some(user_id) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if encounter.triage.status != status {
                return false;
            }
        }
        if let Some(from) = self.from {
            if encounter.triage.encounter_at < from {
                return false;
            }
        }
        if let Some(until) = self.until {
            if encounter.triage.encounter_at >= until {
                return false;
            }
        }
        if let Some(term) = self.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let term = term.to_lowercase();
            let name = encounter.patient.full_name.to_lowercase();
            let national_id = encounter.patient.national_id.to_lowercase();
            if !name.contains(&term) && !national_id.contains(&term) {
                return false;
            }
        }
        true
    }
}

/// 分诊数据存储
#[async_trait]
pub trait TriageStore: Send + Sync {
    // ========== 患者与登记 ==========

    /// 作为一个逻辑单元：按身份证号查找或创建患者（已存在则标记为复诊），再创建一条候诊分诊记录
    async fn register_encounter(&self, patient: NewPatient, triage: NewTriage) -> Result<Registration>;

    async fn find_patient_by_national_id(&self, national_id: &str) -> Result<Option<Patient>>;

    async fn count_patients(&self) -> Result<u64>;

    // ========== 就诊查询 ==========

    async fn get_encounter(&self, triage_id: Uuid) -> Result<Option<Encounter>>;

    /// 指定状态的全部就诊，按插入顺序返回
    async fn encounters_by_status(&self, status: CareStatus) -> Result<Vec<Encounter>>;

    /// 条件查询，按就诊时间倒序
    async fn search_encounters(&self, query: &EncounterQuery) -> Result<Vec<Encounter>>;

    /// 某患者的全部分诊记录，按就诊时间倒序
    async fn patient_triages(&self, patient_id: Uuid) -> Result<Vec<TriageRecord>>;

    /// 在 [from, until) 内结束的就诊会话数量，可限定负责人
    async fn count_finished_attentions(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        user_id: Option<Uuid>,
    ) -> Result<u64>;

    // ========== 状态转换 ==========

    /// waiting -> in_care，创建或复用就诊会话
    async fn begin_attention(&self, triage_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> Result<BeginAttention>;

    /// in_care -> completed，写入结束时间与记录
    async fn finish_attention(&self, triage_id: Uuid, notes: &CareNotes, at: DateTime<Utc>) -> Result<AttentionRecord>;

    /// waiting -> withdrawn；其他状态不做任何修改并返回 false
    async fn withdraw(&self, triage_id: Uuid) -> Result<bool>;

    /// 删除分诊记录（级联就诊会话），患者无剩余记录时一并删除
    async fn delete_encounter(&self, triage_id: Uuid) -> Result<Option<Deletion>>;

    // ========== 用户账户 ==========

    async fn get_user(&self, id: Uuid) -> Result<Option<UserAccount>>;

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserAccount>>;

    /// 按创建时间倒序
    async fn list_users(&self) -> Result<Vec<UserAccount>>;

    /// 用户名重复时返回 Conflict
    async fn create_user(&self, user: NewUser) -> Result<UserAccount>;

    /// 更新资料、角色、启用状态和密码哈希，不修改登录失败计数
    async fn update_user(&self, user: &UserAccount) -> Result<()>;

    /// 原子地累加登录失败次数；累加后达到 `max_attempts` 时锁定到 `lock_until`。
    /// 返回更新后的失败次数和锁定时间
    async fn register_failed_login(
        &self,
        user_id: Uuid,
        max_attempts: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<(u32, Option<DateTime<Utc>>)>;

    /// 登录成功：账户未被锁定时清零计数并返回 `None`；
    /// 仍在锁定期内时不做修改，返回锁定截止时间
    async fn clear_failed_logins(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>>;
}

/// 审计事件接收端
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<()>;
}
