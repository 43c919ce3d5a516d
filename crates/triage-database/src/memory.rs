//! 进程内存存储
//!
//! 单个 `RwLock` 保护全部表，每个状态转换在同一把写锁内完成检查与修改。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use triage_core::{
    AttentionRecord, AuditEvent, AuditSink, BeginAttention, CareNotes, CareStatus, Deletion,
    Encounter, EncounterQuery, NewPatient, NewTriage, NewUser, Patient, Registration, Result,
    TriageError, TriageRecord, TriageStore, UserAccount, VisitType,
};
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryTables {
    patients: HashMap<Uuid, Patient>,
    patient_by_national_id: HashMap<String, Uuid>,
    /// 按插入顺序保存
    triages: Vec<TriageRecord>,
    /// triage_id -> 就诊会话，键唯一即一对一约束
    attentions: HashMap<Uuid, AttentionRecord>,
    users: Vec<UserAccount>,
    audit: Vec<AuditEvent>,
}

impl MemoryTables {
    fn triage_index(&self, triage_id: Uuid) -> Result<usize> {
        self.triages
            .iter()
            .position(|t| t.id == triage_id)
            .ok_or_else(|| TriageError::NotFound(format!("Triage record {} not found", triage_id)))
    }

    fn encounter(&self, triage: &TriageRecord) -> Option<Encounter> {
        let patient = self.patients.get(&triage.patient_id)?;
        Some(Encounter {
            triage: triage.clone(),
            patient: patient.clone(),
            attention: self.attentions.get(&triage.id).cloned(),
        })
    }
}

/// 内存存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<MemoryTables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储不可用：之后的所有写操作返回数据库错误
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TriageError::Database("storage unavailable".to_string()));
        }
        Ok(())
    }

    /// 已追加的全部审计事件
    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.tables.read().await.audit.clone()
    }

    /// 就诊会话总数
    pub async fn attention_count(&self) -> usize {
        self.tables.read().await.attentions.len()
    }

    /// 全部分诊记录（插入顺序）
    pub async fn triages(&self) -> Vec<TriageRecord> {
        self.tables.read().await.triages.clone()
    }
}

#[async_trait]
impl TriageStore for MemoryStore {
    async fn register_encounter(&self, patient: NewPatient, triage: NewTriage) -> Result<Registration> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;

        let (patient, patient_created) = match tables.patient_by_national_id.get(&patient.national_id).copied() {
            Some(existing_id) => {
                let existing = tables
                    .patients
                    .get_mut(&existing_id)
                    .ok_or_else(|| TriageError::Internal("patient index out of sync".to_string()))?;
                existing.visit_type = VisitType::Returning;
                (existing.clone(), false)
            }
            None => {
                let created = Patient {
                    id: Uuid::new_v4(),
                    national_id: patient.national_id,
                    full_name: patient.full_name,
                    sex: patient.sex,
                    birth_date: patient.birth_date,
                    visit_type: patient.visit_type,
                    registered_at: triage.encounter_at,
                };
                tables.patient_by_national_id.insert(created.national_id.clone(), created.id);
                tables.patients.insert(created.id, created.clone());
                (created, true)
            }
        };

        let record = TriageRecord {
            id: Uuid::new_v4(),
            patient_id: patient.id,
            encounter_at: triage.encounter_at,
            specialty: triage.specialty,
            clinician: triage.clinician,
            nurse: triage.nurse,
            service_type: triage.service_type,
            vitals: triage.vitals,
            priority: triage.priority,
            status: CareStatus::Waiting,
            diagnosis: triage.diagnosis,
        };
        tables.triages.push(record.clone());

        Ok(Registration {
            patient,
            triage: record,
            patient_created,
        })
    }

    async fn find_patient_by_national_id(&self, national_id: &str) -> Result<Option<Patient>> {
        let tables = self.tables.read().await;
        Ok(tables
            .patient_by_national_id
            .get(national_id)
            .and_then(|id| tables.patients.get(id))
            .cloned())
    }

    async fn count_patients(&self) -> Result<u64> {
        Ok(self.tables.read().await.patients.len() as u64)
    }

    async fn get_encounter(&self, triage_id: Uuid) -> Result<Option<Encounter>> {
        let tables = self.tables.read().await;
        Ok(tables
            .triages
            .iter()
            .find(|t| t.id == triage_id)
            .and_then(|t| tables.encounter(t)))
    }

    async fn encounters_by_status(&self, status: CareStatus) -> Result<Vec<Encounter>> {
        let tables = self.tables.read().await;
        Ok(tables
            .triages
            .iter()
            .filter(|t| t.status == status)
            .filter_map(|t| tables.encounter(t))
            .collect())
    }

    async fn search_encounters(&self, query: &EncounterQuery) -> Result<Vec<Encounter>> {
        let tables = self.tables.read().await;
        let mut encounters: Vec<Encounter> = tables
            .triages
            .iter()
            .filter_map(|t| tables.encounter(t))
            .filter(|e| query.matches(e))
            .collect();
        encounters.sort_by(|a, b| b.triage.encounter_at.cmp(&a.triage.encounter_at));
        Ok(encounters)
    }

    async fn patient_triages(&self, patient_id: Uuid) -> Result<Vec<TriageRecord>> {
        let tables = self.tables.read().await;
        let mut triages: Vec<TriageRecord> = tables
            .triages
            .iter()
            .filter(|t| t.patient_id == patient_id)
            .cloned()
            .collect();
        triages.sort_by(|a, b| b.encounter_at.cmp(&a.encounter_at));
        Ok(triages)
    }

    async fn count_finished_attentions(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        user_id: Option<Uuid>,
    ) -> Result<u64> {
        let tables = self.tables.read().await;
        let count = tables
            .attentions
            .values()
            .filter(|a| matches!(a.finished_at, Some(end) if end >= from && end < until))
            .filter(|a| user_id.map_or(true, |id| a.is_owned_by(id)))
            .count();
        Ok(count as u64)
    }

    async fn begin_attention(&self, triage_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> Result<BeginAttention> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;
        let index = tables.triage_index(triage_id)?;

        let status = tables.triages[index].status;
        match status {
            CareStatus::Waiting => {
                tables.triages[index].status = CareStatus::InCare;
                let attention = tables
                    .attentions
                    .entry(triage_id)
                    .or_insert_with(|| new_attention(triage_id, user_id, at))
                    .clone();
                Ok(BeginAttention::Started(attention))
            }
            CareStatus::InCare => {
                let attention = tables
                    .attentions
                    .entry(triage_id)
                    .or_insert_with(|| new_attention(triage_id, user_id, at))
                    .clone();
                Ok(BeginAttention::Resumed(attention))
            }
            CareStatus::Completed | CareStatus::Withdrawn => Err(TriageError::Conflict(format!(
                "Triage record {} is {} and cannot be treated again",
                triage_id,
                status.as_str()
            ))),
        }
    }

    async fn finish_attention(&self, triage_id: Uuid, notes: &CareNotes, at: DateTime<Utc>) -> Result<AttentionRecord> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;
        let index = tables.triage_index(triage_id)?;

        let status = tables.triages[index].status;
        if status != CareStatus::InCare {
            return Err(TriageError::Conflict(format!(
                "Triage record {} is {}, not in care",
                triage_id,
                status.as_str()
            )));
        }

        let attention = tables.attentions.get_mut(&triage_id).ok_or_else(|| {
            TriageError::Internal(format!("Triage record {} is in care without an attention record", triage_id))
        })?;
        attention.finished_at = Some(at);
        attention.observations = notes.observations.clone();
        attention.dispensed_medication = notes.dispensed_medication.clone();
        let finished = attention.clone();

        tables.triages[index].status = CareStatus::Completed;
        Ok(finished)
    }

    async fn withdraw(&self, triage_id: Uuid) -> Result<bool> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;
        let index = tables.triage_index(triage_id)?;

        if tables.triages[index].status != CareStatus::Waiting {
            return Ok(false);
        }
        tables.triages[index].status = CareStatus::Withdrawn;
        Ok(true)
    }

    async fn delete_encounter(&self, triage_id: Uuid) -> Result<Option<Deletion>> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;
        let Some(index) = tables.triages.iter().position(|t| t.id == triage_id) else {
            return Ok(None);
        };

        let triage = tables.triages.remove(index);
        tables.attentions.remove(&triage_id);

        let patient_name = tables
            .patients
            .get(&triage.patient_id)
            .map(|p| p.full_name.clone())
            .unwrap_or_default();

        let remaining = tables.triages.iter().any(|t| t.patient_id == triage.patient_id);
        if !remaining {
            if let Some(patient) = tables.patients.remove(&triage.patient_id) {
                tables.patient_by_national_id.remove(&patient.national_id);
            }
        }

        Ok(Some(Deletion {
            triage_id,
            patient_id: triage.patient_id,
            patient_name,
            patient_removed: !remaining,
        }))
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<UserAccount>> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|u| u.id == id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserAccount>> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|u| u.username == username).cloned())
    }

    async fn list_users(&self) -> Result<Vec<UserAccount>> {
        let mut users = self.tables.read().await.users.clone();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    async fn create_user(&self, user: NewUser) -> Result<UserAccount> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;
        if tables.users.iter().any(|u| u.username == user.username) {
            return Err(TriageError::Conflict(format!("Username {} already exists", user.username)));
        }

        let account = UserAccount {
            id: Uuid::new_v4(),
            username: user.username,
            password_hash: user.password_hash,
            display_name: user.display_name,
            role: user.role,
            active: true,
            created_at: user.created_at,
            failed_attempts: 0,
            locked_until: None,
        };
        tables.users.push(account.clone());
        Ok(account)
    }

    async fn update_user(&self, user: &UserAccount) -> Result<()> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;
        let existing = tables
            .users
            .iter_mut()
            .find(|u| u.id == user.id)
            .ok_or_else(|| TriageError::NotFound(format!("User {} not found", user.id)))?;
        existing.password_hash = user.password_hash.clone();
        existing.display_name = user.display_name.clone();
        existing.role = user.role;
        existing.active = user.active;
        Ok(())
    }

    async fn register_failed_login(
        &self,
        user_id: Uuid,
        max_attempts: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<(u32, Option<DateTime<Utc>>)> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| TriageError::NotFound(format!("User {} not found", user_id)))?;

        user.failed_attempts = user.failed_attempts.saturating_add(1);
        if user.failed_attempts >= max_attempts {
            user.locked_until = Some(lock_until);
        }
        Ok((user.failed_attempts, user.locked_until))
    }

    async fn clear_failed_logins(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| TriageError::NotFound(format!("User {} not found", user_id)))?;

        if let Some(until) = user.locked_until.filter(|until| *until > now) {
            return Ok(Some(until));
        }
        user.failed_attempts = 0;
        user.locked_until = None;
        Ok(None)
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn append(&self, event: AuditEvent) -> Result<()> {
        self.ensure_available()?;
        self.tables.write().await.audit.push(event);
        Ok(())
    }
}

fn new_attention(triage_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> AttentionRecord {
    AttentionRecord {
        id: Uuid::new_v4(),
        triage_id,
        user_id: Some(user_id),
        started_at: at,
        finished_at: None,
        observations: None,
        dispensed_medication: None,
    }
}
