//! 候诊队列视图
//!
//! 每次调用都从存储重新读取候诊记录并排序，条目与统计来自同一份数据。

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use triage_core::utils::format_wait;
use triage_core::{CareStatus, Encounter, PriorityTier, Result, TriageStore};
use uuid::Uuid;

/// 队列条目
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub triage_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub national_id: String,
    pub priority: PriorityTier,
    pub priority_label: &'static str,
    pub priority_color: &'static str,
    pub encounter_at: DateTime<Utc>,
    /// 诊所时区的到达时间 HH:MM
    pub arrival_time: String,
    /// 已等待时长 "{h}h {m}m"
    pub waiting: String,
    pub specialty: &'static str,
    pub clinician: String,
}

/// 队列统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub total_waiting: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub unrecognized: usize,
}

impl QueueStats {
    fn from_entries(entries: &[QueueEntry]) -> Self {
        let mut counts: HashMap<PriorityTier, usize> = HashMap::new();
        for entry in entries {
            *counts.entry(entry.priority).or_insert(0) += 1;
        }
        let count = |tier| counts.get(&tier).copied().unwrap_or(0);

        Self {
            total_waiting: entries.len(),
            high: count(PriorityTier::High),
            medium: count(PriorityTier::Medium),
            low: count(PriorityTier::Low),
            unrecognized: count(PriorityTier::Unrecognized),
        }
    }
}

/// 队列快照
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub entries: Vec<QueueEntry>,
    pub stats: QueueStats,
}

/// 候诊队列
#[derive(Clone)]
pub struct PriorityQueue {
    store: Arc<dyn TriageStore>,
    offset: FixedOffset,
}

impl PriorityQueue {
    pub fn new(store: Arc<dyn TriageStore>, offset: FixedOffset) -> Self {
        Self { store, offset }
    }

    /// 按优先级、到达时间排序的候诊记录
    pub async fn list_waiting(&self) -> Result<Vec<Encounter>> {
        let mut waiting = self.store.encounters_by_status(CareStatus::Waiting).await?;
        // sort_by 是稳定排序，同级同时刻保持插入顺序
        waiting.sort_by(|a, b| {
            a.triage
                .priority
                .rank()
                .cmp(&b.triage.priority.rank())
                .then(a.triage.encounter_at.cmp(&b.triage.encounter_at))
        });
        Ok(waiting)
    }

    /// 队列条目与统计
    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<QueueSnapshot> {
        let entries: Vec<QueueEntry> = self
            .list_waiting()
            .await?
            .into_iter()
            .map(|encounter| self.entry(encounter, now))
            .collect();
        let stats = QueueStats::from_entries(&entries);

        tracing::debug!("Queue snapshot: {} waiting ({} high)", stats.total_waiting, stats.high);
        Ok(QueueSnapshot { entries, stats })
    }

    fn entry(&self, encounter: Encounter, now: DateTime<Utc>) -> QueueEntry {
        let Encounter { triage, patient, .. } = encounter;
        QueueEntry {
            triage_id: triage.id,
            patient_id: patient.id,
            patient_name: patient.full_name,
            national_id: patient.national_id,
            priority: triage.priority,
            priority_label: triage.priority.label(),
            priority_color: triage.priority.color(),
            encounter_at: triage.encounter_at,
            arrival_time: triage.encounter_at.with_timezone(&self.offset).format("%H:%M").to_string(),
            waiting: format_wait(now - triage.encounter_at),
            specialty: triage.specialty.label(),
            clinician: triage.clinician,
        }
    }
}
