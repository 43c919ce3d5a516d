//! 工作流引擎
//!
//! 协调状态机、候诊队列、访问控制和审计的核心引擎。所有状态写入都委托给
//! 存储层的受保护操作，审计在写入成功之后记录。

use crate::{
    access::{authorize, Action},
    audit::AuditTrail,
    queue::{PriorityQueue, QueueSnapshot},
    reports::{ChartData, Report, ReportRange},
    state_machine::{CareEvent, CareStateMachine},
};
use chrono::{FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use triage_core::utils::{local_date, local_day_bounds, Clock};
use triage_core::{
    Actor, AttentionRecord, AuditAction, BeginAttention, CareNotes, CareStatus, Deletion, Encounter,
    EncounterQuery, Result, TriageError, TriageRecord, TriageStore,
};
use uuid::Uuid;

/// 引擎参数
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub offset: FixedOffset,
    pub history_page_size: usize,
    pub report_default_days: u32,
}

/// 主面板
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub queue: QueueSnapshot,
    pub in_care: Vec<Encounter>,
    pub total_patients: u64,
    /// 今天（诊所时区）结束的就诊数；普通工作人员只统计自己的
    pub attended_today: u64,
}

/// 历史记录过滤条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryFilter {
    pub search: Option<String>,
    pub status: Option<CareStatus>,
    pub from: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub page: Option<usize>,
}

/// 历史记录分页
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub items: Vec<Encounter>,
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub page_size: usize,
}

/// 记录详情
#[derive(Debug, Clone, Serialize)]
pub struct RecordDetail {
    pub encounter: Encounter,
    pub age: u32,
    /// 该患者的全部分诊记录，按时间倒序
    pub history: Vec<TriageRecord>,
}

/// 工作流引擎
#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<dyn TriageStore>,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
    state_machine: Arc<CareStateMachine>,
    queue: PriorityQueue,
    settings: EngineSettings,
}

impl WorkflowEngine {
    /// 创建新的工作流引擎
    pub fn new(store: Arc<dyn TriageStore>, audit: AuditTrail, clock: Arc<dyn Clock>, settings: EngineSettings) -> Self {
        Self {
            queue: PriorityQueue::new(store.clone(), settings.offset),
            store,
            audit,
            clock,
            state_machine: Arc::new(CareStateMachine::new()),
            settings,
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    async fn encounter(&self, triage_id: Uuid) -> Result<Encounter> {
        self.store
            .get_encounter(triage_id)
            .await?
            .ok_or_else(|| TriageError::NotFound(format!("Triage record {} not found", triage_id)))
    }

    // ========== 队列与面板 ==========

    pub async fn queue(&self, actor: &Actor) -> Result<QueueSnapshot> {
        authorize(actor, None, Action::ViewQueue)?;
        self.queue.snapshot(self.clock.now()).await
    }

    pub async fn dashboard(&self, actor: &Actor) -> Result<Dashboard> {
        authorize(actor, None, Action::ViewQueue)?;
        let now = self.clock.now();

        let queue = self.queue.snapshot(now).await?;
        let in_care = self.store.encounters_by_status(CareStatus::InCare).await?;
        let total_patients = self.store.count_patients().await?;

        let (start, end) = local_day_bounds(local_date(now, self.settings.offset), self.settings.offset);
        let scope = if actor.role.is_admin() { None } else { Some(actor.user_id) };
        let attended_today = self.store.count_finished_attentions(start, end, scope).await?;

        Ok(Dashboard {
            queue,
            in_care,
            total_patients,
            attended_today,
        })
    }

    // ========== 就诊状态转换 ==========

    /// 开始就诊
    ///
    /// 已在就诊中的记录直接返回已有会话，不重复创建也不重复审计。
    pub async fn open_care(&self, actor: &Actor, triage_id: Uuid) -> Result<Encounter> {
        authorize(actor, None, Action::OpenCare)?;
        let mut encounter = self.encounter(triage_id).await?;

        let status = encounter.triage.status;
        if status != CareStatus::InCare {
            self.state_machine.transition(status, CareEvent::Start).map_err(|_| {
                TriageError::Conflict(format!(
                    "{} has already been {}",
                    encounter.patient.full_name,
                    status.as_str()
                ))
            })?;
        }

        let begin = self.store.begin_attention(triage_id, actor.user_id, self.clock.now()).await?;
        if let BeginAttention::Started(attention) = &begin {
            tracing::info!(
                "User {} started care {} for triage {}",
                actor.username,
                attention.id,
                triage_id
            );
            self.audit
                .record(
                    actor,
                    AuditAction::CareStarted,
                    format!("Atención iniciada para {}", encounter.patient.full_name),
                )
                .await;
        }

        encounter.triage.status = CareStatus::InCare;
        encounter.attention = Some(begin.into_attention());
        Ok(encounter)
    }

    /// 结束就诊
    ///
    /// 候诊中的记录先开始就诊，不跳过 in_care。只有会话负责人或管理员可以结束。
    pub async fn complete_care(&self, actor: &Actor, triage_id: Uuid, notes: CareNotes) -> Result<AttentionRecord> {
        let mut encounter = self.encounter(triage_id).await?;
        if encounter.triage.status == CareStatus::Waiting {
            encounter = self.open_care(actor, triage_id).await?;
        }

        authorize(actor, encounter.owner(), Action::CompleteCare)?;
        self.state_machine
            .transition(encounter.triage.status, CareEvent::Finish)
            .map_err(|_| {
                TriageError::Conflict(format!(
                    "{} is {} and cannot be completed",
                    encounter.patient.full_name,
                    encounter.triage.status.as_str()
                ))
            })?;

        let notes = CareNotes {
            observations: notes.observations.filter(|t| !t.trim().is_empty()),
            dispensed_medication: notes.dispensed_medication.filter(|t| !t.trim().is_empty()),
        };
        let attention = self.store.finish_attention(triage_id, &notes, self.clock.now()).await?;

        tracing::info!(
            "User {} completed care for triage {} after {} minutes",
            actor.username,
            triage_id,
            attention.duration_minutes().unwrap_or(0)
        );
        self.audit
            .record(
                actor,
                AuditAction::CareFinished,
                format!("Atención finalizada para {}", encounter.patient.full_name),
            )
            .await;

        Ok(attention)
    }

    /// 把候诊中的患者移出队列；其他状态不做修改并返回 false
    pub async fn remove_from_queue(&self, actor: &Actor, triage_id: Uuid) -> Result<bool> {
        authorize(actor, None, Action::RemoveFromQueue)?;
        let encounter = self.encounter(triage_id).await?;

        if !self.state_machine.can_transition(encounter.triage.status, CareEvent::Withdraw) {
            tracing::debug!(
                "Triage {} is {}, nothing to remove",
                triage_id,
                encounter.triage.status.as_str()
            );
            return Ok(false);
        }

        let removed = self.store.withdraw(triage_id).await?;
        if removed {
            tracing::info!("User {} removed triage {} from the queue", actor.username, triage_id);
            self.audit
                .record(
                    actor,
                    AuditAction::RemovedFromQueue,
                    format!("Paciente retirado de la cola: {}", encounter.patient.full_name),
                )
                .await;
        }
        Ok(removed)
    }

    // ========== 历史与详情 ==========

    pub async fn history(&self, actor: &Actor, filter: HistoryFilter) -> Result<HistoryPage> {
        authorize(actor, None, Action::ViewHistory)?;

        let offset = self.settings.offset;
        let query = EncounterQuery {
            attended_by: if actor.role.is_admin() { None } else { Some(actor.user_id) },
            search: filter.search,
            status: filter.status,
            from: filter.from.map(|date| local_day_bounds(date, offset).0),
            until: filter.until.map(|date| local_day_bounds(date, offset).1),
        };
        let encounters = self.store.search_encounters(&query).await?;

        self.audit
            .record(actor, AuditAction::HistoryViewed, "Consulta de historial")
            .await;

        Ok(paginate(encounters, filter.page, self.settings.history_page_size))
    }

    pub async fn record_detail(&self, actor: &Actor, triage_id: Uuid) -> Result<RecordDetail> {
        let encounter = self.encounter(triage_id).await?;
        authorize(actor, encounter.owner(), Action::ViewRecord)?;

        let history = self.store.patient_triages(encounter.patient.id).await?;
        let age = encounter
            .patient
            .age_on(local_date(self.clock.now(), self.settings.offset));
        Ok(RecordDetail {
            encounter,
            age,
            history,
        })
    }

    /// 管理员删除分诊记录，患者没有剩余记录时一并删除
    pub async fn delete_record(&self, actor: &Actor, triage_id: Uuid) -> Result<Deletion> {
        authorize(actor, None, Action::DeleteRecord)?;

        let deletion = self
            .store
            .delete_encounter(triage_id)
            .await?
            .ok_or_else(|| TriageError::NotFound(format!("Triage record {} not found", triage_id)))?;

        tracing::info!(
            "User {} deleted triage {} (patient removed: {})",
            actor.username,
            triage_id,
            deletion.patient_removed
        );
        self.audit
            .record(
                actor,
                AuditAction::PatientDeleted,
                format!("Registro eliminado: {}", deletion.patient_name),
            )
            .await;
        Ok(deletion)
    }

    // ========== 报表 ==========

    pub async fn generate_report(
        &self,
        actor: &Actor,
        from: Option<NaiveDate>,
        until: Option<NaiveDate>,
    ) -> Result<Report> {
        let report = self.build_report(actor, from, until).await?;
        self.audit
            .record(
                actor,
                AuditAction::ReportGenerated,
                format!("Reporte generado: {} a {}", report.range.from, report.range.until),
            )
            .await;
        Ok(report)
    }

    /// 图表数据，不单独审计
    pub async fn report_chart(
        &self,
        actor: &Actor,
        from: Option<NaiveDate>,
        until: Option<NaiveDate>,
    ) -> Result<ChartData> {
        Ok(self.build_report(actor, from, until).await?.chart())
    }

    async fn build_report(&self, actor: &Actor, from: Option<NaiveDate>, until: Option<NaiveDate>) -> Result<Report> {
        authorize(actor, None, Action::GenerateReport)?;

        let offset = self.settings.offset;
        let today = local_date(self.clock.now(), offset);
        let range = ReportRange::resolve(from, until, today, self.settings.report_default_days)?;

        let query = EncounterQuery {
            from: Some(local_day_bounds(range.from, offset).0),
            until: Some(local_day_bounds(range.until, offset).1),
            ..Default::default()
        };
        let encounters = self.store.search_encounters(&query).await?;
        let users = self.store.list_users().await?;

        tracing::debug!("Building report {} to {} over {} encounters", range.from, range.until, encounters.len());
        Ok(Report::build(range, &encounters, &users, offset))
    }
}

/// 页码从 1 开始，越界时夹到首页或末页
fn paginate(items: Vec<Encounter>, page: Option<usize>, page_size: usize) -> HistoryPage {
    let page_size = page_size.max(1);
    let total_items = items.len();
    let total_pages = total_items.div_ceil(page_size).max(1);
    let page = page.unwrap_or(1).clamp(1, total_pages);

    let items = items
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect();

    HistoryPage {
        items,
        page,
        total_pages,
        total_items,
        page_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use triage_core::utils::{clinic_offset, ManualClock};
    use triage_core::{
        Diagnosis, NewPatient, NewTriage, PriorityTier, Role, ServiceType, Sex, Specialty, VisitType, Vitals,
    };
    use triage_database::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        engine: WorkflowEngine,
    }

    fn start() -> DateTime<Utc> {
        // 诊所时间 2024-10-07 10:00
        Utc.with_ymd_and_hms(2024, 10, 7, 14, 0, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let audit = AuditTrail::new(store.clone(), clock.clone());
        let engine = WorkflowEngine::new(
            store.clone(),
            audit,
            clock.clone(),
            EngineSettings {
                offset: clinic_offset(-240),
                history_page_size: 20,
                report_default_days: 30,
            },
        );
        Fixture { store, clock, engine }
    }

    fn actor(role: Role) -> Actor {
        Actor {
            user_id: Uuid::new_v4(),
            username: format!("{}-user", role.as_str()),
            display_name: role.as_str().to_string(),
            role,
            client_ip: None,
        }
    }

    async fn register(store: &MemoryStore, national_id: &str, name: &str, at: DateTime<Utc>) -> Uuid {
        store
            .register_encounter(
                NewPatient {
                    national_id: national_id.to_string(),
                    full_name: name.to_string(),
                    sex: Sex::Female,
                    birth_date: NaiveDate::from_ymd_opt(1995, 3, 8).unwrap(),
                    visit_type: VisitType::New,
                },
                NewTriage {
                    encounter_at: at,
                    specialty: Specialty::GeneralMedicine,
                    clinician: "Dr. Soria".to_string(),
                    nurse: "Lic. Vaca".to_string(),
                    service_type: ServiceType::Outpatient,
                    vitals: Vitals {
                        height_cm: 165.0,
                        weight_kg: 58.0,
                        temperature_c: 36.9,
                        blood_pressure: "115/75".to_string(),
                        pulse_bpm: 76,
                    },
                    priority: PriorityTier::Medium,
                    diagnosis: Diagnosis::default(),
                },
            )
            .await
            .unwrap()
            .triage
            .id
    }

    fn actions(events: &[triage_core::AuditEvent], action: AuditAction) -> usize {
        events.iter().filter(|e| e.action == action).count()
    }

    #[tokio::test]
    async fn test_open_twice_keeps_first_owner() {
        let f = fixture();
        let id = register(&f.store, "1", "Lucía Rivas", start()).await;
        let doctor = actor(Role::Doctor);
        let nurse = actor(Role::Nursing);

        let first = f.engine.open_care(&doctor, id).await.unwrap();
        let second = f.engine.open_care(&nurse, id).await.unwrap();

        assert_eq!(first.attention.as_ref().unwrap().id, second.attention.as_ref().unwrap().id);
        assert_eq!(second.owner(), Some(doctor.user_id));
        assert_eq!(f.store.attention_count().await, 1);
        assert_eq!(actions(&f.store.audit_events().await, AuditAction::CareStarted), 1);
    }

    #[tokio::test]
    async fn test_complete_requires_owner_or_admin() {
        let f = fixture();
        let id = register(&f.store, "1", "Lucía Rivas", start()).await;
        let doctor = actor(Role::Doctor);
        let pharmacist = actor(Role::Pharmacy);
        let admin = actor(Role::Administrator);

        f.engine.open_care(&doctor, id).await.unwrap();
        let err = f
            .engine
            .complete_care(&pharmacist, id, CareNotes::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::Permission(_)));

        f.clock.advance(Duration::minutes(25));
        let attention = f
            .engine
            .complete_care(
                &admin,
                id,
                CareNotes {
                    observations: Some("Estable".to_string()),
                    dispensed_medication: Some(" ".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(attention.duration_minutes(), Some(25));
        assert_eq!(attention.dispensed_medication, None);
        assert_eq!(attention.user_id, Some(doctor.user_id));

        let encounter = f.store.get_encounter(id).await.unwrap().unwrap();
        assert_eq!(encounter.triage.status, CareStatus::Completed);
        assert!(encounter.attention.unwrap().finished_at.is_some());

        // 已完成的记录不能再次就诊
        let err = f.engine.open_care(&doctor, id).await.unwrap_err();
        assert!(matches!(err, TriageError::Conflict(_)));
        let err = f.engine.complete_care(&doctor, id, CareNotes::default()).await.unwrap_err();
        assert!(matches!(err, TriageError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_complete_on_waiting_opens_first() {
        let f = fixture();
        let id = register(&f.store, "9", "Pedro Gutiérrez", start()).await;
        let doctor = actor(Role::Doctor);

        let attention = f.engine.complete_care(&doctor, id, CareNotes::default()).await.unwrap();
        assert_eq!(attention.user_id, Some(doctor.user_id));

        let events = f.store.audit_events().await;
        assert_eq!(actions(&events, AuditAction::CareStarted), 1);
        assert_eq!(actions(&events, AuditAction::CareFinished), 1);
    }

    #[tokio::test]
    async fn test_remove_from_queue() {
        let f = fixture();
        let waiting = register(&f.store, "1", "Ana", start()).await;
        let treated = register(&f.store, "2", "Beto", start()).await;
        let nurse = actor(Role::Nursing);
        f.engine.open_care(&nurse, treated).await.unwrap();

        assert!(f.engine.remove_from_queue(&nurse, waiting).await.unwrap());
        assert!(!f.engine.remove_from_queue(&nurse, waiting).await.unwrap());
        assert!(!f.engine.remove_from_queue(&nurse, treated).await.unwrap());

        let encounter = f.store.get_encounter(waiting).await.unwrap().unwrap();
        assert_eq!(encounter.triage.status, CareStatus::Withdrawn);
        assert!(encounter.attention.is_none());
        assert_eq!(actions(&f.store.audit_events().await, AuditAction::RemovedFromQueue), 1);

        let err = f.engine.remove_from_queue(&nurse, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, TriageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_history_is_scoped_for_staff() {
        let f = fixture();
        let mine = register(&f.store, "1", "Carla Mendez", start()).await;
        let theirs = register(&f.store, "2", "Diego Lara", start()).await;
        register(&f.store, "3", "Elena Cruz", start()).await;
        let doctor = actor(Role::Doctor);
        let other = actor(Role::Nursing);
        f.engine.open_care(&doctor, mine).await.unwrap();
        f.engine.open_care(&other, theirs).await.unwrap();

        let page = f.engine.history(&doctor, HistoryFilter::default()).await.unwrap();
        assert_eq!(page.total_items, 1);
        assert_eq!(page.items[0].triage.id, mine);

        let admin = actor(Role::Administrator);
        let page = f.engine.history(&admin, HistoryFilter::default()).await.unwrap();
        assert_eq!(page.total_items, 3);

        let filtered = HistoryFilter {
            search: Some("lara".to_string()),
            ..Default::default()
        };
        let page = f.engine.history(&admin, filtered).await.unwrap();
        assert_eq!(page.total_items, 1);
        assert_eq!(page.items[0].triage.id, theirs);

        assert_eq!(actions(&f.store.audit_events().await, AuditAction::HistoryViewed), 3);
    }

    #[tokio::test]
    async fn test_history_date_range_uses_clinic_days() {
        let f = fixture();
        // 诊所时间 10-06 23:30
        let late = Utc.with_ymd_and_hms(2024, 10, 7, 3, 30, 0).unwrap();
        register(&f.store, "1", "Fernando", late).await;
        register(&f.store, "2", "Gabriela", start()).await;
        let admin = actor(Role::Administrator);

        let filter = HistoryFilter {
            from: NaiveDate::from_ymd_opt(2024, 10, 6),
            until: NaiveDate::from_ymd_opt(2024, 10, 6),
            ..Default::default()
        };
        let page = f.engine.history(&admin, filter).await.unwrap();
        assert_eq!(page.total_items, 1);
        assert_eq!(page.items[0].patient.full_name, "Fernando");
    }

    #[tokio::test]
    async fn test_history_pagination_clamps() {
        let f = fixture();
        for i in 0..25 {
            register(&f.store, &i.to_string(), "Paciente", start() + Duration::minutes(i)).await;
        }
        let admin = actor(Role::Administrator);

        let page = f
            .engine
            .history(&admin, HistoryFilter { page: Some(9), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(page.page, 2);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.len(), 5);
    }

    #[tokio::test]
    async fn test_record_detail_access() {
        let f = fixture();
        let id = register(&f.store, "77", "Hugo Pinto", start()).await;
        register(&f.store, "77", "Hugo Pinto", start() + Duration::hours(1)).await;
        let doctor = actor(Role::Doctor);
        let stranger = actor(Role::Doctor);
        let admin = actor(Role::Administrator);

        // 尚无就诊会话时普通工作人员不能查看
        let err = f.engine.record_detail(&doctor, id).await.unwrap_err();
        assert!(matches!(err, TriageError::Permission(_)));

        f.engine.open_care(&doctor, id).await.unwrap();
        let detail = f.engine.record_detail(&doctor, id).await.unwrap();
        assert_eq!(detail.history.len(), 2);
        assert_eq!(detail.age, 29);

        let err = f.engine.record_detail(&stranger, id).await.unwrap_err();
        assert!(matches!(err, TriageError::Permission(_)));
        assert!(f.engine.record_detail(&admin, id).await.is_ok());

        let err = f.engine.record_detail(&admin, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, TriageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_record_admin_only() {
        let f = fixture();
        let id = register(&f.store, "5", "Iván Rojas", start()).await;
        let nurse = actor(Role::Nursing);
        let admin = actor(Role::Administrator);

        let err = f.engine.delete_record(&nurse, id).await.unwrap_err();
        assert!(matches!(err, TriageError::Permission(_)));

        let deletion = f.engine.delete_record(&admin, id).await.unwrap();
        assert!(deletion.patient_removed);
        assert_eq!(f.store.count_patients().await.unwrap(), 0);
        assert_eq!(actions(&f.store.audit_events().await, AuditAction::PatientDeleted), 1);

        let err = f.engine.delete_record(&admin, id).await.unwrap_err();
        assert!(matches!(err, TriageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_dashboard_counts_attended_today() {
        let f = fixture();
        let a = register(&f.store, "1", "Julia", start()).await;
        let b = register(&f.store, "2", "Karen", start()).await;
        register(&f.store, "3", "Luis", start()).await;
        let doctor = actor(Role::Doctor);
        let nurse = actor(Role::Nursing);
        f.engine.complete_care(&doctor, a, CareNotes::default()).await.unwrap();
        f.engine.complete_care(&nurse, b, CareNotes::default()).await.unwrap();

        let dashboard = f.engine.dashboard(&doctor).await.unwrap();
        assert_eq!(dashboard.attended_today, 1);
        assert_eq!(dashboard.queue.stats.total_waiting, 1);
        assert_eq!(dashboard.total_patients, 3);
        assert!(dashboard.in_care.is_empty());

        let admin = actor(Role::Administrator);
        assert_eq!(f.engine.dashboard(&admin).await.unwrap().attended_today, 2);

        f.clock.advance(Duration::days(1));
        assert_eq!(f.engine.dashboard(&admin).await.unwrap().attended_today, 0);
    }

    #[tokio::test]
    async fn test_report_is_admin_only_and_audited() {
        let f = fixture();
        let id = register(&f.store, "1", "Mario", start()).await;
        let doctor = actor(Role::Doctor);
        f.engine.complete_care(&doctor, id, CareNotes::default()).await.unwrap();

        let err = f.engine.generate_report(&doctor, None, None).await.unwrap_err();
        assert!(matches!(err, TriageError::Permission(_)));

        let admin = actor(Role::Administrator);
        let report = f.engine.generate_report(&admin, None, None).await.unwrap();
        assert_eq!(report.total_registered, 1);
        assert_eq!(report.total_completed, 1);
        assert_eq!(report.range.until, NaiveDate::from_ymd_opt(2024, 10, 7).unwrap());

        let chart = f.engine.report_chart(&admin, None, None).await.unwrap();
        assert_eq!(chart.priority_labels, vec!["High", "Medium", "Low"]);
        assert_eq!(chart.priority_data, vec![0, 1, 0]);
        assert_eq!(actions(&f.store.audit_events().await, AuditAction::ReportGenerated), 1);
    }
}
