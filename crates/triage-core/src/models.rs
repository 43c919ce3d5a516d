//! 核心数据模型定义

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// 性别枚举
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Sex {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
    #[serde(rename = "O")]
    Other,
}

impl Sex {
    pub fn code(self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
            Sex::Other => "O",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "M" => Some(Sex::Male),
            "F" => Some(Sex::Female),
            "O" => Some(Sex::Other),
            _ => None,
        }
    }
}

/// 就诊类型：初诊 / 复诊
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VisitType {
    #[default]
    New,
    Returning,
}

impl VisitType {
    pub fn as_str(self) -> &'static str {
        match self {
            VisitType::New => "new",
            VisitType::Returning => "returning",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(VisitType::New),
            "returning" => Some(VisitType::Returning),
            _ => None,
        }
    }
}

/// 患者基本信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub national_id: String, // 身份证号，全局唯一
    pub full_name: String,
    pub sex: Sex,
    pub birth_date: NaiveDate,
    pub visit_type: VisitType,
    pub registered_at: DateTime<Utc>,
}

impl Patient {
    /// 指定日期时的周岁
    pub fn age_on(&self, today: NaiveDate) -> u32 {
        let mut years = today.year() - self.birth_date.year();
        if (today.month(), today.day()) < (self.birth_date.month(), self.birth_date.day()) {
            years -= 1;
        }
        years.max(0) as u32
    }
}

/// 专科
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Specialty {
    GeneralMedicine,
    Pediatrics,
    Gynecology,
    Traumatology,
    Cardiology,
    Dermatology,
    Neurology,
    Ophthalmology,
    Otorhinolaryngology,
    Urology,
    Psychiatry,
    Emergencies,
}

impl Specialty {
    pub const ALL: [Specialty; 12] = [
        Specialty::GeneralMedicine,
        Specialty::Pediatrics,
        Specialty::Gynecology,
        Specialty::Traumatology,
        Specialty::Cardiology,
        Specialty::Dermatology,
        Specialty::Neurology,
        Specialty::Ophthalmology,
        Specialty::Otorhinolaryngology,
        Specialty::Urology,
        Specialty::Psychiatry,
        Specialty::Emergencies,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Specialty::GeneralMedicine => "general_medicine",
            Specialty::Pediatrics => "pediatrics",
            Specialty::Gynecology => "gynecology",
            Specialty::Traumatology => "traumatology",
            Specialty::Cardiology => "cardiology",
            Specialty::Dermatology => "dermatology",
            Specialty::Neurology => "neurology",
            Specialty::Ophthalmology => "ophthalmology",
            Specialty::Otorhinolaryngology => "otorhinolaryngology",
            Specialty::Urology => "urology",
            Specialty::Psychiatry => "psychiatry",
            Specialty::Emergencies => "emergencies",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Specialty::GeneralMedicine => "General Medicine",
            Specialty::Pediatrics => "Pediatrics",
            Specialty::Gynecology => "Gynecology",
            Specialty::Traumatology => "Traumatology",
            Specialty::Cardiology => "Cardiology",
            Specialty::Dermatology => "Dermatology",
            Specialty::Neurology => "Neurology",
            Specialty::Ophthalmology => "Ophthalmology",
            Specialty::Otorhinolaryngology => "Otorhinolaryngology",
            Specialty::Urology => "Urology",
            Specialty::Psychiatry => "Psychiatry",
            Specialty::Emergencies => "Emergencies",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

/// 服务类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    #[default]
    Outpatient,
    Laboratory,
    Inpatient,
    Surgery,
    Emergency,
    Pharmacy,
    Other,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Outpatient => "outpatient",
            ServiceType::Laboratory => "laboratory",
            ServiceType::Inpatient => "inpatient",
            ServiceType::Surgery => "surgery",
            ServiceType::Emergency => "emergency",
            ServiceType::Pharmacy => "pharmacy",
            ServiceType::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "outpatient" => Some(ServiceType::Outpatient),
            "laboratory" => Some(ServiceType::Laboratory),
            "inpatient" => Some(ServiceType::Inpatient),
            "surgery" => Some(ServiceType::Surgery),
            "emergency" => Some(ServiceType::Emergency),
            "pharmacy" => Some(ServiceType::Pharmacy),
            "other" => Some(ServiceType::Other),
            _ => None,
        }
    }
}

/// 分诊优先级
///
/// 存储中读回的未知取值保留为 `Unrecognized`，排队时排在最后。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    High,
    Medium,
    Low,
    #[serde(other)]
    Unrecognized,
}

impl PriorityTier {
    pub const KNOWN: [PriorityTier; 3] = [PriorityTier::High, PriorityTier::Medium, PriorityTier::Low];

    /// 排序权重，越小越优先
    pub fn rank(self) -> u8 {
        match self {
            PriorityTier::High => 0,
            PriorityTier::Medium => 1,
            PriorityTier::Low => 2,
            PriorityTier::Unrecognized => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PriorityTier::High => "high",
            PriorityTier::Medium => "medium",
            PriorityTier::Low => "low",
            PriorityTier::Unrecognized => "unrecognized",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PriorityTier::High => "High",
            PriorityTier::Medium => "Medium",
            PriorityTier::Low => "Low",
            PriorityTier::Unrecognized => "Unknown",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            PriorityTier::High => "#DC3545",
            PriorityTier::Medium => "#FFC107",
            PriorityTier::Low => "#28A745",
            PriorityTier::Unrecognized => "#6C757D",
        }
    }

    /// 解析存储值，未知值映射为 `Unrecognized`
    pub fn from_stored(value: &str) -> Self {
        match value {
            "high" => PriorityTier::High,
            "medium" => PriorityTier::Medium,
            "low" => PriorityTier::Low,
            _ => PriorityTier::Unrecognized,
        }
    }
}

/// 分诊记录生命周期状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CareStatus {
    Waiting,   // 候诊
    InCare,    // 就诊中
    Completed, // 已完成
    Withdrawn, // 已移出队列（未就诊）
}

impl CareStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CareStatus::Waiting => "waiting",
            CareStatus::InCare => "in_care",
            CareStatus::Completed => "completed",
            CareStatus::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "waiting" => Some(CareStatus::Waiting),
            "in_care" => Some(CareStatus::InCare),
            "completed" => Some(CareStatus::Completed),
            "withdrawn" => Some(CareStatus::Withdrawn),
            _ => None,
        }
    }
}

/// 生命体征
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    pub height_cm: f64,
    pub weight_kg: f64,
    pub temperature_c: f64,
    pub blood_pressure: String, // 例如 120/80
    pub pulse_bpm: u16,
}

/// 诊断自由文本
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub symptoms: Option<String>,
    pub treatment: Option<String>,
    pub studies_ordered: Option<String>,
}

/// 分诊记录，每次就诊一条
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageRecord {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub encounter_at: DateTime<Utc>,
    pub specialty: Specialty,
    pub clinician: String,
    pub nurse: String,
    pub service_type: ServiceType,
    pub vitals: Vitals,
    pub priority: PriorityTier,
    pub status: CareStatus,
    pub diagnosis: Diagnosis,
}

/// 就诊会话记录，与分诊记录一对一
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionRecord {
    pub id: Uuid,
    pub triage_id: Uuid,
    pub user_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub observations: Option<String>,
    pub dispensed_medication: Option<String>,
}

impl AttentionRecord {
    /// 已结束会话的时长（分钟）
    pub fn duration_minutes(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_minutes())
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == Some(user_id)
    }
}

/// 结束就诊时提交的内容
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CareNotes {
    pub observations: Option<String>,
    pub dispensed_medication: Option<String>,
}

/// 用户角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// 管理员 - 完全访问权限
    Administrator,
    /// 药房
    Pharmacy,
    /// 护理
    Nursing,
    /// 医生
    Doctor,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::Pharmacy => "pharmacy",
            Role::Nursing => "nursing",
            Role::Doctor => "doctor",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "administrator" => Some(Role::Administrator),
            "pharmacy" => Some(Role::Pharmacy),
            "nursing" => Some(Role::Nursing),
            "doctor" => Some(Role::Doctor),
            _ => None,
        }
    }

    pub fn is_admin(self) -> bool {
        self == Role::Administrator
    }
}

/// 用户账户
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: String,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

/// 当前请求的操作者
#[derive(Debug, Clone, Serialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub client_ip: Option<IpAddr>,
}

impl Actor {
    pub fn from_account(account: &UserAccount, client_ip: Option<IpAddr>) -> Self {
        Self {
            user_id: account.id,
            username: account.username.clone(),
            display_name: account.display_name.clone(),
            role: account.role,
            client_ip,
        }
    }
}

/// 审计动作（封闭词表）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AuditAction {
    #[serde(rename = "login")]
    Login,
    #[serde(rename = "logout")]
    Logout,
    #[serde(rename = "crear_paciente")]
    PatientCreated,
    #[serde(rename = "crear_triaje")]
    TriageCreated,
    #[serde(rename = "iniciar_atencion")]
    CareStarted,
    #[serde(rename = "finalizar_atencion")]
    CareFinished,
    #[serde(rename = "retirar_cola")]
    RemovedFromQueue,
    #[serde(rename = "ver_historial")]
    HistoryViewed,
    #[serde(rename = "generar_reporte")]
    ReportGenerated,
    #[serde(rename = "eliminar_paciente")]
    PatientDeleted,
    #[serde(rename = "crear_usuario")]
    UserCreated,
    #[serde(rename = "editar_usuario")]
    UserEdited,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::PatientCreated => "crear_paciente",
            AuditAction::TriageCreated => "crear_triaje",
            AuditAction::CareStarted => "iniciar_atencion",
            AuditAction::CareFinished => "finalizar_atencion",
            AuditAction::RemovedFromQueue => "retirar_cola",
            AuditAction::HistoryViewed => "ver_historial",
            AuditAction::ReportGenerated => "generar_reporte",
            AuditAction::PatientDeleted => "eliminar_paciente",
            AuditAction::UserCreated => "crear_usuario",
            AuditAction::UserEdited => "editar_usuario",
        }
    }
}

/// 审计事件，只追加
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: AuditAction,
    pub description: String,
    pub client_ip: Option<IpAddr>,
    pub occurred_at: DateTime<Utc>,
}

/// 一次就诊的联合视图：分诊记录 + 患者 + 就诊会话
#[derive(Debug, Clone, Serialize)]
pub struct Encounter {
    pub triage: TriageRecord,
    pub patient: Patient,
    pub attention: Option<AttentionRecord>,
}

impl Encounter {
    /// 就诊会话的负责人
    pub fn owner(&self) -> Option<Uuid> {
        self.attention.as_ref().and_then(|a| a.user_id)
    }
}

// 插入模型 - 用于创建新记录

/// 新患者
#[derive(Debug, Clone)]
pub struct NewPatient {
    pub national_id: String,
    pub full_name: String,
    pub sex: Sex,
    pub birth_date: NaiveDate,
    pub visit_type: VisitType,
}

/// 新分诊记录
#[derive(Debug, Clone)]
pub struct NewTriage {
    pub encounter_at: DateTime<Utc>,
    pub specialty: Specialty,
    pub clinician: String,
    pub nurse: String,
    pub service_type: ServiceType,
    pub vitals: Vitals,
    pub priority: PriorityTier,
    pub diagnosis: Diagnosis,
}

/// 新用户
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub display_name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// 登记提交的结果
#[derive(Debug, Clone)]
pub struct Registration {
    pub patient: Patient,
    pub triage: TriageRecord,
    /// 是否新建了患者行（否则为复诊）
    pub patient_created: bool,
}

/// 开始就诊的结果
#[derive(Debug, Clone)]
pub enum BeginAttention {
    /// 本次调用完成了 waiting -> in_care
    Started(AttentionRecord),
    /// 记录已在就诊中，返回已有会话
    Resumed(AttentionRecord),
}

impl BeginAttention {
    pub fn attention(&self) -> &AttentionRecord {
        match self {
            BeginAttention::Started(a) | BeginAttention::Resumed(a) => a,
        }
    }

    pub fn into_attention(self) -> AttentionRecord {
        match self {
            BeginAttention::Started(a) | BeginAttention::Resumed(a) => a,
        }
    }
}

/// 级联删除的结果
#[derive(Debug, Clone, Serialize)]
pub struct Deletion {
    pub triage_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub patient_removed: bool,
}
