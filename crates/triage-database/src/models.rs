//! 数据库模型

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;
use triage_core::models::*;
use triage_core::{Result, TriageError};
use uuid::Uuid;

// 数据库表模型 - 使用FromRow trait用于SQL查询

fn corrupt(column: &str, value: &str) -> TriageError {
    TriageError::Database(format!("unexpected value {:?} in column {}", value, column))
}

/// 数据库患者表
#[derive(Debug, FromRow)]
pub struct DbPatient {
    pub id: Uuid,
    pub national_id: String,
    pub full_name: String,
    pub sex: String, // 存储为字符串，转换为Sex枚举
    pub birth_date: NaiveDate,
    pub visit_type: String,
    pub registered_at: DateTime<Utc>,
}

impl TryFrom<DbPatient> for Patient {
    type Error = TriageError;

    fn try_from(row: DbPatient) -> Result<Self> {
        Ok(Patient {
            id: row.id,
            sex: Sex::parse(&row.sex).ok_or_else(|| corrupt("patients.sex", &row.sex))?,
            visit_type: VisitType::parse(&row.visit_type)
                .ok_or_else(|| corrupt("patients.visit_type", &row.visit_type))?,
            national_id: row.national_id,
            full_name: row.full_name,
            birth_date: row.birth_date,
            registered_at: row.registered_at,
        })
    }
}

/// 数据库分诊表
#[derive(Debug, FromRow)]
pub struct DbTriage {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub encounter_at: DateTime<Utc>,
    pub specialty: String,
    pub clinician: String,
    pub nurse: String,
    pub service_type: String,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub temperature_c: f64,
    pub blood_pressure: String,
    pub pulse_bpm: i32,
    pub priority: String,
    pub status: String,
    pub symptoms: Option<String>,
    pub treatment: Option<String>,
    pub studies_ordered: Option<String>,
}

impl TryFrom<DbTriage> for TriageRecord {
    type Error = TriageError;

    fn try_from(row: DbTriage) -> Result<Self> {
        let pulse_bpm = u16::try_from(row.pulse_bpm)
            .map_err(|_| corrupt("triages.pulse_bpm", &row.pulse_bpm.to_string()))?;

        Ok(TriageRecord {
            id: row.id,
            patient_id: row.patient_id,
            encounter_at: row.encounter_at,
            specialty: Specialty::parse(&row.specialty)
                .ok_or_else(|| corrupt("triages.specialty", &row.specialty))?,
            service_type: ServiceType::parse(&row.service_type)
                .ok_or_else(|| corrupt("triages.service_type", &row.service_type))?,
            status: CareStatus::parse(&row.status).ok_or_else(|| corrupt("triages.status", &row.status))?,
            // 未知优先级保留下来，排队时排最后
            priority: PriorityTier::from_stored(&row.priority),
            clinician: row.clinician,
            nurse: row.nurse,
            vitals: Vitals {
                height_cm: row.height_cm,
                weight_kg: row.weight_kg,
                temperature_c: row.temperature_c,
                blood_pressure: row.blood_pressure,
                pulse_bpm,
            },
            diagnosis: Diagnosis {
                symptoms: row.symptoms,
                treatment: row.treatment,
                studies_ordered: row.studies_ordered,
            },
        })
    }
}

/// 数据库就诊会话表
#[derive(Debug, FromRow)]
pub struct DbAttention {
    pub id: Uuid,
    pub triage_id: Uuid,
    pub user_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub observations: Option<String>,
    pub dispensed_medication: Option<String>,
}

impl From<DbAttention> for AttentionRecord {
    fn from(row: DbAttention) -> Self {
        AttentionRecord {
            id: row.id,
            triage_id: row.triage_id,
            user_id: row.user_id,
            started_at: row.started_at,
            finished_at: row.finished_at,
            observations: row.observations,
            dispensed_medication: row.dispensed_medication,
        }
    }
}

/// 分诊 JOIN 患者 LEFT JOIN 就诊会话 的扁平行
#[derive(Debug, FromRow)]
pub struct DbEncounter {
    #[sqlx(flatten)]
    pub triage: DbTriage,
    pub p_national_id: String,
    pub p_full_name: String,
    pub p_sex: String,
    pub p_birth_date: NaiveDate,
    pub p_visit_type: String,
    pub p_registered_at: DateTime<Utc>,
    pub a_id: Option<Uuid>,
    pub a_user_id: Option<Uuid>,
    pub a_started_at: Option<DateTime<Utc>>,
    pub a_finished_at: Option<DateTime<Utc>>,
    pub a_observations: Option<String>,
    pub a_dispensed_medication: Option<String>,
}

impl TryFrom<DbEncounter> for Encounter {
    type Error = TriageError;

    fn try_from(row: DbEncounter) -> Result<Self> {
        let triage_id = row.triage.id;
        let patient = Patient::try_from(DbPatient {
            id: row.triage.patient_id,
            national_id: row.p_national_id,
            full_name: row.p_full_name,
            sex: row.p_sex,
            birth_date: row.p_birth_date,
            visit_type: row.p_visit_type,
            registered_at: row.p_registered_at,
        })?;

        let attention = match (row.a_id, row.a_started_at) {
            (Some(id), Some(started_at)) => Some(AttentionRecord {
                id,
                triage_id,
                user_id: row.a_user_id,
                started_at,
                finished_at: row.a_finished_at,
                observations: row.a_observations,
                dispensed_medication: row.a_dispensed_medication,
            }),
            _ => None,
        };

        Ok(Encounter {
            triage: TriageRecord::try_from(row.triage)?,
            patient,
            attention,
        })
    }
}

/// 数据库用户表
#[derive(Debug, FromRow)]
pub struct DbUser {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub display_name: String,
    pub role: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl TryFrom<DbUser> for UserAccount {
    type Error = TriageError;

    fn try_from(row: DbUser) -> Result<Self> {
        Ok(UserAccount {
            id: row.id,
            role: Role::parse(&row.role).ok_or_else(|| corrupt("users.role", &row.role))?,
            username: row.username,
            password_hash: row.password_hash,
            display_name: row.display_name,
            active: row.active,
            created_at: row.created_at,
            failed_attempts: row.failed_attempts.max(0) as u32,
            locked_until: row.locked_until,
        })
    }
}
