//! 患者登记流程
//!
//! 四步草稿：身份信息、分诊分配、生命体征、诊断。前三步只写入草稿，
//! 第四步提交时在一次存储操作内完成患者查找/创建与分诊记录创建。

use crate::access::{authorize, Action};
use crate::audit::AuditTrail;
use chrono::{FixedOffset, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use triage_core::utils::{local_date, Clock};
use triage_core::{
    Actor, AuditAction, Diagnosis, FieldError, NewPatient, NewTriage, PriorityTier, Registration,
    Result, ServiceType, Sex, Specialty, TriageError, TriageStore, VisitType, Vitals,
};
use uuid::Uuid;

pub const FINAL_STEP: u8 = 4;

// 与数据库列宽一致
pub const MAX_NAME_CHARS: usize = 100;
pub const MAX_NATIONAL_ID_CHARS: usize = 20;

fn blood_pressure_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // 只接受 ASCII 数字
    PATTERN.get_or_init(|| Regex::new(r"^[0-9]{2,3}/[0-9]{2,3}$").unwrap())
}

/// 第一步：身份信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityStep {
    pub full_name: String,
    pub national_id: String,
    pub sex: Sex,
    pub birth_date: NaiveDate,
    #[serde(default)]
    pub visit_type: VisitType,
}

/// 第二步：专科与人员分配
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentStep {
    pub specialty: Specialty,
    pub clinician: String,
    pub nurse: String,
    #[serde(default)]
    pub service_type: ServiceType,
}

/// 第三步：生命体征与优先级
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VitalsStep {
    pub height_cm: f64,
    pub weight_kg: f64,
    pub temperature_c: f64,
    pub blood_pressure: String,
    pub pulse_bpm: u16,
    pub priority: PriorityTier,
}

/// 单步提交内容
#[derive(Debug, Clone)]
pub enum StepInput {
    Identity(IdentityStep),
    Assignment(AssignmentStep),
    Vitals(VitalsStep),
    Diagnosis(Diagnosis),
}

impl StepInput {
    pub fn number(&self) -> u8 {
        match self {
            StepInput::Identity(_) => 1,
            StepInput::Assignment(_) => 2,
            StepInput::Vitals(_) => 3,
            StepInput::Diagnosis(_) => 4,
        }
    }
}

/// 登记草稿，保存在调用者的会话中
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationDraft {
    pub id: Uuid,
    /// 下一个待填写的步骤（1..=4）
    pub current_step: u8,
    pub identity: Option<IdentityStep>,
    pub assignment: Option<AssignmentStep>,
    pub vitals: Option<VitalsStep>,
    pub diagnosis: Option<Diagnosis>,
}

impl RegistrationDraft {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            current_step: 1,
            identity: None,
            assignment: None,
            vitals: None,
            diagnosis: None,
        }
    }
}

impl Default for RegistrationDraft {
    fn default() -> Self {
        Self::new()
    }
}

/// 单步提交的结果
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// 已保存到草稿，等待下一步
    Advanced { next_step: u8 },
    /// 第四步提交成功，调用方应丢弃草稿
    Committed(Registration),
}

// ========== 字段校验 ==========

pub(crate) fn check_max_chars(errors: &mut Vec<FieldError>, field: &str, value: &str, max: usize) {
    if value.trim().chars().count() > max {
        errors.push(FieldError::new(field, format!("Must have at most {} characters", max)));
    }
}

fn validate_identity(step: &IdentityStep, today: NaiveDate) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if step.full_name.trim().chars().count() < 3 {
        errors.push(FieldError::new("full_name", "Full name must have at least 3 characters"));
    }
    check_max_chars(&mut errors, "full_name", &step.full_name, MAX_NAME_CHARS);
    if step.national_id.trim().is_empty() {
        errors.push(FieldError::new("national_id", "This field is required"));
    }
    check_max_chars(&mut errors, "national_id", &step.national_id, MAX_NATIONAL_ID_CHARS);
    if step.birth_date > today {
        errors.push(FieldError::new("birth_date", "Birth date cannot be in the future"));
    }
    errors
}

fn validate_assignment(step: &AssignmentStep) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if step.clinician.trim().is_empty() {
        errors.push(FieldError::new("clinician", "This field is required"));
    }
    check_max_chars(&mut errors, "clinician", &step.clinician, MAX_NAME_CHARS);
    if step.nurse.trim().is_empty() {
        errors.push(FieldError::new("nurse", "This field is required"));
    }
    check_max_chars(&mut errors, "nurse", &step.nurse, MAX_NAME_CHARS);
    errors
}

fn check_range(errors: &mut Vec<FieldError>, field: &str, value: f64, min: f64, max: f64) {
    if !value.is_finite() || value < min || value > max {
        errors.push(FieldError::new(field, format!("Must be between {} and {}", min, max)));
    }
}

fn validate_vitals(step: &VitalsStep) -> Vec<FieldError> {
    let mut errors = Vec::new();
    check_range(&mut errors, "height_cm", step.height_cm, 40.0, 250.0);
    check_range(&mut errors, "weight_kg", step.weight_kg, 1.0, 300.0);
    check_range(&mut errors, "temperature_c", step.temperature_c, 32.0, 43.0);
    check_range(&mut errors, "pulse_bpm", f64::from(step.pulse_bpm), 40.0, 200.0);
    if !blood_pressure_pattern().is_match(step.blood_pressure.trim()) {
        errors.push(FieldError::new("blood_pressure", "Use the format 120/80"));
    }
    if step.priority == PriorityTier::Unrecognized {
        errors.push(FieldError::new("priority", "Select high, medium or low"));
    }
    errors
}

/// 登记流程
#[derive(Clone)]
pub struct RegistrationPipeline {
    store: Arc<dyn TriageStore>,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl RegistrationPipeline {
    pub fn new(store: Arc<dyn TriageStore>, audit: AuditTrail, clock: Arc<dyn Clock>, offset: FixedOffset) -> Self {
        Self {
            store,
            audit,
            clock,
            offset,
        }
    }

    /// 提交一个步骤
    ///
    /// 只能提交当前步骤或已完成的步骤；校验失败时草稿不变。
    /// 第四步提交失败时草稿保持原样，可以重试。
    pub async fn submit(&self, actor: &Actor, draft: &mut RegistrationDraft, input: StepInput) -> Result<StepOutcome> {
        authorize(actor, None, Action::RegisterPatient)?;

        let step = input.number();
        if step > draft.current_step {
            return Err(TriageError::Validation(format!(
                "Step {} cannot be submitted before step {}",
                step, draft.current_step
            )));
        }

        let today = local_date(self.clock.now(), self.offset);
        match input {
            StepInput::Identity(mut identity) => {
                reject(validate_identity(&identity, today))?;
                identity.full_name = identity.full_name.trim().to_string();
                identity.national_id = identity.national_id.trim().to_string();
                draft.identity = Some(identity);
            }
            StepInput::Assignment(mut assignment) => {
                reject(validate_assignment(&assignment))?;
                assignment.clinician = assignment.clinician.trim().to_string();
                assignment.nurse = assignment.nurse.trim().to_string();
                draft.assignment = Some(assignment);
            }
            StepInput::Vitals(mut vitals) => {
                reject(validate_vitals(&vitals))?;
                vitals.blood_pressure = vitals.blood_pressure.trim().to_string();
                draft.vitals = Some(vitals);
            }
            StepInput::Diagnosis(diagnosis) => {
                draft.diagnosis = Some(diagnosis.clone());
                let registration = self.commit(actor, draft, diagnosis).await?;
                return Ok(StepOutcome::Committed(registration));
            }
        }

        if step == draft.current_step {
            draft.current_step = (step + 1).min(FINAL_STEP);
        }
        tracing::debug!("Registration draft {} advanced to step {}", draft.id, draft.current_step);
        Ok(StepOutcome::Advanced {
            next_step: draft.current_step,
        })
    }

    async fn commit(&self, actor: &Actor, draft: &RegistrationDraft, diagnosis: Diagnosis) -> Result<Registration> {
        let (Some(identity), Some(assignment), Some(vitals)) = (&draft.identity, &draft.assignment, &draft.vitals)
        else {
            return Err(TriageError::Validation("Registration draft is incomplete".to_string()));
        };

        let patient = NewPatient {
            national_id: identity.national_id.clone(),
            full_name: identity.full_name.clone(),
            sex: identity.sex,
            birth_date: identity.birth_date,
            visit_type: identity.visit_type,
        };
        let triage = NewTriage {
            encounter_at: self.clock.now(),
            specialty: assignment.specialty,
            clinician: assignment.clinician.clone(),
            nurse: assignment.nurse.clone(),
            service_type: assignment.service_type,
            vitals: Vitals {
                height_cm: vitals.height_cm,
                weight_kg: vitals.weight_kg,
                temperature_c: vitals.temperature_c,
                blood_pressure: vitals.blood_pressure.clone(),
                pulse_bpm: vitals.pulse_bpm,
            },
            priority: vitals.priority,
            diagnosis: normalize(diagnosis),
        };

        let registration = self.store.register_encounter(patient, triage).await.map_err(|e| {
            tracing::warn!("Registration draft {} failed to commit: {}", draft.id, e);
            e
        })?;

        tracing::info!(
            "Registered triage {} for patient {} with {} priority",
            registration.triage.id,
            registration.patient.id,
            registration.triage.priority.as_str()
        );

        if registration.patient_created {
            self.audit
                .record(
                    actor,
                    AuditAction::PatientCreated,
                    format!(
                        "Paciente creado: {} (CI: {})",
                        registration.patient.full_name, registration.patient.national_id
                    ),
                )
                .await;
        }
        self.audit
            .record(
                actor,
                AuditAction::TriageCreated,
                format!(
                    "Triaje creado para {} - Prioridad: {}",
                    registration.patient.full_name,
                    registration.triage.priority.label()
                ),
            )
            .await;

        Ok(registration)
    }

    /// 放弃草稿，任何时候调用都安全
    pub fn abandon(&self, draft: &mut Option<RegistrationDraft>) {
        if let Some(discarded) = draft.take() {
            tracing::debug!("Registration draft {} abandoned at step {}", discarded.id, discarded.current_step);
        }
    }
}

fn reject(errors: Vec<FieldError>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TriageError::InvalidInput(errors))
    }
}

fn normalize(diagnosis: Diagnosis) -> Diagnosis {
    let clean = |text: Option<String>| text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
    Diagnosis {
        symptoms: clean(diagnosis.symptoms),
        treatment: clean(diagnosis.treatment),
        studies_ordered: clean(diagnosis.studies_ordered),
    }
}
