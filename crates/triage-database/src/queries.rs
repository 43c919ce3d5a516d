//! 数据库查询操作
//!
//! PostgreSQL 实现。状态转换在事务内 `SELECT ... FOR UPDATE` 重新读取状态，
//! `attentions.triage_id` 的唯一约束保证一条分诊记录最多一个就诊会话。

use crate::connection::DatabasePool;
use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder, Row};
use triage_core::{
    AttentionRecord, AuditEvent, AuditSink, BeginAttention, CareNotes, CareStatus, Deletion,
    Encounter, EncounterQuery, NewPatient, NewTriage, NewUser, Patient, Registration, Result,
    TriageError, TriageRecord, TriageStore, UserAccount,
};
use uuid::Uuid;

const ENCOUNTER_SELECT: &str = r#"
    SELECT t.id, t.patient_id, t.encounter_at, t.specialty, t.clinician, t.nurse, t.service_type,
           t.height_cm, t.weight_kg, t.temperature_c, t.blood_pressure, t.pulse_bpm,
           t.priority, t.status, t.symptoms, t.treatment, t.studies_ordered,
           p.national_id AS p_national_id, p.full_name AS p_full_name, p.sex AS p_sex,
           p.birth_date AS p_birth_date, p.visit_type AS p_visit_type, p.registered_at AS p_registered_at,
           a.id AS a_id, a.user_id AS a_user_id, a.started_at AS a_started_at,
           a.finished_at AS a_finished_at, a.observations AS a_observations,
           a.dispensed_medication AS a_dispensed_medication
    FROM triages t
    JOIN patients p ON p.id = t.patient_id
    LEFT JOIN attentions a ON a.triage_id = t.id
"#;

/// 数据库查询操作接口
#[derive(Debug, Clone)]
pub struct DatabaseQueries {
    pool: DatabasePool,
}

impl DatabaseQueries {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        // 创建用户表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                username VARCHAR(150) UNIQUE NOT NULL,
                password_hash VARCHAR(255) NOT NULL,
                display_name VARCHAR(100) NOT NULL,
                role VARCHAR(20) NOT NULL,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                failed_attempts INTEGER NOT NULL DEFAULT 0,
                locked_until TIMESTAMP WITH TIME ZONE
            )
        "#).execute(pool).await?;

        // 创建患者表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS patients (
                id UUID PRIMARY KEY,
                national_id VARCHAR(20) UNIQUE NOT NULL,
                full_name VARCHAR(100) NOT NULL,
                sex CHAR(1) NOT NULL,
                birth_date DATE NOT NULL,
                visit_type VARCHAR(10) NOT NULL DEFAULT 'new',
                registered_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await?;

        // 创建分诊表，seq 保证同一时刻到达的记录保持插入顺序
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS triages (
                id UUID PRIMARY KEY,
                seq BIGSERIAL,
                patient_id UUID NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
                encounter_at TIMESTAMP WITH TIME ZONE NOT NULL,
                specialty VARCHAR(50) NOT NULL,
                clinician VARCHAR(100) NOT NULL,
                nurse VARCHAR(100) NOT NULL,
                service_type VARCHAR(20) NOT NULL DEFAULT 'outpatient',
                height_cm DOUBLE PRECISION NOT NULL,
                weight_kg DOUBLE PRECISION NOT NULL,
                temperature_c DOUBLE PRECISION NOT NULL,
                blood_pressure VARCHAR(10) NOT NULL CHECK (blood_pressure ~ '^[0-9]{2,3}/[0-9]{2,3}$'),
                pulse_bpm INTEGER NOT NULL,
                priority VARCHAR(10) NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'waiting',
                symptoms TEXT,
                treatment TEXT,
                studies_ordered TEXT
            )
        "#).execute(pool).await?;

        // 创建就诊会话表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS attentions (
                id UUID PRIMARY KEY,
                triage_id UUID UNIQUE NOT NULL REFERENCES triages(id) ON DELETE CASCADE,
                user_id UUID REFERENCES users(id) ON DELETE SET NULL,
                started_at TIMESTAMP WITH TIME ZONE NOT NULL,
                finished_at TIMESTAMP WITH TIME ZONE,
                observations TEXT,
                dispensed_medication TEXT
            )
        "#).execute(pool).await?;

        // 创建审计表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                id UUID PRIMARY KEY,
                user_id UUID REFERENCES users(id) ON DELETE SET NULL,
                action VARCHAR(50) NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                client_ip VARCHAR(45),
                occurred_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await?;

        // 创建索引以优化查询性能
        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = vec![
            "CREATE INDEX IF NOT EXISTS idx_patients_full_name ON patients(full_name)",
            "CREATE INDEX IF NOT EXISTS idx_triages_status ON triages(status)",
            "CREATE INDEX IF NOT EXISTS idx_triages_patient_id ON triages(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_triages_encounter_at ON triages(encounter_at)",
            "CREATE INDEX IF NOT EXISTS idx_attentions_user_id ON attentions(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_attentions_finished_at ON attentions(finished_at)",
            "CREATE INDEX IF NOT EXISTS idx_audit_events_occurred_at ON audit_events(occurred_at)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql).execute(pool).await?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }

    async fn fetch_attention<'e, E>(executor: E, triage_id: Uuid) -> Result<Option<AttentionRecord>>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let row = sqlx::query_as::<_, DbAttention>("SELECT * FROM attentions WHERE triage_id = $1")
            .bind(triage_id)
            .fetch_optional(executor)
            .await?;
        Ok(row.map(AttentionRecord::from))
    }

    async fn locked_status(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        triage_id: Uuid,
    ) -> Result<CareStatus> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM triages WHERE id = $1 FOR UPDATE")
            .bind(triage_id)
            .fetch_optional(&mut **tx)
            .await?;

        let status = status.ok_or_else(|| TriageError::NotFound(format!("Triage record {} not found", triage_id)))?;
        CareStatus::parse(&status)
            .ok_or_else(|| TriageError::Database(format!("unexpected triage status {:?}", status)))
    }
}

#[async_trait]
impl TriageStore for DatabaseQueries {
    // ========== 患者与登记 ==========

    async fn register_encounter(&self, patient: NewPatient, triage: NewTriage) -> Result<Registration> {
        let mut tx = self.pool.pool().begin().await?;

        // 同一身份证号重复登记只把就诊类型改为复诊；xmax = 0 表示本次插入
        let row = sqlx::query(r#"
            INSERT INTO patients (id, national_id, full_name, sex, birth_date, visit_type, registered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (national_id) DO UPDATE SET visit_type = 'returning'
            RETURNING id, national_id, full_name, sex, birth_date, visit_type, registered_at, (xmax = 0) AS inserted
        "#)
        .bind(Uuid::new_v4())
        .bind(&patient.national_id)
        .bind(&patient.full_name)
        .bind(patient.sex.code())
        .bind(patient.birth_date)
        .bind(patient.visit_type.as_str())
        .bind(triage.encounter_at)
        .fetch_one(&mut *tx)
        .await?;

        let patient_created: bool = row.try_get("inserted")?;
        let patient = Patient::try_from(DbPatient {
            id: row.try_get("id")?,
            national_id: row.try_get("national_id")?,
            full_name: row.try_get("full_name")?,
            sex: row.try_get("sex")?,
            birth_date: row.try_get("birth_date")?,
            visit_type: row.try_get("visit_type")?,
            registered_at: row.try_get("registered_at")?,
        })?;

        let db_triage = sqlx::query_as::<_, DbTriage>(r#"
            INSERT INTO triages (id, patient_id, encounter_at, specialty, clinician, nurse, service_type,
                                 height_cm, weight_kg, temperature_c, blood_pressure, pulse_bpm,
                                 priority, status, symptoms, treatment, studies_ordered)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 'waiting', $14, $15, $16)
            RETURNING id, patient_id, encounter_at, specialty, clinician, nurse, service_type,
                      height_cm, weight_kg, temperature_c, blood_pressure, pulse_bpm,
                      priority, status, symptoms, treatment, studies_ordered
        "#)
        .bind(Uuid::new_v4())
        .bind(patient.id)
        .bind(triage.encounter_at)
        .bind(triage.specialty.as_str())
        .bind(&triage.clinician)
        .bind(&triage.nurse)
        .bind(triage.service_type.as_str())
        .bind(triage.vitals.height_cm)
        .bind(triage.vitals.weight_kg)
        .bind(triage.vitals.temperature_c)
        .bind(&triage.vitals.blood_pressure)
        .bind(i32::from(triage.vitals.pulse_bpm))
        .bind(triage.priority.as_str())
        .bind(&triage.diagnosis.symptoms)
        .bind(&triage.diagnosis.treatment)
        .bind(&triage.diagnosis.studies_ordered)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Registration {
            patient,
            triage: TriageRecord::try_from(db_triage)?,
            patient_created,
        })
    }

    async fn find_patient_by_national_id(&self, national_id: &str) -> Result<Option<Patient>> {
        let row = sqlx::query_as::<_, DbPatient>("SELECT * FROM patients WHERE national_id = $1")
            .bind(national_id)
            .fetch_optional(self.pool.pool())
            .await?;

        row.map(Patient::try_from).transpose()
    }

    async fn count_patients(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patients")
            .fetch_one(self.pool.pool())
            .await?;
        Ok(count.max(0) as u64)
    }

    // ========== 就诊查询 ==========

    async fn get_encounter(&self, triage_id: Uuid) -> Result<Option<Encounter>> {
        let sql = format!("{} WHERE t.id = $1", ENCOUNTER_SELECT);
        let row = sqlx::query_as::<_, DbEncounter>(&sql)
            .bind(triage_id)
            .fetch_optional(self.pool.pool())
            .await?;

        row.map(Encounter::try_from).transpose()
    }

    async fn encounters_by_status(&self, status: CareStatus) -> Result<Vec<Encounter>> {
        let sql = format!("{} WHERE t.status = $1 ORDER BY t.seq", ENCOUNTER_SELECT);
        let rows = sqlx::query_as::<_, DbEncounter>(&sql)
            .bind(status.as_str())
            .fetch_all(self.pool.pool())
            .await?;

        rows.into_iter().map(Encounter::try_from).collect()
    }

    async fn search_encounters(&self, query: &EncounterQuery) -> Result<Vec<Encounter>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(ENCOUNTER_SELECT);
        builder.push(" WHERE TRUE");

        if let Some(user_id) = query.attended_by {
            builder.push(" AND a.user_id = ").push_bind(user_id);
        }
        if let Some(status) = query.status {
            builder.push(" AND t.status = ").push_bind(status.as_str());
        }
        if let Some(from) = query.from {
            builder.push(" AND t.encounter_at >= ").push_bind(from);
        }
        if let Some(until) = query.until {
            builder.push(" AND t.encounter_at < ").push_bind(until);
        }
        if let Some(term) = query.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let pattern = format!("%{}%", term);
            builder
                .push(" AND (p.full_name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR p.national_id ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        builder.push(" ORDER BY t.encounter_at DESC, t.seq");

        let rows = builder
            .build_query_as::<DbEncounter>()
            .fetch_all(self.pool.pool())
            .await?;

        rows.into_iter().map(Encounter::try_from).collect()
    }

    async fn patient_triages(&self, patient_id: Uuid) -> Result<Vec<TriageRecord>> {
        let rows = sqlx::query_as::<_, DbTriage>(r#"
            SELECT id, patient_id, encounter_at, specialty, clinician, nurse, service_type,
                   height_cm, weight_kg, temperature_c, blood_pressure, pulse_bpm,
                   priority, status, symptoms, treatment, studies_ordered
            FROM triages WHERE patient_id = $1 ORDER BY encounter_at DESC
        "#)
        .bind(patient_id)
        .fetch_all(self.pool.pool())
        .await?;

        rows.into_iter().map(TriageRecord::try_from).collect()
    }

    async fn count_finished_attentions(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        user_id: Option<Uuid>,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(r#"
            SELECT COUNT(*) FROM attentions
            WHERE finished_at >= $1 AND finished_at < $2
              AND ($3::uuid IS NULL OR user_id = $3)
        "#)
        .bind(from)
        .bind(until)
        .bind(user_id)
        .fetch_one(self.pool.pool())
        .await?;
        Ok(count.max(0) as u64)
    }

    // ========== 状态转换 ==========

    async fn begin_attention(&self, triage_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> Result<BeginAttention> {
        let mut tx = self.pool.pool().begin().await?;
        let status = Self::locked_status(&mut tx, triage_id).await?;

        let started = match status {
            CareStatus::Waiting => {
                sqlx::query("UPDATE triages SET status = 'in_care' WHERE id = $1 AND status = 'waiting'")
                    .bind(triage_id)
                    .execute(&mut *tx)
                    .await?;
                true
            }
            CareStatus::InCare => false,
            CareStatus::Completed | CareStatus::Withdrawn => {
                return Err(TriageError::Conflict(format!(
                    "Triage record {} is {} and cannot be treated again",
                    triage_id,
                    status.as_str()
                )));
            }
        };

        sqlx::query(r#"
            INSERT INTO attentions (id, triage_id, user_id, started_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (triage_id) DO NOTHING
        "#)
        .bind(Uuid::new_v4())
        .bind(triage_id)
        .bind(user_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        let attention = Self::fetch_attention(&mut *tx, triage_id)
            .await?
            .ok_or_else(|| TriageError::Internal(format!("Attention for {} vanished", triage_id)))?;
        tx.commit().await?;

        Ok(if started {
            BeginAttention::Started(attention)
        } else {
            BeginAttention::Resumed(attention)
        })
    }

    async fn finish_attention(&self, triage_id: Uuid, notes: &CareNotes, at: DateTime<Utc>) -> Result<AttentionRecord> {
        let mut tx = self.pool.pool().begin().await?;
        let status = Self::locked_status(&mut tx, triage_id).await?;
        if status != CareStatus::InCare {
            return Err(TriageError::Conflict(format!(
                "Triage record {} is {}, not in care",
                triage_id,
                status.as_str()
            )));
        }

        let attention = sqlx::query_as::<_, DbAttention>(r#"
            UPDATE attentions
            SET finished_at = $2, observations = $3, dispensed_medication = $4
            WHERE triage_id = $1 AND finished_at IS NULL
            RETURNING *
        "#)
        .bind(triage_id)
        .bind(at)
        .bind(&notes.observations)
        .bind(&notes.dispensed_medication)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            TriageError::Internal(format!("Triage record {} is in care without an open attention record", triage_id))
        })?;

        sqlx::query("UPDATE triages SET status = 'completed' WHERE id = $1 AND status = 'in_care'")
            .bind(triage_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(AttentionRecord::from(attention))
    }

    async fn withdraw(&self, triage_id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE triages SET status = 'withdrawn' WHERE id = $1 AND status = 'waiting'")
            .bind(triage_id)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM triages WHERE id = $1)")
            .bind(triage_id)
            .fetch_one(self.pool.pool())
            .await?;
        if exists {
            Ok(false)
        } else {
            Err(TriageError::NotFound(format!("Triage record {} not found", triage_id)))
        }
    }

    async fn delete_encounter(&self, triage_id: Uuid) -> Result<Option<Deletion>> {
        let mut tx = self.pool.pool().begin().await?;

        let row = sqlx::query(r#"
            SELECT t.patient_id, p.full_name
            FROM triages t JOIN patients p ON p.id = t.patient_id
            WHERE t.id = $1
            FOR UPDATE
        "#)
        .bind(triage_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let patient_id: Uuid = row.try_get("patient_id")?;
        let patient_name: String = row.try_get("full_name")?;

        // 就诊会话通过外键级联删除
        sqlx::query("DELETE FROM triages WHERE id = $1")
            .bind(triage_id)
            .execute(&mut *tx)
            .await?;

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM triages WHERE patient_id = $1")
            .bind(patient_id)
            .fetch_one(&mut *tx)
            .await?;

        let patient_removed = remaining == 0;
        if patient_removed {
            sqlx::query("DELETE FROM patients WHERE id = $1")
                .bind(patient_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(Some(Deletion {
            triage_id,
            patient_id,
            patient_name,
            patient_removed,
        }))
    }

    // ========== 用户账户 ==========

    async fn get_user(&self, id: Uuid) -> Result<Option<UserAccount>> {
        let row = sqlx::query_as::<_, DbUser>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;

        row.map(UserAccount::try_from).transpose()
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserAccount>> {
        let row = sqlx::query_as::<_, DbUser>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(self.pool.pool())
            .await?;

        row.map(UserAccount::try_from).transpose()
    }

    async fn list_users(&self) -> Result<Vec<UserAccount>> {
        let rows = sqlx::query_as::<_, DbUser>("SELECT * FROM users ORDER BY created_at DESC")
            .fetch_all(self.pool.pool())
            .await?;

        rows.into_iter().map(UserAccount::try_from).collect()
    }

    async fn create_user(&self, user: NewUser) -> Result<UserAccount> {
        let row = sqlx::query_as::<_, DbUser>(r#"
            INSERT INTO users (id, username, password_hash, display_name, role, active, created_at)
            VALUES ($1, $2, $3, $4, $5, TRUE, $6)
            RETURNING *
        "#)
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .fetch_one(self.pool.pool())
        .await?;

        UserAccount::try_from(row)
    }

    async fn update_user(&self, user: &UserAccount) -> Result<()> {
        let result = sqlx::query(r#"
            UPDATE users
            SET password_hash = $2, display_name = $3, role = $4, active = $5
            WHERE id = $1
        "#)
        .bind(user.id)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(user.role.as_str())
        .bind(user.active)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(TriageError::NotFound(format!("User {} not found", user.id)));
        }
        Ok(())
    }

    async fn register_failed_login(
        &self,
        user_id: Uuid,
        max_attempts: u32,
        lock_until: DateTime<Utc>,
    ) -> Result<(u32, Option<DateTime<Utc>>)> {
        // 右侧的 failed_attempts 是更新前的值
        let row: Option<(i32, Option<DateTime<Utc>>)> = sqlx::query_as(r#"
            UPDATE users
            SET failed_attempts = failed_attempts + 1,
                locked_until = CASE WHEN failed_attempts + 1 >= $2 THEN $3 ELSE locked_until END
            WHERE id = $1
            RETURNING failed_attempts, locked_until
        "#)
        .bind(user_id)
        .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
        .bind(lock_until)
        .fetch_optional(self.pool.pool())
        .await?;

        let (attempts, locked_until) =
            row.ok_or_else(|| TriageError::NotFound(format!("User {} not found", user_id)))?;
        Ok((attempts.max(0) as u32, locked_until))
    }

    async fn clear_failed_logins(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let cleared: Option<Uuid> = sqlx::query_scalar(r#"
            UPDATE users SET failed_attempts = 0, locked_until = NULL
            WHERE id = $1 AND (locked_until IS NULL OR locked_until <= $2)
            RETURNING id
        "#)
        .bind(user_id)
        .bind(now)
        .fetch_optional(self.pool.pool())
        .await?;

        if cleared.is_some() {
            return Ok(None);
        }

        let locked_until: Option<Option<DateTime<Utc>>> =
            sqlx::query_scalar("SELECT locked_until FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(self.pool.pool())
                .await?;
        locked_until.ok_or_else(|| TriageError::NotFound(format!("User {} not found", user_id)))
    }
}

#[async_trait]
impl AuditSink for DatabaseQueries {
    async fn append(&self, event: AuditEvent) -> Result<()> {
        sqlx::query(r#"
            INSERT INTO audit_events (id, user_id, action, description, client_ip, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        "#)
        .bind(event.id)
        .bind(event.user_id)
        .bind(event.action.as_str())
        .bind(&event.description)
        .bind(event.client_ip.map(|ip| ip.to_string()))
        .bind(event.occurred_at)
        .execute(self.pool.pool())
        .await?;
        Ok(())
    }
}
