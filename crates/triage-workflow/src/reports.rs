//! 统计报表
//!
//! 对日期范围内的就诊做汇总：总数、优先级分布、专科排名、每日趋势和人员效率。

use chrono::{FixedOffset, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use triage_core::utils::local_date;
use triage_core::{CareStatus, Encounter, PriorityTier, Result, Specialty, TriageError, UserAccount};
use uuid::Uuid;

const TOP_SPECIALTIES: usize = 10;

/// 报表日期范围（诊所时区，含首尾）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportRange {
    pub from: NaiveDate,
    pub until: NaiveDate,
}

impl ReportRange {
    /// 缺省结束日期为今天，缺省开始日期为结束日期前 `default_days` 天
    pub fn resolve(
        from: Option<NaiveDate>,
        until: Option<NaiveDate>,
        today: NaiveDate,
        default_days: u32,
    ) -> Result<Self> {
        let until = until.unwrap_or(today);
        let from = from.unwrap_or_else(|| until - chrono::Duration::days(i64::from(default_days)));
        if from > until {
            return Err(TriageError::Validation(format!(
                "Report start {} is after end {}",
                from, until
            )));
        }
        Ok(Self { from, until })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PriorityCount {
    pub priority: PriorityTier,
    pub label: &'static str,
    pub color: &'static str,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpecialtyCount {
    pub specialty: Specialty,
    pub label: &'static str,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub total: u64,
}

/// 人员效率
#[derive(Debug, Clone, Serialize)]
pub struct UserPerformance {
    pub user_id: Option<Uuid>,
    pub display_name: String,
    pub total_attended: u64,
    /// 平均处理时长（分钟，四舍五入）
    pub average_minutes: i64,
}

/// 统计报表
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub range: ReportRange,
    pub total_registered: u64,
    pub total_completed: u64,
    pub total_withdrawn: u64,
    pub by_priority: Vec<PriorityCount>,
    pub by_specialty: Vec<SpecialtyCount>,
    pub daily_trend: Vec<DailyCount>,
    pub by_user: Vec<UserPerformance>,
}

/// 图表数据
#[derive(Debug, Clone, Serialize)]
pub struct ChartData {
    pub priority_labels: Vec<&'static str>,
    pub priority_data: Vec<u64>,
    pub priority_colors: Vec<&'static str>,
    pub trend_labels: Vec<String>,
    pub trend_data: Vec<u64>,
}

impl Report {
    /// 汇总范围内的就诊
    pub fn build(range: ReportRange, encounters: &[Encounter], users: &[UserAccount], offset: FixedOffset) -> Self {
        let count_status = |status| encounters.iter().filter(|e| e.triage.status == status).count() as u64;

        let mut priorities: HashMap<PriorityTier, u64> = HashMap::new();
        let mut specialties: HashMap<Specialty, u64> = HashMap::new();
        let mut daily: BTreeMap<NaiveDate, u64> = BTreeMap::new();
        for encounter in encounters {
            *priorities.entry(encounter.triage.priority).or_insert(0) += 1;
            *specialties.entry(encounter.triage.specialty).or_insert(0) += 1;
            *daily.entry(local_date(encounter.triage.encounter_at, offset)).or_insert(0) += 1;
        }

        let mut by_priority: Vec<PriorityCount> = priorities
            .into_iter()
            .map(|(priority, total)| PriorityCount {
                priority,
                label: priority.label(),
                color: priority.color(),
                total,
            })
            .collect();
        by_priority.sort_by_key(|p| p.priority.rank());

        let mut by_specialty: Vec<SpecialtyCount> = specialties
            .into_iter()
            .map(|(specialty, total)| SpecialtyCount {
                specialty,
                label: specialty.label(),
                total,
            })
            .collect();
        by_specialty.sort_by(|a, b| b.total.cmp(&a.total).then(a.specialty.cmp(&b.specialty)));
        by_specialty.truncate(TOP_SPECIALTIES);

        let daily_trend = daily
            .into_iter()
            .map(|(date, total)| DailyCount { date, total })
            .collect();

        Self {
            range,
            total_registered: encounters.len() as u64,
            total_completed: count_status(CareStatus::Completed),
            total_withdrawn: count_status(CareStatus::Withdrawn),
            by_priority,
            by_specialty,
            daily_trend,
            by_user: user_performance(encounters, users),
        }
    }

    /// 图表数据；三个已知优先级总是出现，计数可以为 0
    pub fn chart(&self) -> ChartData {
        let total_for = |tier: PriorityTier| {
            self.by_priority
                .iter()
                .find(|p| p.priority == tier)
                .map_or(0, |p| p.total)
        };
        let mut tiers: Vec<(PriorityTier, u64)> =
            PriorityTier::KNOWN.iter().map(|&tier| (tier, total_for(tier))).collect();
        tiers.extend(
            self.by_priority
                .iter()
                .filter(|p| !PriorityTier::KNOWN.contains(&p.priority))
                .map(|p| (p.priority, p.total)),
        );

        ChartData {
            priority_labels: tiers.iter().map(|(tier, _)| tier.label()).collect(),
            priority_data: tiers.iter().map(|(_, total)| *total).collect(),
            priority_colors: tiers.iter().map(|(tier, _)| tier.color()).collect(),
            trend_labels: self.daily_trend.iter().map(|d| d.date.format("%d/%m").to_string()).collect(),
            trend_data: self.daily_trend.iter().map(|d| d.total).collect(),
        }
    }
}

fn user_performance(encounters: &[Encounter], users: &[UserAccount]) -> Vec<UserPerformance> {
    // user_id -> (会话数, 总分钟)
    let mut totals: HashMap<Option<Uuid>, (u64, i64)> = HashMap::new();
    for attention in encounters.iter().filter_map(|e| e.attention.as_ref()) {
        if let Some(minutes) = attention.duration_minutes() {
            let entry = totals.entry(attention.user_id).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += minutes.max(0);
        }
    }

    let names: HashMap<Uuid, &str> = users.iter().map(|u| (u.id, u.display_name.as_str())).collect();
    let mut stats: Vec<UserPerformance> = totals
        .into_iter()
        .map(|(user_id, (count, minutes))| UserPerformance {
            user_id,
            display_name: user_id
                .and_then(|id| names.get(&id).copied())
                .unwrap_or("Removed account")
                .to_string(),
            total_attended: count,
            average_minutes: (minutes as f64 / count as f64).round() as i64,
        })
        .collect();
    stats.sort_by(|a, b| {
        b.total_attended
            .cmp(&a.total_attended)
            .then_with(|| a.display_name.cmp(&b.display_name))
    });
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use triage_core::utils::clinic_offset;
    use triage_core::{
        AttentionRecord, Diagnosis, Patient, Role, ServiceType, Sex, TriageRecord, VisitType, Vitals,
    };

    fn encounter(
        priority: PriorityTier,
        specialty: Specialty,
        status: CareStatus,
        at: DateTime<Utc>,
        attention: Option<(Uuid, i64)>,
    ) -> Encounter {
        let triage_id = Uuid::new_v4();
        let patient_id = Uuid::new_v4();
        Encounter {
            triage: TriageRecord {
                id: triage_id,
                patient_id,
                encounter_at: at,
                specialty,
                clinician: "Dr. Rocha".to_string(),
                nurse: "Lic. Paz".to_string(),
                service_type: ServiceType::Outpatient,
                vitals: Vitals {
                    height_cm: 170.0,
                    weight_kg: 72.0,
                    temperature_c: 36.8,
                    blood_pressure: "118/76".to_string(),
                    pulse_bpm: 70,
                },
                priority,
                status,
                diagnosis: Diagnosis::default(),
            },
            patient: Patient {
                id: patient_id,
                national_id: triage_id.to_string(),
                full_name: "Paciente".to_string(),
                sex: Sex::Male,
                birth_date: chrono::NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
                visit_type: VisitType::New,
                registered_at: at,
            },
            attention: attention.map(|(user_id, minutes)| AttentionRecord {
                id: Uuid::new_v4(),
                triage_id,
                user_id: Some(user_id),
                started_at: at,
                finished_at: Some(at + Duration::minutes(minutes)),
                observations: None,
                dispensed_medication: None,
            }),
        }
    }

    fn user(id: Uuid, name: &str) -> UserAccount {
        UserAccount {
            id,
            username: name.to_lowercase(),
            password_hash: String::new(),
            display_name: name.to_string(),
            role: Role::Doctor,
            active: true,
            created_at: Utc::now(),
            failed_attempts: 0,
            locked_until: None,
        }
    }

    #[test]
    fn test_range_defaults() {
        let today = NaiveDate::from_ymd_opt(2024, 9, 30).unwrap();
        let range = ReportRange::resolve(None, None, today, 30).unwrap();
        assert_eq!(range.until, today);
        assert_eq!(range.from, NaiveDate::from_ymd_opt(2024, 8, 31).unwrap());

        let err = ReportRange::resolve(Some(today), Some(range.from), today, 30).unwrap_err();
        assert!(matches!(err, TriageError::Validation(_)));
    }

    #[test]
    fn test_report_aggregates() {
        let offset = clinic_offset(-240);
        let day1 = Utc.with_ymd_and_hms(2024, 9, 2, 14, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2024, 9, 3, 14, 0, 0).unwrap();
        let doctor = Uuid::new_v4();
        let nurse = Uuid::new_v4();

        let encounters = vec![
            encounter(PriorityTier::Low, Specialty::Pediatrics, CareStatus::Completed, day1, Some((doctor, 10))),
            encounter(PriorityTier::High, Specialty::Pediatrics, CareStatus::Completed, day1, Some((doctor, 15))),
            encounter(PriorityTier::High, Specialty::Urology, CareStatus::Completed, day2, Some((nurse, 30))),
            encounter(PriorityTier::Medium, Specialty::Urology, CareStatus::Withdrawn, day2, None),
            encounter(PriorityTier::Medium, Specialty::Dermatology, CareStatus::Waiting, day2, None),
        ];
        let users = vec![user(doctor, "Dr. Rocha"), user(nurse, "Lic. Paz")];
        let range = ReportRange {
            from: NaiveDate::from_ymd_opt(2024, 9, 1).unwrap(),
            until: NaiveDate::from_ymd_opt(2024, 9, 3).unwrap(),
        };

        let report = Report::build(range, &encounters, &users, offset);

        assert_eq!(report.total_registered, 5);
        assert_eq!(report.total_completed, 3);
        assert_eq!(report.total_withdrawn, 1);

        let tiers: Vec<(PriorityTier, u64)> = report.by_priority.iter().map(|p| (p.priority, p.total)).collect();
        assert_eq!(
            tiers,
            vec![(PriorityTier::High, 2), (PriorityTier::Medium, 2), (PriorityTier::Low, 1)]
        );

        assert_eq!(report.by_specialty[0].total, 2);
        assert_eq!(report.by_specialty.last().map(|s| s.specialty), Some(Specialty::Dermatology));

        let trend: Vec<u64> = report.daily_trend.iter().map(|d| d.total).collect();
        assert_eq!(trend, vec![2, 3]);

        assert_eq!(report.by_user[0].display_name, "Dr. Rocha");
        assert_eq!(report.by_user[0].total_attended, 2);
        // (10 + 15) / 2 = 12.5 -> 13
        assert_eq!(report.by_user[0].average_minutes, 13);
        assert_eq!(report.by_user[1].average_minutes, 30);

        let chart = report.chart();
        assert_eq!(chart.priority_labels, vec!["High", "Medium", "Low"]);
        assert_eq!(chart.priority_colors[0], "#DC3545");
        assert_eq!(chart.trend_labels, vec!["02/09", "03/09"]);
    }

    #[test]
    fn test_chart_lists_every_known_tier() {
        let range = ReportRange::resolve(None, None, NaiveDate::from_ymd_opt(2024, 9, 3).unwrap(), 30).unwrap();
        let report = Report::build(range, &[], &[], clinic_offset(-240));
        assert!(report.by_priority.is_empty());

        let chart = report.chart();
        assert_eq!(chart.priority_labels, vec!["High", "Medium", "Low"]);
        assert_eq!(chart.priority_data, vec![0, 0, 0]);
        assert_eq!(chart.priority_colors.len(), 3);
        assert!(chart.trend_labels.is_empty());
    }
}
