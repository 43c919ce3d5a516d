//! 通用工具函数

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use std::sync::Mutex;

/// 时间来源
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 可手动推进的时钟，用于测试和演示
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 诊所所在时区（固定偏移）
pub fn clinic_offset(utc_offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
}

/// 某时刻在诊所时区下的日期
pub fn local_date(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    at.with_timezone(&offset).date_naive()
}

/// 诊所时区某日的 [开始, 次日开始) 对应的 UTC 区间
pub fn local_day_bounds(date: NaiveDate, offset: FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_midnight(date, offset);
    (start, start + Duration::days(1))
}

/// 诊所时区某日零点对应的 UTC 时刻
pub fn local_midnight(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    offset
        .from_local_datetime(&midnight)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

/// 等待时长，格式 "{h}h {m}m"
pub fn format_wait(elapsed: Duration) -> String {
    let minutes = elapsed.num_minutes().max(0);
    format!("{}h {}m", minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_wait() {
        assert_eq!(format_wait(Duration::minutes(0)), "0h 0m");
        assert_eq!(format_wait(Duration::minutes(65)), "1h 5m");
        assert_eq!(format_wait(Duration::minutes(-3)), "0h 0m");
    }

    #[test]
    fn test_local_day_bounds() {
        let offset = clinic_offset(-240);
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let (start, end) = local_day_bounds(date, offset);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 10, 4, 0, 0).unwrap());
        assert_eq!(end - start, Duration::days(1));
    }

    #[test]
    fn test_local_date_crosses_midnight() {
        let offset = clinic_offset(-240);
        let late = Utc.with_ymd_and_hms(2024, 3, 11, 2, 30, 0).unwrap();
        assert_eq!(local_date(late, offset), NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::minutes(15));
        assert_eq!(clock.now(), start + Duration::minutes(15));
    }
}
