//! 登录失败锁定
//!
//! 锁定检查先于密码校验。失败计数只在成功登录时清零，
//! 锁定到期后再次失败会立即重新锁定。

use chrono::{DateTime, Duration, Utc};
use triage_core::{Result, TriageError, UserAccount};

/// 锁定策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_failed_attempts: u32,
    pub lockout: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 3,
            lockout: Duration::minutes(15),
        }
    }
}

/// 账户守卫
#[derive(Debug, Clone, Default)]
pub struct AccountGuard {
    policy: LockoutPolicy,
}

impl AccountGuard {
    pub fn new(policy: LockoutPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> LockoutPolicy {
        self.policy
    }

    /// 账户仍在锁定期内时返回 `AccountLocked`
    pub fn check_lock(&self, account: &UserAccount, now: DateTime<Utc>) -> Result<()> {
        match account.locked_until {
            Some(until) if until > now => Err(TriageError::AccountLocked { until }),
            _ => Ok(()),
        }
    }

    /// 本次失败触发锁定时的锁定截止时间
    pub fn lock_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.policy.lockout
    }

    /// 由存储原子累加后的失败次数得出应报告给调用方的错误
    pub fn failure_error(
        &self,
        failed_attempts: u32,
        locked_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> TriageError {
        if failed_attempts >= self.policy.max_failed_attempts {
            let until = locked_until.unwrap_or_else(|| self.lock_deadline(now));
            return TriageError::AccountLocked { until };
        }

        TriageError::InvalidCredentials {
            remaining_attempts: Some(self.policy.max_failed_attempts - failed_attempts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use triage_core::Role;
    use uuid::Uuid;

    fn account() -> UserAccount {
        UserAccount {
            id: Uuid::new_v4(),
            username: "doctor1".to_string(),
            password_hash: String::new(),
            display_name: "Dr. Uno".to_string(),
            role: Role::Doctor,
            active: true,
            created_at: Utc::now(),
            failed_attempts: 0,
            locked_until: None,
        }
    }

    #[test]
    fn test_three_failures_lock() {
        let guard = AccountGuard::default();
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap();

        let first = guard.failure_error(1, None, now);
        assert!(matches!(first, TriageError::InvalidCredentials { remaining_attempts: Some(2) }));
        let second = guard.failure_error(2, None, now);
        assert!(matches!(second, TriageError::InvalidCredentials { remaining_attempts: Some(1) }));

        let expected = guard.lock_deadline(now);
        assert_eq!(expected, now + Duration::minutes(15));
        let third = guard.failure_error(3, Some(expected), now);
        assert!(matches!(third, TriageError::AccountLocked { until } if until == expected));

        let mut user = account();
        user.failed_attempts = 3;
        user.locked_until = Some(expected);
        assert!(guard.check_lock(&user, now + Duration::minutes(14)).is_err());
        assert!(guard.check_lock(&user, now + Duration::minutes(15)).is_ok());
    }

    #[test]
    fn test_counter_past_threshold_stays_locked() {
        let guard = AccountGuard::default();
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap();

        // 锁定到期后计数未清零，再失败一次立即重新锁定
        let err = guard.failure_error(4, Some(guard.lock_deadline(now)), now);
        assert!(matches!(err, TriageError::AccountLocked { .. }));
    }

    #[test]
    fn test_custom_policy() {
        let guard = AccountGuard::new(LockoutPolicy {
            max_failed_attempts: 5,
            lockout: Duration::minutes(1),
        });
        let now = Utc::now();
        assert_eq!(guard.policy().max_failed_attempts, 5);
        assert_eq!(guard.lock_deadline(now), now + Duration::minutes(1));
        assert!(matches!(
            guard.failure_error(1, None, now),
            TriageError::InvalidCredentials { remaining_attempts: Some(4) }
        ));
    }
}
