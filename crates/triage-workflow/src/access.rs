//! 访问控制策略
//!
//! 管理员拥有全部权限；普通工作人员（药房、护理、医生）可以查看队列、登记、
//! 开始就诊和移出队列，但只能查看和结束自己负责的就诊。默认拒绝。

use triage_core::{Actor, Result, Role, TriageError};
use uuid::Uuid;

/// 受控操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ViewQueue,
    RegisterPatient,
    OpenCare,
    CompleteCare,
    RemoveFromQueue,
    ViewHistory,
    ViewRecord,
    GenerateReport,
    ManageUsers,
    DeleteRecord,
}

/// 放行或拒绝的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    Administrator,
    StaffPermission,
    OwnAttention,
    NotOwner,
    AdminOnly,
}

/// 访问决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: DecisionReason,
}

impl Decision {
    fn allow(reason: DecisionReason) -> Self {
        Self { allowed: true, reason }
    }

    fn deny(reason: DecisionReason) -> Self {
        Self { allowed: false, reason }
    }
}

/// 评估一次访问请求
///
/// `owner` 是目标就诊会话的负责人，没有会话时为 `None`。
pub fn check(role: Role, caller: Uuid, owner: Option<Uuid>, action: Action) -> Decision {
    if role.is_admin() {
        return Decision::allow(DecisionReason::Administrator);
    }

    match action {
        Action::ViewQueue
        | Action::RegisterPatient
        | Action::OpenCare
        | Action::RemoveFromQueue
        | Action::ViewHistory => Decision::allow(DecisionReason::StaffPermission),
        Action::ViewRecord | Action::CompleteCare => {
            if owner == Some(caller) {
                Decision::allow(DecisionReason::OwnAttention)
            } else {
                Decision::deny(DecisionReason::NotOwner)
            }
        }
        Action::GenerateReport | Action::ManageUsers | Action::DeleteRecord => {
            Decision::deny(DecisionReason::AdminOnly)
        }
    }
}

/// 在特权操作开始时调用，拒绝时返回权限错误
pub fn authorize(actor: &Actor, owner: Option<Uuid>, action: Action) -> Result<()> {
    let decision = check(actor.role, actor.user_id, owner, action);
    if decision.allowed {
        return Ok(());
    }

    tracing::warn!(
        "Access denied: user {} ({}) attempted {:?} ({:?})",
        actor.username,
        actor.role.as_str(),
        action,
        decision.reason
    );
    let message = match decision.reason {
        DecisionReason::NotOwner => "This record belongs to another staff member",
        _ => "This action requires administrator privileges",
    };
    Err(TriageError::Permission(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAFF: [Role; 3] = [Role::Pharmacy, Role::Nursing, Role::Doctor];

    #[test]
    fn test_admin_can_do_everything() {
        let admin = Uuid::new_v4();
        for action in [
            Action::ViewRecord,
            Action::CompleteCare,
            Action::GenerateReport,
            Action::ManageUsers,
            Action::DeleteRecord,
        ] {
            assert!(check(Role::Administrator, admin, Some(Uuid::new_v4()), action).allowed);
        }
    }

    #[test]
    fn test_staff_scope() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        for role in STAFF {
            assert!(check(role, me, None, Action::ViewQueue).allowed);
            assert!(check(role, me, None, Action::RegisterPatient).allowed);
            assert!(check(role, me, None, Action::RemoveFromQueue).allowed);
            assert!(check(role, me, Some(me), Action::ViewRecord).allowed);
            assert!(check(role, me, Some(me), Action::CompleteCare).allowed);

            assert!(!check(role, me, Some(other), Action::ViewRecord).allowed);
            assert!(!check(role, me, None, Action::ViewRecord).allowed);
            assert!(!check(role, me, Some(me), Action::GenerateReport).allowed);
            assert!(!check(role, me, None, Action::ManageUsers).allowed);
            assert!(!check(role, me, Some(me), Action::DeleteRecord).allowed);
        }
    }

    #[test]
    fn test_authorize_returns_permission_error() {
        let actor = Actor {
            user_id: Uuid::new_v4(),
            username: "enfermera".to_string(),
            display_name: "Enfermera".to_string(),
            role: Role::Nursing,
            client_ip: None,
        };
        let err = authorize(&actor, Some(Uuid::new_v4()), Action::ViewRecord).unwrap_err();
        assert!(matches!(err, TriageError::Permission(_)));
        assert!(authorize(&actor, None, Action::OpenCare).is_ok());
    }
}
