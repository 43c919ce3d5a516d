//! 就诊状态机
//!
//! 管理分诊记录从候诊到就诊完成的生命周期状态转换

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use triage_core::{CareStatus, Result, TriageError};

/// 状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CareEvent {
    /// 开始就诊
    Start,
    /// 结束就诊
    Finish,
    /// 移出候诊队列
    Withdraw,
}

/// 就诊状态机
#[derive(Debug)]
pub struct CareStateMachine {
    transitions: HashMap<(CareStatus, CareEvent), CareStatus>,
}

impl CareStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        // 定义状态转换规则，终态没有出边
        transitions.insert((CareStatus::Waiting, CareEvent::Start), CareStatus::InCare);
        transitions.insert((CareStatus::InCare, CareEvent::Finish), CareStatus::Completed);
        transitions.insert((CareStatus::Waiting, CareEvent::Withdraw), CareStatus::Withdrawn);

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: CareStatus, event: CareEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: CareStatus, event: CareEvent) -> Result<CareStatus> {
        match self.transitions.get(&(from, event)) {
            Some(to) => Ok(*to),
            None => Err(TriageError::InvalidStateTransition {
                from: from.as_str().to_string(),
                event: format!("{:?}", event),
            }),
        }
    }
}

impl Default for CareStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let sm = CareStateMachine::new();

        assert!(sm.can_transition(CareStatus::Waiting, CareEvent::Start));
        assert!(sm.can_transition(CareStatus::InCare, CareEvent::Finish));
        assert!(sm.can_transition(CareStatus::Waiting, CareEvent::Withdraw));
    }

    #[test]
    fn test_no_skipping_and_no_way_back() {
        let sm = CareStateMachine::new();

        // 不能跳过 in_care
        assert!(!sm.can_transition(CareStatus::Waiting, CareEvent::Finish));
        // 就诊中不能被移出队列
        assert!(!sm.can_transition(CareStatus::InCare, CareEvent::Withdraw));

        for terminal in [CareStatus::Completed, CareStatus::Withdrawn] {
            for event in [CareEvent::Start, CareEvent::Finish, CareEvent::Withdraw] {
                assert!(!sm.can_transition(terminal, event));
            }
        }
    }

    #[test]
    fn test_state_execution() {
        let sm = CareStateMachine::new();

        let result = sm.transition(CareStatus::Waiting, CareEvent::Start);
        assert_eq!(result.unwrap(), CareStatus::InCare);

        let err = sm.transition(CareStatus::Completed, CareEvent::Start).unwrap_err();
        assert!(matches!(err, TriageError::InvalidStateTransition { .. }));
    }
}
