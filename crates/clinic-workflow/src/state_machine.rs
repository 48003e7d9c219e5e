//! 状态机
//!
//! 医嘱与就诊的状态转换规则表

use clinic_core::{ClinicError, EncounterStatus, OrderStatus, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 医嘱状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderEvent {
    Complete,
}

/// 医嘱状态机：ORDERED → COMPLETED，单向且终态
#[derive(Debug)]
pub struct OrderStateMachine {
    transitions: HashMap<(OrderStatus, OrderEvent), OrderStatus>,
}

impl OrderStateMachine {
    pub fn new() -> Self {
        let mut transitions = HashMap::new();
        transitions.insert((OrderStatus::Ordered, OrderEvent::Complete), OrderStatus::Completed);
        Self { transitions }
    }

    pub fn can_transition(&self, from: OrderStatus, event: OrderEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    pub fn transition(&self, from: OrderStatus, event: OrderEvent) -> Result<OrderStatus> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| ClinicError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            })
    }
}

impl Default for OrderStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// 就诊状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EncounterEvent {
    CheckIn,
    CheckOut,
    Cancel,
}

/// 就诊状态机
#[derive(Debug)]
pub struct EncounterStateMachine {
    transitions: HashMap<(EncounterStatus, EncounterEvent), EncounterStatus>,
}

impl EncounterStateMachine {
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        transitions.insert((EncounterStatus::Scheduled, EncounterEvent::CheckIn), EncounterStatus::CheckedIn);
        transitions.insert((EncounterStatus::CheckedIn, EncounterEvent::CheckOut), EncounterStatus::CheckedOut);
        transitions.insert((EncounterStatus::Scheduled, EncounterEvent::Cancel), EncounterStatus::Cancelled);
        transitions.insert((EncounterStatus::CheckedIn, EncounterEvent::Cancel), EncounterStatus::Cancelled);

        Self { transitions }
    }

    pub fn can_transition(&self, from: EncounterStatus, event: EncounterEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    pub fn transition(&self, from: EncounterStatus, event: EncounterEvent) -> Result<EncounterStatus> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| ClinicError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            })
    }

    /// 获取当前状态下的可用事件
    pub fn get_possible_events(&self, current: EncounterStatus) -> Vec<EncounterEvent> {
        self.transitions
            .keys()
            .filter(|(state, _)| *state == current)
            .map(|(_, event)| *event)
            .collect()
    }
}

impl Default for EncounterStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
