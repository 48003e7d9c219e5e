//! # 诊所工作流模块
//!
//! 提供患者分诊队列与医嘱生命周期管理，包括：
//! - 队列路由：记录每个在诊就诊所在的科室队列，支持入队、转移、出队与列表
//! - 医嘱生命周期：六种服务类型共用一套申请、确认、完成流程
//! - 收费确认：确认收费后按类型推进状态并安排后续就诊
//! - 收费台账：收费项与减免审批
//! - 过期清理：周期移除签到日期早于今天的队列成员

pub mod confirmation;
pub mod engine;
pub mod kinds;
pub mod memory;
pub mod order;
pub mod payment;
pub mod queue;
pub mod reaper;
pub mod settings;
pub mod state_machine;

#[cfg(test)]
mod fixtures;

// 重新导出主要类型
pub use confirmation::{ConfirmOutcome, ConfirmRequest, ConfirmationWorkflow, EffectOutcome, VisitSchedule};
pub use engine::{ClinicWorkflow, WorkflowOverview};
pub use kinds::{CompletionRule, ConfirmEffect, ConfirmScope, KindPolicy, VisitPurpose};
pub use memory::{MemoryStore, MemoryTx};
pub use order::{LineRemoval, OrderLifecycle, ServiceOrdered, ServiceRequest};
pub use payment::PaymentLedger;
pub use queue::QueueRouter;
pub use reaper::ExpiryReaper;
pub use settings::{VisitTypeTitles, WorkflowSettings};
pub use state_machine::{EncounterEvent, EncounterStateMachine, OrderEvent, OrderStateMachine};
