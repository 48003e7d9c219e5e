//! 工作流引擎
//!
//! 协调队列路由、医嘱生命周期、收费台账和过期清理的统一入口

use crate::confirmation::{ConfirmOutcome, ConfirmRequest, ConfirmationWorkflow};
use crate::order::{LineRemoval, OrderLifecycle, ServiceOrdered, ServiceRequest};
use crate::payment::PaymentLedger;
use crate::queue::QueueRouter;
use crate::reaper::ExpiryReaper;
use crate::settings::WorkflowSettings;
use crate::state_machine::{EncounterEvent, EncounterStateMachine};
use chrono::Utc;
use clinic_core::{
    settle, ClinicError, ClinicStore, Encounter, EncounterChart, EncounterRepository, OrderDetail,
    OrderKind, Payment, PaymentWaiver, Queue, QueueKind, QueueListing, Result,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// 工作流引擎
///
/// 所有组件共享同一个显式传入的存储句柄
#[derive(Debug)]
pub struct ClinicWorkflow<S: ClinicStore> {
    store: Arc<S>,
    settings: WorkflowSettings,
    router: QueueRouter<S>,
    orders: OrderLifecycle<S>,
    ledger: PaymentLedger<S>,
    encounter_states: EncounterStateMachine,
}

impl<S: ClinicStore> ClinicWorkflow<S> {
    /// 创建新的工作流引擎
    pub fn new(store: S, settings: WorkflowSettings) -> Result<Self> {
        if settings.front_desk_queue.trim().is_empty() {
            return Err(ClinicError::Config("front desk queue name must not be empty".into()));
        }
        if settings.reaper_interval.is_zero() {
            return Err(ClinicError::Config("reaper interval must be positive".into()));
        }
        let offset = settings.offset()?;

        let store = Arc::new(store);
        let confirmation = Arc::new(ConfirmationWorkflow::new(
            settings.visit_types.clone(),
            settings.front_desk_queue.clone(),
        ));

        Ok(Self {
            router: QueueRouter::new(Arc::clone(&store), offset),
            orders: OrderLifecycle::new(Arc::clone(&store), offset, confirmation),
            ledger: PaymentLedger::new(Arc::clone(&store)),
            encounter_states: EncounterStateMachine::new(),
            store,
            settings,
        })
    }

    // ========== 队列 ==========

    pub async fn create_queue(&self, name: &str, kind: QueueKind) -> Result<Queue> {
        self.router.create_queue(name, kind).await
    }

    pub async fn add_to_queue(&self, queue_name: &str, encounter_id: i64, kind: QueueKind) -> Result<Queue> {
        self.router.add_to_queue(queue_name, encounter_id, kind).await
    }

    pub async fn move_encounter(&self, from_queue_id: i64, to_queue_id: i64, encounter_id: i64) -> Result<()> {
        self.router.move_encounter(from_queue_id, to_queue_id, encounter_id).await
    }

    pub async fn move_to_queue_name(
        &self,
        from_queue_id: i64,
        to_queue_name: &str,
        encounter_id: i64,
        kind: QueueKind,
    ) -> Result<Queue> {
        self.router
            .move_to_queue_name(from_queue_id, to_queue_name, encounter_id, kind)
            .await
    }

    pub async fn delete_from_queue(&self, queue_id: i64, encounter_id: i64) -> Result<bool> {
        self.router.delete_from_queue(queue_id, encounter_id).await
    }

    pub async fn list_all(&self) -> Result<Vec<QueueListing>> {
        self.router.list_all().await
    }

    pub async fn list_queue(&self, queue_id: i64) -> Result<QueueListing> {
        self.router.list_queue(queue_id).await
    }

    pub async fn clear_expired(&self) -> Result<usize> {
        self.router.clear_expired().await
    }

    // ========== 医嘱 ==========

    pub async fn request_service(&self, request: ServiceRequest) -> Result<ServiceOrdered> {
        self.orders.request_service(request).await
    }

    pub async fn confirm(&self, request: ConfirmRequest) -> Result<ConfirmOutcome> {
        self.orders.confirm(request).await
    }

    pub async fn remove_line_item(&self, line_item_id: i64) -> Result<LineRemoval> {
        self.orders.remove_line_item(line_item_id).await
    }

    pub async fn count_open_today(&self, kind: OrderKind) -> Result<i64> {
        self.orders.count_open_today(kind).await
    }

    pub async fn order_summary(&self, order_id: i64) -> Result<OrderDetail> {
        self.orders.order_summary(order_id).await
    }

    // ========== 收费 ==========

    pub async fn confirm_payments(&self, payment_ids: &[i64], invoice_no: &str) -> Result<Vec<Payment>> {
        self.ledger.confirm_payments(payment_ids, invoice_no).await
    }

    pub async fn request_waiver(&self, payment_id: i64, patient_id: i64, requested_by: i64) -> Result<PaymentWaiver> {
        self.ledger.request_waiver(payment_id, patient_id, requested_by).await
    }

    pub async fn approve_waiver(&self, waiver_id: i64, approve: bool) -> Result<PaymentWaiver> {
        self.ledger.approve_waiver(waiver_id, approve).await
    }

    pub async fn outstanding_balance(&self, patient_id: i64) -> Result<Decimal> {
        self.ledger.outstanding_balance(patient_id).await
    }

    // ========== 就诊与病历 ==========

    /// 按就诊状态机推进就诊状态，签到时记录签到时间
    pub async fn update_encounter_status(&self, encounter_id: i64, event: EncounterEvent) -> Result<Encounter> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let mut encounter = tx
                .find_encounter(encounter_id)
                .await?
                .ok_or_else(|| ClinicError::not_found("encounter", encounter_id))?;

            encounter.status = self.encounter_states.transition(encounter.status, event)?;
            if event == EncounterEvent::CheckIn {
                encounter.check_in = Utc::now();
            }
            tx.update_encounter(&encounter).await?;
            Ok::<_, ClinicError>(encounter)
        }
        .await;
        let encounter = settle(tx, result).await?;

        info!("Encounter {} is now {:?}", encounter.id, encounter.status);
        Ok(encounter)
    }

    /// 锁定病历，此后其下医嘱不再允许变更
    pub async fn lock_chart(&self, chart_id: i64) -> Result<EncounterChart> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let mut chart = tx
                .find_chart(chart_id)
                .await?
                .ok_or_else(|| ClinicError::not_found("chart", chart_id))?;
            if !chart.locked {
                tx.set_chart_locked(chart_id, true).await?;
                chart.locked = true;
            }
            Ok::<_, ClinicError>(chart)
        }
        .await;
        let chart = settle(tx, result).await?;

        info!("Chart {} locked", chart_id);
        Ok(chart)
    }

    // ========== 概览 ==========

    /// 获取系统概览
    pub async fn overview(&self) -> Result<WorkflowOverview> {
        let listings = self.router.list_all().await?;
        let mut open_orders_today = BTreeMap::new();
        for kind in OrderKind::all() {
            open_orders_today.insert(kind, self.orders.count_open_today(kind).await?);
        }

        Ok(WorkflowOverview {
            total_queues: listings.len(),
            waiting_encounters: listings.iter().map(|l| l.encounters.len()).sum(),
            open_orders_today,
        })
    }

    /// 按配置周期创建过期清理器
    pub fn reaper(&self) -> ExpiryReaper<S> {
        ExpiryReaper::new(self.router.clone(), self.settings.reaper_interval)
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn router(&self) -> &QueueRouter<S> {
        &self.router
    }

    pub fn orders(&self) -> &OrderLifecycle<S> {
        &self.orders
    }

    pub fn ledger(&self) -> &PaymentLedger<S> {
        &self.ledger
    }
}

/// 系统概览
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOverview {
    pub total_queues: usize,
    pub waiting_encounters: usize,
    pub open_orders_today: BTreeMap<OrderKind, i64>,
}
