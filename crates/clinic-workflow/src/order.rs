//! 医嘱生命周期
//!
//! 六种医嘱共用一套流程：申请服务时按 (病历, 类型) 合并到同一张未完成的医嘱头下，
//! 每条明细附带 NOTPAID 收费项；确认收费交给 [`ConfirmationWorkflow`]。
//! 类型之间的差异由 [`KindPolicy`] 决定。

use crate::confirmation::{load_details, ConfirmOutcome, ConfirmRequest, ConfirmationWorkflow};
use crate::kinds::{CompletionRule, KindPolicy};
use crate::payment::create_obligations;
use crate::state_machine::{OrderEvent, OrderStateMachine};
use chrono::{DateTime, FixedOffset, Utc};
use clinic_core::utils::day_window;
use clinic_core::{
    settle, ClinicError, ClinicStore, ClinicTx, EncounterChart, ErrorKind, LineItem, NewLineItem,
    NewOrder, Order, OrderDetail, OrderKind, OrderRepository, OrderStatus, Payment,
    PaymentRepository, PaymentStatus, ReferralTarget, Result, ServiceType,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// 服务申请
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub chart_id: i64,
    pub kind: OrderKind,
    pub patient_id: i64,
    pub requested_by: i64,
    pub service_type_id: Option<i64>,
    /// 服务类型基础收费与耗材之外的额外收费项目
    pub billing_code_ids: Vec<i64>,
    pub referral: Option<ReferralTarget>,
    pub notes: Option<String>,
}

impl ServiceRequest {
    pub fn new(kind: OrderKind, chart_id: i64, patient_id: i64, requested_by: i64) -> Self {
        Self {
            chart_id,
            kind,
            patient_id,
            requested_by,
            service_type_id: None,
            billing_code_ids: Vec::new(),
            referral: None,
            notes: None,
        }
    }

    pub fn service_type(mut self, service_type_id: i64) -> Self {
        self.service_type_id = Some(service_type_id);
        self
    }

    pub fn billing_code(mut self, billing_code_id: i64) -> Self {
        self.billing_code_ids.push(billing_code_id);
        self
    }

    pub fn referral(mut self, target: ReferralTarget) -> Self {
        self.referral = Some(target);
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// 申请结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOrdered {
    pub order: Order,
    pub line: LineItem,
    pub payments: Vec<Payment>,
    /// 是否新建了医嘱头（否则为追加到已有医嘱头）
    pub new_order: bool,
}

/// 删除明细的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRemoval {
    pub order_id: i64,
    /// 删除的是最后一条明细，医嘱头随之删除
    pub order_deleted: bool,
}

/// 医嘱生命周期
#[derive(Debug)]
pub struct OrderLifecycle<S: ClinicStore> {
    store: Arc<S>,
    offset: FixedOffset,
    confirmation: Arc<ConfirmationWorkflow>,
}

impl<S: ClinicStore> Clone for OrderLifecycle<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            offset: self.offset,
            confirmation: Arc::clone(&self.confirmation),
        }
    }
}

impl<S: ClinicStore> OrderLifecycle<S> {
    pub fn new(store: Arc<S>, offset: FixedOffset, confirmation: Arc<ConfirmationWorkflow>) -> Self {
        Self {
            store,
            offset,
            confirmation,
        }
    }

    /// 申请服务：校验引用，合并医嘱头，创建明细和收费项
    pub async fn request_service(&self, request: ServiceRequest) -> Result<ServiceOrdered> {
        let mut tx = self.store.begin().await?;
        let result = place(&mut tx, &request).await;
        let placed = settle(tx, result).await?;

        info!(
            "{:?} line item {} {} order {} for patient {} ({} charge(s))",
            placed.order.kind,
            placed.line.id,
            if placed.new_order { "opened" } else { "appended to" },
            placed.order.id,
            placed.order.patient_id,
            placed.payments.len()
        );
        Ok(placed)
    }

    /// 确认收费，整个流程一个事务
    pub async fn confirm(&self, request: ConfirmRequest) -> Result<ConfirmOutcome> {
        let mut tx = self.store.begin().await?;
        let result = self.confirmation.apply(&mut tx, &request).await;
        settle(tx, result).await
    }

    /// 删除一条未付费明细及其收费项；最后一条明细删除时医嘱头一并删除
    pub async fn remove_line_item(&self, line_item_id: i64) -> Result<LineRemoval> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let line = tx
                .find_line_item(line_item_id)
                .await?
                .ok_or_else(|| ClinicError::not_found("line item", line_item_id))?;
            let order = tx
                .find_order(line.order_id)
                .await?
                .ok_or_else(|| ClinicError::not_found("order", line.order_id))?;

            let chart = require_chart(&mut tx, order.chart_id).await?;
            if chart.locked {
                return Err(ClinicError::Validation(format!(
                    "chart {} is locked, line item {} cannot be removed",
                    chart.id, line_item_id
                )));
            }
            if order.status == OrderStatus::Completed {
                return Err(ClinicError::Validation(format!("order {} is already completed", order.id)));
            }

            let payments = tx.payments_for_line_item(line_item_id).await?;
            if payments.iter().any(|p| p.status == PaymentStatus::Paid) {
                return Err(ClinicError::Validation(format!(
                    "line item {} has paid charges",
                    line_item_id
                )));
            }

            for payment in &payments {
                tx.delete_waivers(payment.id).await?;
                tx.delete_payment(payment.id).await?;
            }
            tx.delete_line_item(line_item_id).await?;

            let order_deleted = tx.line_items(order.id).await?.is_empty();
            if order_deleted {
                tx.delete_order(order.id).await?;
            }
            Ok(LineRemoval {
                order_id: order.id,
                order_deleted,
            })
        }
        .await;
        let removal = settle(tx, result).await?;

        info!(
            "Removed line item {} from order {}{}",
            line_item_id,
            removal.order_id,
            if removal.order_deleted { " (order deleted)" } else { "" }
        );
        Ok(removal)
    }

    /// 今天创建且仍为 ORDERED 的医嘱数
    pub async fn count_open_today(&self, kind: OrderKind) -> Result<i64> {
        self.count_open_today_at(kind, Utc::now()).await
    }

    pub async fn count_open_today_at(&self, kind: OrderKind, now: DateTime<Utc>) -> Result<i64> {
        let (start, end) = day_window(now, self.offset);
        let mut tx = self.store.begin().await?;
        let result = tx.count_orders(kind, OrderStatus::Ordered, start, end).await;
        settle(tx, result).await
    }

    /// 医嘱头及全部明细和收费项
    pub async fn order_summary(&self, order_id: i64) -> Result<OrderDetail> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let order = tx
                .find_order(order_id)
                .await?
                .ok_or_else(|| ClinicError::not_found("order", order_id))?;
            let lines = load_details(&mut tx, order_id).await?;
            Ok::<_, ClinicError>(OrderDetail { order, lines })
        }
        .await;
        settle(tx, result).await
    }
}

async fn place<X: ClinicTx>(tx: &mut X, request: &ServiceRequest) -> Result<ServiceOrdered> {
    let policy = KindPolicy::of(request.kind);

    if tx.find_patient(request.patient_id).await?.is_none() {
        return Err(ClinicError::not_found("patient", request.patient_id));
    }
    if tx.find_user(request.requested_by).await?.is_none() {
        return Err(ClinicError::not_found("user", request.requested_by));
    }

    let chart = require_chart(tx, request.chart_id).await?;
    if chart.locked {
        return Err(ClinicError::Validation(format!(
            "chart {} is locked, no new orders accepted",
            chart.id
        )));
    }
    let encounter = tx
        .find_encounter(chart.encounter_id)
        .await?
        .ok_or_else(|| ClinicError::not_found("encounter", chart.encounter_id))?;
    if encounter.patient_id != request.patient_id {
        return Err(ClinicError::Validation(format!(
            "chart {} belongs to patient {}, not {}",
            chart.id, encounter.patient_id, request.patient_id
        )));
    }

    let service_type = resolve_service_type(tx, request, &policy).await?;
    check_referral(tx, request).await?;

    // 基础收费 + 耗材收费 + 额外收费
    let mut billing_code_ids = Vec::new();
    if let Some(service_type) = &service_type {
        billing_code_ids.push(service_type.billing_code_id);
        billing_code_ids.extend(service_type.supplies.iter().map(|s| s.billing_code_id));
    }
    billing_code_ids.extend(request.billing_code_ids.iter().copied());
    if policy.requires_charge && billing_code_ids.is_empty() {
        return Err(ClinicError::Validation(format!(
            "{:?} requests need at least one billing code",
            request.kind
        )));
    }

    let (mut order, new_order) = open_order(
        tx,
        NewOrder {
            kind: request.kind,
            chart_id: chart.id,
            patient_id: request.patient_id,
            requested_by: request.requested_by,
        },
    )
    .await?;

    // 外院转诊在申请时即完成
    let status = match &request.referral {
        Some(ReferralTarget::Outsource { .. }) => OrderStatus::Completed,
        _ => OrderStatus::Ordered,
    };
    let line = tx
        .insert_line_item(NewLineItem {
            order_id: order.id,
            kind: request.kind,
            chart_id: chart.id,
            service_type_id: service_type.as_ref().map(|s| s.id),
            referral: request.referral.clone(),
            status,
            notes: request.notes.clone(),
        })
        .await?;
    let payments = create_obligations(tx, line.id, request.patient_id, &billing_code_ids).await?;

    // 只有外院明细的转诊单没有待确认的明细
    if policy.completion == CompletionRule::InHouseLinesCompleted
        && policy.completion_holds(&load_details(tx, order.id).await?)
    {
        order.status = OrderStateMachine::new().transition(order.status, OrderEvent::Complete)?;
        order.completed_at = Some(Utc::now());
        tx.update_order(&order).await?;
        debug!("{:?} order {} completed on request", order.kind, order.id);
    }

    Ok(ServiceOrdered {
        order,
        line,
        payments,
        new_order,
    })
}

/// 取 (病历, 类型) 下未完成的医嘱头，没有则新建
///
/// 并发事务抢先建了医嘱头时插入返回冲突，此时改为追加到对方的医嘱头。
async fn open_order<X: OrderRepository + Send>(tx: &mut X, new: NewOrder) -> Result<(Order, bool)> {
    let (chart_id, kind) = (new.chart_id, new.kind);
    if let Some(order) = tx.find_open_order(chart_id, kind).await? {
        debug!("Reusing open {:?} order {} on chart {}", kind, order.id, chart_id);
        return Ok((order, false));
    }

    match tx.insert_order(new).await {
        Ok(order) => Ok((order, true)),
        Err(err) if err.kind() == ErrorKind::Conflict => {
            let order = tx.find_open_order(chart_id, kind).await?.ok_or(err)?;
            debug!("Open {:?} order {} on chart {} created concurrently", kind, order.id, chart_id);
            Ok((order, false))
        }
        Err(err) => Err(err),
    }
}

async fn resolve_service_type<X: ClinicTx>(
    tx: &mut X,
    request: &ServiceRequest,
    policy: &KindPolicy,
) -> Result<Option<ServiceType>> {
    let Some(service_type_id) = request.service_type_id else {
        if policy.requires_service_type {
            return Err(ClinicError::Validation(format!(
                "{:?} requests need a service type",
                request.kind
            )));
        }
        return Ok(None);
    };

    let service_type = tx
        .find_service_type(service_type_id)
        .await?
        .ok_or_else(|| ClinicError::not_found("service type", service_type_id))?;
    if service_type.kind != request.kind {
        return Err(ClinicError::Validation(format!(
            "service type '{}' is {:?}, not {:?}",
            service_type.title, service_type.kind, request.kind
        )));
    }
    Ok(Some(service_type))
}

async fn check_referral<X: ClinicTx>(tx: &mut X, request: &ServiceRequest) -> Result<()> {
    match (&request.kind, &request.referral) {
        (OrderKind::Referral, None) => Err(ClinicError::Validation(
            "referral requests need a referral target".into(),
        )),
        (OrderKind::Referral, Some(ReferralTarget::InHouse { provider_id })) => {
            if tx.find_user(*provider_id).await?.is_none() {
                return Err(ClinicError::not_found("user", provider_id));
            }
            Ok(())
        }
        (OrderKind::Referral, Some(ReferralTarget::Outsource { facility })) => {
            if facility.trim().is_empty() {
                return Err(ClinicError::Validation("outsource facility is required".into()));
            }
            Ok(())
        }
        (kind, Some(_)) => Err(ClinicError::Validation(format!(
            "{:?} requests cannot carry a referral target",
            kind
        ))),
        (_, None) => Ok(()),
    }
}

async fn require_chart<X: ClinicTx>(tx: &mut X, chart_id: i64) -> Result<EncounterChart> {
    tx.find_chart(chart_id)
        .await?
        .ok_or_else(|| ClinicError::not_found("chart", chart_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirmation::EffectOutcome;
    use crate::fixtures::*;
    use crate::memory::MemoryTx;
    use crate::{MemoryStore, VisitTypeTitles};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use clinic_core::{EncounterRepository, EncounterStatus, QueueKind, QueueRepository};
    use rust_decimal::Decimal;

    fn lifecycle(store: &MemoryStore) -> OrderLifecycle<MemoryStore> {
        let confirmation = ConfirmationWorkflow::new(VisitTypeTitles::default(), "Front Desk".into());
        OrderLifecycle::new(
            Arc::new(store.clone()),
            FixedOffset::east_opt(0).unwrap(),
            Arc::new(confirmation),
        )
    }

    fn status_of(payments: &[Payment]) -> Vec<PaymentStatus> {
        payments.iter().map(|p| p.status).collect()
    }

    #[tokio::test]
    async fn test_request_upserts_open_order() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        let first = orders
            .request_service(ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER).service_type(CBC))
            .await
            .unwrap();
        let second = orders
            .request_service(
                ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER)
                    .service_type(CBC)
                    .notes("fasting"),
            )
            .await
            .unwrap();

        assert!(first.new_order);
        assert!(!second.new_order);
        assert_eq!(first.order.id, second.order.id);

        let summary = orders.order_summary(first.order.id).await.unwrap();
        assert_eq!(summary.lines.len(), 2);
        assert_eq!(summary.lines[1].line.notes.as_deref(), Some("fasting"));
    }

    #[tokio::test]
    async fn test_obligations_include_bundled_supplies() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        let placed = orders
            .request_service(
                ServiceRequest::new(OrderKind::Diagnostic, chart.id, PATIENT, PROVIDER)
                    .service_type(XRAY)
                    .billing_code(CBC_FEE),
            )
            .await
            .unwrap();

        let codes: Vec<i64> = placed.payments.iter().map(|p| p.billing_code_id).collect();
        assert_eq!(codes, vec![XRAY_FEE, CONTRAST_FEE, CBC_FEE]);
        assert!(placed.payments.iter().all(|p| p.status == PaymentStatus::NotPaid));
        let total: Decimal = placed.payments.iter().map(|p| p.amount).sum();
        assert_eq!(total, Decimal::new(8250, 2));
    }

    #[tokio::test]
    async fn test_request_validates_references() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        let err = orders
            .request_service(ServiceRequest::new(OrderKind::Lab, chart.id, 999, PROVIDER).service_type(CBC))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = orders
            .request_service(ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER).service_type(999))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // 服务类型与医嘱类型不符
        let err = orders
            .request_service(ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER).service_type(XRAY))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);

        let err = orders
            .request_service(ServiceRequest::new(OrderKind::Surgical, chart.id, PATIENT, PROVIDER))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);

        // 失败的申请不留下医嘱头
        assert_eq!(orders.count_open_today(OrderKind::Lab).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_billing_code_rolls_back_header() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        let err = orders
            .request_service(
                ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER)
                    .service_type(CBC)
                    .billing_code(777),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let mut tx = fixture.store.begin().await.unwrap();
        assert!(tx.find_open_order(chart.id, OrderKind::Lab).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_locked_chart_rejects_requests() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        {
            let mut tx = fixture.store.begin().await.unwrap();
            tx.set_chart_locked(chart.id, true).await.unwrap();
            tx.commit().await.unwrap();
        }
        let orders = lifecycle(&fixture.store);

        let err = orders
            .request_service(ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER).service_type(CBC))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    }

    #[tokio::test]
    async fn test_lab_confirm_enqueues_origin_encounter() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 42, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        let placed = orders
            .request_service(ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER).service_type(CBC))
            .await
            .unwrap();
        let outcome = orders
            .confirm(ConfirmRequest::line(placed.order.id, placed.line.id, "INV-010"))
            .await
            .unwrap();

        assert!(outcome.completed);
        assert_eq!(outcome.order.status, OrderStatus::Completed);
        assert!(outcome.order.completed_at.is_some());
        match &outcome.effects[..] {
            [EffectOutcome::Enqueued { queue }] => {
                assert_eq!(queue.name, "Lab-CBC");
                assert_eq!(queue.kind, QueueKind::Lab);
                let mut tx = fixture.store.begin().await.unwrap();
                assert_eq!(tx.queue_members(queue.id).await.unwrap(), vec![42]);
            }
            other => panic!("unexpected effects: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unpaid_sibling_keeps_order_open() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        let first = orders
            .request_service(ServiceRequest::new(OrderKind::Diagnostic, chart.id, PATIENT, PROVIDER).service_type(XRAY))
            .await
            .unwrap();
        let second = orders
            .request_service(ServiceRequest::new(OrderKind::Diagnostic, chart.id, PATIENT, PROVIDER).service_type(XRAY))
            .await
            .unwrap();

        let outcome = orders
            .confirm(ConfirmRequest::line(first.order.id, first.line.id, "INV-020"))
            .await
            .unwrap();
        assert!(!outcome.completed);
        assert_eq!(outcome.order.status, OrderStatus::Ordered);
        assert_eq!(outcome.lines[0].status, OrderStatus::Completed);
        assert_eq!(status_of(&outcome.payments), vec![PaymentStatus::Paid, PaymentStatus::Paid]);

        let outcome = orders
            .confirm(ConfirmRequest::line(second.order.id, second.line.id, "INV-021"))
            .await
            .unwrap();
        assert!(outcome.completed);
        assert_eq!(outcome.order.status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn test_surgical_confirm_schedules_new_encounter() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);
        let check_in = Utc.with_ymd_and_hms(2024, 6, 3, 8, 30, 0).unwrap();

        let placed = orders
            .request_service(
                ServiceRequest::new(OrderKind::Surgical, chart.id, PATIENT, PROVIDER).service_type(APPENDECTOMY),
            )
            .await
            .unwrap();
        let outcome = orders
            .confirm(ConfirmRequest::line(placed.order.id, placed.line.id, "INV-001").scheduled(ROOM_OR, check_in))
            .await
            .unwrap();

        let (encounter, new_chart) = match &outcome.effects[..] {
            [EffectOutcome::Scheduled { encounter, chart, queue: None }] => (encounter.clone(), chart.clone()),
            other => panic!("unexpected effects: {:?}", other),
        };
        assert_eq!(encounter.room_id, ROOM_OR);
        assert_eq!(encounter.check_in, check_in);
        assert_eq!(encounter.visit_type_id, 11);
        assert_eq!(encounter.status, EncounterStatus::Scheduled);
        assert_eq!(encounter.provider_id, PROVIDER);
        assert_eq!(new_chart.encounter_id, encounter.id);
        assert_ne!(new_chart.id, chart.id);

        let summary = orders.order_summary(placed.order.id).await.unwrap();
        let line = &summary.lines[0];
        assert_eq!(line.line.chart_id, new_chart.id);
        assert!(line
            .payments
            .iter()
            .all(|p| p.status == PaymentStatus::Paid && p.invoice_no.as_deref() == Some("INV-001")));
        assert_eq!(summary.order.status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn test_treatment_confirm_schedules_new_encounter() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);
        let check_in = Utc.with_ymd_and_hms(2024, 6, 4, 14, 0, 0).unwrap();

        let placed = orders
            .request_service(
                ServiceRequest::new(OrderKind::Treatment, chart.id, PATIENT, PROVIDER).service_type(PHYSIOTHERAPY),
            )
            .await
            .unwrap();
        let outcome = orders
            .confirm(ConfirmRequest::line(placed.order.id, placed.line.id, "INV-002").scheduled(ROOM_EXAM, check_in))
            .await
            .unwrap();

        let (encounter, new_chart) = match &outcome.effects[..] {
            [EffectOutcome::Scheduled { encounter, chart, queue: None }] => (encounter.clone(), chart.clone()),
            other => panic!("unexpected effects: {:?}", other),
        };
        assert_eq!(encounter.visit_type_id, 12);
        assert_eq!(encounter.room_id, ROOM_EXAM);
        assert_eq!(encounter.check_in, check_in);
        assert_eq!(encounter.provider_id, PROVIDER);
        assert_eq!(encounter.status, EncounterStatus::Scheduled);
        assert_ne!(new_chart.id, chart.id);

        assert!(outcome.completed);
        assert_eq!(outcome.order.status, OrderStatus::Completed);
        assert_eq!(outcome.lines[0].chart_id, new_chart.id);

        let mut tx = fixture.store.begin().await.unwrap();
        let stored = tx.find_encounter(encounter.id).await.unwrap().unwrap();
        assert_eq!(stored.visit_type_id, 12);
        assert_eq!(
            tx.find_chart_for_encounter(encounter.id).await.unwrap().map(|c| c.id),
            Some(new_chart.id)
        );
    }

    #[tokio::test]
    async fn test_failed_confirm_leaves_nothing_behind() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        let placed = orders
            .request_service(
                ServiceRequest::new(OrderKind::Treatment, chart.id, PATIENT, PROVIDER).service_type(PHYSIOTHERAPY),
            )
            .await
            .unwrap();

        // 诊室不存在，排期失败
        let err = orders
            .confirm(ConfirmRequest::line(placed.order.id, placed.line.id, "INV-030").scheduled(404, Utc::now()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // 未提供排期
        let err = orders
            .confirm(ConfirmRequest::line(placed.order.id, placed.line.id, "INV-030"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);

        let summary = orders.order_summary(placed.order.id).await.unwrap();
        assert_eq!(summary.order.status, OrderStatus::Ordered);
        assert_eq!(summary.lines[0].line.status, OrderStatus::Ordered);
        assert_eq!(summary.lines[0].line.chart_id, chart.id);
        assert_eq!(status_of(&summary.lines[0].payments), vec![PaymentStatus::NotPaid]);
    }

    #[tokio::test]
    async fn test_confirm_twice() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        let first = orders
            .request_service(ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER).service_type(CBC))
            .await
            .unwrap();
        orders
            .request_service(ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER).service_type(CBC))
            .await
            .unwrap();
        orders
            .confirm(ConfirmRequest::line(first.order.id, first.line.id, "INV-040"))
            .await
            .unwrap();

        let err = orders
            .confirm(ConfirmRequest::line(first.order.id, first.line.id, "INV-041"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_confirm_completed_order_is_invalid() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        let placed = orders
            .request_service(ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER).service_type(CBC))
            .await
            .unwrap();
        orders
            .confirm(ConfirmRequest::line(placed.order.id, placed.line.id, "INV-050"))
            .await
            .unwrap();

        let err = orders
            .confirm(ConfirmRequest::line(placed.order.id, placed.line.id, "INV-051"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClinicError::InvalidStateTransition { .. }));
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);

        // 完成后的新申请开出新的医嘱头
        let next = orders
            .request_service(ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER).service_type(CBC))
            .await
            .unwrap();
        assert!(next.new_order);
    }

    #[tokio::test]
    async fn test_referral_outsource_does_not_gate_completion() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        let in_house = orders
            .request_service(
                ServiceRequest::new(OrderKind::Referral, chart.id, PATIENT, PROVIDER)
                    .referral(ReferralTarget::InHouse { provider_id: SPECIALIST })
                    .billing_code(REFERRAL_FEE),
            )
            .await
            .unwrap();
        let outsource = orders
            .request_service(
                ServiceRequest::new(OrderKind::Referral, chart.id, PATIENT, PROVIDER)
                    .referral(ReferralTarget::Outsource { facility: "City Hospital".into() })
                    .billing_code(REFERRAL_FEE),
            )
            .await
            .unwrap();
        assert_eq!(outsource.order.id, in_house.order.id);
        assert_eq!(outsource.line.status, OrderStatus::Completed);
        assert_eq!(outsource.order.status, OrderStatus::Ordered);

        let outcome = orders
            .confirm(
                ConfirmRequest::line(in_house.order.id, in_house.line.id, "INV-060").scheduled(ROOM_EXAM, Utc::now()),
            )
            .await
            .unwrap();

        // 外院明细仍未付费，但不影响医嘱头完成
        assert!(outcome.completed);
        match &outcome.effects[..] {
            [EffectOutcome::Scheduled { encounter, .. }] => {
                assert_eq!(encounter.provider_id, SPECIALIST);
                assert_eq!(encounter.visit_type_id, 13);
            }
            other => panic!("unexpected effects: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_outsource_only_referral_completes_on_request() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        let placed = orders
            .request_service(
                ServiceRequest::new(OrderKind::Referral, chart.id, PATIENT, PROVIDER)
                    .referral(ReferralTarget::Outsource { facility: "City".into() })
                    .billing_code(REFERRAL_FEE),
            )
            .await
            .unwrap();

        assert_eq!(placed.line.status, OrderStatus::Completed);
        assert_eq!(placed.order.status, OrderStatus::Completed);
        assert!(placed.order.completed_at.is_some());
        assert_eq!(status_of(&placed.payments), vec![PaymentStatus::NotPaid]);
        assert_eq!(orders.count_open_today(OrderKind::Referral).await.unwrap(), 0);

        let summary = orders.order_summary(placed.order.id).await.unwrap();
        assert_eq!(summary.order.status, OrderStatus::Completed);

        // 下一条转诊开出新的医嘱头
        let next = orders
            .request_service(
                ServiceRequest::new(OrderKind::Referral, chart.id, PATIENT, PROVIDER)
                    .referral(ReferralTarget::InHouse { provider_id: SPECIALIST })
                    .billing_code(REFERRAL_FEE),
            )
            .await
            .unwrap();
        assert!(next.new_order);
        assert_eq!(next.order.status, OrderStatus::Ordered);
        assert_eq!(orders.count_open_today(OrderKind::Referral).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_outsource_line_confirm_only_settles_payments() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        let in_house = orders
            .request_service(
                ServiceRequest::new(OrderKind::Referral, chart.id, PATIENT, PROVIDER)
                    .referral(ReferralTarget::InHouse { provider_id: SPECIALIST })
                    .billing_code(REFERRAL_FEE),
            )
            .await
            .unwrap();
        let outsource = orders
            .request_service(
                ServiceRequest::new(OrderKind::Referral, chart.id, PATIENT, PROVIDER)
                    .referral(ReferralTarget::Outsource { facility: "City Hospital".into() })
                    .billing_code(REFERRAL_FEE),
            )
            .await
            .unwrap();
        let encounters = fixture.store.encounter_count().await;

        let outcome = orders
            .confirm(ConfirmRequest::line(outsource.order.id, outsource.line.id, "INV-061"))
            .await
            .unwrap();

        assert!(outcome.effects.is_empty());
        assert_eq!(status_of(&outcome.payments), vec![PaymentStatus::Paid]);
        assert_eq!(outcome.lines[0].chart_id, chart.id);
        assert!(!outcome.completed);
        assert_eq!(outcome.order.status, OrderStatus::Ordered);
        assert_eq!(fixture.store.encounter_count().await, encounters);

        let summary = orders.order_summary(in_house.order.id).await.unwrap();
        assert_eq!(summary.lines[0].line.status, OrderStatus::Ordered);
        assert_eq!(status_of(&summary.lines[0].payments), vec![PaymentStatus::NotPaid]);

        // 已付费的外院明细不能再次确认
        let err = orders
            .confirm(ConfirmRequest::line(outsource.order.id, outsource.line.id, "INV-062"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_in_house_referrals_complete_together() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        let mut placed = Vec::new();
        for provider_id in [SPECIALIST, PROVIDER] {
            placed.push(
                orders
                    .request_service(
                        ServiceRequest::new(OrderKind::Referral, chart.id, PATIENT, PROVIDER)
                            .referral(ReferralTarget::InHouse { provider_id })
                            .billing_code(REFERRAL_FEE),
                    )
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(placed[0].order.id, placed[1].order.id);

        let outcome = orders
            .confirm(
                ConfirmRequest::line(placed[0].order.id, placed[0].line.id, "INV-063")
                    .scheduled(ROOM_EXAM, Utc::now()),
            )
            .await
            .unwrap();
        assert!(!outcome.completed);
        assert_eq!(outcome.order.status, OrderStatus::Ordered);
        assert_eq!(orders.count_open_today(OrderKind::Referral).await.unwrap(), 1);

        let outcome = orders
            .confirm(
                ConfirmRequest::line(placed[1].order.id, placed[1].line.id, "INV-064")
                    .scheduled(ROOM_EXAM, Utc::now()),
            )
            .await
            .unwrap();
        assert!(outcome.completed);
        assert_eq!(outcome.order.status, OrderStatus::Completed);
        match &outcome.effects[..] {
            [EffectOutcome::Scheduled { encounter, .. }] => assert_eq!(encounter.provider_id, PROVIDER),
            other => panic!("unexpected effects: {:?}", other),
        }
        assert_eq!(orders.count_open_today(OrderKind::Referral).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_referral_requires_known_target() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        let err = orders
            .request_service(
                ServiceRequest::new(OrderKind::Referral, chart.id, PATIENT, PROVIDER).billing_code(REFERRAL_FEE),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);

        let err = orders
            .request_service(
                ServiceRequest::new(OrderKind::Referral, chart.id, PATIENT, PROVIDER)
                    .referral(ReferralTarget::InHouse { provider_id: 999 })
                    .billing_code(REFERRAL_FEE),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_follow_up_completes_in_one_step() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);
        let check_in = Utc::now() + Duration::days(14);

        let placed = orders
            .request_service(
                ServiceRequest::new(OrderKind::FollowUp, chart.id, PATIENT, PROVIDER).billing_code(FOLLOW_UP_FEE),
            )
            .await
            .unwrap();
        let outcome = orders
            .confirm(ConfirmRequest::order(placed.order.id, "INV-070").scheduled(ROOM_EXAM, check_in))
            .await
            .unwrap();

        assert!(outcome.completed);
        assert_eq!(status_of(&outcome.payments), vec![PaymentStatus::Paid]);
        match &outcome.effects[..] {
            [EffectOutcome::Scheduled { encounter, queue: Some(queue), .. }] => {
                assert_eq!(encounter.visit_type_id, 14);
                assert_eq!(encounter.check_in, check_in);
                assert_eq!(queue.name, "Front Desk");
                assert_eq!(queue.kind, QueueKind::User);
            }
            other => panic!("unexpected effects: {:?}", other),
        }

        // 复诊明细保留在原病历上
        let summary = orders.order_summary(placed.order.id).await.unwrap();
        assert_eq!(summary.lines[0].line.chart_id, chart.id);
    }

    #[tokio::test]
    async fn test_remove_last_line_deletes_order() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        let first = orders
            .request_service(ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER).service_type(CBC))
            .await
            .unwrap();
        let second = orders
            .request_service(ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER).service_type(CBC))
            .await
            .unwrap();

        let removal = orders.remove_line_item(first.line.id).await.unwrap();
        assert!(!removal.order_deleted);
        assert_eq!(orders.order_summary(first.order.id).await.unwrap().lines.len(), 1);

        let removal = orders.remove_line_item(second.line.id).await.unwrap();
        assert!(removal.order_deleted);
        let err = orders.order_summary(first.order.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let mut tx = fixture.store.begin().await.unwrap();
        assert!(tx.find_payment(first.payments[0].id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_paid_line_is_refused() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        let first = orders
            .request_service(ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER).service_type(CBC))
            .await
            .unwrap();
        orders
            .request_service(ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER).service_type(CBC))
            .await
            .unwrap();
        orders
            .confirm(ConfirmRequest::line(first.order.id, first.line.id, "INV-080"))
            .await
            .unwrap();

        let err = orders.remove_line_item(first.line.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    }

    #[tokio::test]
    async fn test_count_open_today() {
        let fixture = Fixture::seeded().await;
        let first = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let second = seed_encounter(&fixture.store, 7, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        for chart in [&first, &second] {
            orders
                .request_service(ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER).service_type(CBC))
                .await
                .unwrap();
        }
        let done = orders
            .request_service(
                ServiceRequest::new(OrderKind::Diagnostic, first.id, PATIENT, PROVIDER).service_type(XRAY),
            )
            .await
            .unwrap();
        orders
            .confirm(ConfirmRequest::line(done.order.id, done.line.id, "INV-090"))
            .await
            .unwrap();

        assert_eq!(orders.count_open_today(OrderKind::Lab).await.unwrap(), 2);
        assert_eq!(orders.count_open_today(OrderKind::Diagnostic).await.unwrap(), 0);
        let tomorrow = Utc::now() + Duration::days(1);
        assert_eq!(orders.count_open_today_at(OrderKind::Lab, tomorrow).await.unwrap(), 0);
    }

    /// 第一次查询看不到并发事务刚提交的医嘱头
    struct StaleLookup {
        inner: MemoryTx,
        stale: bool,
    }

    #[async_trait]
    impl OrderRepository for StaleLookup {
        async fn find_order(&mut self, id: i64) -> Result<Option<Order>> {
            self.inner.find_order(id).await
        }

        async fn find_open_order(&mut self, chart_id: i64, kind: OrderKind) -> Result<Option<Order>> {
            if std::mem::take(&mut self.stale) {
                return Ok(None);
            }
            self.inner.find_open_order(chart_id, kind).await
        }

        async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
            self.inner.insert_order(order).await
        }

        async fn update_order(&mut self, order: &Order) -> Result<()> {
            self.inner.update_order(order).await
        }

        async fn delete_order(&mut self, id: i64) -> Result<()> {
            self.inner.delete_order(id).await
        }

        async fn count_orders(
            &mut self,
            kind: OrderKind,
            status: OrderStatus,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<i64> {
            self.inner.count_orders(kind, status, from, to).await
        }

        async fn find_line_item(&mut self, id: i64) -> Result<Option<LineItem>> {
            self.inner.find_line_item(id).await
        }

        async fn line_items(&mut self, order_id: i64) -> Result<Vec<LineItem>> {
            self.inner.line_items(order_id).await
        }

        async fn insert_line_item(&mut self, line: NewLineItem) -> Result<LineItem> {
            self.inner.insert_line_item(line).await
        }

        async fn update_line_item(&mut self, line: &LineItem) -> Result<()> {
            self.inner.update_line_item(line).await
        }

        async fn delete_line_item(&mut self, id: i64) -> Result<()> {
            self.inner.delete_line_item(id).await
        }
    }

    #[tokio::test]
    async fn test_concurrently_opened_order_is_reused() {
        let fixture = Fixture::seeded().await;
        let chart = seed_encounter(&fixture.store, 5, Utc::now()).await;
        let orders = lifecycle(&fixture.store);

        let winner = orders
            .request_service(ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER).service_type(CBC))
            .await
            .unwrap();

        let mut tx = StaleLookup {
            inner: fixture.store.begin().await.unwrap(),
            stale: true,
        };
        let (order, created) = open_order(
            &mut tx,
            NewOrder {
                kind: OrderKind::Lab,
                chart_id: chart.id,
                patient_id: PATIENT,
                requested_by: PROVIDER,
            },
        )
        .await
        .unwrap();
        assert!(!created);
        assert_eq!(order.id, winner.order.id);
        assert!(!tx.stale);
        tx.inner.commit().await.unwrap();

        assert_eq!(orders.count_open_today(OrderKind::Lab).await.unwrap(), 1);
    }
}
