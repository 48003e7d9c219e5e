//! 收费确认流程
//!
//! 确认收费后按医嘱类型推进：收费项置为 PAID、明细与医嘱头状态推进，
//! 需要后续就诊的类型新建就诊及病历并重新入队。整个流程在调用方的事务内执行。

use crate::kinds::{ConfirmEffect, ConfirmScope, KindPolicy, VisitPurpose};
use crate::payment::mark_paid;
use crate::queue::enqueue;
use crate::settings::VisitTypeTitles;
use crate::state_machine::{OrderEvent, OrderStateMachine};
use chrono::{DateTime, Utc};
use clinic_core::{
    ClinicError, ClinicTx, Encounter, EncounterChart, EncounterStatus, LineItem, LineItemDetail,
    NewEncounter, Order, OrderStatus, Payment, PaymentStatus, Queue, QueueKind, ReferralTarget,
    Result,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// 新就诊的诊室与时间
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitSchedule {
    pub room_id: i64,
    pub check_in: DateTime<Utc>,
}

/// 确认请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub order_id: i64,
    /// 按明细确认的类型必填，整单确认的类型忽略
    pub line_item_id: Option<i64>,
    pub invoice_no: String,
    /// 需要新建就诊的类型必填
    pub schedule: Option<VisitSchedule>,
}

impl ConfirmRequest {
    pub fn line(order_id: i64, line_item_id: i64, invoice_no: impl Into<String>) -> Self {
        Self {
            order_id,
            line_item_id: Some(line_item_id),
            invoice_no: invoice_no.into(),
            schedule: None,
        }
    }

    pub fn order(order_id: i64, invoice_no: impl Into<String>) -> Self {
        Self {
            order_id,
            line_item_id: None,
            invoice_no: invoice_no.into(),
            schedule: None,
        }
    }

    pub fn scheduled(mut self, room_id: i64, check_in: DateTime<Utc>) -> Self {
        self.schedule = Some(VisitSchedule { room_id, check_in });
        self
    }
}

/// 确认后动作的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EffectOutcome {
    /// 原就诊进入科室队列
    Enqueued { queue: Queue },
    /// 新建了后续就诊
    Scheduled {
        encounter: Encounter,
        chart: EncounterChart,
        queue: Option<Queue>,
    },
    None,
}

/// 确认结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmOutcome {
    pub order: Order,
    pub lines: Vec<LineItem>,
    pub payments: Vec<Payment>,
    /// 本次确认是否使医嘱头进入 COMPLETED
    pub completed: bool,
    pub effects: Vec<EffectOutcome>,
}

/// 收费确认流程
#[derive(Debug)]
pub struct ConfirmationWorkflow {
    state_machine: OrderStateMachine,
    visit_types: VisitTypeTitles,
    front_desk_queue: String,
}

impl ConfirmationWorkflow {
    pub fn new(visit_types: VisitTypeTitles, front_desk_queue: String) -> Self {
        Self {
            state_machine: OrderStateMachine::new(),
            visit_types,
            front_desk_queue,
        }
    }

    /// 在给定事务内执行确认；任何一步失败都由调用方整体回滚
    pub async fn apply<X: ClinicTx>(&self, tx: &mut X, request: &ConfirmRequest) -> Result<ConfirmOutcome> {
        let mut order = tx
            .find_order(request.order_id)
            .await?
            .ok_or_else(|| ClinicError::not_found("order", request.order_id))?;
        let completed_status = self.state_machine.transition(order.status, OrderEvent::Complete)?;

        let chart = tx
            .find_chart(order.chart_id)
            .await?
            .ok_or_else(|| ClinicError::not_found("chart", order.chart_id))?;
        if chart.locked {
            return Err(ClinicError::Validation(format!(
                "chart {} is locked, order {} cannot be confirmed",
                chart.id, order.id
            )));
        }
        let origin = tx
            .find_encounter(chart.encounter_id)
            .await?
            .ok_or_else(|| ClinicError::not_found("encounter", chart.encounter_id))?;

        let policy = KindPolicy::of(order.kind);
        let targets = self.targets(tx, &order, &policy, request).await?;

        let mut lines = Vec::with_capacity(targets.len());
        let mut payments = Vec::new();
        let mut effects = Vec::new();

        for mut line in targets {
            let due = tx.payments_for_line_item(line.id).await?;
            if policy.scope == ConfirmScope::LineItem
                && line.status == OrderStatus::Completed
                && due.iter().all(|p| p.status == PaymentStatus::Paid)
            {
                return Err(ClinicError::Conflict(format!("line item {} already confirmed", line.id)));
            }

            payments.extend(mark_paid(tx, due, &request.invoice_no).await?);
            line.status = OrderStatus::Completed;

            if policy.scope == ConfirmScope::LineItem {
                if let Some(effect) = self.line_effect(tx, &policy, &origin, &mut line, request).await? {
                    effects.push(effect);
                }
            }

            tx.update_line_item(&line).await?;
            lines.push(line);
        }

        if policy.effect == ConfirmEffect::ScheduleFollowUp {
            effects.push(self.schedule_follow_up(tx, &origin, request).await?);
        }

        let details = load_details(tx, order.id).await?;
        let completed = policy.completion_holds(&details);
        if completed {
            order.status = completed_status;
            order.completed_at = Some(Utc::now());
            tx.update_order(&order).await?;
        }

        info!(
            "Confirmed {:?} order {} with invoice {} ({} line(s), completed: {})",
            order.kind,
            order.id,
            request.invoice_no,
            lines.len(),
            completed
        );

        Ok(ConfirmOutcome {
            order,
            lines,
            payments,
            completed,
            effects,
        })
    }

    /// 本次确认涉及的明细
    async fn targets<X: ClinicTx>(
        &self,
        tx: &mut X,
        order: &Order,
        policy: &KindPolicy,
        request: &ConfirmRequest,
    ) -> Result<Vec<LineItem>> {
        match policy.scope {
            ConfirmScope::WholeOrder => tx.line_items(order.id).await,
            ConfirmScope::LineItem => {
                let line_id = request.line_item_id.ok_or_else(|| {
                    ClinicError::Validation(format!(
                        "{:?} orders are confirmed per line item",
                        order.kind
                    ))
                })?;
                let line = tx
                    .find_line_item(line_id)
                    .await?
                    .ok_or_else(|| ClinicError::not_found("line item", line_id))?;
                if line.order_id != order.id {
                    return Err(ClinicError::Validation(format!(
                        "line item {} does not belong to order {}",
                        line_id, order.id
                    )));
                }
                Ok(vec![line])
            }
        }
    }

    /// 按明细确认的类型的后续动作
    async fn line_effect<X: ClinicTx>(
        &self,
        tx: &mut X,
        policy: &KindPolicy,
        origin: &Encounter,
        line: &mut LineItem,
        request: &ConfirmRequest,
    ) -> Result<Option<EffectOutcome>> {
        match policy.effect {
            ConfirmEffect::EnqueueOrigin(queue_kind) => {
                let service_type_id = line.service_type_id.ok_or_else(|| {
                    ClinicError::Validation(format!("line item {} has no service type", line.id))
                })?;
                let service_type = tx
                    .find_service_type(service_type_id)
                    .await?
                    .ok_or_else(|| ClinicError::not_found("service type", service_type_id))?;

                let queue = enqueue(tx, &service_type.title, origin.id, queue_kind).await?;
                Ok(Some(EffectOutcome::Enqueued { queue }))
            }
            ConfirmEffect::ScheduleVisit(purpose) => {
                let effect = self
                    .reschedule_line(tx, origin, origin.provider_id, purpose, line, request)
                    .await?;
                Ok(Some(effect))
            }
            ConfirmEffect::ScheduleReferral => match line.referral.clone() {
                Some(ReferralTarget::InHouse { provider_id }) => {
                    let effect = self
                        .reschedule_line(tx, origin, provider_id, VisitPurpose::Referral, line, request)
                        .await?;
                    Ok(Some(effect))
                }
                Some(ReferralTarget::Outsource { .. }) => Ok(None),
                None => Err(ClinicError::Validation(format!(
                    "referral line item {} has no target",
                    line.id
                ))),
            },
            ConfirmEffect::ScheduleFollowUp => Ok(None),
        }
    }

    /// 新建就诊及病历，并把明细改挂到新病历
    async fn reschedule_line<X: ClinicTx>(
        &self,
        tx: &mut X,
        origin: &Encounter,
        provider_id: i64,
        purpose: VisitPurpose,
        line: &mut LineItem,
        request: &ConfirmRequest,
    ) -> Result<EffectOutcome> {
        let (encounter, chart) = self.schedule_visit(tx, origin, provider_id, purpose, request).await?;

        info!(
            "Line item {} moved from chart {} to chart {} of encounter {}",
            line.id, line.chart_id, chart.id, encounter.id
        );
        line.chart_id = chart.id;

        Ok(EffectOutcome::Scheduled {
            encounter,
            chart,
            queue: None,
        })
    }

    /// 复诊：新建就诊及病历并进入前台队列，明细仍挂在原病历上
    async fn schedule_follow_up<X: ClinicTx>(
        &self,
        tx: &mut X,
        origin: &Encounter,
        request: &ConfirmRequest,
    ) -> Result<EffectOutcome> {
        let (encounter, chart) = self
            .schedule_visit(tx, origin, origin.provider_id, VisitPurpose::FollowUp, request)
            .await?;
        let queue = enqueue(tx, &self.front_desk_queue, encounter.id, QueueKind::User).await?;

        Ok(EffectOutcome::Scheduled {
            encounter,
            chart,
            queue: Some(queue),
        })
    }

    async fn schedule_visit<X: ClinicTx>(
        &self,
        tx: &mut X,
        origin: &Encounter,
        provider_id: i64,
        purpose: VisitPurpose,
        request: &ConfirmRequest,
    ) -> Result<(Encounter, EncounterChart)> {
        let schedule = request.schedule.as_ref().ok_or_else(|| {
            ClinicError::Validation(format!(
                "a room and check-in time are required to schedule a {:?} visit",
                purpose
            ))
        })?;

        if tx.find_room(schedule.room_id).await?.is_none() {
            return Err(ClinicError::not_found("room", schedule.room_id));
        }
        if tx.find_user(provider_id).await?.is_none() {
            return Err(ClinicError::not_found("user", provider_id));
        }
        let title = self.visit_types.title(purpose);
        let visit_type = tx
            .find_visit_type_by_title(title)
            .await?
            .ok_or_else(|| ClinicError::NotFound(format!("visit type '{}' not found", title)))?;

        let encounter = tx
            .insert_encounter(NewEncounter {
                patient_id: origin.patient_id,
                provider_id,
                department_id: origin.department_id,
                room_id: schedule.room_id,
                visit_type_id: visit_type.id,
                status: EncounterStatus::Scheduled,
                check_in: schedule.check_in,
            })
            .await?;
        let chart = tx.insert_chart(encounter.id).await?;

        info!(
            "Scheduled {} encounter {} for patient {} at {}",
            title, encounter.id, encounter.patient_id, encounter.check_in
        );
        Ok((encounter, chart))
    }
}

/// 读取医嘱下全部明细及其收费项
pub(crate) async fn load_details<X: ClinicTx>(tx: &mut X, order_id: i64) -> Result<Vec<LineItemDetail>> {
    let lines = tx.line_items(order_id).await?;
    let mut details = Vec::with_capacity(lines.len());
    for line in lines {
        let payments = tx.payments_for_line_item(line.id).await?;
        details.push(LineItemDetail { line, payments });
    }
    Ok(details)
}
