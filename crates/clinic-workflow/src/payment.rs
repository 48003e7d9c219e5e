//! 收费台账
//!
//! 收费项在申请服务时以 NOTPAID 创建，确认收费或审批减免后变为 PAID

use chrono::Utc;
use clinic_core::{
    settle, ClinicError, ClinicStore, ClinicTx, DirectoryRepository, NewPayment, Payment,
    PaymentRepository, PaymentStatus, PaymentWaiver, Result,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

/// 收费台账
#[derive(Debug)]
pub struct PaymentLedger<S: ClinicStore> {
    store: Arc<S>,
}

impl<S: ClinicStore> Clone for PaymentLedger<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store) }
    }
}

impl<S: ClinicStore> PaymentLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// 批量确认收费
    pub async fn confirm_payments(&self, payment_ids: &[i64], invoice_no: &str) -> Result<Vec<Payment>> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let mut payments = Vec::with_capacity(payment_ids.len());
            for &payment_id in payment_ids {
                let payment = tx
                    .find_payment(payment_id)
                    .await?
                    .ok_or_else(|| ClinicError::not_found("payment", payment_id))?;
                payments.push(payment);
            }
            mark_paid(&mut tx, payments, invoice_no).await
        }
        .await;
        settle(tx, result).await
    }

    /// 申请减免：收费项转为 WAIVER_REQUESTED 并创建待审批的减免单
    pub async fn request_waiver(&self, payment_id: i64, patient_id: i64, requested_by: i64) -> Result<PaymentWaiver> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let mut payment = tx
                .find_payment(payment_id)
                .await?
                .ok_or_else(|| ClinicError::not_found("payment", payment_id))?;
            if tx.find_patient(patient_id).await?.is_none() {
                return Err(ClinicError::not_found("patient", patient_id));
            }
            if tx.find_user(requested_by).await?.is_none() {
                return Err(ClinicError::not_found("user", requested_by));
            }
            if payment.patient_id != patient_id {
                return Err(ClinicError::Validation(format!(
                    "payment {} does not belong to patient {}",
                    payment_id, patient_id
                )));
            }
            if payment.status == PaymentStatus::Paid {
                return Err(ClinicError::Validation(format!("payment {} is already paid", payment_id)));
            }
            if tx.pending_waiver(payment_id).await?.is_some() {
                return Err(ClinicError::Conflict(format!(
                    "payment {} already has a pending waiver",
                    payment_id
                )));
            }

            payment.status = PaymentStatus::WaiverRequested;
            tx.update_payment(&payment).await?;
            tx.insert_waiver(payment_id, patient_id, requested_by).await
        }
        .await;
        let waiver = settle(tx, result).await?;

        info!("Waiver {} requested for payment {}", waiver.id, payment_id);
        Ok(waiver)
    }

    /// 审批减免：批准则收费项转为 PAID，拒绝则退回 NOTPAID
    pub async fn approve_waiver(&self, waiver_id: i64, approve: bool) -> Result<PaymentWaiver> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let mut waiver = tx
                .find_waiver(waiver_id)
                .await?
                .ok_or_else(|| ClinicError::not_found("waiver", waiver_id))?;
            if waiver.approved.is_some() {
                return Err(ClinicError::Conflict(format!("waiver {} already decided", waiver_id)));
            }

            let mut payment = tx
                .find_payment(waiver.payment_id)
                .await?
                .ok_or_else(|| ClinicError::not_found("payment", waiver.payment_id))?;

            let now = Utc::now();
            waiver.approved = Some(approve);
            waiver.decided_at = Some(now);
            tx.update_waiver(&waiver).await?;

            if approve {
                payment.status = PaymentStatus::Paid;
                payment.paid_at = Some(now);
                tx.update_payment(&payment).await?;
            } else if payment.status == PaymentStatus::WaiverRequested {
                payment.status = PaymentStatus::NotPaid;
                tx.update_payment(&payment).await?;
            }
            Ok::<_, ClinicError>(waiver)
        }
        .await;
        let waiver = settle(tx, result).await?;

        info!(
            "Waiver {} {} for payment {}",
            waiver_id,
            if approve { "approved" } else { "denied" },
            waiver.payment_id
        );
        Ok(waiver)
    }

    /// 患者未结清金额（NOTPAID 与 WAIVER_REQUESTED）
    pub async fn outstanding_balance(&self, patient_id: i64) -> Result<Decimal> {
        let mut tx = self.store.begin().await?;
        let result = async {
            if tx.find_patient(patient_id).await?.is_none() {
                return Err(ClinicError::not_found("patient", patient_id));
            }
            let payments = tx.payments_for_patient(patient_id).await?;
            Ok(payments
                .iter()
                .filter(|p| p.status != PaymentStatus::Paid)
                .map(|p| p.amount)
                .sum::<Decimal>())
        }
        .await;
        settle(tx, result).await
    }
}

/// 按收费项目创建 NOTPAID 收费项，金额取收费项目当前价格
pub(crate) async fn create_obligations<X: ClinicTx>(
    tx: &mut X,
    line_item_id: i64,
    patient_id: i64,
    billing_code_ids: &[i64],
) -> Result<Vec<Payment>> {
    let mut payments = Vec::with_capacity(billing_code_ids.len());
    for &billing_code_id in billing_code_ids {
        let code = tx
            .find_billing_code(billing_code_id)
            .await?
            .ok_or_else(|| ClinicError::not_found("billing code", billing_code_id))?;

        let payment = tx
            .insert_payment(NewPayment {
                line_item_id,
                patient_id,
                billing_code_id,
                amount: code.price,
            })
            .await?;
        payments.push(payment);
    }
    Ok(payments)
}

/// 将未付收费项标记为 PAID 并记录发票号，已付的保持不变
pub(crate) async fn mark_paid<X: ClinicTx>(
    tx: &mut X,
    payments: Vec<Payment>,
    invoice_no: &str,
) -> Result<Vec<Payment>> {
    if invoice_no.trim().is_empty() {
        return Err(ClinicError::Validation("invoice number is required".into()));
    }

    let now = Utc::now();
    let mut updated = Vec::with_capacity(payments.len());
    for mut payment in payments {
        if payment.status != PaymentStatus::Paid {
            payment.status = PaymentStatus::Paid;
            payment.invoice_no = Some(invoice_no.to_string());
            payment.paid_at = Some(now);
            tx.update_payment(&payment).await?;
        }
        updated.push(payment);
    }
    Ok(updated)
}
