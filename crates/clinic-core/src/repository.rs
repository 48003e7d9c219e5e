//! 存储接口
//!
//! 所有组件通过显式传入的 `ClinicStore` 访问持久化数据。每次 `begin` 打开一个
//! 原子工作单元：要么全部提交，要么全部回滚。查询一律返回 `Option`，
//! “不存在”不会以错误的形式出现。

use crate::error::Result;
use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 队列及其有序成员
#[async_trait]
pub trait QueueRepository {
    async fn find_queue(&mut self, id: i64) -> Result<Option<Queue>>;

    async fn find_queue_by_name(&mut self, name: &str) -> Result<Option<Queue>>;

    /// 名称已存在时返回 `Conflict`
    async fn insert_queue(&mut self, name: &str, kind: QueueKind) -> Result<Queue>;

    async fn list_queues(&mut self) -> Result<Vec<Queue>>;

    /// 按入队顺序返回成员
    async fn queue_members(&mut self, queue_id: i64) -> Result<Vec<i64>>;

    /// 追加到队尾；已在队列中时返回 false
    async fn append_member(&mut self, queue_id: i64, encounter_id: i64) -> Result<bool>;

    /// 从队列移除；不在队列中时返回 false
    async fn remove_member(&mut self, queue_id: i64, encounter_id: i64) -> Result<bool>;
}

/// 就诊与病历
#[async_trait]
pub trait EncounterRepository {
    async fn find_encounter(&mut self, id: i64) -> Result<Option<Encounter>>;

    async fn insert_encounter(&mut self, encounter: NewEncounter) -> Result<Encounter>;

    async fn update_encounter(&mut self, encounter: &Encounter) -> Result<()>;

    async fn find_chart(&mut self, id: i64) -> Result<Option<EncounterChart>>;

    async fn find_chart_for_encounter(&mut self, encounter_id: i64)
        -> Result<Option<EncounterChart>>;

    /// 每个就诊只能有一份病历，重复创建返回 `Conflict`
    async fn insert_chart(&mut self, encounter_id: i64) -> Result<EncounterChart>;

    async fn set_chart_locked(&mut self, chart_id: i64, locked: bool) -> Result<()>;
}

/// 医嘱头与明细
#[async_trait]
pub trait OrderRepository {
    async fn find_order(&mut self, id: i64) -> Result<Option<Order>>;

    /// 同一病历、同一类型下状态为 ORDERED 的医嘱头
    async fn find_open_order(&mut self, chart_id: i64, kind: OrderKind) -> Result<Option<Order>>;

    /// 同一 (病历, 类型) 已有 ORDERED 医嘱头时返回 `Conflict`
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order>;

    async fn update_order(&mut self, order: &Order) -> Result<()>;

    async fn delete_order(&mut self, id: i64) -> Result<()>;

    /// 统计 `[from, to)` 内创建的指定状态医嘱数
    async fn count_orders(
        &mut self,
        kind: OrderKind,
        status: OrderStatus,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64>;

    async fn find_line_item(&mut self, id: i64) -> Result<Option<LineItem>>;

    /// 按创建顺序返回明细
    async fn line_items(&mut self, order_id: i64) -> Result<Vec<LineItem>>;

    async fn insert_line_item(&mut self, line: NewLineItem) -> Result<LineItem>;

    async fn update_line_item(&mut self, line: &LineItem) -> Result<()>;

    async fn delete_line_item(&mut self, id: i64) -> Result<()>;
}

/// 收费项与减免申请
#[async_trait]
pub trait PaymentRepository {
    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment>;

    async fn find_payment(&mut self, id: i64) -> Result<Option<Payment>>;

    async fn payments_for_line_item(&mut self, line_item_id: i64) -> Result<Vec<Payment>>;

    async fn payments_for_patient(&mut self, patient_id: i64) -> Result<Vec<Payment>>;

    async fn update_payment(&mut self, payment: &Payment) -> Result<()>;

    async fn delete_payment(&mut self, id: i64) -> Result<()>;

    async fn insert_waiver(
        &mut self,
        payment_id: i64,
        patient_id: i64,
        requested_by: i64,
    ) -> Result<PaymentWaiver>;

    async fn find_waiver(&mut self, id: i64) -> Result<Option<PaymentWaiver>>;

    async fn pending_waiver(&mut self, payment_id: i64) -> Result<Option<PaymentWaiver>>;

    async fn update_waiver(&mut self, waiver: &PaymentWaiver) -> Result<()>;

    async fn delete_waivers(&mut self, payment_id: i64) -> Result<()>;
}

/// 只读参考目录
#[async_trait]
pub trait DirectoryRepository {
    async fn find_patient(&mut self, id: i64) -> Result<Option<Patient>>;

    async fn find_user(&mut self, id: i64) -> Result<Option<User>>;

    async fn find_room(&mut self, id: i64) -> Result<Option<Room>>;

    async fn find_billing_code(&mut self, id: i64) -> Result<Option<BillingCode>>;

    async fn find_service_type(&mut self, id: i64) -> Result<Option<ServiceType>>;

    async fn find_visit_type_by_title(&mut self, title: &str) -> Result<Option<VisitType>>;
}

/// 一个原子工作单元
#[async_trait]
pub trait ClinicTx:
    QueueRepository + EncounterRepository + OrderRepository + PaymentRepository + DirectoryRepository + Send
{
    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// 共享存储句柄
#[async_trait]
pub trait ClinicStore: Send + Sync + 'static {
    type Tx: ClinicTx;

    async fn begin(&self) -> Result<Self::Tx>;
}

/// 结束事务：成功则提交，失败则回滚并返回首个错误
pub async fn settle<T, X>(tx: X, result: Result<T>) -> Result<T>
where
    X: ClinicTx,
    T: Send,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!("Rollback failed after error '{}': {}", err, rollback_err);
            }
            Err(err)
        }
    }
}
