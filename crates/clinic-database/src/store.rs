//! PostgreSQL 存储实现
//!
//! 每个 `PgClinicTx` 包装一个 sqlx 事务；未提交就被丢弃时由 sqlx 回滚。

use crate::connection::DatabasePool;
use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clinic_core::*;
use sqlx::{Postgres, Transaction};

/// PostgreSQL 存储句柄
#[derive(Debug, Clone)]
pub struct PgClinicStore {
    pool: DatabasePool,
}

impl PgClinicStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClinicStore for PgClinicStore {
    type Tx = PgClinicTx;

    async fn begin(&self) -> Result<PgClinicTx> {
        let tx = self.pool.pool().begin().await?;
        Ok(PgClinicTx { tx })
    }
}

/// PostgreSQL 事务
pub struct PgClinicTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ClinicTx for PgClinicTx {
    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl QueueRepository for PgClinicTx {
    async fn find_queue(&mut self, id: i64) -> Result<Option<Queue>> {
        let row = sqlx::query_as::<_, DbQueue>("SELECT * FROM queues WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Queue::try_from).transpose()
    }

    async fn find_queue_by_name(&mut self, name: &str) -> Result<Option<Queue>> {
        let row = sqlx::query_as::<_, DbQueue>("SELECT * FROM queues WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Queue::try_from).transpose()
    }

    async fn insert_queue(&mut self, name: &str, kind: QueueKind) -> Result<Queue> {
        // 名称唯一约束冲突由 sqlx 错误映射为 Conflict
        let row = sqlx::query_as::<_, DbQueue>(
            "INSERT INTO queues (name, kind) VALUES ($1, $2) RETURNING *",
        )
        .bind(name)
        .bind(kind.as_db_str())
        .fetch_one(&mut *self.tx)
        .await?;
        Queue::try_from(row)
    }

    async fn list_queues(&mut self) -> Result<Vec<Queue>> {
        let rows = sqlx::query_as::<_, DbQueue>("SELECT * FROM queues ORDER BY id")
            .fetch_all(&mut *self.tx)
            .await?;
        convert_rows(rows)
    }

    async fn queue_members(&mut self, queue_id: i64) -> Result<Vec<i64>> {
        let members = sqlx::query_scalar::<_, i64>(
            "SELECT encounter_id FROM queue_members WHERE queue_id = $1 ORDER BY position",
        )
        .bind(queue_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(members)
    }

    async fn append_member(&mut self, queue_id: i64, encounter_id: i64) -> Result<bool> {
        if self.find_queue(queue_id).await?.is_none() {
            return Err(ClinicError::not_found("queue", queue_id));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO queue_members (queue_id, encounter_id, position)
            SELECT $1, $2, COALESCE(MAX(position), 0) + 1 FROM queue_members WHERE queue_id = $1
            ON CONFLICT (queue_id, encounter_id) DO NOTHING
            "#,
        )
        .bind(queue_id)
        .bind(encounter_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_member(&mut self, queue_id: i64, encounter_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM queue_members WHERE queue_id = $1 AND encounter_id = $2")
            .bind(queue_id)
            .bind(encounter_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl EncounterRepository for PgClinicTx {
    async fn find_encounter(&mut self, id: i64) -> Result<Option<Encounter>> {
        let row = sqlx::query_as::<_, DbEncounter>("SELECT * FROM encounters WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Encounter::try_from).transpose()
    }

    async fn insert_encounter(&mut self, encounter: NewEncounter) -> Result<Encounter> {
        let row = sqlx::query_as::<_, DbEncounter>(
            r#"
            INSERT INTO encounters (patient_id, provider_id, department_id, room_id, visit_type_id, status, check_in)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(encounter.patient_id)
        .bind(encounter.provider_id)
        .bind(encounter.department_id)
        .bind(encounter.room_id)
        .bind(encounter.visit_type_id)
        .bind(encounter.status.as_db_str())
        .bind(encounter.check_in)
        .fetch_one(&mut *self.tx)
        .await?;
        Encounter::try_from(row)
    }

    async fn update_encounter(&mut self, encounter: &Encounter) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE encounters
            SET provider_id = $2, department_id = $3, room_id = $4, visit_type_id = $5, status = $6, check_in = $7
            WHERE id = $1
            "#,
        )
        .bind(encounter.id)
        .bind(encounter.provider_id)
        .bind(encounter.department_id)
        .bind(encounter.room_id)
        .bind(encounter.visit_type_id)
        .bind(encounter.status.as_db_str())
        .bind(encounter.check_in)
        .execute(&mut *self.tx)
        .await?;
        expect_row(result.rows_affected(), "encounter", encounter.id)
    }

    async fn find_chart(&mut self, id: i64) -> Result<Option<EncounterChart>> {
        let row = sqlx::query_as::<_, DbChart>("SELECT * FROM encounter_charts WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(EncounterChart::from))
    }

    async fn find_chart_for_encounter(&mut self, encounter_id: i64) -> Result<Option<EncounterChart>> {
        let row = sqlx::query_as::<_, DbChart>("SELECT * FROM encounter_charts WHERE encounter_id = $1")
            .bind(encounter_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(EncounterChart::from))
    }

    async fn insert_chart(&mut self, encounter_id: i64) -> Result<EncounterChart> {
        let row = sqlx::query_as::<_, DbChart>(
            "INSERT INTO encounter_charts (encounter_id) VALUES ($1) RETURNING *",
        )
        .bind(encounter_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(EncounterChart::from(row))
    }

    async fn set_chart_locked(&mut self, chart_id: i64, locked: bool) -> Result<()> {
        let result = sqlx::query("UPDATE encounter_charts SET locked = $2 WHERE id = $1")
            .bind(chart_id)
            .bind(locked)
            .execute(&mut *self.tx)
            .await?;
        expect_row(result.rows_affected(), "chart", chart_id)
    }
}

#[async_trait]
impl OrderRepository for PgClinicTx {
    async fn find_order(&mut self, id: i64) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, DbOrder>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn find_open_order(&mut self, chart_id: i64, kind: OrderKind) -> Result<Option<Order>> {
        // 已有医嘱头时行锁让并发追加排队；不存在时由 uq_orders_open 兜底
        let row = sqlx::query_as::<_, DbOrder>(
            r#"
            SELECT * FROM orders
            WHERE chart_id = $1 AND kind = $2 AND status = $3
            ORDER BY id
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(chart_id)
        .bind(kind.as_db_str())
        .bind(OrderStatus::Ordered.as_db_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Order::try_from).transpose()
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        // 唯一键冲突会中止整个事务，这里用 DO NOTHING 让调用方在同一事务里重读
        let row = sqlx::query_as::<_, DbOrder>(
            r#"
            INSERT INTO orders (kind, chart_id, patient_id, requested_by, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (chart_id, kind) WHERE status = 'ORDERED' DO NOTHING
            RETURNING *
            "#,
        )
        .bind(order.kind.as_db_str())
        .bind(order.chart_id)
        .bind(order.patient_id)
        .bind(order.requested_by)
        .bind(OrderStatus::Ordered.as_db_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => Order::try_from(row),
            None => Err(ClinicError::Conflict(format!(
                "chart {} already has an open {:?} order",
                order.chart_id, order.kind
            ))),
        }
    }

    async fn update_order(&mut self, order: &Order) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET status = $2, completed_at = $3 WHERE id = $1")
            .bind(order.id)
            .bind(order.status.as_db_str())
            .bind(order.completed_at)
            .execute(&mut *self.tx)
            .await?;
        expect_row(result.rows_affected(), "order", order.id)
    }

    async fn delete_order(&mut self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn count_orders(
        &mut self,
        kind: OrderKind,
        status: OrderStatus,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM orders
            WHERE kind = $1 AND status = $2 AND created_at >= $3 AND created_at < $4
            "#,
        )
        .bind(kind.as_db_str())
        .bind(status.as_db_str())
        .bind(from)
        .bind(to)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn find_line_item(&mut self, id: i64) -> Result<Option<LineItem>> {
        let row = sqlx::query_as::<_, DbLineItem>("SELECT * FROM line_items WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(LineItem::try_from).transpose()
    }

    async fn line_items(&mut self, order_id: i64) -> Result<Vec<LineItem>> {
        let rows = sqlx::query_as::<_, DbLineItem>("SELECT * FROM line_items WHERE order_id = $1 ORDER BY id")
            .bind(order_id)
            .fetch_all(&mut *self.tx)
            .await?;
        convert_rows(rows)
    }

    async fn insert_line_item(&mut self, line: NewLineItem) -> Result<LineItem> {
        let (referral_kind, referral_provider_id, referral_facility) = referral_columns(line.referral.as_ref());
        let row = sqlx::query_as::<_, DbLineItem>(
            r#"
            INSERT INTO line_items
                (order_id, kind, chart_id, service_type_id, referral_kind, referral_provider_id, referral_facility, status, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(line.order_id)
        .bind(line.kind.as_db_str())
        .bind(line.chart_id)
        .bind(line.service_type_id)
        .bind(referral_kind)
        .bind(referral_provider_id)
        .bind(referral_facility)
        .bind(line.status.as_db_str())
        .bind(line.notes)
        .fetch_one(&mut *self.tx)
        .await?;
        LineItem::try_from(row)
    }

    async fn update_line_item(&mut self, line: &LineItem) -> Result<()> {
        let result = sqlx::query("UPDATE line_items SET chart_id = $2, status = $3, notes = $4 WHERE id = $1")
            .bind(line.id)
            .bind(line.chart_id)
            .bind(line.status.as_db_str())
            .bind(&line.notes)
            .execute(&mut *self.tx)
            .await?;
        expect_row(result.rows_affected(), "line item", line.id)
    }

    async fn delete_line_item(&mut self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM line_items WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for PgClinicTx {
    async fn insert_payment(&mut self, payment: NewPayment) -> Result<Payment> {
        let row = sqlx::query_as::<_, DbPayment>(
            r#"
            INSERT INTO payments (line_item_id, patient_id, billing_code_id, amount, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(payment.line_item_id)
        .bind(payment.patient_id)
        .bind(payment.billing_code_id)
        .bind(payment.amount)
        .bind(PaymentStatus::NotPaid.as_db_str())
        .fetch_one(&mut *self.tx)
        .await?;
        Payment::try_from(row)
    }

    async fn find_payment(&mut self, id: i64) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, DbPayment>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Payment::try_from).transpose()
    }

    async fn payments_for_line_item(&mut self, line_item_id: i64) -> Result<Vec<Payment>> {
        let rows = sqlx::query_as::<_, DbPayment>("SELECT * FROM payments WHERE line_item_id = $1 ORDER BY id")
            .bind(line_item_id)
            .fetch_all(&mut *self.tx)
            .await?;
        convert_rows(rows)
    }

    async fn payments_for_patient(&mut self, patient_id: i64) -> Result<Vec<Payment>> {
        let rows = sqlx::query_as::<_, DbPayment>("SELECT * FROM payments WHERE patient_id = $1 ORDER BY id")
            .bind(patient_id)
            .fetch_all(&mut *self.tx)
            .await?;
        convert_rows(rows)
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<()> {
        let result = sqlx::query("UPDATE payments SET status = $2, invoice_no = $3, paid_at = $4 WHERE id = $1")
            .bind(payment.id)
            .bind(payment.status.as_db_str())
            .bind(&payment.invoice_no)
            .bind(payment.paid_at)
            .execute(&mut *self.tx)
            .await?;
        expect_row(result.rows_affected(), "payment", payment.id)
    }

    async fn delete_payment(&mut self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM payments WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_waiver(&mut self, payment_id: i64, patient_id: i64, requested_by: i64) -> Result<PaymentWaiver> {
        let row = sqlx::query_as::<_, DbWaiver>(
            r#"
            INSERT INTO payment_waivers (payment_id, patient_id, requested_by)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(payment_id)
        .bind(patient_id)
        .bind(requested_by)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(PaymentWaiver::from(row))
    }

    async fn find_waiver(&mut self, id: i64) -> Result<Option<PaymentWaiver>> {
        let row = sqlx::query_as::<_, DbWaiver>("SELECT * FROM payment_waivers WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(PaymentWaiver::from))
    }

    async fn pending_waiver(&mut self, payment_id: i64) -> Result<Option<PaymentWaiver>> {
        let row = sqlx::query_as::<_, DbWaiver>(
            "SELECT * FROM payment_waivers WHERE payment_id = $1 AND approved IS NULL ORDER BY id LIMIT 1",
        )
        .bind(payment_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(PaymentWaiver::from))
    }

    async fn update_waiver(&mut self, waiver: &PaymentWaiver) -> Result<()> {
        let result = sqlx::query("UPDATE payment_waivers SET approved = $2, decided_at = $3 WHERE id = $1")
            .bind(waiver.id)
            .bind(waiver.approved)
            .bind(waiver.decided_at)
            .execute(&mut *self.tx)
            .await?;
        expect_row(result.rows_affected(), "waiver", waiver.id)
    }

    async fn delete_waivers(&mut self, payment_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM payment_waivers WHERE payment_id = $1")
            .bind(payment_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DirectoryRepository for PgClinicTx {
    async fn find_patient(&mut self, id: i64) -> Result<Option<Patient>> {
        let row = sqlx::query_as::<_, DbPatient>("SELECT * FROM patients WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Patient::from))
    }

    async fn find_user(&mut self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, DbUser>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(User::from))
    }

    async fn find_room(&mut self, id: i64) -> Result<Option<Room>> {
        let row = sqlx::query_as::<_, DbRoom>("SELECT * FROM rooms WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(Room::from))
    }

    async fn find_billing_code(&mut self, id: i64) -> Result<Option<BillingCode>> {
        let row = sqlx::query_as::<_, DbBillingCode>("SELECT * FROM billing_codes WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(BillingCode::from))
    }

    async fn find_service_type(&mut self, id: i64) -> Result<Option<ServiceType>> {
        let Some(row) = sqlx::query_as::<_, DbServiceType>("SELECT * FROM service_types WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
        else {
            return Ok(None);
        };

        let supplies = sqlx::query_as::<_, DbSupplyCharge>(
            "SELECT supply_id, billing_code_id FROM service_type_supplies WHERE service_type_id = $1 ORDER BY supply_id",
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await?;
        row.into_model(supplies).map(Some)
    }

    async fn find_visit_type_by_title(&mut self, title: &str) -> Result<Option<VisitType>> {
        let row = sqlx::query_as::<_, DbVisitType>("SELECT * FROM visit_types WHERE title = $1")
            .bind(title)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(VisitType::from))
    }
}

/// 更新语句未命中任何行时返回 `NotFound`
fn expect_row(rows_affected: u64, entity: &str, id: i64) -> Result<()> {
    if rows_affected == 0 {
        return Err(ClinicError::not_found(entity, id));
    }
    Ok(())
}
