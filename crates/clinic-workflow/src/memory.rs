//! 内存存储
//!
//! `ClinicStore` 的内存实现。事务持有整张表的互斥锁并在副本上修改，
//! 提交时整体替换，未提交即丢弃，从而保证原子性与隔离性。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clinic_core::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct Tables {
    next_id: i64,

    patients: BTreeMap<i64, Patient>,
    users: BTreeMap<i64, User>,
    rooms: BTreeMap<i64, Room>,
    billing_codes: BTreeMap<i64, BillingCode>,
    service_types: BTreeMap<i64, ServiceType>,
    visit_types: BTreeMap<i64, VisitType>,

    queues: BTreeMap<i64, Queue>,
    members: BTreeMap<i64, Vec<i64>>,
    encounters: BTreeMap<i64, Encounter>,
    charts: BTreeMap<i64, EncounterChart>,
    orders: BTreeMap<i64, Order>,
    line_items: BTreeMap<i64, LineItem>,
    payments: BTreeMap<i64, Payment>,
    waivers: BTreeMap<i64, PaymentWaiver>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// 显式指定的ID不与自增ID冲突
    fn reserve(&mut self, id: i64) {
        self.next_id = self.next_id.max(id);
    }

    fn insert_chart(&mut self, encounter_id: i64) -> Result<EncounterChart> {
        if !self.encounters.contains_key(&encounter_id) {
            return Err(ClinicError::not_found("encounter", encounter_id));
        }
        if self.charts.values().any(|c| c.encounter_id == encounter_id) {
            return Err(ClinicError::Conflict(format!(
                "encounter {} already has a chart",
                encounter_id
            )));
        }

        let chart = EncounterChart {
            id: self.next_id(),
            encounter_id,
            locked: false,
            created_at: Utc::now(),
        };
        self.charts.insert(chart.id, chart.clone());
        Ok(chart)
    }
}

/// 内存存储句柄，克隆后共享同一份数据
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_patient(&self, patient: Patient) {
        let mut tables = self.tables.lock().await;
        tables.reserve(patient.id);
        tables.patients.insert(patient.id, patient);
    }

    pub async fn add_user(&self, user: User) {
        let mut tables = self.tables.lock().await;
        tables.reserve(user.id);
        tables.users.insert(user.id, user);
    }

    pub async fn add_room(&self, room: Room) {
        let mut tables = self.tables.lock().await;
        tables.reserve(room.id);
        tables.rooms.insert(room.id, room);
    }

    pub async fn add_billing_code(&self, code: BillingCode) {
        let mut tables = self.tables.lock().await;
        tables.reserve(code.id);
        tables.billing_codes.insert(code.id, code);
    }

    pub async fn add_service_type(&self, service_type: ServiceType) {
        let mut tables = self.tables.lock().await;
        tables.reserve(service_type.id);
        tables.service_types.insert(service_type.id, service_type);
    }

    pub async fn add_visit_type(&self, visit_type: VisitType) {
        let mut tables = self.tables.lock().await;
        tables.reserve(visit_type.id);
        tables.visit_types.insert(visit_type.id, visit_type);
    }

    /// 导入已有就诊，并同时为其创建病历
    pub async fn add_encounter(&self, encounter: Encounter) -> Result<EncounterChart> {
        let mut tables = self.tables.lock().await;
        tables.reserve(encounter.id);
        let encounter_id = encounter.id;
        tables.encounters.insert(encounter_id, encounter);
        tables.insert_chart(encounter_id)
    }

    /// 已提交的就诊数
    pub async fn encounter_count(&self) -> usize {
        self.tables.lock().await.encounters.len()
    }
}

#[async_trait]
impl ClinicStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = (*guard).clone();
        Ok(MemoryTx { guard, working })
    }
}

/// 内存事务
pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[async_trait]
impl ClinicTx for MemoryTx {
    async fn commit(self) -> Result<()> {
        let MemoryTx { mut guard, working } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl QueueRepository for MemoryTx {
    async fn find_queue(&mut self, id: i64) -> Result<Option<Queue>> {
        Ok(self.working.queues.get(&id).cloned())
    }

    async fn find_queue_by_name(&mut self, name: &str) -> Result<Option<Queue>> {
        Ok(self.working.queues.values().find(|q| q.name == name).cloned())
    }

    async fn insert_queue(&mut self, name: &str, kind: QueueKind) -> Result<Queue> {
        if self.working.queues.values().any(|q| q.name == name) {
            return Err(ClinicError::Conflict(format!("queue '{}' already exists", name)));
        }

        let queue = Queue {
            id: self.working.next_id(),
            name: name.to_string(),
            kind,
            created_at: Utc::now(),
        };
        self.working.queues.insert(queue.id, queue.clone());
        self.working.members.insert(queue.id, Vec::new());
        Ok(queue)
    }

    async fn list_queues(&mut self) -> Result<Vec<Queue>> {
        Ok(self.working.queues.values().cloned().collect())
    }

    async fn queue_members(&mut self, queue_id: i64) -> Result<Vec<i64>> {
        Ok(self.working.members.get(&queue_id).cloned().unwrap_or_default())
    }

    async fn append_member(&mut self, queue_id: i64, encounter_id: i64) -> Result<bool> {
        if !self.working.queues.contains_key(&queue_id) {
            return Err(ClinicError::not_found("queue", queue_id));
        }

        let members = self.working.members.entry(queue_id).or_default();
        if members.contains(&encounter_id) {
            return Ok(false);
        }
        members.push(encounter_id);
        Ok(true)
    }

    async fn remove_member(&mut self, queue_id: i64, encounter_id: i64) -> Result<bool> {
        let Some(members) = self.working.members.get_mut(&queue_id) else {
            return Ok(false);
        };

        let before = members.len();
        members.retain(|&id| id != encounter_id);
        Ok(members.len() != before)
    }
}

#[async_trait]
impl EncounterRepository for MemoryTx {
    async fn find_encounter(&mut self, id: i64) -> Result<Option<Encounter>> {
        Ok(self.working.encounters.get(&id).cloned())
    }

    async fn insert_encounter(&mut self, new: NewEncounter) -> Result<Encounter> {
        let encounter = Encounter {
            id: self.working.next_id(),
            patient_id: new.patient_id,
            provider_id: new.provider_id,
            department_id: new.department_id,
            room_id: new.room_id,
            visit_type_id: new.visit_type_id,
            status: new.status,
            check_in: new.check_in,
            created_at: Utc::now(),
        };
        self.working.encounters.insert(encounter.id, encounter.clone());
        Ok(encounter)
    }

    async fn update_encounter(&mut self, encounter: &Encounter) -> Result<()> {
        match self.working.encounters.get_mut(&encounter.id) {
            Some(existing) => {
                *existing = encounter.clone();
                Ok(())
            }
            None => Err(ClinicError::not_found("encounter", encounter.id)),
        }
    }

    async fn find_chart(&mut self, id: i64) -> Result<Option<EncounterChart>> {
        Ok(self.working.charts.get(&id).cloned())
    }

    async fn find_chart_for_encounter(
        &mut self,
        encounter_id: i64,
    ) -> Result<Option<EncounterChart>> {
        Ok(self
            .working
            .charts
            .values()
            .find(|c| c.encounter_id == encounter_id)
            .cloned())
    }

    async fn insert_chart(&mut self, encounter_id: i64) -> Result<EncounterChart> {
        self.working.insert_chart(encounter_id)
    }

    async fn set_chart_locked(&mut self, chart_id: i64, locked: bool) -> Result<()> {
        match self.working.charts.get_mut(&chart_id) {
            Some(chart) => {
                chart.locked = locked;
                Ok(())
            }
            None => Err(ClinicError::not_found("chart", chart_id)),
        }
    }
}

#[async_trait]
impl OrderRepository for MemoryTx {
    async fn find_order(&mut self, id: i64) -> Result<Option<Order>> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn find_open_order(&mut self, chart_id: i64, kind: OrderKind) -> Result<Option<Order>> {
        Ok(self
            .working
            .orders
            .values()
            .find(|o| o.chart_id == chart_id && o.kind == kind && o.status == OrderStatus::Ordered)
            .cloned())
    }

    async fn insert_order(&mut self, new: NewOrder) -> Result<Order> {
        let open = self.working.orders.values().any(|o| {
            o.chart_id == new.chart_id && o.kind == new.kind && o.status == OrderStatus::Ordered
        });
        if open {
            return Err(ClinicError::Conflict(format!(
                "chart {} already has an open {:?} order",
                new.chart_id, new.kind
            )));
        }
        let order = Order {
            id: self.working.next_id(),
            kind: new.kind,
            chart_id: new.chart_id,
            patient_id: new.patient_id,
            requested_by: new.requested_by,
            status: OrderStatus::Ordered,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.working.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn update_order(&mut self, order: &Order) -> Result<()> {
        match self.working.orders.get_mut(&order.id) {
            Some(existing) => {
                *existing = order.clone();
                Ok(())
            }
            None => Err(ClinicError::not_found("order", order.id)),
        }
    }

    async fn delete_order(&mut self, id: i64) -> Result<()> {
        self.working.orders.remove(&id);
        Ok(())
    }

    async fn count_orders(
        &mut self,
        kind: OrderKind,
        status: OrderStatus,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64> {
        let count = self
            .working
            .orders
            .values()
            .filter(|o| o.kind == kind && o.status == status)
            .filter(|o| o.created_at >= from && o.created_at < to)
            .count();
        Ok(count as i64)
    }

    async fn find_line_item(&mut self, id: i64) -> Result<Option<LineItem>> {
        Ok(self.working.line_items.get(&id).cloned())
    }

    async fn line_items(&mut self, order_id: i64) -> Result<Vec<LineItem>> {
        Ok(self
            .working
            .line_items
            .values()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn insert_line_item(&mut self, new: NewLineItem) -> Result<LineItem> {
        if !self.working.orders.contains_key(&new.order_id) {
            return Err(ClinicError::not_found("order", new.order_id));
        }

        let line = LineItem {
            id: self.working.next_id(),
            order_id: new.order_id,
            kind: new.kind,
            chart_id: new.chart_id,
            service_type_id: new.service_type_id,
            referral: new.referral,
            status: new.status,
            notes: new.notes,
            created_at: Utc::now(),
        };
        self.working.line_items.insert(line.id, line.clone());
        Ok(line)
    }

    async fn update_line_item(&mut self, line: &LineItem) -> Result<()> {
        match self.working.line_items.get_mut(&line.id) {
            Some(existing) => {
                *existing = line.clone();
                Ok(())
            }
            None => Err(ClinicError::not_found("line item", line.id)),
        }
    }

    async fn delete_line_item(&mut self, id: i64) -> Result<()> {
        self.working.line_items.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for MemoryTx {
    async fn insert_payment(&mut self, new: NewPayment) -> Result<Payment> {
        let payment = Payment {
            id: self.working.next_id(),
            line_item_id: new.line_item_id,
            patient_id: new.patient_id,
            billing_code_id: new.billing_code_id,
            amount: new.amount,
            status: PaymentStatus::NotPaid,
            invoice_no: None,
            created_at: Utc::now(),
            paid_at: None,
        };
        self.working.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn find_payment(&mut self, id: i64) -> Result<Option<Payment>> {
        Ok(self.working.payments.get(&id).cloned())
    }

    async fn payments_for_line_item(&mut self, line_item_id: i64) -> Result<Vec<Payment>> {
        Ok(self
            .working
            .payments
            .values()
            .filter(|p| p.line_item_id == line_item_id)
            .cloned()
            .collect())
    }

    async fn payments_for_patient(&mut self, patient_id: i64) -> Result<Vec<Payment>> {
        Ok(self
            .working
            .payments
            .values()
            .filter(|p| p.patient_id == patient_id)
            .cloned()
            .collect())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<()> {
        match self.working.payments.get_mut(&payment.id) {
            Some(existing) => {
                *existing = payment.clone();
                Ok(())
            }
            None => Err(ClinicError::not_found("payment", payment.id)),
        }
    }

    async fn delete_payment(&mut self, id: i64) -> Result<()> {
        self.working.payments.remove(&id);
        Ok(())
    }

    async fn insert_waiver(
        &mut self,
        payment_id: i64,
        patient_id: i64,
        requested_by: i64,
    ) -> Result<PaymentWaiver> {
        let waiver = PaymentWaiver {
            id: self.working.next_id(),
            payment_id,
            patient_id,
            requested_by,
            approved: None,
            created_at: Utc::now(),
            decided_at: None,
        };
        self.working.waivers.insert(waiver.id, waiver.clone());
        Ok(waiver)
    }

    async fn find_waiver(&mut self, id: i64) -> Result<Option<PaymentWaiver>> {
        Ok(self.working.waivers.get(&id).cloned())
    }

    async fn pending_waiver(&mut self, payment_id: i64) -> Result<Option<PaymentWaiver>> {
        Ok(self
            .working
            .waivers
            .values()
            .find(|w| w.payment_id == payment_id && w.approved.is_none())
            .cloned())
    }

    async fn update_waiver(&mut self, waiver: &PaymentWaiver) -> Result<()> {
        match self.working.waivers.get_mut(&waiver.id) {
            Some(existing) => {
                *existing = waiver.clone();
                Ok(())
            }
            None => Err(ClinicError::not_found("waiver", waiver.id)),
        }
    }

    async fn delete_waivers(&mut self, payment_id: i64) -> Result<()> {
        self.working.waivers.retain(|_, w| w.payment_id != payment_id);
        Ok(())
    }
}

#[async_trait]
impl DirectoryRepository for MemoryTx {
    async fn find_patient(&mut self, id: i64) -> Result<Option<Patient>> {
        Ok(self.working.patients.get(&id).cloned())
    }

    async fn find_user(&mut self, id: i64) -> Result<Option<User>> {
        Ok(self.working.users.get(&id).cloned())
    }

    async fn find_room(&mut self, id: i64) -> Result<Option<Room>> {
        Ok(self.working.rooms.get(&id).cloned())
    }

    async fn find_billing_code(&mut self, id: i64) -> Result<Option<BillingCode>> {
        Ok(self.working.billing_codes.get(&id).cloned())
    }

    async fn find_service_type(&mut self, id: i64) -> Result<Option<ServiceType>> {
        Ok(self.working.service_types.get(&id).cloned())
    }

    async fn find_visit_type_by_title(&mut self, title: &str) -> Result<Option<VisitType>> {
        Ok(self.working.visit_types.values().find(|v| v.title == title).cloned())
    }
}
