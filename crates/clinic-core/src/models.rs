//! 核心数据模型定义

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ========== 参考数据（外部目录，只读） ==========

/// 患者
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    pub id: i64,
    pub mrn: String, // 病历号
    pub name: String,
}

/// 系统用户（医生、护士、前台等）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub department_id: Option<i64>,
}

/// 诊室
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub id: i64,
    pub title: String,
}

/// 就诊类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisitType {
    pub id: i64,
    pub title: String,
}

/// 收费项目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillingCode {
    pub id: i64,
    pub code: String,
    pub title: String,
    pub price: Decimal,
}

/// 服务类型（检查项目、化验项目、手术项目等）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceType {
    pub id: i64,
    pub kind: OrderKind,
    pub title: String,
    pub billing_code_id: i64,
    /// 随服务捆绑收费的耗材
    pub supplies: Vec<SupplyCharge>,
}

/// 耗材与收费项目的关联
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupplyCharge {
    pub supply_id: i64,
    pub billing_code_id: i64,
}

// ========== 队列 ==========

/// 队列类型，声明顺序即列表排序顺序
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueKind {
    User,
    Diagnostic,
    Lab,
    Treatment,
    Surgical,
    PreExam,
    PreOperation,
}

/// 科室队列
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Queue {
    pub id: i64,
    pub name: String,
    pub kind: QueueKind,
    pub created_at: DateTime<Utc>,
}

/// 带有完整就诊记录的队列
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueListing {
    pub queue: Queue,
    pub encounters: Vec<Encounter>,
}

// ========== 就诊 ==========

/// 就诊状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EncounterStatus {
    Scheduled,  // 已预约
    CheckedIn,  // 已签到
    CheckedOut, // 已离院
    Cancelled,  // 已取消
}

/// 就诊（预约）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Encounter {
    pub id: i64,
    pub patient_id: i64,
    pub provider_id: i64,
    pub department_id: Option<i64>,
    pub room_id: i64,
    pub visit_type_id: i64,
    pub status: EncounterStatus,
    pub check_in: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// 新建就诊
#[derive(Debug, Clone)]
pub struct NewEncounter {
    pub patient_id: i64,
    pub provider_id: i64,
    pub department_id: Option<i64>,
    pub room_id: i64,
    pub visit_type_id: i64,
    pub status: EncounterStatus,
    pub check_in: DateTime<Utc>,
}

/// 就诊病历，与就诊一一对应
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncounterChart {
    pub id: i64,
    pub encounter_id: i64,
    /// 锁定后不允许再修改关联的医嘱
    pub locked: bool,
    pub created_at: DateTime<Utc>,
}

// ========== 医嘱 ==========

/// 医嘱类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OrderKind {
    Diagnostic, // 检查
    Lab,        // 化验
    Surgical,   // 手术
    Treatment,  // 治疗
    Referral,   // 转诊
    FollowUp,   // 复诊
}

impl OrderKind {
    pub fn all() -> [OrderKind; 6] {
        [
            OrderKind::Diagnostic,
            OrderKind::Lab,
            OrderKind::Surgical,
            OrderKind::Treatment,
            OrderKind::Referral,
            OrderKind::FollowUp,
        ]
    }
}

/// 医嘱及明细状态，COMPLETED 为终态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Ordered,
    Completed,
}

/// 医嘱头
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: i64,
    pub kind: OrderKind,
    pub chart_id: i64,
    pub patient_id: i64,
    pub requested_by: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// 新建医嘱头
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub kind: OrderKind,
    pub chart_id: i64,
    pub patient_id: i64,
    pub requested_by: i64,
}

/// 转诊去向
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ReferralTarget {
    /// 院内转诊到指定医生
    InHouse { provider_id: i64 },
    /// 外院转诊
    Outsource { facility: String },
}

impl ReferralTarget {
    pub fn is_in_house(&self) -> bool {
        matches!(self, ReferralTarget::InHouse { .. })
    }
}

/// 医嘱明细
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub id: i64,
    pub order_id: i64,
    pub kind: OrderKind,
    pub chart_id: i64,
    pub service_type_id: Option<i64>,
    pub referral: Option<ReferralTarget>,
    pub status: OrderStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 新建医嘱明细
#[derive(Debug, Clone)]
pub struct NewLineItem {
    pub order_id: i64,
    pub kind: OrderKind,
    pub chart_id: i64,
    pub service_type_id: Option<i64>,
    pub referral: Option<ReferralTarget>,
    pub status: OrderStatus,
    pub notes: Option<String>,
}

// ========== 收费 ==========

/// 收费状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    NotPaid,
    Paid,
    WaiverRequested,
}

/// 收费项
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: i64,
    pub line_item_id: i64,
    pub patient_id: i64,
    pub billing_code_id: i64,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub invoice_no: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// 新建收费项
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub line_item_id: i64,
    pub patient_id: i64,
    pub billing_code_id: i64,
    pub amount: Decimal,
}

/// 减免申请
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentWaiver {
    pub id: i64,
    pub payment_id: i64,
    pub patient_id: i64,
    pub requested_by: i64,
    /// None 表示待审批
    pub approved: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// 医嘱详情（医嘱头 + 明细 + 收费）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetail {
    pub order: Order,
    pub lines: Vec<LineItemDetail>,
}

/// 明细及其收费项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemDetail {
    pub line: LineItem,
    pub payments: Vec<Payment>,
}
