//! 数据库模型

use chrono::{DateTime, Utc};
use clinic_core::models::*;
use clinic_core::{ClinicError, Result};
use rust_decimal::Decimal;
use sqlx::FromRow;

// 枚举在数据库中以字符串存储

/// 枚举与数据库字符串的双向映射
pub trait DbEnum: Sized + Copy + PartialEq + 'static {
    const COLUMN: &'static str;
    const VARIANTS: &'static [(Self, &'static str)];

    fn as_db_str(self) -> &'static str {
        Self::VARIANTS
            .iter()
            .find(|(variant, _)| *variant == self)
            .map(|(_, text)| *text)
            .unwrap_or("")
    }

    fn from_db_str(value: &str) -> Result<Self> {
        Self::VARIANTS
            .iter()
            .find(|(_, text)| *text == value)
            .map(|(variant, _)| *variant)
            .ok_or_else(|| ClinicError::Persistence(format!("unknown {} value '{}'", Self::COLUMN, value)))
    }
}

impl DbEnum for QueueKind {
    const COLUMN: &'static str = "queue kind";
    const VARIANTS: &'static [(Self, &'static str)] = &[
        (QueueKind::User, "USER"),
        (QueueKind::Diagnostic, "DIAGNOSTIC"),
        (QueueKind::Lab, "LAB"),
        (QueueKind::Treatment, "TREATMENT"),
        (QueueKind::Surgical, "SURGICAL"),
        (QueueKind::PreExam, "PRE_EXAM"),
        (QueueKind::PreOperation, "PRE_OPERATION"),
    ];
}

impl DbEnum for EncounterStatus {
    const COLUMN: &'static str = "encounter status";
    const VARIANTS: &'static [(Self, &'static str)] = &[
        (EncounterStatus::Scheduled, "SCHEDULED"),
        (EncounterStatus::CheckedIn, "CHECKED_IN"),
        (EncounterStatus::CheckedOut, "CHECKED_OUT"),
        (EncounterStatus::Cancelled, "CANCELLED"),
    ];
}

impl DbEnum for OrderKind {
    const COLUMN: &'static str = "order kind";
    const VARIANTS: &'static [(Self, &'static str)] = &[
        (OrderKind::Diagnostic, "DIAGNOSTIC"),
        (OrderKind::Lab, "LAB"),
        (OrderKind::Surgical, "SURGICAL"),
        (OrderKind::Treatment, "TREATMENT"),
        (OrderKind::Referral, "REFERRAL"),
        (OrderKind::FollowUp, "FOLLOW_UP"),
    ];
}

impl DbEnum for OrderStatus {
    const COLUMN: &'static str = "order status";
    const VARIANTS: &'static [(Self, &'static str)] =
        &[(OrderStatus::Ordered, "ORDERED"), (OrderStatus::Completed, "COMPLETED")];
}

impl DbEnum for PaymentStatus {
    const COLUMN: &'static str = "payment status";
    const VARIANTS: &'static [(Self, &'static str)] = &[
        (PaymentStatus::NotPaid, "NOTPAID"),
        (PaymentStatus::Paid, "PAID"),
        (PaymentStatus::WaiverRequested, "WAIVER_REQUESTED"),
    ];
}

const REFERRAL_IN_HOUSE: &str = "IN_HOUSE";
const REFERRAL_OUTSOURCE: &str = "OUTSOURCE";

/// 转诊去向拆分为三列：类型、院内医生、外院名称
pub fn referral_columns(target: Option<&ReferralTarget>) -> (Option<&'static str>, Option<i64>, Option<String>) {
    match target {
        Some(ReferralTarget::InHouse { provider_id }) => (Some(REFERRAL_IN_HOUSE), Some(*provider_id), None),
        Some(ReferralTarget::Outsource { facility }) => (Some(REFERRAL_OUTSOURCE), None, Some(facility.clone())),
        None => (None, None, None),
    }
}

fn referral_from_columns(
    kind: Option<&str>,
    provider_id: Option<i64>,
    facility: Option<String>,
) -> Result<Option<ReferralTarget>> {
    match (kind, provider_id, facility) {
        (None, _, _) => Ok(None),
        (Some(REFERRAL_IN_HOUSE), Some(provider_id), _) => Ok(Some(ReferralTarget::InHouse { provider_id })),
        (Some(REFERRAL_OUTSOURCE), _, Some(facility)) => Ok(Some(ReferralTarget::Outsource { facility })),
        (Some(other), _, _) => Err(ClinicError::Persistence(format!("malformed referral '{}'", other))),
    }
}

// ========== 参考目录 ==========

/// 数据库患者表
#[derive(Debug, FromRow)]
pub struct DbPatient {
    pub id: i64,
    pub mrn: String,
    pub name: String,
}

impl From<DbPatient> for Patient {
    fn from(row: DbPatient) -> Self {
        Patient {
            id: row.id,
            mrn: row.mrn,
            name: row.name,
        }
    }
}

/// 数据库用户表
#[derive(Debug, FromRow)]
pub struct DbUser {
    pub id: i64,
    pub name: String,
    pub department_id: Option<i64>,
}

impl From<DbUser> for User {
    fn from(row: DbUser) -> Self {
        User {
            id: row.id,
            name: row.name,
            department_id: row.department_id,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct DbRoom {
    pub id: i64,
    pub title: String,
}

impl From<DbRoom> for Room {
    fn from(row: DbRoom) -> Self {
        Room {
            id: row.id,
            title: row.title,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct DbVisitType {
    pub id: i64,
    pub title: String,
}

impl From<DbVisitType> for VisitType {
    fn from(row: DbVisitType) -> Self {
        VisitType {
            id: row.id,
            title: row.title,
        }
    }
}

/// 数据库收费项目表
#[derive(Debug, FromRow)]
pub struct DbBillingCode {
    pub id: i64,
    pub code: String,
    pub title: String,
    pub price: Decimal,
}

impl From<DbBillingCode> for BillingCode {
    fn from(row: DbBillingCode) -> Self {
        BillingCode {
            id: row.id,
            code: row.code,
            title: row.title,
            price: row.price,
        }
    }
}

/// 数据库服务类型表，耗材在单独的表中
#[derive(Debug, FromRow)]
pub struct DbServiceType {
    pub id: i64,
    pub kind: String,
    pub title: String,
    pub billing_code_id: i64,
}

#[derive(Debug, FromRow)]
pub struct DbSupplyCharge {
    pub supply_id: i64,
    pub billing_code_id: i64,
}

impl DbServiceType {
    pub fn into_model(self, supplies: Vec<DbSupplyCharge>) -> Result<ServiceType> {
        Ok(ServiceType {
            id: self.id,
            kind: OrderKind::from_db_str(&self.kind)?,
            title: self.title,
            billing_code_id: self.billing_code_id,
            supplies: supplies
                .into_iter()
                .map(|s| SupplyCharge {
                    supply_id: s.supply_id,
                    billing_code_id: s.billing_code_id,
                })
                .collect(),
        })
    }
}

// ========== 队列与就诊 ==========

/// 数据库队列表
#[derive(Debug, FromRow)]
pub struct DbQueue {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbQueue> for Queue {
    type Error = ClinicError;

    fn try_from(row: DbQueue) -> Result<Self> {
        Ok(Queue {
            id: row.id,
            name: row.name,
            kind: QueueKind::from_db_str(&row.kind)?,
            created_at: row.created_at,
        })
    }
}

/// 数据库就诊表
#[derive(Debug, FromRow)]
pub struct DbEncounter {
    pub id: i64,
    pub patient_id: i64,
    pub provider_id: i64,
    pub department_id: Option<i64>,
    pub room_id: i64,
    pub visit_type_id: i64,
    pub status: String,
    pub check_in: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbEncounter> for Encounter {
    type Error = ClinicError;

    fn try_from(row: DbEncounter) -> Result<Self> {
        Ok(Encounter {
            id: row.id,
            patient_id: row.patient_id,
            provider_id: row.provider_id,
            department_id: row.department_id,
            room_id: row.room_id,
            visit_type_id: row.visit_type_id,
            status: EncounterStatus::from_db_str(&row.status)?,
            check_in: row.check_in,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct DbChart {
    pub id: i64,
    pub encounter_id: i64,
    pub locked: bool,
    pub created_at: DateTime<Utc>,
}

impl From<DbChart> for EncounterChart {
    fn from(row: DbChart) -> Self {
        EncounterChart {
            id: row.id,
            encounter_id: row.encounter_id,
            locked: row.locked,
            created_at: row.created_at,
        }
    }
}

// ========== 医嘱 ==========

/// 数据库医嘱头表
#[derive(Debug, FromRow)]
pub struct DbOrder {
    pub id: i64,
    pub kind: String,
    pub chart_id: i64,
    pub patient_id: i64,
    pub requested_by: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbOrder> for Order {
    type Error = ClinicError;

    fn try_from(row: DbOrder) -> Result<Self> {
        Ok(Order {
            id: row.id,
            kind: OrderKind::from_db_str(&row.kind)?,
            chart_id: row.chart_id,
            patient_id: row.patient_id,
            requested_by: row.requested_by,
            status: OrderStatus::from_db_str(&row.status)?,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

/// 数据库医嘱明细表
#[derive(Debug, FromRow)]
pub struct DbLineItem {
    pub id: i64,
    pub order_id: i64,
    pub kind: String,
    pub chart_id: i64,
    pub service_type_id: Option<i64>,
    pub referral_kind: Option<String>,
    pub referral_provider_id: Option<i64>,
    pub referral_facility: Option<String>,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbLineItem> for LineItem {
    type Error = ClinicError;

    fn try_from(row: DbLineItem) -> Result<Self> {
        Ok(LineItem {
            id: row.id,
            order_id: row.order_id,
            kind: OrderKind::from_db_str(&row.kind)?,
            chart_id: row.chart_id,
            service_type_id: row.service_type_id,
            referral: referral_from_columns(
                row.referral_kind.as_deref(),
                row.referral_provider_id,
                row.referral_facility,
            )?,
            status: OrderStatus::from_db_str(&row.status)?,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

// ========== 收费 ==========

/// 数据库收费项表
#[derive(Debug, FromRow)]
pub struct DbPayment {
    pub id: i64,
    pub line_item_id: i64,
    pub patient_id: i64,
    pub billing_code_id: i64,
    pub amount: Decimal,
    pub status: String,
    pub invoice_no: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbPayment> for Payment {
    type Error = ClinicError;

    fn try_from(row: DbPayment) -> Result<Self> {
        Ok(Payment {
            id: row.id,
            line_item_id: row.line_item_id,
            patient_id: row.patient_id,
            billing_code_id: row.billing_code_id,
            amount: row.amount,
            status: PaymentStatus::from_db_str(&row.status)?,
            invoice_no: row.invoice_no,
            created_at: row.created_at,
            paid_at: row.paid_at,
        })
    }
}

/// 数据库减免申请表，`approved` 为 NULL 表示待审批
#[derive(Debug, FromRow)]
pub struct DbWaiver {
    pub id: i64,
    pub payment_id: i64,
    pub patient_id: i64,
    pub requested_by: i64,
    pub approved: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl From<DbWaiver> for PaymentWaiver {
    fn from(row: DbWaiver) -> Self {
        PaymentWaiver {
            id: row.id,
            payment_id: row.payment_id,
            patient_id: row.patient_id,
            requested_by: row.requested_by,
            approved: row.approved,
            created_at: row.created_at,
            decided_at: row.decided_at,
        }
    }
}

/// 批量转换查询结果
pub fn convert_rows<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = ClinicError>,
{
    rows.into_iter().map(|row| T::try_from(row)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinic_core::ErrorKind;

    #[test]
    fn test_enum_strings_match_stored_values() {
        assert_eq!(QueueKind::PreOperation.as_db_str(), "PRE_OPERATION");
        assert_eq!(PaymentStatus::NotPaid.as_db_str(), "NOTPAID");
        assert_eq!(OrderKind::from_db_str("FOLLOW_UP").unwrap(), OrderKind::FollowUp);
        assert_eq!(EncounterStatus::from_db_str("CHECKED_IN").unwrap(), EncounterStatus::CheckedIn);

        for kind in OrderKind::all() {
            assert_eq!(OrderKind::from_db_str(kind.as_db_str()).unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_enum_string_is_persistence_error() {
        let err = OrderStatus::from_db_str("CANCELLED").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
    }

    #[test]
    fn test_referral_columns() {
        let target = ReferralTarget::Outsource { facility: "City Hospital".into() };
        let (kind, provider, facility) = referral_columns(Some(&target));
        assert_eq!(kind, Some("OUTSOURCE"));
        assert_eq!(provider, None);
        assert_eq!(referral_from_columns(kind, provider, facility).unwrap(), Some(target));

        assert!(referral_from_columns(Some("IN_HOUSE"), None, None).is_err());
        assert_eq!(referral_from_columns(None, None, None).unwrap(), None);
    }

    #[test]
    fn test_line_item_row_conversion() {
        let row = DbLineItem {
            id: 10,
            order_id: 1,
            kind: "REFERRAL".into(),
            chart_id: 4,
            service_type_id: None,
            referral_kind: Some("IN_HOUSE".into()),
            referral_provider_id: Some(3),
            referral_facility: None,
            status: "ORDERED".into(),
            notes: None,
            created_at: Utc::now(),
        };

        let line = LineItem::try_from(row).unwrap();
        assert_eq!(line.kind, OrderKind::Referral);
        assert_eq!(line.referral, Some(ReferralTarget::InHouse { provider_id: 3 }));
    }
}
