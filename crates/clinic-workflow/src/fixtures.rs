//! 测试用参考数据

use crate::{ClinicWorkflow, MemoryStore, WorkflowSettings};
use chrono::{DateTime, Utc};
use clinic_core::*;
use rust_decimal::Decimal;

pub const PATIENT: i64 = 1;
pub const PROVIDER: i64 = 2;
pub const SPECIALIST: i64 = 3;
pub const CASHIER: i64 = 4;

pub const ROOM_OR: i64 = 3;
pub const ROOM_EXAM: i64 = 8;

pub const CONSULTATION: i64 = 10;

pub const XRAY: i64 = 20;
pub const CBC: i64 = 21;
pub const APPENDECTOMY: i64 = 22;
pub const PHYSIOTHERAPY: i64 = 23;

pub const XRAY_FEE: i64 = 100;
pub const CONTRAST_FEE: i64 = 101;
pub const CBC_FEE: i64 = 102;
pub const SURGERY_FEE: i64 = 103;
pub const PHYSIO_FEE: i64 = 104;
pub const REFERRAL_FEE: i64 = 105;
pub const FOLLOW_UP_FEE: i64 = 106;

pub struct Fixture {
    pub store: MemoryStore,
}

impl Fixture {
    pub async fn seeded() -> Self {
        let store = MemoryStore::new();

        store
            .add_patient(Patient { id: PATIENT, mrn: "MRN-0001".into(), name: "Ana Silva".into() })
            .await;
        for (id, name) in [(PROVIDER, "Dr. Okafor"), (SPECIALIST, "Dr. Lindqvist"), (CASHIER, "Front Desk")] {
            store
                .add_user(User { id, name: name.into(), department_id: Some(1) })
                .await;
        }
        store.add_room(Room { id: ROOM_OR, title: "Operating Room 3".into() }).await;
        store.add_room(Room { id: ROOM_EXAM, title: "Exam Room 8".into() }).await;

        for (id, title) in [
            (CONSULTATION, "Consultation"),
            (11, "Surgery"),
            (12, "Treatment"),
            (13, "Referral"),
            (14, "Follow Up"),
        ] {
            store.add_visit_type(VisitType { id, title: title.into() }).await;
        }

        for (id, code, title, cents) in [
            (XRAY_FEE, "71045", "Chest X-Ray", 5000),
            (CONTRAST_FEE, "Q9967", "Contrast Supply", 1250),
            (CBC_FEE, "85025", "Complete Blood Count", 2000),
            (SURGERY_FEE, "44950", "Appendectomy", 150000),
            (PHYSIO_FEE, "97110", "Therapeutic Exercise", 8000),
            (REFERRAL_FEE, "99242", "Referral Consultation", 3000),
            (FOLLOW_UP_FEE, "99212", "Follow Up Visit", 1500),
        ] {
            store
                .add_billing_code(BillingCode {
                    id,
                    code: code.into(),
                    title: title.into(),
                    price: Decimal::new(cents, 2),
                })
                .await;
        }

        store
            .add_service_type(ServiceType {
                id: XRAY,
                kind: OrderKind::Diagnostic,
                title: "X-Ray".into(),
                billing_code_id: XRAY_FEE,
                supplies: vec![SupplyCharge { supply_id: 1, billing_code_id: CONTRAST_FEE }],
            })
            .await;
        store
            .add_service_type(ServiceType {
                id: CBC,
                kind: OrderKind::Lab,
                title: "Lab-CBC".into(),
                billing_code_id: CBC_FEE,
                supplies: Vec::new(),
            })
            .await;
        store
            .add_service_type(ServiceType {
                id: APPENDECTOMY,
                kind: OrderKind::Surgical,
                title: "Appendectomy".into(),
                billing_code_id: SURGERY_FEE,
                supplies: vec![SupplyCharge { supply_id: 2, billing_code_id: CONTRAST_FEE }],
            })
            .await;
        store
            .add_service_type(ServiceType {
                id: PHYSIOTHERAPY,
                kind: OrderKind::Treatment,
                title: "Physiotherapy".into(),
                billing_code_id: PHYSIO_FEE,
                supplies: Vec::new(),
            })
            .await;

        Self { store }
    }

    pub fn workflow(&self) -> ClinicWorkflow<MemoryStore> {
        ClinicWorkflow::new(self.store.clone(), WorkflowSettings::default())
            .expect("default settings are valid")
    }
}

/// 导入一次已签到的就诊，返回其病历
pub async fn seed_encounter(store: &MemoryStore, id: i64, check_in: DateTime<Utc>) -> EncounterChart {
    store
        .add_encounter(Encounter {
            id,
            patient_id: PATIENT,
            provider_id: PROVIDER,
            department_id: Some(1),
            room_id: ROOM_EXAM,
            visit_type_id: CONSULTATION,
            status: EncounterStatus::CheckedIn,
            check_in,
            created_at: check_in,
        })
        .await
        .expect("seed encounter")
}
