//! 工作流引擎演示程序
//!
//! 在内存存储上走一遍完整流程：分诊入队、申请检查与手术、确认收费、复诊排期、减免审批和过期清理

use chrono::{Duration, Utc};
use clinic_core::{
    BillingCode, Encounter, EncounterStatus, OrderKind, Patient, QueueKind, Room, ServiceType,
    SupplyCharge, User, VisitType,
};
use clinic_workflow::{
    ClinicWorkflow, ConfirmRequest, EffectOutcome, EncounterEvent, MemoryStore, ServiceRequest,
    WorkflowSettings,
};
use rust_decimal::Decimal;

const PATIENT: i64 = 1;
const PROVIDER: i64 = 2;
const CASHIER: i64 = 3;
const EXAM_ROOM: i64 = 8;
const OPERATING_ROOM: i64 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    let store = MemoryStore::new();
    seed_directory(&store).await;
    println!("✅ 参考目录初始化完成");

    let workflow = ClinicWorkflow::new(store.clone(), WorkflowSettings::default())?;

    println!("🚀 诊所工作流演示\n");

    // 1. 预约并签到
    let chart = store
        .add_encounter(Encounter {
            id: 42,
            patient_id: PATIENT,
            provider_id: PROVIDER,
            department_id: Some(1),
            room_id: EXAM_ROOM,
            visit_type_id: 10,
            status: EncounterStatus::Scheduled,
            check_in: Utc::now(),
            created_at: Utc::now(),
        })
        .await?;
    let encounter = workflow
        .update_encounter_status(chart.encounter_id, EncounterEvent::CheckIn)
        .await?;
    println!("📋 就诊 {} 已签到 ({:?})", encounter.id, encounter.status);

    // 2. 分诊：前台 -> 预检
    let front_desk = workflow.add_to_queue("Front Desk", encounter.id, QueueKind::User).await?;
    let triage = workflow
        .move_to_queue_name(front_desk.id, "Triage", encounter.id, QueueKind::PreExam)
        .await?;
    println!("🔄 就诊 {} 从 '{}' 转到 '{}'", encounter.id, front_desk.name, triage.name);

    // 3. 医生开具化验和手术
    let lab = workflow
        .request_service(ServiceRequest::new(OrderKind::Lab, chart.id, PATIENT, PROVIDER).service_type(21))
        .await?;
    let surgery = workflow
        .request_service(
            ServiceRequest::new(OrderKind::Surgical, chart.id, PATIENT, PROVIDER)
                .service_type(22)
                .notes("laparoscopic"),
        )
        .await?;
    println!(
        "💊 已申请化验 (医嘱 {}) 和手术 (医嘱 {})，待缴费: {}",
        lab.order.id,
        surgery.order.id,
        workflow.outstanding_balance(PATIENT).await?
    );

    // 4. 收费确认
    let outcome = workflow
        .confirm(ConfirmRequest::line(lab.order.id, lab.line.id, "INV-1001"))
        .await?;
    print_effects("化验", &outcome.effects);

    let check_in = Utc::now() + Duration::days(2);
    let outcome = workflow
        .confirm(
            ConfirmRequest::line(surgery.order.id, surgery.line.id, "INV-1002")
                .scheduled(OPERATING_ROOM, check_in),
        )
        .await?;
    print_effects("手术", &outcome.effects);

    // 5. 复诊，附带一项减免
    let follow_up = workflow
        .request_service(ServiceRequest::new(OrderKind::FollowUp, chart.id, PATIENT, PROVIDER).billing_code(106))
        .await?;
    let waiver = workflow
        .request_waiver(follow_up.payments[0].id, PATIENT, CASHIER)
        .await?;
    workflow.approve_waiver(waiver.id, true).await?;
    println!("🧾 减免 {} 已批准", waiver.id);

    let outcome = workflow
        .confirm(ConfirmRequest::order(follow_up.order.id, "INV-1003").scheduled(EXAM_ROOM, check_in + Duration::days(7)))
        .await?;
    print_effects("复诊", &outcome.effects);

    // 6. 队列概览
    println!("\n📊 队列概览:");
    for listing in workflow.list_all().await? {
        let members: Vec<i64> = listing.encounters.iter().map(|e| e.id).collect();
        println!("   {:?} '{}': {:?}", listing.queue.kind, listing.queue.name, members);
    }

    let overview = workflow.overview().await?;
    println!("   今日未完成医嘱: {:?}", overview.open_orders_today);
    println!("   待缴费: {}", workflow.outstanding_balance(PATIENT).await?);

    // 7. 过期清理
    let removed = workflow.reaper().sweep_once().await?;
    println!("\n🧹 清理过期队列成员: {}", removed);

    println!("\n🎉 演示完成");
    Ok(())
}

fn print_effects(label: &str, effects: &[EffectOutcome]) {
    for effect in effects {
        match effect {
            EffectOutcome::Enqueued { queue } => {
                println!("✅ {}确认：原就诊进入队列 '{}'", label, queue.name);
            }
            EffectOutcome::Scheduled { encounter, chart, queue } => {
                println!(
                    "✅ {}确认：新就诊 {} (病历 {})，时间 {}{}",
                    label,
                    encounter.id,
                    chart.id,
                    encounter.check_in,
                    queue
                        .as_ref()
                        .map(|q| format!("，进入队列 '{}'", q.name))
                        .unwrap_or_default()
                );
            }
            EffectOutcome::None => println!("✅ {}确认完成", label),
        }
    }
}

async fn seed_directory(store: &MemoryStore) {
    store
        .add_patient(Patient { id: PATIENT, mrn: "MRN-0001".into(), name: "Ana Silva".into() })
        .await;
    store
        .add_user(User { id: PROVIDER, name: "Dr. Okafor".into(), department_id: Some(1) })
        .await;
    store
        .add_user(User { id: CASHIER, name: "Billing Desk".into(), department_id: None })
        .await;
    store.add_room(Room { id: OPERATING_ROOM, title: "Operating Room 3".into() }).await;
    store.add_room(Room { id: EXAM_ROOM, title: "Exam Room 8".into() }).await;

    for (id, title) in [(10, "Consultation"), (11, "Surgery"), (12, "Treatment"), (13, "Referral"), (14, "Follow Up")] {
        store.add_visit_type(VisitType { id, title: title.into() }).await;
    }

    for (id, code, title, cents) in [
        (101, "Q9967", "Surgical Supply Pack", 4500),
        (102, "85025", "Complete Blood Count", 2000),
        (103, "44950", "Appendectomy", 150000),
        (106, "99212", "Follow Up Visit", 1500),
    ] {
        store
            .add_billing_code(BillingCode { id, code: code.into(), title: title.into(), price: Decimal::new(cents, 2) })
            .await;
    }

    store
        .add_service_type(ServiceType {
            id: 21,
            kind: OrderKind::Lab,
            title: "Lab-CBC".into(),
            billing_code_id: 102,
            supplies: Vec::new(),
        })
        .await;
    store
        .add_service_type(ServiceType {
            id: 22,
            kind: OrderKind::Surgical,
            title: "Appendectomy".into(),
            billing_code_id: 103,
            supplies: vec![SupplyCharge { supply_id: 1, billing_code_id: 101 }],
        })
        .await;
}
