//! 医嘱类型策略表
//!
//! 六种医嘱共用同一套生命周期，差异全部集中在这张表里：
//!
//! | 类型 | 确认范围 | 完成条件 | 确认后动作 |
//! |---|---|---|---|
//! | Diagnostic | 明细 | 所有明细已付费 | 原就诊进入以服务类型命名的 DIAGNOSTIC 队列 |
//! | Lab | 明细 | 所有明细已付费 | 原就诊进入以服务类型命名的 LAB 队列 |
//! | Surgical | 明细 | 所有明细已付费 | 新建“Surgery”就诊及病历，明细改挂新病历 |
//! | Treatment | 明细 | 所有明细已付费 | 新建“Treatment”就诊及病历，明细改挂新病历 |
//! | Referral | 明细 | 院内明细全部完成 | 院内：新建“Referral”就诊（接诊医生为转诊对象）；外院：仅收费 |
//! | FollowUp | 整单 | 确认即完成 | 新建“Follow Up”就诊及病历，进入前台队列 |

use clinic_core::{LineItemDetail, OrderKind, OrderStatus, PaymentStatus, QueueKind};

/// 确认操作作用的范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmScope {
    LineItem,
    WholeOrder,
}

/// 医嘱头的完成条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionRule {
    AllLinesPaid,
    InHouseLinesCompleted,
    SingleStep,
}

/// 新就诊的用途，对应配置中的就诊类型名称
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitPurpose {
    Surgery,
    Treatment,
    Referral,
    FollowUp,
}

/// 确认后动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmEffect {
    EnqueueOrigin(QueueKind),
    ScheduleVisit(VisitPurpose),
    ScheduleReferral,
    ScheduleFollowUp,
}

/// 单个医嘱类型的能力集合
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindPolicy {
    pub scope: ConfirmScope,
    pub completion: CompletionRule,
    pub effect: ConfirmEffect,
    /// 申请时是否必须指定服务类型
    pub requires_service_type: bool,
    /// 申请时是否至少要有一项收费
    pub requires_charge: bool,
}

impl KindPolicy {
    pub fn of(kind: OrderKind) -> Self {
        match kind {
            OrderKind::Diagnostic => Self::ancillary(QueueKind::Diagnostic),
            OrderKind::Lab => Self::ancillary(QueueKind::Lab),
            OrderKind::Surgical => Self::procedure(VisitPurpose::Surgery),
            OrderKind::Treatment => Self::procedure(VisitPurpose::Treatment),
            OrderKind::Referral => KindPolicy {
                scope: ConfirmScope::LineItem,
                completion: CompletionRule::InHouseLinesCompleted,
                effect: ConfirmEffect::ScheduleReferral,
                requires_service_type: false,
                requires_charge: true,
            },
            OrderKind::FollowUp => KindPolicy {
                scope: ConfirmScope::WholeOrder,
                completion: CompletionRule::SingleStep,
                effect: ConfirmEffect::ScheduleFollowUp,
                requires_service_type: false,
                requires_charge: false,
            },
        }
    }

    fn ancillary(queue_kind: QueueKind) -> Self {
        KindPolicy {
            scope: ConfirmScope::LineItem,
            completion: CompletionRule::AllLinesPaid,
            effect: ConfirmEffect::EnqueueOrigin(queue_kind),
            requires_service_type: true,
            requires_charge: true,
        }
    }

    fn procedure(purpose: VisitPurpose) -> Self {
        KindPolicy {
            scope: ConfirmScope::LineItem,
            completion: CompletionRule::AllLinesPaid,
            effect: ConfirmEffect::ScheduleVisit(purpose),
            requires_service_type: true,
            requires_charge: true,
        }
    }

    /// 判断医嘱头是否满足完成条件
    pub fn completion_holds(&self, lines: &[LineItemDetail]) -> bool {
        match self.completion {
            CompletionRule::AllLinesPaid => {
                !lines.is_empty()
                    && lines.iter().all(|detail| {
                        detail.payments.iter().all(|p| p.status == PaymentStatus::Paid)
                    })
            }
            CompletionRule::InHouseLinesCompleted => lines
                .iter()
                .filter(|detail| {
                    detail.line.referral.as_ref().map_or(true, |target| target.is_in_house())
                })
                .all(|detail| detail.line.status == OrderStatus::Completed),
            CompletionRule::SingleStep => true,
        }
    }
}
