//! 工作流运行参数
//!
//! 进程启动时由配置解析一次，随后传入各组件，请求处理期间不再读取环境变量。

use crate::kinds::VisitPurpose;
use chrono::FixedOffset;
use clinic_core::utils::clinic_offset;
use clinic_core::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 工作流参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// 前台队列名称，复诊确认后新就诊进入此队列
    pub front_desk_queue: String,
    /// 过期清理周期
    pub reaper_interval: Duration,
    /// 诊所本地时区相对 UTC 的分钟数
    pub utc_offset_minutes: i32,
    /// 新建就诊使用的就诊类型名称
    pub visit_types: VisitTypeTitles,
}

impl WorkflowSettings {
    pub fn offset(&self) -> Result<FixedOffset> {
        clinic_offset(self.utc_offset_minutes)
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            front_desk_queue: "Front Desk".to_string(),
            reaper_interval: Duration::from_secs(3600), // 每小时
            utc_offset_minutes: 0,
            visit_types: VisitTypeTitles::default(),
        }
    }
}

/// 就诊类型名称（在就诊类型目录中按名称查找）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VisitTypeTitles {
    pub surgery: String,
    pub treatment: String,
    pub referral: String,
    pub follow_up: String,
}

impl VisitTypeTitles {
    pub fn title(&self, purpose: VisitPurpose) -> &str {
        match purpose {
            VisitPurpose::Surgery => &self.surgery,
            VisitPurpose::Treatment => &self.treatment,
            VisitPurpose::Referral => &self.referral,
            VisitPurpose::FollowUp => &self.follow_up,
        }
    }
}

impl Default for VisitTypeTitles {
    fn default() -> Self {
        Self {
            surgery: "Surgery".to_string(),
            treatment: "Treatment".to_string(),
            referral: "Referral".to_string(),
            follow_up: "Follow Up".to_string(),
        }
    }
}
