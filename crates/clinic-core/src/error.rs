//! 错误定义模块

use thiserror::Error;

/// 诊所工作流统一错误类型
#[derive(Error, Debug)]
pub enum ClinicError {
    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("资源冲突: {0}")]
    Conflict(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("无效状态转换: 从 {from} 经 {event}")]
    InvalidStateTransition { from: String, event: String },

    #[error("持久化错误: {0}")]
    Persistence(String),

    #[error("配置错误: {0}")]
    Config(String),
}

/// 调用方可见的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    ValidationFailure,
    PersistenceFailure,
}

impl ClinicError {
    /// 归并为四类错误
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClinicError::NotFound(_) => ErrorKind::NotFound,
            ClinicError::Conflict(_) => ErrorKind::Conflict,
            ClinicError::Validation(_) | ClinicError::InvalidStateTransition { .. } => {
                ErrorKind::ValidationFailure
            }
            ClinicError::Persistence(_) | ClinicError::Config(_) => ErrorKind::PersistenceFailure,
        }
    }

    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        ClinicError::NotFound(format!("{} {} not found", entity, id))
    }
}

/// 诊所工作流统一结果类型
pub type Result<T> = std::result::Result<T, ClinicError>;
