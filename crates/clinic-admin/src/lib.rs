//! # 诊所运维模块
//!
//! 提供配置加载校验与日志初始化

pub mod config;
pub mod logging;

pub use config::{
    ClinicConfig, ConfigManager, ConfigValidator, DatabaseConfig, LoggingConfig, ServerConfig,
    WorkflowConfig,
};
pub use logging::init_tracing;
