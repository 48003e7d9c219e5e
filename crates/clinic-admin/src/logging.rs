//! 日志初始化

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// 解析日志过滤规则，命令行级别优先于配置
pub fn build_filter(config: &LoggingConfig, override_level: Option<&str>) -> Result<EnvFilter> {
    let directives = override_level.unwrap_or(&config.level);
    EnvFilter::try_new(directives)
        .with_context(|| format!("Invalid log filter: {}", directives))
}

/// 安装全局日志订阅器，按配置输出文本或 JSON
pub fn init_tracing(config: &LoggingConfig, override_level: Option<&str>) -> Result<()> {
    let filter = build_filter(config, override_level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}
