//! 配置管理
//!
//! 从配置文件与 `CLINIC_` 前缀环境变量加载配置，校验后供服务进程读取和更新

use anyhow::{Context, Result};
use clinic_database::PoolSettings;
use clinic_workflow::{VisitTypeTitles, WorkflowSettings};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info};

/// 一天的分钟数，时区偏移必须严格小于该值
const MINUTES_PER_DAY: i32 = 24 * 60;

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: Arc<RwLock<ClinicConfig>>,
    /// 配置文件路径
    config_path: String,
    /// 配置验证器
    validator: ConfigValidator,
}

/// 诊所服务完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClinicConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 工作流配置
    pub workflow: WorkflowConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub worker_threads: Option<usize>,
}

/// 数据库配置，超时单位为秒
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub connection_string: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// 前台队列名称
    pub front_desk_queue: String,
    /// 过期清理周期（秒）
    pub reaper_interval: u64,
    /// 诊所本地时区相对 UTC 的分钟数
    pub utc_offset_minutes: i32,
    pub visit_types: VisitTypeTitles,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `text` 或 `json`
    pub format: String,
}

impl ClinicConfig {
    /// 工作流运行参数
    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            front_desk_queue: self.workflow.front_desk_queue.clone(),
            reaper_interval: Duration::from_secs(self.workflow.reaper_interval),
            utc_offset_minutes: self.workflow.utc_offset_minutes,
            visit_types: self.workflow.visit_types.clone(),
        }
    }

    /// 连接池参数
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            connection_string: self.database.connection_string.clone(),
            max_connections: self.database.max_connections,
            min_connections: self.database.min_connections,
            connect_timeout: Duration::from_secs(self.database.connect_timeout),
            idle_timeout: Duration::from_secs(self.database.idle_timeout),
        }
    }
}

#[derive(Debug)]
pub struct ConfigValidator {
    validation_rules: Vec<ValidationRule>,
}

#[derive(Debug)]
struct ValidationRule {
    field_path: &'static str,
    validator: fn(&ClinicConfig) -> Result<()>,
}

impl ConfigManager {
    pub fn new(config_path: &str) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path: config_path.to_string(),
            validator,
        })
    }

    fn load_config(config_path: &str) -> Result<ClinicConfig> {
        let settings = Config::builder()
            .add_source(File::with_name(config_path))
            .add_source(
                Environment::with_prefix("CLINIC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {}", config_path))?;

        let config: ClinicConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        info!("Configuration loaded successfully from: {}", config_path);
        Ok(config)
    }

    pub fn config_path(&self) -> &str {
        &self.config_path
    }

    pub async fn get_config(&self) -> ClinicConfig {
        let config = self.config.read().await;
        config.clone()
    }

    /// 在异步运行时之外读取配置
    pub fn blocking_config(&self) -> ClinicConfig {
        self.config.blocking_read().clone()
    }

    pub async fn update_config(&self, new_config: ClinicConfig) -> Result<()> {
        // 先验证，失败时保持原配置
        self.validator.validate(&new_config)?;

        {
            let mut config = self.config.write().await;
            *config = new_config;
        }

        self.save_config().await?;

        info!("Configuration updated successfully");
        Ok(())
    }

    async fn save_config(&self) -> Result<()> {
        let config = self.config.read().await;
        let config_str =
            toml::to_string_pretty(&*config).context("Failed to serialize configuration")?;

        tokio::fs::write(&self.config_path, config_str)
            .await
            .context("Failed to write configuration file")?;

        info!("Configuration saved to: {}", self.config_path);
        Ok(())
    }

    pub async fn reload_config(&self) -> Result<()> {
        let new_config = Self::load_config(&self.config_path)?;
        self.update_config(new_config).await
    }

    pub async fn validate_config(&self) -> Result<()> {
        let config = self.config.read().await;
        self.validator.validate(&config)
    }
}

impl ConfigValidator {
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "database.connection_string",
                validator: |config| {
                    if config.database.connection_string.trim().is_empty() {
                        Err(anyhow::anyhow!("数据库连接字符串不能为空"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "database.min_connections",
                validator: |config| {
                    if config.database.min_connections > config.database.max_connections {
                        Err(anyhow::anyhow!(
                            "最小连接数 {} 大于最大连接数 {}",
                            config.database.min_connections,
                            config.database.max_connections
                        ))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "workflow.reaper_interval",
                validator: |config| {
                    if config.workflow.reaper_interval == 0 {
                        Err(anyhow::anyhow!("过期清理周期不能为 0"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "workflow.front_desk_queue",
                validator: |config| {
                    if config.workflow.front_desk_queue.trim().is_empty() {
                        Err(anyhow::anyhow!("前台队列名称不能为空"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "workflow.utc_offset_minutes",
                validator: |config| {
                    if config.workflow.utc_offset_minutes.abs() >= MINUTES_PER_DAY {
                        Err(anyhow::anyhow!(
                            "时区偏移 {} 分钟超出范围",
                            config.workflow.utc_offset_minutes
                        ))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "logging.format",
                validator: |config| match config.logging.format.as_str() {
                    "text" | "json" => Ok(()),
                    other => Err(anyhow::anyhow!("未知的日志格式: {}", other)),
                },
            },
        ];

        Self { validation_rules }
    }

    pub fn validate(&self, config: &ClinicConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(e.context(format!("invalid {}", rule.field_path)));
            }
        }

        info!("Configuration validation passed");
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "Clinic-Server".to_string(),
            worker_threads: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let pool = PoolSettings::default();
        Self {
            connection_string: pool.connection_string,
            max_connections: pool.max_connections,
            min_connections: pool.min_connections,
            connect_timeout: pool.connect_timeout.as_secs(),
            idle_timeout: pool.idle_timeout.as_secs(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        let settings = WorkflowSettings::default();
        Self {
            front_desk_queue: settings.front_desk_queue,
            reaper_interval: settings.reaper_interval.as_secs(),
            utc_offset_minutes: settings.utc_offset_minutes,
            visit_types: settings.visit_types,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}
