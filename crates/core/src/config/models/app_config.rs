use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    agent::AgentClientConfig,
    dispatcher_worker::{SchedulerConfig, WorkerConfig},
    observability::ObservabilityConfig,
};

/// 实体定义文件位置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefinitionsConfig {
    pub path: String,
}

impl Default for DefinitionsConfig {
    fn default() -> Self {
        Self {
            path: "config/definitions.toml".to_string(),
        }
    }
}

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub agent: AgentClientConfig,
    pub observability: ObservabilityConfig,
    pub definitions: DefinitionsConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: SCHEDULER__, section separator: __)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/scheduler.toml", "scheduler.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        // 环境变量覆盖，优先级最高
        builder = builder.add_source(
            Environment::with_prefix("SCHEDULER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.agent.validate().context("Agent客户端配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        if self.definitions.path.trim().is_empty() {
            return Err(anyhow::anyhow!("实体定义文件路径不能为空"));
        }

        Ok(())
    }
}
