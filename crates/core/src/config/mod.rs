//! 配置管理
//!
//! 加载顺序：默认值 -> TOML配置文件 -> 环境变量（前缀 `SCHEDULER`）

pub mod models;

pub use models::{
    AgentClientConfig, AppConfig, DefinitionsConfig, ObservabilityConfig, SchedulerConfig,
    WorkerConfig,
};
