pub mod config;
pub mod errors;
pub mod logging;

pub use crate::config::{
    AgentClientConfig, AppConfig, DefinitionsConfig, ObservabilityConfig, SchedulerConfig,
    WorkerConfig,
};
pub use errors::*;
pub use logging::{init_logging, LogFormat};

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
