pub mod agent;
pub mod app_config;
pub mod dispatcher_worker;
pub mod observability;

// Re-export main types for easier imports
pub use agent::AgentClientConfig;
pub use app_config::{AppConfig, DefinitionsConfig};
pub use dispatcher_worker::{SchedulerConfig, WorkerConfig};
pub use observability::ObservabilityConfig;
