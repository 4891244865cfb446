pub mod agent_client;
pub mod flow_executor;

pub use agent_client::HttpAgentClient;
pub use flow_executor::{FlowExecutor, FlowOutcome};
