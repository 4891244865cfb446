//! Worker：按队列并发限制启动任务流运行，并在Agent上逐步执行

pub mod components;
pub mod queue_state;
pub mod service;

pub use components::{FlowExecutor, FlowOutcome, HttpAgentClient};
pub use queue_state::QueueState;
pub use service::{WorkerHandle, WorkerService, WorkerServiceBuilder};
