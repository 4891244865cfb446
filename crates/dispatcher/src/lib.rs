//! 调度器：维护实体缓存与预计算窗口，到期时把任务流交给 Worker

pub mod cache;
pub mod next_launches;
pub mod preparer;
pub mod scheduler;

pub use cache::{EntityCache, RefreshReport};
pub use next_launches::NextLaunches;
pub use preparer::TaskFlowPreparer;
pub use scheduler::{Scheduler, SchedulerHandle};
