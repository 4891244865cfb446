//! 领域仓储抽象
//!
//! 调度核心只需要按类型批量读取实体，以及回写任务流的最近一次运行结果。

use async_trait::async_trait;
use scheduler_core::SchedulerResult;

use crate::entities::{Agent, Queue, RunOutcome, Schedule, Task, TaskFlow};

/// 实体仓储抽象，`id` 为 `None` 时返回全部
#[async_trait]
pub trait EntityRepository: Send + Sync {
    async fn list_agents(&self, id: Option<i64>) -> SchedulerResult<Vec<Agent>>;
    async fn list_tasks(&self, id: Option<i64>) -> SchedulerResult<Vec<Task>>;
    async fn list_taskflows(&self, id: Option<i64>) -> SchedulerResult<Vec<TaskFlow>>;
    async fn list_queues(&self, id: Option<i64>) -> SchedulerResult<Vec<Queue>>;
    async fn list_schedules(&self, id: Option<i64>) -> SchedulerResult<Vec<Schedule>>;

    /// 回写任务流最近一次运行结果
    async fn save_run_outcome(&self, taskflow_id: i64, outcome: &RunOutcome)
        -> SchedulerResult<()>;
}
