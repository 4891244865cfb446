//! 仪表盘只读视图

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::RunResult;
use crate::prepared::RunState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueView {
    pub id: i64,
    pub name: String,
    pub slot: i32,
    pub max_size: i32,
    pub paused: bool,
    pub no_exec_while: Vec<i64>,
    pub processing: i32,
    pub waiting: i32,
    pub launched: u64,
    pub terminated: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunView {
    pub label: String,
    pub taskflow_id: i64,
    pub taskflow_name: String,
    pub identity: String,
    pub launch_source: String,
    pub reference: DateTime<FixedOffset>,
    pub queue_id: i64,
    pub queue_name: String,
    pub state: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub result: RunResult,
    pub result_message: String,
}

impl RunView {
    pub fn succeeded(&self) -> bool {
        self.result == RunResult::Ok
    }
}

/// Worker 状态快照：队列按ID排序，运行按标签排序
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub queues: Vec<QueueView>,
    pub runs: Vec<RunView>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl WorkerSnapshot {
    pub fn queue(&self, id: i64) -> Option<&QueueView> {
        self.queues.iter().find(|q| q.id == id)
    }

    pub fn runs_of(&self, taskflow_id: i64) -> impl Iterator<Item = &RunView> {
        self.runs.iter().filter(move |r| r.taskflow_id == taskflow_id)
    }
}

/// 即将触发的调度
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpcomingLaunch {
    pub at: DateTime<Utc>,
    pub schedule_id: i64,
    pub schedule_name: String,
    pub taskflow_id: i64,
    pub taskflow_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardView {
    pub worker: WorkerSnapshot,
    pub upcoming: Vec<UpcomingLaunch>,
}
