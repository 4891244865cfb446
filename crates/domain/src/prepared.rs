use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{Agent, NextStep, RunOutcome, RunResult, Task};

/// 运行实例状态机：New -> (Queued) -> InProgress -> Terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    New,
    Queued,
    InProgress,
    Terminated,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Terminated)
    }

    /// 等待启动的状态
    pub fn is_pending(&self) -> bool {
        matches!(self, RunState::New | RunState::Queued)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::New => "New",
            RunState::Queued => "Queued",
            RunState::InProgress => "InProgress",
            RunState::Terminated => "Terminated",
        };
        f.write_str(label)
    }
}

/// 触发来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Scheduled {
        schedule_id: i64,
        /// 计划时刻，已转换到调度计划时区
        planned_at: DateTime<FixedOffset>,
    },
    Manual {
        actor: String,
        requested_at: DateTime<FixedOffset>,
    },
}

impl Trigger {
    pub fn is_manual(&self) -> bool {
        matches!(self, Trigger::Manual { .. })
    }

    pub fn reference(&self) -> DateTime<FixedOffset> {
        match self {
            Trigger::Scheduled { planned_at, .. } => *planned_at,
            Trigger::Manual { requested_at, .. } => *requested_at,
        }
    }

    pub fn source_label(&self) -> String {
        match self {
            Trigger::Scheduled { schedule_id, .. } => format!("Schedule ID {schedule_id}"),
            Trigger::Manual { actor, .. } => format!("Manual launch by {actor}"),
        }
    }
}

/// 已解析的步骤：任务定义与选定的Agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStep {
    pub index: usize,
    pub task: Task,
    pub agent: Agent,
    pub next_on_ok: NextStep,
    pub next_on_fail: NextStep,
    pub retry: u32,
}

/// 一次任务流触发的运行时快照
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRun {
    /// Worker 内部序号，提交时分配
    pub seq: u64,
    pub taskflow_id: i64,
    pub taskflow_name: String,
    /// 去重键：任务流ID + 解析后的命名参数
    pub identity: String,
    pub launch_source: String,
    pub reference: DateTime<FixedOffset>,
    pub named_args: BTreeMap<String, String>,
    pub error_management: i32,
    pub steps: Vec<PreparedStep>,
    pub queue_id: i64,
    pub queue_name: String,
    pub state: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub result: RunResult,
    pub result_message: String,
    /// 无法启动的原因，存在时不会联系任何Agent
    pub cannot_launch: Option<String>,
}

impl PreparedRun {
    pub fn new(taskflow_id: i64, taskflow_name: &str, trigger: &Trigger) -> Self {
        Self {
            seq: 0,
            taskflow_id,
            taskflow_name: taskflow_name.to_string(),
            identity: identity_key(taskflow_id, &BTreeMap::new()),
            launch_source: trigger.source_label(),
            reference: trigger.reference(),
            named_args: BTreeMap::new(),
            error_management: 0,
            steps: Vec::new(),
            queue_id: 0,
            queue_name: String::new(),
            state: RunState::New,
            started_at: None,
            stopped_at: None,
            result: RunResult::Unknown,
            result_message: String::new(),
            cannot_launch: None,
        }
    }

    /// 标记为无法启动
    pub fn reject(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.result = RunResult::Fail;
        self.result_message = reason.clone();
        self.cannot_launch = Some(reason);
    }

    pub fn label(&self) -> String {
        format!("{} ({})", self.taskflow_name, self.identity)
    }

    pub fn duration_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        let started = self.started_at?;
        let stopped = self.stopped_at.unwrap_or(now);
        Some((stopped - started).num_milliseconds())
    }

    pub fn outcome(&self) -> RunOutcome {
        RunOutcome {
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            result: self.result,
            message: self.result_message.clone(),
        }
    }
}

/// `TF{id}` 加上按名称排序的 ` [name=value]`
pub fn identity_key(taskflow_id: i64, named_args: &BTreeMap<String, String>) -> String {
    named_args
        .iter()
        .fold(format!("TF{taskflow_id}"), |mut key, (name, value)| {
            key.push_str(&format!(" [{name}={value}]"));
            key
        })
}
