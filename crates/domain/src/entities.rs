use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recurrence::RuleDefinition;

/// 远程执行节点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    /// 形如 `https://10.0.0.5:8443`
    pub host: String,
    pub api_key: String,
    /// 允许的自签名证书签名
    #[serde(default)]
    pub cert_signature: Option<String>,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl Agent {
    /// 是否需要关闭证书校验
    pub fn relaxed_tls(&self) -> bool {
        self.insecure
            || self
                .cert_signature
                .as_deref()
                .is_some_and(|s| !s.trim().is_empty())
    }
}

/// 任务类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    Command {
        cmd: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        start_in: String,
    },
    UrlCheck {
        url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    #[serde(flatten)]
    pub kind: TaskKind,
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub log_store: String,
    /// 候选Agent，按顺序取第一个可用的
    #[serde(default)]
    pub exec_on: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    pub id: i64,
    pub name: String,
    /// 最大并发处理数
    #[serde(default)]
    pub slot: i32,
    /// 处理中+等待中的上限，0 表示不限
    #[serde(default)]
    pub max_size: i32,
    #[serde(default)]
    pub max_duration: i64,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub paused_since: Option<DateTime<Utc>>,
    /// 互斥队列（仅声明）
    #[serde(default)]
    pub no_exec_while: Vec<i64>,
}

impl Queue {
    pub const DIRECT_ID: i64 = 0;

    /// 未绑定队列的运行使用的伪队列
    pub fn direct(slot: i32) -> Self {
        Self {
            id: Self::DIRECT_ID,
            name: "[Direct]".to_string(),
            slot,
            max_size: 0,
            max_duration: 0,
            paused: false,
            paused_since: None,
            no_exec_while: Vec::new(),
        }
    }

    /// 已删除队列的占位定义，slot 为 0
    pub fn tombstone(id: i64) -> Self {
        Self::direct(0).with_id(id)
    }

    fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self.name = format!("Queue {id}");
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.slot == 0
    }

    pub fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
        if self.max_size < 0 {
            self.max_size = 0;
        }
        if self.slot < 1 {
            self.slot = 1;
        }
        if self.max_size > 0 && self.slot > self.max_size {
            self.slot = self.max_size;
        }
        if self.max_duration < 0 {
            self.max_duration = 0;
        }
    }
}

/// 运行结果：未知 0，成功 1，失败 -1
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum RunResult {
    #[default]
    Unknown,
    Ok,
    Fail,
}

impl From<RunResult> for i8 {
    fn from(value: RunResult) -> Self {
        match value {
            RunResult::Unknown => 0,
            RunResult::Ok => 1,
            RunResult::Fail => -1,
        }
    }
}

impl TryFrom<i8> for RunResult {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RunResult::Unknown),
            1 => Ok(RunResult::Ok),
            -1 => Ok(RunResult::Fail),
            other => Err(format!("invalid run result: {other}")),
        }
    }
}

/// 任务流最近一次运行的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: RunResult,
    #[serde(default)]
    pub message: String,
}

/// 步骤跳转指针：-1 结束并失败，0 顺序执行下一步，N 跳转到第 N 步
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum NextStep {
    Fail,
    Sequential,
    Goto(usize),
}

impl From<NextStep> for i32 {
    fn from(value: NextStep) -> Self {
        match value {
            NextStep::Fail => -1,
            NextStep::Sequential => 0,
            NextStep::Goto(index) => index as i32,
        }
    }
}

impl TryFrom<i32> for NextStep {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(NextStep::Fail),
            0 => Ok(NextStep::Sequential),
            n if n > 0 => Ok(NextStep::Goto(n as usize)),
            other => Err(format!("invalid next step pointer: {other}")),
        }
    }
}

fn default_next_on_ok() -> NextStep {
    NextStep::Sequential
}

fn default_next_on_fail() -> NextStep {
    NextStep::Fail
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFlowStep {
    /// 从 1 开始
    pub index: usize,
    pub task_id: i64,
    #[serde(default = "default_next_on_ok")]
    pub next_on_ok: NextStep,
    #[serde(default = "default_next_on_fail")]
    pub next_on_fail: NextStep,
    #[serde(default)]
    pub retry: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFlow {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<i64>,
    #[serde(default)]
    pub named_args: BTreeMap<String, String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub manual_launch: bool,
    /// 0 表示未绑定调度计划
    #[serde(default)]
    pub schedule_id: i64,
    #[serde(default)]
    pub error_management: i32,
    /// 0 表示不走队列
    #[serde(default)]
    pub queue_id: i64,
    #[serde(default)]
    pub last_run: RunOutcome,
    #[serde(default)]
    pub steps: Vec<TaskFlowStep>,
}

impl TaskFlow {
    pub fn is_scheduled(&self) -> bool {
        self.active && self.schedule_id > 0
    }

    /// 检查步骤编号连续且跳转指针都在范围内
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("invalid name".to_string());
        }
        if self.steps.is_empty() {
            return Err("empty taskflow not allowed".to_string());
        }
        let len = self.steps.len();
        for (i, step) in self.steps.iter().enumerate() {
            if step.index != i + 1 {
                return Err("invalid step index order".to_string());
            }
            for pointer in [step.next_on_ok, step.next_on_fail] {
                if let NextStep::Goto(target) = pointer {
                    if target > len {
                        return Err(format!("step {} : invalid next step {}", i + 1, target));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub name: String,
    /// IANA 时区名，空值表示本地时区
    #[serde(default)]
    pub time_zone: String,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}
