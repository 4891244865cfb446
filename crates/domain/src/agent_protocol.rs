//! Agent HTTP 协议
//!
//! - `POST <host>/task/queue` 提交任务，成功返回 202 与任务ID
//! - `GET <host>/task/queue/<id>` 查询状态，成功返回 200
//!
//! 两个请求都携带 `X-Api-Key` 请求头。

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use scheduler_core::SchedulerResult;

use crate::arguments::apply_named_args;
use crate::entities::{Agent, Task, TaskKind};

pub const API_KEY_HEADER: &str = "X-Api-Key";
pub const TASK_QUEUE_PATH: &str = "/task/queue";

/// 提交给Agent的任务描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentTaskRequest {
    #[serde(rename = "CmdTask")]
    Command {
        timeout_ms: u64,
        log_store: String,
        cmd: String,
        args: Vec<String>,
        start_in: String,
    },
    #[serde(rename = "URLCheckTask")]
    UrlCheck {
        timeout_ms: u64,
        log_store: String,
        url: String,
    },
}

impl Task {
    /// 生成线上任务描述，参数中的命名参数占位符会被替换
    pub fn to_request(&self, named_args: &BTreeMap<String, String>) -> AgentTaskRequest {
        match &self.kind {
            TaskKind::Command {
                cmd,
                args,
                start_in,
            } => AgentTaskRequest::Command {
                timeout_ms: self.timeout_ms,
                log_store: self.log_store.clone(),
                cmd: cmd.clone(),
                args: args
                    .iter()
                    .map(|arg| apply_named_args(arg, named_args))
                    .collect(),
                start_in: start_in.clone(),
            },
            TaskKind::UrlCheck { url } => AgentTaskRequest::UrlCheck {
                timeout_ms: self.timeout_ms,
                log_store: self.log_store.clone(),
                url: url.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: i64,
    #[serde(default)]
    pub message: String,
}

/// 远程任务状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentTaskStatus {
    pub id: i64,
    /// Agent 是否认识该任务ID
    pub on_register: bool,
    pub terminated: bool,
    pub result: bool,
    pub result_info: String,
    pub duration_ms: i64,
    pub message: String,
}

/// Agent 调用接口
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// 提交任务，返回远程任务ID
    async fn submit(&self, agent: &Agent, request: &AgentTaskRequest) -> SchedulerResult<i64>;

    /// 查询远程任务状态
    async fn poll(&self, agent: &Agent, remote_id: i64) -> SchedulerResult<AgentTaskStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(kind: TaskKind) -> Task {
        Task {
            id: 1,
            name: "t".to_string(),
            kind,
            timeout_ms: 30_000,
            log_store: "daily".to_string(),
            exec_on: vec![1],
        }
    }

    #[test]
    fn test_command_request_wire_format() {
        let mut named = BTreeMap::new();
        named.insert("DAY".to_string(), "20240101".to_string());
        let request = task(TaskKind::Command {
            cmd: "/opt/export.sh".to_string(),
            args: vec!["--day".to_string(), "<%DAY%>".to_string()],
            start_in: "/opt".to_string(),
        })
        .to_request(&named);

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "type": "CmdTask",
                "timeout_ms": 30000,
                "log_store": "daily",
                "cmd": "/opt/export.sh",
                "args": ["--day", "20240101"],
                "start_in": "/opt"
            })
        );
    }

    #[test]
    fn test_url_check_request_wire_format() {
        let request = task(TaskKind::UrlCheck {
            url: "https://example.org/health".to_string(),
        })
        .to_request(&BTreeMap::new());

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "type": "URLCheckTask",
                "timeout_ms": 30000,
                "log_store": "daily",
                "url": "https://example.org/health"
            })
        );
    }

    #[test]
    fn test_status_tolerates_missing_fields() {
        let status: AgentTaskStatus =
            serde_json::from_str(r#"{"id":5,"on_register":true}"#).unwrap();
        assert_eq!(status.id, 5);
        assert!(status.on_register);
        assert!(!status.terminated);
    }
}
