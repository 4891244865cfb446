use std::sync::Arc;
use std::time::Duration;

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{
    AgentApi, AgentTaskRequest, AgentTaskStatus, NextStep, PreparedRun, PreparedStep, RunResult,
};
use tracing::{debug, info, warn};

/// 一次任务流执行的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowOutcome {
    pub result: RunResult,
    /// 每行一条执行记录
    pub transcript: String,
}

/// 按步骤跳转指针驱动任务流，逐步提交给Agent并轮询直到结束
pub struct FlowExecutor {
    agent_api: Arc<dyn AgentApi>,
    poll_interval: Duration,
}

impl FlowExecutor {
    pub fn new(agent_api: Arc<dyn AgentApi>, poll_interval: Duration) -> Self {
        Self {
            agent_api,
            poll_interval,
        }
    }

    /// 从第 1 步开始执行，直到到达末尾或遇到失败指针
    ///
    /// 指向自身或更早步骤的跳转会形成循环，执行次数不设上限。
    pub async fn execute(&self, run: &PreparedRun) -> FlowOutcome {
        let mut transcript = Vec::new();
        let len = run.steps.len();
        let mut index = 1usize;

        info!(
            taskflow_id = run.taskflow_id,
            identity = %run.identity,
            steps = len,
            "开始执行任务流"
        );

        let result = loop {
            let Some(step) = index.checked_sub(1).and_then(|i| run.steps.get(i)) else {
                transcript.push(format!("Invalid next step {index}"));
                break RunResult::Fail;
            };

            transcript.push(format!("Start step {} : {}", index, step.task.name));
            let succeeded = self.run_step(run, index, step, &mut transcript).await;

            let pointer = if succeeded {
                step.next_on_ok
            } else {
                step.next_on_fail
            };

            match pointer {
                NextStep::Fail => break RunResult::Fail,
                NextStep::Sequential if index >= len => break RunResult::Ok,
                NextStep::Sequential => index += 1,
                NextStep::Goto(target) => index = target,
            }
        };

        info!(
            taskflow_id = run.taskflow_id,
            identity = %run.identity,
            result = ?result,
            "任务流执行结束"
        );

        FlowOutcome {
            result,
            transcript: transcript.join("\n"),
        }
    }

    /// 执行单个步骤，包含重试；返回是否成功
    async fn run_step(
        &self,
        run: &PreparedRun,
        index: usize,
        step: &PreparedStep,
        transcript: &mut Vec<String>,
    ) -> bool {
        let request = step.task.to_request(&run.named_args);
        let attempts = step.retry + 1;

        for attempt in 1..=attempts {
            let status = match self.run_attempt(step, &request).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(
                        taskflow_id = run.taskflow_id,
                        step = index,
                        agent_id = step.agent.id,
                        "步骤执行出错: {}",
                        e
                    );
                    transcript.push(format!("Step {index} error : {e}"));
                    return false;
                }
            };

            if status.result {
                transcript.push(format!(
                    "Step {} terminated, duration : {}ms",
                    index, status.duration_ms
                ));
                return true;
            }

            transcript.push(format!(
                "Step {} failed (attempt {}/{}), duration : {}ms : {}",
                index, attempt, attempts, status.duration_ms, status.result_info
            ));
            if attempt == attempts {
                transcript.push(format!("task fail : {}", status.result_info));
            } else {
                debug!(taskflow_id = run.taskflow_id, step = index, attempt, "步骤失败，重试");
            }
        }

        false
    }

    async fn run_attempt(
        &self,
        step: &PreparedStep,
        request: &AgentTaskRequest,
    ) -> SchedulerResult<AgentTaskStatus> {
        let remote_id = self.agent_api.submit(&step.agent, request).await?;

        loop {
            tokio::time::sleep(self.poll_interval).await;

            let status = self.agent_api.poll(&step.agent, remote_id).await?;
            if !status.on_register {
                return Err(SchedulerError::AgentProtocol(format!(
                    "unknown id {remote_id}"
                )));
            }
            if status.terminated {
                return Ok(status);
            }
        }
    }
}
