use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use scheduler_core::{AgentClientConfig, SchedulerError, SchedulerResult};
use scheduler_domain::{
    Agent, AgentApi, AgentTaskRequest, AgentTaskStatus, SubmitResponse, API_KEY_HEADER,
    TASK_QUEUE_PATH,
};
use tracing::{debug, warn};

/// 基于 reqwest 的 Agent 客户端
///
/// 连接层错误按配置重试，HTTP 状态码或响应体不符合约定时直接返回协议错误。
pub struct HttpAgentClient {
    config: AgentClientConfig,
    verified: reqwest::Client,
    relaxed: reqwest::Client,
    relaxed_warned: Mutex<HashSet<i64>>,
}

impl HttpAgentClient {
    pub fn new(config: AgentClientConfig) -> SchedulerResult<Self> {
        let verified = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("创建HTTP客户端失败: {e}")))?;

        let relaxed = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            config,
            verified,
            relaxed,
            relaxed_warned: Mutex::new(HashSet::new()),
        })
    }

    fn client_for(&self, agent: &Agent) -> &reqwest::Client {
        if !agent.relaxed_tls() {
            return &self.verified;
        }

        if let Ok(mut warned) = self.relaxed_warned.lock() {
            if warned.insert(agent.id) {
                warn!(
                    agent_id = agent.id,
                    host = %agent.host,
                    "Agent 使用自签名证书，已关闭证书校验"
                );
            }
        }
        &self.relaxed
    }

    fn url(agent: &Agent, path: &str) -> String {
        format!("{}{}", agent.host.trim_end_matches('/'), path)
    }

    async fn send_with_retry<F>(
        &self,
        action: &str,
        max_attempts: u32,
        build: F,
    ) -> SchedulerResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) if attempt >= max_attempts => {
                    return Err(SchedulerError::Network(format!(
                        "{action} 失败，已尝试 {attempt} 次: {e}"
                    )));
                }
                Err(e) => {
                    warn!("{} 连接失败 (第 {}/{} 次): {}", action, attempt, max_attempts, e);
                    tokio::time::sleep(self.config.retry_backoff()).await;
                }
            }
        }
    }
}

#[async_trait]
impl AgentApi for HttpAgentClient {
    async fn submit(&self, agent: &Agent, request: &AgentTaskRequest) -> SchedulerResult<i64> {
        let client = self.client_for(agent);
        let url = Self::url(agent, TASK_QUEUE_PATH);

        let response = self
            .send_with_retry("提交任务", self.config.submit_max_attempts, || {
                client
                    .post(&url)
                    .header(API_KEY_HEADER, &agent.api_key)
                    .json(request)
            })
            .await?;

        let status = response.status();
        if status != StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            return Err(SchedulerError::AgentProtocol(format!(
                "提交任务返回 HTTP {status}: {body}"
            )));
        }

        let accepted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| SchedulerError::AgentProtocol(format!("解析提交响应失败: {e}")))?;

        if accepted.id <= 0 {
            return Err(SchedulerError::AgentProtocol(format!(
                "Agent 返回了无效的任务ID {}: {}",
                accepted.id, accepted.message
            )));
        }

        debug!(agent_id = agent.id, remote_id = accepted.id, "任务已提交");
        Ok(accepted.id)
    }

    async fn poll(&self, agent: &Agent, remote_id: i64) -> SchedulerResult<AgentTaskStatus> {
        let client = self.client_for(agent);
        let url = Self::url(agent, &format!("{TASK_QUEUE_PATH}/{remote_id}"));

        let response = self
            .send_with_retry("查询任务状态", self.config.poll_max_attempts, || {
                client.get(&url).header(API_KEY_HEADER, &agent.api_key)
            })
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(SchedulerError::AgentProtocol(format!(
                "查询任务状态返回 HTTP {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SchedulerError::AgentProtocol(format!("解析任务状态失败: {e}")))
    }
}
