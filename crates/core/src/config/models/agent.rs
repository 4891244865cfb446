use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Agent HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentClientConfig {
    /// 两次状态轮询之间的间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 单次HTTP请求超时（毫秒）
    pub request_timeout_ms: u64,
    /// 提交任务时连接失败的最大尝试次数
    pub submit_max_attempts: u32,
    /// 轮询状态时连接失败的最大尝试次数
    pub poll_max_attempts: u32,
    /// 连接失败后的重试等待（毫秒）
    pub retry_backoff_ms: u64,
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            request_timeout_ms: 2000,
            submit_max_attempts: 3,
            poll_max_attempts: 5,
            retry_backoff_ms: 1000,
        }
    }
}

impl AgentClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.request_timeout_ms == 0 {
            return Err(anyhow::anyhow!("请求超时时间必须大于0"));
        }

        if self.submit_max_attempts == 0 || self.poll_max_attempts == 0 {
            return Err(anyhow::anyhow!(
                "最大尝试次数必须大于0: submit={}, poll={}",
                self.submit_max_attempts,
                self.poll_max_attempts
            ));
        }

        Ok(())
    }
}
