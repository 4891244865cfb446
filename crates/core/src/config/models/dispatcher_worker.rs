use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 调度控制循环配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 时钟节拍间隔（毫秒）
    pub tick_interval_ms: u64,
    /// 预计算窗口（分钟），窗口消耗一半后自动重算
    pub lookahead_minutes: u64,
    /// 停止时等待Worker排空的最长时间（秒）
    pub shutdown_grace_seconds: u64,
    pub shutdown_poll_interval_ms: u64,
    /// 仪表盘中展示的即将执行条目上限
    pub upcoming_view_limit: usize,
    pub command_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            lookahead_minutes: 30,
            shutdown_grace_seconds: 6,
            shutdown_poll_interval_ms: 200,
            upcoming_view_limit: 30,
            command_buffer: 64,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn lookahead(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lookahead_minutes as i64)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn shutdown_poll_interval(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_interval_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(anyhow::anyhow!("调度节拍间隔必须大于0"));
        }

        if self.lookahead_minutes < 2 {
            return Err(anyhow::anyhow!(
                "预计算窗口至少为2分钟: {}",
                self.lookahead_minutes
            ));
        }

        if self.shutdown_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("停止检查间隔必须大于0"));
        }

        if self.command_buffer == 0 {
            return Err(anyhow::anyhow!("命令通道容量必须大于0"));
        }

        Ok(())
    }
}

/// Worker 控制循环配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 内务节拍间隔（毫秒）
    pub housekeeping_interval_ms: u64,
    /// 已终止运行在列表中保留的时间（秒）
    pub terminated_retention_seconds: u64,
    /// 直连队列（id 0）的并发槽位
    pub direct_queue_slot: i32,
    pub command_buffer: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            housekeeping_interval_ms: 1000,
            terminated_retention_seconds: 2,
            direct_queue_slot: 1000,
            command_buffer: 64,
        }
    }
}

impl WorkerConfig {
    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_millis(self.housekeeping_interval_ms)
    }

    pub fn terminated_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.terminated_retention_seconds as i64)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.housekeeping_interval_ms == 0 {
            return Err(anyhow::anyhow!("内务节拍间隔必须大于0"));
        }

        if self.direct_queue_slot <= 0 {
            return Err(anyhow::anyhow!(
                "直连队列槽位必须大于0: {}",
                self.direct_queue_slot
            ));
        }

        if self.command_buffer == 0 {
            return Err(anyhow::anyhow!("命令通道容量必须大于0"));
        }

        Ok(())
    }
}
