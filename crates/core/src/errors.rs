use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid {field} : {message}")]
    InvalidRecurrence { field: String, message: String },

    #[error("无效的调度计划 {id}: {message}")]
    InvalidSchedule { id: i64, message: String },

    #[error("网络错误: {0}")]
    Network(String),

    #[error("Agent协议错误: {0}")]
    AgentProtocol(String),

    #[error("仓储错误: {0}")]
    Repository(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("通道已关闭: {0}")]
    ChannelClosed(String),
}

impl SchedulerError {
    pub fn invalid_recurrence(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidRecurrence {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// 是否为可重试的传输层错误
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recurrence_error_names_field() {
        let err = SchedulerError::invalid_recurrence("IntervalHours", "08:00-aa : parse fail");
        assert_eq!(err.to_string(), "invalid IntervalHours : 08:00-aa : parse fail");
    }

    #[test]
    fn test_only_network_errors_are_transient() {
        assert!(SchedulerError::Network("connection refused".into()).is_transient());
        assert!(!SchedulerError::AgentProtocol("status 500".into()).is_transient());
        assert!(!SchedulerError::ChannelClosed("worker".into()).is_transient());
    }
}
