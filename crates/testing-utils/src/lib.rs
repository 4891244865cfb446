//! # Scheduler Testing Utils
//!
//! 工作区内共享的测试工具：
//!
//! - **Builders**: 带合理默认值的实体构造器
//! - **Mocks**: 内存实体仓储与可编排结果的 Agent
//!
//! ```toml
//! [dev-dependencies]
//! scheduler-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;

use std::time::Duration;

/// 轮询条件直到成立或超时，返回条件最终是否成立
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
