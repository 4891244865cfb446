use std::sync::Arc;

use anyhow::{Context, Result};
use scheduler_core::AppConfig;
use scheduler_dispatcher::{Scheduler, SchedulerHandle};
use scheduler_domain::DashboardView;
use scheduler_infrastructure::FileEntityRepository;
use scheduler_worker::HttpAgentClient;
use tokio::sync::broadcast;
use tracing::{error, info};

/// 主应用程序：定义文件仓储 + HTTP Agent 客户端 + 调度器
pub struct Application {
    config: AppConfig,
    repository: Arc<FileEntityRepository>,
    scheduler: SchedulerHandle,
}

impl Application {
    /// 加载实体定义并启动调度器
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!(definitions = %config.definitions.path, "初始化应用程序");

        let repository = Arc::new(
            FileEntityRepository::open(&config.definitions.path)
                .await
                .with_context(|| format!("加载实体定义失败: {}", config.definitions.path))?,
        );

        let agent_api =
            Arc::new(HttpAgentClient::new(config.agent.clone()).context("创建Agent客户端失败")?);

        let scheduler = Scheduler::start(&config, repository.clone(), agent_api)
            .await
            .context("启动调度器失败")?;

        Ok(Self {
            config,
            repository,
            scheduler,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    pub fn dashboard(&self) -> DashboardView {
        self.scheduler.dashboard()
    }

    /// 重新读取定义文件并刷新调度器缓存；读取失败时保留原有定义
    pub async fn reload(&self) -> Result<()> {
        self.repository
            .reload()
            .await
            .with_context(|| format!("重新加载实体定义失败: {}", self.repository.path().display()))?;
        self.scheduler
            .refresh_all()
            .await
            .context("通知调度器刷新失败")?;
        Ok(())
    }

    /// 运行直到收到关闭信号，然后停止调度器（等待 Worker 排空有上限）
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("应用程序已启动");
        let mut reload_signal = ReloadSignal::new()?;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止调度器");
                    break;
                }
                _ = reload_signal.recv() => {
                    info!("收到SIGHUP信号，重新加载实体定义");
                    if let Err(e) = self.reload().await {
                        error!("{e:#}");
                    }
                }
            }
        }

        self.scheduler.stop().await.context("停止调度器失败")?;
        info!("应用程序已停止");
        Ok(())
    }
}

/// 重新加载信号（unix 上为 SIGHUP，其他平台永不触发）
struct ReloadSignal {
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl ReloadSignal {
    #[cfg(unix)]
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        let hangup = signal(SignalKind::hangup()).context("安装SIGHUP信号处理器失败")?;
        Ok(Self { hangup })
    }

    #[cfg(not(unix))]
    fn new() -> Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        if self.hangup.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}
