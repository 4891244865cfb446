use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use scheduler_core::{init_logging, AppConfig, LogFormat};
use taskflow_scheduler::{Application, ShutdownManager};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("taskflow-scheduler")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式任务流调度系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径（缺省时查找 config/scheduler.toml）"),
        )
        .arg(
            Arg::new("definitions")
                .short('d')
                .long("definitions")
                .value_name("FILE")
                .help("实体定义文件路径，覆盖配置中的 definitions.path"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");

    let mut config = AppConfig::load(config_path.map(String::as_str)).with_context(|| {
        format!(
            "加载配置失败: {}",
            config_path.map(String::as_str).unwrap_or("<默认路径>")
        )
    })?;

    if let Some(path) = matches.get_one::<String>("definitions") {
        config.definitions.path = path.clone();
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }
    config.validate().context("配置验证失败")?;

    let log_format: LogFormat = config.observability.log_format.parse()?;
    init_logging(&config.observability.log_level, log_format)?;

    info!("启动分布式任务流调度系统");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }
    info!("实体定义文件: {}", config.definitions.path);

    let shutdown_timeout = config.scheduler.shutdown_grace() + Duration::from_secs(5);
    let app = Arc::new(Application::new(config).await?);

    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);

        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await;

    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(shutdown_timeout, app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("分布式任务流调度系统已退出");
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
