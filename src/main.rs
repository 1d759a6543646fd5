use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use jobqueue::app::Application;
use jobqueue::shutdown::{wait_for_shutdown_signal, ShutdownManager};
use jobqueue_core::{init_from_config, AppConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path)
        .with_context(|| format!("加载配置文件失败: {}", config_path.unwrap_or("<default>")))?;

    // 命令行参数优先于配置文件
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    init_from_config(&config.observability)?;
    install_panic_hook();

    match matches.subcommand() {
        Some(("migrate", _)) => migrate(config).await,
        Some(("schedule", sub)) => schedule(config, sub).await,
        Some(("run", _)) | None => run(config).await,
        Some((other, _)) => Err(anyhow::anyhow!("不支持的子命令: {other}")),
    }
}

fn cli() -> Command {
    Command::new("jobqueue")
        .version(env!("CARGO_PKG_VERSION"))
        .about("持久化任务队列与调度器")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .global(true),
        )
        .subcommand(Command::new("migrate").about("创建任务表"))
        .subcommand(Command::new("run").about("启动Worker，直到收到SIGINT/SIGTERM"))
        .subcommand(
            Command::new("schedule")
                .about("调度一个任务")
                .arg(Arg::new("job").required(true).help("任务名称"))
                .arg(
                    Arg::new("args")
                        .long("args")
                        .value_name("TEXT")
                        .help("任务参数")
                        .default_value(""),
                )
                .arg(
                    Arg::new("delay-seconds")
                        .long("delay-seconds")
                        .value_name("N")
                        .help("延迟执行的秒数")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
}

/// 任何tokio任务中的panic都终止进程
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        std::process::exit(1);
    }));
}

fn install_metrics_exporter(config: &AppConfig) -> Result<()> {
    if !config.observability.metrics_enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .observability
        .metrics_bind_address
        .parse()
        .with_context(|| {
            format!(
                "无效的指标监听地址: {}",
                config.observability.metrics_bind_address
            )
        })?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("启动Prometheus指标导出器失败")?;
    info!("Prometheus指标监听: {addr}");
    Ok(())
}

async fn migrate(config: AppConfig) -> Result<()> {
    let app = Application::new(config).await?;
    app.migrate().await?;
    app.close().await;
    Ok(())
}

async fn schedule(config: AppConfig, matches: &ArgMatches) -> Result<()> {
    let job = matches
        .get_one::<String>("job")
        .context("缺少任务名称")?;
    let args = matches
        .get_one::<String>("args")
        .map(|s| s.as_bytes().to_vec())
        .unwrap_or_default();
    let delay = matches
        .get_one::<u64>("delay-seconds")
        .map(|secs| Duration::from_secs(*secs));

    let app = Application::new(config).await?;
    app.migrate().await?;
    let result = app.schedule(job, args, delay).await;
    app.close().await;
    result.map(|_| ())
}

async fn run(config: AppConfig) -> Result<()> {
    info!("启动任务队列Worker");
    install_metrics_exporter(&config)?;

    let app = Application::new(config).await?;
    app.migrate().await?;

    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe();

    let signal_manager = shutdown_manager.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_manager.shutdown();
    });

    let result = app.run(shutdown_rx).await;
    if let Err(e) = &result {
        error!("Worker运行失败: {e:#}");
    }

    app.close().await;
    info!("任务队列Worker已退出");
    result
}
