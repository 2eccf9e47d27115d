use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use std::time::Duration;
use swb_top_monitor::procs::SnapshotConfig;
use swb_top_monitor::{Config, Monitor, StatusServer, create_cache, run_ticker};

/// 资源监视器
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 服务器绑定地址 (默认: ::，支持 IPv4 和 IPv6)
    #[arg(short, long, default_value = "::")]
    address: String,

    /// 服务器端口 (默认: 8080)
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// 采样周期毫秒数 (默认: 1000)
    #[arg(short, long, default_value_t = 1000)]
    interval_ms: u64,

    /// 数据过期秒数 (默认: 3)
    #[arg(long, default_value_t = 3)]
    stale_ttl: u64,

    /// 进程快照最多保留的行数 (默认: 20)
    #[arg(long, default_value_t = 20)]
    process_lines: usize,

    /// 进程快照命令超时毫秒数 (默认: 2000)
    #[arg(long, default_value_t = 2000)]
    process_timeout_ms: u64,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            bind_address: args.address,
            port: args.port,
            tick_interval: Duration::from_millis(args.interval_ms.max(1)),
            stale_ttl_seconds: args.stale_ttl,
            snapshot: SnapshotConfig {
                max_lines: args.process_lines,
                timeout: Duration::from_millis(args.process_timeout_ms),
                ..SnapshotConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志系统
    init_logger(&args.log_level);

    info!("资源监视器启动中...");

    let config = Config::from(args);
    let addr = config.address()?;

    info!(
        "配置信息 - 地址: {addr}, 采样周期: {:?}, 过期时间: {} 秒, 进程命令: `{}` / `{}`",
        config.tick_interval,
        config.stale_ttl_seconds,
        config.snapshot.command,
        config.snapshot.memory_command
    );

    let cache = create_cache(config.stale_ttl_seconds);
    let ticker = tokio::spawn(run_ticker(
        Monitor::new(),
        cache.clone(),
        config.tick_interval,
    ));

    let server = StatusServer::new(cache, config.snapshot);
    let result = server.run(addr, shutdown_signal()).await;

    ticker.abort();
    info!("服务器正常关闭");

    result
}

/// 等待 Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("无法监听退出信号: {e}");
        std::future::pending::<()>().await;
    }
    info!("收到退出信号，正在关闭");
}

/// 初始化日志系统
fn init_logger(level: &str) {
    match env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .try_init()
    {
        Ok(_) => info!("日志系统初始化成功，级别: {level}"),
        // 已有全局日志器时沿用它
        Err(e) => eprintln!("日志系统初始化失败: {e}，沿用已有设置"),
    }
}
