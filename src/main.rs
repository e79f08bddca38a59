//! B站视频数据监控 - 服务入口
//!
//! 功能:
//! - 使用 WBI 签名抓取视频详情和UP主信息
//! - 限制并发的批量刷新
//! - 提供HTTP接口管理被跟踪的视频
//! - 可选的定时刷新和外部播放量预测

use bili_monitor::batch::DEFAULT_MAX_CONCURRENCY;
use bili_monitor::client::{ClientConfig, PlatformClient};
use bili_monitor::crawler;
use bili_monitor::prediction::PredictionClient;
use bili_monitor::server::{self, AppContext};
use bili_monitor::state::SharedState;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// B站视频数据监控服务
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// 监听地址
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// 监听端口
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// 定时刷新间隔(秒)，0 表示关闭
    #[arg(long, default_value_t = 0)]
    interval: u64,

    /// 批量抓取并发数，保持较低以免触发风控
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENCY)]
    max_concurrency: usize,

    /// B站登录 Cookie
    #[arg(long, env = "BILI_COOKIE")]
    cookie: Option<String>,

    /// 播放量预测服务地址
    #[arg(long, env = "VIEWSIGHT_SERVER_URL")]
    prediction_url: Option<String>,

    /// 启动时抓取并跟踪的视频 BV 号
    #[arg(long = "video")]
    videos: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let args = Args::parse();

    info!(
        "[bili] Starting Bilibili monitor on {}:{}",
        args.host, args.port
    );

    let client = Arc::new(PlatformClient::new(ClientConfig::default())?);
    if let Some(cookie) = args.cookie.as_deref() {
        client.set_credential_cookie(cookie);
        info!("[bili] Using credential cookie from configuration");
    }

    let predictor = match args.prediction_url.as_deref() {
        Some(url) => {
            let predictor = PredictionClient::new(url)?;
            info!("[bili] Prediction service: {}", predictor.server_url());
            Some(predictor)
        }
        None => {
            warn!("[bili] No prediction service configured");
            None
        }
    };

    // 创建共享状态
    let state = Arc::new(SharedState::new());
    let ctx = Arc::new(AppContext::new(
        Arc::clone(&state),
        client,
        predictor,
        args.max_concurrency,
    ));

    if !args.videos.is_empty() {
        let initial_ctx = Arc::clone(&ctx);
        let videos = args.videos.clone();
        tokio::spawn(async move {
            if let Some(updated) = server::refresh_batch(&initial_ctx, &videos).await {
                info!("[bili] Initial fetch tracked {}/{} videos", updated.len(), videos.len());
            }
        });
    }

    // 启动定时刷新任务
    let crawler_handle = if args.interval > 0 {
        let crawler_ctx = Arc::clone(&ctx);
        let interval = args.interval;
        Some(tokio::spawn(async move {
            crawler::run_polling_task(crawler_ctx, interval).await;
        }))
    } else {
        info!("[bili] Scheduled refresh disabled");
        None
    };

    // 启动HTTP服务器
    let server_ctx = Arc::clone(&ctx);
    let _server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(server_ctx, &args.host, args.port).await {
            tracing::error!("[bili] Server error: {}", e);
        }
    });

    // 等待 Ctrl+C 信号
    signal::ctrl_c().await?;
    info!("[bili] Received shutdown signal, stopping...");

    // 设置停止标志
    state.set_stop(true);

    if let Some(handle) = crawler_handle {
        tokio::select! {
            _ = handle => {
                info!("[bili] Refresh task stopped");
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {
                info!("[bili] Timeout waiting for refresh task");
            }
        }
    }

    info!("[bili] Shutdown complete");
    Ok(())
}
