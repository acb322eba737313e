use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use camera_streamer::cli;
use camera_streamer::pipeline::Pipeline;
use camera_streamer::process::SystemLauncher;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli::build_cli().get_matches();
    let config = cli::load_config(&matches).await?;

    // 初始化日志 - 环境变量 RUST_LOG 优先，否则使用配置的级别
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_target(false)
        .init();

    info!("🎥 Camera streamer starting...");
    info!("  Format: {}", config.format);
    info!("  Output: {:?}", config.directory);
    info!(
        "  Video: {}x{} @ {} fps",
        config.video.width, config.video.height, config.video.fps
    );

    let pipeline = Pipeline::new(config, Arc::new(SystemLauncher));
    if let Err(e) = pipeline.run().await {
        error!("Camera streamer failed: {}", e);
        std::process::exit(1);
    }

    info!("👋 Camera streamer stopped");
    Ok(())
}
