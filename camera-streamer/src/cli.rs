use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

use common::StreamFormat;

use crate::config::{ConfigManager, EnvConfigOverride, StreamConfig};
use crate::errors::ConfigError;

/// 命令行定义
///
/// 不设置默认值：未给出的参数不覆盖配置文件和环境变量。
pub fn build_cli() -> Command {
    Command::new("camera-streamer")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Video Streaming Team")
        .about("Streams a camera as HLS or DASH and serves the segments over HTTP(S)")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("directory")
                .short('d')
                .long("directory")
                .value_name("DIRECTORY")
                .help("Output directory for manifests and segments, served over HTTP")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .help("Streaming format: hls or dash")
                .value_parser(["hls", "dash"]),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .value_name("PIXELS")
                .help("Capture width")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .value_name("PIXELS")
                .help("Capture height")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("fps")
                .long("fps")
                .value_name("FPS")
                .help("Capture frame rate")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("horizontal-flip")
                .long("horizontal-flip")
                .help("Flip the image horizontally")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("vertical-flip")
                .long("vertical-flip")
                .help("Flip the image vertically")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("playlist-size")
                .long("playlist-size")
                .value_name("COUNT")
                .help("Maximum number of segments in the playlist")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("storage-size")
                .long("storage-size")
                .value_name("COUNT")
                .help("Unreferenced segments kept on disk before deletion")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("segment-time")
                .long("segment-time")
                .value_name("SECONDS")
                .help("Target segment duration")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("HTTP(S) listen port")
                .value_parser(value_parser!(u16)),
        )
        .arg(
            Arg::new("tls-cert")
                .long("tls-cert")
                .value_name("FILE")
                .help("PEM certificate, enables HTTPS together with --tls-key")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("tls-key")
                .long("tls-key")
                .value_name("FILE")
                .help("PEM private key")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
}

/// 用命令行参数覆盖配置
pub fn apply_matches(config: &mut StreamConfig, matches: &ArgMatches) -> Result<(), ConfigError> {
    if let Some(directory) = matches.get_one::<PathBuf>("directory") {
        config.directory = directory.clone();
    }
    if let Some(format) = matches.get_one::<String>("format") {
        config.format = format.parse::<StreamFormat>()?;
    }

    // 采集参数
    if let Some(&width) = matches.get_one::<u32>("width") {
        config.video.width = width;
    }
    if let Some(&height) = matches.get_one::<u32>("height") {
        config.video.height = height;
    }
    if let Some(&fps) = matches.get_one::<u32>("fps") {
        config.video.fps = fps;
    }
    if matches.get_flag("horizontal-flip") {
        config.video.horizontal_flip = true;
    }
    if matches.get_flag("vertical-flip") {
        config.video.vertical_flip = true;
    }

    // 切片参数
    if let Some(&size) = matches.get_one::<u32>("playlist-size") {
        config.segments.playlist_size = size;
    }
    if let Some(&size) = matches.get_one::<u32>("storage-size") {
        config.segments.storage_size = size;
    }
    if let Some(&seconds) = matches.get_one::<u32>("segment-time") {
        config.segments.segment_time = seconds;
    }

    // 服务参数
    if let Some(&port) = matches.get_one::<u16>("port") {
        config.server.port = port;
    }
    if let Some(cert) = matches.get_one::<PathBuf>("tls-cert") {
        config.server.tls_cert = Some(cert.clone());
    }
    if let Some(key) = matches.get_one::<PathBuf>("tls-key") {
        config.server.tls_key = Some(key.clone());
    }

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    Ok(())
}

/// 按 默认值 → 配置文件 → 环境变量 → 命令行 的顺序加载并校验配置
pub async fn load_config(matches: &ArgMatches) -> Result<StreamConfig, ConfigError> {
    load_config_with(matches, |key| std::env::var(key).ok()).await
}

/// 同 [`load_config`]，环境变量通过 `lookup` 读取
pub async fn load_config_with<F>(matches: &ArgMatches, lookup: F) -> Result<StreamConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut manager = ConfigManager::new(matches.get_one::<PathBuf>("config").cloned());
    manager.load().await?;

    EnvConfigOverride::apply_overrides_from(manager.get_config_mut(), lookup);
    apply_matches(manager.get_config_mut(), matches)?;

    manager.validate()?;
    Ok(manager.into_config())
}
