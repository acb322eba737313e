use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use common::{MuxOptions, StreamFormat, VideoOptions};

use crate::errors::ConfigError;
use crate::server::{ServerConfig, TlsFiles};

/// Streamer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Output directory for manifests and segments, also the HTTP document root
    pub directory: PathBuf,

    /// Segmented output format
    pub format: StreamFormat,

    /// Camera capture settings
    pub video: VideoConfig,

    /// Segmentation settings passed to the muxer
    pub segments: SegmentConfig,

    /// Static file server settings
    pub server: HttpConfig,

    /// External program names
    pub processes: ProcessConfig,

    /// Shutdown deadlines
    pub shutdown: ShutdownConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
}

/// 0 leaves the muxer's own default in place
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Target segment duration in seconds
    pub segment_time: u32,

    /// Maximum number of entries in the playlist
    pub playlist_size: u32,

    /// Unreferenced segments kept on disk before deletion
    pub storage_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Listen port, bound on all interfaces
    pub port: u16,

    /// PEM certificate; HTTPS is served only when both cert and key are set
    pub tls_cert: Option<PathBuf>,

    /// PEM private key
    pub tls_key: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub capture_program: String,
    pub mux_program: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time allowed for in-flight HTTP requests to finish
    #[serde(with = "crate::serde_helpers::duration_ms")]
    pub server_deadline: Duration,

    /// Time allowed for each child process to exit before it is killed
    #[serde(with = "crate::serde_helpers::duration_ms")]
    pub process_exit_deadline: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            horizontal_flip: false,
            vertical_flip: false,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            capture_program: "raspivid".to_string(),
            mux_program: "ffmpeg".to_string(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            server_deadline: Duration::from_secs(10),
            process_exit_deadline: Duration::from_secs(5),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl StreamConfig {
    pub fn video_options(&self) -> VideoOptions {
        VideoOptions {
            width: self.video.width,
            height: self.video.height,
            fps: self.video.fps,
            horizontal_flip: self.video.horizontal_flip,
            vertical_flip: self.video.vertical_flip,
        }
    }

    pub fn mux_options(&self) -> MuxOptions {
        MuxOptions {
            directory: self.directory.clone(),
            fps: self.video.fps,
            segment_time: self.segments.segment_time,
            playlist_size: self.segments.playlist_size,
            storage_size: self.segments.storage_size,
        }
    }

    /// 证书和私钥都配置时返回两者，否则使用 HTTP
    pub fn tls_paths(&self) -> Option<TlsFiles> {
        match (&self.server.tls_cert, &self.server.tls_key) {
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert: cert.clone(),
                key: key.clone(),
            }),
            _ => None,
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            port: self.server.port,
            directory: self.directory.clone(),
            tls: self.tls_paths(),
        }
    }
}

/// Configuration manager for loading and validating configurations
pub struct ConfigManager {
    config_path: Option<PathBuf>,
    config: StreamConfig,
}

impl ConfigManager {
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self {
            config_path,
            config: StreamConfig::default(),
        }
    }

    /// Load configuration from file; without a path the defaults are kept
    pub async fn load(&mut self) -> Result<(), ConfigError> {
        let Some(path) = &self.config_path else {
            return Ok(());
        };

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Read {
                path: path.clone(),
                source: e,
            })?;

        self.config = toml::from_str(&content)?;
        Ok(())
    }

    pub fn get_config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn get_config_mut(&mut self) -> &mut StreamConfig {
        &mut self.config
    }

    pub fn into_config(self) -> StreamConfig {
        self.config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.config.directory.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                message: "Output directory must be set".to_string(),
            });
        }

        if self.config.shutdown.server_deadline.is_zero() {
            return Err(ConfigError::Invalid {
                message: "Server shutdown deadline must be greater than 0".to_string(),
            });
        }
        if self.config.shutdown.process_exit_deadline.is_zero() {
            return Err(ConfigError::Invalid {
                message: "Process exit deadline must be greater than 0".to_string(),
            });
        }

        if self.config.processes.capture_program.is_empty()
            || self.config.processes.mux_program.is_empty()
        {
            return Err(ConfigError::Invalid {
                message: "Capture and mux program names cannot be empty".to_string(),
            });
        }

        let server = &self.config.server;
        if server.tls_cert.is_some() != server.tls_key.is_some() {
            warn!("⚠️  Only one of TLS certificate/key is set, serving plain HTTP");
        }

        Ok(())
    }
}

/// Environment-based configuration override
pub struct EnvConfigOverride;

impl EnvConfigOverride {
    /// Apply environment variable overrides to configuration, reading each key through `lookup`
    pub fn apply_overrides_from<F>(config: &mut StreamConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(directory) = lookup("CAMERA_STREAMER_DIRECTORY") {
            config.directory = PathBuf::from(directory);
        }
        if let Some(format) = lookup("CAMERA_STREAMER_FORMAT") {
            match format.parse::<StreamFormat>() {
                Ok(format) => config.format = format,
                Err(e) => warn!("Ignoring CAMERA_STREAMER_FORMAT: {}", e),
            }
        }

        // Server overrides
        if let Some(port) = lookup("CAMERA_STREAMER_PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.server.port = port,
                Err(_) => warn!("Ignoring invalid CAMERA_STREAMER_PORT: {}", port),
            }
        }
        if let Some(cert) = lookup("CAMERA_STREAMER_TLS_CERT") {
            config.server.tls_cert = Some(PathBuf::from(cert));
        }
        if let Some(key) = lookup("CAMERA_STREAMER_TLS_KEY") {
            config.server.tls_key = Some(PathBuf::from(key));
        }

        // Process overrides
        if let Some(program) = lookup("CAMERA_STREAMER_CAPTURE_PROGRAM") {
            config.processes.capture_program = program;
        }
        if let Some(program) = lookup("CAMERA_STREAMER_MUX_PROGRAM") {
            config.processes.mux_program = program;
        }

        // Logging overrides
        if let Some(level) = lookup("CAMERA_STREAMER_LOG_LEVEL") {
            config.logging.level = level;
        }
    }
}
