use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::process::ExitOutcome;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Executable not found: {program}")]
    NotFound { program: String },

    #[error("Failed to launch {program}: {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to wait for {program}: {source}")]
    WaitFailed {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} has no piped {pipe}")]
    MissingPipe { program: String, pipe: &'static str },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StreamError {
    #[error("Video stream already has a reader attached")]
    ReaderAlreadyAttached,

    #[error("Video stream already has a source attached")]
    SourceAlreadyAttached,

    #[error("Video stream is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to start capture: {0}")]
    StartFailed(#[source] ProcessError),

    #[error("Capture already started")]
    AlreadyStarted,

    #[error("Capture not started")]
    NotStarted,

    #[error("Capture is already being waited on")]
    AlreadyWaiting,

    #[error("Capture stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Capture exited abnormally: {outcome}")]
    ExitedAbnormally { outcome: ExitOutcome },

    #[error("Capture wait failed: {0}")]
    WaitFailed(#[source] ProcessError),
}

#[derive(Error, Debug)]
pub enum MuxError {
    #[error("Failed to start muxer: {0}")]
    StartFailed(#[source] ProcessError),

    #[error("Muxer already started")]
    AlreadyStarted,

    #[error("Muxer not started")]
    NotStarted,

    #[error("Muxer is already being waited on")]
    AlreadyWaiting,

    #[error("Muxer stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Muxer exited abnormally: {outcome}")]
    ExitedAbnormally { outcome: ExitOutcome },

    #[error("Forwarding video to muxer failed: {0}")]
    Forward(#[source] io::Error),

    #[error("Muxer wait failed: {0}")]
    WaitFailed(#[source] ProcessError),
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Directory does not exist: {path}")]
    InvalidDirectory { path: PathBuf },

    #[error("Failed to load TLS certificate/key: {source}")]
    Tls {
        #[source]
        source: io::Error,
    },

    #[error("Failed to serve: {0}")]
    Serve(#[from] io::Error),

    #[error("{open_connections} connection(s) still open after {deadline:?}")]
    DrainTimeout {
        deadline: Duration,
        open_connections: usize,
    },
}

/// 单个组件的错误
#[derive(Error, Debug)]
pub enum ComponentError {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Mux error: {0}")]
    Mux(#[from] MuxError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// 推流会话的最终错误
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Startup failed: {0}")]
    Startup(#[source] ComponentError),

    #[error("Runtime failure: {0}")]
    Runtime(#[source] ComponentError),
}

impl PipelineError {
    pub fn component(&self) -> &ComponentError {
        match self {
            PipelineError::Startup(e) | PipelineError::Runtime(e) => e,
        }
    }

    pub fn is_startup(&self) -> bool {
        matches!(self, PipelineError::Startup(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid option: {0}")]
    Options(#[from] common::OptionsError),

    #[error("Configuration error: {message}")]
    Invalid { message: String },
}
