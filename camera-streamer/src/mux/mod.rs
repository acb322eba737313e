//! ffmpeg 封装进程：从 stdin 读取 H.264 码流，在输出目录写出清单和分片
//!
//! 分片淘汰由 ffmpeg 自己完成，这里只负责把播放列表长度和保留数量原样传过去。

pub mod dash;
pub mod hls;

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use common::{MuxOptions, StreamFormat};

use crate::errors::{MuxError, ProcessError};
use crate::process::{
    ExitOutcome, Invocation, LaunchRequest, Pipe, ProcessLauncher, Supervisor, WaitError,
};
use crate::stream::VideoStream;

/// 构建 ffmpeg 命令行
///
/// 数值为 0 的选项不传，由 ffmpeg 使用内置默认值。
pub fn build_invocation(program: &str, format: StreamFormat, options: &MuxOptions) -> Invocation {
    let mut invocation = Invocation::new(program);
    invocation.args(["-hide_banner", "-loglevel", "warning"]);

    // 输入：stdin 上的原始 H.264；DASH 按原始帧率读取
    if format == StreamFormat::Dash {
        invocation.arg("-re");
    }
    invocation.args(["-f", "h264"]);
    if options.fps != 0 {
        invocation.arg("-r").arg(options.fps.to_string());
    }
    invocation.args(["-i", "pipe:0"]);

    // 输出：不转码，丢弃音频
    invocation.args(["-codec", "copy", "-an"]);
    match format {
        StreamFormat::Hls => hls::output_args(&mut invocation, options),
        StreamFormat::Dash => dash::output_args(&mut invocation, options),
    }

    invocation.arg(
        options
            .directory
            .join(format.manifest_name())
            .to_string_lossy()
            .into_owned(),
    );
    invocation
}

pub struct MuxProcess {
    format: StreamFormat,
    invocation: Invocation,
    launcher: Arc<dyn ProcessLauncher>,
    supervisor: Supervisor,
    forward_failure: Arc<Mutex<Option<io::Error>>>,
}

impl MuxProcess {
    pub fn new(
        format: StreamFormat,
        options: &MuxOptions,
        program: &str,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        Self {
            format,
            invocation: build_invocation(program, format, options),
            launcher,
            supervisor: Supervisor::new("muxer"),
            forward_failure: Arc::default(),
        }
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    /// 启动封装进程，并在后台把 `input` 的数据转发到其 stdin
    ///
    /// 可以在采集进程启动之前调用：转发任务会等数据源挂上后才开始读取。
    pub fn mux(&self, input: &VideoStream) -> Result<(), MuxError> {
        if !self.supervisor.is_unstarted() {
            return Err(MuxError::AlreadyStarted);
        }

        let reader = input.reader()?;

        let mut handle = self
            .launcher
            .launch(LaunchRequest {
                invocation: self.invocation.clone(),
                stdin: Pipe::Piped,
                stdout: Pipe::Null,
            })
            .map_err(MuxError::StartFailed)?;

        let Some(mut stdin) = handle.take_stdin() else {
            let _ = handle.start_kill();
            return Err(MuxError::StartFailed(ProcessError::MissingPipe {
                program: self.invocation.program.clone(),
                pipe: "stdin",
            }));
        };

        if let Err(mut handle) = self.supervisor.install(handle) {
            let _ = handle.start_kill();
            return Err(MuxError::AlreadyStarted);
        }

        let failure = self.forward_failure.clone();
        tokio::spawn(async move {
            match reader.forward(&mut stdin).await {
                Ok(bytes) => debug!(bytes, "Video stream forwarding finished"),
                Err(e) => {
                    warn!("Video stream forwarding stopped: {}", e);
                    *failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                }
            }
            // 记录结果之后再关闭 stdin，封装进程随后读到 EOF
            drop(stdin);
        });

        debug!(cmd = %self.invocation, "Started ffmpeg muxer");
        info!("✓ {} muxer started", self.format);
        Ok(())
    }

    /// 等待封装进程退出
    ///
    /// 非零退出视为异常；正常退出但转发曾经出错（例如读取采集输出失败）时返回转发错误。
    pub async fn wait(&self) -> Result<ExitOutcome, MuxError> {
        let outcome = self.supervisor.wait().await.map_err(|e| match e {
            WaitError::NotStarted => MuxError::NotStarted,
            WaitError::AlreadyWaiting => MuxError::AlreadyWaiting,
            WaitError::Process(e) => MuxError::WaitFailed(e),
        })?;

        if !outcome.success() {
            return Err(MuxError::ExitedAbnormally { outcome });
        }

        let failure = self
            .forward_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match failure {
            Some(e) => Err(MuxError::Forward(e)),
            None => Ok(outcome),
        }
    }

    /// 强制终止封装进程
    pub fn kill(&self) {
        self.supervisor.kill();
    }
}
