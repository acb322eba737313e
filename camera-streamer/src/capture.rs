//! 摄像头采集进程（raspivid）
//!
//! 采集进程把 H.264 码流持续写到 stdout，stdout 作为 [`VideoStream`] 的数据源。

use std::sync::Arc;
use tracing::{debug, info};

use common::VideoOptions;

use crate::errors::{CaptureError, ProcessError};
use crate::process::{
    ExitOutcome, Invocation, LaunchRequest, Pipe, ProcessLauncher, Supervisor, WaitError,
};
use crate::stream::VideoStream;

/// 构建采集命令行
///
/// 输出到 stdout、不限时长、不显示预览、每个 I 帧前内联 SPS/PPS；
/// 宽、高、帧率为 0 时不传，使用 raspivid 自己的默认值。
pub fn build_invocation(program: &str, options: &VideoOptions) -> Invocation {
    let mut invocation = Invocation::new(program);
    invocation.args(["-o", "-", "-t", "0", "-n", "-ih"]);

    if options.width != 0 {
        invocation.arg("-w").arg(options.width.to_string());
    }
    if options.height != 0 {
        invocation.arg("-h").arg(options.height.to_string());
    }
    if options.fps != 0 {
        invocation.arg("-fps").arg(options.fps.to_string());
    }
    if options.horizontal_flip {
        invocation.arg("-hf");
    }
    if options.vertical_flip {
        invocation.arg("-vf");
    }

    invocation
}

pub struct CaptureProcess {
    invocation: Invocation,
    launcher: Arc<dyn ProcessLauncher>,
    stream: VideoStream,
    supervisor: Supervisor,
}

impl CaptureProcess {
    pub fn new(
        options: &VideoOptions,
        program: &str,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        Self {
            invocation: build_invocation(program, options),
            launcher,
            stream: VideoStream::new(),
            supervisor: Supervisor::new("capture"),
        }
    }

    /// 采集输出流；在 [`start`](Self::start) 之前即可取得
    pub fn stream(&self) -> VideoStream {
        self.stream.clone()
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    /// 启动采集进程并把其 stdout 挂到视频流上
    ///
    /// 只校验进程能否启动，不等待其结束。
    pub fn start(&self) -> Result<VideoStream, CaptureError> {
        if !self.supervisor.is_unstarted() {
            return Err(CaptureError::AlreadyStarted);
        }
        if self.stream.is_closed() {
            return Err(CaptureError::Stream(crate::errors::StreamError::Closed));
        }

        let mut handle = self
            .launcher
            .launch(LaunchRequest {
                invocation: self.invocation.clone(),
                stdin: Pipe::Null,
                stdout: Pipe::Piped,
            })
            .map_err(CaptureError::StartFailed)?;

        let Some(stdout) = handle.take_stdout() else {
            let _ = handle.start_kill();
            return Err(CaptureError::StartFailed(ProcessError::MissingPipe {
                program: self.invocation.program.clone(),
                pipe: "stdout",
            }));
        };

        if let Err(e) = self.stream.attach_source(stdout) {
            let _ = handle.start_kill();
            return Err(e.into());
        }

        if let Err(mut handle) = self.supervisor.install(handle) {
            let _ = handle.start_kill();
            return Err(CaptureError::AlreadyStarted);
        }

        debug!(cmd = %self.invocation, "Started capture");
        info!("✓ Camera capture started");
        Ok(self.stream.clone())
    }

    /// 等待采集进程退出，非零退出视为异常
    pub async fn wait(&self) -> Result<ExitOutcome, CaptureError> {
        let outcome = self.supervisor.wait().await.map_err(|e| match e {
            WaitError::NotStarted => CaptureError::NotStarted,
            WaitError::AlreadyWaiting => CaptureError::AlreadyWaiting,
            WaitError::Process(e) => CaptureError::WaitFailed(e),
        })?;

        if outcome.success() {
            Ok(outcome)
        } else {
            Err(CaptureError::ExitedAbnormally { outcome })
        }
    }

    /// 关闭视频流，通过管道断开请求采集进程退出；可重复调用
    pub fn stop(&self) {
        self.stream.close();
    }

    /// 强制终止采集进程
    pub fn kill(&self) {
        self.supervisor.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{FakeBehavior, FakeLauncher};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn options() -> VideoOptions {
        VideoOptions {
            width: 1280,
            height: 720,
            fps: 25,
            horizontal_flip: true,
            vertical_flip: false,
        }
    }

    fn producer() -> FakeBehavior {
        FakeBehavior::Produce {
            chunk: b"nal".to_vec(),
            interval: Duration::from_millis(5),
            broken_pipe_code: 141,
        }
    }

    #[test]
    fn test_invocation_arguments() {
        let invocation = build_invocation("raspivid", &options());

        assert_eq!(invocation.program, "raspivid");
        assert_eq!(invocation.value_of("-o"), Some("-"));
        assert_eq!(invocation.value_of("-t"), Some("0"));
        assert_eq!(invocation.value_of("-w"), Some("1280"));
        assert_eq!(invocation.value_of("-h"), Some("720"));
        assert_eq!(invocation.value_of("-fps"), Some("25"));
        assert!(invocation.has_flag("-hf"));
        assert!(!invocation.has_flag("-vf"));
    }

    #[test]
    fn test_zero_values_are_omitted() {
        let invocation = build_invocation("raspivid", &VideoOptions::default());

        assert!(!invocation.has_flag("-w"));
        assert!(!invocation.has_flag("-h"));
        assert!(!invocation.has_flag("-fps"));
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let launcher = Arc::new(FakeLauncher::new());
        let capture = CaptureProcess::new(&options(), "raspivid", launcher);

        let result = capture.start();
        assert!(matches!(
            result,
            Err(CaptureError::StartFailed(ProcessError::NotFound { .. }))
        ));
        assert!(matches!(capture.wait().await, Err(CaptureError::NotStarted)));
    }

    #[tokio::test]
    async fn test_start_twice() {
        let launcher = Arc::new(FakeLauncher::new().with("raspivid", producer()));
        let capture = CaptureProcess::new(&options(), "raspivid", launcher);

        capture.start().unwrap();
        assert!(matches!(capture.start(), Err(CaptureError::AlreadyStarted)));
        capture.kill();
    }

    #[tokio::test]
    async fn test_stop_breaks_pipe() {
        let launcher = Arc::new(FakeLauncher::new().with("raspivid", producer()));
        let capture = CaptureProcess::new(&options(), "raspivid", launcher);

        let stream = capture.start().unwrap();
        let reader = stream.reader().unwrap();
        let (mut sink, mut sink_peer) = tokio::io::duplex(1024);
        let forward = tokio::spawn(async move { reader.forward(&mut sink).await });

        let mut buf = [0u8; 3];
        sink_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"nal");

        capture.stop();
        capture.stop();
        forward.await.unwrap().unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), capture.wait())
            .await
            .unwrap();
        match result {
            Err(CaptureError::ExitedAbnormally { outcome }) => {
                assert_eq!(outcome.code, Some(141))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_kill_while_waiting() {
        let launcher = Arc::new(FakeLauncher::new().with("raspivid", FakeBehavior::Hang));
        let capture = Arc::new(CaptureProcess::new(&options(), "raspivid", launcher));
        capture.start().unwrap();

        let waiter = {
            let capture = capture.clone();
            tokio::spawn(async move { capture.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        capture.kill();

        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(CaptureError::ExitedAbnormally { .. })));

        // 退出后再次等待返回记录的结果
        assert!(matches!(
            capture.wait().await,
            Err(CaptureError::ExitedAbnormally { .. })
        ));
    }
}
