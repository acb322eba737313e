//! 推流会话编排
//!
//! 启动顺序：校验输出目录 → 启动封装进程并挂上视频流 → 启动采集进程 → 启动 HTTP 服务。
//! 运行期间服务、封装、采集和中断四个观察任务中任意一个结束都会触发唯一一次停机：
//! 关闭视频流，限时关闭 HTTP 服务，限时等待两个子进程退出（超时则杀死）。

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::capture::CaptureProcess;
use crate::config::StreamConfig;
use crate::errors::{ComponentError, PipelineError};
use crate::mux::MuxProcess;
use crate::process::ProcessLauncher;
use crate::server::StaticServer;
use crate::shutdown::{shutdown_channel, ShutdownReason, ShutdownSignal};
use crate::signal;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

/// 停机前记录的第一个错误
#[derive(Default)]
struct FailureLog {
    first: Mutex<Option<ComponentError>>,
}

impl FailureLog {
    fn record(&self, error: ComponentError) {
        let mut first = self.first.lock().unwrap_or_else(PoisonError::into_inner);
        if first.is_none() {
            *first = Some(error);
        } else {
            warn!("Additional failure before shutdown: {}", error);
        }
    }

    fn take(&self) -> Option<ComponentError> {
        self.first
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// 组件结束时调用：停机开始前的错误记为候选终止错误，之后的只告警
fn report(
    signal: &ShutdownSignal,
    failures: &FailureLog,
    reason: ShutdownReason,
    result: Result<(), ComponentError>,
) {
    match result {
        Ok(()) => info!("{}", reason),
        Err(e) if signal.is_triggered() => warn!("{} during shutdown: {}", reason, e),
        Err(e) => {
            error!("❌ {}", e);
            failures.record(e);
        }
    }
    signal.trigger(reason);
}

/// 等待观察任务结束，超过 `deadline` 后调用 `kill` 再等待
async fn join_bounded<F>(name: &str, mut task: JoinHandle<()>, deadline: Duration, kill: F)
where
    F: FnOnce(),
{
    let joined = match tokio::time::timeout(deadline, &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            warn!("{} did not exit within {:?}, killing it", name, deadline);
            kill();
            task.await
        }
    };

    if let Err(e) = joined {
        error!("{} watcher failed: {}", name, e);
    }
}

/// 一次推流会话，运行结束后不可复用
pub struct Pipeline {
    config: StreamConfig,
    launcher: Arc<dyn ProcessLauncher>,
    state: watch::Sender<PipelineState>,
}

impl Pipeline {
    pub fn new(config: StreamConfig, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            config,
            launcher,
            state,
        }
    }

    /// 订阅状态变化
    pub fn state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: PipelineState) {
        debug!("Pipeline state: {:?}", state);
        self.state.send_replace(state);
    }

    /// 运行直到收到 Ctrl+C / SIGTERM 或任一组件结束
    pub async fn run(self) -> Result<(), PipelineError> {
        self.run_until(signal::interrupted()).await
    }

    /// 运行直到 `interrupt` 完成或任一组件结束
    pub async fn run_until<F>(self, interrupt: F) -> Result<(), PipelineError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = info_span!("session", id = %Uuid::new_v4());
        let result = self.run_session(interrupt).instrument(span).await;
        self.set_state(PipelineState::Stopped);
        result
    }

    async fn run_session<F>(&self, interrupt: F) -> Result<(), PipelineError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.set_state(PipelineState::Starting);

        let config = &self.config;
        let deadlines = &config.shutdown;

        let capture = Arc::new(CaptureProcess::new(
            &config.video_options(),
            &config.processes.capture_program,
            self.launcher.clone(),
        ));
        let mux = Arc::new(MuxProcess::new(
            config.format,
            &config.mux_options(),
            &config.processes.mux_program,
            self.launcher.clone(),
        ));
        let server = Arc::new(StaticServer::new(config.server_config()));

        if let Err(e) = server.validate_directory() {
            error!("❌ {}", e);
            return Err(PipelineError::Startup(e.into()));
        }

        // 先启动封装进程，采集输出从第一个字节起就有人读取
        if let Err(e) = mux.mux(&capture.stream()) {
            error!("❌ {}", e);
            return Err(PipelineError::Startup(e.into()));
        }

        if let Err(e) = capture.start() {
            error!("❌ {}", e);
            // 封装进程已启动：关闭视频流让它读到 EOF 后退出
            capture.stop();
            let reaper = {
                let mux = mux.clone();
                tokio::spawn(
                    async move {
                        if let Err(e) = mux.wait().await {
                            warn!("Muxer exit after failed startup: {}", e);
                        }
                    }
                    .in_current_span(),
                )
            };
            join_bounded("muxer", reaper, deadlines.process_exit_deadline, || mux.kill())
                .await;
            return Err(PipelineError::Startup(e.into()));
        }

        let (shutdown, listener) = shutdown_channel();
        let failures = Arc::new(FailureLog::default());

        let server_watcher = {
            let (server, shutdown, failures) = (server.clone(), shutdown.clone(), failures.clone());
            tokio::spawn(
                async move {
                    let result = server.listen_and_serve().await.map_err(ComponentError::from);
                    report(&shutdown, &failures, ShutdownReason::ServerStopped, result);
                }
                .in_current_span(),
            )
        };

        let mux_watcher = {
            let (mux, shutdown, failures) = (mux.clone(), shutdown.clone(), failures.clone());
            tokio::spawn(
                async move {
                    let result = mux.wait().await.map(|_| ()).map_err(ComponentError::from);
                    report(&shutdown, &failures, ShutdownReason::MuxExited, result);
                }
                .in_current_span(),
            )
        };

        let capture_watcher = {
            let (capture, shutdown, failures) =
                (capture.clone(), shutdown.clone(), failures.clone());
            tokio::spawn(
                async move {
                    let result = capture.wait().await.map(|_| ()).map_err(ComponentError::from);
                    report(&shutdown, &failures, ShutdownReason::CaptureExited, result);
                }
                .in_current_span(),
            )
        };

        let interrupt_watcher = {
            let shutdown = shutdown.clone();
            tokio::spawn(
                async move {
                    interrupt.await;
                    info!("🛑 Interrupt received");
                    shutdown.trigger(ShutdownReason::Interrupt);
                }
                .in_current_span(),
            )
        };
        drop(shutdown);

        self.set_state(PipelineState::Running);
        info!("✅ Streaming {} to {:?}", config.format, config.directory);

        match listener.wait().await {
            Some(reason) => info!("Shutting down: {}", reason),
            None => warn!("Shutting down: all watchers stopped"),
        }
        self.set_state(PipelineState::ShuttingDown);
        interrupt_watcher.abort();

        // 关闭视频流：封装进程读到 EOF，采集进程写入管道断开
        capture.stop();

        if let Err(e) = server.shutdown(deadlines.server_deadline).await {
            warn!("HTTP server shutdown incomplete: {}", e);
        }

        join_bounded("muxer", mux_watcher, deadlines.process_exit_deadline, || {
            mux.kill()
        })
        .await;
        join_bounded("capture", capture_watcher, deadlines.process_exit_deadline, || {
            capture.kill()
        })
        .await;

        let mut server_watcher = server_watcher;
        if tokio::time::timeout(deadlines.server_deadline, &mut server_watcher)
            .await
            .is_err()
        {
            warn!("HTTP server did not stop within {:?}", deadlines.server_deadline);
            server_watcher.abort();
        }

        match failures.take() {
            Some(e) => {
                error!("Streaming stopped with error: {}", e);
                Err(PipelineError::Runtime(e))
            }
            None => {
                info!("✓ Streaming stopped");
                Ok(())
            }
        }
    }
}
