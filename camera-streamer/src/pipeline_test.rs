use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::StreamFormat;

use crate::config::StreamConfig;
use crate::errors::{CaptureError, ComponentError, MuxError, PipelineError, ProcessError, ServerError};
use crate::pipeline::{Pipeline, PipelineState};
use crate::process::{FakeBehavior, FakeLauncher};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn test_config(directory: &Path) -> StreamConfig {
    let mut config = StreamConfig {
        directory: directory.to_path_buf(),
        ..Default::default()
    };
    config.server.port = 0;
    config.shutdown.server_deadline = Duration::from_secs(1);
    config.shutdown.process_exit_deadline = Duration::from_secs(1);
    config
}

fn camera() -> FakeBehavior {
    FakeBehavior::Produce {
        chunk: b"nal".to_vec(),
        interval: Duration::from_millis(20),
        broken_pipe_code: 141,
    }
}

fn muxer(output: &Path) -> FakeBehavior {
    FakeBehavior::Consume {
        output: Some(output.to_path_buf()),
        exit_code: 0,
    }
}

fn programs(launcher: &FakeLauncher) -> Vec<String> {
    launcher.launches().into_iter().map(|i| i.program).collect()
}

async fn wait_for_file(path: PathBuf) {
    while !path.exists() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn run(
    pipeline: Pipeline,
    interrupt: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), PipelineError> {
    tokio::time::timeout(TEST_TIMEOUT, pipeline.run_until(interrupt))
        .await
        .expect("pipeline should stop")
}

#[tokio::test]
async fn test_missing_capture_executable() {
    let dir = tempfile::tempdir().unwrap();
    // 记下一个空闲端口，确认服务从未监听
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let mut config = test_config(dir.path());
    config.server.port = port;

    let launcher = Arc::new(FakeLauncher::new().with("ffmpeg", muxer(dir.path())));
    let pipeline = Pipeline::new(config, launcher.clone());
    let state = pipeline.state();

    let result = run(pipeline, std::future::pending()).await;

    match result {
        Err(PipelineError::Startup(ComponentError::Capture(CaptureError::StartFailed(
            ProcessError::NotFound { program },
        )))) => assert_eq!(program, "raspivid"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(programs(&launcher), vec!["ffmpeg"]);
    assert_eq!(*state.borrow(), PipelineState::Stopped);
    assert!(tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn test_interrupt_after_segments_written() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(
        FakeLauncher::new()
            .with("raspivid", camera())
            .with("ffmpeg", muxer(dir.path())),
    );
    let pipeline = Pipeline::new(test_config(dir.path()), launcher.clone());
    let state = pipeline.state();

    let segment = dir.path().join("segment0.ts");
    let result = run(pipeline, wait_for_file(segment.clone())).await;

    assert!(result.is_ok(), "{:?}", result);
    assert!(segment.exists());
    assert_eq!(*state.borrow(), PipelineState::Stopped);
}

#[tokio::test]
async fn test_mux_launched_before_capture() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(
        FakeLauncher::new()
            .with("raspivid", camera())
            .with("ffmpeg", muxer(dir.path())),
    );
    let mut config = test_config(dir.path());
    config.format = StreamFormat::Dash;
    let pipeline = Pipeline::new(config, launcher.clone());

    let result = run(pipeline, wait_for_file(dir.path().join("segment0.ts"))).await;

    assert!(result.is_ok());
    assert_eq!(programs(&launcher), vec!["ffmpeg", "raspivid"]);

    let mux = &launcher.launches()[0];
    assert!(mux
        .args
        .last()
        .is_some_and(|arg| arg.ends_with("livestream.mpd")));
}

#[tokio::test]
async fn test_mux_crash_is_terminal_error() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(
        FakeLauncher::new()
            .with("raspivid", camera())
            .with(
                "ffmpeg",
                FakeBehavior::Crash {
                    after_bytes: 3,
                    code: 1,
                },
            ),
    );
    let pipeline = Pipeline::new(test_config(dir.path()), launcher);

    let result = run(pipeline, std::future::pending()).await;

    // 采集进程随后的管道断开退出不影响结果
    match result {
        Err(PipelineError::Runtime(ComponentError::Mux(MuxError::ExitedAbnormally {
            outcome,
        }))) => assert_eq!(outcome.code, Some(1)),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_capture_end_stops_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(
        FakeLauncher::new()
            .with(
                "raspivid",
                FakeBehavior::Exit {
                    after: Duration::from_millis(50),
                    code: 0,
                },
            )
            .with("ffmpeg", muxer(dir.path())),
    );
    let pipeline = Pipeline::new(test_config(dir.path()), launcher);

    let result = run(pipeline, std::future::pending()).await;
    assert!(result.is_ok(), "{:?}", result);
}

#[tokio::test]
async fn test_hung_mux_is_killed() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(
        FakeLauncher::new()
            .with("raspivid", camera())
            .with("ffmpeg", FakeBehavior::Hang),
    );
    let mut config = test_config(dir.path());
    config.shutdown.process_exit_deadline = Duration::from_millis(200);
    let pipeline = Pipeline::new(config, launcher);
    let mut state = pipeline.state();

    let (interrupt_tx, interrupt_rx) = tokio::sync::oneshot::channel::<()>();
    let session = tokio::spawn(pipeline.run_until(async move {
        let _ = interrupt_rx.await;
    }));

    state
        .wait_for(|s| *s == PipelineState::Running)
        .await
        .unwrap();
    interrupt_tx.send(()).unwrap();

    let result = tokio::time::timeout(TEST_TIMEOUT, session)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok(), "{:?}", result);
}

#[tokio::test]
async fn test_invalid_directory_starts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(
        FakeLauncher::new()
            .with("raspivid", camera())
            .with("ffmpeg", muxer(dir.path())),
    );
    let pipeline = Pipeline::new(test_config(&dir.path().join("missing")), launcher.clone());

    let result = run(pipeline, std::future::pending()).await;

    assert!(matches!(
        result,
        Err(PipelineError::Startup(ComponentError::Server(
            ServerError::InvalidDirectory { .. }
        )))
    ));
    assert!(launcher.launches().is_empty());
}

#[tokio::test]
async fn test_missing_mux_executable() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Arc::new(FakeLauncher::new().with("raspivid", camera()));
    let pipeline = Pipeline::new(test_config(dir.path()), launcher.clone());

    let result = run(pipeline, std::future::pending()).await;

    assert!(result.as_ref().is_err_and(|e| e.is_startup()));
    assert!(matches!(
        result.as_ref().map_err(PipelineError::component),
        Err(ComponentError::Mux(MuxError::StartFailed(_)))
    ));
    assert!(launcher.launches().is_empty());
}

#[tokio::test]
async fn test_capture_crash_is_terminal_error() {
    let dir = tempfile::tempdir().unwrap();
    // 封装进程不随 EOF 退出，只能在停机时被杀死，避免与采集进程抢先上报
    let launcher = Arc::new(
        FakeLauncher::new()
            .with(
                "raspivid",
                FakeBehavior::Exit {
                    after: Duration::from_millis(50),
                    code: 2,
                },
            )
            .with("ffmpeg", FakeBehavior::Hang),
    );
    let mut config = test_config(dir.path());
    config.shutdown.process_exit_deadline = Duration::from_millis(200);
    let pipeline = Pipeline::new(config, launcher.clone());
    let state = pipeline.state();

    let result = run(pipeline, std::future::pending()).await;

    // 被杀死的封装进程发生在停机之后，不覆盖采集进程的错误
    match result {
        Err(PipelineError::Runtime(ComponentError::Capture(CaptureError::ExitedAbnormally {
            outcome,
        }))) => assert_eq!(outcome.code, Some(2)),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(programs(&launcher), vec!["ffmpeg", "raspivid"]);
    assert_eq!(*state.borrow(), PipelineState::Stopped);
}

#[tokio::test]
async fn test_server_failure_tears_down_processes() {
    let dir = tempfile::tempdir().unwrap();
    // 端口被占用，服务在运行阶段绑定失败
    let occupied = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let mut config = test_config(dir.path());
    config.server.port = occupied.local_addr().unwrap().port();

    let launcher = Arc::new(
        FakeLauncher::new()
            .with("raspivid", camera())
            .with("ffmpeg", muxer(dir.path())),
    );
    let pipeline = Pipeline::new(config, launcher.clone());
    let state = pipeline.state();

    let result = run(pipeline, std::future::pending()).await;

    assert!(
        matches!(
            result,
            Err(PipelineError::Runtime(ComponentError::Server(ServerError::Serve(_))))
        ),
        "{:?}",
        result
    );
    assert_eq!(programs(&launcher), vec!["ffmpeg", "raspivid"]);
    assert_eq!(*state.borrow(), PipelineState::Stopped);
    drop(occupied);
}
