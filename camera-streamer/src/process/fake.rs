use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    BoxedReader, BoxedWriter, ExitOutcome, Invocation, LaunchRequest, Pipe, ProcessHandle,
    ProcessLauncher,
};
use crate::errors::ProcessError;

const PIPE_CAPACITY: usize = 64 * 1024;
const SIGKILL: i32 = 9;

/// 假进程的行为脚本
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// 可执行文件不存在
    Missing,
    /// 每隔 `interval` 向 stdout 写入 `chunk`，管道断开时以 `broken_pipe_code` 退出
    Produce {
        chunk: Vec<u8>,
        interval: Duration,
        broken_pipe_code: i32,
    },
    /// 读取 stdin 直到 EOF 后以 `exit_code` 退出；
    /// 设置 `output` 时把收到的数据追加到 `output/segment0.ts`
    Consume {
        output: Option<PathBuf>,
        exit_code: i32,
    },
    /// 读取至少 `after_bytes` 字节后以 `code` 退出
    Crash { after_bytes: usize, code: i32 },
    /// 延迟后退出
    Exit { after: Duration, code: i32 },
    /// 不读不写，直到被杀死
    Hang,
}

/// 按程序名返回脚本化假进程的启动器
#[derive(Default)]
pub struct FakeLauncher {
    behaviors: Mutex<HashMap<String, FakeBehavior>>,
    launches: Mutex<Vec<Invocation>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, program: impl Into<String>, behavior: FakeBehavior) -> Self {
        self.behaviors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(program.into(), behavior);
        self
    }

    /// 按启动顺序记录的调用（不含启动失败的）
    pub fn launches(&self) -> Vec<Invocation> {
        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn launched(&self, program: &str) -> bool {
        self.launches().iter().any(|i| i.program == program)
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, request: LaunchRequest) -> Result<Box<dyn ProcessHandle>, ProcessError> {
        let program = request.invocation.program.clone();
        let behavior = self
            .behaviors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&program)
            .cloned()
            .unwrap_or(FakeBehavior::Missing);

        if let FakeBehavior::Missing = behavior {
            return Err(ProcessError::NotFound { program });
        }

        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.invocation.clone());

        let (stdin, child_stdin) = split(request.stdin);
        let (stdout, child_stdout) = split(request.stdout);
        let kill = CancellationToken::new();

        let task = tokio::spawn(run(behavior, child_stdin, child_stdout, kill.clone()));

        Ok(Box::new(FakeProcess {
            program,
            stdin: stdin.map(|s| Box::new(s) as BoxedWriter),
            stdout: stdout.map(|s| Box::new(s) as BoxedReader),
            task,
            kill,
            outcome: None,
        }))
    }
}

fn split(pipe: Pipe) -> (Option<DuplexStream>, Option<DuplexStream>) {
    match pipe {
        Pipe::Null => (None, None),
        Pipe::Piped => {
            let (parent, child) = tokio::io::duplex(PIPE_CAPACITY);
            (Some(parent), Some(child))
        }
    }
}

async fn run(
    behavior: FakeBehavior,
    stdin: Option<DuplexStream>,
    stdout: Option<DuplexStream>,
    kill: CancellationToken,
) -> ExitOutcome {
    let killed = ExitOutcome::signal(SIGKILL);

    match behavior {
        FakeBehavior::Missing => ExitOutcome::code(127),
        FakeBehavior::Produce {
            chunk,
            interval,
            broken_pipe_code,
        } => {
            let Some(mut stdout) = stdout else {
                return ExitOutcome::code(broken_pipe_code);
            };
            loop {
                tokio::select! {
                    _ = kill.cancelled() => return killed,
                    _ = tokio::time::sleep(interval) => {}
                }
                let written = tokio::select! {
                    _ = kill.cancelled() => return killed,
                    written = stdout.write_all(&chunk) => written,
                };
                if written.is_err() {
                    return ExitOutcome::code(broken_pipe_code);
                }
            }
        }
        FakeBehavior::Consume { output, exit_code } => {
            let Some(mut stdin) = stdin else {
                return ExitOutcome::code(exit_code);
            };
            let mut buf = vec![0u8; 4096];
            loop {
                let read = tokio::select! {
                    _ = kill.cancelled() => return killed,
                    read = stdin.read(&mut buf) => read,
                };
                match read {
                    Ok(0) => return ExitOutcome::code(exit_code),
                    Ok(n) => {
                        if let Some(dir) = &output {
                            if append_segment(dir, &buf[..n]).await.is_err() {
                                return ExitOutcome::code(1);
                            }
                        }
                    }
                    Err(_) => return ExitOutcome::code(1),
                }
            }
        }
        FakeBehavior::Crash { after_bytes, code } => {
            let Some(mut stdin) = stdin else {
                return ExitOutcome::code(code);
            };
            let mut buf = vec![0u8; 4096];
            let mut total = 0;
            while total < after_bytes {
                let read = tokio::select! {
                    _ = kill.cancelled() => return killed,
                    read = stdin.read(&mut buf) => read,
                };
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => total += n,
                }
            }
            ExitOutcome::code(code)
        }
        FakeBehavior::Exit { after, code } => {
            tokio::select! {
                _ = kill.cancelled() => killed,
                _ = tokio::time::sleep(after) => ExitOutcome::code(code),
            }
        }
        FakeBehavior::Hang => {
            // 保持管道打开直到被杀死
            let _pipes = (stdin, stdout);
            kill.cancelled().await;
            killed
        }
    }
}

async fn append_segment(dir: &std::path::Path, data: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("segment0.ts"))
        .await?;
    file.write_all(data).await?;
    file.flush().await
}

struct FakeProcess {
    program: String,
    stdin: Option<BoxedWriter>,
    stdout: Option<BoxedReader>,
    task: JoinHandle<ExitOutcome>,
    kill: CancellationToken,
    outcome: Option<ExitOutcome>,
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn take_stdin(&mut self) -> Option<BoxedWriter> {
        self.stdin.take()
    }

    fn take_stdout(&mut self) -> Option<BoxedReader> {
        self.stdout.take()
    }

    async fn wait(&mut self) -> Result<ExitOutcome, ProcessError> {
        if let Some(outcome) = self.outcome {
            return Ok(outcome);
        }
        let outcome = (&mut self.task)
            .await
            .map_err(|e| ProcessError::WaitFailed {
                program: self.program.clone(),
                source: io::Error::new(io::ErrorKind::Other, e),
            })?;
        self.outcome = Some(outcome);
        Ok(outcome)
    }

    fn start_kill(&mut self) -> Result<(), ProcessError> {
        self.kill.cancel();
        Ok(())
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.kill.cancel();
    }
}
