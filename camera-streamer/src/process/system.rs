use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::warn;

use super::{
    BoxedReader, BoxedWriter, ExitOutcome, LaunchRequest, Pipe, ProcessHandle, ProcessLauncher,
};
use crate::errors::ProcessError;

/// 通过 tokio 启动真实的操作系统进程
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl Pipe {
    fn stdio(self) -> Stdio {
        match self {
            Pipe::Null => Stdio::null(),
            Pipe::Piped => Stdio::piped(),
        }
    }
}

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, request: LaunchRequest) -> Result<Box<dyn ProcessHandle>, ProcessError> {
        let program = request.invocation.program.clone();

        let mut command = Command::new(&program);
        command
            .args(&request.invocation.args)
            .stdin(request.stdin.stdio())
            .stdout(request.stdout.stdio())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ProcessError::NotFound {
                    program: program.clone(),
                }
            } else {
                ProcessError::LaunchFailed {
                    program: program.clone(),
                    source: e,
                }
            }
        })?;

        // 转发子进程的错误输出
        if let Some(stderr) = child.stderr.take() {
            let program = program.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = line.trim();
                    if !line.is_empty() {
                        warn!("{} stderr: {}", program, line);
                    }
                }
            });
        }

        Ok(Box::new(SystemProcess { program, child }))
    }
}

struct SystemProcess {
    program: String,
    child: Child,
}

#[async_trait]
impl ProcessHandle for SystemProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_stdin(&mut self) -> Option<BoxedWriter> {
        self.child
            .stdin
            .take()
            .map(|stdin| Box::new(stdin) as BoxedWriter)
    }

    fn take_stdout(&mut self) -> Option<BoxedReader> {
        self.child
            .stdout
            .take()
            .map(|stdout| Box::new(stdout) as BoxedReader)
    }

    async fn wait(&mut self) -> Result<ExitOutcome, ProcessError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| ProcessError::WaitFailed {
                program: self.program.clone(),
                source: e,
            })?;
        Ok(status.into())
    }

    fn start_kill(&mut self) -> Result<(), ProcessError> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            // 进程已经退出
            Err(e) if e.kind() == ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(ProcessError::WaitFailed {
                program: self.program.clone(),
                source: e,
            }),
        }
    }
}
