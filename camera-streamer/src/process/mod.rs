//! 外部进程启动抽象
//!
//! 采集与封装进程都通过 [`ProcessLauncher`] 启动，运行时使用
//! [`SystemLauncher`]，测试中替换为 [`FakeLauncher`]。

mod fake;
mod supervisor;
mod system;

pub use fake::{FakeBehavior, FakeLauncher};
pub(crate) use supervisor::{Supervisor, WaitError};
pub use system::SystemLauncher;

use async_trait::async_trait;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::errors::ProcessError;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// 程序名与参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// 查找参数 `flag` 之后的值
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipe {
    Null,
    Piped,
}

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub invocation: Invocation,
    pub stdin: Pipe,
    pub stdout: Pipe,
}

/// 进程退出状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
    /// 终止进程的信号（仅 unix）
    pub signal: Option<i32>,
}

impl ExitOutcome {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "terminated by signal {}", signal),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// 进程启动器
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, request: LaunchRequest) -> Result<Box<dyn ProcessHandle>, ProcessError>;
}

/// 已启动的进程
#[async_trait]
pub trait ProcessHandle: Send {
    fn id(&self) -> Option<u32>;

    fn take_stdin(&mut self) -> Option<BoxedWriter>;

    fn take_stdout(&mut self) -> Option<BoxedReader>;

    /// 等待进程退出
    async fn wait(&mut self) -> Result<ExitOutcome, ProcessError>;

    /// 请求强制终止，不等待退出
    fn start_kill(&mut self) -> Result<(), ProcessError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_display() {
        let mut invocation = Invocation::new("ffmpeg");
        invocation.args(["-f", "hls"]).arg("out.m3u8");

        assert_eq!(invocation.to_string(), "ffmpeg -f hls out.m3u8");
        assert_eq!(invocation.value_of("-f"), Some("hls"));
        assert!(invocation.has_flag("out.m3u8"));
        assert_eq!(invocation.value_of("out.m3u8"), None);
    }

    #[test]
    fn test_exit_outcome() {
        assert!(ExitOutcome::code(0).success());
        assert!(!ExitOutcome::code(1).success());
        assert!(!ExitOutcome::signal(9).success());
        assert_eq!(ExitOutcome::code(141).to_string(), "exit code 141");
        assert_eq!(ExitOutcome::signal(9).to_string(), "terminated by signal 9");
    }
}
