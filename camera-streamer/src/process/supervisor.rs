use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ExitOutcome, ProcessHandle};
use crate::errors::ProcessError;

enum Slot {
    Unstarted,
    Running(Box<dyn ProcessHandle>),
    Waiting,
    Exited(ExitOutcome),
}

pub(crate) enum WaitError {
    NotStarted,
    AlreadyWaiting,
    Process(ProcessError),
}

/// 单个子进程的生命周期：未启动 → 运行中 → 已退出
pub(crate) struct Supervisor {
    name: &'static str,
    slot: Mutex<Slot>,
    kill: CancellationToken,
}

impl Supervisor {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(Slot::Unstarted),
            kill: CancellationToken::new(),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_unstarted(&self) -> bool {
        matches!(*self.slot(), Slot::Unstarted)
    }

    /// 登记已启动的进程；只能成功一次
    pub(crate) fn install(
        &self,
        handle: Box<dyn ProcessHandle>,
    ) -> Result<(), Box<dyn ProcessHandle>> {
        let mut slot = self.slot();
        if !matches!(*slot, Slot::Unstarted) {
            return Err(handle);
        }
        debug!(pid = ?handle.id(), "{} running", self.name);
        *slot = Slot::Running(handle);
        Ok(())
    }

    pub(crate) async fn wait(&self) -> Result<ExitOutcome, WaitError> {
        let mut handle = {
            let mut slot = self.slot();
            match mem::replace(&mut *slot, Slot::Waiting) {
                Slot::Running(handle) => handle,
                Slot::Exited(outcome) => {
                    *slot = Slot::Exited(outcome);
                    return Ok(outcome);
                }
                Slot::Unstarted => {
                    *slot = Slot::Unstarted;
                    return Err(WaitError::NotStarted);
                }
                Slot::Waiting => return Err(WaitError::AlreadyWaiting),
            }
        };

        let exited = tokio::select! {
            result = handle.wait() => Some(result),
            _ = self.kill.cancelled() => None,
        };

        let result = match exited {
            Some(result) => result,
            None => {
                warn!("Killing {}", self.name);
                if let Err(e) = handle.start_kill() {
                    warn!("Failed to kill {}: {}", self.name, e);
                }
                handle.wait().await
            }
        };

        let outcome = result.as_ref().copied().unwrap_or_else(|_| ExitOutcome::unknown());
        *self.slot() = Slot::Exited(outcome);
        debug!("{} exited with {}", self.name, outcome);

        result.map_err(WaitError::Process)
    }

    /// 强制终止；未启动或已退出时无操作
    pub(crate) fn kill(&self) {
        self.kill.cancel();
    }
}
