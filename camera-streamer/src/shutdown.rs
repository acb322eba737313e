use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::debug;

/// 触发停机的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    ServerStopped,
    MuxExited,
    CaptureExited,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => write!(f, "interrupt received"),
            ShutdownReason::ServerStopped => write!(f, "HTTP server stopped"),
            ShutdownReason::MuxExited => write!(f, "muxer exited"),
            ShutdownReason::CaptureExited => write!(f, "capture exited"),
        }
    }
}

/// 单次触发的停机信号，多个观察任务共享
pub struct ShutdownSignal {
    sender: Mutex<Option<oneshot::Sender<ShutdownReason>>>,
    triggered: AtomicBool,
}

/// 停机信号的唯一接收端
pub struct ShutdownListener {
    receiver: oneshot::Receiver<ShutdownReason>,
}

pub fn shutdown_channel() -> (Arc<ShutdownSignal>, ShutdownListener) {
    let (tx, rx) = oneshot::channel();
    let signal = ShutdownSignal {
        sender: Mutex::new(Some(tx)),
        triggered: AtomicBool::new(false),
    };
    (Arc::new(signal), ShutdownListener { receiver: rx })
}

impl ShutdownSignal {
    /// 触发停机。只有第一次调用生效并返回 `true`
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match sender {
            Some(tx) => {
                self.triggered.store(true, Ordering::SeqCst);
                debug!("Shutdown triggered: {}", reason);
                // 接收端已丢弃时无需投递
                let _ = tx.send(reason);
                true
            }
            None => false,
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

impl ShutdownListener {
    /// 等待第一次触发；信号被丢弃且从未触发时返回 `None`
    pub async fn wait(self) -> Option<ShutdownReason> {
        self.receiver.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_trigger_wins() {
        let (signal, listener) = shutdown_channel();

        assert!(!signal.is_triggered());
        assert!(signal.trigger(ShutdownReason::MuxExited));
        assert!(!signal.trigger(ShutdownReason::Interrupt));
        assert!(signal.is_triggered());

        assert_eq!(listener.wait().await, Some(ShutdownReason::MuxExited));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_triggers_deliver_once() {
        let (signal, listener) = shutdown_channel();
        let reasons = [
            ShutdownReason::Interrupt,
            ShutdownReason::ServerStopped,
            ShutdownReason::MuxExited,
            ShutdownReason::CaptureExited,
        ];

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let signal = signal.clone();
                let reason = reasons[i % reasons.len()];
                tokio::spawn(async move { signal.trigger(reason) })
            })
            .collect();

        let mut fired = 0;
        for task in tasks {
            if task.await.unwrap() {
                fired += 1;
            }
        }

        assert_eq!(fired, 1);
        assert!(listener.wait().await.is_some());
    }

    #[tokio::test]
    async fn test_dropped_signal_without_trigger() {
        let (signal, listener) = shutdown_channel();
        drop(signal);

        assert_eq!(listener.wait().await, None);
    }
}
