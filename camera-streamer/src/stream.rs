use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::StreamError;
use crate::process::BoxedReader;

const FORWARD_BUFFER_SIZE: usize = 64 * 1024; // 64KB缓冲区

/// 采集进程输出到封装进程输入之间的视频字节流
///
/// 在采集进程启动之前创建。采集进程启动时挂上数据源（其 stdout），
/// 封装进程通过 [`VideoStream::reader`] 取得唯一的读端。
/// [`VideoStream::close`] 是通知下游"采集结束"的唯一方式：
/// 停止转发后封装进程的 stdin 会被关闭，采集进程的 stdout 被丢弃。
#[derive(Clone)]
pub struct VideoStream {
    inner: Arc<Inner>,
}

struct Inner {
    source_tx: Mutex<Option<oneshot::Sender<BoxedReader>>>,
    source_rx: Mutex<Option<oneshot::Receiver<BoxedReader>>>,
    closed: CancellationToken,
}

impl Default for VideoStream {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoStream {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            inner: Arc::new(Inner {
                source_tx: Mutex::new(Some(tx)),
                source_rx: Mutex::new(Some(rx)),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// 挂上数据源，只能成功一次
    pub(crate) fn attach_source(&self, source: BoxedReader) -> Result<(), StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        let tx = self
            .inner
            .source_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(StreamError::SourceAlreadyAttached)?;
        // 读端已被丢弃时数据源随之丢弃
        let _ = tx.send(source);
        Ok(())
    }

    /// 取得唯一的读端
    pub fn reader(&self) -> Result<StreamReader, StreamError> {
        if self.is_closed() {
            return Err(StreamError::Closed);
        }
        let source = self
            .inner
            .source_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(StreamError::ReaderAlreadyAttached)?;
        Ok(StreamReader {
            source,
            closed: self.inner.closed.clone(),
        })
    }

    /// 关闭流，可重复调用
    pub fn close(&self) {
        if !self.inner.closed.is_cancelled() {
            debug!("Closing video stream");
            self.inner.closed.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }
}

/// 视频流的读端
pub struct StreamReader {
    source: oneshot::Receiver<BoxedReader>,
    closed: CancellationToken,
}

impl StreamReader {
    /// 等待数据源挂上后把数据转发到 `sink`，直到数据源 EOF 或流被关闭。
    ///
    /// 返回转发的字节数。返回前刷新 `sink`；调用方丢弃 `sink` 即关闭写端，
    /// 因此可以在下游看到 EOF 之前先处理转发结果。
    pub async fn forward<W>(self, sink: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let closed = self.closed;
        let source = tokio::select! {
            _ = closed.cancelled() => None,
            source = self.source => source.ok(),
        };

        let result = match source {
            Some(mut source) => copy_until_closed(&mut source, sink, &closed).await,
            None => Ok(0),
        };

        let _ = sink.flush().await;
        result
    }
}

async fn copy_until_closed<R, W>(
    source: &mut R,
    sink: &mut W,
    closed: &CancellationToken,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buffer = vec![0u8; FORWARD_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            _ = closed.cancelled() => break,
            read = source.read(&mut buffer) => read?,
        };
        if n == 0 {
            debug!("Video source ended (EOF)");
            break;
        }
        tokio::select! {
            _ = closed.cancelled() => break,
            written = sink.write_all(&buffer[..n]) => written?,
        }
        total += n as u64;
    }

    Ok(total)
}
