use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures_util::Stream;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use futures_util::task::AtomicWaker;
use tracing::{debug, warn};

use crate::types::StreamChunk;
use crate::types::wire::StreamRecord;
use crate::{ConductorError, Result};

pub type LineStream = BoxStream<'static, Result<String>>;
pub type ChunkStream = BoxStream<'static, Result<StreamChunk>>;

/// Closes a [`ClosableStream`] from outside the task polling it.
///
/// Closing drops the wrapped stream, which releases the underlying
/// connection; a pending poll is woken and observes end of stream.
#[derive(Debug, Clone)]
pub struct StreamCloseHandle {
    closed: Arc<AtomicBool>,
    waker: Arc<AtomicWaker>,
}

impl StreamCloseHandle {
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.waker.wake();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct ClosableStream<T> {
    pub handle: StreamCloseHandle,
    pub stream: BoxStream<'static, T>,
}

pub fn closable_stream<T>(stream: BoxStream<'static, T>) -> ClosableStream<T>
where
    T: Send + 'static,
{
    let closed = Arc::new(AtomicBool::new(false));
    let waker = Arc::new(AtomicWaker::new());
    let handle = StreamCloseHandle {
        closed: closed.clone(),
        waker: waker.clone(),
    };

    let mut inner = Some(stream);
    let stream = stream::poll_fn(move |cx: &mut Context<'_>| {
        waker.register(cx.waker());

        if closed.load(Ordering::SeqCst) {
            inner.take();
            return Poll::Ready(None);
        }

        let Some(stream) = inner.as_mut() else {
            return Poll::Ready(None);
        };
        match Pin::new(stream).poll_next(cx) {
            Poll::Ready(None) => {
                inner.take();
                Poll::Ready(None)
            }
            other => other,
        }
    })
    .boxed();

    ClosableStream { handle, stream }
}

/// Turns newline-delimited `/api/generate` records into text chunks.
///
/// Blank records and records without a non-empty `response` are skipped. The
/// sequence ends at end of data, when `cancelled` is observed before a record
/// is processed, or after yielding the first read/parse error. The line
/// stream is dropped exactly once whichever way it ends.
pub fn parse_generate_stream(lines: LineStream, cancelled: Arc<AtomicBool>) -> ChunkStream {
    Box::pin(stream::try_unfold(
        (lines, cancelled),
        |(mut lines, cancelled)| async move {
            loop {
                if cancelled.load(Ordering::SeqCst) {
                    debug!("stream parser observed cancellation");
                    return Ok(None);
                }
                let Some(line) = lines.next().await else {
                    return Ok(None);
                };
                let line = line?;
                if cancelled.load(Ordering::SeqCst) {
                    debug!("stream parser observed cancellation");
                    return Ok(None);
                }
                if line.trim().is_empty() {
                    continue;
                }

                let record: StreamRecord = serde_json::from_str(&line).map_err(|err| {
                    ConductorError::InvalidResponse(format!("malformed stream record: {err}"))
                })?;
                if record.done {
                    debug!("stream reported done");
                }
                match record.response.filter(|text| !text.is_empty()) {
                    Some(text) => {
                        return Ok(Some((StreamChunk { text }, (lines, cancelled))));
                    }
                    None => {
                        if let Some(error) = record.error {
                            warn!(%error, "stream record carried an error without a response");
                        }
                    }
                }
            }
        },
    ))
}
