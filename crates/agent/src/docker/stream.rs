use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use futures_util::Stream;
use crate::docker::client::DockerError;

// Cooperative yielding budget: prevents executor starvation on containers with
// very chatty logs. Set high because a single line's work (clone + bump a
// counter) is cheap; a low budget causes tight yield/reschedule loops.
const POLL_BUDGET: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Stdout = 0,
    Stderr = 1,
}

pub struct LogStreamRequest {
    pub container_id: String,
    pub since: Option<i64>,     // Unix timestamp (time-travel start)
    pub until: Option<i64>,     // Unix timestamp (time-travel end)
    pub follow: bool,           // tail -f mode
    pub tail_lines: Option<u32>, // Like "docker logs --tail 100"
}

pub struct LogStreamResponse {
    pub container_id: Arc<str>,  // Zero-copy reference
    pub timestamp: i64,          // Unix nanoseconds for precision
    pub log_level: LogLevel,     // Stdout or Stderr
    pub content: bytes::Bytes,   // Using Bytes (not Vec<u8>)
    pub sequence: u64,           // Ensures ordering, detects gaps
}

pub struct LogLine {
    pub timestamp: i64,
    pub stream_type: LogLevel,
    pub content: bytes::Bytes,
}

pub struct LogStream {
    pub container_id: Arc<str>,
    pub inner_stream: Pin<Box<dyn Stream<Item = Result<LogLine, DockerError>> + Send>>,
    pub sequence_counter: AtomicU64,
}

impl LogStream {
    pub fn new(
        container_id: String,
        inner_stream: impl Stream<Item = Result<LogLine, DockerError>> + Send + 'static,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            inner_stream: Box::pin(inner_stream),
            sequence_counter: AtomicU64::new(0),
        }
    }
}

impl Stream for LogStream {
    type Item = Result<LogStreamResponse, DockerError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut budget = POLL_BUDGET;

        loop {
            if budget == 0 {
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            budget -= 1;

            let this = self.as_mut().get_mut();

            match this.inner_stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => {
                    let seq = this.sequence_counter.fetch_add(1, Ordering::Relaxed);
                    return Poll::Ready(Some(Ok(LogStreamResponse {
                        container_id: Arc::clone(&this.container_id),
                        timestamp: line.timestamp,
                        log_level: line.stream_type,
                        content: line.content,
                        sequence: seq,
                    })));
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
