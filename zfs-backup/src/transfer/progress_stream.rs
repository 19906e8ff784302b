//! Byte-counting stream wrapper sitting between the send and receive stages.

use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::time::{Duration, Instant};

/// Callback receiving the running byte total
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Four updates per second
const DEFAULT_INTERVAL: Duration = Duration::from_millis(250);

/// Passes chunks through unchanged, reporting the byte total at most once
/// per interval and always once at end of stream.
pub struct ProgressStream<S> {
    inner: S,
    bytes_transferred: u64,
    last_update: Instant,
    update_interval: Duration,
    callback: ProgressCallback,
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, callback: ProgressCallback) -> Self {
        Self::with_interval(inner, callback, DEFAULT_INTERVAL)
    }

    pub fn with_interval(inner: S, callback: ProgressCallback, update_interval: Duration) -> Self {
        Self {
            inner,
            bytes_transferred: 0,
            last_update: Instant::now(),
            update_interval,
            callback,
        }
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }
}

impl<S, E> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.bytes_transferred += chunk.len() as u64;

                let now = Instant::now();
                if now.duration_since(self.last_update) >= self.update_interval {
                    (self.callback)(self.bytes_transferred);
                    self.last_update = now;
                }

                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                (self.callback)(self.bytes_transferred);
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{stream, StreamExt};
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_reports_final_total() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let updates_clone = Arc::clone(&updates);
        let callback: ProgressCallback = Arc::new(move |b| updates_clone.lock().unwrap().push(b));

        let chunks = vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"defg")),
        ];
        let mut progress = ProgressStream::new(stream::iter(chunks), callback);

        let mut collected = Vec::new();
        while let Some(chunk) = progress.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(collected, b"abcdefg");
        assert_eq!(progress.bytes_transferred(), 7);
        assert_eq!(updates.lock().unwrap().last(), Some(&7));
    }

    #[tokio::test]
    async fn test_zero_interval_reports_every_chunk() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let updates_clone = Arc::clone(&updates);
        let callback: ProgressCallback = Arc::new(move |b| updates_clone.lock().unwrap().push(b));

        let chunks = vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
        ];
        let progress = ProgressStream::with_interval(stream::iter(chunks), callback, Duration::ZERO);
        let _: Vec<_> = progress.collect().await;

        assert_eq!(*updates.lock().unwrap(), vec![2, 4, 4]);
    }
}
