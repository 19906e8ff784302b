//! Two-stage transfer pipeline: a producer writing a send stream and a
//! consumer applying it, joined by an in-process pipe.
//!
//! Both stages run concurrently inside the calling task, the same way
//! `zfs send | zfs recv` runs in a shell. Bytes flowing between them are
//! counted and optionally reported to a progress callback.

use crate::transfer::progress_stream::{ProgressCallback, ProgressStream};
use crate::utils::errors::{CommandError, TransferError};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::io::{ReaderStream, StreamReader};

/// Buffer between the two stages
const PIPE_CAPACITY: usize = 256 * 1024;

/// Writes a stream. Dropping `out` signals end of stream to the consumer.
pub trait StreamProducer: Sized {
    fn produce<W>(self, out: W) -> impl Future<Output = Result<u64, CommandError>>
    where
        W: AsyncWrite + Unpin;
}

/// Reads a stream to completion and applies it.
pub trait StreamConsumer: Sized {
    fn consume<R>(self, input: R) -> impl Future<Output = Result<(), CommandError>>
    where
        R: AsyncRead + Unpin;
}

/// Run `producer | consumer`. Returns the number of bytes that reached the
/// consumer. Fails if either stage fails.
pub async fn run<P, C>(
    producer: P,
    consumer: C,
    progress: Option<ProgressCallback>,
) -> Result<u64, TransferError>
where
    P: StreamProducer,
    C: StreamConsumer,
{
    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);

    let transferred = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&transferred);
    let callback: ProgressCallback = Arc::new(move |bytes: u64| {
        counter.store(bytes, Ordering::Relaxed);
        if let Some(progress) = &progress {
            progress(bytes);
        }
    });

    let input = StreamReader::new(ProgressStream::new(ReaderStream::new(reader), callback));

    let (sent, received) = tokio::join!(producer.produce(writer), consumer.consume(input));

    match (sent, received) {
        (Ok(_), Ok(())) => Ok(transferred.load(Ordering::Relaxed)),
        (Err(producer), Ok(())) => Err(TransferError::Producer(producer)),
        (Ok(_), Err(consumer)) => Err(TransferError::Consumer(consumer)),
        (Err(producer), Err(consumer)) => Err(TransferError::Both { producer, consumer }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct FakeProducer {
        chunks: Vec<Vec<u8>>,
        fail_after: Option<usize>,
    }

    impl StreamProducer for FakeProducer {
        async fn produce<W>(self, mut out: W) -> Result<u64, CommandError>
        where
            W: AsyncWrite + Unpin,
        {
            let mut written = 0u64;
            for (i, chunk) in self.chunks.iter().enumerate() {
                if self.fail_after == Some(i) {
                    return Err(CommandError::Other {
                        command: "fake send".into(),
                        reason: "source went away".into(),
                    });
                }
                out.write_all(chunk).await.map_err(|e| CommandError::Other {
                    command: "fake send".into(),
                    reason: e.to_string(),
                })?;
                written += chunk.len() as u64;
            }
            out.shutdown().await.ok();
            Ok(written)
        }
    }

    struct FakeConsumer {
        sink: Arc<Mutex<Vec<u8>>>,
        reject: bool,
    }

    impl StreamConsumer for FakeConsumer {
        async fn consume<R>(self, mut input: R) -> Result<(), CommandError>
        where
            R: AsyncRead + Unpin,
        {
            if self.reject {
                return Err(CommandError::Other {
                    command: "fake recv".into(),
                    reason: "destination busy".into(),
                });
            }
            let mut buf = Vec::new();
            input
                .read_to_end(&mut buf)
                .await
                .map_err(|e| CommandError::Other {
                    command: "fake recv".into(),
                    reason: e.to_string(),
                })?;
            self.sink.lock().unwrap().extend_from_slice(&buf);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pipeline_moves_all_bytes() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let producer = FakeProducer {
            chunks: vec![b"hello ".to_vec(), b"world".to_vec()],
            fail_after: None,
        };
        let consumer = FakeConsumer {
            sink: Arc::clone(&sink),
            reject: false,
        };

        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = Arc::clone(&seen);
        let progress: ProgressCallback = Arc::new(move |b| seen_clone.store(b, Ordering::Relaxed));

        let bytes = run(producer, consumer, Some(progress)).await.unwrap();
        assert_eq!(bytes, 11);
        assert_eq!(seen.load(Ordering::Relaxed), 11);
        assert_eq!(sink.lock().unwrap().as_slice(), b"hello world");
    }

    #[tokio::test]
    async fn test_pipeline_large_stream_exceeds_buffer() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let chunk = vec![7u8; 100 * 1024];
        let producer = FakeProducer {
            chunks: vec![chunk.clone(); 10],
            fail_after: None,
        };
        let consumer = FakeConsumer {
            sink: Arc::clone(&sink),
            reject: false,
        };

        let bytes = run(producer, consumer, None).await.unwrap();
        assert_eq!(bytes, 10 * 100 * 1024);
        assert_eq!(sink.lock().unwrap().len(), 10 * 100 * 1024);
    }

    #[tokio::test]
    async fn test_producer_failure_is_reported() {
        let producer = FakeProducer {
            chunks: vec![b"a".to_vec(), b"b".to_vec()],
            fail_after: Some(1),
        };
        let consumer = FakeConsumer {
            sink: Arc::new(Mutex::new(Vec::new())),
            reject: false,
        };

        let result = run(producer, consumer, None).await;
        assert!(matches!(result, Err(TransferError::Producer(_))));
    }

    #[tokio::test]
    async fn test_consumer_failure_does_not_hang_producer() {
        let producer = FakeProducer {
            chunks: vec![vec![1u8; 512 * 1024]; 4],
            fail_after: None,
        };
        let consumer = FakeConsumer {
            sink: Arc::new(Mutex::new(Vec::new())),
            reject: true,
        };

        let result = run(producer, consumer, None).await;
        assert!(matches!(result, Err(TransferError::Both { .. })));
    }
}
