//! Bundle content as a whole value or a single-consumption byte stream.
//!
//! Large bundles are read from the cache as streams and must never be
//! buffered whole unless a compressor asks for it. A stream has exactly one
//! consumer; handing one payload to several consumers goes through [`tee`].

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// A single-consumption sequence of byte chunks.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

pub enum Contents {
    /// Fully materialized value; cheap to clone.
    Blob(Bytes),
    /// Sequential source, consumed at most once.
    Stream(ByteStream),
}

impl Contents {
    pub fn is_stream(&self) -> bool {
        matches!(self, Contents::Stream(_))
    }

    /// Sequential view. Blobs become a one-chunk stream.
    pub fn into_stream(self) -> ByteStream {
        match self {
            Contents::Blob(bytes) if bytes.is_empty() => stream::empty().boxed(),
            Contents::Blob(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            Contents::Stream(stream) => stream,
        }
    }

    /// Whole-value view. Streams are collected.
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        match self {
            Contents::Blob(bytes) => Ok(bytes),
            Contents::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }

    /// Count bytes into `counter` as they are consumed.
    pub fn measured(self, counter: &ByteCounter) -> Contents {
        match self {
            Contents::Blob(bytes) => {
                counter.add(bytes.len());
                Contents::Blob(bytes)
            }
            Contents::Stream(stream) => {
                let counter = counter.clone();
                Contents::Stream(
                    stream
                        .inspect(move |chunk| {
                            if let Ok(chunk) = chunk {
                                counter.add(chunk.len());
                            }
                        })
                        .boxed(),
                )
            }
        }
    }

    /// Consume and discard the content, surfacing read errors.
    pub async fn drain(self) -> io::Result<()> {
        if let Contents::Stream(mut stream) = self {
            while let Some(chunk) = stream.next().await {
                chunk?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Contents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Contents::Blob(bytes) => f.debug_tuple("Blob").field(&bytes.len()).finish(),
            Contents::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for Contents {
    fn from(bytes: Bytes) -> Self {
        Contents::Blob(bytes)
    }
}

impl From<Vec<u8>> for Contents {
    fn from(bytes: Vec<u8>) -> Self {
        Contents::Blob(Bytes::from(bytes))
    }
}

impl From<ByteStream> for Contents {
    fn from(stream: ByteStream) -> Self {
        Contents::Stream(stream)
    }
}

impl From<&'static str> for Contents {
    fn from(s: &'static str) -> Self {
        Contents::Blob(Bytes::from_static(s.as_bytes()))
    }
}

/// Serve a blob as a stream of `chunk_size` slices without copying.
pub fn chunked(bytes: Bytes, chunk_size: usize) -> ByteStream {
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<io::Result<Bytes>> = (0..bytes.len())
        .step_by(chunk_size)
        .map(|start| Ok(bytes.slice(start..(start + chunk_size).min(bytes.len()))))
        .collect();
    stream::iter(chunks).boxed()
}

/// Shared byte total, updated while content flows.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn add(&self, n: usize) {
        self.0.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Remembers the first error a source stream produced.
///
/// Consumers see the error too, but only as a failure of their own branch.
/// The guard lets the owner report it as the read failure it is.
#[derive(Debug, Clone, Default)]
pub struct SourceGuard(Arc<Mutex<Option<io::Error>>>);

impl SourceGuard {
    pub fn watch(&self, contents: Contents) -> Contents {
        match contents {
            Contents::Stream(stream) => {
                let slot = self.0.clone();
                Contents::Stream(
                    stream
                        .inspect(move |chunk| {
                            if let Err(e) = chunk {
                                let mut slot = slot.lock();
                                if slot.is_none() {
                                    *slot = Some(io::Error::new(e.kind(), e.to_string()));
                                }
                            }
                        })
                        .boxed(),
                )
            }
            blob => blob,
        }
    }

    pub fn take(&self) -> Option<io::Error> {
        self.0.lock().take()
    }
}

/// Duplicate a stream into `consumers` independent copies.
///
/// Each copy is backed by a bounded channel of `capacity` chunks, so memory
/// is bounded by the slowest consumer. The returned pump must be polled
/// alongside the consumers. A consumer that drops its copy is skipped from
/// then on; the pump keeps reading the source to the end regardless. A
/// source error is forwarded to every copy still open.
pub fn tee(
    source: ByteStream,
    consumers: usize,
    capacity: usize,
) -> (impl Future<Output = ()> + Send + 'static, Vec<ByteStream>) {
    let (senders, copies): (Vec<_>, Vec<_>) = (0..consumers)
        .map(|_| {
            let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(capacity.max(1));
            (Some(tx), ReceiverStream::new(rx).boxed())
        })
        .unzip();

    (pump(source, senders), copies)
}

async fn pump(mut source: ByteStream, mut senders: Vec<Option<mpsc::Sender<io::Result<Bytes>>>>) {
    let mut chunks = 0usize;
    while let Some(item) = source.next().await {
        match item {
            Ok(chunk) => {
                chunks += 1;
                for slot in senders.iter_mut() {
                    let Some(tx) = slot else { continue };
                    if tx.send(Ok(chunk.clone())).await.is_err() {
                        *slot = None;
                    }
                }
            }
            Err(e) => {
                for tx in senders.iter().flatten() {
                    let _ = tx.send(Err(io::Error::new(e.kind(), e.to_string()))).await;
                }
                tracing::trace!(chunks, error = %e, "tee source failed");
                return;
            }
        }
    }
    tracing::trace!(chunks, "tee source exhausted");
}
