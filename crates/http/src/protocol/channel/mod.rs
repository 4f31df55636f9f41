//! Chunked, closeable byte channels used for request and response bodies.
//!
//! A [`StreamChannel`] decouples the timing of a body producer from its consumer without
//! buffering more than one chunk ahead. The read side is pull based: every
//! [`StreamChannel::read`] asks the underlying [`ChunkReader`] for exactly one chunk. The
//! write side is push based: [`StreamChannel::write`] hands one chunk to the underlying
//! [`ChunkWriter`] and resolves once the transport accepted it.
//!
//! # Close semantics
//!
//! Closing is the only cancellation primitive of a channel:
//!
//! - [`StreamChannel::close`] stops accepting writes, flushes the writes already queued,
//!   shuts the writer down and then transitions to [`ChannelState::Closed`]
//! - [`StreamChannel::abort`] transitions to [`ChannelState::Closed`] immediately; a write
//!   that is still in flight completes silently
//!
//! Both are idempotent. On the transition the teardown hook runs, the reader and writer are
//! dropped (releasing sockets and other transport resources), any outstanding read resolves
//! to end-of-stream and every close listener fires exactly once.

mod source;

pub use source::{BodyReader, ChunkReader, ChunkWriter, Collected, IoWriter, PipeSender, StreamReader, Teardown, io_reader};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use futures::Stream;
use futures::channel::mpsc;
use http_body::Body;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::protocol::{BoxError, ChannelError};
use source::{CollectWriter, pipe_reader};

type CloseListener = Box<dyn FnOnce() + Send>;

/// Lifecycle of a [`StreamChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    /// `close` was called and queued writes are being flushed; new writes are rejected.
    Closing,
    Closed,
}

/// The pieces a transport collaborator hands to a channel.
#[derive(Default)]
pub struct ChannelParts {
    pub reader: Option<Box<dyn ChunkReader>>,
    pub writer: Option<Box<dyn ChunkWriter>>,
    pub teardown: Option<Teardown>,
}

impl fmt::Debug for ChannelParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelParts")
            .field("reader", &self.reader.is_some())
            .field("writer", &self.writer.is_some())
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

/// A single-producer, single-consumer chunked byte channel.
///
/// Cloning a channel yields another handle to the same channel, which is how a
/// [`close`](StreamChannel::close) issued by one owner reaches a read pending in another.
#[derive(Clone)]
pub struct StreamChannel {
    shared: Arc<Shared>,
}

struct Shared {
    reader: tokio::sync::Mutex<Option<Box<dyn ChunkReader>>>,
    writer: tokio::sync::Mutex<Option<Box<dyn ChunkWriter>>>,
    writable: bool,
    teardown: Mutex<Option<Teardown>>,
    state: Mutex<ChannelState>,
    listeners: Mutex<Vec<CloseListener>>,
    closed_tx: watch::Sender<bool>,
    reading: AtomicBool,
    eof: AtomicBool,
    written: AtomicU64,
}

impl StreamChannel {
    pub fn new(parts: ChannelParts) -> Self {
        let (closed_tx, _) = watch::channel(false);
        let writable = parts.writer.is_some();
        Self {
            shared: Arc::new(Shared {
                reader: tokio::sync::Mutex::new(parts.reader),
                writer: tokio::sync::Mutex::new(parts.writer),
                writable,
                teardown: Mutex::new(parts.teardown),
                state: Mutex::new(ChannelState::Open),
                listeners: Mutex::new(Vec::new()),
                closed_tx,
                reading: AtomicBool::new(false),
                eof: AtomicBool::new(false),
                written: AtomicU64::new(0),
            }),
        }
    }

    pub fn builder() -> StreamChannelBuilder {
        StreamChannelBuilder::new()
    }

    /// A channel with nothing to read and nowhere to write.
    pub fn empty() -> Self {
        Self::new(ChannelParts::default())
    }

    /// A read-only channel yielding `bytes` as a single chunk.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Self::empty();
        }
        Self::from_stream(futures::stream::iter([Ok::<_, ChannelError>(bytes)]))
    }

    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::builder().reader(StreamReader::new(stream)).build()
    }

    pub fn from_body<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: Into<BoxError>,
    {
        Self::builder().reader(BodyReader::new(body)).build()
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::builder().reader(io_reader(reader)).build()
    }

    pub fn from_writer<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::builder().writer(IoWriter::new(writer)).build()
    }

    /// Splits a duplex transport (a `TcpStream`, say) into a request channel reading from it
    /// and a response channel writing to it. The transport is released once both are closed.
    pub fn from_io<T>(io: T) -> (Self, Self)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        (Self::from_reader(read_half), Self::from_writer(write_half))
    }

    /// A write-only channel keeping every chunk in memory.
    pub fn collector() -> (Self, Collected) {
        let collected = Collected::default();
        let channel = Self::builder().writer(CollectWriter::new(collected.clone())).build();
        (channel, collected)
    }

    /// A read-only channel fed by a [`PipeSender`]; at most `capacity` chunks are buffered.
    pub fn pipe(capacity: usize) -> (PipeSender, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        (PipeSender::new(sender), Self::builder().reader(pipe_reader(receiver)).build())
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ChannelState::Closed
    }

    pub fn is_writable(&self) -> bool {
        self.shared.writable
    }

    /// Total number of bytes acknowledged by the writer.
    pub fn bytes_written(&self) -> u64 {
        self.shared.written.load(Ordering::Acquire)
    }

    /// Reads the next chunk, or `None` once the source is exhausted or the channel closed.
    ///
    /// Only one read may be outstanding at a time, a second concurrent call fails with
    /// [`ChannelError::OverlappingRead`].
    pub async fn read(&self) -> Result<Option<Bytes>, ChannelError> {
        let shared = &self.shared;
        if shared.eof.load(Ordering::Acquire) || self.is_closed() {
            return Ok(None);
        }

        if shared.reading.swap(true, Ordering::AcqRel) {
            return Err(ChannelError::OverlappingRead);
        }
        let _reading = ReadingGuard(&shared.reading);

        let mut closed = shared.closed_tx.subscribe();
        let mut reader = shared.reader.lock().await;
        let Some(source) = reader.as_mut() else {
            return Ok(None);
        };

        let result = tokio::select! {
            biased;
            () = wait_closed(&mut closed) => Ok(None),
            chunk = source.read_chunk() => chunk,
        };

        match &result {
            Ok(Some(chunk)) => trace!(len = chunk.len(), "read chunk from channel"),
            Ok(None) => {
                shared.eof.store(true, Ordering::Release);
            }
            Err(e) => debug!(cause = %e, "channel read failed"),
        }

        if self.is_closed() {
            reader.take();
            return Ok(None);
        }
        result
    }

    /// Hands `chunk` to the writer and resolves once it was accepted (flushed) by the
    /// transport. Text is encoded as UTF-8 by the `Into<Bytes>` conversion.
    pub async fn write(&self, chunk: impl Into<Bytes>) -> Result<(), ChannelError> {
        let chunk = chunk.into();
        let shared = &self.shared;
        if !shared.writable {
            return Err(ChannelError::NotWritable);
        }
        if !self.is_open() {
            return Err(ChannelError::write_after_close(chunk.len()));
        }

        let mut closed = shared.closed_tx.subscribe();
        let mut writer = shared.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            // aborted while this write was queued
            return Ok(());
        };

        let len = chunk.len() as u64;
        let result = tokio::select! {
            biased;
            () = wait_closed(&mut closed) => None,
            result = sink.write_chunk(chunk) => Some(result),
        };

        match result {
            None => {
                writer.take();
                Ok(())
            }
            Some(Ok(())) => {
                shared.written.fetch_add(len, Ordering::AcqRel);
                trace!(len, "chunk flushed");
                Ok(())
            }
            Some(Err(e)) if !self.is_open() => {
                warn!(cause = %e, "write failed while channel was closing, dropped");
                Ok(())
            }
            Some(Err(e)) => Err(e),
        }
    }

    /// Gracefully closes the channel.
    ///
    /// Writes queued before the call are flushed first, so their completion is always
    /// observed before the close listeners fire. Calling it again, or concurrently, waits for
    /// the first close to finish.
    pub async fn close(&self) {
        let already_closing = {
            let mut state = self.shared.state.lock();
            match *state {
                ChannelState::Open => {
                    *state = ChannelState::Closing;
                    false
                }
                ChannelState::Closing | ChannelState::Closed => true,
            }
        };
        if already_closing {
            self.closed().await;
            return;
        }

        let mut writer = self.shared.writer.lock().await;
        if let Some(mut sink) = writer.take() {
            if let Err(e) = sink.shutdown().await {
                warn!(cause = %e, "failed to shut down channel writer");
            }
        }
        drop(writer);

        self.shared.finish();
    }

    /// Closes the channel immediately, without flushing queued writes.
    pub fn abort(&self) {
        self.shared.finish();
    }

    /// Registers a one-shot listener fired when the channel closes. Fires immediately when
    /// the channel is already closed.
    pub fn on_close<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut listeners = self.shared.listeners.lock();
        if *self.shared.state.lock() == ChannelState::Closed {
            drop(listeners);
            listener();
            return;
        }
        listeners.push(Box::new(listener));
    }

    /// Resolves once the channel is closed.
    pub async fn closed(&self) {
        let mut closed = self.shared.closed_tx.subscribe();
        wait_closed(&mut closed).await;
    }

    /// Views the read side as a stream; the stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, ChannelError>> + Send + 'static {
        futures::stream::unfold(Some(self), |channel| async move {
            let channel = channel?;
            match channel.read().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(channel))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl Shared {
    fn finish(&self) {
        let listeners = {
            let mut listeners = self.listeners.lock();
            let mut state = self.state.lock();
            if *state == ChannelState::Closed {
                return;
            }
            *state = ChannelState::Closed;
            std::mem::take(&mut *listeners)
        };

        self.closed_tx.send_replace(true);

        if let Some(teardown) = self.teardown.lock().take() {
            teardown();
        }
        // when a read or write is in flight it drops its side itself once it observes the close
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }

        debug!(listeners = listeners.len(), written = self.written.load(Ordering::Acquire), "channel closed");
        for listener in listeners {
            listener();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.finish();
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    // the sender lives in `Shared`, which outlives every receiver, so waiting cannot fail
    let _ = closed.wait_for(|closed| *closed).await;
}

struct ReadingGuard<'a>(&'a AtomicBool);

impl Drop for ReadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl fmt::Debug for StreamChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamChannel")
            .field("state", &self.state())
            .field("writable", &self.is_writable())
            .field("bytes_written", &self.bytes_written())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct StreamChannelBuilder {
    parts: ChannelParts,
}

impl StreamChannelBuilder {
    fn new() -> Self {
        Self::default()
    }

    pub fn reader<R: ChunkReader + 'static>(mut self, reader: R) -> Self {
        self.parts.reader = Some(Box::new(reader));
        self
    }

    pub fn writer<W: ChunkWriter + 'static>(mut self, writer: W) -> Self {
        self.parts.writer = Some(Box::new(writer));
        self
    }

    /// Runs `teardown` once, when the channel closes.
    pub fn on_teardown<F: FnOnce() + Send + 'static>(mut self, teardown: F) -> Self {
        self.parts.teardown = Some(Box::new(teardown));
        self
    }

    pub fn build(self) -> StreamChannel {
        StreamChannel::new(self.parts)
    }
}

impl fmt::Debug for StreamChannelBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamChannelBuilder").field("parts", &self.parts).finish()
    }
}
