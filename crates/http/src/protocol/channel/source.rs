//! The transport seams of a [`StreamChannel`](super::StreamChannel).
//!
//! A transport collaborator hands a channel a [`ChunkReader`] (pull side), a [`ChunkWriter`]
//! (push side) and an optional teardown hook. This module also holds the adapters that turn
//! common async sources and sinks into those seams.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt};
use http_body::Body;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use crate::protocol::{BoxError, ChannelError};

/// Pull side of a channel: yields the next chunk, or `None` once the source is exhausted.
#[async_trait]
pub trait ChunkReader: Send {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, ChannelError>;
}

/// Push side of a channel.
///
/// `write_chunk` resolves once the chunk has been handed to the transport, which is the
/// flush acknowledgement seen by channel writers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChunkWriter: Send {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), ChannelError>;

    async fn shutdown(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }
}

pub type Teardown = Box<dyn FnOnce() + Send>;

/// Reads chunks from any `Stream` of byte results.
pub struct StreamReader<S> {
    stream: S,
}

impl<S> StreamReader<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S, E> ChunkReader for StreamReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin,
    E: Into<BoxError>,
{
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, ChannelError> {
        match self.stream.next().await {
            Some(Ok(bytes)) => Ok(Some(bytes)),
            Some(Err(e)) => Err(ChannelError::transport(e)),
            None => Ok(None),
        }
    }
}

impl<S> fmt::Debug for StreamReader<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReader").finish_non_exhaustive()
    }
}

/// Reads the data frames of an `http_body::Body`; trailers are skipped.
pub struct BodyReader<B> {
    body: B,
}

impl<B> BodyReader<B> {
    pub fn new(body: B) -> Self {
        Self { body }
    }
}

#[async_trait]
impl<B> ChunkReader for BodyReader<B>
where
    B: Body<Data = Bytes> + Send + Unpin,
    B::Error: Into<BoxError>,
{
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, ChannelError> {
        loop {
            match self.body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        return Ok(Some(data));
                    }
                }
                Some(Err(e)) => return Err(ChannelError::transport(e)),
                None => return Ok(None),
            }
        }
    }
}

impl<B> fmt::Debug for BodyReader<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyReader").finish_non_exhaustive()
    }
}

/// Reads from a `tokio::io::AsyncRead`, such as the read half of a socket.
pub fn io_reader<R>(reader: R) -> StreamReader<ReaderStream<R>>
where
    R: AsyncRead + Send + Unpin,
{
    StreamReader::new(ReaderStream::new(reader))
}

/// Writes to a `tokio::io::AsyncWrite`; every chunk is flushed before the write completes.
pub struct IoWriter<W> {
    writer: W,
}

impl<W> IoWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W> ChunkWriter for IoWriter<W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), ChannelError> {
        self.writer.write_all(&chunk).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ChannelError> {
        self.writer.shutdown().await.map_err(ChannelError::io)
    }
}

impl<W> fmt::Debug for IoWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoWriter").finish_non_exhaustive()
    }
}

/// Shared view of the chunks written into a collector channel.
#[derive(Debug, Clone, Default)]
pub struct Collected {
    chunks: Arc<Mutex<Vec<Bytes>>>,
}

impl Collected {
    /// Every chunk written so far, in write order.
    pub fn chunks(&self) -> Vec<Bytes> {
        self.chunks.lock().clone()
    }

    /// All chunks concatenated.
    pub fn bytes(&self) -> Bytes {
        let chunks = self.chunks.lock();
        let mut buf = Vec::with_capacity(chunks.iter().map(Bytes::len).sum());
        for chunk in chunks.iter() {
            buf.extend_from_slice(chunk);
        }
        Bytes::from(buf)
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }
}

#[derive(Debug)]
pub(crate) struct CollectWriter {
    collected: Collected,
}

impl CollectWriter {
    pub(crate) fn new(collected: Collected) -> Self {
        Self { collected }
    }
}

#[async_trait]
impl ChunkWriter for CollectWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), ChannelError> {
        self.collected.chunks.lock().push(chunk);
        Ok(())
    }
}

/// Producer end of [`StreamChannel::pipe`](super::StreamChannel::pipe).
///
/// Dropping the sender, or calling [`PipeSender::finish`], ends the stream for the reader.
#[derive(Debug, Clone)]
pub struct PipeSender {
    sender: mpsc::Sender<Bytes>,
}

impl PipeSender {
    pub(crate) fn new(sender: mpsc::Sender<Bytes>) -> Self {
        Self { sender }
    }

    /// Sends a chunk, waiting while the pipe buffer is full.
    pub async fn send(&mut self, chunk: impl Into<Bytes>) -> Result<(), ChannelError> {
        self.sender.send(chunk.into()).await.map_err(ChannelError::transport)
    }

    pub fn finish(mut self) {
        self.sender.close_channel();
    }
}

pub(crate) fn pipe_reader(receiver: mpsc::Receiver<Bytes>) -> impl ChunkReader {
    StreamReader::new(receiver.map(Ok::<_, ChannelError>))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{Full, StreamBody};
    use http_body::Frame;

    #[tokio::test]
    async fn stream_reader_yields_chunks_then_none() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![Ok(Bytes::from_static(b"a")), Ok(Bytes::from_static(b"b"))];
        let mut reader = StreamReader::new(futures::stream::iter(chunks));

        assert_eq!(reader.read_chunk().await.unwrap(), Some(Bytes::from_static(b"a")));
        assert_eq!(reader.read_chunk().await.unwrap(), Some(Bytes::from_static(b"b")));
        assert_eq!(reader.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn stream_reader_maps_errors_to_transport() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![Err(std::io::Error::other("reset"))];
        let mut reader = StreamReader::new(futures::stream::iter(chunks));

        let err = reader.read_chunk().await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport { .. }));
    }

    #[tokio::test]
    async fn body_reader_skips_trailers() {
        let frames: Vec<Result<Frame<Bytes>, std::io::Error>> =
            vec![Ok(Frame::data(Bytes::from_static(b"data"))), Ok(Frame::trailers(http::HeaderMap::new()))];
        let mut reader = BodyReader::new(StreamBody::new(futures::stream::iter(frames)));

        assert_eq!(reader.read_chunk().await.unwrap(), Some(Bytes::from_static(b"data")));
        assert_eq!(reader.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn body_reader_reads_full_body() {
        let mut reader = BodyReader::new(Full::new(Bytes::from_static(b"whole")));
        assert_eq!(reader.read_chunk().await.unwrap(), Some(Bytes::from_static(b"whole")));
        assert_eq!(reader.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn io_writer_writes_and_shuts_down() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut writer = IoWriter::new(client);

        writer.write_chunk(Bytes::from_static(b"ping")).await.unwrap();
        writer.shutdown().await.unwrap();

        let mut received = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut received).await.unwrap();
        assert_eq!(received, b"ping");
    }

    #[tokio::test]
    async fn collector_keeps_write_order() {
        let collected = Collected::default();
        let mut writer = CollectWriter::new(collected.clone());

        writer.write_chunk(Bytes::from_static(b"hello ")).await.unwrap();
        writer.write_chunk(Bytes::from_static(b"world")).await.unwrap();

        assert_eq!(collected.chunks().len(), 2);
        assert_eq!(collected.to_string_lossy(), "hello world");
    }
}
