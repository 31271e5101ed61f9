//! The chat stream contract and adapters to and from `futures::Stream`.

use super::chunk::ChatChunk;
use crate::{BoxStream, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};

/// Lazy, finite, single-consumer sequence of chunks.
///
/// `recv` yields chunks until one has `done` set or the upstream ends; from then on it keeps
/// returning `Ok(None)`. `close` releases the upstream and may be called any number of times.
#[async_trait]
pub trait ChatStream: Send {
    async fn recv(&mut self) -> Result<Option<ChatChunk>>;

    async fn close(&mut self) -> Result<()>;
}

pub type BoxChatStream = Box<dyn ChatStream>;

#[async_trait]
impl<S: ChatStream + ?Sized> ChatStream for Box<S> {
    async fn recv(&mut self) -> Result<Option<ChatChunk>> {
        (**self).recv().await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

/// [`ChatStream`] over any `futures::Stream` of chunk results.
pub struct ChunkStream {
    inner: Option<BoxStream<'static, ChatChunk>>,
}

impl ChunkStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<ChatChunk>> + Send + 'static,
    {
        Self {
            inner: Some(Box::pin(stream)),
        }
    }

    pub fn from_chunks(chunks: Vec<ChatChunk>) -> Self {
        Self::new(futures::stream::iter(chunks.into_iter().map(Ok)))
    }

    pub fn boxed(self) -> BoxChatStream {
        Box::new(self)
    }
}

#[async_trait]
impl ChatStream for ChunkStream {
    async fn recv(&mut self) -> Result<Option<ChatChunk>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(None);
        };
        match inner.next().await {
            Some(Ok(chunk)) => {
                if chunk.done {
                    self.inner = None;
                }
                Ok(Some(chunk))
            }
            Some(Err(e)) => {
                self.inner = None;
                Err(e)
            }
            None => {
                self.inner = None;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.inner = None;
        Ok(())
    }
}

/// Turns a [`ChatStream`] back into a `futures::Stream`, closing it once it is exhausted.
pub fn into_chunk_stream<S>(stream: S) -> BoxStream<'static, ChatChunk>
where
    S: ChatStream + 'static,
{
    Box::pin(futures::stream::unfold(Some(stream), |state| async move {
        let mut stream = state?;
        match stream.recv().await {
            Ok(Some(chunk)) => Some((Ok(chunk), Some(stream))),
            Ok(None) => {
                close_logged(&mut stream).await;
                None
            }
            Err(e) => {
                close_logged(&mut stream).await;
                Some((Err(e), None))
            }
        }
    }))
}

async fn close_logged<S: ChatStream>(stream: &mut S) {
    if let Err(e) = stream.close().await {
        tracing::debug!(error = %e, "chat stream close failed");
    }
}
