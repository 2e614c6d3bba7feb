//! Upstream response bodies with scoped release.
//!
//! A [`ResponseBody`] wraps the transport's byte stream together with a release
//! hook. The hook runs exactly once: either through [`ResponseBody::release`],
//! which reports its outcome, or on drop when a handler returns early.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::error::{RelayError, Result};

pub type ReleaseHook = Box<dyn FnOnce() -> std::io::Result<()> + Send>;

pub struct ResponseBody {
    stream: BoxStream<'static, std::io::Result<Bytes>>,
    release: Option<ReleaseHook>,
}

impl ResponseBody {
    pub fn new(stream: impl Stream<Item = std::io::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            stream: stream.boxed(),
            release: None,
        }
    }

    /// Body over an already-buffered payload.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::from_chunks(vec![bytes.into()])
    }

    /// Body that yields the given chunks in order.
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        Self::new(tokio_stream::iter(chunks.into_iter().map(Ok)))
    }

    /// Body over a reqwest response stream.
    pub fn from_reqwest(resp: reqwest::Response) -> Self {
        Self::new(
            resp.bytes_stream()
                .map(|r| r.map_err(std::io::Error::other)),
        )
    }

    #[must_use]
    pub fn with_release(mut self, hook: ReleaseHook) -> Self {
        self.release = Some(hook);
        self
    }

    /// Read the body to completion.
    pub async fn read_all(&mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.stream.next().await {
            let chunk = chunk.map_err(|e| RelayError::read_failed(e.to_string()))?;
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Release the underlying resource. Later calls are no-ops.
    pub fn release(&mut self) -> Result<()> {
        match self.release.take() {
            Some(hook) => hook().map_err(|e| RelayError::close_failed(e.to_string())),
            None => Ok(()),
        }
    }
}

impl Stream for ResponseBody {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().stream.as_mut().poll_next(cx)
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        if let Some(hook) = self.release.take() {
            if let Err(e) = hook() {
                tracing::warn!(error = %e, "Failed to release response body on drop");
            }
        }
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseBody")
            .field("released", &self.release.is_none())
            .finish_non_exhaustive()
    }
}

/// A provider HTTP response as handed to the normalizers.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: reqwest::header::HeaderMap,
    pub body: ResponseBody,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: ResponseBody) -> Self {
        Self {
            status,
            headers: reqwest::header::HeaderMap::new(),
            body,
        }
    }

    pub fn from_reqwest(resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        Self {
            status,
            headers,
            body: ResponseBody::from_reqwest(resp),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
