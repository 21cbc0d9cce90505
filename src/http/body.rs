//! Chunked body relay.
//!
//! # Responsibilities
//! - Pass body frames through as they arrive, never collecting the whole payload
//! - Split oversized data frames into chunks of at most `max_chunk` bytes
//! - Keep the proxy session alive for as long as the body is being streamed
//!
//! # Design Decisions
//! - Splitting uses `Bytes::split_to`, so chunks share the original allocation
//! - The size hint of the inner body is preserved so the transport can still
//!   emit a `Content-Length` instead of chunked encoding

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use axum::body::Bytes;
use hyper::body::{Body as HttpBody, Frame, SizeHint};

use crate::proxy::session::SessionGuard;

/// Default upper bound for a relayed chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Body adapter that relays frames in bounded chunks.
pub struct RelayBody<B> {
    inner: B,
    pending: Option<Bytes>,
    max_chunk: usize,
    session: Option<SessionGuard>,
}

impl<B> RelayBody<B> {
    pub fn new(inner: B, max_chunk: usize) -> Self {
        Self {
            inner,
            pending: None,
            max_chunk: max_chunk.max(1),
            session: None,
        }
    }

    /// Hold `session` until the body is finished or dropped.
    pub fn with_session(mut self, session: SessionGuard) -> Self {
        self.session = Some(session);
        self
    }

    fn next_chunk(&mut self, mut data: Bytes) -> Bytes {
        if data.len() > self.max_chunk {
            let chunk = data.split_to(self.max_chunk);
            self.pending = Some(data);
            chunk
        } else {
            data
        }
    }
}

impl<B> HttpBody for RelayBody<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if let Some(pending) = this.pending.take() {
            let chunk = this.next_chunk(pending);
            return Poll::Ready(Some(Ok(Frame::data(chunk))));
        }

        match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
            Some(Ok(frame)) => match frame.into_data() {
                Ok(data) => {
                    let chunk = this.next_chunk(data);
                    Poll::Ready(Some(Ok(Frame::data(chunk))))
                }
                Err(frame) => Poll::Ready(Some(Ok(frame))),
            },
            Some(Err(e)) => {
                tracing::warn!(
                    session = ?this.session.as_ref().map(SessionGuard::id),
                    error = %e,
                    "Body stream failed mid-transfer"
                );
                Poll::Ready(Some(Err(e)))
            }
            None => {
                this.session.take();
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.pending.is_none() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        let pending = self.pending.as_ref().map_or(0, |b| b.len() as u64);
        let inner = self.inner.size_hint();

        let mut hint = SizeHint::new();
        hint.set_lower(inner.lower() + pending);
        if let Some(upper) = inner.upper() {
            hint.set_upper(upper + pending);
        }
        hint
    }
}
