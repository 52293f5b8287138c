use crate::core::StreamCancelHandle;
use axum::body::Bytes;
use futures::stream::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

/// SSE body wrapper that fires its cancellation handle when dropped.
///
/// Hyper drops the body when the client goes away, which in turn drops the
/// relay and the provider stream beneath it.
pub struct DisconnectStream<S> {
    pub stream: S,
    pub cancel_handle: StreamCancelHandle,
}

impl<S> DisconnectStream<S> {
    pub fn new(stream: S, cancel_handle: StreamCancelHandle) -> Self {
        Self {
            stream,
            cancel_handle,
        }
    }
}

impl<S, E> Stream for DisconnectStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}

impl<S> Drop for DisconnectStream<S> {
    fn drop(&mut self) {
        // A no-op once the terminal frame went out.
        if !self.cancel_handle.is_completed() {
            tracing::debug!(
                request_id = %crate::core::get_request_id(),
                "Client disconnect detected, stream cancelled"
            );
        }
        self.cancel_handle.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn bytes_stream() -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        futures::stream::iter(vec![
            Ok(Bytes::from_static(b"data: a\n\n")),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ])
    }

    #[tokio::test]
    async fn test_drop_before_completion_cancels() {
        let handle = StreamCancelHandle::new();
        let mut stream = DisconnectStream::new(bytes_stream(), handle.clone());
        assert!(stream.next().await.is_some());
        drop(stream);
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_drop_after_completion_does_not_cancel() {
        let handle = StreamCancelHandle::new();
        let mut stream = DisconnectStream::new(bytes_stream(), handle.clone());
        while stream.next().await.is_some() {}
        handle.mark_completed();
        drop(stream);
        assert!(!handle.is_cancelled());
    }
}
