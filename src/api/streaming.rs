//! Server-Sent Events transport for streamed chat turns.
//!
//! The response is committed with status 200 as soon as the turn is
//! accepted; every later outcome travels in-band as a frame.

use crate::api::disconnect::DisconnectStream;
use crate::core::StreamCancelHandle;
use crate::services::aggregator::Frame;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;

/// Encode frames for the wire, marking the handle completed once the
/// terminal frame has been handed to the transport.
pub fn encode_frames<S>(
    frames: S,
    cancel: StreamCancelHandle,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = Frame> + Send + 'static,
{
    frames.map(move |frame| {
        if frame.is_terminal() {
            cancel.mark_completed();
        }
        Ok(frame.to_bytes())
    })
}

/// Build the `text/event-stream` response for a streamed turn.
pub fn sse_response<S>(frames: S, cancel: StreamCancelHandle) -> Response
where
    S: Stream<Item = Frame> + Send + 'static,
{
    let encoded = Box::pin(encode_frames(frames, cancel.clone()));
    let body = Body::from_stream(DisconnectStream::new(encoded, cancel));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (header::CONNECTION, HeaderValue::from_static("keep-alive")),
        ],
        body,
    )
        .into_response()
}
