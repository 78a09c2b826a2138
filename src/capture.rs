//! Bounded tee capture for streaming HTTP bodies.
//!
//! [`tee_body`] swaps a request or response body for a wrapper that yields
//! the original chunks untouched while copying a size-bounded prefix aside
//! for logging. The consumer of the wrapped body sees exactly the bytes the
//! original body would have produced, in the same chunks, with the same
//! errors; capture is purely observational.

use axum::body::Body;
use bytes::Bytes;
use futures::{Future, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::encoding::{DecodeError, TextEncoding};

/// Error type for body capture operations.
#[derive(Debug, thiserror::Error)]
pub enum BodyCaptureError {
    #[error("body stream error: {0}")]
    Stream(String),
}

/// Resolves to the captured prefix once the wrapped body finishes streaming
/// (end-of-stream or drop, whichever comes first).
pub(crate) type CaptureFuture =
    Pin<Box<dyn Future<Output = Result<Bytes, BodyCaptureError>> + Send>>;

#[derive(Default)]
struct CaptureState {
    first_write: AtomicBool,
    captured: AtomicUsize,
    truncated: AtomicBool,
}

/// Observes a capture stream's progress from outside the stream.
#[derive(Clone)]
pub(crate) struct CaptureHandle {
    state: Arc<CaptureState>,
}

impl CaptureHandle {
    /// True once the first non-empty chunk has flowed through. Empty chunks
    /// never flip this.
    pub(crate) fn first_write(&self) -> bool {
        self.state.first_write.load(Ordering::Acquire)
    }

    /// Bytes copied into the capture buffer so far. Never exceeds the limit.
    pub(crate) fn captured(&self) -> usize {
        self.state.captured.load(Ordering::Acquire)
    }

    /// True when the stream carried more bytes than the capture limit.
    pub(crate) fn truncated(&self) -> bool {
        self.state.truncated.load(Ordering::Acquire)
    }
}

/// Wrap `body` so that up to `limit` bytes are copied aside while every
/// chunk passes through unchanged.
///
/// Returns the replacement body, a future resolving to the captured prefix,
/// and a handle for observing capture progress. The future completes when
/// the wrapped body is fully consumed or dropped, so awaiting it after the
/// response finishes never blocks on an abandoned stream.
pub(crate) fn tee_body(body: Body, limit: usize) -> (Body, CaptureFuture, CaptureHandle) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Result<Bytes, BodyCaptureError>>();
    let state = Arc::new(CaptureState::default());
    let handle = CaptureHandle {
        state: state.clone(),
    };

    let mut remaining = limit;
    // tx lives inside the stream closure, so the channel closes (and the
    // capture future resolves) exactly when the wrapped body is done with.
    let tee_stream = body.into_data_stream().map(move |result| {
        match &result {
            Ok(chunk) => {
                if !chunk.is_empty() {
                    state.first_write.store(true, Ordering::Release);
                    if remaining > 0 {
                        let take = remaining.min(chunk.len());
                        remaining -= take;
                        state.captured.fetch_add(take, Ordering::AcqRel);
                        if take < chunk.len() {
                            state.truncated.store(true, Ordering::Release);
                        }
                        let _ = tx.send(Ok(chunk.slice(..take)));
                    } else {
                        state.truncated.store(true, Ordering::Release);
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(Err(BodyCaptureError::Stream(e.to_string())));
            }
        }
        result // pass through untouched
    });

    let capture_future: CaptureFuture = Box::pin(async move {
        let mut buffer = Vec::new();
        while let Some(chunk_result) = rx.recv().await {
            match chunk_result {
                Ok(chunk) => buffer.extend_from_slice(&chunk),
                Err(e) => return Err(e),
            }
        }
        Ok(Bytes::from(buffer))
    });

    (Body::from_stream(tee_stream), capture_future, handle)
}

/// Captured body bytes plus their resolved encoding, decoded at most once.
pub(crate) struct CapturedBody {
    bytes: Bytes,
    encoding: TextEncoding,
    text: Option<Result<String, DecodeError>>,
}

impl CapturedBody {
    pub(crate) fn new(bytes: Bytes, encoding: TextEncoding) -> Self {
        Self {
            bytes,
            encoding,
            text: None,
        }
    }

    /// Decode the captured bytes into text. The first call decodes; every
    /// later call returns the cached outcome, success or failure alike.
    pub(crate) fn materialize(&mut self) -> Result<&str, DecodeError> {
        let encoding = self.encoding;
        let outcome = self
            .text
            .get_or_insert_with(|| encoding.decode(&self.bytes));
        match outcome {
            Ok(text) => Ok(text.as_str()),
            Err(e) => Err(e.clone()),
        }
    }
}
