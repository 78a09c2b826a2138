//! # Tapline
//!
//! An Axum middleware that taps HTTP traffic into structured log records:
//! request/response metadata, allow-listed headers, and size-bounded body
//! snapshots. The tap never changes a byte of what either side of the
//! pipeline observes.
//!
//! ## Features
//!
//! - **Observational only**: bodies stream through unchanged; capture copies
//!   a bounded prefix aside
//! - **Field selection**: a [`FieldSet`] bitmask decides what is logged
//! - **Per-sink redaction**: two independent sinks, each with its own
//!   enablement check and header allow-list
//! - **Background emission**: records are handed to a dispatch task so the
//!   request path never blocks on a sink
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{routing::get, Router};
//! use std::sync::Arc;
//! use tapline::{ExtendedLineSink, FieldSet, HttpTapLayer, TapConfig, TracingSink};
//!
//! async fn hello() -> &'static str {
//!     "Hello, World!"
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TapConfig {
//!         fields: FieldSet::REQUEST | FieldSet::RESPONSE,
//!         ..TapConfig::default()
//!     };
//!     let layer = HttpTapLayer::new(Arc::new(config), TracingSink, ExtendedLineSink);
//!
//!     let app = Router::new().route("/hello", get(hello)).layer(layer);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! ## Custom Sinks
//!
//! Implement [`LogSink`] to route records anywhere:
//!
//! ```rust
//! use tapline::{LogSink, Record};
//!
//! #[derive(Debug)]
//! struct StdoutSink;
//!
//! impl LogSink for StdoutSink {
//!     fn enabled(&self) -> bool {
//!         true
//!     }
//!
//!     fn emit(&self, record: Record) {
//!         println!("{record:?}");
//!     }
//! }
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::Response,
};
use chrono::Utc;
use std::{
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tower::{Layer, Service};
use tracing::{debug, error, instrument};

mod capture;
pub mod collector;
pub mod config;
pub mod encoding;
pub mod fields;
pub mod headers;
pub mod sink;

pub use capture::BodyCaptureError;
pub use collector::{BodyDirection, Field, FieldList, Record};
pub use config::{AllowList, ConfigProvider, TapConfig};
pub use encoding::{DecodeError, MediaTypeTable, TextEncoding};
pub use fields::FieldSet;
pub use headers::REDACTED;
pub use sink::{ExtendedLineSink, LogSink, SinkTarget, TracingSink};

use capture::{tee_body, CaptureFuture, CaptureHandle, CapturedBody};
use collector::{EmitMode, FieldCollector, RequestInfo, SinkProfile};
use sink::SinkEvent;

/// Local address the connection was accepted on, read from request
/// extensions when present. Hosts that know their bind address can insert
/// this with an `Extension` layer to populate the ServerIp/ServerPort
/// fields.
#[derive(Debug, Clone, Copy)]
pub struct LocalAddr(pub SocketAddr);

/// Tower layer installing the traffic tap.
///
/// Construction takes all required collaborators as non-optional parameters,
/// so a layer that exists is always fully wired. `new` spawns the background
/// dispatch task that fans records out to the sinks.
#[derive(Clone)]
pub struct HttpTapLayer {
    provider: Arc<dyn ConfigProvider>,
    primary: Arc<dyn LogSink>,
    secondary: Arc<dyn LogSink>,
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl HttpTapLayer {
    /// Create the layer from a configuration provider and the two sinks.
    ///
    /// Must be called within a tokio runtime; the record dispatcher is
    /// spawned here and lives as long as any clone of the layer.
    pub fn new<P, L1, L2>(provider: P, primary: L1, secondary: L2) -> Self
    where
        P: ConfigProvider,
        L1: LogSink,
        L2: LogSink,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<SinkEvent>();
        let primary: Arc<dyn LogSink> = Arc::new(primary);
        let secondary: Arc<dyn LogSink> = Arc::new(secondary);

        let primary_rx = primary.clone();
        let secondary_rx = secondary.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event.target {
                    SinkTarget::Primary => primary_rx.emit(event.record),
                    SinkTarget::Secondary => secondary_rx.emit(event.record),
                }
            }
        });

        Self {
            provider: Arc::new(provider),
            primary,
            secondary,
            tx,
        }
    }
}

impl<S> Layer<S> for HttpTapLayer {
    type Service = HttpTapService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpTapService {
            inner,
            provider: self.provider.clone(),
            primary: self.primary.clone(),
            secondary: self.secondary.clone(),
            tx: self.tx.clone(),
        }
    }
}

/// Tower service wrapping an inner service with the traffic tap.
///
/// Each request runs its own orchestration to completion: snapshot
/// configuration, collect pre-body fields, install capture wrappers, invoke
/// downstream, then finalize emission once the wrapped streams finish.
/// Nothing is shared mutably across concurrent requests.
#[derive(Clone)]
pub struct HttpTapService<S> {
    inner: S,
    provider: Arc<dyn ConfigProvider>,
    primary: Arc<dyn LogSink>,
    secondary: Arc<dyn LogSink>,
    tx: mpsc::UnboundedSender<SinkEvent>,
}

fn primary_profile(config: &TapConfig) -> SinkProfile {
    SinkProfile {
        target: SinkTarget::Primary,
        interest: FieldSet::REQUEST | FieldSet::RESPONSE,
        request_headers: config.request_headers.clone(),
        response_headers: config.response_headers.clone(),
        mode: EmitMode::PerPhase,
    }
}

fn secondary_profile(config: &TapConfig) -> SinkProfile {
    SinkProfile {
        target: SinkTarget::Secondary,
        interest: FieldSet::CONNECTION_INFO
            | FieldSet::REQUEST_LINE
            | FieldSet::REQUEST_HEADERS
            | FieldSet::RESPONSE_STATUS_CODE,
        request_headers: config.extended_request_headers.clone(),
        response_headers: AllowList::new(),
        mode: EmitMode::Combined,
    }
}

fn emit(tx: &mpsc::UnboundedSender<SinkEvent>, target: SinkTarget, record: Record) {
    if tx.send(SinkEvent { target, record }).is_err() {
        error!(target: "tapline", "record dispatcher is gone; dropping record");
    }
}

impl<S> Service<Request> for HttpTapService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    #[instrument(skip_all)]
    fn call(&mut self, mut request: Request) -> Self::Future {
        // Enablement and configuration are snapshotted once, before any
        // work; both hold for the request's whole lifetime.
        let primary_enabled = self.primary.enabled();
        let secondary_enabled = self.secondary.enabled();
        if !primary_enabled && !secondary_enabled {
            return Box::pin(self.inner.call(request));
        }

        let config = self.provider.snapshot();
        let mut profiles = Vec::new();
        if primary_enabled {
            profiles.push(primary_profile(&config));
        }
        if secondary_enabled {
            profiles.push(secondary_profile(&config));
        }
        let mut collector = FieldCollector::new(config.fields, profiles);
        let tx = self.tx.clone();

        let info = RequestInfo {
            timestamp: Utc::now(),
            client: request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|c| c.0),
            server: request.extensions().get::<LocalAddr>().map(|a| a.0),
            protocol: format!("{:?}", request.version()),
            method: request.method().clone(),
            scheme: request.uri().scheme_str().unwrap_or("http").to_owned(),
            path: request.uri().path().to_owned(),
            query: request.uri().query().map(str::to_owned),
            headers: request.headers().clone(),
        };
        debug!(method = %info.method, path = %info.path, "tapping request");

        // Install request body capture only when some active sink wants the
        // body and the content-type resolves to a known text encoding.
        let mut request_capture: Option<(CaptureFuture, TextEncoding)> = None;
        if collector.wants(FieldSet::REQUEST_BODY) {
            match config
                .media_types
                .resolve(request.headers().get(CONTENT_TYPE))
            {
                Some(encoding) => {
                    let body = std::mem::replace(request.body_mut(), Body::empty());
                    let (wrapped, capture, _handle) = tee_body(body, config.request_body_limit);
                    *request.body_mut() = wrapped;
                    request_capture = Some((capture, encoding));
                }
                None => {
                    // Only the primary's interest mask covers bodies, so a
                    // wanted-but-unresolvable body implies the primary is
                    // active; the warning goes there.
                    emit(
                        &tx,
                        SinkTarget::Primary,
                        Record::Warning(
                            "request media type has no known text encoding; body not captured"
                                .to_owned(),
                        ),
                    );
                }
            }
        }

        // Pre-body records go out before downstream runs; they are not
        // retracted if downstream later fails.
        for (target, record) in collector.collect_request(&info) {
            emit(&tx, target, record);
        }

        let future = self.inner.call(request);

        Box::pin(async move {
            // The single suspension point. On error, per-request state is
            // dropped right here: capture buffers are freed and gathered-
            // but-unemitted fields are discarded.
            let mut response = future.await?;

            let mut response_capture: Option<(CaptureFuture, TextEncoding, CaptureHandle)> = None;
            if collector.wants(FieldSet::RESPONSE_BODY) {
                if let Some(encoding) = config
                    .media_types
                    .resolve(response.headers().get(CONTENT_TYPE))
                {
                    let body = std::mem::replace(response.body_mut(), Body::empty());
                    let (wrapped, capture, handle) = tee_body(body, config.response_body_limit);
                    *response.body_mut() = wrapped;
                    response_capture = Some((capture, encoding, handle));
                }
            }

            let status = response.status();
            let response_headers = response.headers().clone();

            // Headers-early path: with no capture stream installed there is
            // nothing to wait for, so the response record goes out now.
            // With a capture stream, emission always defers to finalize,
            // guarded so the record goes out exactly once either way.
            let mut response_fields_logged = false;
            if response_capture.is_none() {
                for (target, record) in collector.collect_response(status, &response_headers) {
                    emit(&tx, target, record);
                }
                response_fields_logged = true;
            }

            // Finalize outlives the response handoff: it resumes once the
            // wrapped streams complete (or are dropped) and emits the
            // remaining records. Failures in there are logged, never
            // thrown, so they cannot mask a downstream failure.
            tokio::spawn(finalize(
                collector,
                request_capture,
                response_capture,
                status,
                response_headers,
                response_fields_logged,
                tx,
            ));

            Ok(response)
        })
    }
}

async fn finalize(
    mut collector: FieldCollector,
    request_capture: Option<(CaptureFuture, TextEncoding)>,
    response_capture: Option<(CaptureFuture, TextEncoding, CaptureHandle)>,
    status: StatusCode,
    response_headers: HeaderMap,
    response_fields_logged: bool,
    tx: mpsc::UnboundedSender<SinkEvent>,
) {
    // Request body first: the capture resolves whether downstream read to
    // end-of-stream or dropped the body partway.
    if let Some((capture, encoding)) = request_capture {
        match capture.await {
            Ok(bytes) => {
                let mut captured = CapturedBody::new(bytes, encoding);
                match captured.materialize() {
                    Ok(text) => {
                        let text = text.to_owned();
                        emit(
                            &tx,
                            SinkTarget::Primary,
                            Record::BodyText {
                                direction: BodyDirection::Request,
                                text,
                            },
                        );
                    }
                    Err(e) => {
                        error!(target: "tapline", error = %e, "request body decode failed")
                    }
                }
            }
            Err(e) => error!(target: "tapline", error = %e, "request body capture failed"),
        }
    }

    if !response_fields_logged {
        for (target, record) in collector.collect_response(status, &response_headers) {
            emit(&tx, target, record);
        }
    }

    if let Some((capture, encoding, handle)) = response_capture {
        match capture.await {
            Ok(bytes) => {
                debug!(
                    target: "tapline",
                    captured = handle.captured(),
                    truncated = handle.truncated(),
                    first_write = handle.first_write(),
                    "response capture complete"
                );
                let mut captured = CapturedBody::new(bytes, encoding);
                match captured.materialize() {
                    Ok(text) if !text.is_empty() => {
                        let text = text.to_owned();
                        emit(
                            &tx,
                            SinkTarget::Primary,
                            Record::BodyText {
                                direction: BodyDirection::Response,
                                text,
                            },
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(target: "tapline", error = %e, "response body decode failed")
                    }
                }
            }
            Err(e) => error!(target: "tapline", error = %e, "response body capture failed"),
        }
    }

    for (target, record) in collector.finish() {
        emit(&tx, target, record);
    }
}
