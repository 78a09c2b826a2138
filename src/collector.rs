//! Field collection: turning request/response metadata into ordered records.
//!
//! One [`FieldCollector`] serves however many sinks are active for the
//! request. Each sink contributes its own interest mask, allow-lists, and
//! emission mode, so there is no separate single-sink/dual-sink code path;
//! shared fields are evaluated once per sink and appended independently,
//! keeping content, order, and redaction policy uncoupled across sinks.

use axum::http::{HeaderMap, Method, StatusCode};
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::SocketAddr;
use std::ops::Deref;

use crate::config::AllowList;
use crate::fields::FieldSet;
use crate::headers::filter_headers;
use crate::sink::SinkTarget;

/// One named, optionally-null value in an emitted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// An ordered sequence of fields. Names repeat only when header names
/// repeat; consumers own any multi-value semantics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldList(Vec<Field>);

impl FieldList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    pub fn push(&mut self, field: Field) {
        self.0.push(field);
    }

    pub fn extend(&mut self, other: FieldList) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.0.iter()
    }
}

impl Deref for FieldList {
    type Target = [Field];

    fn deref(&self) -> &[Field] {
        &self.0
    }
}

impl IntoIterator for FieldList {
    type Item = Field;
    type IntoIter = std::vec::IntoIter<Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<Field> for FieldList {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for FieldList {
    /// `Name: value` pairs joined with `, `; null values render empty.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", field.name, field.value.as_deref().unwrap_or(""))?;
        }
        Ok(())
    }
}

/// Which body a [`Record::BodyText`] snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyDirection {
    Request,
    Response,
}

/// One emitted log record. Each instance reaches a given sink at most once
/// per request.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Pre-body request fields (request line, filtered headers).
    RequestFields(FieldList),
    /// Response status and filtered response headers; exactly one per
    /// enabled per-phase sink per request.
    ResponseFields(FieldList),
    /// The secondary sink's single combined record for the whole request.
    ExtendedFields(FieldList),
    /// Decoded body snapshot text.
    BodyText {
        direction: BodyDirection,
        text: String,
    },
    /// Non-fatal condition, e.g. an unresolvable body media type.
    Warning(String),
}

/// How a sink receives its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EmitMode {
    /// A record per phase: `RequestFields` before downstream runs,
    /// `ResponseFields` and body text afterwards.
    PerPhase,
    /// Everything accumulated into one `ExtendedFields` record at finalize.
    Combined,
}

/// Per-sink collection parameters for one request.
pub(crate) struct SinkProfile {
    pub target: SinkTarget,
    pub interest: FieldSet,
    pub request_headers: AllowList,
    pub response_headers: AllowList,
    pub mode: EmitMode,
}

/// Pre-body metadata snapshot taken before downstream is invoked.
pub(crate) struct RequestInfo {
    pub timestamp: DateTime<Utc>,
    pub client: Option<SocketAddr>,
    pub server: Option<SocketAddr>,
    pub protocol: String,
    pub method: Method,
    pub scheme: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
}

struct SinkState {
    profile: SinkProfile,
    /// Effective mask: configured fields narrowed by this sink's interest.
    effective: FieldSet,
    combined: FieldList,
}

/// Builds ordered field lists for every active sink.
pub(crate) struct FieldCollector {
    sinks: Vec<SinkState>,
}

impl FieldCollector {
    pub(crate) fn new(fields: FieldSet, profiles: Vec<SinkProfile>) -> Self {
        let sinks = profiles
            .into_iter()
            .map(|profile| SinkState {
                effective: fields & profile.interest,
                profile,
                combined: FieldList::new(),
            })
            .collect();
        Self { sinks }
    }

    /// True when any active sink's effective mask intersects `fields`.
    pub(crate) fn wants(&self, fields: FieldSet) -> bool {
        self.sinks.iter().any(|s| s.effective.intersects(fields))
    }

    /// Gather pre-body fields. Evaluation order is part of the observable
    /// contract: connection info, then protocol, method, scheme, path,
    /// query, headers.
    pub(crate) fn collect_request(&mut self, info: &RequestInfo) -> Vec<(SinkTarget, Record)> {
        let mut out = Vec::new();
        for sink in &mut self.sinks {
            let effective = sink.effective;
            let mut list = FieldList::new();

            if effective.contains(FieldSet::TIMESTAMP) {
                list.push(Field::new(
                    "Timestamp",
                    Some(info.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
                ));
            }
            if effective.contains(FieldSet::CLIENT_IP) {
                list.push(Field::new("ClientIp", info.client.map(|a| a.ip().to_string())));
            }
            if effective.contains(FieldSet::SERVER_IP) {
                list.push(Field::new("ServerIp", info.server.map(|a| a.ip().to_string())));
            }
            if effective.contains(FieldSet::SERVER_PORT) {
                list.push(Field::new(
                    "ServerPort",
                    info.server.map(|a| a.port().to_string()),
                ));
            }
            if effective.contains(FieldSet::REQUEST_PROTOCOL) {
                list.push(Field::new("Protocol", Some(info.protocol.clone())));
            }
            if effective.contains(FieldSet::REQUEST_METHOD) {
                list.push(Field::new("Method", Some(info.method.to_string())));
            }
            if effective.contains(FieldSet::REQUEST_SCHEME) {
                list.push(Field::new("Scheme", Some(info.scheme.clone())));
            }
            if effective.contains(FieldSet::REQUEST_PATH) {
                list.push(Field::new("Path", Some(info.path.clone())));
            }
            if effective.contains(FieldSet::REQUEST_QUERY) {
                list.push(Field::new(
                    "Query",
                    Some(info.query.clone().unwrap_or_default()),
                ));
            }
            if effective.contains(FieldSet::REQUEST_HEADERS) {
                list.extend(filter_headers(&info.headers, &sink.profile.request_headers));
            }

            match sink.profile.mode {
                EmitMode::PerPhase => {
                    if !list.is_empty() {
                        out.push((sink.profile.target, Record::RequestFields(list)));
                    }
                }
                EmitMode::Combined => sink.combined.extend(list),
            }
        }
        out
    }

    /// Gather response fields: status code, then filtered headers. Per-phase
    /// sinks get a `ResponseFields` record even when the effective mask
    /// leaves it empty, so every enabled sink sees exactly one.
    pub(crate) fn collect_response(
        &mut self,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Vec<(SinkTarget, Record)> {
        let mut out = Vec::new();
        for sink in &mut self.sinks {
            let effective = sink.effective;
            let mut list = FieldList::new();

            if effective.contains(FieldSet::RESPONSE_STATUS_CODE) {
                list.push(Field::new("StatusCode", Some(status.as_u16().to_string())));
            }
            if effective.contains(FieldSet::RESPONSE_HEADERS) {
                list.extend(filter_headers(headers, &sink.profile.response_headers));
            }

            match sink.profile.mode {
                EmitMode::PerPhase => {
                    out.push((sink.profile.target, Record::ResponseFields(list)));
                }
                EmitMode::Combined => sink.combined.extend(list),
            }
        }
        out
    }

    /// Emit the combined record for accumulate-mode sinks that collected at
    /// least one field.
    pub(crate) fn finish(&mut self) -> Vec<(SinkTarget, Record)> {
        let mut out = Vec::new();
        for sink in &mut self.sinks {
            if sink.profile.mode == EmitMode::Combined && !sink.combined.is_empty() {
                let list = std::mem::take(&mut sink.combined);
                out.push((sink.profile.target, Record::ExtendedFields(list)));
            }
        }
        out
    }
}
