//! Log sinks: independent destinations for emitted records.
//!
//! The tap drives two sink slots, primary and secondary, each with its own
//! enablement check, field subset, and header allow-list. Implement
//! [`LogSink`] to route records anywhere; the built-ins emit through
//! `tracing`.

use tracing::{info, warn, Level};

use crate::collector::{BodyDirection, FieldList, Record};

/// Which sink slot a record is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkTarget {
    /// Structured per-phase records, body snapshots, and warnings.
    Primary,
    /// One combined extended record per request.
    Secondary,
}

/// An independent log destination.
///
/// `enabled` is evaluated once at the start of each request; when it returns
/// false the tap does no collection work for that sink. `emit` runs on the
/// background dispatch task, off the request path, and receives each record
/// instance at most once per request.
pub trait LogSink: Send + Sync + 'static {
    fn enabled(&self) -> bool;
    fn emit(&self, record: Record);
}

/// Routed emission unit handed to the dispatch task.
#[derive(Debug)]
pub(crate) struct SinkEvent {
    pub target: SinkTarget,
    pub record: Record,
}

/// Primary built-in sink: structured records through the `tapline` tracing
/// target at INFO.
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn enabled(&self) -> bool {
        tracing::enabled!(target: "tapline", Level::INFO)
    }

    fn emit(&self, record: Record) {
        match record {
            Record::RequestFields(list) => info!(target: "tapline", "Request: {list}"),
            Record::ResponseFields(list) => info!(target: "tapline", "Response: {list}"),
            Record::ExtendedFields(list) => info!(target: "tapline", "{list}"),
            Record::BodyText {
                direction: BodyDirection::Request,
                text,
            } => info!(target: "tapline", "RequestBody: {text}"),
            Record::BodyText {
                direction: BodyDirection::Response,
                text,
            } => info!(target: "tapline", "ResponseBody: {text}"),
            Record::Warning(message) => warn!(target: "tapline", "{message}"),
        }
    }
}

/// Secondary built-in sink: one space-separated line of field values per
/// request through the `tapline::extended` tracing target. Absent values
/// render as `-`.
#[derive(Debug, Clone, Default)]
pub struct ExtendedLineSink;

fn extended_line(list: &FieldList) -> String {
    let mut line = String::new();
    for (i, field) in list.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        match field.value.as_deref() {
            Some(value) if !value.is_empty() => line.push_str(value),
            _ => line.push('-'),
        }
    }
    line
}

impl LogSink for ExtendedLineSink {
    fn enabled(&self) -> bool {
        tracing::enabled!(target: "tapline::extended", Level::INFO)
    }

    fn emit(&self, record: Record) {
        match record {
            Record::ExtendedFields(list) => {
                info!(target: "tapline::extended", "{}", extended_line(&list));
            }
            Record::Warning(message) => warn!(target: "tapline::extended", "{message}"),
            _ => {}
        }
    }
}
