//! Tap configuration: field selection, capture limits, allow-lists.
//!
//! The service never reads configuration directly; it asks a
//! [`ConfigProvider`] for an immutable snapshot at the start of each request
//! and uses only that snapshot for the request's lifetime. Hot reload swaps
//! the value between requests, never during one.

use crate::encoding::MediaTypeTable;
use crate::fields::FieldSet;
use arc_swap::ArcSwap;
use axum::http::HeaderName;
use std::collections::HashSet;
use std::sync::Arc;

/// Case-insensitive set of header names whose values may appear in logs.
///
/// Headers outside the list are still emitted, but with their value replaced
/// by the redaction marker.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    names: HashSet<String>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header name; comparison is case-insensitive.
    pub fn insert(&mut self, name: impl AsRef<str>) {
        self.names.insert(name.as_ref().to_ascii_lowercase());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, name: impl AsRef<str>) -> Self {
        self.insert(name);
        self
    }

    pub fn contains(&self, name: &HeaderName) -> bool {
        // HeaderName is guaranteed lowercase.
        self.names.contains(name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for AllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = AllowList::new();
        for name in iter {
            list.insert(name);
        }
        list
    }
}

/// One immutable snapshot of tap configuration.
#[derive(Debug, Clone)]
pub struct TapConfig {
    /// Which fields are logged at all. Per-sink interest narrows this
    /// further; it never widens it.
    pub fields: FieldSet,
    /// Ceiling on captured request-body bytes. The request stream itself is
    /// unaffected past the ceiling.
    pub request_body_limit: usize,
    /// Ceiling on captured response-body bytes.
    pub response_body_limit: usize,
    /// Request headers the primary sink may show unredacted.
    pub request_headers: AllowList,
    /// Response headers the primary sink may show unredacted.
    pub response_headers: AllowList,
    /// Request headers the secondary (extended) sink may show unredacted.
    pub extended_request_headers: AllowList,
    /// Media types eligible for body capture and their text encodings.
    pub media_types: MediaTypeTable,
}

impl Default for TapConfig {
    fn default() -> Self {
        let request_headers: AllowList = [
            "accept",
            "accept-encoding",
            "accept-language",
            "content-length",
            "content-type",
            "host",
            "user-agent",
        ]
        .into_iter()
        .collect();
        Self {
            fields: FieldSet::REQUEST_LINE
                | FieldSet::REQUEST_HEADERS
                | FieldSet::RESPONSE_STATUS_CODE
                | FieldSet::RESPONSE_HEADERS,
            request_body_limit: 32 * 1024,
            response_body_limit: 32 * 1024,
            extended_request_headers: request_headers.clone(),
            request_headers,
            response_headers: ["content-length", "content-type"].into_iter().collect(),
            media_types: MediaTypeTable::default(),
        }
    }
}

/// Source of per-request configuration snapshots.
///
/// Implementations must be safe for unsynchronized concurrent reads; the
/// returned `Arc` is treated as immutable for the request's duration.
pub trait ConfigProvider: Send + Sync + 'static {
    fn snapshot(&self) -> Arc<TapConfig>;
}

/// Fixed configuration, set once at construction.
impl ConfigProvider for Arc<TapConfig> {
    fn snapshot(&self) -> Arc<TapConfig> {
        self.clone()
    }
}

/// Hot-reloadable configuration: `store` a new value between requests and
/// in-flight requests keep the snapshot they started with.
impl ConfigProvider for ArcSwap<TapConfig> {
    fn snapshot(&self) -> Arc<TapConfig> {
        self.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldSet;

    #[test]
    fn allow_list_is_case_insensitive() {
        let list = AllowList::new().with("Content-Type").with("X-Request-ID");
        assert!(list.contains(&HeaderName::from_static("content-type")));
        assert!(list.contains(&HeaderName::from_static("x-request-id")));
        assert!(!list.contains(&HeaderName::from_static("authorization")));
    }

    #[test]
    fn default_config_excludes_bodies() {
        let config = TapConfig::default();
        assert!(!config.fields.intersects(FieldSet::REQUEST_BODY));
        assert!(!config.fields.intersects(FieldSet::RESPONSE_BODY));
        assert!(config.fields.contains(FieldSet::REQUEST_LINE));
    }

    #[test]
    fn arc_swap_provider_swaps_between_snapshots() {
        let provider = ArcSwap::from_pointee(TapConfig::default());
        let before = provider.snapshot();

        let mut updated = TapConfig::default();
        updated.fields = FieldSet::ALL;
        provider.store(Arc::new(updated));

        let after = provider.snapshot();
        assert!(!before.fields.contains(FieldSet::RESPONSE_BODY));
        assert!(after.fields.contains(FieldSet::RESPONSE_BODY));
    }
}
