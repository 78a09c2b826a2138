//! Allow-list based header redaction.

use axum::http::HeaderMap;

use crate::collector::{Field, FieldList};
use crate::config::AllowList;

/// Literal substituted for the value of any header not on the allow-list.
/// The header's name and position are always preserved; values are never
/// partially masked.
pub const REDACTED: &str = "[Redacted]";

/// Produce an ordered field list from `headers`, redacting values whose
/// names are not in `allow`. Each sink applies its own allow-list, so two
/// sinks may show different visibility of the same header collection.
pub(crate) fn filter_headers(headers: &HeaderMap, allow: &AllowList) -> FieldList {
    let mut fields = FieldList::with_capacity(headers.len());
    for (name, value) in headers {
        let value = if allow.contains(name) {
            match value.to_str() {
                Ok(text) => Some(text.to_owned()),
                // Opaque bytes in an allow-listed header: show lossily
                // rather than dropping the field.
                Err(_) => Some(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            }
        } else {
            Some(REDACTED.to_owned())
        };
        fields.push(Field::new(name.as_str().to_owned(), value));
    }
    fields
}
