//! Content-type to text-encoding resolution.
//!
//! Body snapshots are only captured when the message's content-type maps to a
//! known text encoding; binary or unknown media types are skipped (with a
//! warning record) rather than logged as garbage.

use axum::http::HeaderValue;
use mime::Mime;
use std::collections::HashMap;

/// Text encodings the tap knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// Strict UTF-8; invalid byte sequences are a [`DecodeError`], never
    /// replaced with substitution characters.
    Utf8,
    /// ISO-8859-1; every byte maps to a char, decoding cannot fail.
    Latin1,
}

/// Captured bytes could not be decoded with the resolved encoding.
#[derive(Debug, Clone, thiserror::Error)]
#[error("captured body is not valid {encoding:?} (error at byte {valid_up_to})")]
pub struct DecodeError {
    pub encoding: TextEncoding,
    pub valid_up_to: usize,
}

impl TextEncoding {
    /// Decode `bytes` into owned text. Strict: no lossy substitution.
    pub fn decode(self, bytes: &[u8]) -> Result<String, DecodeError> {
        match self {
            TextEncoding::Utf8 => match std::str::from_utf8(bytes) {
                Ok(text) => Ok(text.to_owned()),
                Err(e) => Err(DecodeError {
                    encoding: self,
                    valid_up_to: e.valid_up_to(),
                }),
            },
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

/// Maps media-type essences (e.g. `application/json`) to text encodings.
///
/// An explicit `charset` parameter on the content-type wins over the table;
/// an unrecognized charset resolves to nothing, which disables body capture
/// for that message.
#[derive(Debug, Clone)]
pub struct MediaTypeTable {
    entries: HashMap<String, TextEncoding>,
}

impl MediaTypeTable {
    /// An empty table; nothing resolves until entries are added.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a media type, replacing any previous entry.
    pub fn insert(&mut self, essence: impl Into<String>, encoding: TextEncoding) {
        self.entries.insert(essence.into().to_ascii_lowercase(), encoding);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, essence: impl Into<String>, encoding: TextEncoding) -> Self {
        self.insert(essence, encoding);
        self
    }

    /// Resolve a raw `Content-Type` header value to an encoding, if any.
    pub fn resolve(&self, content_type: Option<&HeaderValue>) -> Option<TextEncoding> {
        let raw = content_type?.to_str().ok()?;
        let mime: Mime = raw.trim().parse().ok()?;

        if let Some(charset) = mime.get_param(mime::CHARSET) {
            return match charset.as_str().to_ascii_lowercase().as_str() {
                "utf-8" | "us-ascii" => Some(TextEncoding::Utf8),
                "iso-8859-1" | "latin1" => Some(TextEncoding::Latin1),
                _ => None,
            };
        }

        self.entries.get(mime.essence_str()).copied()
    }
}

impl Default for MediaTypeTable {
    /// The stock table: common text media types, all assumed UTF-8.
    fn default() -> Self {
        Self::empty()
            .with("text/plain", TextEncoding::Utf8)
            .with("text/html", TextEncoding::Utf8)
            .with("text/css", TextEncoding::Utf8)
            .with("text/xml", TextEncoding::Utf8)
            .with("application/json", TextEncoding::Utf8)
            .with("application/xml", TextEncoding::Utf8)
            .with("application/x-www-form-urlencoded", TextEncoding::Utf8)
    }
}
