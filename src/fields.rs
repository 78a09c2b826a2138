//! Bitmask selecting which pieces of request/response information are logged.
//!
//! The set is snapshotted once per request from the active [`TapConfig`] and
//! never mutated afterwards, so membership tests are plain bitwise ops with
//! no synchronization.
//!
//! [`TapConfig`]: crate::TapConfig

use std::fmt;
use std::ops::{BitAnd, BitOr};

/// A fixed-width set of loggable fields.
///
/// Combine the named constants with `|` and test membership with
/// [`FieldSet::contains`]:
///
/// ```rust
/// use tapline::FieldSet;
///
/// let fields = FieldSet::REQUEST_METHOD | FieldSet::REQUEST_PATH;
/// assert!(fields.contains(FieldSet::REQUEST_PATH));
/// assert!(!fields.contains(FieldSet::REQUEST_QUERY));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldSet(u16);

impl FieldSet {
    /// No fields selected.
    pub const NONE: FieldSet = FieldSet(0);

    /// Wall-clock timestamp of request arrival.
    pub const TIMESTAMP: FieldSet = FieldSet(1 << 0);
    /// Remote peer address.
    pub const CLIENT_IP: FieldSet = FieldSet(1 << 1);
    /// Local address the connection was accepted on.
    pub const SERVER_IP: FieldSet = FieldSet(1 << 2);
    /// Local port the connection was accepted on.
    pub const SERVER_PORT: FieldSet = FieldSet(1 << 3);
    /// HTTP protocol version, e.g. `HTTP/1.1`.
    pub const REQUEST_PROTOCOL: FieldSet = FieldSet(1 << 4);
    /// Request method.
    pub const REQUEST_METHOD: FieldSet = FieldSet(1 << 5);
    /// Request scheme (`http`/`https`).
    pub const REQUEST_SCHEME: FieldSet = FieldSet(1 << 6);
    /// Request path.
    pub const REQUEST_PATH: FieldSet = FieldSet(1 << 7);
    /// Raw query string.
    pub const REQUEST_QUERY: FieldSet = FieldSet(1 << 8);
    /// Request headers, subject to the sink's allow-list.
    pub const REQUEST_HEADERS: FieldSet = FieldSet(1 << 9);
    /// Request body snapshot, bounded by the configured limit.
    pub const REQUEST_BODY: FieldSet = FieldSet(1 << 10);
    /// Response status code.
    pub const RESPONSE_STATUS_CODE: FieldSet = FieldSet(1 << 11);
    /// Response headers, subject to the sink's allow-list.
    pub const RESPONSE_HEADERS: FieldSet = FieldSet(1 << 12);
    /// Response body snapshot, bounded by the configured limit.
    pub const RESPONSE_BODY: FieldSet = FieldSet(1 << 13);

    /// Connection-level fields that come from the transport, not the message.
    pub const CONNECTION_INFO: FieldSet = FieldSet(
        Self::TIMESTAMP.0 | Self::CLIENT_IP.0 | Self::SERVER_IP.0 | Self::SERVER_PORT.0,
    );

    /// The request-line fields, in their emission order.
    pub const REQUEST_LINE: FieldSet = FieldSet(
        Self::REQUEST_PROTOCOL.0
            | Self::REQUEST_METHOD.0
            | Self::REQUEST_SCHEME.0
            | Self::REQUEST_PATH.0
            | Self::REQUEST_QUERY.0,
    );

    /// Everything describing the request.
    pub const REQUEST: FieldSet =
        FieldSet(Self::REQUEST_LINE.0 | Self::REQUEST_HEADERS.0 | Self::REQUEST_BODY.0);

    /// Everything describing the response.
    pub const RESPONSE: FieldSet = FieldSet(
        Self::RESPONSE_STATUS_CODE.0 | Self::RESPONSE_HEADERS.0 | Self::RESPONSE_BODY.0,
    );

    /// All fields.
    pub const ALL: FieldSet =
        FieldSet(Self::CONNECTION_INFO.0 | Self::REQUEST.0 | Self::RESPONSE.0);

    /// True when every bit of `other` is present in `self`.
    pub const fn contains(self, other: FieldSet) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when at least one bit of `other` is present in `self`.
    pub const fn intersects(self, other: FieldSet) -> bool {
        self.0 & other.0 != 0
    }

    /// True when no field is selected.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for FieldSet {
    fn default() -> Self {
        FieldSet::NONE
    }
}

impl BitOr for FieldSet {
    type Output = FieldSet;

    fn bitor(self, rhs: FieldSet) -> FieldSet {
        FieldSet(self.0 | rhs.0)
    }
}

impl BitAnd for FieldSet {
    type Output = FieldSet;

    fn bitand(self, rhs: FieldSet) -> FieldSet {
        FieldSet(self.0 & rhs.0)
    }
}

impl fmt::Debug for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldSet({:#016b})", self.0)
    }
}
