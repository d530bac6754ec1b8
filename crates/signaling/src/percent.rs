//! Percent-encoding for URL query components.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use crate::error::SignalingError;

/// Everything outside the RFC 3986 unreserved set gets escaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encodes a string for use as a query parameter value.
pub(crate) fn encode_component(input: &str) -> String {
    utf8_percent_encode(input, COMPONENT).to_string()
}

/// Reverses [`encode_component`].
///
/// Stray `%` sequences that do not form an escape pass through unchanged;
/// only invalid UTF-8 after decoding is an error.
pub(crate) fn decode_component(input: &str) -> Result<String, SignalingError> {
    percent_decode_str(input)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| SignalingError::InvalidEncoding(input.to_string()))
}
