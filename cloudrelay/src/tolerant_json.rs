//! Parsing of JSON documents embedded in otherwise non-JSON provider payloads.
//!
//! Some provider responses are not guaranteed to start with valid JSON at offset 0 (a byte
//! order mark or a stray prefix), and some wrap the document in extra text. [`parse_embedded`]
//! locates the first opening delimiter, finds its balanced closing delimiter and parses only
//! that slice with `serde_json`.

use serde::de::DeserializeOwned;
use thiserror::Error;

/// The kind of JSON value expected inside the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// `{ ... }`
    Object,
    /// `[ ... ]`
    Array,
}

impl Delimiter {
    fn open(self) -> u8 {
        match self {
            Delimiter::Object => b'{',
            Delimiter::Array => b'[',
        }
    }

    fn close(self) -> u8 {
        match self {
            Delimiter::Object => b'}',
            Delimiter::Array => b']',
        }
    }
}

#[derive(Debug, Error)]
pub enum EmbeddedJsonError {
    #[error("no '{}' found in payload", char::from(.0.open()))]
    NoOpening(Delimiter),

    #[error("no closing '{}' found in payload", char::from(.0.close()))]
    Unterminated(Delimiter),

    #[error("embedded JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
}

/// Returns the slice of `raw` spanning the first `delimiter` value.
///
/// The end is the balanced closing delimiter, skipping delimiters inside string literals. When
/// the value never balances, the slice runs to the last closing delimiter instead so that the
/// JSON parser reports the actual syntax problem.
pub fn locate(raw: &str, delimiter: Delimiter) -> Result<&str, EmbeddedJsonError> {
    let bytes = raw.as_bytes();
    let (open, close) = (delimiter.open(), delimiter.close());

    let start = bytes
        .iter()
        .position(|b| *b == open)
        .ok_or(EmbeddedJsonError::NoOpening(delimiter))?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in bytes[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match *byte {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    // Delimiters are ASCII so both ends are char boundaries
                    return Ok(&raw[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    let end = bytes
        .iter()
        .rposition(|b| *b == close)
        .filter(|end| *end > start)
        .ok_or(EmbeddedJsonError::Unterminated(delimiter))?;

    Ok(&raw[start..=end])
}

/// Parse the first `delimiter` value embedded in `raw`.
pub fn parse_embedded<T: DeserializeOwned>(raw: &str, delimiter: Delimiter) -> Result<T, EmbeddedJsonError> {
    let slice = locate(raw, delimiter)?;
    Ok(serde_json::from_str(slice)?)
}
