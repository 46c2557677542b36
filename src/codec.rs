//! Wire-format codec for the remote extractor's replies.
//!
//! The extractor wraps its JSON payload between literal `###` delimiters so
//! it survives being embedded in arbitrary diagnostic HTML or plain text.
//! Some phases reply with bare JSON instead, so decoding falls back to
//! parsing the whole body before giving up.

use serde::Deserialize;
use thiserror::Error;

/// Delimiter surrounding the JSON payload in a wrapped reply.
const PAYLOAD_DELIMITER: &str = "###";

/// Decoded reply from the remote extractor.
///
/// Each protocol phase populates a different subset of fields, so everything
/// beyond `status` is optional.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct DecodedReply {
    /// Whether the remote tool reports the phase as successful.
    #[serde(default)]
    pub status: bool,
    /// Opaque continuation token echoed back on the next call. Must never be
    /// synthesised or modified locally.
    #[serde(default)]
    pub factory: Option<String>,
    /// Whether the extraction has reached its terminal state.
    #[serde(default)]
    pub done: Option<bool>,
    /// Cumulative number of files processed so far.
    #[serde(default)]
    pub files: Option<u64>,
    /// Cumulative number of bytes written so far.
    #[serde(default, rename = "bytesOut")]
    pub bytes_out: Option<u64>,
    /// Human-readable status message, when the tool provides one.
    #[serde(default)]
    pub message: Option<String>,
    /// Human-readable error description, when the tool provides one.
    #[serde(default)]
    pub error: Option<String>,
}

impl DecodedReply {
    /// Returns the best human-readable failure text the reply carries.
    ///
    /// Prefers `message` over `error`; falls back to a generic description
    /// when the tool supplied neither.
    #[must_use]
    pub fn failure_text(&self) -> String {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or("remote extractor reported failure without detail")
            .to_owned()
    }
}

/// Raised when a reply body cannot be understood.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unparsable extractor reply: {detail}")]
pub struct DecodeError {
    /// Parser error from the last decode attempt.
    pub detail: String,
    /// Raw reply body, kept verbatim for diagnostics.
    pub raw: String,
}

/// Decodes a raw reply body into a [`DecodedReply`].
///
/// Searches for the first `###`…`###` delimited region and parses its
/// interior as JSON; when no delimited region exists the entire body is
/// parsed instead. This function never panics: any unparsable input is
/// returned as a [`DecodeError`] carrying the raw text.
///
/// # Errors
///
/// Returns [`DecodeError`] when neither the delimited region nor the whole
/// body is valid JSON.
pub fn decode(raw: &str) -> Result<DecodedReply, DecodeError> {
    let candidate = delimited_payload(raw).unwrap_or(raw);
    serde_json::from_str(candidate).map_err(|err| DecodeError {
        detail: err.to_string(),
        raw: raw.to_owned(),
    })
}

/// Extracts the interior of the first delimited region, if any.
fn delimited_payload(raw: &str) -> Option<&str> {
    let open = raw.find(PAYLOAD_DELIMITER)?;
    let interior = raw.get(open + PAYLOAD_DELIMITER.len()..)?;
    let close = interior.find(PAYLOAD_DELIMITER)?;
    interior.get(..close)
}
