//! Binary/text classification and strict UTF-8 decoding
//!
//! Both are collaborators of the reconciler and sit behind traits so hosts
//! can plug in their own detection. The defaults follow the usual
//! "look at the first chunk" heuristic.

use mirror_core::DecodeError;

/// Decides whether a payload is binary
pub trait Classifier: Send + Sync {
    /// Inspect at most `lookahead` leading bytes of `bytes`
    fn is_binary(&self, bytes: &[u8], lookahead: usize) -> bool;
}

/// Turns text payloads into strings
pub trait Decoder: Send + Sync {
    /// Decode the full buffer, failing on any invalid sequence
    fn decode_utf8_strict(&self, bytes: &[u8]) -> Result<String, DecodeError>;
}

/// Look-ahead window classifier
///
/// A payload is binary when its leading window contains an invalid UTF-8
/// sequence, a U+FFFD replacement character, or a control character at or
/// below U+0008 (NUL, backspace and friends). Tabs, newlines and carriage
/// returns are text.
///
/// A multi-byte character cut off by the window edge is ignored rather than
/// counted as invalid, so text whose window ends mid-character stays text.
#[derive(Debug, Clone, Copy, Default)]
pub struct LookaheadClassifier;

impl Classifier for LookaheadClassifier {
    fn is_binary(&self, bytes: &[u8], lookahead: usize) -> bool {
        let window = &bytes[..bytes.len().min(lookahead)];

        let text = match std::str::from_utf8(window) {
            Ok(text) => text,
            // A multi-byte character cut by the window edge is not evidence of binary
            Err(e) if e.error_len().is_none() => {
                match std::str::from_utf8(&window[..e.valid_up_to()]) {
                    Ok(text) => text,
                    Err(_) => return true,
                }
            }
            Err(_) => return true,
        };

        text.chars()
            .any(|c| c == char::REPLACEMENT_CHARACTER || (c as u32) <= 8)
    }
}

/// Fail-on-invalid UTF-8 decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictUtf8Decoder;

impl Decoder for StrictUtf8Decoder {
    fn decode_utf8_strict(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        Ok(std::str::from_utf8(bytes)?.to_owned())
    }
}
