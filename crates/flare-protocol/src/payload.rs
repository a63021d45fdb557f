//! Well-formedness checking for relayed payloads.
//!
//! The relay is deliberately opaque: a payload is forwarded iff it parses as
//! a single JSON object. Its keys and vocabulary are never inspected, so the
//! participants can evolve their message set without touching the server.

use thiserror::Error;

/// Why an inbound payload was rejected.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// Payload is not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Payload parsed, but not to an object.
    #[error("payload is not a JSON object")]
    NotObject,
}

/// Check that a payload is a well-formed wire message.
///
/// The caller drops rejected payloads silently; the error exists for log
/// detail, not for the sender.
///
/// # Errors
///
/// Returns an error if the payload is not a single JSON object.
pub fn check_well_formed(text: &str) -> Result<(), PayloadError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.is_object() {
        Ok(())
    } else {
        Err(PayloadError::NotObject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_objects() {
        assert!(check_well_formed(r#"{"type":"offer","sdp":"x"}"#).is_ok());
        assert!(check_well_formed("{}").is_ok());
        assert!(check_well_formed(r#"{"nested":{"candidate":null,"n":1}}"#).is_ok());
    }

    #[test]
    fn test_rejects_non_objects() {
        assert!(matches!(
            check_well_formed(r#"["a","b"]"#),
            Err(PayloadError::NotObject)
        ));
        assert!(matches!(check_well_formed("42"), Err(PayloadError::NotObject)));
        assert!(matches!(
            check_well_formed(r#""hangup""#),
            Err(PayloadError::NotObject)
        ));
    }

    #[test]
    fn test_rejects_invalid_json() {
        assert!(matches!(
            check_well_formed(r#"{"type":"offer""#),
            Err(PayloadError::Parse(_))
        ));
        assert!(matches!(check_well_formed(""), Err(PayloadError::Parse(_))));
        assert!(matches!(
            check_well_formed("not json"),
            Err(PayloadError::Parse(_))
        ));
    }
}
