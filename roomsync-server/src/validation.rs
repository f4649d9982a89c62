//! Input validation for untrusted data.
//!
//! All user-supplied input MUST be validated before use.
//! This module provides validators for common data types.

use thiserror::Error;

/// Maximum length for room codes.
pub const MAX_ROOM_CODE_LEN: usize = 64;
/// Maximum length for serialized SDP payloads.
pub const MAX_SDP_LEN: usize = 65536; // 64KB should be plenty
/// Maximum length for serialized ICE candidates.
pub const MAX_ICE_CANDIDATE_LEN: usize = 2048;
/// Maximum document text length.
pub const MAX_DOCUMENT_LEN: usize = 1_048_576; // 1MB
/// Maximum length for language tags.
pub const MAX_LANGUAGE_LEN: usize = 64;
/// Maximum length for track identifiers.
pub const MAX_TRACK_ID_LEN: usize = 256;
/// Maximum length for search queries.
pub const MAX_QUERY_LEN: usize = 512;
/// Maximum WebSocket message size.
pub const MAX_WS_MESSAGE_SIZE: usize = 1_048_576; // 1MB

/// Validation error types.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Room code exceeds maximum length.
    #[error("room code too long (max {MAX_ROOM_CODE_LEN} chars)")]
    RoomCodeTooLong,
    /// Room code contains invalid characters.
    #[error("room code contains invalid characters")]
    RoomCodeInvalidChars,
    /// SDP payload exceeds maximum length.
    #[error("SDP too long (max {MAX_SDP_LEN} bytes)")]
    SdpTooLong,
    /// ICE candidate exceeds maximum length.
    #[error("ICE candidate too long (max {MAX_ICE_CANDIDATE_LEN} bytes)")]
    IceCandidateTooLong,
    /// Document text exceeds maximum length.
    #[error("document too long (max {MAX_DOCUMENT_LEN} bytes)")]
    DocumentTooLong,
    /// Language tag exceeds maximum length.
    #[error("language tag too long (max {MAX_LANGUAGE_LEN} chars)")]
    LanguageTooLong,
    /// Track identifier exceeds maximum length.
    #[error("track id too long (max {MAX_TRACK_ID_LEN} chars)")]
    TrackIdTooLong,
    /// Search query exceeds maximum length.
    #[error("query too long (max {MAX_QUERY_LEN} chars)")]
    QueryTooLong,
    /// Playback position is not a finite non-negative number.
    #[error("position must be a finite non-negative number")]
    InvalidPosition,
    /// WebSocket message exceeds maximum size.
    #[error("message too large (max {MAX_WS_MESSAGE_SIZE} bytes)")]
    MessageTooLarge,
}

/// Check if a character is valid for room codes (alphanumeric, hyphen, or underscore).
fn is_valid_code_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

/// Validate a room code.
///
/// Valid room codes:
/// - 1-64 characters
/// - Alphanumeric, hyphen, underscore only
///
/// # Errors
///
/// Returns [`ValidationError::RoomCodeTooLong`] if the code exceeds 64 characters.
/// Returns [`ValidationError::RoomCodeInvalidChars`] if the code is empty or contains invalid characters.
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    if code.len() > MAX_ROOM_CODE_LEN {
        return Err(ValidationError::RoomCodeTooLong);
    }
    if code.is_empty() || !code.chars().all(is_valid_code_char) {
        return Err(ValidationError::RoomCodeInvalidChars);
    }
    Ok(())
}

/// Validate a serialized SDP payload.
///
/// Basic validation:
/// - Max length check (64KB)
///
/// Note: Full SDP parsing is complex; this catches obviously oversized data.
///
/// # Errors
///
/// Returns [`ValidationError::SdpTooLong`] if the payload exceeds 64KB.
pub fn validate_sdp(payload: &serde_json::Value) -> Result<(), ValidationError> {
    if serialized_len(payload) > MAX_SDP_LEN {
        return Err(ValidationError::SdpTooLong);
    }
    Ok(())
}

/// Validate a serialized ICE candidate.
///
/// # Errors
///
/// Returns [`ValidationError::IceCandidateTooLong`] if the candidate exceeds 2KB.
pub fn validate_ice_candidate(payload: &serde_json::Value) -> Result<(), ValidationError> {
    if serialized_len(payload) > MAX_ICE_CANDIDATE_LEN {
        return Err(ValidationError::IceCandidateTooLong);
    }
    Ok(())
}

/// Validate document text length.
///
/// # Errors
///
/// Returns [`ValidationError::DocumentTooLong`] if the text exceeds 1MB.
pub fn validate_document(text: &str) -> Result<(), ValidationError> {
    if text.len() > MAX_DOCUMENT_LEN {
        return Err(ValidationError::DocumentTooLong);
    }
    Ok(())
}

/// Validate a language tag.
///
/// # Errors
///
/// Returns [`ValidationError::LanguageTooLong`] if the tag exceeds 64 characters.
pub fn validate_language(language: &str) -> Result<(), ValidationError> {
    if language.len() > MAX_LANGUAGE_LEN {
        return Err(ValidationError::LanguageTooLong);
    }
    Ok(())
}

/// Validate a track identifier.
///
/// # Errors
///
/// Returns [`ValidationError::TrackIdTooLong`] if the identifier exceeds 256 characters.
pub fn validate_track_id(track: &str) -> Result<(), ValidationError> {
    if track.len() > MAX_TRACK_ID_LEN {
        return Err(ValidationError::TrackIdTooLong);
    }
    Ok(())
}

/// Validate a search query.
///
/// # Errors
///
/// Returns [`ValidationError::QueryTooLong`] if the query exceeds 512 characters.
pub fn validate_query(query: &str) -> Result<(), ValidationError> {
    if query.len() > MAX_QUERY_LEN {
        return Err(ValidationError::QueryTooLong);
    }
    Ok(())
}

/// Validate a playback position in seconds.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidPosition`] if the position is NaN,
/// infinite, or negative.
pub fn validate_position(position: f64) -> Result<(), ValidationError> {
    if !position.is_finite() || position < 0.0 {
        return Err(ValidationError::InvalidPosition);
    }
    Ok(())
}

/// Validate WebSocket message size.
///
/// # Errors
///
/// Returns [`ValidationError::MessageTooLarge`] if the message exceeds 1MB.
pub fn validate_message_size(size: usize) -> Result<(), ValidationError> {
    if size > MAX_WS_MESSAGE_SIZE {
        return Err(ValidationError::MessageTooLarge);
    }
    Ok(())
}

fn serialized_len(payload: &serde_json::Value) -> usize {
    serde_json::to_string(payload).map_or(0, |s| s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_room_codes() {
        assert!(validate_room_code("1234").is_ok());
        assert!(validate_room_code("my-room").is_ok());
        assert!(validate_room_code("room_123").is_ok());
        assert!(validate_room_code("a").is_ok());
        assert!(validate_room_code("ABC123").is_ok());
    }

    #[test]
    fn test_invalid_room_codes() {
        assert!(validate_room_code("").is_err());
        assert!(validate_room_code("has spaces").is_err());
        assert!(validate_room_code("has/slash").is_err());
        assert!(validate_room_code("../../../etc/passwd").is_err());
        assert!(validate_room_code(&"x".repeat(100)).is_err());
        assert!(validate_room_code("contains<script>").is_err());
    }

    #[test]
    fn test_room_code_boundary() {
        // Exactly at limit should pass
        let at_limit = "x".repeat(MAX_ROOM_CODE_LEN);
        assert!(validate_room_code(&at_limit).is_ok());

        // One over should fail
        let over_limit = "x".repeat(MAX_ROOM_CODE_LEN + 1);
        assert!(validate_room_code(&over_limit).is_err());
    }

    #[test]
    fn test_sdp_length() {
        assert!(validate_sdp(&serde_json::json!({"sdp": "v=0\r\n"})).is_ok());
        let big = serde_json::json!({"sdp": "x".repeat(MAX_SDP_LEN + 1)});
        assert!(validate_sdp(&big).is_err());
    }

    #[test]
    fn test_ice_candidate_length() {
        assert!(
            validate_ice_candidate(&serde_json::json!("candidate:1 1 UDP 2130706431")).is_ok()
        );
        let big = serde_json::json!("x".repeat(MAX_ICE_CANDIDATE_LEN + 1));
        assert!(validate_ice_candidate(&big).is_err());
    }

    #[test]
    fn test_document_length() {
        assert!(validate_document("print('hi')").is_ok());
        assert!(validate_document(&"x".repeat(MAX_DOCUMENT_LEN)).is_ok());
        assert!(validate_document(&"x".repeat(MAX_DOCUMENT_LEN + 1)).is_err());
    }

    #[test]
    fn test_position_values() {
        assert!(validate_position(0.0).is_ok());
        assert!(validate_position(4321.5).is_ok());
        assert!(validate_position(-1.0).is_err());
        assert!(validate_position(f64::NAN).is_err());
        assert!(validate_position(f64::INFINITY).is_err());
    }

    #[test]
    fn test_message_size() {
        assert!(validate_message_size(1000).is_ok());
        assert!(validate_message_size(MAX_WS_MESSAGE_SIZE).is_ok());
        assert!(validate_message_size(MAX_WS_MESSAGE_SIZE + 1).is_err());
    }

    #[test]
    fn test_error_messages() {
        let err = ValidationError::RoomCodeTooLong;
        assert!(err.to_string().contains("64"));

        let err = ValidationError::SdpTooLong;
        assert!(err.to_string().contains("65536"));

        let err = ValidationError::MessageTooLarge;
        assert!(err.to_string().contains("1048576"));
    }
}
