//! Error types for core data handling

use thiserror::Error;

/// Codec failures while encoding or decoding stored bytes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encode failed: {reason}")]
    Encode { reason: String },

    #[error("Decode failed: {reason}")]
    Decode { reason: String },
}

/// Configuration parsing errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unknown region strategy: {value}")]
    UnknownStrategy { value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_display_decode() {
        let err = CodecError::Decode {
            reason: "unexpected end of input".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Decode failed"));
        assert!(msg.contains("unexpected end of input"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "expiration".to_string(),
            value: "soon".to_string(),
            reason: "must be whole seconds".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("expiration"));
        assert!(msg.contains("soon"));
        assert!(msg.contains("whole seconds"));
    }

    #[test]
    fn test_config_error_display_unknown_strategy() {
        let err = ConfigError::UnknownStrategy {
            value: "sometimes-clear".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Unknown region strategy"));
        assert!(msg.contains("sometimes-clear"));
    }
}
