//! Protocol error types

use thiserror::Error;

/// Frame-level errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Zero-length frame handed to the bridge
    #[error("Empty frame")]
    EmptyFrame,

    /// Frame length exceeds maximum allowed size
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Frame is shorter than the header being inspected
    #[error("Truncated frame: needed {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_too_large_error() {
        let err = ProtocolError::FrameTooLarge {
            size: 4096,
            max: 2048,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Frame too large"));
        assert!(msg.contains("4096"));
    }

    #[test]
    fn test_truncated_error() {
        let err = ProtocolError::Truncated {
            needed: 38,
            actual: 14,
        };
        assert_eq!(format!("{}", err), "Truncated frame: needed 38 bytes, got 14");
    }
}
