//! Error types for checkpoint discovery and recovery.

use std::io;

use uuid::Uuid;

/// Errors produced while locating checkpoints or recovering from them.
///
/// Every variant is fatal to the recovery attempt: the store is left in an
/// undefined state and the caller is expected to exit or retry from scratch.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// No directory parsed as a usable checkpoint token.
    #[error("no usable checkpoint found")]
    NoCheckpoint,

    /// Checkpoint metadata exists but could not be parsed.
    #[error("corrupt checkpoint metadata for {token}: {reason}")]
    CorruptMetadata {
        /// Token of the offending checkpoint.
        token: Uuid,
        /// What failed to parse.
        reason: String,
    },

    /// The checkpoint folder lacks its `completed.dat` marker.
    #[error("checkpoint {token} has no completion marker")]
    MissingMarker {
        /// Token of the unfinished checkpoint.
        token: Uuid,
    },

    /// The index checkpoint's cut-point lies past the log checkpoint's tail.
    #[error(
        "index checkpoint cut-point {index_address} is ahead of log checkpoint tail {log_address}"
    )]
    Incompatible {
        /// Index snapshot cut-point.
        index_address: u64,
        /// Log snapshot tail.
        log_address: u64,
    },

    /// The device reported an I/O failure, or a completion never arrived.
    #[error("recovery I/O failed: {0}")]
    Io(#[from] io::Error),
}

impl RecoveryError {
    /// Wrap a metadata parse failure for `token`.
    pub fn corrupt(token: Uuid, err: impl std::fmt::Display) -> Self {
        Self::CorruptMetadata {
            token,
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let token = Uuid::nil();
        let err = RecoveryError::MissingMarker { token };
        assert!(err.to_string().contains("completion marker"));

        let err = RecoveryError::Incompatible {
            index_address: 10_000,
            log_address: 8_000,
        };
        assert!(err.to_string().contains("10000"));
        assert!(err.to_string().contains("8000"));
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "short read");
        let err: RecoveryError = io_err.into();
        assert!(matches!(err, RecoveryError::Io(_)));
    }
}
