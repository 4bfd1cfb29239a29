//! # Playback Error Types
//!
//! Error taxonomy for opening sources, building stream providers, seeking and
//! decoding.

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur while bridging a container to the host.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Argument Errors
    // ========================================================================
    /// The caller supplied an unusable source or configuration.
    #[error("Invalid argument: {0}")]
    ArgumentInvalid(String),

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// A context, resampler, scaler or buffer could not be allocated.
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    // ========================================================================
    // Open Errors
    // ========================================================================
    /// The container could not be opened or its streams read.
    #[error("Failed to open media: {0}")]
    OpenFailed(String),

    /// No decoder exists for a stream's codec.
    #[error("No decoder available: {0}")]
    DecodeUnavailable(String),

    // ========================================================================
    // Seek Errors
    // ========================================================================
    /// The container rejected a seek, or there is nothing to seek.
    #[error("Seek failed: {0}")]
    SeekFailed(String),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// I/O error from the host byte source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error reported by the demux/decode library.
    #[error("Decode library error: {0}")]
    Backend(String),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if this error aborts opening a session outright.
    pub fn is_construction_failure(&self) -> bool {
        matches!(
            self,
            PlaybackError::ArgumentInvalid(_)
                | PlaybackError::OpenFailed(_)
                | PlaybackError::OutOfMemory(_)
        )
    }

    /// Returns `true` if the session stays usable after this error.
    ///
    /// Per-stream failures drop only that stream; seek failures leave
    /// provider state untouched.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PlaybackError::DecodeUnavailable(_)
                | PlaybackError::SeekFailed(_)
                | PlaybackError::Backend(_)
                | PlaybackError::Io(_)
        )
    }
}

impl From<BridgeError> for PlaybackError {
    fn from(err: BridgeError) -> Self {
        PlaybackError::Io(err.into())
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
