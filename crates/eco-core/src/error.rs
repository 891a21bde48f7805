//! Custom error types for the control layer.
//!
//! `EcoError` is the framework-level error: alias bookkeeping, background
//! task handles, limit checks and the scan log. Device traits keep returning
//! `anyhow::Result` so drivers can attach context freely; an `EcoError`
//! converts into `anyhow::Error` with `?` wherever the two meet.
//!
//! ## Error Categories
//!
//! 1. **Registration** - `DuplicateAlias`, `DuplicateChannel`
//!    - Raised while building alias trees or a namespace
//!    - Permanent: the configuration has to change
//!
//! 2. **Motion / acquisition** - `LimitViolation`, `InvalidReading`, `Device`,
//!    `TaskPanicked`, `Timeout`
//!    - Raised while driving hardware
//!
//! 3. **Scan bookkeeping** - `FileExists`, `DuplicateFile`, `CheckerFailed`,
//!    `ScanAborted`, `Configuration`
//!
//! 4. **Wrapped sources** - `Io`, `Json`

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the framework error type.
pub type EcoResult<T> = std::result::Result<T, EcoError>;

/// Primary error type of the control layer.
#[derive(Error, Debug)]
pub enum EcoError {
    /// An alias with the same (full) name already exists.
    #[error("Alias '{name}' already exists")]
    DuplicateAlias {
        /// Offending alias name
        name: String,
    },

    /// A channel is already bound to another alias.
    #[error("Channel '{channel}' already registered as '{existing}'")]
    DuplicateChannel {
        /// Offending channel
        channel: String,
        /// Alias already holding the channel
        existing: String,
    },

    /// Target value lies outside the adjustable's soft limits.
    #[error("Value {value} of '{name}' outside limits [{low}, {high}]")]
    LimitViolation {
        /// Adjustable name
        name: String,
        /// Requested value
        value: f64,
        /// Lower limit
        low: f64,
        /// Upper limit
        high: f64,
    },

    /// A device reported NaN or an infinite value.
    #[error("Invalid reading from '{name}': {value}")]
    InvalidReading {
        /// Detector name
        name: String,
        /// Reported value
        value: f64,
    },

    /// Background work panicked or was cancelled before returning.
    #[error("Background task '{name}' did not complete: {reason}")]
    TaskPanicked {
        /// Task label
        name: String,
        /// Join error description
        reason: String,
    },

    /// The handle was already joined; its result has been handed out.
    #[error("Background task '{name}' was already joined")]
    AlreadyJoined {
        /// Task label
        name: String,
    },

    /// An operation did not finish in time.
    #[error("'{operation}' timed out after {timeout:?}")]
    Timeout {
        /// Operation label
        operation: String,
        /// Time waited
        timeout: Duration,
    },

    /// Semantic configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Refusing to overwrite an existing file.
    #[error("File already exists: {}", path.display())]
    FileExists {
        /// Existing file
        path: PathBuf,
    },

    /// Two counters of one step reported the same output file.
    #[error("Step {step}: '{}' written by more than one counter", path.display())]
    DuplicateFile {
        /// Zero-based step index
        step: usize,
        /// File reported twice
        path: PathBuf,
    },

    /// The checker kept reporting bad conditions.
    #[error("Checker reported bad conditions at step {step} after {repeats} repeats")]
    CheckerFailed {
        /// Zero-based step index
        step: usize,
        /// Acquisitions attempted
        repeats: u32,
    },

    /// Scan stopped on request.
    #[error("Scan '{file_name}' aborted after {completed_steps} steps")]
    ScanAborted {
        /// Scan file name
        file_name: String,
        /// Steps completed before the abort
        completed_steps: usize,
    },

    /// Device-side failure with context.
    #[error("Device '{name}' error: {message}")]
    Device {
        /// Device name
        name: String,
        /// Description
        message: String,
    },

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EcoError {
    /// Wrap any displayable device failure.
    pub fn device(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Device {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// True for failures that a retry of the same operation cannot fix.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::DuplicateAlias { .. }
                | Self::DuplicateChannel { .. }
                | Self::LimitViolation { .. }
                | Self::Configuration(_)
                | Self::FileExists { .. }
                | Self::DuplicateFile { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_limit_violation() {
        let err = EcoError::LimitViolation {
            name: "mono.energy".into(),
            value: 12.5,
            low: 0.0,
            high: 10.0,
        };
        assert_eq!(
            err.to_string(),
            "Value 12.5 of 'mono.energy' outside limits [0, 10]"
        );
        assert!(err.is_permanent());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: EcoError = io.into();
        assert!(matches!(err, EcoError::Io(_)));
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_into_anyhow_keeps_downcast() {
        let err: anyhow::Error = EcoError::DuplicateAlias { name: "x".into() }.into();
        assert!(matches!(
            err.downcast_ref::<EcoError>(),
            Some(EcoError::DuplicateAlias { .. })
        ));
    }
}
