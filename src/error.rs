//! Error types for the synchronization engine.
//!
//! The taxonomy follows the layers of the engine:
//!
//! - **`TransportError`**: connection and I/O failures reported by a
//!   [`Transport`](crate::transport::Transport). Every variant that originates in
//!   the native driver carries its [`DriverStatus`].
//! - **`ConversionError`**: the only fallible unit conversion is the
//!   frequency/period inversion at exactly zero.
//! - **`ApplyError`** / **`RefreshError`**: aggregate wrappers over the per-field
//!   failures collected by a best-effort apply or refresh pass. They never abort
//!   the pass; they report what did not make it.
//! - **`ConfigError`**: configuration loading and validation.

use std::fmt;
use thiserror::Error;

/// Status reported by the native instrument driver.
///
/// `code` is the raw library status (negative values are errors in VISA);
/// `description` is the human-readable text the library or simulator attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverStatus {
    /// Raw status code from the native library.
    pub code: i32,
    /// Human-readable description of the status.
    pub description: String,
}

impl DriverStatus {
    /// Create a status from a code and description.
    pub fn new(code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status {:#x})", self.description, self.code)
    }
}

/// Why a write or read did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoFailure {
    /// No instrument handle is open.
    #[error("not connected")]
    NotConnected,

    /// The driver reported a non-success status.
    #[error("{0}")]
    Status(DriverStatus),

    /// The driver accepted fewer bytes than the command length.
    #[error("short write ({written} of {expected} bytes)")]
    ShortWrite {
        /// Bytes the driver reported as written.
        written: usize,
        /// Bytes handed to the driver.
        expected: usize,
    },
}

/// Failures of the transport session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("resource manager unavailable: {status}")]
    ResourceManagerUnavailable { status: DriverStatus },

    #[error("failed to open instrument '{resource}': {status}")]
    InstrumentOpenFailed {
        resource: String,
        status: DriverStatus,
    },

    #[error("write of '{command}' failed: {reason}")]
    WriteFailed { command: String, reason: IoFailure },

    #[error("read after '{command}' failed: {reason}")]
    ReadFailed { command: String, reason: IoFailure },

    #[error("failed to close {handle}: {status}")]
    CloseFailed { handle: String, status: DriverStatus },

    #[error("shared transport worker is no longer running")]
    ActorUnavailable,
}

/// Unit conversion failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("cannot invert zero between frequency and period")]
    DivideByZero,
}

/// Why a single field could not be synchronized.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldFailureCause {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("unparseable response '{0}'")]
    Unparseable(String),
}

/// One field that failed during an apply or refresh pass.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {cause}")]
pub struct FieldFailure {
    /// Logical field name, e.g. `frequency` or `output`.
    pub field: &'static str,
    /// What went wrong.
    pub cause: FieldFailureCause,
}

impl FieldFailure {
    /// Build a failure for `field`.
    pub fn new(field: &'static str, cause: impl Into<FieldFailureCause>) -> Self {
        Self {
            field,
            cause: cause.into(),
        }
    }
}

/// Aggregate error of an apply pass. At least one failure is always present.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct ApplyError {
    /// 1-based channel index.
    pub channel: u8,
    /// Number of commands the pass attempted.
    pub attempted: usize,
    /// Failures in the order they occurred.
    pub failures: Vec<FieldFailure>,
}

impl ApplyError {
    /// The first failure encountered.
    pub fn first(&self) -> Option<&FieldFailure> {
        self.failures.first()
    }
}

/// Aggregate error of a refresh pass. At least one failure is always present.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct RefreshError {
    /// 1-based channel index.
    pub channel: u8,
    /// Number of queries the pass attempted.
    pub attempted: usize,
    /// Failures in the order they occurred.
    pub failures: Vec<FieldFailure>,
}

impl RefreshError {
    /// The first failure encountered.
    pub fn first(&self) -> Option<&FieldFailure> {
        self.failures.first()
    }
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "apply on channel {}: {} of {} commands failed",
            self.channel,
            self.failures.len(),
            self.attempted
        )?;
        match self.first() {
            Some(first) => write!(f, ", first: {first}"),
            None => Ok(()),
        }
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "refresh on channel {}: {} of {} queries failed",
            self.channel,
            self.failures.len(),
            self.attempted
        )?;
        match self.first() {
            Some(first) => write!(f, ", first: {first}"),
            None => Ok(()),
        }
    }
}

/// Rejected edit event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("no channel {0}")]
    UnknownChannel(u8),

    #[error("channel {channel} ({family}) has no field '{field}'")]
    UnknownField {
        channel: u8,
        family: &'static str,
        field: String,
    },
}

/// Failure of an engine-level synchronization request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Refresh(#[from] RefreshError),
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Configuration serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::InstrumentOpenFailed {
            resource: "USB0::0x1AB1::0x0642::DG1ZA0001::INSTR".to_string(),
            status: DriverStatus::new(-1073807343, "resource not found"),
        };
        let text = err.to_string();
        assert!(text.contains("DG1ZA0001"));
        assert!(text.contains("resource not found"));
    }

    #[test]
    fn test_write_failed_not_connected() {
        let err = TransportError::WriteFailed {
            command: "SOUR1:FREQ 1000".to_string(),
            reason: IoFailure::NotConnected,
        };
        assert_eq!(err.to_string(), "write of 'SOUR1:FREQ 1000' failed: not connected");
    }

    #[test]
    fn test_apply_error_reports_first_failure() {
        let err = ApplyError {
            channel: 2,
            attempted: 6,
            failures: vec![
                FieldFailure::new("frequency", ConversionError::DivideByZero),
                FieldFailure::new("output", FieldFailureCause::Unparseable("??".into())),
            ],
        };
        assert_eq!(err.first().map(|f| f.field), Some("frequency"));
        let text = err.to_string();
        assert!(text.contains("2 of 6"));
        assert!(text.contains("frequency"));
    }
}
