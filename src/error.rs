// src/error.rs

use std::fmt;
use std::path::PathBuf;

use crate::store::lease::LeaseKind;

pub type Result<T> = std::result::Result<T, WaveError>;

#[derive(Debug, thiserror::Error)]
pub enum WaveError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("permission to use the audio device was denied: {0}")]
    PermissionDenied(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported or malformed clip: {0}")]
    Format(String),

    #[error("operation not valid in the current state: {0}")]
    InvalidState(String),

    #[error("{} is already leased for {held}", path.display())]
    LeaseConflict { path: PathBuf, held: LeaseKind },
}

/// Copyable tag carried by `on_error` notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DeviceUnavailable,
    PermissionDenied,
    Io,
    Format,
    InvalidState,
    LeaseConflict,
}

impl WaveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WaveError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            WaveError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            WaveError::Io(_) => ErrorKind::Io,
            WaveError::Format(_) => ErrorKind::Format,
            WaveError::InvalidState(_) => ErrorKind::InvalidState,
            WaveError::LeaseConflict { .. } => ErrorKind::LeaseConflict,
        }
    }

    /// Permission denial is a device failure too, it is only reported apart for messaging.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            WaveError::DeviceUnavailable(_) | WaveError::PermissionDenied(_)
        )
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        WaveError::InvalidState(msg.into())
    }
}

impl From<hound::Error> for WaveError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => WaveError::Io(e),
            other => WaveError::Format(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::DeviceUnavailable => "device unavailable",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::Io => "i/o",
            ErrorKind::Format => "format",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::LeaseConflict => "lease conflict",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hound_io_errors_stay_io() {
        let e: WaveError = hound::Error::IoError(std::io::Error::other("disk gone")).into();
        assert_eq!(e.kind(), ErrorKind::Io);
    }

    #[test]
    fn hound_header_errors_become_format() {
        let e: WaveError = hound::Error::FormatError("no RIFF tag found").into();
        assert_eq!(e.kind(), ErrorKind::Format);
        let e: WaveError = hound::Error::Unsupported.into();
        assert_eq!(e.kind(), ErrorKind::Format);
    }

    #[test]
    fn permission_denied_counts_as_device_error() {
        assert!(WaveError::PermissionDenied("mic".into()).is_device_error());
        assert!(!WaveError::Format("x".into()).is_device_error());
    }
}
