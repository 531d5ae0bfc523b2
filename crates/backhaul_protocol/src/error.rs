//! Error types shared by every part of the protocol engine.
//!
//! Each variant maps onto an [`ErrorKind`], and each kind owns a fixed wire
//! code so errors survive the trip from a worker back to the controller.

use strum_macros::{AsRefStr, Display};
use thiserror::Error;

/// Closed table of error kinds that travel over the wire as integer codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum ErrorKind {
    #[strum(serialize = "AssertError")]
    Assert,
    #[strum(serialize = "FormatError")]
    Format,
    #[strum(serialize = "OptionInvalidError")]
    OptionInvalid,
    #[strum(serialize = "ProtocolError")]
    Protocol,
    #[strum(serialize = "FileReadError")]
    FileRead,
    #[strum(serialize = "FileWriteError")]
    FileWrite,
    #[strum(serialize = "ProtocolTimeoutError")]
    ProtocolTimeout,
    #[strum(serialize = "HostInvalidError")]
    HostInvalid,
    #[strum(serialize = "ExecuteError")]
    Execute,
    #[strum(serialize = "UnknownError")]
    Unknown,
}

impl ErrorKind {
    pub const fn code(&self) -> i64 {
        match self {
            ErrorKind::Assert => 25,
            ErrorKind::Format => 29,
            ErrorKind::OptionInvalid => 31,
            ErrorKind::Protocol => 39,
            ErrorKind::FileRead => 42,
            ErrorKind::FileWrite => 43,
            ErrorKind::ProtocolTimeout => 62,
            ErrorKind::HostInvalid => 72,
            ErrorKind::Execute => 101,
            ErrorKind::Unknown => 122,
        }
    }

    /// Maps a wire code back to a kind. Codes outside the table are generic.
    pub fn from_code(code: i64) -> Self {
        match code {
            25 => ErrorKind::Assert,
            29 => ErrorKind::Format,
            31 => ErrorKind::OptionInvalid,
            39 => ErrorKind::Protocol,
            42 => ErrorKind::FileRead,
            43 => ErrorKind::FileWrite,
            62 => ErrorKind::ProtocolTimeout,
            72 => ErrorKind::HostInvalid,
            101 => ErrorKind::Execute,
            _ => ErrorKind::Unknown,
        }
    }
}

/// Main error type for all protocol operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A line did not parse as a well-formed frame.
    #[error("{0}")]
    Framing(String),

    /// A well-formed frame broke the session contract (greeting checks).
    #[error("{0}")]
    Protocol(String),

    /// The server has no handler for the command.
    #[error("invalid command '{0}'")]
    UnknownCommand(String),

    /// The worker reported a command failure.
    #[error("{message}")]
    Remote {
        kind: ErrorKind,
        code: i64,
        message: String,
    },

    /// A worker process failed to start or exited unexpectedly.
    #[error("{0}")]
    Execute(String),

    /// Illegal job state transition.
    #[error("{0}")]
    State(String),

    /// A command that needs the repository host ran somewhere else.
    #[error("{0}")]
    HostInvalid(String),

    /// Any other contract violation by the caller or the peer.
    #[error("{0}")]
    Assert(String),

    /// No data arrived within the protocol timeout.
    #[error("{0}")]
    Timeout(String),

    /// Reading from a session stream failed or hit eof.
    #[error("{0}")]
    Read(String),

    /// Writing to a session stream failed.
    #[error("{0}")]
    Write(String),

    /// Invalid or missing configuration.
    #[error("{0}")]
    Option(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Framing(_) => ErrorKind::Format,
            Error::Protocol(_) | Error::UnknownCommand(_) => ErrorKind::Protocol,
            Error::Remote { kind, .. } => *kind,
            Error::Execute(_) => ErrorKind::Execute,
            Error::State(_) | Error::Assert(_) => ErrorKind::Assert,
            Error::HostInvalid(_) => ErrorKind::HostInvalid,
            Error::Timeout(_) => ErrorKind::ProtocolTimeout,
            Error::Read(_) => ErrorKind::FileRead,
            Error::Write(_) => ErrorKind::FileWrite,
            Error::Option(_) => ErrorKind::OptionInvalid,
        }
    }

    /// Wire code for this error. Remote errors keep the code the worker sent.
    pub fn code(&self) -> i64 {
        match self {
            Error::Remote { code, .. } => *code,
            other => other.kind().code(),
        }
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_the_table() {
        for kind in [
            ErrorKind::Assert,
            ErrorKind::Format,
            ErrorKind::OptionInvalid,
            ErrorKind::Protocol,
            ErrorKind::FileRead,
            ErrorKind::FileWrite,
            ErrorKind::ProtocolTimeout,
            ErrorKind::HostInvalid,
            ErrorKind::Execute,
            ErrorKind::Unknown,
        ] {
            assert_eq!(ErrorKind::from_code(kind.code()), kind);
        }
    }

    #[test]
    fn unmapped_code_is_generic() {
        assert_eq!(ErrorKind::from_code(255), ErrorKind::Unknown);
        assert_eq!(ErrorKind::from_code(-1), ErrorKind::Unknown);
    }

    #[test]
    fn remote_error_keeps_its_code() {
        let err = Error::Remote {
            kind: ErrorKind::Unknown,
            code: 255,
            message: "boom".into(),
        };
        assert_eq!(err.code(), 255);
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(Error::UnknownCommand("bogus".into()).code(), 39);
        assert_eq!(Error::UnknownCommand("bogus".into()).to_string(), "invalid command 'bogus'");
        assert_eq!(ErrorKind::Assert.to_string(), "AssertError");
    }
}
