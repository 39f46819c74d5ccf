//! Error types shared across the protocols, the service layer and the server.

use crate::protocols::{
    FieldIdentifier, InputProtocol, OutputProtocol, StructIdentifier, TType, WireStruct,
};
use std::fmt;

/// Errors raised while encoding or decoding a Thrift message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The buffer ended before the message did. More bytes may complete it.
    #[error("incomplete message")]
    Incomplete,

    /// The bytes do not form a valid message for this protocol.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A container or string declared a negative length.
    #[error("negative size: {0}")]
    NegativeSize(i64),

    /// The message header carries an unsupported protocol version.
    #[error("bad protocol version: {0:#x}")]
    BadVersion(u32),

    /// A declared length is larger than anything the buffer could hold.
    #[error("size limit exceeded ({size}, max {max})")]
    SizeLimit { size: usize, max: usize },

    /// Nested structures went deeper than the skip limit.
    #[error("maximum nesting depth exceeded")]
    DepthLimit,

    /// A type id on the wire is not a known Thrift type.
    #[error("unknown type id {0}")]
    UnknownType(u8),
}

impl ProtocolError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ProtocolError::InvalidData(message.into())
    }
}

pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Kinds of application-level failures carried in an `EXCEPTION` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationErrorKind {
    Unknown,
    UnknownMethod,
    InvalidMessageType,
    WrongMethodName,
    BadSequenceId,
    MissingResult,
    InternalError,
    ProtocolError,
    InvalidTransform,
    InvalidProtocol,
    UnsupportedClientType,
}

impl ApplicationErrorKind {
    pub fn code(self) -> i32 {
        match self {
            ApplicationErrorKind::Unknown => 0,
            ApplicationErrorKind::UnknownMethod => 1,
            ApplicationErrorKind::InvalidMessageType => 2,
            ApplicationErrorKind::WrongMethodName => 3,
            ApplicationErrorKind::BadSequenceId => 4,
            ApplicationErrorKind::MissingResult => 5,
            ApplicationErrorKind::InternalError => 6,
            ApplicationErrorKind::ProtocolError => 7,
            ApplicationErrorKind::InvalidTransform => 8,
            ApplicationErrorKind::InvalidProtocol => 9,
            ApplicationErrorKind::UnsupportedClientType => 10,
        }
    }

    /// Unrecognized codes collapse to `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ApplicationErrorKind::UnknownMethod,
            2 => ApplicationErrorKind::InvalidMessageType,
            3 => ApplicationErrorKind::WrongMethodName,
            4 => ApplicationErrorKind::BadSequenceId,
            5 => ApplicationErrorKind::MissingResult,
            6 => ApplicationErrorKind::InternalError,
            7 => ApplicationErrorKind::ProtocolError,
            8 => ApplicationErrorKind::InvalidTransform,
            9 => ApplicationErrorKind::InvalidProtocol,
            10 => ApplicationErrorKind::UnsupportedClientType,
            _ => ApplicationErrorKind::Unknown,
        }
    }
}

/// The framework-level exception returned to a client instead of a result.
///
/// On the wire this is a struct named `TApplicationException` with
/// `1: string message` and `2: i32 type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationError {
    pub kind: ApplicationErrorKind,
    pub message: String,
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "application error ({:?})", self.kind)
        } else {
            write!(f, "application error ({:?}): {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for ApplicationError {}

impl ApplicationError {
    pub fn new(kind: ApplicationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl WireStruct for ApplicationError {
    fn read(input: &mut dyn InputProtocol) -> ProtocolResult<Self> {
        let mut message = String::new();
        let mut kind = ApplicationErrorKind::Unknown;

        input.read_struct_begin()?;
        loop {
            let field = input.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.resolve_id(&[(1, "message"), (2, "type")]) {
                Some(1) if field.carries(TType::String) => {
                    message = input.read_string()?;
                }
                Some(2) if field.carries(TType::I32) => {
                    kind = ApplicationErrorKind::from_code(input.read_i32()?);
                }
                _ => input.skip(field.field_type)?,
            }
            input.read_field_end()?;
        }
        input.read_struct_end()?;

        Ok(Self { kind, message })
    }

    fn write(&self, output: &mut dyn OutputProtocol) -> ProtocolResult<()> {
        output.write_struct_begin(&StructIdentifier::new("TApplicationException"))?;
        output.write_field_begin(&FieldIdentifier::new("message", TType::String, 1))?;
        output.write_string(&self.message)?;
        output.write_field_end()?;
        output.write_field_begin(&FieldIdentifier::new("type", TType::I32, 2))?;
        output.write_i32(self.kind.code())?;
        output.write_field_end()?;
        output.write_field_stop()?;
        output.write_struct_end()
    }
}

/// Top-level error for the server and the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Application(#[from] ApplicationError),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("connection closed mid-message")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_round_trip() {
        for code in 0..=10 {
            assert_eq!(ApplicationErrorKind::from_code(code).code(), code);
        }
        assert_eq!(
            ApplicationErrorKind::from_code(42),
            ApplicationErrorKind::Unknown
        );
    }

    #[test]
    fn test_display() {
        let err = ApplicationError::new(
            ApplicationErrorKind::UnknownMethod,
            "Invalid method name: 'ping'",
        );
        assert_eq!(
            err.to_string(),
            "application error (UnknownMethod): Invalid method name: 'ping'"
        );
    }
}
