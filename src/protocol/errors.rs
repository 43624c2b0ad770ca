use thiserror::Error;

/// Errors raised by the command side of the protocol.
///
/// The frame decoder never returns these; malformed frames degrade to the
/// baseline snapshot instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Operation name not recognised by the command encoder.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A status byte supplied as text was not exactly two hex digits.
    #[error("invalid status byte: {0:?}")]
    InvalidStatusByte(String),
}
