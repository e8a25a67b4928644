//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors raised while decoding RESP replies.
///
/// Every variant describes a frame that can never become valid by reading
/// more bytes; an incomplete frame is not an error. A connection that sees
/// one of these has lost reply alignment and must not be used further.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid reply type byte: {0:#04x}")]
    InvalidTypeByte(u8),

    #[error("invalid integer in reply: {0:?}")]
    InvalidInteger(String),

    #[error("invalid length in reply: {0}")]
    InvalidLength(i64),

    #[error("bulk string too large: {size} bytes (max {max})")]
    BulkTooLarge { size: i64, max: i64 },

    #[error("reply line too long (max {max} bytes)")]
    LineTooLong { max: usize },

    #[error("bulk string not terminated by CRLF")]
    MissingCrlf,

    #[error("invalid UTF-8 in status or error line")]
    InvalidUtf8,

    #[error("reply nesting deeper than {max} levels")]
    NestingTooDeep { max: usize },

    #[error("reply received with no request pending")]
    UnsolicitedReply,
}
