//! Client error types.

use respline_protocol::Reply;
use thiserror::Error;

/// Client errors.
///
/// `Protocol`, `Io` and `ConnectionClosed` are connection-wide: every request
/// still pending on the connection receives one. `Server`, `Capability`,
/// `Timeout` and `UnexpectedReply` concern a single command only.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] respline_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection is draining")]
    Draining,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("server error: {code} - {message}")]
    Server { code: String, message: String },

    #[error("capability unavailable: {0}")]
    Capability(String),

    #[error("unexpected reply to {command}: {reply:?}")]
    UnexpectedReply { command: String, reply: Reply },
}

impl ClientError {
    /// Builds a `Server` error from the text of an error reply.
    ///
    /// The code is the leading upper-case word (`ERR`, `WRONGTYPE`, ...).
    pub fn from_error_reply(text: &str) -> Self {
        match text.split_once(' ') {
            Some((code, message))
                if !code.is_empty() && code.chars().all(|c| c.is_ascii_uppercase()) =>
            {
                ClientError::Server {
                    code: code.to_string(),
                    message: message.to_string(),
                }
            }
            _ => ClientError::Server {
                code: "ERR".to_string(),
                message: text.to_string(),
            },
        }
    }

    pub(crate) fn unexpected(command: impl Into<String>, reply: Reply) -> Self {
        ClientError::UnexpectedReply {
            command: command.into(),
            reply,
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout | ClientError::ConnectionClosed
        )
    }

    /// Returns whether this error ended the connection it happened on.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Protocol(_) | ClientError::ConnectionClosed
        )
    }

    /// Returns whether the server rejected the command as unknown.
    pub fn is_unknown_command(&self) -> bool {
        match self {
            ClientError::Server { code, message } => {
                code == "ERR" && message.starts_with("unknown command")
            }
            _ => false,
        }
    }
}
