//! # respline-protocol
//!
//! RESP (REdis Serialization Protocol) wire codec for respline.
//!
//! This crate provides:
//! - `Command` request builder and array-of-bulk-strings encoding
//! - `Reply` tree covering every RESP2 reply type, null bulk and null array included
//! - Resumable, single-pass reply parsing that never consumes a partial frame
//! - Error types for malformed frames

pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
pub mod reply;

pub use codec::{Decoder, Encoder};
pub use command::{Command, IntoArg};
pub use error::ProtocolError;
pub use frame::parse;
pub use reply::Reply;

/// Default port for Redis-compatible servers.
pub const DEFAULT_PORT: u16 = 6379;

/// Maximum bulk string payload accepted from a server (512 MiB).
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Maximum length of a single `+`, `-`, `:`, `$` or `*` header line (64 KiB).
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Maximum array nesting depth accepted from a server.
pub const MAX_DEPTH: usize = 32;
