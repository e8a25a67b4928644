//! Decoded reply tree.

use bytes::{BufMut, Bytes, BytesMut};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::fmt;

/// A RESP2 reply.
///
/// Null bulk strings (`$-1`) and null arrays (`*-1`) are kept as `None`
/// rather than folded into empty values: the geo commands use them to
/// report members that do not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Status reply: `+OK\r\n`
    Simple(String),
    /// Error reply: `-ERR message\r\n`
    Error(String),
    /// Integer reply: `:1000\r\n`
    Integer(i64),
    /// Bulk string: `$5\r\nhello\r\n` or `$-1\r\n`
    Bulk(Option<Bytes>),
    /// Array: `*2\r\n...` or `*-1\r\n`
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(Some(data.into()))
    }

    pub fn array(items: Vec<Reply>) -> Self {
        Reply::Array(Some(items))
    }

    /// Short name of the reply type, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Simple(_) => "simple string",
            Reply::Error(_) => "error",
            Reply::Integer(_) => "integer",
            Reply::Bulk(Some(_)) => "bulk string",
            Reply::Array(Some(_)) => "array",
            Reply::Bulk(None) | Reply::Array(None) => "null",
        }
    }

    /// Returns true for a null bulk string or a null array.
    pub fn is_null(&self) -> bool {
        matches!(self, Reply::Bulk(None) | Reply::Array(None))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Raw bytes of a status or bulk reply.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Simple(s) => Some(s.as_bytes()),
            Reply::Bulk(Some(b)) => Some(b),
            _ => None,
        }
    }

    /// Text of a status or bulk reply, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Consumes a status or bulk reply into an owned string.
    pub fn into_string(self) -> Option<String> {
        match self {
            Reply::Simple(s) => Some(s),
            Reply::Bulk(Some(b)) => String::from_utf8(b.to_vec()).ok(),
            _ => None,
        }
    }

    /// Consumes a non-null array reply into its elements.
    pub fn into_array(self) -> Option<Vec<Reply>> {
        match self {
            Reply::Array(Some(items)) => Some(items),
            _ => None,
        }
    }

    /// Encodes the reply in RESP2 form.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encodes the reply into an existing buffer.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Reply::Simple(s) => put_line(buf, b'+', s.as_bytes()),
            Reply::Error(s) => put_line(buf, b'-', s.as_bytes()),
            Reply::Integer(n) => put_line(buf, b':', n.to_string().as_bytes()),
            Reply::Bulk(None) => buf.put_slice(b"$-1\r\n"),
            Reply::Bulk(Some(data)) => {
                put_line(buf, b'$', data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(b"\r\n");
            }
            Reply::Array(None) => buf.put_slice(b"*-1\r\n"),
            Reply::Array(Some(items)) => {
                put_line(buf, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.encode_into(buf);
                }
            }
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        match self {
            Reply::Simple(s) => write!(f, "{}", s),
            Reply::Error(s) => write!(f, "(error) {}", s),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(Some(b)) => write!(f, "{:?}", String::from_utf8_lossy(b)),
            Reply::Bulk(None) | Reply::Array(None) => write!(f, "(nil)"),
            Reply::Array(Some(items)) if items.is_empty() => write!(f, "(empty array)"),
            Reply::Array(Some(items)) => {
                let width = items.len().to_string().len();
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                        write!(f, "{:indent$}", "", indent = indent)?;
                    }
                    write!(f, "{:>width$}) ", i + 1, width = width)?;
                    item.fmt_indented(f, indent + width + 2)?;
                }
                Ok(())
            }
        }
    }
}

fn put_line(buf: &mut BytesMut, tag: u8, line: &[u8]) {
    buf.put_u8(tag);
    buf.put_slice(line);
    buf.put_slice(b"\r\n");
}

/// Renders the reply the way `redis-cli` does.
impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

impl Serialize for Reply {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Reply::Simple(s) => serializer.serialize_str(s),
            Reply::Error(s) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", s)?;
                map.end()
            }
            Reply::Integer(n) => serializer.serialize_i64(*n),
            Reply::Bulk(Some(b)) => serializer.serialize_str(&String::from_utf8_lossy(b)),
            Reply::Bulk(None) | Reply::Array(None) => serializer.serialize_none(),
            Reply::Array(Some(items)) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}
