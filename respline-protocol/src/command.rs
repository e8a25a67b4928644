//! Command requests.
//!
//! Every request is sent as a RESP array of bulk strings:
//!
//! ```text
//! *3\r\n$3\r\nDEL\r\n$1\r\na\r\n$1\r\nb\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Conversion of a typed argument into the bytes sent on the wire.
///
/// Integers are written in decimal and floats in their shortest
/// round-trip representation, so no precision is lost.
pub trait IntoArg {
    fn into_arg(self) -> Bytes;
}

impl IntoArg for Bytes {
    fn into_arg(self) -> Bytes {
        self
    }
}

impl IntoArg for Vec<u8> {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoArg for &[u8] {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl IntoArg for String {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoArg for &String {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoArg for &str {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

macro_rules! int_arg {
    ($($t:ty),*) => {
        $(
            impl IntoArg for $t {
                fn into_arg(self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )*
    };
}

int_arg!(i32, i64, u32, u64, usize);

impl IntoArg for f64 {
    fn into_arg(self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

/// A command invocation: name plus ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl IntoArg) -> Self {
        self.args.push(arg.into_arg());
        self
    }

    /// Appends every argument yielded by `args`.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.args.extend(args.into_iter().map(IntoArg::into_arg));
        self
    }

    /// Appends an argument in place (for builders that branch on options).
    pub fn push_arg(&mut self, arg: impl IntoArg) {
        self.args.push(arg.into_arg());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[Bytes] {
        &self.args
    }

    /// Returns the exact number of bytes `encode` will produce.
    pub fn encoded_len(&self) -> usize {
        let header = bulk_len(self.name.len());
        let args: usize = self.args.iter().map(|a| bulk_len(a.len())).sum();
        1 + digits(self.args.len() + 1) + 2 + header + args
    }

    /// Encodes the command as a RESP array of bulk strings.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Encodes the command into an existing buffer.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(b'*');
        buf.put_slice((self.args.len() + 1).to_string().as_bytes());
        buf.put_slice(b"\r\n");
        put_bulk(buf, self.name.as_bytes());
        for arg in &self.args {
            put_bulk(buf, arg);
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

fn put_bulk(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u8(b'$');
    buf.put_slice(data.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
}

fn bulk_len(len: usize) -> usize {
    1 + digits(len) + 2 + len + 2
}

fn digits(mut n: usize) -> usize {
    let mut count = 1;
    while n >= 10 {
        n /= 10;
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_simple_command() {
        let cmd = Command::new("PING");
        assert_eq!(&cmd.encode()[..], b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn test_encode_mixed_arguments() {
        let cmd = Command::new("GEOADD")
            .arg("Sicily")
            .arg(13.361389)
            .arg(38.115556)
            .arg("Palermo");
        assert_eq!(
            &cmd.encode()[..],
            &b"*5\r\n$6\r\nGEOADD\r\n$6\r\nSicily\r\n$9\r\n13.361389\r\n$9\r\n38.115556\r\n$7\r\nPalermo\r\n"[..]
        );
    }

    #[test]
    fn test_float_arguments_keep_full_precision() {
        let cmd = Command::new("X").arg(13.361389338970184_f64).arg(15.0_f64);
        assert_eq!(&cmd.arguments()[0][..], b"13.361389338970184");
        assert_eq!(&cmd.arguments()[1][..], b"15");
    }

    #[test]
    fn test_integer_arguments() {
        let cmd = Command::new("X").arg(-42_i64).arg(7_u64).arg(3_usize);
        assert_eq!(&cmd.arguments()[0][..], b"-42");
        assert_eq!(&cmd.arguments()[1][..], b"7");
        assert_eq!(&cmd.arguments()[2][..], b"3");
    }

    #[test]
    fn test_binary_arguments_pass_through() {
        let cmd = Command::new("SET").arg("k").arg(&b"\r\n\x00\xff"[..]);
        let encoded = cmd.encode();
        assert!(encoded.ends_with(b"$4\r\n\r\n\x00\xff\r\n"));
    }

    #[test]
    fn test_args_iterator_and_push_arg() {
        let mut cmd = Command::new("DEL").args(["a", "b"]);
        cmd.push_arg("c");
        assert_eq!(cmd.arguments().len(), 3);
        assert_eq!(cmd.to_string(), "DEL a b c");
    }

    #[test]
    fn test_encoded_len_matches_encoding() {
        let cmd = Command::new("GEORADIUS")
            .arg("key")
            .arg(15.0)
            .arg(37.0)
            .arg(200.0)
            .arg("km")
            .arg("x".repeat(1234));
        assert_eq!(cmd.encoded_len(), cmd.encode().len());
    }
}
