//! Encoder and decoder for RESP requests and replies.

use crate::command::Command;
use crate::error::ProtocolError;
use crate::frame::{self, Scan};
use crate::reply::Reply;
use bytes::{Buf, BytesMut};

/// Encodes commands into request frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a single command.
    pub fn encode_command(command: &Command) -> BytesMut {
        command.encode()
    }

    /// Encodes several commands back to back into one buffer.
    pub fn encode_pipeline(commands: &[Command]) -> BytesMut {
        let len = commands.iter().map(Command::encoded_len).sum();
        let mut buf = BytesMut::with_capacity(len);
        for command in commands {
            command.encode_into(&mut buf);
        }
        buf
    }
}

/// Accumulates bytes read from a transport and yields complete replies.
///
/// Bytes are consumed only when a whole reply has been parsed; a partial
/// frame stays buffered until more data is appended. Progress through a
/// partial frame is remembered, so the reply tree is built once per frame
/// however many reads it arrives in.
pub struct Decoder {
    buffer: BytesMut,
    scan: Scan,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_capacity(8192)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            scan: Scan::default(),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next reply from the buffer.
    ///
    /// Returns `Ok(None)` when more data is needed. On error the buffer is
    /// left untouched.
    pub fn decode_reply(&mut self) -> Result<Option<Reply>, ProtocolError> {
        let len = match self.scan.complete_len(&self.buffer)? {
            Some(len) => len,
            None => return Ok(None),
        };

        let parsed = frame::parse(&self.buffer[..len]);
        self.scan.reset();
        match parsed? {
            Some((reply, consumed)) => {
                self.buffer.advance(consumed);
                Ok(Some(reply))
            }
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scan.reset();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_partial_reply_decoding() {
        let mut decoder = Decoder::new();

        decoder.extend(b"*2\r\n$7\r\nPal");
        assert!(decoder.decode_reply().unwrap().is_none());
        assert_eq!(decoder.buffered(), 11);

        decoder.extend(b"ermo\r\n$-1\r\n");
        let reply = decoder.decode_reply().unwrap().unwrap();
        assert_eq!(
            reply,
            Reply::array(vec![Reply::bulk("Palermo"), Reply::Bulk(None)])
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_multiple_replies_in_buffer() {
        let mut decoder = Decoder::new();
        decoder.extend(b":1\r\n-WRONGTYPE Operation against a key\r\n+OK\r\n");

        assert_eq!(decoder.decode_reply().unwrap(), Some(Reply::Integer(1)));
        assert_eq!(
            decoder.decode_reply().unwrap(),
            Some(Reply::Error("WRONGTYPE Operation against a key".into()))
        );
        assert_eq!(
            decoder.decode_reply().unwrap(),
            Some(Reply::Simple("OK".into()))
        );
        assert_eq!(decoder.decode_reply().unwrap(), None);
    }

    #[test]
    fn test_malformed_reply_keeps_buffer() {
        let mut decoder = Decoder::new();
        decoder.extend(b"%3\r\n");
        assert!(decoder.decode_reply().is_err());
        assert_eq!(decoder.buffered(), 4);
    }

    #[test]
    fn test_decoder_clear() {
        let mut decoder = Decoder::default();
        decoder.extend(b"*2\r\n$5\r\nhe");
        assert!(decoder.decode_reply().unwrap().is_none());
        assert_eq!(decoder.buffered(), 10);
        decoder.clear();
        assert_eq!(decoder.buffered(), 0);

        // Nothing of the discarded frame carries over
        decoder.extend(b":7\r\n");
        assert_eq!(decoder.decode_reply().unwrap(), Some(Reply::Integer(7)));
    }

    #[test]
    fn test_large_array_in_small_reads() {
        let members: Vec<Reply> = (0..20_000)
            .map(|i| Reply::bulk(format!("member-{}", i)))
            .collect();
        let expected = Reply::array(members);
        let mut wire = expected.encode();
        Reply::Integer(1).encode_into(&mut wire);

        let mut decoder = Decoder::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(8192) {
            decoder.extend(piece);
            while let Some(reply) = decoder.decode_reply().unwrap() {
                decoded.push(reply);
            }
        }

        assert_eq!(decoded, vec![expected, Reply::Integer(1)]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_full_length_line_split_before_lf() {
        let mut line = vec![b'+'];
        line.extend(std::iter::repeat(b'x').take(crate::MAX_LINE_LEN));
        line.extend_from_slice(b"\r\n");

        let mut decoder = Decoder::new();
        decoder.extend(&line[..line.len() - 1]);
        assert_eq!(decoder.decode_reply(), Ok(None));
        decoder.extend(b"\n");
        match decoder.decode_reply().unwrap() {
            Some(Reply::Simple(text)) => assert_eq!(text.len(), crate::MAX_LINE_LEN),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_encode_pipeline() {
        let commands = vec![
            Command::new("PING"),
            Command::new("ZCARD").arg("key"),
        ];
        let encoded = Encoder::encode_pipeline(&commands);
        assert_eq!(
            &encoded[..],
            &b"*1\r\n$4\r\nPING\r\n*2\r\n$5\r\nZCARD\r\n$3\r\nkey\r\n"[..]
        );
        assert_eq!(&Encoder::encode_command(&commands[0])[..], b"*1\r\n$4\r\nPING\r\n");
    }

    fn arb_reply() -> impl Strategy<Value = Reply> {
        let leaf = prop_oneof![
            "[a-zA-Z0-9 ]{0,16}".prop_map(Reply::Simple),
            "[A-Z]{3} [a-z ]{0,16}".prop_map(Reply::Error),
            any::<i64>().prop_map(Reply::Integer),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(|b| Reply::bulk(b)),
            Just(Reply::Bulk(None)),
            Just(Reply::Array(None)),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            proptest::collection::vec(inner, 0..8).prop_map(Reply::array)
        })
    }

    proptest! {
        #[test]
        fn prop_fragmentation_does_not_change_replies(
            replies in proptest::collection::vec(arb_reply(), 1..8),
            chunk in 1usize..17,
        ) {
            let mut wire = BytesMut::new();
            for reply in &replies {
                reply.encode_into(&mut wire);
            }

            let mut decoder = Decoder::new();
            let mut decoded = Vec::new();
            for piece in wire.chunks(chunk) {
                decoder.extend(piece);
                while let Some(reply) = decoder.decode_reply().unwrap() {
                    decoded.push(reply);
                }
            }

            prop_assert_eq!(decoded, replies);
            prop_assert_eq!(decoder.buffered(), 0);
        }
    }
}
