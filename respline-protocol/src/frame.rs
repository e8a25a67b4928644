//! RESP2 reply framing.
//!
//! Every frame starts with a type byte and a CRLF-terminated header line:
//!
//! ```text
//! +<status>\r\n
//! -<error>\r\n
//! :<integer>\r\n
//! $<len>\r\n<len bytes>\r\n      ($-1\r\n is a null bulk string)
//! *<count>\r\n<count frames>     (*-1\r\n is a null array)
//! ```
//!
//! Parsing is a single recursive-descent pass over a borrowed buffer. It
//! returns the reply together with the number of bytes it occupied, so the
//! caller decides when to consume them.

use crate::error::ProtocolError;
use crate::reply::Reply;
use crate::{MAX_BULK_LEN, MAX_DEPTH, MAX_LINE_LEN};
use bytes::Bytes;

/// Parses one reply from the front of `buf`.
///
/// Returns `Ok(Some((reply, consumed)))` for a complete frame, `Ok(None)` if
/// `buf` holds only a prefix of a frame, or `Err` if the bytes can never form
/// a valid frame.
pub fn parse(buf: &[u8]) -> Result<Option<(Reply, usize)>, ProtocolError> {
    let mut pos = 0;
    match parse_at(buf, &mut pos, 0)? {
        Some(reply) => Ok(Some((reply, pos))),
        None => Ok(None),
    }
}

fn parse_at(buf: &[u8], pos: &mut usize, depth: usize) -> Result<Option<Reply>, ProtocolError> {
    if depth > MAX_DEPTH {
        return Err(ProtocolError::NestingTooDeep { max: MAX_DEPTH });
    }

    let tag = match buf.get(*pos) {
        Some(&tag) => tag,
        None => return Ok(None),
    };
    if !matches!(tag, b'+' | b'-' | b':' | b'$' | b'*') {
        return Err(ProtocolError::InvalidTypeByte(tag));
    }

    let mut cursor = *pos + 1;
    let line = match read_line(buf, &mut cursor)? {
        Some(line) => line,
        None => return Ok(None),
    };

    let reply = match tag {
        b'+' => Reply::Simple(utf8(line)?),
        b'-' => Reply::Error(utf8(line)?),
        b':' => Reply::Integer(parse_int(line)?),
        b'$' => {
            let len = parse_int(line)?;
            match len {
                -1 => Reply::Bulk(None),
                len if len < -1 => return Err(ProtocolError::InvalidLength(len)),
                len if len > MAX_BULK_LEN => {
                    return Err(ProtocolError::BulkTooLarge {
                        size: len,
                        max: MAX_BULK_LEN,
                    })
                }
                len => {
                    let len = len as usize;
                    let end = cursor + len;
                    if buf.len() < end + 2 {
                        return Ok(None);
                    }
                    if &buf[end..end + 2] != b"\r\n" {
                        return Err(ProtocolError::MissingCrlf);
                    }
                    let data = Bytes::copy_from_slice(&buf[cursor..end]);
                    cursor = end + 2;
                    Reply::Bulk(Some(data))
                }
            }
        }
        b'*' => {
            let count = parse_int(line)?;
            match count {
                -1 => Reply::Array(None),
                count if count < -1 => return Err(ProtocolError::InvalidLength(count)),
                count => {
                    let count = count as usize;
                    let mut items = Vec::with_capacity(count.min(1024));
                    for _ in 0..count {
                        match parse_at(buf, &mut cursor, depth + 1)? {
                            Some(item) => items.push(item),
                            None => return Ok(None),
                        }
                    }
                    Reply::Array(Some(items))
                }
            }
        }
        _ => unreachable!("type byte checked above"),
    };

    *pos = cursor;
    Ok(Some(reply))
}

/// Completeness check over a buffer that grows between calls.
///
/// Each call resumes at the first header it has not yet walked past, so a
/// large reply arriving over many reads is scanned once, not once per read.
/// Nothing is copied; the reply tree is built by [`parse`] only after the
/// whole frame is buffered.
#[derive(Debug, Default)]
pub(crate) struct Scan {
    /// Offset of the next unscanned frame header.
    offset: usize,
    /// Elements still expected by each open array, innermost last.
    open: Vec<usize>,
}

impl Scan {
    /// Returns the length of the first reply in `buf` once all of it has
    /// arrived. `buf` must only have grown since the previous call.
    pub(crate) fn complete_len(&mut self, buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
        loop {
            if self.open.len() > MAX_DEPTH {
                return Err(ProtocolError::NestingTooDeep { max: MAX_DEPTH });
            }
            let tag = match buf.get(self.offset) {
                Some(&tag) => tag,
                None => return Ok(None),
            };
            if !matches!(tag, b'+' | b'-' | b':' | b'$' | b'*') {
                return Err(ProtocolError::InvalidTypeByte(tag));
            }

            let mut cursor = self.offset + 1;
            let line = match read_line(buf, &mut cursor)? {
                Some(line) => line,
                None => return Ok(None),
            };

            match tag {
                b':' => {
                    parse_int(line)?;
                }
                b'$' => match parse_int(line)? {
                    -1 => {}
                    len if len < -1 => return Err(ProtocolError::InvalidLength(len)),
                    len if len > MAX_BULK_LEN => {
                        return Err(ProtocolError::BulkTooLarge {
                            size: len,
                            max: MAX_BULK_LEN,
                        })
                    }
                    len => {
                        // The header is re-read next time; the payload is not walked
                        let end = cursor + len as usize;
                        if buf.len() < end + 2 {
                            return Ok(None);
                        }
                        if &buf[end..end + 2] != b"\r\n" {
                            return Err(ProtocolError::MissingCrlf);
                        }
                        cursor = end + 2;
                    }
                },
                b'*' => match parse_int(line)? {
                    count if count < -1 => return Err(ProtocolError::InvalidLength(count)),
                    count if count > 0 => {
                        self.open.push(count as usize);
                        self.offset = cursor;
                        continue;
                    }
                    _ => {}
                },
                _ => {}
            }
            self.offset = cursor;

            // A finished element may also finish the arrays around it
            loop {
                match self.open.last_mut() {
                    None => return Ok(Some(self.offset)),
                    Some(remaining) => {
                        *remaining -= 1;
                        if *remaining > 0 {
                            break;
                        }
                        self.open.pop();
                    }
                }
            }
        }
    }

    /// Forgets all progress, for when the front of the buffer is consumed.
    pub(crate) fn reset(&mut self) {
        self.offset = 0;
        self.open.clear();
    }
}

/// Reads a CRLF-terminated line starting at `cursor`, advancing past the CRLF.
fn read_line<'a>(buf: &'a [u8], cursor: &mut usize) -> Result<Option<&'a [u8]>, ProtocolError> {
    let start = *cursor;
    let rest = &buf[start.min(buf.len())..];
    match rest.windows(2).position(|w| w == b"\r\n") {
        Some(end) if end > MAX_LINE_LEN => Err(ProtocolError::LineTooLong { max: MAX_LINE_LEN }),
        Some(end) => {
            *cursor = start + end + 2;
            Ok(Some(&rest[..end]))
        }
        // A full-length line may still be waiting for the LF after its CR
        None if rest.len() > MAX_LINE_LEN + 1
            || (rest.len() == MAX_LINE_LEN + 1 && rest.last() != Some(&b'\r')) =>
        {
            Err(ProtocolError::LineTooLong { max: MAX_LINE_LEN })
        }
        None => Ok(None),
    }
}

fn utf8(line: &[u8]) -> Result<String, ProtocolError> {
    std::str::from_utf8(line)
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidUtf8)
}

fn parse_int(line: &[u8]) -> Result<i64, ProtocolError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ProtocolError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
}
