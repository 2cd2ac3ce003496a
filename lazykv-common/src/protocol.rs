//! # RESP2 Encoding and Parsing
//!
//! Purpose: Frame commands and replies exchanged between the LazyKV client
//! wrapper and a Redis-compatible store.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: The decoder returns `Ok(None)` until a whole
//!    frame is buffered, so it plugs straight into `tokio_util::codec::Framed`.
//! 2. **Binary-Safe**: Bulk strings are raw `Bytes`; only status and error
//!    lines are interpreted as text.
//! 3. **Bounded Frames**: Element counts, bulk sizes and nesting depth are
//!    capped before any allocation happens.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.
//!
//! ## Wire Example
//!
//! ```text
//! HSET key field value
//! *4\r\n$4\r\nHSET\r\n$3\r\nkey\r\n$5\r\nfield\r\n$5\r\nvalue\r\n
//!
//! reply
//! :1\r\n
//! ```

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{RespError, RespResult};

const CRLF: &[u8] = b"\r\n";

/// Max elements in a single array frame.
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Max bulk string payload (512 MB, the Redis limit).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Max nesting depth for arrays.
pub const MAX_DEPTH: usize = 64;

/// RESP2 value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style responses.
    Simple(String),
    /// -ERR ... responses.
    Error(String),
    /// :123 responses.
    Integer(i64),
    /// $... bulk strings, with None for null (`$-1` and `*-1` both map here).
    Bulk(Option<Bytes>),
    /// *... arrays.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Builds a command frame: an array of bulk strings, name first.
    pub fn command<I>(name: &str, args: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        let mut items = vec![RespValue::Bulk(Some(Bytes::copy_from_slice(
            name.as_bytes(),
        )))];
        items.extend(args.into_iter().map(|arg| RespValue::Bulk(Some(arg))));
        RespValue::Array(items)
    }

    /// Builds a bulk string frame from anything byte-like.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespValue::Bulk(Some(data.into()))
    }

    /// Null bulk string.
    pub fn null() -> Self {
        RespValue::Bulk(None)
    }

    /// Extracts command arguments from an array of bulk strings.
    ///
    /// Returns `None` when the frame is not a well-formed command.
    pub fn into_command_args(self) -> Option<Vec<Bytes>> {
        match self {
            RespValue::Array(items) if !items.is_empty() => items
                .into_iter()
                .map(|item| match item {
                    RespValue::Bulk(Some(data)) => Some(data),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }
}

/// `tokio_util` codec for RESP2 frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespCodec;

impl Encoder<RespValue> for RespCodec {
    type Error = RespError;

    fn encode(&mut self, item: RespValue, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_value(&item, dst);
        Ok(())
    }
}

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = RespError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut cursor = &src[..];
        match parse_value(&mut cursor, 0)? {
            Some(value) => {
                let consumed = src.len() - cursor.len();
                src.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

/// Encodes one RESP value into the provided buffer.
pub fn encode_value(value: &RespValue, out: &mut BytesMut) {
    match value {
        RespValue::Simple(text) => {
            out.extend_from_slice(b"+");
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(CRLF);
        }
        RespValue::Error(text) => {
            out.extend_from_slice(b"-");
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(CRLF);
        }
        RespValue::Integer(number) => {
            out.extend_from_slice(b":");
            out.extend_from_slice(number.to_string().as_bytes());
            out.extend_from_slice(CRLF);
        }
        RespValue::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
        RespValue::Bulk(Some(data)) => {
            out.extend_from_slice(b"$");
            push_usize(out, data.len());
            out.extend_from_slice(CRLF);
            out.extend_from_slice(data);
            out.extend_from_slice(CRLF);
        }
        RespValue::Array(items) => {
            out.extend_from_slice(b"*");
            push_usize(out, items.len());
            out.extend_from_slice(CRLF);
            for item in items {
                encode_value(item, out);
            }
        }
    }
}

// `Ok(None)` means the buffer ends mid-frame; the cursor is then meaningless.
fn parse_value(cursor: &mut &[u8], depth: usize) -> RespResult<Option<RespValue>> {
    if depth > MAX_DEPTH {
        return Err(RespError::LimitExceeded("nesting depth"));
    }
    let Some(line) = read_line(cursor)? else {
        return Ok(None);
    };
    if line.is_empty() {
        return Err(RespError::Protocol("empty line"));
    }

    let body = &line[1..];
    match line[0] {
        b'+' => Ok(Some(RespValue::Simple(
            String::from_utf8_lossy(body).into_owned(),
        ))),
        b'-' => Ok(Some(RespValue::Error(
            String::from_utf8_lossy(body).into_owned(),
        ))),
        b':' => Ok(Some(RespValue::Integer(parse_i64(body)?))),
        b'$' => parse_bulk(cursor, parse_i64(body)?),
        b'*' => parse_array(cursor, parse_i64(body)?, depth),
        _ => Err(RespError::Protocol("unknown frame prefix")),
    }
}

fn parse_bulk(cursor: &mut &[u8], len: i64) -> RespResult<Option<RespValue>> {
    if len < 0 {
        return Ok(Some(RespValue::Bulk(None)));
    }
    let len = len as usize;
    if len > MAX_BULK_LEN {
        return Err(RespError::LimitExceeded("bulk string length"));
    }
    if cursor.len() < len + CRLF.len() {
        return Ok(None);
    }
    if &cursor[len..len + CRLF.len()] != CRLF {
        return Err(RespError::Protocol("missing CRLF after bulk string"));
    }

    let data = Bytes::copy_from_slice(&cursor[..len]);
    *cursor = &cursor[len + CRLF.len()..];
    Ok(Some(RespValue::Bulk(Some(data))))
}

fn parse_array(cursor: &mut &[u8], len: i64, depth: usize) -> RespResult<Option<RespValue>> {
    if len < 0 {
        return Ok(Some(RespValue::Bulk(None)));
    }
    let len = len as usize;
    if len > MAX_ARRAY_LEN {
        return Err(RespError::LimitExceeded("array length"));
    }

    let mut items = Vec::with_capacity(len.min(64));
    for _ in 0..len {
        match parse_value(cursor, depth + 1)? {
            Some(item) => items.push(item),
            None => return Ok(None),
        }
    }
    Ok(Some(RespValue::Array(items)))
}

fn read_line<'a>(cursor: &mut &'a [u8]) -> RespResult<Option<&'a [u8]>> {
    let Some(pos) = cursor.iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    if pos == 0 || cursor[pos - 1] != b'\r' {
        return Err(RespError::Protocol("line not terminated by CRLF"));
    }
    let line = &cursor[..pos - 1];
    *cursor = &cursor[pos + 1..];
    Ok(Some(line))
}

fn parse_i64(data: &[u8]) -> RespResult<i64> {
    if data.is_empty() {
        return Err(RespError::Protocol("empty integer"));
    }
    let (negative, digits) = match data[0] {
        b'-' => (true, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(RespError::Protocol("empty integer"));
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(RespError::Protocol("invalid integer"));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }

    if negative {
        Ok(-value)
    } else {
        Ok(value)
    }
}

fn push_usize(out: &mut BytesMut, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.extend_from_slice(&[buf[idx]]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> RespResult<Option<RespValue>> {
        let mut buf = BytesMut::from(input);
        RespCodec.decode(&mut buf)
    }

    #[test]
    fn encodes_command() {
        let mut buf = BytesMut::new();
        let frame = RespValue::command("GET", [Bytes::from_static(b"key")]);
        RespCodec.encode(frame, &mut buf).unwrap();
        assert_eq!(&buf[..], b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn parses_simple_string() {
        let resp = decode_all(b"+OK\r\n").unwrap();
        assert_eq!(resp, Some(RespValue::Simple("OK".to_string())));
    }

    #[test]
    fn parses_null_bulk_and_null_array() {
        assert_eq!(decode_all(b"$-1\r\n").unwrap(), Some(RespValue::Bulk(None)));
        assert_eq!(decode_all(b"*-1\r\n").unwrap(), Some(RespValue::Bulk(None)));
    }

    #[test]
    fn parses_error_and_integer() {
        assert_eq!(
            decode_all(b"-ERR bad\r\n").unwrap(),
            Some(RespValue::Error("ERR bad".to_string()))
        );
        assert_eq!(decode_all(b":-42\r\n").unwrap(), Some(RespValue::Integer(-42)));
    }

    #[test]
    fn waits_for_complete_frame() {
        let mut buf = BytesMut::from(&b"*3\r\n$7\r\nmessage\r\n$2\r\nch"[..]);
        assert_eq!(RespCodec.decode(&mut buf).unwrap(), None);
        // Nothing consumed while incomplete.
        assert_eq!(buf.len(), 23);

        buf.extend_from_slice(b"\r\n$5\r\nhello\r\n+OK\r\n");
        let frame = RespCodec.decode(&mut buf).unwrap();
        assert_eq!(
            frame,
            Some(RespValue::Array(vec![
                RespValue::bulk("message"),
                RespValue::bulk("ch"),
                RespValue::bulk("hello"),
            ]))
        );
        assert_eq!(&buf[..], b"+OK\r\n");
    }

    #[test]
    fn rejects_bad_framing() {
        assert!(matches!(decode_all(b"?what\r\n"), Err(RespError::Protocol(_))));
        assert!(matches!(decode_all(b"+OK\n"), Err(RespError::Protocol(_))));
        assert!(matches!(
            decode_all(b"$3\r\nabcd\r\n"),
            Err(RespError::Protocol(_))
        ));
    }

    #[test]
    fn extracts_command_args() {
        let frame = RespValue::command("SET", [Bytes::from_static(b"k"), Bytes::from_static(b"v")]);
        let args = frame.into_command_args().unwrap();
        assert_eq!(args, vec![Bytes::from_static(b"SET"), Bytes::from_static(b"k"), Bytes::from_static(b"v")]);

        assert_eq!(RespValue::Integer(1).into_command_args(), None);
        assert_eq!(RespValue::Array(vec![RespValue::Integer(1)]).into_command_args(), None);
    }
}
