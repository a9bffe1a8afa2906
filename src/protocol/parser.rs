//! Incremental RESP parser.
//!
//! The parser works on whatever bytes have arrived so far and reports one
//! of three outcomes:
//!
//! - `Ok(Some((value, consumed)))` - a complete frame; the caller advances
//!   its buffer by `consumed` bytes
//! - `Ok(None)` - the frame is incomplete; read more and call again
//! - `Err(ParseError)` - the frame header is malformed
//!
//! Nothing is retained between calls, so a partially received frame is
//! simply re-examined once more bytes are available. Lines that do not
//! start with a known type prefix are treated as inline commands
//! (`SET key value\r\n`), which is what interactive clients send.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors produced while decoding frames.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// A length, count or integer field is not a valid number
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// A status or error line is not valid UTF-8
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length below -1
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array count below -1
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Structural violation (missing CRLF, nesting too deep, ...)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A bulk string larger than the protocol allows
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The underlying reader ended in the middle of a frame
    #[error("unexpected end of stream ({0} bytes of a partial frame)")]
    UnexpectedEof(usize),

    /// The underlying reader failed
    #[error("I/O error: {0}")]
    Io(String),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Largest accepted bulk string (512 MB, as in Redis).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Deepest accepted array nesting.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Stateless-between-calls RESP parser.
///
/// ```
/// use tidekv::protocol::{RespParser, RespValue};
///
/// let mut parser = RespParser::new();
/// let (value, consumed) = parser
///     .parse(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
///     .unwrap()
///     .unwrap();
/// assert_eq!(consumed, 23);
/// assert_eq!(value, RespValue::command(["GET", "name"]));
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to decode one frame from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match first {
            prefix::SIMPLE_STRING => Ok(read_line(buf, 1)?
                .map(|(line, used)| (RespValue::SimpleString(line.to_string()), used))),
            prefix::ERROR => {
                Ok(read_line(buf, 1)?.map(|(line, used)| (RespValue::Error(line.to_string()), used)))
            }
            prefix::INTEGER => match read_number(buf)? {
                Some((n, used)) => Ok(Some((RespValue::Integer(n), used))),
                None => Ok(None),
            },
            prefix::BULK_STRING => parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            _ => parse_inline(buf),
        }
    }

    /// `*<count>\r\n<element>...`
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let Some((count, mut consumed)) = read_number(buf)? else {
            return Ok(None);
        };

        if count == -1 {
            return Ok(Some((RespValue::Null, consumed)));
        }
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        // The count is untrusted; cap the preallocation.
        let mut elements = Vec::with_capacity((count as usize).min(1024));

        self.depth += 1;
        for _ in 0..count {
            match self.parse_value(&buf[consumed..])? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => {
                    self.depth -= 1;
                    return Ok(None);
                }
            }
        }
        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// `$<len>\r\n<bytes>\r\n`, or `$-1\r\n` for null.
fn parse_bulk_string(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let Some((length, data_start)) = read_number(buf)? else {
        return Ok(None);
    };

    if length == -1 {
        return Ok(Some((RespValue::Null, data_start)));
    }
    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }

    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let total = data_start + length + 2;
    if buf.len() < total {
        return Ok(None);
    }
    if &buf[data_start + length..total] != CRLF {
        return Err(ParseError::ProtocolError(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_start + length]);
    Ok(Some((RespValue::BulkString(data), total)))
}

/// A bare line of whitespace-separated tokens.
fn parse_inline(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let Some(end) = find_crlf(buf) else {
        return Ok(None);
    };

    let tokens: Vec<RespValue> = buf[..end]
        .split(|b| *b == b' ' || *b == b'\t')
        .filter(|t| !t.is_empty())
        .map(|t| RespValue::BulkString(Bytes::copy_from_slice(t)))
        .collect();

    if tokens.is_empty() {
        return Err(ParseError::ProtocolError("empty inline command".to_string()));
    }

    Ok(Some((RespValue::Array(tokens), end + 2)))
}

/// Reads the text after a one-byte prefix up to CRLF. Returns the text and
/// the number of bytes consumed including the terminator.
fn read_line(buf: &[u8], skip: usize) -> ParseResult<Option<(&str, usize)>> {
    match find_crlf(&buf[skip..]) {
        Some(pos) => {
            let line = std::str::from_utf8(&buf[skip..skip + pos])
                .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
            Ok(Some((line, skip + pos + 2)))
        }
        None => Ok(None),
    }
}

/// Reads a prefixed decimal header such as `:42\r\n` or `$5\r\n`.
fn read_number(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    match read_line(buf, 1)? {
        Some((text, used)) => {
            let n = text
                .parse::<i64>()
                .map_err(|_| ParseError::InvalidInteger(text.to_string()))?;
            Ok(Some((n, used)))
        }
        None => Ok(None),
    }
}

/// Position of the first `\r\n` in `buf`, pointing at the `\r`.
#[inline]
pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes a single frame with a throwaway parser.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_string() {
        let (value, consumed) = parse_message(b"+OK\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::SimpleString("OK".to_string()));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_parse_error_line() {
        let (value, consumed) = parse_message(b"-ERR unknown command\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Error("ERR unknown command".to_string()));
        assert_eq!(consumed, 22);
    }

    #[test]
    fn test_parse_integer() {
        let (value, consumed) = parse_message(b":-42\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Integer(-42));
        assert_eq!(consumed, 6);
    }

    #[test]
    fn test_parse_bulk_string() {
        let (value, consumed) = parse_message(b"$5\r\nhello\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::BulkString(Bytes::from("hello")));
        assert_eq!(consumed, 11);
    }

    #[test]
    fn test_parse_null_bulk_string() {
        let (value, consumed) = parse_message(b"$-1\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Null);
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_binary_safe_bulk_string() {
        let (value, _) = parse_message(b"$5\r\nhel\x00o\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::BulkString(Bytes::from(&b"hel\x00o"[..])));
    }

    #[test]
    fn test_incomplete_frames() {
        assert!(parse_message(b"").unwrap().is_none());
        assert!(parse_message(b"+OK").unwrap().is_none());
        assert!(parse_message(b"$5\r\nhel").unwrap().is_none());
        assert!(parse_message(b"*2\r\n$3\r\nGET\r\n").unwrap().is_none());
        assert!(parse_message(b"*2\r\n$3\r\nGET\r\n$4\r\nna").unwrap().is_none());
    }

    #[test]
    fn test_parse_command_array() {
        let input = b"*3\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$4\r\nAriz\r\n";
        let (value, consumed) = parse_message(input).unwrap().unwrap();
        assert_eq!(value, RespValue::command(["SET", "user:101", "Ariz"]));
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_parse_array_with_null_element() {
        let (value, _) = parse_message(b"*2\r\n$1\r\na\r\n$-1\r\n").unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::Array(vec![RespValue::bulk_string("a"), RespValue::Null])
        );
    }

    #[test]
    fn test_parse_nested_and_null_array() {
        let (value, _) = parse_message(b"*2\r\n:1\r\n*1\r\n:2\r\n").unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::Array(vec![
                RespValue::Integer(1),
                RespValue::Array(vec![RespValue::Integer(2)]),
            ])
        );
        assert_eq!(parse_message(b"*-1\r\n").unwrap().unwrap().0, RespValue::Null);
        assert_eq!(parse_message(b"*0\r\n").unwrap().unwrap().0, RespValue::Array(vec![]));
    }

    #[test]
    fn test_parse_inline_command() {
        let (value, consumed) = parse_message(b"SET  foo\tbar\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::command(["SET", "foo", "bar"]));
        assert_eq!(consumed, 14);
    }

    #[test]
    fn test_malformed_headers() {
        assert!(matches!(
            parse_message(b":abc\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
        assert!(matches!(
            parse_message(b"$x\r\nhello\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
        assert_eq!(
            parse_message(b"$-5\r\n"),
            Err(ParseError::InvalidBulkLength(-5))
        );
        assert_eq!(
            parse_message(b"*-3\r\n"),
            Err(ParseError::InvalidArrayLength(-3))
        );
        assert!(matches!(
            parse_message(b"$3\r\nabcd\r\n"),
            Err(ParseError::ProtocolError(_))
        ));
        assert!(matches!(
            parse_message(b"\r\n"),
            Err(ParseError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let mut input = Vec::new();
        for _ in 0..=MAX_NESTING_DEPTH + 1 {
            input.extend_from_slice(b"*1\r\n");
        }
        input.extend_from_slice(b":1\r\n");
        assert!(matches!(
            parse_message(&input),
            Err(ParseError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_command_roundtrip_with_null_element() {
        let original = RespValue::Array(vec![
            RespValue::bulk_string("ZADD"),
            RespValue::bulk_string("z"),
            RespValue::Null,
            RespValue::bulk_string(""),
        ]);
        let encoded = original.serialize();
        let (decoded, consumed) = parse_message(&encoded).unwrap().unwrap();
        assert_eq!(decoded, original);
        assert_eq!(consumed, encoded.len());
    }
}
