//! RESP frame and reply types.
//!
//! Every frame on the wire starts with a one-byte type prefix and ends
//! with CRLF:
//!
//! ```text
//! +OK\r\n                         simple status
//! -ERR unknown command\r\n        simple error
//! :1000\r\n                       integer
//! $5\r\nhello\r\n                 bulk string
//! $-1\r\n                         null bulk string
//! *2\r\n$3\r\nGET\r\n$1\r\nk\r\n  array of bulk strings
//! ```
//!
//! The same type is used for decoded requests, for replies produced by
//! command handlers, and for the records written to the append-only file.

use bytes::Bytes;

/// The CRLF terminator used by every frame.
pub const CRLF: &[u8] = b"\r\n";

/// Frame type prefixes.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A decoded frame or an encodable reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status line, `+<text>\r\n`. Must not contain CR or LF.
    SimpleString(String),

    /// Error line, `-<text>\r\n`.
    Error(String),

    /// Signed 64-bit integer, `:<n>\r\n`.
    Integer(i64),

    /// Binary-safe payload, `$<len>\r\n<bytes>\r\n`.
    BulkString(Bytes),

    /// The null marker, encoded as `$-1\r\n`.
    Null,

    /// Ordered sequence of frames. A multi-bulk reply is an array of bulk
    /// strings; nesting arrays gives a composite reply.
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// `+OK`
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// `+PONG`
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Builds the array-of-bulk form used for commands, e.g. the records
    /// written to the append-only file.
    pub fn command<I, T>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        RespValue::Array(
            tokens
                .into_iter()
                .map(|t| RespValue::BulkString(t.into()))
                .collect(),
        )
    }

    /// Encodes the frame into a fresh buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Encodes the frame at the end of `buf`.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Converts a decoded request into command tokens.
    ///
    /// Only arrays qualify. Bulk and simple strings become tokens verbatim;
    /// a null element becomes an empty token. Returns `None` for anything
    /// that is not an array or that contains a nested array or integer.
    pub fn into_command(self) -> Option<Vec<Bytes>> {
        let RespValue::Array(items) = self else {
            return None;
        };
        items
            .into_iter()
            .map(|item| match item {
                RespValue::BulkString(b) => Some(b),
                RespValue::SimpleString(s) => Some(Bytes::from(s)),
                RespValue::Null => Some(Bytes::new()),
                _ => None,
            })
            .collect()
    }
}

#[inline]
fn write_line(buf: &mut Vec<u8>, prefix: u8, body: &[u8]) {
    buf.push(prefix);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}
