//! Lazy frame decoding over a blocking byte stream.
//!
//! [`FrameReader`] turns any `Read` into an iterator of decoded frames.
//! Each item is either a frame or the decode error for that frame. A
//! malformed header costs only the line it sits on: the reader skips past
//! that line and keeps decoding, so one bad record does not end the
//! stream. The iterator finishes when the reader is exhausted; if bytes of
//! an unfinished frame are left over at that point, one final
//! [`ParseError::UnexpectedEof`] is yielded first, and
//! [`FrameReader::offset`] still points at the end of the last complete
//! frame, which is where a log with a torn tail should be cut.
//!
//! Used to replay the append-only file, whose byte layout is identical to
//! the wire protocol.

use crate::protocol::parser::{find_crlf, ParseError, RespParser};
use crate::protocol::types::RespValue;
use bytes::{Buf, BytesMut};
use std::io::{ErrorKind, Read};
use tracing::trace;

const READ_CHUNK: usize = 8 * 1024;

/// Iterator of frames decoded from a byte stream.
pub struct FrameReader<R> {
    reader: R,
    buffer: BytesMut,
    parser: RespParser,
    /// Stream bytes consumed by decoded frames and skipped lines
    offset: u64,
    done: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            parser: RespParser::new(),
            offset: 0,
            done: false,
        }
    }

    /// Bytes of the stream accounted for so far. A partial frame left at
    /// the end of the stream is not included.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn consume(&mut self, n: usize) {
        self.buffer.advance(n);
        self.offset += n as u64;
    }

    /// Pulls another chunk into the buffer. Returns the number of bytes read.
    fn fill(&mut self) -> std::io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    return Ok(n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Drops the line holding a malformed header.
    fn skip_bad_line(&mut self) {
        let n = find_crlf(&self.buffer).map_or(self.buffer.len(), |pos| pos + 2);
        self.consume(n);
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<RespValue, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            if !self.buffer.is_empty() {
                match self.parser.parse(&self.buffer) {
                    Ok(Some((value, consumed))) => {
                        self.consume(consumed);
                        return Some(Ok(value));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.skip_bad_line();
                        return Some(Err(e));
                    }
                }
            }

            match self.fill() {
                Ok(0) => {
                    self.done = true;
                    if self.buffer.is_empty() {
                        return None;
                    }
                    let partial = self.buffer.len();
                    trace!(partial, "stream ended inside a frame");
                    self.buffer.clear();
                    return Some(Err(ParseError::UnexpectedEof(partial)));
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(ParseError::Io(e.to_string())));
                }
            }
        }
    }
}
