//! RESP wire codec.
//!
//! - `types`: [`RespValue`], the frame/reply type, and its encoder
//! - `parser`: incremental decoder for buffered network input
//! - `stream`: [`FrameReader`], a lazy frame iterator over any `Read`
//!
//! ```
//! use tidekv::protocol::{parse_message, RespValue};
//!
//! let (value, _) = parse_message(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").unwrap().unwrap();
//! assert_eq!(value, RespValue::command(["GET", "foo"]));
//! assert_eq!(RespValue::bulk_string("bar").serialize(), b"$3\r\nbar\r\n");
//! ```

pub mod parser;
pub mod stream;
pub mod types;

pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use stream::FrameReader;
pub use types::RespValue;
