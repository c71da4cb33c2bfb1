//! RESP Façade Protocol
//!
//! The small slice of the Redis Serialization Protocol the server speaks:
//! requests are multibulk arrays (or inline lines) of arguments, replies are
//! status, error, integer, bulk or nil.
//!
//! ## Example
//!
//! ```
//! use ttlkv::protocol::{Reply, RequestParser};
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (request, consumed) = RequestParser::default().parse(data).unwrap().unwrap();
//! assert_eq!(request.command(), "GET");
//! assert_eq!(consumed, data.len());
//!
//! assert_eq!(&Reply::Nil.to_bytes()[..], b"$-1\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{ParseError, ParseResult, ParserLimits, RequestParser};
pub use types::{Reply, Request};
