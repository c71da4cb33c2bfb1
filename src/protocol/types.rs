//! Wire Types
//!
//! Requests arrive as a list of binary-safe arguments; replies leave as one of
//! the RESP2 reply types below.
//!
//! | Prefix | Reply             | Example                  |
//! |--------|-------------------|--------------------------|
//! | `+`    | [`Reply::Status`] | `+OK\r\n`                |
//! | `-`    | [`Reply::Error`]  | `-ERR bad key\r\n`       |
//! | `:`    | [`Reply::Integer`]| `:2\r\n`                 |
//! | `$`    | [`Reply::Bulk`]   | `$5\r\nhello\r\n`        |
//! | `$-1`  | [`Reply::Nil`]    | `$-1\r\n`                |

use bytes::{BufMut, Bytes, BytesMut};

/// CRLF terminator used by every RESP frame.
pub const CRLF: &[u8] = b"\r\n";

/// One client request: the command name followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    args: Vec<Bytes>,
}

impl Request {
    pub fn new(args: Vec<Bytes>) -> Self {
        Self { args }
    }

    /// Command name, upper-cased. Empty for an empty request.
    pub fn command(&self) -> String {
        self.args
            .first()
            .map(|name| String::from_utf8_lossy(name).to_ascii_uppercase())
            .unwrap_or_default()
    }

    /// Arguments after the command name.
    pub fn args(&self) -> &[Bytes] {
        self.args.get(1..).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Whether the client asked to close the connection.
    pub fn is_quit(&self) -> bool {
        self.command() == "QUIT"
    }
}

/// A reply sent back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Status(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Nil,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn pong() -> Self {
        Reply::Status("PONG".to_string())
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Reply::Error(msg.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Appends the wire encoding of this reply to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Reply::Status(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            Reply::Error(msg) => {
                buf.put_u8(b'-');
                // a CR or LF inside the message would split the frame
                for &b in msg.as_bytes() {
                    buf.put_u8(if b == b'\r' || b == b'\n' { b' ' } else { b });
                }
                buf.put_slice(CRLF);
            }
            Reply::Integer(n) => {
                buf.put_u8(b':');
                buf.put_slice(n.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            Reply::Bulk(data) => {
                buf.reserve(data.len() + 16);
                buf.put_u8(b'$');
                buf.put_slice(data.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            Reply::Nil => buf.put_slice(b"$-1\r\n"),
        }
    }

    /// Encodes this reply into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }
}
