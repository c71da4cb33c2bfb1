//! Request Parser
//!
//! Turns bytes read from a socket into [`Request`]s. Two framings are
//! accepted, as redis-cli and telnet users expect:
//!
//! ```text
//! multibulk:  *3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n
//! inline:     SET k v\r\n
//! ```
//!
//! Parsing is incremental. When the buffer ends mid-frame the parser returns
//! `Ok(None)` and the caller reads more data and tries again from the start
//! of the frame; nothing is consumed until a whole request is available.

use super::types::Request;
use bytes::Bytes;
use thiserror::Error;

/// Framing errors. Any of these ends the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid length in '{0}' header")]
    InvalidLength(char),

    #[error("expected '$', got '{0}'")]
    ExpectedBulk(char),

    #[error("too many arguments ({0})")]
    TooManyArgs(usize),

    #[error("bulk argument of {0} bytes exceeds the limit")]
    BulkTooLarge(usize),

    #[error("inline request too long")]
    InlineTooLong,

    #[error("bulk argument not terminated by CRLF")]
    MissingCrlf,
}

/// Result of one parse attempt: the request and the bytes it used, or
/// `None` when more data is needed.
pub type ParseResult = Result<Option<(Request, usize)>, ParseError>;

/// Upper bounds applied while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserLimits {
    pub max_args: usize,
    pub max_bulk_len: usize,
    pub max_inline_len: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_args: 1024,
            max_bulk_len: 8 * 1024 * 1024,
            max_inline_len: 64 * 1024,
        }
    }
}

/// Stateless request parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestParser {
    limits: ParserLimits,
}

impl RequestParser {
    pub fn new(limits: ParserLimits) -> Self {
        Self { limits }
    }

    /// Parses one request from the front of `buf`.
    pub fn parse(&self, buf: &[u8]) -> ParseResult {
        match buf.first() {
            None => Ok(None),
            Some(b'*') => self.parse_multibulk(buf),
            Some(_) => self.parse_inline(buf),
        }
    }

    fn parse_multibulk(&self, buf: &[u8]) -> ParseResult {
        let Some((count, mut pos)) = read_header(buf, 0, '*')? else {
            return Ok(None);
        };
        // *0 and *-1 carry no command
        if count <= 0 {
            return Ok(Some((Request::new(Vec::new()), pos)));
        }
        let count = count as usize;
        if count > self.limits.max_args {
            return Err(ParseError::TooManyArgs(count));
        }

        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            match buf.get(pos) {
                None => return Ok(None),
                Some(b'$') => {}
                Some(&other) => return Err(ParseError::ExpectedBulk(other as char)),
            }
            let Some((len, start)) = read_header(buf, pos, '$')? else {
                return Ok(None);
            };
            if len < 0 {
                return Err(ParseError::InvalidLength('$'));
            }
            let len = len as usize;
            if len > self.limits.max_bulk_len {
                return Err(ParseError::BulkTooLarge(len));
            }

            let end = start + len;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(ParseError::MissingCrlf);
            }
            args.push(Bytes::copy_from_slice(&buf[start..end]));
            pos = end + 2;
        }

        Ok(Some((Request::new(args), pos)))
    }

    fn parse_inline(&self, buf: &[u8]) -> ParseResult {
        let Some(line_end) = buf.iter().position(|&b| b == b'\n') else {
            if buf.len() > self.limits.max_inline_len {
                return Err(ParseError::InlineTooLong);
            }
            return Ok(None);
        };
        if line_end > self.limits.max_inline_len {
            return Err(ParseError::InlineTooLong);
        }

        let line = &buf[..line_end];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let args: Vec<Bytes> = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|part| !part.is_empty())
            .map(Bytes::copy_from_slice)
            .collect();
        if args.len() > self.limits.max_args {
            return Err(ParseError::TooManyArgs(args.len()));
        }

        Ok(Some((Request::new(args), line_end + 1)))
    }
}

/// Reads a `<prefix><integer>\r\n` header starting at `pos`. Returns the
/// integer and the offset just past the CRLF.
fn read_header(buf: &[u8], pos: usize, prefix: char) -> Result<Option<(i64, usize)>, ParseError> {
    let Some(cr) = find_crlf(&buf[pos + 1..]) else {
        // headers are short; a long run without CRLF is garbage
        if buf.len() - pos > 32 {
            return Err(ParseError::InvalidLength(prefix));
        }
        return Ok(None);
    };

    let digits = &buf[pos + 1..pos + 1 + cr];
    let n = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(ParseError::InvalidLength(prefix))?;
    Ok(Some((n, pos + 1 + cr + 2)))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &[u8]) -> ParseResult {
        RequestParser::default().parse(data)
    }

    fn words(req: &Request) -> Vec<String> {
        std::iter::once(req.command())
            .chain(req.args().iter().map(|a| String::from_utf8_lossy(a).into_owned()))
            .collect()
    }

    #[test]
    fn test_parse_multibulk() {
        let data = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\nhello\r\n";
        let (req, used) = parse(data).unwrap().unwrap();
        assert_eq!(used, data.len());
        assert_eq!(words(&req), vec!["SET", "k", "hello"]);
    }

    #[test]
    fn test_parse_binary_safe_argument() {
        let data = b"*2\r\n$3\r\nGET\r\n$4\r\na\r\nb\r\n";
        let (req, _) = parse(data).unwrap().unwrap();
        assert_eq!(&req.args()[0][..], b"a\r\nb");
    }

    #[test]
    fn test_parse_inline() {
        let (req, used) = parse(b"get  mykey\r\nPING\r\n").unwrap().unwrap();
        assert_eq!(used, 12);
        assert_eq!(words(&req), vec!["GET", "mykey"]);

        let (req, _) = parse(b"PING\n").unwrap().unwrap();
        assert_eq!(req.command(), "PING");
    }

    #[test]
    fn test_partial_input_needs_more() {
        let full = b"*2\r\n$3\r\nGET\r\n$5\r\nhello\r\n";
        for cut in 1..full.len() {
            assert_eq!(parse(&full[..cut]).unwrap(), None, "cut at {}", cut);
        }
        assert!(parse(b"").unwrap().is_none());
        assert!(parse(b"PIN").unwrap().is_none());
    }

    #[test]
    fn test_pipelined_requests() {
        let data = b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n";
        let (first, used) = parse(data).unwrap().unwrap();
        assert_eq!(first.command(), "PING");
        let (second, rest) = parse(&data[used..]).unwrap().unwrap();
        assert_eq!(words(&second), vec!["GET", "k"]);
        assert_eq!(used + rest, data.len());
    }

    #[test]
    fn test_malformed_frames() {
        assert_eq!(
            parse(b"*x\r\n").unwrap_err(),
            ParseError::InvalidLength('*')
        );
        assert_eq!(
            parse(b"*1\r\n:1\r\n").unwrap_err(),
            ParseError::ExpectedBulk(':')
        );
        assert_eq!(
            parse(b"*1\r\n$2\r\nabcd\r\n").unwrap_err(),
            ParseError::MissingCrlf
        );
    }

    #[test]
    fn test_limits() {
        let parser = RequestParser::new(ParserLimits {
            max_args: 2,
            max_bulk_len: 4,
            max_inline_len: 8,
        });
        assert_eq!(
            parser.parse(b"*3\r\n").unwrap_err(),
            ParseError::TooManyArgs(3)
        );
        assert_eq!(
            parser.parse(b"*1\r\n$5\r\n").unwrap_err(),
            ParseError::BulkTooLarge(5)
        );
        assert_eq!(
            parser.parse(b"AAAAAAAAAAAA").unwrap_err(),
            ParseError::InlineTooLong
        );
    }

    #[test]
    fn test_empty_requests() {
        let (req, used) = parse(b"*0\r\n").unwrap().unwrap();
        assert!(req.is_empty());
        assert_eq!(used, 4);

        let (req, _) = parse(b"\r\n").unwrap().unwrap();
        assert!(req.is_empty());
    }
}
