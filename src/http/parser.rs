//! Incremental scanner for HTTP/1.x header blocks.
//!
//! The scanner is fed the whole, growing read buffer on every call. It keeps
//! how many bytes it has already looked at so that a retry without new data
//! is free and a retry with new data resumes the terminator search where the
//! previous one stopped. Tokens are recorded as `(start, len)` spans into the
//! buffer and turned into owned strings by the caller right away, so nothing
//! refers into the buffer once it grows or is consumed.

use thiserror::Error;

use crate::http::headers::Headers;

/// Maximum number of header fields in one message.
pub const MAX_HEADERS: usize = 128;

/// Maximum size of a header block, start line included.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed start line")]
    InvalidRequest,
    #[error("unsupported method `{0}`")]
    InvalidMethod(String),
    #[error("unsupported protocol version")]
    InvalidVersion,
    #[error("invalid status code")]
    InvalidStatus,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("more than {} header fields", MAX_HEADERS)]
    TooManyHeaders,
    #[error("header block larger than {} bytes", MAX_HEAD_BYTES)]
    HeadTooLarge,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub len: usize,
}

impl Span {
    pub fn of<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.start..self.start + self.len]
    }

    pub fn text<'a>(&self, buf: &'a [u8], err: ParseError) -> Result<&'a str, ParseError> {
        std::str::from_utf8(self.of(buf)).map_err(|_| err)
    }
}

/// A tokenized header block.
#[derive(Debug, Clone, Default)]
pub struct Head {
    /// Request: method, target, version. Reply: version, code, reason.
    pub start_line: [Span; 3],
    pub fields: Vec<(Span, Span)>,
    /// Size of the block including the terminating empty line.
    pub len: usize,
}

impl Head {
    /// Copies the header fields out of `buf`.
    pub fn headers(&self, buf: &[u8]) -> Result<Headers, ParseError> {
        let mut headers = Headers::new();
        for (name, value) in &self.fields {
            let name = name.text(buf, ParseError::InvalidHeader)?;
            let value = String::from_utf8_lossy(value.of(buf));
            headers.set(name, value);
        }
        Ok(headers)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeadScanner {
    prev_buf_len: usize,
    newlines: usize,
}

impl HeadScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Ok(None)` until a whole header block is available.
    pub fn scan(&mut self, buf: &[u8]) -> Result<Option<Head>, ParseError> {
        if buf.len() <= self.prev_buf_len {
            return Ok(None);
        }

        let fresh = &buf[self.prev_buf_len..];
        self.newlines += fresh.iter().filter(|b| **b == b'\n').count();

        let from = self.prev_buf_len.saturating_sub(3);
        self.prev_buf_len = buf.len();

        let Some(end) = find(&buf[from..], b"\r\n\r\n").map(|i| from + i + 4) else {
            if buf.len() > MAX_HEAD_BYTES {
                return Err(ParseError::HeadTooLarge);
            }
            // one line is the start line
            if self.newlines > MAX_HEADERS + 1 {
                return Err(ParseError::TooManyHeaders);
            }
            return Ok(None);
        };

        if end > MAX_HEAD_BYTES {
            return Err(ParseError::HeadTooLarge);
        }

        tokenize(&buf[..end]).map(Some)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn tokenize(block: &[u8]) -> Result<Head, ParseError> {
    let mut head = Head {
        len: block.len(),
        ..Head::default()
    };

    // drop the final empty line
    let lines_end = block.len() - 2;
    let mut pos = 0;
    let mut first = true;

    while pos < lines_end {
        let len = find(&block[pos..lines_end], b"\r\n").ok_or(ParseError::InvalidHeader)?;
        let line = Span { start: pos, len };

        if first {
            head.start_line = start_line(block, line)?;
            first = false;
        } else {
            if head.fields.len() == MAX_HEADERS {
                return Err(ParseError::TooManyHeaders);
            }
            head.fields.push(field(block, line)?);
        }

        pos += len + 2;
    }

    if first {
        return Err(ParseError::InvalidRequest);
    }

    Ok(head)
}

fn start_line(buf: &[u8], line: Span) -> Result<[Span; 3], ParseError> {
    let bytes = line.of(buf);

    let a = bytes.iter().position(|b| *b == b' ').ok_or(ParseError::InvalidRequest)?;
    let rest = &bytes[a + 1..];
    let b = rest.iter().position(|b| *b == b' ').unwrap_or(rest.len());

    if a == 0 || b == 0 {
        return Err(ParseError::InvalidRequest);
    }

    let second = Span {
        start: line.start + a + 1,
        len: b,
    };
    let third_start = (second.start + b + 1).min(line.start + line.len);

    Ok([
        Span {
            start: line.start,
            len: a,
        },
        second,
        Span {
            start: third_start,
            len: line.start + line.len - third_start,
        },
    ])
}

fn field(buf: &[u8], line: Span) -> Result<(Span, Span), ParseError> {
    let bytes = line.of(buf);

    let colon = bytes.iter().position(|b| *b == b':').ok_or(ParseError::InvalidHeader)?;
    let name = &bytes[..colon];
    if name.is_empty() || name.iter().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(ParseError::InvalidHeader);
    }

    let value = &bytes[colon + 1..];
    let lead = value.iter().take_while(|b| **b == b' ' || **b == b'\t').count();
    let trail = value[lead..]
        .iter()
        .rev()
        .take_while(|b| **b == b' ' || **b == b'\t')
        .count();

    Ok((
        Span {
            start: line.start,
            len: colon,
        },
        Span {
            start: line.start + colon + 1 + lead,
            len: value.len() - lead - trail,
        },
    ))
}

/// `HTTP/1.x` to its minor version.
pub fn parse_version(text: &str) -> Result<u8, ParseError> {
    match text.strip_prefix("HTTP/1.").map(str::as_bytes) {
        Some([d]) if d.is_ascii_digit() => Ok(d - b'0'),
        _ => Err(ParseError::InvalidVersion),
    }
}

pub fn content_length(headers: &Headers) -> Result<usize, ParseError> {
    headers
        .get("Content-Length")
        .map(|v| v.trim().parse::<usize>().map_err(|_| ParseError::InvalidContentLength))
        .transpose()
        .map(|len| len.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_complete_block() {
        let buf = b"GET /a HTTP/1.1\r\nHost: x\r\nAccept:  */*  \r\n\r\nbody";
        let head = HeadScanner::new().scan(buf).unwrap().unwrap();

        assert_eq!(head.len, buf.len() - 4);
        assert_eq!(head.start_line[0].of(buf), b"GET");
        assert_eq!(head.start_line[1].of(buf), b"/a");
        assert_eq!(head.start_line[2].of(buf), b"HTTP/1.1");

        let headers = head.headers(buf).unwrap();
        assert_eq!(headers.get("accept"), Some("*/*"));
    }

    #[test]
    fn terminator_split_across_calls() {
        let full = b"HTTP/1.1 204 No Content\r\nServer: nx\r\n\r\n";
        let mut scanner = HeadScanner::new();

        assert!(scanner.scan(&full[..full.len() - 1]).unwrap().is_none());
        // no new bytes, nothing to do
        assert!(scanner.scan(&full[..full.len() - 1]).unwrap().is_none());

        let head = scanner.scan(full).unwrap().unwrap();
        assert_eq!(head.start_line[2].of(full), b"No Content");
    }

    #[test]
    fn status_line_without_reason() {
        let buf = b"HTTP/1.0 200\r\n\r\n";
        let head = HeadScanner::new().scan(buf).unwrap().unwrap();
        assert_eq!(head.start_line[1].of(buf), b"200");
        assert!(head.start_line[2].of(buf).is_empty());
    }

    #[test]
    fn header_without_colon_is_rejected() {
        let buf = b"GET / HTTP/1.1\r\nBroken\r\n\r\n";
        assert_eq!(HeadScanner::new().scan(buf).unwrap_err(), ParseError::InvalidHeader);
    }

    #[test]
    fn too_many_headers_while_partial() {
        let mut buf = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..=MAX_HEADERS {
            buf.extend_from_slice(format!("X-{}: v\r\n", i).as_bytes());
        }
        assert_eq!(HeadScanner::new().scan(&buf).unwrap_err(), ParseError::TooManyHeaders);
    }

    #[test]
    fn versions() {
        assert_eq!(parse_version("HTTP/1.1"), Ok(1));
        assert_eq!(parse_version("HTTP/1.0"), Ok(0));
        assert_eq!(parse_version("HTTP/2.0"), Err(ParseError::InvalidVersion));
        assert_eq!(parse_version("HTTP/1.10"), Err(ParseError::InvalidVersion));
    }
}
