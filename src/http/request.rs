use std::fmt;

use bytes::Bytes;

use crate::buffer::Buffer;
use crate::http::headers::{Attributes, Headers};
use crate::http::parser::{self, HeadScanner, ParseError};
use crate::http::writer;

/// HTTP request methods.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    #[default]
    GET,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    CONNECT,
    TRACE,
}

impl Method {
    /// Parses an HTTP method from its (case-sensitive) token.
    ///
    /// ```
    /// # use nx::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "HEAD" => Some(Method::HEAD),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            "CONNECT" => Some(Method::CONNECT),
            "TRACE" => Some(Method::TRACE),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::CONNECT => "CONNECT",
            Method::TRACE => "TRACE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP request, either parsed off a connection or built to be sent.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    minor_version: u8,
    headers: Headers,
    attributes: Attributes,
    content_length: usize,
    body: Buffer,
    scanner: HeadScanner,
    parsed: bool,
}

impl Default for Request {
    fn default() -> Self {
        Self::new(Method::GET, "/")
    }
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            minor_version: 1,
            headers: Headers::new(),
            attributes: Attributes::new(),
            content_length: 0,
            body: Buffer::new(),
            scanner: HeadScanner::new(),
            parsed: false,
        }
    }

    /// Parses the header block at the front of `buf`.
    ///
    /// Returns `Ok(false)` while the block is incomplete. On success the block
    /// is consumed from `buf`, leaving the body, and later calls return
    /// `Ok(true)` without doing anything. Whether the body is complete is up
    /// to the caller: `buf.size() >= content_length()`.
    pub fn parse(&mut self, buf: &mut Buffer) -> Result<bool, ParseError> {
        if self.parsed {
            return Ok(true);
        }

        let Some(head) = self.scanner.scan(buf.as_slice())? else {
            return Ok(false);
        };

        let raw = buf.as_slice();
        let [method, target, version] = head.start_line;

        let method = method.text(raw, ParseError::InvalidRequest)?;
        self.method =
            Method::from_str(method).ok_or_else(|| ParseError::InvalidMethod(method.to_string()))?;
        self.path = target.text(raw, ParseError::InvalidRequest)?.to_string();
        self.minor_version = parser::parse_version(version.text(raw, ParseError::InvalidVersion)?)?;
        self.headers = head.headers(raw)?;
        self.content_length = parser::content_length(&self.headers)?;

        buf.consume(head.len);
        self.parsed = true;
        Ok(true)
    }

    pub fn is_parsed(&self) -> bool {
        self.parsed
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Request target as received, query string included.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Request target without the query string.
    pub fn route_path(&self) -> &str {
        self.path.split_once('?').map_or(self.path.as_str(), |(p, _)| p)
    }

    pub fn query(&self) -> Option<&str> {
        self.path.split_once('?').map(|(_, q)| q)
    }

    pub fn minor_version(&self) -> u8 {
        self.minor_version
    }

    /// `Content-Length` of a parsed request, or the body size of one being
    /// built.
    pub fn content_length(&self) -> usize {
        if self.parsed {
            self.content_length
        } else {
            self.body.size()
        }
    }

    /// Retrieves a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.set(name, value);
        self
    }

    /// Retrieves an attribute: a path capture, query or form field.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.attributes.set(name, value);
        self
    }

    /// Whether the body is `application/x-www-form-urlencoded`.
    pub fn is_form(&self) -> bool {
        self.header("Content-Type").is_some_and(|ct| {
            ct.split(';')
                .next()
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
        })
    }

    /// Decodes query string parameters into attributes.
    pub fn decode_query(&mut self) {
        if let Some(query) = self.query() {
            let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect();
            self.attributes.extend(pairs);
        }
    }

    /// Outgoing body.
    pub fn body(&self) -> &Buffer {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Buffer {
        &mut self.body
    }

    pub fn push(&mut self, data: impl AsRef<[u8]>) -> &mut Self {
        self.body.append(data.as_ref());
        self
    }

    /// Serialized request: start line, headers and body.
    pub fn content(&self) -> Bytes {
        writer::serialize_request(self)
    }
}

impl PartialEq<Method> for Request {
    fn eq(&self, other: &Method) -> bool {
        self.method == *other
    }
}
