use std::fmt;
use std::ops::{Deref, DerefMut};

use bytes::Bytes;

use crate::buffer::Buffer;
use crate::http::headers::Headers;
use crate::http::parser::{self, HeadScanner, ParseError};
use crate::http::request::Request;
use crate::http::status::Status;
use crate::http::writer;
use crate::ws::{self, WsHandler};

/// What the engine receives when a reply is finalized.
pub(crate) struct Finished {
    pub content: Bytes,
    pub upgrade: Option<WsHandler>,
}

pub(crate) type Completion = Box<dyn FnOnce(Finished) + Send>;

/// An HTTP reply: built by a server handler or parsed by a client.
///
/// On the server side the engine stores a completion continuation on the
/// reply before the handler runs. [`Reply::done`] runs it exactly once, which
/// writes the reply and closes (or upgrades) the connection. A handler that
/// cannot answer right away calls [`Reply::postpone`] and finishes later
/// through the returned [`Deferred`].
pub struct Reply {
    status: Status,
    headers: Headers,
    body: Buffer,
    content_length: usize,
    minor_version: u8,
    scanner: HeadScanner,
    parsed: bool,
    postponed: bool,
    head_only: bool,
    completion: Option<Completion>,
    upgrade: Option<WsHandler>,
}

impl Default for Reply {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body.size())
            .field("postponed", &self.postponed)
            .field("pending", &self.completion.is_some())
            .finish()
    }
}

impl Reply {
    pub fn new() -> Self {
        Self::with_status(Status::OK)
    }

    pub fn with_status(status: Status) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Buffer::new(),
            content_length: 0,
            minor_version: 1,
            scanner: HeadScanner::new(),
            parsed: false,
            postponed: false,
            head_only: false,
            completion: None,
            upgrade: None,
        }
    }

    /// Parses the status line and headers at the front of `buf`; same
    /// contract as [`Request::parse`].
    pub fn parse(&mut self, buf: &mut Buffer) -> Result<bool, ParseError> {
        if self.parsed {
            return Ok(true);
        }

        let Some(head) = self.scanner.scan(buf.as_slice())? else {
            return Ok(false);
        };

        let raw = buf.as_slice();
        let [version, code, _reason] = head.start_line;

        self.minor_version = parser::parse_version(version.text(raw, ParseError::InvalidVersion)?)?;
        self.status = code
            .text(raw, ParseError::InvalidStatus)?
            .parse::<u16>()
            .ok()
            .and_then(Status::from_u16)
            .ok_or(ParseError::InvalidStatus)?;
        self.headers = head.headers(raw)?;
        self.content_length = parser::content_length(&self.headers)?;

        buf.consume(head.len);
        self.parsed = true;
        Ok(true)
    }

    pub fn is_parsed(&self) -> bool {
        self.parsed
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn set_status(&mut self, status: Status) -> &mut Self {
        self.status = status;
        self
    }

    pub fn minor_version(&self) -> u8 {
        self.minor_version
    }

    /// `Content-Length` of a parsed reply, or the body size of one being
    /// built.
    pub fn content_length(&self) -> usize {
        if self.parsed {
            self.content_length
        } else {
            self.body.size()
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.set(name, value);
        self
    }

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

    /// Serialized reply: status line, headers and body.
    pub fn content(&self) -> Bytes {
        writer::serialize_reply(self)
    }

    /// Answers a WebSocket handshake with `101 Switching Protocols`; once the
    /// reply is written the connection carries frames handled by `handler`.
    pub fn upgrade(&mut self, req: &Request, handler: WsHandler) -> Result<&mut Self, Status> {
        let key = ws::upgrade_key(req).ok_or(Status::BAD_REQUEST)?;

        self.status = Status::SWITCHING_PROTOCOLS;
        self.headers.set("Upgrade", "websocket");
        self.headers.set("Connection", "Upgrade");
        self.headers.set("Sec-WebSocket-Accept", ws::accept_key(key));
        self.upgrade = Some(handler);
        Ok(self)
    }

    pub fn is_upgrade(&self) -> bool {
        self.upgrade.is_some()
    }

    /// Whether this answers a `HEAD` request: the body is measured for
    /// `Content-Length` but not sent.
    pub fn is_head_only(&self) -> bool {
        self.head_only
    }

    pub(crate) fn set_head_only(&mut self, head_only: bool) {
        self.head_only = head_only;
    }

    pub fn is_postponed(&self) -> bool {
        self.postponed
    }

    /// Defers finalization. The returned handle owns the reply and may be
    /// moved to another callback or thread; it finalizes on
    /// [`Deferred::done`] or when dropped. What stays behind is an inert
    /// placeholder marked as postponed.
    pub fn postpone(&mut self) -> Deferred {
        let mut reply = std::mem::take(self);
        reply.postponed = true;
        self.postponed = true;
        Deferred { reply }
    }

    pub(crate) fn on_done(&mut self, completion: Completion) {
        self.completion = Some(completion);
    }

    /// Runs the completion continuation. Later calls do nothing.
    pub fn done(&mut self) {
        if let Some(completion) = self.completion.take() {
            let content = self.content();
            completion(Finished {
                content,
                upgrade: self.upgrade.take(),
            });
        }
    }

    /// Whether a completion is still waiting to run.
    pub fn is_pending(&self) -> bool {
        self.completion.is_some()
    }
}

impl PartialEq<Status> for Reply {
    fn eq(&self, other: &Status) -> bool {
        self.status == *other
    }
}

impl fmt::Write for Reply {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.body.append(s.as_bytes());
        Ok(())
    }
}

/// A postponed reply. Finalizes exactly once: on [`Deferred::done`] or drop.
#[derive(Debug)]
pub struct Deferred {
    reply: Reply,
}

impl Deferred {
    pub fn done(mut self) {
        self.reply.done();
    }
}

impl Deref for Deferred {
    type Target = Reply;

    fn deref(&self) -> &Reply {
        &self.reply
    }
}

impl DerefMut for Deferred {
    fn deref_mut(&mut self) -> &mut Reply {
        &mut self.reply
    }
}

impl Drop for Deferred {
    fn drop(&mut self) {
        self.reply.done();
    }
}
