//! Per-connection protocol engine.
//!
//! ```text
//!   AwaitingHeaders ──▶ AwaitingBody ──▶ Dispatched ──┬──▶ Responding ──┬──▶ Closing
//!          ▲   more bytes      │                      └──▶ Postponed ───┤
//!          └───────────────────┘                                        └──▶ Upgraded ──▶ Closing
//! ```
//!
//! Parsing and dispatch are synchronous steps over whatever is buffered;
//! [`Http::serve`] and [`Http::fetch`] drive them from transport reads.
//! Handler errors never escape: they become reply statuses.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::buffer::Buffer;
use crate::http::connection::Connection;
use crate::http::headers::Attributes;
use crate::http::parser::ParseError;
use crate::http::reply::{Finished, Reply};
use crate::http::request::{Method, Request};
use crate::http::status::{HandlerError, HandlerResult, Status};
use crate::ws::{Context, Frame, Opcode, Outbox, WsHandler, decode_frame};

/// Server-side request callback: request, remaining input, reply.
pub type RequestCb = Arc<dyn Fn(&mut Request, &mut Buffer, &mut Reply) -> HandlerResult + Send + Sync>;

/// Client-side reply callback: reply and remaining input (the body).
pub type ReplyCb = Box<dyn FnOnce(&Reply, &mut Buffer) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    AwaitingHeaders,
    AwaitingBody,
    Dispatched,
    Postponed,
    Responding,
    Upgraded,
    Closing,
}

pub struct Http<T> {
    conn: Connection<T>,
    req: Request,
    rep: Reply,
    state: State,
    finished: Option<oneshot::Receiver<Finished>>,
}

impl<T> Http<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn server(conn: Connection<T>) -> Self {
        Self::client(conn, Request::default())
    }

    /// An engine that will send `req` and wait for the reply.
    pub fn client(conn: Connection<T>, req: Request) -> Self {
        Self {
            conn,
            req,
            rep: Reply::new(),
            state: State::AwaitingHeaders,
            finished: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn request(&self) -> &Request {
        &self.req
    }

    pub fn reply(&self) -> &Reply {
        &self.rep
    }

    pub fn connection_mut(&mut self) -> &mut Connection<T> {
        &mut self.conn
    }

    /// Advances the server side over the buffered input.
    pub fn process_request(&mut self, cb: &RequestCb) -> State {
        if !matches!(self.state, State::AwaitingHeaders | State::AwaitingBody) {
            return self.state;
        }

        match self.req.parse(self.conn.rbuf_mut()) {
            Ok(false) => self.state = State::AwaitingHeaders,
            Ok(true) if self.conn.rbuf().size() < self.req.content_length() => {
                self.state = State::AwaitingBody;
            }
            Ok(true) => self.dispatch(cb),
            Err(e) => self.reject(e),
        }

        self.state
    }

    fn arm_reply(&mut self) {
        self.rep
            .set_head_only(self.req.is_parsed() && self.req.method() == Method::HEAD);

        let (tx, rx) = oneshot::channel();
        self.rep.on_done(Box::new(move |finished| {
            let _ = tx.send(finished);
        }));
        self.finished = Some(rx);
    }

    fn dispatch(&mut self, cb: &RequestCb) {
        if self.req.is_form() {
            let body = self.conn.rbuf_mut().take_front(self.req.content_length());
            let form = Attributes::parse_form(&body);
            self.req.attributes_mut().extend(form.iter());
        }

        self.state = State::Dispatched;
        self.arm_reply();

        let result = cb(&mut self.req, self.conn.rbuf_mut(), &mut self.rep);
        if let Err(e) = result {
            if self.rep.is_postponed() {
                // the error wins; whatever the deferred reply sends is dropped
                self.rep = Reply::new();
                self.arm_reply();
            }
            apply_error(&mut self.rep, e);
        }

        debug!(
            method = %self.req.method(),
            path = %self.req.path(),
            status = self.rep.status().as_u16(),
            postponed = self.rep.is_postponed(),
            "request dispatched"
        );

        if self.rep.is_postponed() {
            self.state = State::Postponed;
        } else {
            self.rep.done();
            self.state = State::Responding;
        }
    }

    fn reject(&mut self, e: ParseError) {
        warn!(error = %e, "malformed request");

        self.arm_reply();
        self.rep.set_status(Status::BAD_REQUEST).push(e.to_string());
        self.rep.done();
        self.state = State::Responding;
    }

    /// Serves a single request on this connection, then closes it (or runs
    /// the WebSocket session the handler upgraded to).
    pub async fn serve(mut self, cb: RequestCb) -> io::Result<()> {
        loop {
            match self.state {
                State::AwaitingHeaders | State::AwaitingBody => {
                    if self.conn.fill().await? == 0 {
                        debug!(state = ?self.state, "peer closed before request was complete");
                        self.state = State::Closing;
                        continue;
                    }
                    self.process_request(&cb);
                }
                State::Postponed | State::Responding => {
                    let finished = match self.finished.take() {
                        Some(rx) => rx.await.ok(),
                        None => None,
                    };

                    let Some(finished) = finished else {
                        self.state = State::Closing;
                        continue;
                    };

                    self.conn.write_all(&finished.content).await?;

                    match finished.upgrade {
                        Some(handler) => {
                            self.state = State::Upgraded;
                            return self.websocket(handler).await;
                        }
                        None => self.state = State::Closing,
                    }
                }
                State::Dispatched | State::Upgraded | State::Closing => {
                    self.state = State::Closing;
                    return self.conn.close().await;
                }
            }
        }
    }

    async fn websocket(mut self, handler: WsHandler) -> io::Result<()> {
        let (outbox, mut queued) = Outbox::channel();
        let mut ctx = Context::new(outbox);

        debug!(peer = ?self.conn.peer_addr(), "websocket session started");

        loop {
            // frames may have arrived together with the handshake
            let mut open = true;
            while open {
                match decode_frame(self.conn.rbuf().as_slice()) {
                    Ok(Some((frame, used))) => {
                        self.conn.rbuf_mut().consume(used);
                        open = on_frame(&frame, &handler, &mut ctx);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "websocket protocol error");
                        ctx.close(1002);
                        open = false;
                    }
                }
            }

            while let Ok(bytes) = queued.try_recv() {
                self.conn.wbuf_mut().append(&bytes);
            }
            self.conn.flush().await?;

            if !open {
                break;
            }

            tokio::select! {
                n = self.conn.fill() => {
                    if n? == 0 {
                        break;
                    }
                }
                Some(bytes) = queued.recv() => {
                    self.conn.wbuf_mut().append(&bytes);
                }
            }
        }

        debug!(peer = ?self.conn.peer_addr(), "websocket session closed");
        self.state = State::Closing;
        self.conn.close().await
    }

    /// Writes the request, injecting `Host` from the local address.
    pub async fn send_request(&mut self) -> io::Result<()> {
        let host = self.conn.local_str();
        self.req.set_header("Host", host);
        let content = self.req.content();
        self.conn.write_all(&content).await
    }

    /// Advances the client side; `true` once the reply is complete or has
    /// been replaced by a bad-response reply.
    pub fn process_reply(&mut self) -> bool {
        match self.rep.parse(self.conn.rbuf_mut()) {
            Ok(false) => {
                self.state = State::AwaitingHeaders;
                false
            }
            Ok(true) if self.conn.rbuf().size() < self.rep.content_length() => {
                self.state = State::AwaitingBody;
                false
            }
            Ok(true) => {
                self.state = State::Dispatched;
                true
            }
            Err(e) => {
                warn!(error = %e, "malformed reply");
                self.rep = bad_response(e);
                self.state = State::Dispatched;
                true
            }
        }
    }

    /// Sends the request, waits for the whole reply, hands it to `cb` and
    /// closes the connection.
    pub async fn fetch(mut self, cb: ReplyCb) {
        if let Err(e) = self.send_request().await {
            self.rep = bad_response(e);
        } else {
            while !self.process_reply() {
                match self.conn.fill().await {
                    Ok(0) => {
                        self.rep = bad_response("connection closed before reply was complete");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.rep = bad_response(e);
                        break;
                    }
                }
            }
        }

        cb(&self.rep, self.conn.rbuf_mut());

        self.state = State::Closing;
        if let Err(e) = self.conn.close().await {
            debug!(error = %e, "close failed");
        }
    }
}

/// The reply reported to clients when no usable reply arrived.
pub fn bad_response(reason: impl ToString) -> Reply {
    let mut rep = Reply::with_status(Status::BAD_GATEWAY);
    rep.push(reason.to_string());
    rep
}

fn apply_error(rep: &mut Reply, e: HandlerError) {
    match e {
        HandlerError::Status(status) => {
            rep.set_status(status);
        }
        other => {
            warn!(error = %other, "handler failed");
            rep.set_status(Status::BAD_REQUEST);
            rep.body_mut().clear();
            rep.push(other.to_string());
        }
    }
}

/// Returns `false` once the session should end.
fn on_frame(frame: &Frame, handler: &WsHandler, ctx: &mut Context) -> bool {
    match frame.opcode {
        Opcode::Text | Opcode::Binary if frame.fin => match handler(frame, ctx) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "websocket handler failed");
                ctx.close(1011);
                false
            }
        },
        Opcode::Ping => {
            ctx.control(Opcode::Pong, &frame.payload);
            true
        }
        Opcode::Pong => true,
        Opcode::Close => {
            let code = frame.close_code().unwrap_or(1000);
            ctx.control(Opcode::Close, &code.to_be_bytes());
            false
        }
        // fragmented messages are not supported
        _ => {
            ctx.close(1002);
            false
        }
    }
}
