//! HTTP client bound to a [`Reactor`].

use std::sync::Arc;

use serde::Serialize;
use tokio::net::TcpStream;
use tracing::debug;

use crate::buffer::Buffer;
use crate::http::connection::Connection;
use crate::http::engine::{Http, bad_response};
use crate::http::reply::Reply;
use crate::http::request::{Method, Request};
use crate::reactor::{Reactor, ReactorError};

#[derive(Debug, Clone)]
pub struct Httpc {
    reactor: Reactor,
}

impl Httpc {
    pub fn new(reactor: &Reactor) -> Self {
        Self {
            reactor: reactor.clone(),
        }
    }

    /// Starts building a request to `addr` (`host:port`).
    pub fn request(&self, method: Method, addr: impl ToString) -> Exchange {
        Exchange {
            reactor: self.reactor.clone(),
            addr: addr.to_string(),
            req: Request::new(method, "/"),
            segments: Vec::new(),
        }
    }
}

/// Marks an exchange as in flight in the reactor registry.
#[derive(Debug)]
struct InFlight {
    addr: String,
}

/// One request/reply exchange.
#[derive(Debug)]
pub struct Exchange {
    reactor: Reactor,
    addr: String,
    req: Request,
    segments: Vec<String>,
}

impl Exchange {
    /// Appends a path segment; segments are joined with `/`.
    pub fn path(mut self, segment: impl ToString) -> Self {
        let segment = segment.to_string();
        self.segments
            .extend(segment.split('/').filter(|s| !s.is_empty()).map(str::to_string));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.req.set_header(name, value);
        self
    }

    pub fn body(mut self, data: impl AsRef<[u8]>) -> Self {
        self.req.push(data);
        self
    }

    /// Serializes `value` as the body with a JSON content type.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        let data = serde_json::to_vec(value)?;
        self.req.set_header("Content-Type", "application/json");
        self.req.push(data);
        Ok(self)
    }

    pub fn request(&self) -> &Request {
        &self.req
    }

    /// Sends the request on the reactor; `cb` receives the reply and its
    /// body. Transport failures are reported as `502 Bad Gateway` replies.
    pub fn send<F>(self, cb: F) -> Result<(), ReactorError>
    where
        F: FnOnce(&Reply, &mut Buffer) + Send + 'static,
    {
        let Exchange {
            reactor,
            addr,
            req,
            segments,
        } = self;

        let mut out = Request::new(req.method(), format!("/{}", segments.join("/")));
        for (name, value) in req.headers().iter() {
            out.set_header(name, value);
        }
        out.push(req.body());

        let pending = Arc::new(InFlight { addr });
        let registry = reactor.clone();
        let task = pending.clone();
        reactor.add(pending.clone());

        let spawned = reactor.spawn(async move {
            debug!(addr = %task.addr, method = %out.method(), path = %out.path(), "sending request");

            match TcpStream::connect(task.addr.as_str()).await {
                Ok(stream) => {
                    Http::client(Connection::tcp(stream), out).fetch(Box::new(cb)).await;
                }
                Err(e) => {
                    debug!(addr = %task.addr, error = %e, "connect failed");
                    cb(&bad_response(e), &mut Buffer::new());
                }
            }

            registry.remove(&task);
        });

        if let Err(e) = spawned {
            reactor.remove(&pending);
            return Err(e);
        }
        Ok(())
    }
}
