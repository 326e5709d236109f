//! HTTP server bound to a [`Reactor`].

pub mod listener;

use std::io;
use std::net::{SocketAddr, TcpListener as StdListener, ToSocketAddrs};
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio::task::AbortHandle;
use tracing::info;

use crate::collection::JsonCollection;
use crate::http::engine::RequestCb;
use crate::http::request::Method;
use crate::reactor::Reactor;
use crate::router::{Route, RouteError, RoutesMap};

/// A listening endpoint kept alive in the reactor registry.
#[derive(Debug)]
struct Endpoint {
    addr: SocketAddr,
    task: Mutex<Option<AbortHandle>>,
}

impl Endpoint {
    fn abort(&self) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Route registry plus the endpoints it has been bound to.
///
/// ```ignore
/// let mut httpd = Httpd::new(&reactor);
/// httpd.route(Method::GET).path("/hello")?.to(|_, _, rep| {
///     rep.push("hi");
///     Ok(())
/// });
/// let addr = httpd.listen("127.0.0.1:0")?;
/// ```
pub struct Httpd {
    reactor: Reactor,
    routes: RoutesMap,
    endpoints: Vec<Arc<Endpoint>>,
}

impl Httpd {
    pub fn new(reactor: &Reactor) -> Self {
        Self {
            reactor: reactor.clone(),
            routes: RoutesMap::new(),
            endpoints: Vec::new(),
        }
    }

    /// Registers a new route for `method`.
    pub fn route(&mut self, method: Method) -> &mut Route {
        self.routes.add(method)
    }

    pub fn routes(&self) -> &RoutesMap {
        &self.routes
    }

    /// Registers the REST routes of `collection`.
    pub fn mount(&mut self, collection: &JsonCollection) -> Result<&mut Self, RouteError> {
        collection.register(&mut self.routes)?;
        Ok(self)
    }

    /// Binds `addr` and starts accepting on the reactor.
    ///
    /// Routes registered afterwards are not seen by this endpoint. Returns the
    /// bound address, which resolves port 0.
    pub fn listen(&mut self, addr: impl ToSocketAddrs) -> io::Result<SocketAddr> {
        let handle = self.reactor.handle().map_err(io::Error::other)?;

        let std_listener = StdListener::bind(addr)?;
        std_listener.set_nonblocking(true)?;
        let local = std_listener.local_addr()?;

        let listener = {
            let _guard = handle.enter();
            TcpListener::from_std(std_listener)?
        };

        let cb: RequestCb = self.routes.clone().into();
        let task = handle.spawn(listener::run(listener, cb));

        let endpoint = Arc::new(Endpoint {
            addr: local,
            task: Mutex::new(Some(task.abort_handle())),
        });
        self.reactor.add(endpoint.clone());
        self.endpoints.push(endpoint);

        info!(addr = %local, routes = self.routes.len(), "listening");
        Ok(local)
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.endpoints.iter().map(|e| e.addr).collect()
    }

    /// Stops accepting on every endpoint. Connections already accepted run
    /// to completion.
    pub fn close(&mut self) {
        for endpoint in self.endpoints.drain(..) {
            endpoint.abort();
            self.reactor.remove(&endpoint);
        }
    }
}
