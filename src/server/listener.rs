use std::io;

use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::http::connection::Connection;
use crate::http::engine::{Http, RequestCb};

/// Accepts connections forever, serving each with a fresh engine.
pub async fn run(listener: TcpListener, cb: RequestCb) -> io::Result<()> {
    let local = listener.local_addr()?;
    info!(addr = %local, "accepting connections");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(addr = %local, error = %e, "accept failed");
                continue;
            }
        };
        debug!(peer = %peer, "accepted connection");

        let cb = cb.clone();
        tokio::spawn(async move {
            let engine = Http::server(Connection::tcp(socket));
            if let Err(e) = engine.serve(cb).await {
                debug!(peer = %peer, error = %e, "connection error");
            }
        });
    }
}
