use std::sync::Arc;

use nx::config::Config;
use nx::http::Method;
use nx::reactor::Reactor;
use nx::server::Httpd;
use nx::sync::CondVar;
use nx::ws::{FrameType, Opcode};
use nx::JsonCollection;

fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(cfg.level())
        .init();

    let reactor = Reactor::new();
    reactor.start()?;

    let collection = JsonCollection::new(&cfg.collection);
    let mut httpd = Httpd::new(&reactor);
    httpd.mount(&collection)?;
    httpd.route(Method::GET).path("/ws")?.ws(|frame, ctx| {
        if frame.opcode == Opcode::Binary {
            ctx.frame_type(FrameType::Binary);
        }
        ctx.push(&frame.payload);
        ctx.done();
        Ok(())
    });

    let addr = httpd.listen(cfg.listen_addr.as_str())?;
    tracing::info!(addr = %addr, collection = %collection.path(), "serving");

    let shutdown = Arc::new(CondVar::new(1));
    let signal = shutdown.clone();
    reactor.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
        }
        signal.notify_all();
    })?;

    shutdown.wait();
    httpd.close();
    reactor.stop();

    Ok(())
}
