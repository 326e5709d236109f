//! nx - asynchronous HTTP/1.x and WebSocket toolkit
//!
//! A single reactor thread drives every connection, timer and user
//! callback. On top of it sit an incremental HTTP parser, a per-connection
//! protocol engine for servers and clients, WebSocket framing and an ordered
//! router.

pub mod buffer;
pub mod client;
pub mod collection;
pub mod config;
pub mod http;
pub mod reactor;
pub mod router;
pub mod server;
pub mod sync;
pub mod ws;

pub use buffer::Buffer;
pub use client::Httpc;
pub use collection::JsonCollection;
pub use reactor::Reactor;
pub use server::Httpd;
