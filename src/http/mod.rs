//! HTTP/1.x protocol implementation.
//!
//! # Architecture
//!
//! - **`connection`**: transport wrapper owning the read and write buffers
//! - **`parser`**: incremental head scanner shared by requests and replies
//! - **`headers`**: ordered header and attribute maps
//! - **`request`** / **`reply`**: message types, parsed or built by handlers
//! - **`status`**: status codes and handler errors
//! - **`writer`**: wire serialization
//! - **`engine`**: the per-connection state machine for both sides
//!
//! # Connection State Machine
//!
//! Each server connection carries exactly one request:
//!
//! ```text
//!        ┌──────────────────┐
//!        │ AwaitingHeaders  │ ← Wait for the header block
//!        └──────┬───────────┘
//!               │ Head parsed
//!               ▼
//!        ┌──────────────────┐
//!        │  AwaitingBody    │ ← Wait for Content-Length bytes
//!        └──────┬───────────┘
//!               │ Body complete
//!               ▼
//!        ┌──────────────────┐
//!        │   Dispatched     │ ← Route callback runs
//!        └──────┬───────────┘
//!               ├─ Postponed → Responding once the reply is done
//!               ▼
//!        ┌──────────────────┐
//!        │   Responding     │ ← Reply written
//!        └──────┬───────────┘
//!               ├─ Upgraded → WebSocket frames until close
//!               └─ Closing
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use nx::http::{Connection, Http, RequestCb};
//!
//! let cb: RequestCb = Arc::new(|_req, _body, rep| {
//!     rep.push("hello");
//!     Ok(())
//! });
//! let (socket, _) = listener.accept().await?;
//! Http::server(Connection::tcp(socket)).serve(cb).await?;
//! ```

pub mod connection;
pub mod engine;
pub mod headers;
pub mod parser;
pub mod reply;
pub mod request;
pub mod status;
pub mod writer;

pub use connection::Connection;
pub use engine::{Http, ReplyCb, RequestCb, State};
pub use headers::{Attributes, Headers};
pub use parser::ParseError;
pub use reply::{Deferred, Reply};
pub use request::{Method, Request};
pub use status::{HandlerError, HandlerResult, Status};
