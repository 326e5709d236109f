//! WebSocket support: frame codec, per-connection send context and the
//! opening handshake.

pub mod context;
pub mod frame;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};

use crate::http::request::Request;
use crate::http::status::HandlerResult;

pub use context::{Context, FrameType, Outbox};
pub use frame::{Frame, FrameError, Opcode, decode_frame, encode_frame};

pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Handles each text or binary message received on an upgraded connection.
pub type WsHandler = Arc<dyn Fn(&Frame, &mut Context) -> HandlerResult + Send + Sync>;

/// `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Whether `req` asks to switch to the WebSocket protocol.
pub fn is_upgrade(req: &Request) -> bool {
    upgrade_key(req).is_some()
}

/// The client key of a well-formed upgrade request.
pub fn upgrade_key(req: &Request) -> Option<&str> {
    let upgrade = req.header("Upgrade")?;
    let connection = req.header("Connection")?;

    let wants_upgrade = upgrade.eq_ignore_ascii_case("websocket")
        && connection
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    if !wants_upgrade || req.header("Sec-WebSocket-Version") != Some("13") {
        return None;
    }

    req.header("Sec-WebSocket-Key").filter(|k| !k.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::Method;

    #[test]
    fn accept_key_rfc_vector() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn upgrade_detection() {
        let mut req = Request::new(Method::GET, "/ws");
        assert!(!is_upgrade(&req));

        req.set_header("Upgrade", "websocket")
            .set_header("Connection", "keep-alive, Upgrade")
            .set_header("Sec-WebSocket-Version", "13")
            .set_header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(upgrade_key(&req), Some("dGhlIHNhbXBsZSBub25jZQ=="));

        req.set_header("Sec-WebSocket-Version", "8");
        assert!(!is_upgrade(&req));
    }
}
