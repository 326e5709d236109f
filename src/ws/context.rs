use std::fmt;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::ws::frame::{Opcode, encode_frame};

/// Write path of a connection: encoded frames queued for the engine to send.
#[derive(Debug, Clone)]
pub struct Outbox(mpsc::UnboundedSender<Bytes>);

impl Outbox {
    pub fn channel() -> (Outbox, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbox(tx), rx)
    }

    /// Queues raw bytes. Returns `false` once the connection is gone.
    pub fn send(&self, bytes: Bytes) -> bool {
        self.0.send(bytes).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameType {
    #[default]
    Text,
    Binary,
}

/// Per-connection message builder.
///
/// Select a frame type, push payload chunks, then [`Context::done`] sends the
/// accumulated message as a single frame. Cloning yields an independent
/// builder on the same connection, usable from other callbacks.
#[derive(Debug, Clone)]
pub struct Context {
    outbox: Outbox,
    data: BytesMut,
    frame_type: FrameType,
}

impl Context {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            outbox,
            data: BytesMut::new(),
            frame_type: FrameType::Text,
        }
    }

    pub fn frame_type(&mut self, frame_type: FrameType) -> &mut Self {
        self.frame_type = frame_type;
        self
    }

    pub fn push(&mut self, data: impl AsRef<[u8]>) -> &mut Self {
        self.data.extend_from_slice(data.as_ref());
        self
    }

    /// Bytes accumulated for the current message.
    pub fn pending(&self) -> &[u8] {
        &self.data
    }

    /// Encodes the current message and clears the accumulation buffer.
    /// Returns `false` if the connection is already closed.
    pub fn done(&mut self) -> bool {
        let opcode = match self.frame_type {
            FrameType::Text => Opcode::Text,
            FrameType::Binary => Opcode::Binary,
        };

        let mut frame = BytesMut::new();
        encode_frame(&mut frame, opcode, &self.data);
        self.data.clear();

        self.outbox.send(frame.freeze())
    }

    pub fn send_text(&mut self, text: &str) -> bool {
        self.frame_type(FrameType::Text).push(text).done()
    }

    pub fn send_binary(&mut self, data: &[u8]) -> bool {
        self.frame_type(FrameType::Binary).push(data).done()
    }

    /// Sends a close frame; the engine closes the connection after it.
    pub fn close(&mut self, code: u16) -> bool {
        self.control(Opcode::Close, &code.to_be_bytes())
    }

    pub(crate) fn control(&mut self, opcode: Opcode, payload: &[u8]) -> bool {
        let mut frame = BytesMut::new();
        encode_frame(&mut frame, opcode, payload);
        self.outbox.send(frame.freeze())
    }
}

impl fmt::Write for Context {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.data.extend_from_slice(s.as_bytes());
        Ok(())
    }
}
