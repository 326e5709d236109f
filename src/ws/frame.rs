//! RFC 6455 frame encoding and decoding.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Largest payload accepted from a peer.
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte & 0x0F {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn is_control(self) -> bool {
        (self as u8) & 0x08 != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),
    #[error("reserved bits set")]
    ReservedBits,
    #[error("payload of {0} bytes exceeds limit")]
    TooLarge(u64),
    #[error("malformed control frame")]
    InvalidControl,
}

/// A decoded frame, payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn text(&self) -> Option<&str> {
        match self.opcode {
            Opcode::Text => std::str::from_utf8(&self.payload).ok(),
            _ => None,
        }
    }

    /// Status code of a close frame, if it carries one.
    pub fn close_code(&self) -> Option<u16> {
        match (self.opcode, self.payload.as_slice()) {
            (Opcode::Close, [hi, lo, ..]) => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }
}

/// Appends one unmasked FIN frame carrying `payload` to `buf`.
///
/// The length uses the smallest form that fits: inline below 126, a 16-bit
/// extension below 65536, a 64-bit extension otherwise.
pub fn encode_frame(buf: &mut BytesMut, opcode: Opcode, payload: &[u8]) {
    let size = payload.len();
    buf.reserve(size + 10);

    buf.put_u8(0x80 | opcode as u8);
    if size < 126 {
        buf.put_u8(size as u8);
    } else if size < 65536 {
        buf.put_u8(126);
        buf.put_u16(size as u16);
    } else {
        buf.put_u8(127);
        buf.put_u64(size as u64);
    }

    buf.put_slice(payload);
}

/// Decodes one frame from the front of `data`.
///
/// Returns the frame and the number of bytes it occupied, or `Ok(None)` if
/// more bytes are needed.
pub fn decode_frame(data: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    let [b0, b1, ..] = *data else {
        return Ok(None);
    };

    if b0 & 0x70 != 0 {
        return Err(FrameError::ReservedBits);
    }

    let fin = b0 & 0x80 != 0;
    let opcode = Opcode::from_u8(b0).ok_or(FrameError::ReservedOpcode(b0 & 0x0F))?;
    let masked = b1 & 0x80 != 0;

    let (len, mut offset) = match b1 & 0x7F {
        126 => match data.get(2..4) {
            Some(ext) => (u16::from_be_bytes([ext[0], ext[1]]) as u64, 4),
            None => return Ok(None),
        },
        127 => match data.get(2..10) {
            Some(ext) => {
                let mut be = [0u8; 8];
                be.copy_from_slice(ext);
                (u64::from_be_bytes(be), 10)
            }
            None => return Ok(None),
        },
        n => (n as u64, 2),
    };

    if opcode.is_control() && (!fin || len > 125) {
        return Err(FrameError::InvalidControl);
    }
    if len > MAX_PAYLOAD as u64 {
        return Err(FrameError::TooLarge(len));
    }
    let len = len as usize;

    let mask = if masked {
        let Some(key) = data.get(offset..offset + 4) else {
            return Ok(None);
        };
        offset += 4;
        Some([key[0], key[1], key[2], key[3]])
    } else {
        None
    };

    let Some(raw) = data.get(offset..offset + len) else {
        return Ok(None);
    };

    let mut payload = raw.to_vec();
    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Ok(Some((
        Frame {
            fin,
            opcode,
            payload,
        },
        offset + len,
    )))
}
