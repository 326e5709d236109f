//! Growable byte buffer with a read cursor.
//!
//! `Buffer` is the unit every other layer exchanges: the connection reads into
//! one, the parser scans one, handlers receive the remaining input as one and
//! write reply bodies into one.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Buffer {
    data: BytesMut,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends bytes at the end. May reallocate; views returned by `peek`
    /// are borrows and therefore can never outlive a reallocation.
    pub fn append(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    /// Drops `n` bytes from the front.
    ///
    /// # Panics
    ///
    /// Panics when `n` is larger than [`Buffer::size`].
    pub fn consume(&mut self, n: usize) {
        assert!(
            n <= self.data.len(),
            "consume({}) past end of buffer of size {}",
            n,
            self.data.len()
        );
        self.data.advance(n);
    }

    /// Returns up to `n` bytes from the front without moving the cursor.
    pub fn peek(&self, n: usize) -> &[u8] {
        &self.data[..n.min(self.data.len())]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Splits off the whole content, leaving the buffer empty.
    pub fn take(&mut self) -> Bytes {
        self.data.split().freeze()
    }

    /// Splits off the first `n` bytes (clamped to the size).
    pub fn take_front(&mut self, n: usize) -> Bytes {
        let n = n.min(self.data.len());
        self.data.split_to(n).freeze()
    }

    /// Stream-style extraction of a typed value, advancing the cursor.
    ///
    /// Returns `None` (leaving the buffer untouched) when not enough bytes are
    /// available or they do not form a valid value.
    pub fn extract<T: Extract>(&mut self) -> Option<T> {
        T::extract(self)
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.data
    }
}

/// A value that can be pulled off the front of a [`Buffer`].
pub trait Extract: Sized {
    fn extract(buf: &mut Buffer) -> Option<Self>;
}

macro_rules! extract_be {
    ($($ty:ty => $get:ident),* $(,)?) => {
        $(
            impl Extract for $ty {
                fn extract(buf: &mut Buffer) -> Option<Self> {
                    if buf.data.len() < std::mem::size_of::<$ty>() {
                        return None;
                    }
                    Some(buf.data.$get())
                }
            }
        )*
    };
}

extract_be!(u8 => get_u8, u16 => get_u16, u32 => get_u32, u64 => get_u64);

/// Everything that is left, as UTF-8.
impl Extract for String {
    fn extract(buf: &mut Buffer) -> Option<Self> {
        let text = std::str::from_utf8(&buf.data).ok()?.to_string();
        buf.data.clear();
        Some(text)
    }
}

impl fmt::Write for Buffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.data.put_slice(s.as_bytes());
        Ok(())
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<&[u8]> for Buffer {
    fn from(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
        }
    }
}

impl From<&str> for Buffer {
    fn from(text: &str) -> Self {
        Self::from(text.as_bytes())
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from(bytes.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write;

    #[test]
    fn append_consume_peek() {
        let mut buf = Buffer::new();
        buf.append(b"hello ").append(b"world");

        assert_eq!(buf.size(), 11);
        assert_eq!(buf.peek(5), b"hello");
        assert_eq!(buf.size(), 11);

        buf.consume(6);
        assert_eq!(buf.as_slice(), b"world");
        assert_eq!(buf.peek(100), b"world");
    }

    #[test]
    #[should_panic(expected = "past end of buffer")]
    fn consume_past_end_panics() {
        let mut buf = Buffer::from("abc");
        buf.consume(4);
    }

    #[test]
    fn extract_integers_big_endian() {
        let mut buf = Buffer::from(&[0x01, 0x02, 0x03, 0x00, 0x00, 0x00, 0x2A][..]);

        assert_eq!(buf.extract::<u8>(), Some(1));
        assert_eq!(buf.extract::<u16>(), Some(0x0203));
        assert_eq!(buf.extract::<u64>(), None);
        assert_eq!(buf.extract::<u32>(), Some(42));
        assert!(buf.is_empty());
    }

    #[test]
    fn extract_string_takes_everything() {
        let mut buf = Buffer::from("a=1&b=2");
        assert_eq!(buf.extract::<String>().as_deref(), Some("a=1&b=2"));
        assert!(buf.is_empty());

        let mut invalid = Buffer::from(&[0xff, 0xfe][..]);
        assert_eq!(invalid.extract::<String>(), None);
        assert_eq!(invalid.size(), 2);
    }

    #[test]
    fn write_macro_appends_text() {
        let mut buf = Buffer::new();
        write!(buf, "{}-{}", 1, "two").unwrap();
        assert_eq!(buf.as_slice(), b"1-two");

        let front = buf.take_front(2);
        assert_eq!(&front[..], b"1-");
        assert_eq!(buf.take(), Bytes::from_static(b"two"));
        assert!(buf.is_empty());
    }
}
