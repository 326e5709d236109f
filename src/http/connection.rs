use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::buffer::Buffer;

/// Bytes requested from the transport per read.
const READ_CHUNK: usize = 4096;

/// A transport endpoint with its read and write buffers.
///
/// The transport is anything async-readable and writable: a `TcpStream` in
/// production, an in-memory duplex pipe in tests.
pub struct Connection<T> {
    io: T,
    rbuf: Buffer,
    wbuf: Buffer,
    local: Option<SocketAddr>,
    peer: Option<SocketAddr>,
}

impl Connection<TcpStream> {
    pub fn tcp(stream: TcpStream) -> Self {
        let local = stream.local_addr().ok();
        let peer = stream.peer_addr().ok();
        Self::with_addrs(stream, local, peer)
    }
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: T) -> Self {
        Self::with_addrs(io, None, None)
    }

    pub fn with_addrs(io: T, local: Option<SocketAddr>, peer: Option<SocketAddr>) -> Self {
        Self {
            io,
            rbuf: Buffer::with_capacity(READ_CHUNK),
            wbuf: Buffer::new(),
            local,
            peer,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Local endpoint as `ip:port`, `localhost` when unknown.
    pub fn local_str(&self) -> String {
        self.local
            .map(|a| a.to_string())
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn rbuf(&self) -> &Buffer {
        &self.rbuf
    }

    pub fn rbuf_mut(&mut self) -> &mut Buffer {
        &mut self.rbuf
    }

    pub fn wbuf_mut(&mut self) -> &mut Buffer {
        &mut self.wbuf
    }

    /// Reads once from the transport into the read buffer.
    /// Returns 0 when the peer has closed its side.
    pub async fn fill(&mut self) -> io::Result<usize> {
        let buf = self.rbuf.bytes_mut();
        buf.reserve(READ_CHUNK);
        self.io.read_buf(buf).await
    }

    /// Writes the whole write buffer out.
    pub async fn flush(&mut self) -> io::Result<()> {
        while !self.wbuf.is_empty() {
            let n = self.io.write(self.wbuf.as_slice()).await?;

            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "connection closed while writing",
                ));
            }

            self.wbuf.consume(n);
        }

        self.io.flush().await
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.wbuf.append(bytes);
        self.flush().await
    }

    /// Flushes pending output and shuts the write side down.
    pub async fn close(&mut self) -> io::Result<()> {
        self.flush().await?;
        self.io.shutdown().await
    }
}
