//! Framed TCP Channel
//!
//! Wraps a `TcpStream` with the frame codec. Used whole during the
//! handshake, then split so reads and writes can proceed from separate
//! tasks.

use std::net::SocketAddr;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::frame::{encode, FrameDecoder};
use super::TransportError;

const READ_CHUNK: usize = 4096;

/// Bidirectional frame channel over one TCP connection
pub struct FramedChannel {
    reader: FramedReader,
    writer: FramedWriter,
    peer: SocketAddr,
}

impl FramedChannel {
    /// Wrap an established stream
    ///
    /// # Errors
    ///
    /// Returns an IO error if the peer address cannot be read.
    pub fn new(stream: TcpStream) -> Result<Self, TransportError> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: FramedReader {
                inner: read_half,
                decoder: FrameDecoder::new(),
            },
            writer: FramedWriter { inner: write_half },
            peer,
        })
    }

    /// Address of the other end
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send one frame
    ///
    /// # Errors
    ///
    /// See [`FramedWriter::send`].
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> Result<(), TransportError> {
        self.writer.send(msg).await
    }

    /// Receive one frame, waiting for it to arrive completely
    ///
    /// # Errors
    ///
    /// See [`FramedReader::recv`].
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T, TransportError> {
        self.reader.recv().await
    }

    /// Split into independently owned halves
    #[must_use]
    pub fn into_split(self) -> (FramedReader, FramedWriter) {
        (self.reader, self.writer)
    }
}

/// Receiving half of a [`FramedChannel`]
pub struct FramedReader {
    inner: OwnedReadHalf,
    decoder: FrameDecoder,
}

impl FramedReader {
    /// Receive one frame
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionClosed` on a clean EOF, the
    /// decoder's error for bytes that are not a valid frame, and
    /// `TransportError::IoError` if the socket read fails.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T, TransportError> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if let Some(msg) = self.decoder.decode()? {
                return Ok(msg);
            }
            let n = self.inner.read(&mut buf).await?;
            if n == 0 {
                return Err(TransportError::ConnectionClosed);
            }
            self.decoder.push(&buf[..n]);
        }
    }
}

/// Sending half of a [`FramedChannel`]
pub struct FramedWriter {
    inner: OwnedWriteHalf,
}

impl FramedWriter {
    /// Send one frame
    ///
    /// # Errors
    ///
    /// Returns `TransportError::SerializationError` if `msg` cannot be
    /// encoded and `TransportError::IoError` if the write fails.
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> Result<(), TransportError> {
        let data = encode(msg)?;
        self.inner.write_all(&data).await?;
        Ok(())
    }
}
