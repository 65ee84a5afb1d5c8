//! Frame transport between a session and the server

use std::future::Future;
use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// One X Protocol message: type byte plus encoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(message_type: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            payload: payload.into(),
        }
    }
}

/// Moves frames to and from the server.
///
/// Any `Err` is treated as a lost connection by the session.
pub trait Transport: Send {
    fn send(
        &mut self,
        message_type: u8,
        payload: Bytes,
    ) -> impl Future<Output = io::Result<()>> + Send;

    fn recv(&mut self) -> impl Future<Output = io::Result<Frame>> + Send;
}

/// Largest frame accepted from the server.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// X Protocol framing over a byte stream: little-endian `u32` length
/// (type byte included), type byte, payload.
pub struct StreamTransport<S> {
    stream: S,
}

impl<S> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message_type: u8, payload: Bytes) -> io::Result<()> {
        let len = u32::try_from(payload.len() + 1)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
        let mut frame = BytesMut::with_capacity(payload.len() + 5);
        frame.put_u32_le(len);
        frame.put_u8(message_type);
        frame.put_slice(&payload);
        self.stream.write_all(&frame).await?;
        self.stream.flush().await
    }

    async fn recv(&mut self) -> io::Result<Frame> {
        let len = self.stream.read_u32_le().await? as usize;
        if len == 0 || len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad frame length {len}"),
            ));
        }
        let message_type = self.stream.read_u8().await?;
        let mut payload = vec![0u8; len - 1];
        self.stream.read_exact(&mut payload).await?;
        Ok(Frame::new(message_type, payload))
    }
}
