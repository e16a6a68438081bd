//! Framed-binary connection driver.
//!
//! Frames are a u32 big-endian payload length followed by the payload.
//! Each request frame is dispatched as one RPC call; the response is
//! written back in the same framing. Frame sizes are capped by the
//! server's max message size.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::time::timeout;

use crate::connection::{ConnectionContext, ConnectionRegistry};
use crate::service::RpcService;

use super::DEFAULT_BUFFER_SIZE_BYTES;

pub(crate) async fn drive<IO, S>(
    io: IO,
    ctx: &ConnectionContext,
    service: &S,
    registry: &ConnectionRegistry,
    max_message_bytes: usize,
    idle_poll_period: Duration,
) -> io::Result<()>
where
    IO: AsyncRead + AsyncWrite + Unpin,
    S: RpcService,
{
    let mut stream =
        BufStream::with_capacity(DEFAULT_BUFFER_SIZE_BYTES, DEFAULT_BUFFER_SIZE_BYTES, io);

    loop {
        // Wait for the first header byte. Only this read carries the idle
        // poll: a single-byte read is cancel-safe, so an expired poll
        // never loses partial frame data.
        let first = if idle_poll_period.is_zero() {
            match stream.read_u8().await {
                Ok(byte) => byte,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            }
        } else {
            loop {
                match timeout(idle_poll_period, stream.read_u8()).await {
                    Ok(Ok(byte)) => break byte,
                    Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        if registry.is_idle(ctx) {
                            tracing::debug!(
                                connection_id = %ctx.connection_id(),
                                "closing idle connection"
                            );
                            return Ok(());
                        }
                    }
                }
            }
        };

        let mut rest = [0u8; 3];
        stream.read_exact(&mut rest).await?;
        let len = u32::from_be_bytes([first, rest[0], rest[1], rest[2]]) as usize;
        if len > max_message_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds maximum message size", len),
            ));
        }

        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await?;

        let response = service.handle(ctx, Bytes::from(payload)).await?;
        if response.len() > max_message_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "response exceeds maximum message size",
            ));
        }
        stream.write_u32(response.len() as u32).await?;
        stream.write_all(&response).await?;
        stream.flush().await?;
    }
}
