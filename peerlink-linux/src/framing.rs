//! Length-prefixed frames over stream connections: `[4-byte BE length][payload]`.

use peerlink_core::wire::{frame_header, parse_header, LEN_SIZE};
use peerlink_core::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read exactly one frame, accumulating across partial reads.
/// A peer that closes before the full header or the full payload is `ConnectionClosed`;
/// a short payload is never returned.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LEN_SIZE];
    read_full(reader, &mut header).await?;
    let len = parse_header(header)?;
    let mut payload = vec![0u8; len];
    read_full(reader, &mut payload).await?;
    Ok(payload)
}

async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::ConnectionClosed),
        Err(e) => Err(e.into()),
    }
}

/// Write one frame. Does not flush; callers writing a video/audio pair flush after the pair.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = frame_header(payload.len())?;
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    Ok(())
}
