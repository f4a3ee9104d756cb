// Wire codec: bincode bodies behind a u32 big-endian length prefix

use super::{Request, Response};
use anyhow::{bail, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum encoded frame size: 4 MB
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
    encode(request)
}

pub fn decode_request(bytes: &[u8]) -> Result<Request> {
    decode(bytes)
}

pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
    encode(response)
}

pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    decode(bytes)
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let bytes = bincode::serialize(value)?;
    if bytes.len() > MAX_FRAME_SIZE {
        bail!(
            "Encoded frame too large: {} bytes (max {})",
            bytes.len(),
            MAX_FRAME_SIZE
        );
    }
    Ok(bytes)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() > MAX_FRAME_SIZE {
        bail!("Frame too large: {} bytes (max {})", bytes.len(), MAX_FRAME_SIZE);
    }
    Ok(bincode::deserialize(bytes)?)
}

/// Write one length-prefixed frame and flush.
pub async fn write_frame<W>(stream: &mut W, payload: &[u8], max_size: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.is_empty() || payload.len() > max_size {
        bail!("Invalid frame length {} (max {})", payload.len(), max_size);
    }
    stream.write_u32(payload.len() as u32).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame, refusing lengths above `max_size`.
pub async fn read_frame<R>(stream: &mut R, max_size: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = stream.read_u32().await? as usize;
    if len == 0 || len > max_size {
        bail!("Invalid frame length {} (max {})", len, max_size);
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}
