//! Length-prefixed framing over byte streams

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload accepted on the wire
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Read one frame. Returns `None` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one frame and flush it
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload of {} bytes exceeds frame limit", payload.len()),
        ));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_are_delimited() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, b"first").await.unwrap();
        write_frame(&mut client, b"").await.unwrap();
        write_frame(&mut client, b"third").await.unwrap();
        drop(client);

        assert_eq!(read_frame(&mut server).await.unwrap(), Some(b"first".to_vec()));
        assert_eq!(read_frame(&mut server).await.unwrap(), Some(Vec::new()));
        assert_eq!(read_frame(&mut server).await.unwrap(), Some(b"third".to_vec()));
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_oversized_length() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32(u32::MAX).await.unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
