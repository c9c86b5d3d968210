//! Length-prefixed frame I/O.
//!
//! Every message travels as `u32` big-endian body length followed by the
//! body bytes. The length is validated against [`MAX_FRAME_LEN`] before
//! any allocation happens.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::wire::{validate_frame_len, MAX_FRAME_LEN};

/// Errors while reading or writing a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Length prefix outside `1..=MAX_FRAME_LEN`.
    #[error("invalid frame length {0} (limit {MAX_FRAME_LEN})")]
    BadLength(usize),
}

/// Read one frame body. Returns `Ok(None)` on clean EOF at a frame
/// boundary; EOF mid-frame is an I/O error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if !validate_frame_len(len) {
        return Err(FrameError::BadLength(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Write one frame: length prefix, body, flush.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if !validate_frame_len(body.len()) {
        return Err(FrameError::BadLength(body.len()));
    }

    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}
