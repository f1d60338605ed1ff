// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefixed framing for stream transports.
//!
//! ```text
//! +-----------------+------------------------+
//! | length (u32 BE) | payload (length bytes) |
//! +-----------------+------------------------+
//! ```
//!
//! Capacity is checked against the [`ChannelBuffer`] before any byte moves: an oversized send
//! writes nothing, an oversized receive consumes only the header.

use super::buffer::ChannelBuffer;
use crate::error::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub(crate) const FRAME_HEADER_SIZE: usize = 4;

pub(crate) async fn write_frame<W>(
    writer: &mut W,
    buffer: &mut ChannelBuffer,
    payload: &[u8],
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    buffer.reserve(payload.len())?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        Error::InvalidArgument(format!("payload of {} bytes cannot be framed", payload.len()))
    })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) async fn read_frame<R>(reader: &mut R, buffer: &mut ChannelBuffer) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; FRAME_HEADER_SIZE];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::Network("connection closed by peer".into()));
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    buffer.reserve(len)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}
