//! # Frame Codec
//!
//! Reads and writes `orbrpc::frame` frames on an async byte stream.
//! A reader hands back whole payloads only; a writer serializes concurrent
//! senders so their frame bytes never interleave.

use orbrpc::frame;
use orbrpc::frame::FrameTag;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::CallFailure;
use crate::transport;

/// Reads the next frame payload.
///
/// `Ok(None)` means the stream ended cleanly at a frame boundary. An unknown
/// tag byte or a length above `max_len` is a protocol error.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, CallFailure>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; 1];
    match reader.read(&mut tag).await {
        Ok(0) => return Ok(None),
        Ok(_) => {}
        Err(e) => return Err(transport::Error::from(e).into()),
    }

    let tag = FrameTag::from_u8(tag[0]).ok_or(orbrpc::Error::UnknownFrameTag(tag[0]))?;
    let mut len = [0u8; 4];
    let len = &mut len[..tag.len_width()];
    reader.read_exact(len).await.map_err(transport::Error::from)?;
    let len = tag.parse_len(len)?;
    if len > max_len {
        return Err(orbrpc::Error::FrameTooLarge(len).into());
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(transport::Error::from)?;
    trace!(?tag, len, "frame in");
    Ok(Some(payload))
}

/// The write half of a stream, guarded for concurrent senders.
pub struct FrameWriter<W> {
    inner: Mutex<Option<W>>,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { inner: Mutex::new(Some(writer)) }
    }

    /// Writes `payload` as one frame.
    pub async fn write(&self, payload: &[u8]) -> Result<(), CallFailure> {
        let mut buf = Vec::with_capacity(payload.len() + frame::MAX_HEADER);
        frame::write_header(payload.len(), &mut buf)?;
        buf.extend_from_slice(payload);

        let mut guard = self.inner.lock().await;
        let writer = guard.as_mut().ok_or(CallFailure::Disconnected)?;
        writer.write_all(&buf).await.map_err(transport::Error::from)?;
        writer.flush().await.map_err(transport::Error::from)?;
        trace!(len = payload.len(), "frame out");
        Ok(())
    }

    /// Shuts the stream down. Later writes fail with `Disconnected`.
    pub async fn shutdown(&self) {
        if let Some(mut writer) = self.inner.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}
