//! # Frames
//!
//! `[0x01][len:2 LE][payload]` when the payload fits 16 bits,
//! `[0x02][len:4 LE][payload]` otherwise. Any other leading byte ends the stream.

use crate::error::Error;
use crate::error::Result;

/// Largest payload carried by a small frame.
pub const SMALL_MAX: usize = u16::MAX as usize;

/// Largest header (tag plus 32-bit length).
pub const MAX_HEADER: usize = 5;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTag {
    Small = 0x01,
    Large = 0x02,
}

impl FrameTag {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(FrameTag::Small),
            0x02 => Some(FrameTag::Large),
            _ => None,
        }
    }

    /// Picks the tag for a payload of `len` bytes.
    pub fn for_len(len: usize) -> Result<Self> {
        if len <= SMALL_MAX {
            Ok(FrameTag::Small)
        } else if u32::try_from(len).is_ok() {
            Ok(FrameTag::Large)
        } else {
            Err(Error::FrameTooLarge(len))
        }
    }

    /// Width of the length field following this tag.
    pub fn len_width(self) -> usize {
        match self {
            FrameTag::Small => 2,
            FrameTag::Large => 4,
        }
    }

    /// Reads the length field. `bytes` must hold exactly `len_width()` bytes.
    pub fn parse_len(self, bytes: &[u8]) -> Result<usize> {
        match (self, bytes) {
            (FrameTag::Small, &[a, b]) => Ok(u16::from_le_bytes([a, b]) as usize),
            (FrameTag::Large, &[a, b, c, d]) => Ok(u32::from_le_bytes([a, b, c, d]) as usize),
            _ => Err(Error::Truncated),
        }
    }
}

/// Writes the header for a payload of `len` bytes into `out`.
pub fn write_header(len: usize, out: &mut Vec<u8>) -> Result<()> {
    let tag = FrameTag::for_len(len)?;
    out.push(tag as u8);
    match tag {
        FrameTag::Small => out.extend_from_slice(&(len as u16).to_le_bytes()),
        FrameTag::Large => out.extend_from_slice(&(len as u32).to_le_bytes()),
    }
    Ok(())
}

/// Encodes `payload` as one complete frame.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(payload.len() + MAX_HEADER);
    write_header(payload.len(), &mut out)?;
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decodes the frame at the start of `buf`.
///
/// Returns `Ok(None)` on an empty buffer, otherwise the payload and the
/// number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<Option<(&[u8], usize)>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    let tag = FrameTag::from_u8(first).ok_or(Error::UnknownFrameTag(first))?;
    let head = 1 + tag.len_width();
    if buf.len() < head {
        return Err(Error::Truncated);
    }
    let len = tag.parse_len(&buf[1..head])?;
    let end = head.checked_add(len).ok_or(Error::FrameTooLarge(len))?;
    if buf.len() < end {
        return Err(Error::Truncated);
    }
    Ok(Some((&buf[head..end], end)))
}
