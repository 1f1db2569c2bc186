//! Checksummed record framing shared by the write-ahead log, the index log
//! and backups.
//!
//! ```text
//! | magic (4) | version (2) | kind (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The checksum covers everything before it. Readers treat a record cut off
//! by the end of the data as a clean end of log (a write torn by a crash) and
//! everything else that does not check out as corruption.

use crate::error::{EngineError, IndexError};

/// Bytes before the payload.
pub(crate) const HEADER_LEN: usize = 11;

/// Bytes after the payload.
pub(crate) const CRC_LEN: usize = 4;

/// Current framing version.
pub(crate) const FRAME_VERSION: u16 = 1;

/// IEEE CRC-32.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut c = i as u32;
            let mut bit = 0;
            while bit < 8 {
                c = if c & 1 != 0 { (c >> 1) ^ 0xEDB8_8320 } else { c >> 1 };
                bit += 1;
            }
            table[i] = c;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &b| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(b)) & 0xFF) as usize]
    })
}

/// Appends one framed record to `out`.
///
/// Payloads longer than `u32::MAX` cannot be framed and are reported as
/// `Err(len)`.
pub(crate) fn write_frame(
    out: &mut Vec<u8>,
    magic: [u8; 4],
    kind: u8,
    payload: &[u8],
) -> Result<(), usize> {
    let len = u32::try_from(payload.len()).map_err(|_| payload.len())?;
    let start = out.len();
    out.reserve(HEADER_LEN + payload.len() + CRC_LEN);
    out.extend_from_slice(&magic);
    out.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    out.push(kind);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    let crc = crc32(&out[start..]);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(())
}

/// A record as read back from a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Frame<'a> {
    pub offset: u64,
    pub kind: u8,
    pub payload: &'a [u8],
}

/// Why a log could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FrameError {
    BadMagic { offset: u64 },
    BadVersion { offset: u64, version: u16 },
    Checksum { offset: u64, expected: u32, actual: u32 },
}

impl From<FrameError> for EngineError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::BadMagic { offset } => {
                EngineError::wal_corruption(format!("invalid magic at offset {offset}"))
            }
            FrameError::BadVersion { offset, version } => EngineError::wal_corruption(format!(
                "unsupported version {version} at offset {offset}"
            )),
            FrameError::Checksum {
                offset,
                expected,
                actual,
            } => EngineError::ChecksumMismatch {
                offset,
                expected,
                actual,
            },
        }
    }
}

impl From<FrameError> for IndexError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::BadMagic { offset } => {
                IndexError::corrupted(format!("invalid magic at offset {offset}"))
            }
            FrameError::BadVersion { offset, version } => IndexError::corrupted(format!(
                "unsupported version {version} at offset {offset}"
            )),
            FrameError::Checksum {
                offset,
                expected,
                actual,
            } => IndexError::corrupted(format!(
                "checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}"
            )),
        }
    }
}

/// Iterator over the records in a byte image.
///
/// After the iterator returns `None`, [`valid_len`](Self::valid_len) is the
/// length of the intact prefix; anything past it is a torn tail.
pub(crate) struct Frames<'a> {
    data: &'a [u8],
    magic: [u8; 4],
    pos: usize,
    done: bool,
}

impl<'a> Frames<'a> {
    pub(crate) fn new(data: &'a [u8], magic: [u8; 4]) -> Self {
        Self {
            data,
            magic,
            pos: 0,
            done: false,
        }
    }

    pub(crate) fn valid_len(&self) -> u64 {
        self.pos as u64
    }

    fn read_one(&mut self) -> Result<Option<Frame<'a>>, FrameError> {
        let rest = &self.data[self.pos..];
        let offset = self.pos as u64;
        if rest.len() < HEADER_LEN {
            return Ok(None);
        }
        if rest[0..4] != self.magic {
            return Err(FrameError::BadMagic { offset });
        }
        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version > FRAME_VERSION {
            return Err(FrameError::BadVersion { offset, version });
        }
        let kind = rest[6];
        let len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;
        let total = HEADER_LEN + len + CRC_LEN;
        if rest.len() < total {
            return Ok(None);
        }

        let body_end = HEADER_LEN + len;
        let stored = u32::from_le_bytes([
            rest[body_end],
            rest[body_end + 1],
            rest[body_end + 2],
            rest[body_end + 3],
        ]);
        let computed = crc32(&rest[..body_end]);
        if stored != computed {
            return Err(FrameError::Checksum {
                offset,
                expected: stored,
                actual: computed,
            });
        }

        self.pos += total;
        Ok(Some(Frame {
            offset,
            kind,
            payload: &rest[HEADER_LEN..body_end],
        }))
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<Frame<'a>, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_one() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Little-endian field reader over a record payload.
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let out = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }

    pub(crate) fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> Option<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Some(u64::from_le_bytes(raw))
    }

    /// A `u32` length followed by that many bytes.
    pub(crate) fn bytes(&mut self) -> Option<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    /// Everything not yet read.
    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }
}

/// Appends a `u32` length prefix and the bytes.
pub(crate) fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}
