//! Low-level record framing for ROS bag format 2.0.
//!
//! Every record is `header_len: u32`, a header made of `field_len: u32` +
//! `name=value` fields, then `data_len: u32` and the data bytes. All integers
//! are little-endian.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

use chrono::{DateTime, TimeZone, Utc};

use crate::error::BagError;

pub const MAGIC_PREFIX: &[u8] = b"#ROSBAG V";
pub const MAGIC: &[u8] = b"#ROSBAG V2.0\n";

pub const OP_MSG_DATA: u8 = 0x02;
pub const OP_BAG_HEADER: u8 = 0x03;
pub const OP_INDEX_DATA: u8 = 0x04;
pub const OP_CHUNK: u8 = 0x05;
pub const OP_CHUNK_INFO: u8 = 0x06;
pub const OP_CONNECTION: u8 = 0x07;

/// Parsed `name=value` header fields.
#[derive(Debug, Default)]
pub struct Header {
    fields: HashMap<String, Vec<u8>>,
}

impl Header {
    pub fn parse(bytes: &[u8]) -> Result<Self, BagError> {
        let mut fields = HashMap::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            if bytes.len() - pos < 4 {
                return Err(BagError::Corrupt("dangling bytes in record header".into()));
            }
            let len = u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
                as usize;
            pos += 4;
            if len > bytes.len() - pos {
                return Err(BagError::Corrupt("header field overruns record header".into()));
            }
            let field = &bytes[pos..pos + len];
            pos += len;
            let eq = field
                .iter()
                .position(|b| *b == b'=')
                .ok_or_else(|| BagError::Corrupt("header field without '='".into()))?;
            let name = String::from_utf8_lossy(&field[..eq]).to_string();
            fields.insert(name, field[eq + 1..].to_vec());
        }
        Ok(Self { fields })
    }

    fn raw(&self, name: &str) -> Result<&[u8], BagError> {
        self.fields
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| BagError::Corrupt(format!("record header is missing '{}'", name)))
    }

    pub fn op(&self) -> Result<u8, BagError> {
        match self.raw("op")? {
            [op] => Ok(*op),
            _ => Err(BagError::Corrupt("'op' field is not one byte".into())),
        }
    }

    pub fn u32(&self, name: &str) -> Result<u32, BagError> {
        let raw = self.raw(name)?;
        let bytes: [u8; 4] = raw
            .try_into()
            .map_err(|_| BagError::Corrupt(format!("'{}' is not a u32", name)))?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn u64(&self, name: &str) -> Result<u64, BagError> {
        let raw = self.raw(name)?;
        let bytes: [u8; 8] = raw
            .try_into()
            .map_err(|_| BagError::Corrupt(format!("'{}' is not a u64", name)))?;
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn time(&self, name: &str) -> Result<DateTime<Utc>, BagError> {
        let raw = self.raw(name)?;
        if raw.len() != 8 {
            return Err(BagError::Corrupt(format!("'{}' is not a time", name)));
        }
        let secs = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let nsecs = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        ros_time(secs, nsecs)
    }

    pub fn string(&self, name: &str) -> Result<String, BagError> {
        Ok(String::from_utf8_lossy(self.raw(name)?).to_string())
    }

    pub fn string_or_empty(&self, name: &str) -> String {
        self.fields
            .get(name)
            .map(|v| String::from_utf8_lossy(v).to_string())
            .unwrap_or_default()
    }
}

pub fn ros_time(secs: u32, nsecs: u32) -> Result<DateTime<Utc>, BagError> {
    Utc.timestamp_opt(i64::from(secs), nsecs)
        .single()
        .ok_or_else(|| BagError::Corrupt(format!("invalid time {}.{:09}", secs, nsecs)))
}

/// Sequential record reader that knows its byte offset, so a short read can
/// be reported as [`BagError::Truncated`] at the right place.
pub struct RecordReader<R> {
    inner: R,
    offset: u64,
    end: Option<u64>,
}

impl<R: Read + Seek> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            end: None,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read and check the format line. Returns the version string.
    pub fn read_magic(&mut self) -> Result<String, BagError> {
        let mut buf = [0u8; 13];
        self.read_exact(&mut buf)?;
        if buf == MAGIC {
            return Ok("2.0".to_string());
        }
        if buf.starts_with(MAGIC_PREFIX) {
            let version = String::from_utf8_lossy(&buf[MAGIC_PREFIX.len()..])
                .trim()
                .to_string();
            return Err(BagError::Corrupt(format!("unsupported bag version {}", version)));
        }
        Err(BagError::Corrupt("not a bag file (bad magic)".into()))
    }

    /// Read the next record header. Returns `None` at a clean end of file.
    /// The caller must follow up with [`read_data`](Self::read_data) or
    /// [`skip_data`](Self::skip_data).
    pub fn next_header(&mut self) -> Result<Option<Header>, BagError> {
        let Some(header_len) = self.read_len_or_eof()? else {
            return Ok(None);
        };
        self.ensure_available(u64::from(header_len))?;
        let mut buf = vec![0u8; header_len as usize];
        self.read_exact(&mut buf)?;
        Header::parse(&buf).map(Some)
    }

    pub fn read_data(&mut self) -> Result<Vec<u8>, BagError> {
        let len = self.read_u32()?;
        self.ensure_available(u64::from(len))?;
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn skip_data(&mut self) -> Result<(), BagError> {
        let len = u64::from(self.read_u32()?);
        let end = self.inner.seek(SeekFrom::End(0))?;
        if self.offset + len > end {
            return Err(BagError::Truncated { offset: end });
        }
        self.offset += len;
        self.inner.seek(SeekFrom::Start(self.offset))?;
        Ok(())
    }

    /// Fail with [`BagError::Truncated`] unless `len` more bytes follow the
    /// current offset.
    fn ensure_available(&mut self, len: u64) -> Result<(), BagError> {
        let end = match self.end {
            Some(end) => end,
            None => {
                let end = self.inner.seek(SeekFrom::End(0))?;
                self.inner.seek(SeekFrom::Start(self.offset))?;
                self.end = Some(end);
                end
            }
        };
        if self.offset + len > end {
            return Err(BagError::Truncated { offset: self.offset });
        }
        Ok(())
    }

    fn read_len_or_eof(&mut self) -> Result<Option<u32>, BagError> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(BagError::Truncated {
                        offset: self.offset + filled as u64,
                    })
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(BagError::Unreadable(e)),
            }
        }
        self.offset += 4;
        Ok(Some(u32::from_le_bytes(buf)))
    }

    fn read_u32(&mut self) -> Result<u32, BagError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), BagError> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                Err(BagError::Truncated { offset: self.offset })
            }
            Err(e) => Err(BagError::Unreadable(e)),
        }
    }
}

/// Cursor over a serialized message body.
pub struct Wire<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Wire<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn i8(&mut self) -> Option<i8> {
        self.u8().map(|b| b as i8)
    }

    pub fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn f64(&mut self) -> Option<f64> {
        let b = self.take(8)?;
        let bytes: [u8; 8] = b.try_into().ok()?;
        Some(f64::from_le_bytes(bytes))
    }

    pub fn string(&mut self) -> Option<String> {
        let len = self.u32()? as usize;
        self.take(len)
            .map(|b| String::from_utf8_lossy(b).to_string())
    }
}
