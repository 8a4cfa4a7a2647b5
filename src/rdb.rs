use crate::db::InMemoryDB;
use crate::error::RdbError;
use crate::types::SnapshotRecord;
use bytes::Bytes;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

pub const HEADER_LEN: usize = 9;

const OP_AUX: u8 = 0xFA;
const OP_RESIZEDB: u8 = 0xFB;
const OP_EXPIRETIME_MS: u8 = 0xFC;
const OP_EXPIRETIME: u8 = 0xFD;
const OP_SELECTDB: u8 = 0xFE;
const OP_EOF: u8 = 0xFF;

const TYPE_STRING: u8 = 0x00;

/// Reads the snapshot file, or `None` if it does not exist.
pub fn read_snapshot_file(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(buf) => Ok(Some(buf)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Decodes `buf` and writes every record into `db`.
/// Records decoded before an error stay in the store.
pub fn load_into(buf: &[u8], db: &mut InMemoryDB) -> Result<usize, RdbError> {
    decode(buf, |record| db.set(record.key, record.value, record.expiry_ms))
}

/// Walks the opcode stream, handing each key/value record to `on_record`.
/// Returns how many records were emitted.
pub fn decode<F>(buf: &[u8], mut on_record: F) -> Result<usize, RdbError>
where
    F: FnMut(SnapshotRecord),
{
    if buf.len() < HEADER_LEN {
        return Err(RdbError::InvalidHeader);
    }
    let header = &buf[..HEADER_LEN];
    if header.starts_with(b"REDIS") {
        info!(version = %String::from_utf8_lossy(&header[5..]), "loading snapshot");
    } else {
        warn!(header = ?header, "snapshot header has no REDIS magic, decoding anyway");
    }

    let mut reader = Reader {
        buf,
        pos: HEADER_LEN,
    };
    let mut resized = false;
    let mut emitted = 0;

    while reader.pos < buf.len() {
        let start = reader.pos;
        let op = reader.byte()?;
        let step = match op {
            OP_EOF => {
                debug!(offset = start, "end of snapshot");
                break;
            }
            OP_AUX => reader.aux(),
            OP_SELECTDB => reader.length().map(|db| {
                debug!(db, "select db");
                None
            }),
            OP_RESIZEDB => reader.resize().map(|(table, expires)| {
                debug!(table, expires, "resize db");
                resized = true;
                None
            }),
            OP_EXPIRETIME => reader.expire_seconds(),
            OP_EXPIRETIME_MS => reader.expire_millis(),
            _ if resized => {
                reader.pos = start;
                reader.record(None)
            }
            other => {
                debug!(offset = start, byte = other, "skipping byte before resize marker");
                Ok(None)
            }
        };

        match step {
            Ok(Some(record)) => {
                on_record(record);
                emitted += 1;
            }
            Ok(None) => {}
            Err(RdbError::UnsupportedEncoding(tag)) => {
                warn!(offset = start, tag, "unsupported encoding in snapshot, skipping a byte");
                reader.pos = start + 1;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(emitted)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn byte(&mut self) -> Result<u8, RdbError> {
        Ok(self.take(1)?[0])
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RdbError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(RdbError::Truncated { offset: self.pos })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    /// Size encoding: the top two bits of the first byte pick the form.
    fn length(&mut self) -> Result<usize, RdbError> {
        let first = self.byte()?;
        match first >> 6 {
            0b00 => Ok((first & 0x3F) as usize),
            0b01 => {
                let next = self.byte()?;
                Ok((((first & 0x3F) as usize) << 8) | next as usize)
            }
            0b10 if first == 0x80 => {
                let b = self.take(4)?;
                Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize)
            }
            0b10 if first == 0x81 => {
                let b = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                Ok(u64::from_be_bytes(raw) as usize)
            }
            _ => Err(RdbError::UnsupportedEncoding(first)),
        }
    }

    /// Length-prefixed bytes, or one of the integer-as-string forms.
    fn string(&mut self) -> Result<Bytes, RdbError> {
        let first = *self
            .buf
            .get(self.pos)
            .ok_or(RdbError::Truncated { offset: self.pos })?;
        if first >> 6 != 0b11 {
            let len = self.length()?;
            return Ok(Bytes::copy_from_slice(self.take(len)?));
        }
        self.pos += 1;
        let n = match first {
            0xC0 => self.byte()? as i8 as i64,
            0xC1 => {
                let b = self.take(2)?;
                i16::from_le_bytes([b[0], b[1]]) as i64
            }
            0xC2 => {
                let b = self.take(4)?;
                i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64
            }
            other => return Err(RdbError::UnsupportedEncoding(other)),
        };
        Ok(Bytes::from(n.to_string()))
    }

    fn aux(&mut self) -> Result<Option<SnapshotRecord>, RdbError> {
        let key = self.string()?;
        let value = self.string()?;
        debug!(
            key = %String::from_utf8_lossy(&key),
            value = %String::from_utf8_lossy(&value),
            "aux field"
        );
        Ok(None)
    }

    fn resize(&mut self) -> Result<(usize, usize), RdbError> {
        Ok((self.length()?, self.length()?))
    }

    fn expire_seconds(&mut self) -> Result<Option<SnapshotRecord>, RdbError> {
        let b = self.take(4)?;
        let secs = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        if let Some(record) = self.record(None)? {
            warn!(
                key = %String::from_utf8_lossy(&record.key),
                secs,
                "seconds expiry not supported, dropping key"
            );
        }
        Ok(None)
    }

    fn expire_millis(&mut self) -> Result<Option<SnapshotRecord>, RdbError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        self.record(Some(u64::from_le_bytes(raw)))
    }

    /// One `<type><key><value>` entry. Only plain strings are understood.
    fn record(&mut self, expiry_ms: Option<u64>) -> Result<Option<SnapshotRecord>, RdbError> {
        let offset = self.pos;
        let tag = self.byte()?;
        if tag != TYPE_STRING {
            warn!(offset, tag, "unsupported value type in snapshot, skipping");
            return Ok(None);
        }
        let key = self.string()?;
        let value = self.string()?;
        debug!(key = %String::from_utf8_lossy(&key), ?expiry_ms, "snapshot record");
        Ok(Some(SnapshotRecord {
            key,
            value,
            expiry_ms,
        }))
    }
}
