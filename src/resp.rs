use crate::error::RespError;
use bytes::{BufMut, Bytes, BytesMut};

const CRLF: &[u8] = b"\r\n";

/// Largest bulk string accepted from a peer.
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Largest array element count accepted from a peer.
pub const MAX_ARRAY_LEN: i64 = 1024 * 1024;

/// Upper bound on slots reserved from a declared array length; the rest
/// grow as elements actually arrive.
const ARRAY_PREALLOC: usize = 64;

/// A decoded wire value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Array(Vec<RespValue>),
    Null,
}

impl RespValue {
    /// A command is a non-empty array made only of bulk strings.
    pub fn into_command(self) -> Option<Vec<Bytes>> {
        let RespValue::Array(items) = self else {
            return None;
        };
        if items.is_empty() {
            return None;
        }
        items
            .into_iter()
            .map(|item| match item {
                RespValue::Bulk(b) => Some(b),
                _ => None,
            })
            .collect()
    }
}

pub fn encode_simple_string(s: &str) -> Bytes {
    let mut out = BytesMut::with_capacity(s.len() + 3);
    out.put_u8(b'+');
    out.put_slice(s.as_bytes());
    out.put_slice(CRLF);
    out.freeze()
}

pub fn encode_bulk_string(s: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(s.len() + 16);
    put_bulk(&mut out, s);
    out.freeze()
}

pub fn encode_null_bulk_string() -> Bytes {
    Bytes::from_static(b"$-1\r\n")
}

/// An empty list renders as `*0\r\n`, never as a null.
pub fn encode_array<T: AsRef<[u8]>>(items: &[T]) -> Bytes {
    let mut out = BytesMut::new();
    out.put_slice(format!("*{}\r\n", items.len()).as_bytes());
    for item in items {
        put_bulk(&mut out, item.as_ref());
    }
    out.freeze()
}

/// Snapshot transfer: `$<len>\r\n` followed by the raw bytes, no trailing CRLF.
pub fn encode_rdb(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + 16);
    out.put_slice(format!("${}\r\n", payload.len()).as_bytes());
    out.put_slice(payload);
    out.freeze()
}

fn put_bulk(out: &mut BytesMut, s: &[u8]) {
    out.put_slice(format!("${}\r\n", s.len()).as_bytes());
    out.put_slice(s);
    out.put_slice(CRLF);
}

/// Decodes the first complete value in `buf`.
/// Returns the value and the number of bytes it occupied.
pub fn parse_value(buf: &[u8]) -> Result<(RespValue, usize), RespError> {
    parse_at(buf, 0)
}

/// Decodes a snapshot blob as sent by [`encode_rdb`].
pub fn parse_rdb(buf: &[u8]) -> Result<(Bytes, usize), RespError> {
    if buf.is_empty() {
        return Err(RespError::Incomplete);
    }
    if buf[0] != b'$' {
        return Err(RespError::Invalid(format!(
            "expected snapshot blob, got type byte 0x{:02X}",
            buf[0]
        )));
    }
    let (line, start) = read_line(buf, 1)?;
    let len = parse_len(line, MAX_BULK_LEN)?;
    let end = start + len;
    if buf.len() < end {
        return Err(RespError::Incomplete);
    }
    Ok((Bytes::copy_from_slice(&buf[start..end]), end))
}

fn parse_at(buf: &[u8], pos: usize) -> Result<(RespValue, usize), RespError> {
    let Some(&tag) = buf.get(pos) else {
        return Err(RespError::Incomplete);
    };
    let (line, next) = read_line(buf, pos + 1)?;
    match tag {
        b'+' => Ok((RespValue::Simple(text(line)), next)),
        b'-' => Ok((RespValue::Error(text(line)), next)),
        b':' => Ok((RespValue::Integer(parse_int(line)?), next)),
        b'$' => {
            if parse_int(line)? == -1 {
                return Ok((RespValue::Null, next));
            }
            let len = parse_len(line, MAX_BULK_LEN)?;
            let end = next + len;
            if buf.len() < end + CRLF.len() {
                return Err(RespError::Incomplete);
            }
            if &buf[end..end + CRLF.len()] != CRLF {
                return Err(RespError::Invalid(
                    "bulk string not terminated by CRLF".to_string(),
                ));
            }
            Ok((
                RespValue::Bulk(Bytes::copy_from_slice(&buf[next..end])),
                end + CRLF.len(),
            ))
        }
        b'*' => {
            if parse_int(line)? == -1 {
                return Ok((RespValue::Null, next));
            }
            let count = parse_len(line, MAX_ARRAY_LEN)?;
            let mut items = Vec::with_capacity(count.min(ARRAY_PREALLOC));
            let mut cursor = next;
            for _ in 0..count {
                let (item, after) = parse_at(buf, cursor)?;
                items.push(item);
                cursor = after;
            }
            Ok((RespValue::Array(items), cursor))
        }
        other => Err(RespError::Invalid(format!(
            "unexpected type byte 0x{:02X}",
            other
        ))),
    }
}

/// Returns the line starting at `pos` (without CRLF) and the index after it.
fn read_line(buf: &[u8], pos: usize) -> Result<(&[u8], usize), RespError> {
    if pos > buf.len() {
        return Err(RespError::Incomplete);
    }
    buf[pos..]
        .windows(CRLF.len())
        .position(|w| w == CRLF)
        .map(|i| (&buf[pos..pos + i], pos + i + CRLF.len()))
        .ok_or(RespError::Incomplete)
}

fn text(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}

fn parse_int(line: &[u8]) -> Result<i64, RespError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| RespError::Invalid(format!("bad integer {:?}", text(line))))
}

fn parse_len(line: &[u8], max: i64) -> Result<usize, RespError> {
    let n = parse_int(line)?;
    if !(0..=max).contains(&n) {
        return Err(RespError::Invalid(format!("length {} out of range", n)));
    }
    Ok(n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_array_header_waits_without_allocating() {
        assert!(matches!(
            parse_value(b"*1048576\r\n"),
            Err(RespError::Incomplete)
        ));
    }

    #[test]
    fn arrays_longer_than_prealloc_parse() {
        let parts: Vec<String> = (0..ARRAY_PREALLOC * 2).map(|i| i.to_string()).collect();
        let frame = encode_array(&parts);
        let (args, used) = command(&frame);
        assert_eq!(used, frame.len());
        assert_eq!(args.len(), parts.len());
        assert_eq!(&args[ARRAY_PREALLOC + 1][..], parts[ARRAY_PREALLOC + 1].as_bytes());
    }

    fn command(buf: &[u8]) -> (Vec<Bytes>, usize) {
        let (value, used) = parse_value(buf).unwrap();
        (value.into_command().unwrap(), used)
    }

    #[test]
    fn encodes_response_shapes() {
        assert_eq!(&encode_simple_string("OK")[..], b"+OK\r\n");
        assert_eq!(&encode_bulk_string(b"hey")[..], b"$3\r\nhey\r\n");
        assert_eq!(&encode_null_bulk_string()[..], b"$-1\r\n");
        assert_eq!(&encode_array::<&[u8]>(&[])[..], b"*0\r\n");
        assert_eq!(
            &encode_array(&["dir", "/tmp"])[..],
            b"*2\r\n$3\r\ndir\r\n$4\r\n/tmp\r\n"
        );
        assert_eq!(&encode_rdb(b"REDIS")[..], b"$5\r\nREDIS");
    }

    #[test]
    fn round_trip_keeps_embedded_crlf() {
        let args: [&[u8]; 4] = [b"SET", b"k\r\ney", b"\r\n$3\r\n*1\r\n", b""];
        let wire = encode_array(&args);
        let (decoded, used) = command(&wire);
        assert_eq!(used, wire.len());
        let decoded: Vec<&[u8]> = decoded.iter().map(|b| &b[..]).collect();
        assert_eq!(decoded, args.to_vec());
    }

    #[test]
    fn splits_coalesced_frames() {
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&encode_array(&["SET", "foo", "123"]));
        wire.extend_from_slice(&encode_array(&["SET", "bar", "456"]));
        let (first, used) = command(&wire);
        assert_eq!(first[1], Bytes::from_static(b"foo"));
        let (second, rest) = command(&wire[used..]);
        assert_eq!(second[2], Bytes::from_static(b"456"));
        assert_eq!(used + rest, wire.len());
    }

    #[test]
    fn partial_frame_is_incomplete() {
        let wire = encode_array(&["ECHO", "hello"]);
        for cut in 0..wire.len() {
            assert_eq!(parse_value(&wire[..cut]), Err(RespError::Incomplete));
        }
    }

    #[test]
    fn malformed_frames_are_invalid() {
        assert!(matches!(
            parse_value(b"*1\r\n$x\r\nPING\r\n"),
            Err(RespError::Invalid(_))
        ));
        assert!(matches!(
            parse_value(b"*1\r\n$2\r\nPING\r\n"),
            Err(RespError::Invalid(_))
        ));
        assert!(matches!(parse_value(b"?\r\n"), Err(RespError::Invalid(_))));
        assert!(matches!(
            parse_value(b"$-5\r\n"),
            Err(RespError::Invalid(_))
        ));
    }

    #[test]
    fn non_command_values() {
        let (value, used) = parse_value(b"+OK\r\n*1").unwrap();
        assert_eq!(value, RespValue::Simple("OK".to_string()));
        assert_eq!(used, 5);
        assert!(value.into_command().is_none());
        assert_eq!(parse_value(b"$-1\r\n").unwrap().0, RespValue::Null);
        assert_eq!(parse_value(b":42\r\n").unwrap().0, RespValue::Integer(42));
        let nested = parse_value(b"*2\r\n$1\r\na\r\n:1\r\n").unwrap().0;
        assert!(nested.into_command().is_none());
    }

    #[test]
    fn parses_rdb_blob_without_trailing_crlf() {
        let mut wire = encode_rdb(b"REDIS0011\xff").to_vec();
        wire.extend_from_slice(b"*1\r\n$4\r\nPING\r\n");
        let (blob, used) = parse_rdb(&wire).unwrap();
        assert_eq!(&blob[..], b"REDIS0011\xff");
        let (next, _) = command(&wire[used..]);
        assert_eq!(next[0], Bytes::from_static(b"PING"));
        assert_eq!(parse_rdb(b"$10\r\nREDIS"), Err(RespError::Incomplete));
    }
}
