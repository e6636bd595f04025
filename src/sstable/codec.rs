//! Direct big-endian encode/decode for a single cell. Deliberately not a
//! generic `Encode`/`Decode` trait: the on-disk layout is pinned and
//! small enough that `to_be_bytes`/`from_be_bytes` reads more plainly.

use crate::cell::{Cell, CellKind, FOREVER};

const FLAG_PRESENT: u8 = 0b01;
const FLAG_HAS_EXPIRE: u8 = 0b10;

/// Appends the wire encoding of `cell` to `buf`, returning its length.
pub fn encode_cell(cell: &Cell, buf: &mut Vec<u8>) -> usize {
    let start = buf.len();
    buf.extend_from_slice(&(cell.key.len() as u32).to_be_bytes());
    buf.extend_from_slice(&cell.key);
    buf.extend_from_slice(&cell.timestamp.to_be_bytes());

    let present = matches!(cell.kind, CellKind::Present);
    let has_expire = cell.expire != FOREVER;
    let mut flags = 0u8;
    if present {
        flags |= FLAG_PRESENT;
    }
    if has_expire {
        flags |= FLAG_HAS_EXPIRE;
    }
    buf.push(flags);

    if has_expire {
        buf.extend_from_slice(&cell.expire.to_be_bytes());
    }
    if present {
        let value = cell.value.as_deref().unwrap_or(&[]);
        buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
        buf.extend_from_slice(value);
    }

    buf.len() - start
}

/// Decodes only the key, for binary search probes that never need the
/// rest of the cell.
pub fn decode_key(buf: &[u8]) -> Result<&[u8], String> {
    let key_len = read_u32(buf, 0)? as usize;
    read_slice(buf, 4, key_len)
}

/// Decodes a full cell starting at offset 0 of `buf`, returning the cell
/// and the number of bytes consumed.
pub fn decode_cell(buf: &[u8]) -> Result<(Cell, usize), String> {
    let key_len = read_u32(buf, 0)? as usize;
    let mut pos = 4;
    let key = read_slice(buf, pos, key_len)?.to_vec();
    pos += key_len;

    let timestamp = read_i64(buf, pos)?;
    pos += 8;

    let flags = *buf.get(pos).ok_or("truncated cell: missing flags byte")?;
    pos += 1;
    let present = flags & FLAG_PRESENT != 0;
    let has_expire = flags & FLAG_HAS_EXPIRE != 0;

    let expire = if has_expire {
        let v = read_i64(buf, pos)?;
        pos += 8;
        v
    } else {
        FOREVER
    };

    let (kind, value) = if present {
        let value_len = read_u32(buf, pos)? as usize;
        pos += 4;
        let value = read_slice(buf, pos, value_len)?.to_vec();
        pos += value_len;
        (CellKind::Present, Some(value))
    } else {
        (CellKind::Tombstone, None)
    };

    Ok((
        Cell {
            key,
            timestamp,
            kind,
            expire,
            value,
        },
        pos,
    ))
}

fn read_slice(buf: &[u8], offset: usize, len: usize) -> Result<&[u8], String> {
    buf.get(offset..offset + len)
        .ok_or_else(|| format!("truncated cell: need {len} bytes at offset {offset}"))
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, String> {
    let bytes: [u8; 4] = read_slice(buf, offset, 4)?.try_into().expect("len checked");
    Ok(u32::from_be_bytes(bytes))
}

fn read_i64(buf: &[u8], offset: usize) -> Result<i64, String> {
    let bytes: [u8; 8] = read_slice(buf, offset, 8)?.try_into().expect("len checked");
    Ok(i64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_present_cell_with_expire() {
        let cell = Cell::present(b"key".to_vec(), b"value".to_vec(), 42, 1000);
        let mut buf = Vec::new();
        let len = encode_cell(&cell, &mut buf);
        assert_eq!(len, buf.len());
        let (decoded, consumed) = decode_cell(&buf).unwrap();
        assert_eq!(consumed, len);
        assert_eq!(decoded.key, cell.key);
        assert_eq!(decoded.value, cell.value);
        assert_eq!(decoded.timestamp, cell.timestamp);
        assert_eq!(decoded.expire, cell.expire);
    }

    #[test]
    fn round_trips_tombstone_without_expire_field() {
        let cell = Cell::tombstone(b"key".to_vec(), 7);
        let mut buf = Vec::new();
        encode_cell(&cell, &mut buf);
        let (decoded, _) = decode_cell(&buf).unwrap();
        assert_eq!(decoded.kind, CellKind::Tombstone);
        assert_eq!(decoded.expire, FOREVER);
        assert!(decoded.value.is_none());
    }

    #[test]
    fn decode_key_reads_only_the_key_prefix() {
        let cell = Cell::present(b"abc".to_vec(), b"long value here".to_vec(), 1, FOREVER);
        let mut buf = Vec::new();
        encode_cell(&cell, &mut buf);
        assert_eq!(decode_key(&buf).unwrap(), b"abc");
    }

    #[test]
    fn truncated_buffer_errors_instead_of_panicking() {
        let cell = Cell::present(b"abc".to_vec(), b"value".to_vec(), 1, FOREVER);
        let mut buf = Vec::new();
        encode_cell(&cell, &mut buf);
        buf.truncate(buf.len() - 2);
        assert!(decode_cell(&buf).is_err());
    }
}
