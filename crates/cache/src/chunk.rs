//! Chunk file layout and naming.
//!
//! A chunk file is named `outputs/<moduleHash>/<start>-<end>.output` and
//! holds the resume cursor followed by one record per block that produced an
//! output:
//!
//! ```text
//! u64-LE cursor_len | cursor bytes
//! u64-LE block_num | u64-LE payload_len | payload bytes   (ascending blocks)
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use tributary_primitives::{BlockRange, Cursor, ModuleHash};

/// Object name of the chunk covering `range`.
pub fn chunk_file_name(hash: &ModuleHash, range: &BlockRange) -> String {
    format!(
        "outputs/{hash}/{start}-{end}.output",
        start = range.start_block,
        end = range.exclusive_end_block,
    )
}

/// Parses an object name produced by [`chunk_file_name`]. Foreign objects
/// yield `None`.
pub fn parse_chunk_file_name(name: &str) -> Option<BlockRange> {
    let file_name = name.rsplit('/').next()?;
    let stem = file_name.strip_suffix(".output")?;
    let (start, end) = stem.split_once('-')?;
    Some(BlockRange::new(start.parse().ok()?, end.parse().ok()?))
}

pub(crate) fn encode_chunk(cursor: &Cursor, kv: &BTreeMap<u64, Bytes>) -> Bytes {
    let size = 8 + cursor.len() + kv.values().map(|v| 16 + v.len()).sum::<usize>();
    let mut buf = BytesMut::with_capacity(size);
    buf.put_u64_le(cursor.len() as u64);
    buf.put_slice(cursor.as_bytes());
    for (block_num, payload) in kv {
        buf.put_u64_le(*block_num);
        buf.put_u64_le(payload.len() as u64);
        buf.put_slice(payload);
    }
    buf.freeze()
}

pub(crate) fn decode_chunk(mut data: &[u8]) -> Result<(Cursor, BTreeMap<u64, Bytes>), String> {
    fn take_u64(data: &mut &[u8], what: &str) -> Result<u64, String> {
        if data.len() < 8 {
            return Err(format!("truncated {what}: need 8 bytes, have {}", data.len()));
        }
        let (head, tail) = data.split_at(8);
        *data = tail;
        Ok(u64::from_le_bytes(head.try_into().expect("8 bytes")))
    }

    fn take_bytes<'a>(data: &mut &'a [u8], len: usize, what: &str) -> Result<&'a [u8], String> {
        if data.len() < len {
            return Err(format!("truncated {what}: need {len} bytes, have {}", data.len()));
        }
        let (head, tail) = data.split_at(len);
        *data = tail;
        Ok(head)
    }

    let cursor_len = take_u64(&mut data, "cursor length")? as usize;
    let cursor = std::str::from_utf8(take_bytes(&mut data, cursor_len, "cursor")?)
        .map_err(|err| format!("cursor is not utf-8: {err}"))?
        .to_owned();

    let mut kv = BTreeMap::new();
    while !data.is_empty() {
        let block_num = take_u64(&mut data, "block number")?;
        let payload_len = take_u64(&mut data, "payload length")? as usize;
        let payload = Bytes::copy_from_slice(take_bytes(&mut data, payload_len, "payload")?);
        kv.insert(block_num, payload);
    }
    Ok((cursor, kv))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_round_trip() {
        let hash = ModuleHash::new("ffee00");
        let range = BlockRange::new(1000, 2000);
        let name = chunk_file_name(&hash, &range);
        assert_eq!(name, "outputs/ffee00/1000-2000.output");
        assert_eq!(parse_chunk_file_name(&name), Some(range));
        assert_eq!(parse_chunk_file_name("outputs/ffee00/1000-2000.kv"), None);
    }

    #[test]
    fn chunk_round_trips() {
        let mut kv = BTreeMap::new();
        kv.insert(1000, Bytes::from_static(b"one"));
        kv.insert(1001, Bytes::new());
        kv.insert(1007, Bytes::from_static(b"seven"));
        let cursor = "resume-token-42".to_owned();

        let encoded = encode_chunk(&cursor, &kv);
        let (decoded_cursor, decoded_kv) = decode_chunk(&encoded).unwrap();
        assert_eq!(decoded_cursor, cursor);
        assert_eq!(decoded_kv, kv);
    }

    #[test]
    fn truncated_chunk_is_rejected() {
        let mut kv = BTreeMap::new();
        kv.insert(1u64, Bytes::from_static(b"payload"));
        let encoded = encode_chunk(&String::new(), &kv);

        let err = decode_chunk(&encoded[..encoded.len() - 2]).unwrap_err();
        assert!(err.contains("truncated"));
    }
}
