//! Snapshot file layout and naming.
//!
//! A state file is the canonical serialization of a store's `kv`: keys in
//! lexicographic order, each entry length-prefixed as
//! `u32-LE key_len, key, u32-LE val_len, val`. Complete snapshots are named
//! `<start>-<end>.kv`, partials `<start>-<end>.partial`, both under
//! `states/<moduleHash>/`.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use tributary_primitives::{BlockRange, ModuleHash};

/// Identity of one persisted state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateFile {
    /// Block range covered by the file.
    pub range: BlockRange,
    /// `true` for `.partial` files, `false` for complete `.kv` snapshots.
    pub partial: bool,
}

/// Object name of a state file under its module's namespace.
pub fn state_file_name(hash: &ModuleHash, file: &StateFile) -> String {
    let ext = if file.partial { "partial" } else { "kv" };
    format!(
        "states/{hash}/{start}-{end}.{ext}",
        start = file.range.start_block,
        end = file.range.exclusive_end_block,
    )
}

/// Parses an object name produced by [`state_file_name`]. Returns `None` for
/// names that are not state files (foreign objects are ignored, not errors).
pub fn parse_state_file_name(name: &str) -> Option<StateFile> {
    let file_name = name.rsplit('/').next()?;
    let (stem, ext) = file_name.rsplit_once('.')?;
    let partial = match ext {
        "kv" => false,
        "partial" => true,
        _ => return None,
    };
    let (start, end) = stem.split_once('-')?;
    let range = BlockRange::new(start.parse().ok()?, end.parse().ok()?);
    Some(StateFile { range, partial })
}

/// Serializes `kv` in the canonical sorted length-prefixed layout.
pub fn encode_kv(kv: &HashMap<String, Vec<u8>>) -> Bytes {
    let mut keys: Vec<&String> = kv.keys().collect();
    keys.sort();

    let size = kv.iter().map(|(k, v)| 8 + k.len() + v.len()).sum();
    let mut buf = BytesMut::with_capacity(size);
    for key in keys {
        let value = &kv[key];
        buf.put_u32_le(key.len() as u32);
        buf.put_slice(key.as_bytes());
        buf.put_u32_le(value.len() as u32);
        buf.put_slice(value);
    }
    buf.freeze()
}

/// Parses a state file body. The error is a human-readable reason used to
/// build [`StoreError::SnapshotCorrupt`](crate::StoreError::SnapshotCorrupt).
pub fn decode_kv(mut data: &[u8]) -> Result<HashMap<String, Vec<u8>>, String> {
    fn take<'a>(data: &mut &'a [u8], len: usize, what: &str) -> Result<&'a [u8], String> {
        if data.len() < len {
            return Err(format!("truncated {what}: need {len} bytes, have {}", data.len()));
        }
        let (head, tail) = data.split_at(len);
        *data = tail;
        Ok(head)
    }

    let mut kv = HashMap::new();
    while !data.is_empty() {
        let key_len = u32::from_le_bytes(
            take(&mut data, 4, "key length")?.try_into().expect("4 bytes"),
        ) as usize;
        let key = std::str::from_utf8(take(&mut data, key_len, "key")?)
            .map_err(|err| format!("key is not utf-8: {err}"))?
            .to_owned();
        let val_len = u32::from_le_bytes(
            take(&mut data, 4, "value length")?.try_into().expect("4 bytes"),
        ) as usize;
        let value = take(&mut data, val_len, "value")?.to_vec();
        kv.insert(key, value);
    }
    Ok(kv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_round_trip() {
        let hash = ModuleHash::new("ab12cd34");
        let complete = StateFile { range: BlockRange::new(0, 10_000), partial: false };
        let partial = StateFile { range: BlockRange::new(10_000, 20_000), partial: true };

        assert_eq!(state_file_name(&hash, &complete), "states/ab12cd34/0-10000.kv");
        assert_eq!(state_file_name(&hash, &partial), "states/ab12cd34/10000-20000.partial");

        assert_eq!(parse_state_file_name("states/ab12cd34/0-10000.kv"), Some(complete));
        assert_eq!(parse_state_file_name("states/ab12cd34/10000-20000.partial"), Some(partial));
    }

    #[test]
    fn foreign_names_are_ignored() {
        assert_eq!(parse_state_file_name("states/ab12cd34/.0-1.kv.tmp"), None);
        assert_eq!(parse_state_file_name("states/ab12cd34/README"), None);
        assert_eq!(parse_state_file_name("states/ab12cd34/x-y.kv"), None);
    }

    #[test]
    fn kv_round_trips_sorted() {
        let mut kv = HashMap::new();
        kv.insert("b".to_owned(), b"two".to_vec());
        kv.insert("a".to_owned(), b"one".to_vec());
        kv.insert("empty".to_owned(), Vec::new());

        let encoded = encode_kv(&kv);
        assert_eq!(decode_kv(&encoded).unwrap(), kv);

        // Keys are laid out lexicographically, so encoding is deterministic.
        assert_eq!(encoded, encode_kv(&decode_kv(&encoded).unwrap()));
        let first_key_len = u32::from_le_bytes(encoded[0..4].try_into().unwrap());
        assert_eq!(&encoded[4..4 + first_key_len as usize], b"a");
    }

    #[test]
    fn truncated_input_is_rejected() {
        let mut kv = HashMap::new();
        kv.insert("key".to_owned(), b"value".to_vec());
        let encoded = encode_kv(&kv);

        let err = decode_kv(&encoded[..encoded.len() - 1]).unwrap_err();
        assert!(err.contains("truncated"));
    }
}
