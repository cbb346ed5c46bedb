//! Reversible, salted short-id codec used to address runs through the reverse proxy
//! (hostname- and path-based addressing, see the proxy crate).
//!
//! A numeric id is turned into a short, random-looking string by encoding it in a
//! permuted base-35 alphabet. The permutation is derived from a salt, so the mapping
//! is stable across restarts of a given deployment but not guessable from the outside.

use std::collections::HashMap;
use std::fmt;

const CHARS: &str = "023456789abcdefghijkmnopqrstuvwxyz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidShortId(pub char);

impl fmt::Display for InvalidShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "short id contains invalid character {:?}", self.0)
    }
}

impl std::error::Error for InvalidShortId {}

fn encode(mut nb: u64, min_chars: usize, chars: &[u8]) -> String {
    let nb_chars = chars.len() as u64;
    let mut out = Vec::new();
    let mut idx: u64 = 0;
    let mut i = 0usize;
    while nb != 0 || i < min_chars {
        idx = (idx + nb) % nb_chars;
        out.push(chars[idx as usize]);
        idx += 1;
        nb /= nb_chars;
        i += 1;
    }
    out.reverse();
    String::from_utf8(out).expect("alphabet is ASCII")
}

fn decode(shortid: &str, cmap: &HashMap<char, u64>) -> Result<u64, InvalidShortId> {
    let nb_chars = cmap.len() as u64;
    let mut nb: u64 = 0;
    let mut e: u64 = 1;
    let mut prev_idx: u64 = 0;
    for c in shortid.chars().rev() {
        let idx = *cmap.get(&c).ok_or(InvalidShortId(c))?;
        let d = (idx + nb_chars - prev_idx % nb_chars) % nb_chars;
        nb = nb.wrapping_add(d.wrapping_mul(e));
        prev_idx = idx + 1;
        e = e.wrapping_mul(nb_chars);
    }
    Ok(nb)
}

/// Encodes and decodes ids for a single salt / alphabet permutation.
pub struct ShortIds {
    chars: Vec<u8>,
    cmap: HashMap<char, u64>,
}

impl ShortIds {
    pub fn new(salt: &str) -> Self {
        assert!(!salt.is_empty(), "short id salt must not be empty");
        let mut chars: Vec<u8> = CHARS.bytes().collect();
        let salt_bytes = salt.as_bytes();
        let salt_len = salt_bytes.len();
        let nb_chars = chars.len();
        for i in 0..nb_chars {
            let s = salt_bytes[i % salt_len] as usize;
            let j = i + s % (nb_chars - i);
            chars.swap(i, j);
        }
        let cmap = chars
            .iter()
            .enumerate()
            .map(|(i, &c)| (c as char, i as u64))
            .collect();
        ShortIds { chars, cmap }
    }

    /// Encodes a number into a random-looking short id, at least `min_chars` long.
    pub fn encode(&self, nb: u64, min_chars: usize) -> String {
        encode(nb, min_chars, &self.chars)
    }

    /// Decodes a short id back into the original number.
    pub fn decode(&self, shortid: &str) -> Result<u64, InvalidShortId> {
        decode(shortid, &self.cmap)
    }
}

/// Generates multiple independently-permuted id sequences from a single salt, keyed by
/// a short string tag (e.g. `"run"`), so that distinct kinds of ids can't be cross-decoded.
pub struct MultiShortIds {
    salt: String,
    min_chars: usize,
    codecs: parking_lot::Mutex<HashMap<String, std::sync::Arc<ShortIds>>>,
}

impl MultiShortIds {
    pub fn new(salt: impl Into<String>, min_chars: usize) -> Self {
        MultiShortIds {
            salt: salt.into(),
            min_chars,
            codecs: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn codec_for(&self, kind: &str) -> std::sync::Arc<ShortIds> {
        let mut codecs = self.codecs.lock();
        if let Some(codec) = codecs.get(kind) {
            return codec.clone();
        }
        let codec = std::sync::Arc::new(ShortIds::new(&format!("{kind}{}", self.salt)));
        codecs.insert(kind.to_string(), codec.clone());
        codec
    }

    pub fn encode(&self, kind: &str, nb: u64) -> String {
        self.codec_for(kind).encode(nb, self.min_chars)
    }

    pub fn decode(&self, kind: &str, shortid: &str) -> Result<u64, InvalidShortId> {
        self.codec_for(kind).decode(shortid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let ids = ShortIds::new("test-salt");
        for nb in [0u64, 1, 5, 42, 1_000_000, u32::MAX as u64] {
            let encoded = ids.encode(nb, 5);
            assert_eq!(ids.decode(&encoded).unwrap(), nb);
        }
    }

    #[test]
    fn pads_to_minimum_length() {
        let ids = ShortIds::new("test-salt");
        assert!(ids.encode(0, 5).len() >= 5);
    }

    #[test]
    fn different_salts_give_different_encodings() {
        let a = ShortIds::new("salt-a");
        let b = ShortIds::new("salt-b");
        assert_ne!(a.encode(12345, 5), b.encode(12345, 5));
    }

    #[test]
    fn rejects_invalid_characters() {
        let ids = ShortIds::new("test-salt");
        assert!(ids.decode("!!!").is_err());
    }

    #[test]
    fn multi_short_ids_keeps_kinds_independent() {
        let multi = MultiShortIds::new("deployment-salt", 5);
        let run_code = multi.encode("run", 7);
        let upload_code = multi.encode("upload", 7);
        assert_ne!(run_code, upload_code);
        assert_eq!(multi.decode("run", &run_code).unwrap(), 7);
        assert_eq!(multi.decode("upload", &upload_code).unwrap(), 7);
    }
}
