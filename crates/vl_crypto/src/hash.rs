//! BLAKE3 utilities for merge metadata.

/// Short hex digest used as a field stamp's version hash.
pub fn stamp_hash(value: &str) -> String {
    hex::encode(&blake3::hash(value.as_bytes()).as_bytes()[..8])
}

/// Full hex digest of a store's canonical serialized content.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_hash_is_stable() {
        assert_eq!(stamp_hash("p@ss"), stamp_hash("p@ss"));
        assert_ne!(stamp_hash("p@ss"), stamp_hash("p@st"));
        assert_eq!(stamp_hash("x").len(), 16);
    }
}
