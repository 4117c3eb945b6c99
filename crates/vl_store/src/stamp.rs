//! Stamped values — the per-field version metadata behind LWW merge.
//!
//! Every mergeable field carries its value, a logical timestamp (unix
//! millis at write time) and a short content hash.  Merge order is
//! `(time, hash, value)`: higher time wins, ties fall back to the hash and
//! finally the value itself, so two peers always resolve a conflict the
//! same way regardless of merge direction.  The value tiebreak matters for
//! sanitized stamps, whose hashes are all cleared.
//!
//! A cleared hash (`""`) marks a field as sanitized / freshly rewritten;
//! the sync view builder relies on this to recognise embedded plaintext.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub value: String,
    pub time: i64,
    pub hash: String,
}

impl Stamp {
    /// Stamp a freshly written value.
    pub fn new(value: impl Into<String>, time: i64) -> Self {
        let value = value.into();
        let hash = vl_crypto::hash::stamp_hash(&value);
        Self { value, time, hash }
    }

    /// True when `self` should replace `other` under LWW.
    pub fn newer_than(&self, other: &Stamp) -> bool {
        (self.time, self.hash.as_str(), self.value.as_str())
            > (other.time, other.hash.as_str(), other.value.as_str())
    }

    /// Replace this stamp if the remote one is newer.
    pub fn merge_from(&mut self, remote: &Stamp) {
        if remote.newer_than(self) {
            *self = remote.clone();
        }
    }

    /// Clear value and version hash, keeping the logical time.
    pub fn sanitize(&mut self) {
        self.value.clear();
        self.hash.clear();
    }

    /// Overwrite the value, clearing the version hash (sanitized write).
    pub fn sanitize_with(&mut self, value: impl Into<String>) {
        self.value = value.into();
        self.hash.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_time_wins() {
        let mut local = Stamp::new("old", 100);
        let remote = Stamp::new("new", 200);
        local.merge_from(&remote);
        assert_eq!(local.value, "new");
    }

    #[test]
    fn older_remote_ignored() {
        let mut local = Stamp::new("current", 200);
        local.merge_from(&Stamp::new("stale", 100));
        assert_eq!(local.value, "current");
    }

    #[test]
    fn equal_time_resolves_by_hash_both_ways() {
        let a = Stamp::new("alpha", 100);
        let b = Stamp::new("bravo", 100);

        let mut left = a.clone();
        left.merge_from(&b);
        let mut right = b.clone();
        right.merge_from(&a);
        assert_eq!(left, right, "merge must be commutative on time ties");
    }

    #[test]
    fn sanitized_equal_time_stamps_resolve_by_value() {
        // Sanitized stamps carry empty hashes; the value is the only
        // tiebreak left when times are equal.
        let mut a = Stamp::new("ignored", 1_000);
        a.sanitize_with("p@ss-from-A");
        let mut b = Stamp::new("ignored", 1_000);
        b.sanitize_with("p@ss-from-B");

        let mut left = a.clone();
        left.merge_from(&b);
        let mut right = b.clone();
        right.merge_from(&a);
        assert_eq!(left, right, "merge must be commutative on sanitized ties");
        assert_eq!(left.value, "p@ss-from-B");
    }

    #[test]
    fn merge_is_idempotent() {
        let mut local = Stamp::new("v", 100);
        let remote = Stamp::new("w", 200);
        local.merge_from(&remote);
        let once = local.clone();
        local.merge_from(&remote);
        assert_eq!(local, once);
    }

    #[test]
    fn sanitize_keeps_time() {
        let mut stamp = Stamp::new("secret", 123);
        stamp.sanitize();
        assert_eq!(stamp.time, 123);
        assert!(stamp.value.is_empty());
        assert!(stamp.hash.is_empty());
    }
}
