//! The `FileMeta` record: one version of one filesystem object on one host
//! (spec §3, §4.2).

use crate::hash::Hash;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    Other,
}

/// One version of one filesystem object on one host.
///
/// Equality for identity purposes (spec §4.2) compares only
/// `(host, path, file_type, uid, gid, atime, ctime, mtime, mode)` — see
/// [`FileMeta::same_identity`]. `PartialEq`/`Eq` derive on the *whole*
/// struct instead, since full structural equality is what serialization
/// round-trip tests and storage-layer equality checks need; identity
/// comparisons go through the dedicated method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub host: String,
    pub path: String,
    pub name: String,
    pub file_type: FileType,
    pub mode: i64,
    pub uid: i64,
    pub gid: i64,
    pub owner: String,
    pub group: String,
    pub inode: i64,
    pub size: i64,
    pub atime: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub link: Option<String>,
    pub hashes: Vec<Hash>,
}

impl FileMeta {
    /// The identity-bearing attribute tuple used for existence checks
    /// (spec §3, §4.2, §4.8 step 2) and equality in the dedup sense.
    pub fn same_identity(&self, other: &FileMeta) -> bool {
        self.host == other.host
            && self.path == other.path
            && self.file_type == other.file_type
            && self.uid == other.uid
            && self.gid == other.gid
            && self.atime == other.atime
            && self.ctime == other.ctime
            && self.mtime == other.mtime
            && self.mode == other.mode
    }

    /// Ordering for "latest-only" reduction: by `mtime` descending, ties
    /// broken by `ctime` descending (spec §4.2). Insertion order is left to
    /// the caller's stable sort.
    pub fn latest_cmp(&self, other: &FileMeta) -> Ordering {
        other
            .mtime
            .cmp(&self.mtime)
            .then_with(|| other.ctime.cmp(&self.ctime))
    }

    /// Whether hashing the (complete, ordered) hash list's recorded blocks
    /// would reconstitute a file matching `size` — the invariant from
    /// spec §3, checked once all block lengths are known by the caller.
    pub fn reconstructed_size_matches(&self, block_lengths: &[u64]) -> bool {
        if self.file_type != FileType::Regular {
            return self.hashes.is_empty();
        }
        block_lengths.iter().sum::<u64>() == self.size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(mtime: i64, ctime: i64) -> FileMeta {
        FileMeta {
            host: "hostA".into(),
            path: "/a.txt".into(),
            name: "a.txt".into(),
            file_type: FileType::Regular,
            mode: 0o644,
            uid: 1000,
            gid: 1000,
            owner: "alice".into(),
            group: "alice".into(),
            inode: 42,
            size: 10,
            atime: 0,
            ctime,
            mtime,
            link: None,
            hashes: vec![Hash::of(b"x")],
        }
    }

    #[test]
    fn same_identity_ignores_size_and_hashes() {
        let a = sample(100, 100);
        let mut b = sample(100, 100);
        b.size = 999;
        b.hashes.clear();
        assert!(a.same_identity(&b));
    }

    #[test]
    fn same_identity_differs_on_mtime() {
        let a = sample(100, 100);
        let b = sample(200, 100);
        assert!(!a.same_identity(&b));
    }

    #[test]
    fn latest_cmp_orders_by_mtime_then_ctime_descending() {
        let newer = sample(2023, 0);
        let older = sample(2022, 0);
        assert_eq!(newer.latest_cmp(&older), Ordering::Less);

        let same_mtime_newer_ctime = sample(2023, 50);
        let same_mtime_older_ctime = sample(2023, 10);
        assert_eq!(
            same_mtime_newer_ctime.latest_cmp(&same_mtime_older_ctime),
            Ordering::Less
        );
    }

    #[test]
    fn reconstructed_size_matches_checks_sum() {
        let meta = sample(0, 0);
        assert!(meta.reconstructed_size_matches(&[4, 6]));
        assert!(!meta.reconstructed_size_matches(&[4, 5]));
    }

    #[test]
    fn serde_round_trip() {
        let meta = sample(100, 100);
        let json = serde_json::to_string(&meta).unwrap();
        let back: FileMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(meta, back);
    }
}
