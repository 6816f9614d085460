//! Local dedup cache (spec.md §4.8 step 4, C3) and watch cursor state.
//!
//! Advisory only: a block missing from this cache is *not* proof the server
//! needs it (another client may have already pushed the same content), so
//! the pipeline still confirms against the server's `needed_hashes` before
//! uploading (spec.md §8 property 4). This just avoids re-asking the server
//! about a hash this client has already confirmed this host holds.
//!
//! Grounded on the teacher's `db.rs::LocalDb`/`FileState` (same
//! `rusqlite::Connection`-wrapping shape, `INSERT OR REPLACE` upserts), with
//! the schema narrowed to what a dedup cache plus a watch cursor need.

use cdp_proto::Hash;
use rusqlite::Connection;
use std::path::Path;

pub struct DedupCache {
    conn: Connection,
}

impl DedupCache {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS known_hashes (
                hash TEXT PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS watch_state (
                key TEXT PRIMARY KEY,
                value TEXT
            );
            "#,
        )?;
        Ok(DedupCache { conn })
    }

    pub fn contains(&self, hash: &Hash) -> anyhow::Result<bool> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM known_hashes WHERE hash = ?")?;
        Ok(stmt.exists([hash.to_hex()])?)
    }

    pub fn insert(&self, hash: &Hash) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO known_hashes (hash) VALUES (?)",
            [hash.to_hex()],
        )?;
        Ok(())
    }

    /// Spec.md §4.8 step 4: filter candidates to the ones not already known
    /// locally, preserving order.
    pub fn filter_unseen(&self, candidates: &[Hash]) -> anyhow::Result<Vec<Hash>> {
        let mut unseen = Vec::with_capacity(candidates.len());
        for hash in candidates {
            if !self.contains(hash)? {
                unseen.push(*hash);
            }
        }
        Ok(unseen)
    }

    /// Seed the cache with a batch of hashes already known to the server
    /// (spec §4.3, C3) — e.g. at session start, before the first backup, so
    /// `filter_unseen` doesn't re-ask about content another client already
    /// pushed for this host.
    pub fn bulk_load<I: IntoIterator<Item = Hash>>(&self, hashes: I) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO known_hashes (hash) VALUES (?)")?;
            for hash in hashes {
                stmt.execute([hash.to_hex()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_watch_cursor(&self) -> anyhow::Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM watch_state WHERE key = 'cursor'")?;
        match stmt.query_row([], |row| row.get(0)) {
            Ok(cursor) => Ok(Some(cursor)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_watch_cursor(&self, cursor: &str) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO watch_state (key, value) VALUES ('cursor', ?)",
            [cursor],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_hash_is_not_contained() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DedupCache::open(&dir.path().join("cache.db")).unwrap();
        let hash = Hash::of(b"never seen");
        assert!(!cache.contains(&hash).unwrap());
    }

    #[test]
    fn insert_then_contains() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DedupCache::open(&dir.path().join("cache.db")).unwrap();
        let hash = Hash::of(b"seen once");
        cache.insert(&hash).unwrap();
        assert!(cache.contains(&hash).unwrap());
    }

    #[test]
    fn filter_unseen_drops_known_hashes_preserving_order() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DedupCache::open(&dir.path().join("cache.db")).unwrap();
        let h1 = Hash::of(b"one");
        let h2 = Hash::of(b"two");
        let h3 = Hash::of(b"three");
        cache.insert(&h2).unwrap();

        let unseen = cache.filter_unseen(&[h1, h2, h3]).unwrap();
        assert_eq!(unseen, vec![h1, h3]);
    }

    #[test]
    fn bulk_load_seeds_contains() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DedupCache::open(&dir.path().join("cache.db")).unwrap();
        let h1 = Hash::of(b"bulk one");
        let h2 = Hash::of(b"bulk two");
        cache.bulk_load([h1, h2]).unwrap();
        assert!(cache.contains(&h1).unwrap());
        assert!(cache.contains(&h2).unwrap());
    }

    #[test]
    fn watch_cursor_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DedupCache::open(&dir.path().join("cache.db")).unwrap();
        assert!(cache.get_watch_cursor().unwrap().is_none());
        cache.set_watch_cursor("abc123").unwrap();
        assert_eq!(cache.get_watch_cursor().unwrap().as_deref(), Some("abc123"));
    }
}
