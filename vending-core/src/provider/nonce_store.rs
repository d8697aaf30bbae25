//! Persisted nonce ledger used to reject replayed provider responses.

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tokio::sync::Mutex;

pub struct NonceStore {
    conn: Mutex<Connection>,
}

impl NonceStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS seen_nonces (
                nonce TEXT PRIMARY KEY,
                seen_at INTEGER NOT NULL
            )",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS seen_nonces (
                nonce TEXT PRIMARY KEY,
                seen_at INTEGER NOT NULL
            )",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Returns `true` if `nonce` has not been seen before (and records it),
    /// `false` if it is a replay.
    pub async fn check_and_record(&self, nonce: &str, timestamp: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        let seen: Option<i64> = conn
            .query_row(
                "SELECT seen_at FROM seen_nonces WHERE nonce = ?1",
                params![nonce],
                |row| row.get(0),
            )
            .optional()?;
        if seen.is_some() {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO seen_nonces (nonce, seen_at) VALUES (?1, ?2)",
            params![nonce, timestamp],
        )?;
        Ok(true)
    }

    /// Drops ledger entries older than `cutoff` (a unix timestamp), keeping
    /// the table from growing without bound.
    pub async fn prune_older_than(&self, cutoff: i64) -> Result<usize> {
        let conn = self.conn.lock().await;
        let removed = conn.execute("DELETE FROM seen_nonces WHERE seen_at < ?1", params![cutoff])?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_repeated_nonce() {
        let store = NonceStore::open_in_memory().unwrap();
        assert!(store.check_and_record("abc", 100).await.unwrap());
        assert!(!store.check_and_record("abc", 100).await.unwrap());
    }

    #[tokio::test]
    async fn prune_removes_stale_entries() {
        let store = NonceStore::open_in_memory().unwrap();
        store.check_and_record("old", 10).await.unwrap();
        store.check_and_record("new", 1000).await.unwrap();
        let removed = store.prune_older_than(500).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.check_and_record("old", 10).await.unwrap());
        assert!(!store.check_and_record("new", 1000).await.unwrap());
    }
}
