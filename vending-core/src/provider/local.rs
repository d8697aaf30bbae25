//! A local SQLite fallback directory used when the HTTPS identity provider is
//! unreachable: known cards get a flat credit allowance and a usage counter.

use crate::error::Result;
use crate::provider::{Provider, UserInfo};
use crate::session::CardId;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tokio::sync::Mutex;

pub struct LocalSqliteProvider {
    conn: Mutex<Connection>,
    flat_credits: u32,
}

impl LocalSqliteProvider {
    pub fn open(path: &Path, flat_credits: u32) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                rfid TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                usage INTEGER NOT NULL DEFAULT 0
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            flat_credits,
        })
    }

    pub fn open_in_memory(flat_credits: u32) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                rfid TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                usage INTEGER NOT NULL DEFAULT 0
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            flat_credits,
        })
    }
}

impl LocalSqliteProvider {
    /// Adds `rfid` to the local allow-list under `name`. Used both to
    /// provision the fallback directory and by tests to seed fixtures.
    pub async fn insert_user(&self, rfid: &str, name: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (rfid, name) VALUES (?1, ?2)",
            params![rfid, name],
        )?;
        Ok(())
    }
}

#[async_trait]
impl Provider for LocalSqliteProvider {
    fn tag(&self) -> &str {
        "local"
    }

    async fn authenticate(&self, card: &CardId) -> Result<Option<UserInfo>> {
        let conn = self.conn.lock().await;
        let name: Option<String> = conn
            .query_row(
                "SELECT name FROM users WHERE rfid = ?1",
                params![card.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name.map(|label| UserInfo {
            label,
            credits: self.flat_credits,
            provider_tag: self.tag().to_string(),
        }))
    }

    async fn report(&self, card: &CardId, _slot: u16, dispensed: bool) -> Result<()> {
        if dispensed {
            let conn = self.conn.lock().await;
            conn.execute(
                "UPDATE users SET usage = usage + 1 WHERE rfid = ?1",
                params![card.0],
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_card_returns_none() {
        let provider = LocalSqliteProvider::open_in_memory(69).unwrap();
        let result = provider.authenticate(&CardId("deadbeef".into())).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn known_card_gets_flat_credits() {
        let provider = LocalSqliteProvider::open_in_memory(69).unwrap();
        provider.insert_user("abc123", "Ada Lovelace").await.unwrap();
        let info = provider
            .authenticate(&CardId("abc123".into()))
            .await
            .unwrap()
            .expect("card should be known");
        assert_eq!(info.credits, 69);
        assert_eq!(info.label, "Ada Lovelace");
    }

    #[tokio::test]
    async fn report_increments_usage_only_when_dispensed() {
        let provider = LocalSqliteProvider::open_in_memory(69).unwrap();
        provider.insert_user("abc123", "Ada Lovelace").await.unwrap();
        provider.report(&CardId("abc123".into()), 4, false).await.unwrap();
        provider.report(&CardId("abc123".into()), 4, true).await.unwrap();
        let conn = provider.conn.lock().await;
        let usage: i64 = conn
            .query_row("SELECT usage FROM users WHERE rfid = ?1", params!["abc123"], |row| row.get(0))
            .unwrap();
        assert_eq!(usage, 1);
    }
}
