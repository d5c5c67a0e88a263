//! SQLite implementation of the local store, plus a no-op backend.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::entity::EntityId;

use super::traits::PersistentStore;

/// SQLite-backed local store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the store at an explicit location.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Fully in-memory store, for tests and throwaway sessions.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("lazyorm").join("cache.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Table names come from type registration, not user input, but quote them
/// anyway so an exotic name cannot break the statement.
fn quote_ident(name: &str) -> String {
  format!("\"{}\"", name.replace('"', "\"\""))
}

impl PersistentStore for SqliteStore {
  fn get(&self, table: &str, id: &EntityId) -> Result<Option<String>> {
    let conn = self.conn()?;

    let sql = format!("SELECT data FROM {} WHERE id = ?", quote_ident(table));
    let mut stmt = conn
      .prepare(&sql)
      .map_err(|e| eyre!("Failed to prepare row lookup: {}", e))?;

    match stmt.query_row(params![id.to_string()], |row| row.get::<_, String>(0)) {
      Ok(data) => Ok(Some(data)),
      Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
      Err(e) => Err(eyre!("Failed to read row from {}: {}", table, e)),
    }
  }

  fn upsert(&self, table: &str, id: &EntityId, data: &str, already_stored: bool) -> Result<()> {
    let conn = self.conn()?;

    let sql = if already_stored {
      format!("UPDATE {} SET data = ? WHERE id = ?", quote_ident(table))
    } else {
      format!("INSERT INTO {} (data, id) VALUES (?, ?)", quote_ident(table))
    };

    conn
      .execute(&sql, params![data, id.to_string()])
      .map_err(|e| eyre!("Failed to persist row to {}: {}", table, e))?;

    Ok(())
  }

  fn ensure_schema(&self, tables: &[&str]) -> Result<()> {
    let conn = self.conn()?;

    for table in tables {
      let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, data TEXT NOT NULL)",
        quote_ident(table)
      );
      conn
        .execute(&sql, [])
        .map_err(|e| eyre!("Failed to create table {}: {}", table, e))?;
    }

    Ok(())
  }
}

/// Store backend that doesn't persist anything.
/// Every read misses and writes are discarded, so every load goes remote.
pub struct NoopStore;

impl PersistentStore for NoopStore {
  fn get(&self, _table: &str, _id: &EntityId) -> Result<Option<String>> {
    Ok(None) // Always miss
  }

  fn upsert(&self, _table: &str, _id: &EntityId, _data: &str, _already_stored: bool) -> Result<()> {
    Ok(()) // Discard
  }

  fn ensure_schema(&self, _tables: &[&str]) -> Result<()> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().expect("in-memory store");
    store.ensure_schema(&["droplet"]).expect("schema");
    store
  }

  #[test]
  fn test_get_misses_before_insert() {
    let store = store();
    let row = store.get("droplet", &EntityId::from(1)).unwrap();
    assert!(row.is_none());
  }

  #[test]
  fn test_insert_then_get_round_trips() {
    let store = store();
    let id = EntityId::from(1);

    store.upsert("droplet", &id, r#"{"id":1}"#, false).unwrap();
    let row = store.get("droplet", &id).unwrap();
    assert_eq!(row.as_deref(), Some(r#"{"id":1}"#));
  }

  #[test]
  fn test_duplicate_insert_fails() {
    let store = store();
    let id = EntityId::from(1);

    store.upsert("droplet", &id, "{}", false).unwrap();
    assert!(store.upsert("droplet", &id, "{}", false).is_err());
  }

  #[test]
  fn test_update_replaces_data() {
    let store = store();
    let id = EntityId::from(1);

    store
      .upsert("droplet", &id, r#"{"name":"old"}"#, false)
      .unwrap();
    store
      .upsert("droplet", &id, r#"{"name":"new"}"#, true)
      .unwrap();

    let row = store.get("droplet", &id).unwrap();
    assert_eq!(row.as_deref(), Some(r#"{"name":"new"}"#));
  }

  #[test]
  fn test_missing_table_is_an_error() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert!(store.get("nowhere", &EntityId::from(1)).is_err());
  }

  #[test]
  fn test_ensure_schema_is_idempotent() {
    let store = store();
    store.ensure_schema(&["droplet", "user"]).unwrap();
    store.ensure_schema(&["droplet", "user"]).unwrap();
  }

  #[test]
  fn test_noop_store_always_misses() {
    let store = NoopStore;
    let id = EntityId::from(1);

    store.upsert("droplet", &id, "{}", false).unwrap();
    assert!(store.get("droplet", &id).unwrap().is_none());
  }
}
