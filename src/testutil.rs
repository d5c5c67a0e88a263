//! Mock collaborators shared by the test modules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;

use crate::entity::{EntityId, Fields};
use crate::remote::RemoteSource;
use crate::store::{PersistentStore, SqliteStore};

/// Remote source backed by a fixed payload table, with call counters.
pub struct MockRemote {
  payloads: Mutex<HashMap<(String, EntityId), Value>>,
  pub fetches: AtomicUsize,
  pub creates: AtomicUsize,
  pub updates: AtomicUsize,
  fail: bool,
}

impl MockRemote {
  pub fn new() -> Self {
    Self {
      payloads: Mutex::new(HashMap::new()),
      fetches: AtomicUsize::new(0),
      creates: AtomicUsize::new(0),
      updates: AtomicUsize::new(0),
      fail: false,
    }
  }

  /// A remote where every call fails, as if the network were down.
  pub fn failing() -> Self {
    Self {
      fail: true,
      ..Self::new()
    }
  }

  pub fn insert(&self, resource: &str, id: impl Into<EntityId>, payload: Value) {
    self
      .payloads
      .lock()
      .unwrap()
      .insert((resource.to_string(), id.into()), payload);
  }
}

#[async_trait]
impl RemoteSource for MockRemote {
  async fn fetch(&self, resource: &str, id: &EntityId) -> Result<Value> {
    self.fetches.fetch_add(1, Ordering::SeqCst);
    if self.fail {
      return Err(eyre!("mock remote is down"));
    }

    let payloads = self.payloads.lock().unwrap();
    Ok(
      payloads
        .get(&(resource.to_string(), id.clone()))
        .cloned()
        .unwrap_or(Value::Null),
    )
  }

  async fn create(&self, _resource: &str, payload: &Fields) -> Result<Value> {
    self.creates.fetch_add(1, Ordering::SeqCst);
    if self.fail {
      return Err(eyre!("mock remote is down"));
    }

    // Echo the payload back with a remote-assigned id.
    let mut created = payload.clone();
    created.insert("id".to_string(), Value::from(99));
    Ok(Value::Object(created))
  }

  async fn update(&self, _resource: &str, id: &EntityId, payload: &Fields) -> Result<Value> {
    self.updates.fetch_add(1, Ordering::SeqCst);
    if self.fail {
      return Err(eyre!("mock remote is down"));
    }

    let mut updated = payload.clone();
    updated.insert("id".to_string(), Value::from(id.to_string()));
    Ok(Value::Object(updated))
  }
}

/// SQLite store wrapper that counts reads and records the insert-vs-update
/// flag of every upsert.
pub struct CountingStore {
  inner: SqliteStore,
  pub gets: AtomicUsize,
  pub upsert_flags: Mutex<Vec<bool>>,
}

impl CountingStore {
  pub fn new(inner: SqliteStore) -> Self {
    Self {
      inner,
      gets: AtomicUsize::new(0),
      upsert_flags: Mutex::new(Vec::new()),
    }
  }
}

impl PersistentStore for CountingStore {
  fn get(&self, table: &str, id: &EntityId) -> Result<Option<String>> {
    self.gets.fetch_add(1, Ordering::SeqCst);
    self.inner.get(table, id)
  }

  fn upsert(&self, table: &str, id: &EntityId, data: &str, already_stored: bool) -> Result<()> {
    self.upsert_flags.lock().unwrap().push(already_stored);
    self.inner.upsert(table, id, data, already_stored)
  }

  fn ensure_schema(&self, tables: &[&str]) -> Result<()> {
    self.inner.ensure_schema(tables)
  }
}
