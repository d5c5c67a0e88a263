//! Store trait for local persistence backends.

use color_eyre::Result;

use crate::entity::EntityId;

/// Trait for local persistent storage backends.
///
/// Each entity type owns one table; each row is keyed by id and carries the
/// serialized properties snapshot. The backend never decides insert-vs-update
/// on its own: the caller passes its `locally_stored` flag and the backend
/// issues the matching statement.
pub trait PersistentStore: Send + Sync {
  /// Fetch the serialized row data for an id. `None` when no row exists.
  fn get(&self, table: &str, id: &EntityId) -> Result<Option<String>>;

  /// Write the serialized row data for an id.
  ///
  /// `already_stored == false` issues a first insert, `true` an update of
  /// the existing row.
  fn upsert(&self, table: &str, id: &EntityId, data: &str, already_stored: bool) -> Result<()>;

  /// Create the backing table for each name if it does not exist yet.
  fn ensure_schema(&self, tables: &[&str]) -> Result<()>;
}
