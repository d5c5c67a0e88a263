//! Local persistence tier.
//!
//! One table per entity type, one row per id, with the serialized payload in
//! a `data` column. The store is deliberately dumb: the resolution core
//! decides insert-vs-update and treats any read failure as a miss.

mod sqlite;
mod traits;

pub use sqlite::{NoopStore, SqliteStore};
pub use traits::PersistentStore;
