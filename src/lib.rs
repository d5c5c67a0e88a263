//! Lazy three-tier entity resolution: memory first, then a local SQLite
//! store, then a remote REST endpoint.
//!
//! Given a (type, id) pair the crate returns the freshest representation it
//! can with the fewest synchronous costs:
//! - memory: the identity cache hands back the already-resolved instance
//! - local: a per-type SQLite table holds the last payload seen for each id
//! - remote: the REST resource is consulted last, and its payload is
//!   written back to the local store after the caller has been notified
//!
//! Loads are either lazy (exactly one callback, cached data preferred) or
//! eager (the callback may fire twice: local copy first, refreshed remote
//! data second). Remote failures are delivered through the callback as
//! explicit values; local-store failures degrade to the next tier.
//!
//! ```no_run
//! use lazyorm::{EntityRegistry, EntityType, LoadMode, LoadOutcome, OrmConfig};
//!
//! # async fn demo() -> color_eyre::Result<()> {
//! let mut registry = EntityRegistry::from_config(&OrmConfig::new("https://api.droplet.la"))?;
//! registry.register(EntityType::new("droplet", "droplet", "droplets"));
//! registry.sync_schema()?;
//!
//! let droplet = registry.get_or_create("droplet", 42)?;
//! droplet
//!   .load(LoadMode::Eager, |outcome| {
//!     if let LoadOutcome::Ready { tier, fields } = outcome {
//!       println!("{:?}: {:?}", tier, fields.get("name"));
//!     }
//!   })
//!   .await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entity;
pub mod registry;
pub mod remote;
pub mod store;

#[cfg(test)]
mod testutil;

pub use config::OrmConfig;
pub use entity::{Entity, EntityId, EntityType, Fields, LoadMode, LoadOutcome, Tier};
pub use registry::EntityRegistry;
pub use remote::{HttpRemote, RemoteSource};
pub use store::{NoopStore, PersistentStore, SqliteStore};
