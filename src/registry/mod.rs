//! Entity registry: type descriptors plus the per-type identity cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use color_eyre::{eyre::eyre, Result};
use tracing::debug;

use crate::config::OrmConfig;
use crate::entity::{Context, Entity, EntityId, EntityType};
use crate::remote::{HttpRemote, RemoteSource};
use crate::store::{PersistentStore, SqliteStore};

type IdentityCache = HashMap<(String, EntityId), Arc<Entity>>;

/// Mapping from type name to descriptor, plus the identity cache that
/// guarantees at most one live [`Entity`] per (type, id).
///
/// A registry owns its collaborators and is passed around explicitly; there
/// are no process-wide globals. Dropping it is the teardown.
pub struct EntityRegistry {
  ctx: Arc<Context>,
  types: HashMap<String, Arc<EntityType>>,
  cache: Mutex<IdentityCache>,
}

impl EntityRegistry {
  /// Create a registry over explicit store and remote collaborators.
  pub fn new(store: Arc<dyn PersistentStore>, remote: Arc<dyn RemoteSource>) -> Self {
    Self {
      ctx: Arc::new(Context { store, remote }),
      types: HashMap::new(),
      cache: Mutex::new(HashMap::new()),
    }
  }

  /// Build a registry from configuration: SQLite local store plus HTTP
  /// remote.
  pub fn from_config(config: &OrmConfig) -> Result<Self> {
    let store = match &config.db_path {
      Some(path) => SqliteStore::open_at(path)?,
      None => SqliteStore::open()?,
    };
    let remote = HttpRemote::from_config(config)?;

    Ok(Self::new(Arc::new(store), Arc::new(remote)))
  }

  /// Register a type. A name that is already registered is left untouched;
  /// use [`EntityRegistry::register_force`] to replace a descriptor.
  pub fn register(&mut self, ty: EntityType) {
    self
      .types
      .entry(ty.name.clone())
      .or_insert_with(|| Arc::new(ty));
  }

  /// Register a type, replacing any existing descriptor with the same name.
  pub fn register_force(&mut self, ty: EntityType) {
    self.types.insert(ty.name.clone(), Arc::new(ty));
  }

  /// Return the cached entity for (type, id), constructing an unresolved
  /// one on first reference. Construct-if-absent happens under a single
  /// lock acquisition, so a reentrant caller cannot observe two instances.
  ///
  /// The cache grows for the life of the registry; entries are never
  /// evicted.
  pub fn get_or_create(&self, type_name: &str, id: impl Into<EntityId>) -> Result<Arc<Entity>> {
    let ty = self.lookup(type_name)?;
    let id = id.into();

    let mut cache = self.cache_lock();
    let entity = cache
      .entry((ty.name.clone(), id.clone()))
      .or_insert_with(|| {
        debug!(ty = %ty.name, %id, "caching new entity");
        Entity::new(Arc::clone(&ty), Arc::clone(&self.ctx), Some(id))
      })
      .clone();

    Ok(entity)
  }

  /// A fresh entity with no id, for create-then-save flows. Never entered
  /// into the identity cache.
  pub fn detached(&self, type_name: &str) -> Result<Arc<Entity>> {
    let ty = self.lookup(type_name)?;
    Ok(Entity::new(ty, Arc::clone(&self.ctx), None))
  }

  /// Create the local table for every registered type, idempotently.
  ///
  /// Must complete before any entity load consults the local store; the
  /// ordering is the caller's responsibility, not enforced here.
  pub fn sync_schema(&self) -> Result<()> {
    let tables: Vec<&str> = self
      .types
      .values()
      .map(|ty| ty.resource_local.as_str())
      .collect();

    self.ctx.store.ensure_schema(&tables)
  }

  fn lookup(&self, type_name: &str) -> Result<Arc<EntityType>> {
    self
      .types
      .get(type_name)
      .cloned()
      .ok_or_else(|| eyre!("Entity type not registered: {}", type_name))
  }

  fn cache_lock(&self) -> MutexGuard<'_, IdentityCache> {
    self.cache.lock().unwrap_or_else(|e| e.into_inner())
  }
}
