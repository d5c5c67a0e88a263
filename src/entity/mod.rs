//! Entity resolution state machine — the core of the three-tier protocol.
//!
//! An entity resolves its payload lazily: memory first, then the local
//! store, then the remote resource, writing remote payloads back into the
//! local store only after the caller has been notified. Depending on the
//! load mode the caller's callback runs once (lazy) or up to twice (eager:
//! local copy first, refreshed remote data second).

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::remote::RemoteSource;
use crate::store::PersistentStore;

/// The resolved payload: property name to scalar/JSON value.
pub type Fields = Map<String, Value>;

/// Opaque entity identifier, unique within its type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
  Int(i64),
  Str(String),
}

impl EntityId {
  /// Extract an id from a payload's `id` field.
  pub fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::Number(n) => n.as_i64().map(EntityId::Int),
      Value::String(s) if !s.is_empty() => Some(EntityId::Str(s.clone())),
      _ => None,
    }
  }

  fn to_value(&self) -> Value {
    match self {
      EntityId::Int(n) => Value::from(*n),
      EntityId::Str(s) => Value::from(s.clone()),
    }
  }
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EntityId::Int(n) => write!(f, "{}", n),
      EntityId::Str(s) => f.write_str(s),
    }
  }
}

impl From<i64> for EntityId {
  fn from(id: i64) -> Self {
    EntityId::Int(id)
  }
}

impl From<i32> for EntityId {
  fn from(id: i32) -> Self {
    EntityId::Int(id.into())
  }
}

impl From<&str> for EntityId {
  fn from(id: &str) -> Self {
    EntityId::Str(id.to_string())
  }
}

impl From<String> for EntityId {
  fn from(id: String) -> Self {
    EntityId::Str(id)
  }
}

/// Immutable per-type descriptor: where a type lives remotely and locally.
#[derive(Clone, Debug)]
pub struct EntityType {
  /// Type name used for registration and identity-cache keys
  pub name: String,
  /// Path segment of the remote resource
  pub resource_remote: String,
  /// Table name in the local store
  pub resource_local: String,
}

impl EntityType {
  pub fn new(
    name: impl Into<String>,
    resource_remote: impl Into<String>,
    resource_local: impl Into<String>,
  ) -> Self {
    Self {
      name: name.into(),
      resource_remote: resource_remote.into(),
      resource_local: resource_local.into(),
    }
  }
}

/// Resolution source, in priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
  /// The entity was already resolved in memory
  Memory,
  /// The payload came from the local store
  Local,
  /// The payload came from the remote resource
  Remote,
}

/// How a load treats an existing local copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadMode {
  /// Exactly one callback; a local copy is never refreshed.
  Lazy,
  /// The callback may fire twice: once with the local copy, once with
  /// refreshed remote data.
  Eager,
}

/// One delivery to a `load`/`update` callback.
#[derive(Clone, Debug)]
pub enum LoadOutcome {
  /// Fields resolved at the given tier.
  Ready { tier: Tier, fields: Fields },
  /// The remote returned an empty or id-less payload.
  Missing,
  /// The remote fetch failed. Delivered here instead of aborting the
  /// calling context.
  Failed { error: String },
}

/// Shared collaborators, passed explicitly instead of living in globals.
pub(crate) struct Context {
  pub(crate) store: Arc<dyn PersistentStore>,
  pub(crate) remote: Arc<dyn RemoteSource>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Resolution {
  Unresolved,
  /// The local store was consulted and had no row; a remote fetch decides.
  DbChecked,
  Resolved,
}

type Listener = Box<dyn FnOnce(&Arc<Entity>) + Send>;

struct EntityState {
  id: Option<EntityId>,
  fields: Fields,
  resolution: Resolution,
  locally_stored: bool,
  refreshing: bool,
  success_listeners: Vec<Listener>,
  updated_listeners: Vec<Listener>,
}

/// An identity-keyed entity that resolves its payload across the three
/// tiers. Instances are shared: the registry hands out the same `Arc` for
/// every reference to one (type, id), so concurrent loads observe the same
/// state and notifications.
pub struct Entity {
  ty: Arc<EntityType>,
  ctx: Arc<Context>,
  state: Mutex<EntityState>,
}

impl Entity {
  pub(crate) fn new(ty: Arc<EntityType>, ctx: Arc<Context>, id: Option<EntityId>) -> Arc<Self> {
    Arc::new(Self {
      ty,
      ctx,
      state: Mutex::new(EntityState {
        id,
        fields: Fields::new(),
        resolution: Resolution::Unresolved,
        locally_stored: false,
        refreshing: false,
        success_listeners: Vec::new(),
        updated_listeners: Vec::new(),
      }),
    })
  }

  // A poisoned lock only means a callback panicked mid-notification; the
  // state itself stays usable.
  fn state(&self) -> MutexGuard<'_, EntityState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn id(&self) -> Option<EntityId> {
    self.state().id.clone()
  }

  pub fn entity_type(&self) -> &EntityType {
    &self.ty
  }

  /// True once fields have been populated from any tier.
  pub fn is_loaded(&self) -> bool {
    self.state().resolution == Resolution::Resolved
  }

  /// True once a row for this id exists in the local store.
  pub fn is_locally_stored(&self) -> bool {
    self.state().locally_stored
  }

  /// True while a background remote refresh is in flight.
  pub fn is_refreshing(&self) -> bool {
    self.state().refreshing
  }

  pub fn field(&self, name: &str) -> Option<Value> {
    self.state().fields.get(name).cloned()
  }

  /// Snapshot of the current fields.
  pub fn fields(&self) -> Fields {
    self.state().fields.clone()
  }

  /// Stage a field value, e.g. before a `save` on a new entity. Does not
  /// change the resolution state.
  pub fn set_field(&self, name: impl Into<String>, value: Value) {
    self.state().fields.insert(name.into(), value);
  }

  /// Subscribe a one-shot listener for the success channel. It fires the
  /// next time this entity delivers a resolved payload, then unsubscribes.
  pub fn on_success(&self, f: impl FnOnce(&Arc<Entity>) + Send + 'static) {
    self.state().success_listeners.push(Box::new(f));
  }

  /// Subscribe a one-shot listener for the updated channel. It fires after
  /// the next explicit `update` completes, then unsubscribes.
  pub fn on_updated(&self, f: impl FnOnce(&Arc<Entity>) + Send + 'static) {
    self.state().updated_listeners.push(Box::new(f));
  }

  /// Resolve this entity, preferring memory, then the local store, then the
  /// remote resource.
  ///
  /// `on_ready` runs once or twice depending on mode and cache state:
  /// - already resolved in memory: one synchronous delivery, no I/O
  /// - local row found: one delivery; in [`LoadMode::Eager`] a remote
  ///   refresh follows and delivers a second time, strictly after the first
  /// - no local row: one delivery with the remote payload, a null-ish
  ///   [`LoadOutcome::Missing`], or a [`LoadOutcome::Failed`]
  ///
  /// Remote payloads are written back to the local store only after the
  /// callback has run; write-back failures are logged and retried on a
  /// future load.
  pub async fn load<F>(self: &Arc<Self>, mode: LoadMode, mut on_ready: F) -> Arc<Self>
  where
    F: FnMut(LoadOutcome) + Send,
  {
    // Memory tier: synchronous, before any suspension point.
    {
      let st = self.state();
      if st.resolution == Resolution::Resolved {
        let fields = st.fields.clone();
        drop(st);
        debug!(ty = %self.ty.name, "resolved from memory");
        on_ready(LoadOutcome::Ready {
          tier: Tier::Memory,
          fields,
        });
        self.fire_success();
        return Arc::clone(self);
      }
    }

    let Some(id) = self.id() else {
      warn!(ty = %self.ty.name, "load on an entity without an id");
      on_ready(LoadOutcome::Missing);
      return Arc::clone(self);
    };

    match self.read_local(&id) {
      Some(fields) => {
        let snapshot = {
          let mut st = self.state();
          st.fields = fields;
          st.locally_stored = true;
          st.resolution = Resolution::Resolved;
          st.fields.clone()
        };
        debug!(ty = %self.ty.name, id = %id, "resolved from local store");
        on_ready(LoadOutcome::Ready {
          tier: Tier::Local,
          fields: snapshot,
        });
        self.fire_success();

        if mode == LoadMode::Eager {
          self.state().refreshing = true;
          let outcome = self.fetch_remote(&id).await;
          self.state().refreshing = false;

          match outcome {
            Ok(Some(fields)) => {
              self.state().fields = fields.clone();
              debug!(ty = %self.ty.name, id = %id, "refreshed from remote");
              on_ready(LoadOutcome::Ready {
                tier: Tier::Remote,
                fields,
              });
              self.persist();
            }
            Ok(None) => on_ready(LoadOutcome::Missing),
            Err(error) => on_ready(LoadOutcome::Failed {
              error: error.to_string(),
            }),
          }
        }
      }
      None => {
        self.state().resolution = Resolution::DbChecked;

        match self.fetch_remote(&id).await {
          Ok(Some(fields)) => {
            {
              let mut st = self.state();
              st.fields = fields.clone();
              st.resolution = Resolution::Resolved;
            }
            debug!(ty = %self.ty.name, id = %id, "resolved from remote");
            on_ready(LoadOutcome::Ready {
              tier: Tier::Remote,
              fields,
            });
            self.fire_success();
            self.persist();
          }
          Ok(None) => on_ready(LoadOutcome::Missing),
          Err(error) => on_ready(LoadOutcome::Failed {
            error: error.to_string(),
          }),
        }
      }
    }

    Arc::clone(self)
  }

  /// Resolve with exactly one callback, preferring cached/local data over
  /// freshness. Shorthand for [`Entity::load`] with [`LoadMode::Lazy`].
  pub async fn lazy<F>(self: &Arc<Self>, on_ready: F) -> Arc<Self>
  where
    F: FnMut(LoadOutcome) + Send,
  {
    self.load(LoadMode::Lazy, on_ready).await
  }

  /// Force an unconditional remote re-fetch, ignoring the memory and local
  /// tiers. On success the result is persisted and the updated channel
  /// fires, after `on_ready` has run.
  pub async fn update<F>(self: &Arc<Self>, mut on_ready: F) -> Arc<Self>
  where
    F: FnMut(LoadOutcome) + Send,
  {
    let Some(id) = self.id() else {
      warn!(ty = %self.ty.name, "update on an entity without an id");
      on_ready(LoadOutcome::Missing);
      return Arc::clone(self);
    };

    self.state().refreshing = true;
    let outcome = self.fetch_remote(&id).await;
    self.state().refreshing = false;

    match outcome {
      Ok(Some(fields)) => {
        {
          let mut st = self.state();
          st.fields = fields.clone();
          st.resolution = Resolution::Resolved;
        }
        debug!(ty = %self.ty.name, id = %id, "updated from remote");
        on_ready(LoadOutcome::Ready {
          tier: Tier::Remote,
          fields,
        });
        self.persist();
        self.fire_updated();
      }
      Ok(None) => on_ready(LoadOutcome::Missing),
      Err(error) => on_ready(LoadOutcome::Failed {
        error: error.to_string(),
      }),
    }

    Arc::clone(self)
  }

  /// Push the current properties snapshot to the remote resource: a create
  /// when the entity has no id yet, else an update at the id. Orthogonal to
  /// loading: neither `locally_stored` nor the load channels are touched.
  /// A created entity adopts the id from the remote result.
  pub async fn save<F>(self: &Arc<Self>, on_complete: F) -> Arc<Self>
  where
    F: FnOnce(Result<Value>) + Send,
  {
    let props = self.properties();

    let result = match self.id() {
      Some(id) => {
        self
          .ctx
          .remote
          .update(&self.ty.resource_remote, &id, &props)
          .await
      }
      None => {
        let result = self.ctx.remote.create(&self.ty.resource_remote, &props).await;
        if let Ok(payload) = &result {
          if let Some(new_id) = payload.get("id").and_then(EntityId::from_value) {
            self.state().id.get_or_insert(new_id);
          }
        }
        result
      }
    };

    on_complete(result);
    Arc::clone(self)
  }

  /// Snapshot of the public payload for wire transmission: booleans are
  /// normalized to 1/0 and the id is included when one is known. Pure.
  pub fn properties(&self) -> Fields {
    let st = self.state();
    let mut props = Fields::new();

    for (name, value) in &st.fields {
      let value = match value {
        Value::Bool(true) => Value::from(1),
        Value::Bool(false) => Value::from(0),
        other => other.clone(),
      };
      props.insert(name.clone(), value);
    }

    if let Some(id) = &st.id {
      props.entry("id").or_insert_with(|| id.to_value());
    }

    props
  }

  /// Local-store read with fail-open semantics: any store or parse error
  /// degrades to a miss so resolution continues at the remote tier.
  fn read_local(&self, id: &EntityId) -> Option<Fields> {
    let raw = match self.ctx.store.get(&self.ty.resource_local, id) {
      Ok(row) => row?,
      Err(error) => {
        warn!(ty = %self.ty.name, id = %id, %error, "local store read failed, falling through to remote");
        return None;
      }
    };

    match serde_json::from_str::<Fields>(&raw) {
      Ok(fields) => Some(fields),
      Err(error) => {
        warn!(ty = %self.ty.name, id = %id, %error, "stored row is not valid JSON, falling through to remote");
        None
      }
    }
  }

  /// Fetch from the remote tier. `Ok(None)` means the payload had no usable
  /// id.
  async fn fetch_remote(&self, id: &EntityId) -> Result<Option<Fields>> {
    let payload = self.ctx.remote.fetch(&self.ty.resource_remote, id).await?;
    Ok(payload_fields(payload))
  }

  /// Write-back: persist the current properties snapshot. Failures are
  /// logged, not surfaced; the entity simply stays unmarked so a future
  /// load retries persistence.
  fn persist(&self) {
    let Some(id) = self.id() else { return };

    let data = match serde_json::to_string(&self.properties()) {
      Ok(data) => data,
      Err(error) => {
        warn!(ty = %self.ty.name, id = %id, %error, "could not serialize properties for write-back");
        return;
      }
    };

    let already_stored = self.state().locally_stored;
    match self
      .ctx
      .store
      .upsert(&self.ty.resource_local, &id, &data, already_stored)
    {
      Ok(()) => self.state().locally_stored = true,
      Err(error) => {
        warn!(ty = %self.ty.name, id = %id, %error, "write-back failed, will retry on a future load");
      }
    }
  }

  fn fire_success(self: &Arc<Self>) {
    let listeners = std::mem::take(&mut self.state().success_listeners);
    for listener in listeners {
      listener(self);
    }
  }

  fn fire_updated(self: &Arc<Self>) {
    let listeners = std::mem::take(&mut self.state().updated_listeners);
    for listener in listeners {
      listener(self);
    }
  }
}

/// A payload counts as a hit only when it is an object carrying an id.
fn payload_fields(payload: Value) -> Option<Fields> {
  match payload {
    Value::Object(map) if map.get("id").and_then(EntityId::from_value).is_some() => Some(map),
    _ => None,
  }
}
