//! Remote resource tier.
//!
//! The resolution core only ever talks to the trait below. Transport
//! concerns (retry, auth, pagination) belong to implementations, never to
//! the core.

mod http;

pub use http::HttpRemote;

use async_trait::async_trait;
use color_eyre::Result;
use serde_json::Value;

use crate::entity::{EntityId, Fields};

/// Async interface over the remote endpoint that loads fall back to and
/// saves push into.
#[async_trait]
pub trait RemoteSource: Send + Sync {
  /// Fetch the payload for a single entity.
  async fn fetch(&self, resource: &str, id: &EntityId) -> Result<Value>;

  /// Create a new entity from a properties snapshot.
  async fn create(&self, resource: &str, payload: &Fields) -> Result<Value>;

  /// Update the entity at `id` from a properties snapshot.
  async fn update(&self, resource: &str, id: &EntityId, payload: &Fields) -> Result<Value>;
}
