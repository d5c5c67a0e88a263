//! HTTP implementation of the remote tier.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::config::OrmConfig;
use crate::entity::{EntityId, Fields};

use super::RemoteSource;

/// REST client for the remote tier.
///
/// Wire contract: GET `{server}/{resource}/{id}` returns a JSON object with
/// at least an `id` field; a body carrying an `error` field counts as a
/// failed fetch. Saves send the properties snapshot form-encoded, with
/// configurable verbs (POST by default).
pub struct HttpRemote {
  client: reqwest::Client,
  server: Url,
  create_verb: Method,
  update_verb: Method,
}

impl HttpRemote {
  /// Create a client against a server base URL with default verbs.
  pub fn new(server: &str) -> Result<Self> {
    let server =
      Url::parse(server).map_err(|e| eyre!("Invalid server URL {}: {}", server, e))?;

    Ok(Self {
      client: reqwest::Client::new(),
      server,
      create_verb: Method::POST,
      update_verb: Method::POST,
    })
  }

  /// Create a client from registration configuration.
  pub fn from_config(config: &OrmConfig) -> Result<Self> {
    let mut remote = Self::new(&config.server)?;
    remote.create_verb = parse_verb(config.create_verb.as_deref())?;
    remote.update_verb = parse_verb(config.update_verb.as_deref())?;
    Ok(remote)
  }

  fn endpoint(&self, resource: &str, id: Option<&EntityId>) -> Result<Url> {
    let mut url = self.server.clone();
    {
      let mut segments = url
        .path_segments_mut()
        .map_err(|_| eyre!("Server URL cannot be a base: {}", self.server))?;
      segments.pop_if_empty();
      segments.push(resource);
      if let Some(id) = id {
        segments.push(&id.to_string());
      }
    }
    Ok(url)
  }

  async fn send_form(&self, method: Method, url: Url, payload: &Fields) -> Result<Value> {
    let response = self
      .client
      .request(method, url.clone())
      .form(&form_pairs(payload))
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

    let json: Value = response
      .json()
      .await
      .map_err(|e| eyre!("Invalid JSON from {}: {}", url, e))?;

    check_error(json, &url)
  }
}

#[async_trait]
impl RemoteSource for HttpRemote {
  async fn fetch(&self, resource: &str, id: &EntityId) -> Result<Value> {
    let url = self.endpoint(resource, Some(id))?;

    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

    let json: Value = response
      .json()
      .await
      .map_err(|e| eyre!("Invalid JSON from {}: {}", url, e))?;

    check_error(json, &url)
  }

  async fn create(&self, resource: &str, payload: &Fields) -> Result<Value> {
    let url = self.endpoint(resource, None)?;
    self.send_form(self.create_verb.clone(), url, payload).await
  }

  async fn update(&self, resource: &str, id: &EntityId, payload: &Fields) -> Result<Value> {
    let url = self.endpoint(resource, Some(id))?;
    self.send_form(self.update_verb.clone(), url, payload).await
  }
}

/// Reject payloads that report an application-level error.
fn check_error(json: Value, url: &Url) -> Result<Value> {
  if let Some(error) = json.get("error").and_then(Value::as_str) {
    return Err(eyre!("Remote resource error from {}: {}", url, error));
  }
  Ok(json)
}

/// Flatten a properties snapshot into form fields. Scalars go through as
/// their display form; nested values are JSON-encoded.
fn form_pairs(payload: &Fields) -> Vec<(String, String)> {
  payload
    .iter()
    .map(|(name, value)| {
      let value = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        nested => nested.to_string(),
      };
      (name.clone(), value)
    })
    .collect()
}

fn parse_verb(verb: Option<&str>) -> Result<Method> {
  match verb {
    None => Ok(Method::POST),
    Some(v) => v
      .parse::<Method>()
      .map_err(|_| eyre!("Invalid HTTP verb: {}", v)),
  }
}
