//! Registration configuration for a registry.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Parameters for wiring a registry to its collaborators.
///
/// Omitted fields default: verbs to POST, the store location to the
/// platform data directory.
#[derive(Debug, Clone, Deserialize)]
pub struct OrmConfig {
  /// Remote endpoint base, e.g. `https://api.droplet.la`
  pub server: String,
  /// HTTP verb used when creating entities
  #[serde(default)]
  pub create_verb: Option<String>,
  /// HTTP verb used when updating entities
  #[serde(default)]
  pub update_verb: Option<String>,
  /// Local store location
  #[serde(default)]
  pub db_path: Option<PathBuf>,
}

impl OrmConfig {
  pub fn new(server: impl Into<String>) -> Self {
    Self {
      server: server.into(),
      create_verb: None,
      update_verb: None,
      db_path: None,
    }
  }

  /// Load configuration from a YAML file.
  pub fn load(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: OrmConfig = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_defaults() {
    let config: OrmConfig = serde_yaml::from_str("server: https://api.droplet.la").unwrap();
    assert_eq!(config.server, "https://api.droplet.la");
    assert!(config.create_verb.is_none());
    assert!(config.update_verb.is_none());
    assert!(config.db_path.is_none());
  }

  #[test]
  fn test_full_config_parses() {
    let yaml = "\
server: https://api.droplet.la
create_verb: POST
update_verb: PUT
db_path: /tmp/lazyorm.db
";
    let config: OrmConfig = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.update_verb.as_deref(), Some("PUT"));
    assert_eq!(config.db_path.as_deref(), Some(Path::new("/tmp/lazyorm.db")));
  }
}
