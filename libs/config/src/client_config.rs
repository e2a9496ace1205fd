//! Client Configuration Module
//!
//! Loads data-center seeds, credentials and RPC options from a TOML file with
//! `RPCCLIENT_`-prefixed environment overrides. Nested keys use a double
//! underscore: `RPCCLIENT_RPC__FAILOVER_ATTEMPTS=5`.

use crate::defaults::ENV_PREFIX;
use crate::options::RpcOptions;
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcCredentials {
    pub user: String,
    pub token: String,
}

impl RpcCredentials {
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Seed proxy addresses per data center
    pub data_centers: BTreeMap<String, Vec<String>>,
    pub local_data_center: Option<String>,
    pub credentials: RpcCredentials,
    pub rpc: RpcOptions,
}

impl ClientConfig {
    /// Load from `path`, apply environment overrides, expand `$VARS` and validate
    pub fn load(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "Loading client configuration");

        let config = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let mut client: ClientConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        client.expand_env_vars()?;
        client.validate()?;
        Ok(client)
    }

    /// Parse inline TOML without environment overrides
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut client: ClientConfig =
            toml::from_str(text).context("Failed to parse TOML configuration")?;
        client.expand_env_vars()?;
        client.validate()?;
        Ok(client)
    }

    /// Expand environment variables in seed addresses and the token
    pub fn expand_env_vars(&mut self) -> Result<()> {
        for (name, seeds) in self.data_centers.iter_mut() {
            for seed in seeds.iter_mut() {
                let expanded = shellexpand::env(seed.as_str())
                    .with_context(|| format!("Failed to expand seed address in '{}'", name))?
                    .into_owned();
                *seed = expanded;
            }
        }
        let token = shellexpand::env(self.credentials.token.as_str())
            .context("Failed to expand credentials token")?
            .into_owned();
        self.credentials.token = token;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.rpc.validate()?;
        if let Some(local) = &self.local_data_center {
            if !self.data_centers.contains_key(local) {
                bail!("local_data_center '{}' is not a configured data center", local);
            }
        }
        for (name, seeds) in &self.data_centers {
            if seeds.is_empty() {
                debug!(data_center = %name, "Data center has no seed addresses");
            }
        }
        Ok(())
    }

    /// Data center names with the local one first, the rest in name order
    pub fn data_center_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(self.data_centers.len());
        if let Some(local) = &self.local_data_center {
            names.push(local.clone());
        }
        names.extend(
            self.data_centers
                .keys()
                .filter(|name| Some(*name) != self.local_data_center.as_ref())
                .cloned(),
        );
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
local_data_center = "sas"

[data_centers]
sas = ["sas-proxy-1:9013", "sas-proxy-2:9013"]
vla = ["vla-proxy-1:9013"]

[credentials]
user = "robot"
token = "secret"

[rpc]
failover_attempts = 4
request_ack = true
"#;

    #[test]
    fn test_from_toml_str() {
        let config = ClientConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.data_centers["sas"].len(), 2);
        assert_eq!(config.local_data_center.as_deref(), Some("sas"));
        assert_eq!(config.credentials.user, "robot");
        assert_eq!(config.rpc.failover_attempts, 4);
        assert!(config.rpc.request_ack);
        // Unset options keep their defaults
        assert_eq!(config.rpc.candidates_per_request, 3);
        assert_eq!(config.data_center_names(), vec!["sas", "vla"]);
    }

    #[test]
    fn test_load_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.toml");
        fs::write(&path, SAMPLE).unwrap();

        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.data_centers["vla"], vec!["vla-proxy-1:9013"]);
        assert_eq!(config.credentials.token, "secret");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = ClientConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to build configuration"));
    }

    #[test]
    fn test_unknown_local_data_center_rejected() {
        let text = r#"
local_data_center = "man"
[data_centers]
sas = ["a:1"]
"#;
        assert!(ClientConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn test_token_expansion() {
        std::env::set_var("RPC_CONFIG_TEST_TOKEN", "expanded");
        let text = r#"
[credentials]
user = "u"
token = "${RPC_CONFIG_TEST_TOKEN}"
"#;
        let config = ClientConfig::from_toml_str(text).unwrap();
        assert_eq!(config.credentials.token, "expanded");
    }
}
