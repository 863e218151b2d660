//! Host inventory configuration.
//!
//! The dashboard reads a JSON config file naming the target hosts (each
//! running a calculator service and a collector service) and the single
//! client host running the requester. The path comes from `CONFIG_PATH`,
//! falling back to `./configs/config.json`; individual fields can be
//! overridden through `PERFLAB_`-prefixed environment variables.

use std::collections::HashSet;
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// A load-generation target, uniquely keyed by `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetHost {
    pub name: String,
    pub external_ip: String,
    pub internal_ip: String,
    pub cpu_service_url: String,
    pub collector_service_url: String,
}

/// The host running the load generator. Singular per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHost {
    pub name: String,
    pub external_ip: String,
    pub internal_ip: String,
    pub requester_service_url: String,
}

/// Full host inventory of one deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostsConfig {
    pub target_hosts: Vec<TargetHost>,
    pub client_host: ClientHost,
}

impl HostsConfig {
    /// Loads the inventory from `CONFIG_PATH` (default
    /// `./configs/config.json`) with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when the file is missing, malformed
    /// or fails [`HostsConfig::validate`].
    pub fn load() -> CoreResult<Self> {
        let path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "./configs/config.json".to_string());
        Self::from_file(&path)
    }

    /// Loads the inventory from a specific JSON file.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` on read, parse or validation failure.
    pub fn from_file<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref().to_string_lossy().to_string();
        let config: HostsConfig = Config::builder()
            .add_source(File::new(&path, FileFormat::Json))
            .add_source(Environment::with_prefix("PERFLAB").separator("__"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the inventory: at least one target, unique names, no
    /// empty URLs.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` describing the first violation.
    pub fn validate(&self) -> CoreResult<()> {
        if self.target_hosts.is_empty() {
            return Err(CoreError::validation(
                "target_hosts must name at least one host",
            ));
        }
        let mut seen = HashSet::new();
        for host in &self.target_hosts {
            if host.name.is_empty() {
                return Err(CoreError::validation("target host name must not be empty"));
            }
            if !seen.insert(host.name.as_str()) {
                return Err(CoreError::validation(format!(
                    "duplicate target host name `{}`",
                    host.name
                )));
            }
            if host.collector_service_url.is_empty() || host.cpu_service_url.is_empty() {
                return Err(CoreError::validation(format!(
                    "target host `{}` is missing a service URL",
                    host.name
                )));
            }
        }
        if self.client_host.requester_service_url.is_empty() {
            return Err(CoreError::validation(
                "client_host.requester_service_url must not be empty",
            ));
        }
        Ok(())
    }

    /// Looks up a target host by name.
    #[must_use]
    pub fn target(&self, name: &str) -> Option<&TargetHost> {
        self.target_hosts.iter().find(|h| h.name == name)
    }
}
