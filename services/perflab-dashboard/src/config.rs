use std::path::PathBuf;

use serde::Serialize;

use perflab_core::{CoreError, CoreResult};

/// Dashboard service configuration, read from environment variables.
/// The host inventory comes separately from `CONFIG_PATH`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardConfig {
    pub port: u16,
    pub storage_path: PathBuf,
    pub default_qps: u32,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            storage_path: PathBuf::from("./data/dashboard"),
            default_qps: 10,
        }
    }
}

impl DashboardConfig {
    /// Reads `PORT`, `STORAGE_PATH` and `DEFAULT_QPS`, falling back to
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when a variable is set but
    /// unparseable.
    pub fn from_env() -> CoreResult<Self> {
        let defaults = Self::default();
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| CoreError::validation(format!("invalid PORT `{raw}`")))?,
            Err(_) => defaults.port,
        };
        let storage_path = std::env::var("STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_path);
        let default_qps = match std::env::var("DEFAULT_QPS") {
            Ok(raw) => {
                let qps: u32 = raw
                    .parse()
                    .map_err(|_| CoreError::validation(format!("invalid DEFAULT_QPS `{raw}`")))?;
                if qps == 0 {
                    return Err(CoreError::validation("DEFAULT_QPS must be > 0"));
                }
                qps
            }
            Err(_) => defaults.default_qps,
        };

        Ok(Self {
            port,
            storage_path,
            default_qps,
        })
    }
}
