use std::path::PathBuf;

use serde::Serialize;

use perflab_core::{CoreError, CoreResult};

/// Collector service configuration, read from environment variables.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorConfig {
    pub port: u16,
    pub storage_path: PathBuf,
    pub collection_interval_secs: u64,
    pub calculator_process_name: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            storage_path: PathBuf::from("./data/collector"),
            collection_interval_secs: 1,
            calculator_process_name: "calculator".to_string(),
        }
    }
}

impl CollectorConfig {
    /// Reads `PORT`, `STORAGE_PATH`, `COLLECTION_INTERVAL_SECS` and
    /// `CALCULATOR_PROCESS_NAME`, falling back to defaults.
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
        let collection_interval_secs = match std::env::var("COLLECTION_INTERVAL_SECS") {
            Ok(raw) => {
                let secs: u64 = raw.parse().map_err(|_| {
                    CoreError::validation(format!("invalid COLLECTION_INTERVAL_SECS `{raw}`"))
                })?;
                if secs == 0 {
                    return Err(CoreError::validation(
                        "COLLECTION_INTERVAL_SECS must be > 0",
                    ));
                }
                secs
            }
            Err(_) => defaults.collection_interval_secs,
        };
        let calculator_process_name = std::env::var("CALCULATOR_PROCESS_NAME")
            .unwrap_or(defaults.calculator_process_name);

        Ok(Self {
            port,
            storage_path,
            collection_interval_secs,
            calculator_process_name,
        })
    }
}
