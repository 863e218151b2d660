use std::path::PathBuf;

use serde::Serialize;

use perflab_core::{ArrivalPattern, ConnectionMode, CoreError, CoreResult};

/// Requester service configuration, read from environment variables.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequesterConfig {
    pub port: u16,
    pub storage_path: PathBuf,
    pub target_ip: String,
    pub target_port: u16,
    pub default_qps: u32,
    pub arrival_pattern: ArrivalPattern,
    pub connection_mode: ConnectionMode,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            port: 80,
            storage_path: PathBuf::from("./data/requester"),
            target_ip: "127.0.0.1".to_string(),
            target_port: 80,
            default_qps: 10,
            arrival_pattern: ArrivalPattern::Uniform,
            connection_mode: ConnectionMode::Keepalive,
        }
    }
}

impl RequesterConfig {
    /// Reads `PORT`, `STORAGE_PATH`, `TARGET_IP`, `TARGET_PORT`,
    /// `DEFAULT_QPS` and `CONNECTION_MODE`, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` when a variable is set but
    /// unparseable.
    pub fn from_env() -> CoreResult<Self> {
        let defaults = Self::default();
        let port = parse_env("PORT", defaults.port)?;
        let storage_path = std::env::var("STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_path);
        let target_ip = std::env::var("TARGET_IP").unwrap_or(defaults.target_ip);
        let target_port = parse_env("TARGET_PORT", defaults.target_port)?;
        let default_qps = parse_env("DEFAULT_QPS", defaults.default_qps)?;
        if default_qps == 0 {
            return Err(CoreError::validation("DEFAULT_QPS must be > 0"));
        }
        let arrival_pattern = match std::env::var("ARRIVAL_PATTERN") {
            Ok(raw) => match raw.as_str() {
                "uniform" => ArrivalPattern::Uniform,
                "poisson" => ArrivalPattern::Poisson,
                other => {
                    return Err(CoreError::validation(format!(
                        "invalid ARRIVAL_PATTERN `{other}` (expected uniform|poisson)"
                    )))
                }
            },
            Err(_) => defaults.arrival_pattern,
        };
        let connection_mode = match std::env::var("CONNECTION_MODE") {
            Ok(raw) => match raw.as_str() {
                "keepalive" => ConnectionMode::Keepalive,
                "short" => ConnectionMode::Short,
                other => {
                    return Err(CoreError::validation(format!(
                        "invalid CONNECTION_MODE `{other}` (expected keepalive|short)"
                    )))
                }
            },
            Err(_) => defaults.connection_mode,
        };

        Ok(Self {
            port,
            storage_path,
            target_ip,
            target_port,
            default_qps,
            arrival_pattern,
            connection_mode,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> CoreResult<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| CoreError::validation(format!("invalid {name} `{raw}`"))),
        Err(_) => Ok(default),
    }
}
