//! Transport policy of the load generator.
//!
//! Two modes, chosen at construction: a keep-alive pool for connection
//! reuse, or short connections that close after every request. Short
//! mode relies on OS-level TIME_WAIT port reuse; nothing is tuned here.

use std::time::Duration;

use perflab_core::ConnectionMode;

/// Wall-clock budget for one request including the response body.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle connections kept per host in keep-alive mode.
pub const MAX_IDLE_PER_HOST: usize = 100;

/// How long an idle pooled connection may linger.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Builds the HTTP client for a transport mode.
pub fn build_client(mode: ConnectionMode) -> reqwest::Client {
    let builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
    let builder = match mode {
        ConnectionMode::Keepalive => builder
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT),
        ConnectionMode::Short => builder.pool_max_idle_per_host(0),
    };
    builder.build().unwrap_or_else(|_| reqwest::Client::new())
}
