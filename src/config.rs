//! Service configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! Every knob has a default, and unparseable values fall back to it with no
//! panic. The database target itself is not read here: it is resolved from
//! `<service>_connectionString` by `db::target`, so an absent target is a
//! steady state the supervisor handles, not a startup error.

use std::time::Duration;

use tracing::warn;

use crate::db::supervisor::ReconnectPolicy;
use crate::db::target::Role;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SERVICE: &str = "postgresql";
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
const DEFAULT_RECONNECT_JITTER_MS: u64 = 0;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP listen port.
    pub port: u16,
    /// Prefix of the `<service>_connectionString` variable.
    pub service: String,
    /// Which side of the cluster to talk to.
    pub role: Role,
    /// Delay policy for rebuilding a failed handle.
    pub reconnect: ReconnectPolicy,
    /// Handshake timeout used when the connection string sets none.
    pub connect_timeout: Duration,
    /// Apply embedded migrations at startup.
    pub run_migrations: bool,
    /// Upper bound on draining in-flight responses at shutdown.
    pub shutdown_grace: Duration,
}

impl AppConfig {
    /// Build the config from the process environment.
    ///
    /// - `PORT`: default 3000
    /// - `DB_SERVICE`: default `postgresql`
    /// - `DB_ROLE`: `primary` (default) or `read-replica`
    /// - `RECONNECT_DELAY_MS`: default 1000, floored at 10
    /// - `RECONNECT_JITTER_MS`: default 0
    /// - `DB_CONNECT_TIMEOUT_SECS`: default 10
    /// - `DB_RUN_MIGRATIONS`: default true
    /// - `SHUTDOWN_GRACE_SECS`: default 30
    #[must_use]
    pub fn from_env() -> Self {
        let service = std::env::var("DB_SERVICE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE.to_string());

        let role = match std::env::var("DB_ROLE") {
            Ok(raw) => Role::parse(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "unknown DB_ROLE; falling back to primary");
                Role::Primary
            }),
            Err(_) => Role::Primary,
        };

        let reconnect = ReconnectPolicy::new(
            Duration::from_millis(env_parse("RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS)),
            Duration::from_millis(env_parse("RECONNECT_JITTER_MS", DEFAULT_RECONNECT_JITTER_MS)),
        );

        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            service,
            role,
            reconnect,
            connect_timeout: Duration::from_secs(env_parse("DB_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)),
            run_migrations: env_parse("DB_RUN_MIGRATIONS", true),
            shutdown_grace: Duration::from_secs(env_parse("SHUTDOWN_GRACE_SECS", DEFAULT_SHUTDOWN_GRACE_SECS)),
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
