//! Target resolution: `<service>_connectionString` to a connection target.
//!
//! DESIGN
//! ======
//! A target is immutable once resolved. Resolution fails closed: a missing,
//! blank, unparseable, or (for read replicas) un-rewritable connection
//! string yields `None`, never a half-valid target. The read-replica target
//! is the primary string with the primary port `5432` swapped for the
//! standby port `5433`; the rest of the string is left byte-for-byte intact.

use std::fmt;

use serde::Serialize;
use tokio_postgres::config::Host;

const CONNECTION_STRING_KEY: &str = "connectionString";
const PRIMARY_PORT: &str = "5432";
const STANDBY_PORT: &str = "5433";

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Primary,
    ReadReplica,
}

impl Role {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "primary" => Some(Self::Primary),
            "read-replica" | "read_replica" | "replica" | "standby" => Some(Self::ReadReplica),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::ReadReplica => "read-replica",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// TARGET
// =============================================================================

/// A resolved connection destination. Holds credentials, so `Debug` and
/// `Display` never print the raw connection string.
#[derive(Clone)]
pub struct Target {
    role: Role,
    connection_string: String,
    config: tokio_postgres::Config,
}

impl Target {
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Raw connection string, credentials included. Do not log.
    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    #[must_use]
    pub fn pg_config(&self) -> &tokio_postgres::Config {
        &self.config
    }

    /// `host:port/dbname` of the first configured host.
    #[must_use]
    pub fn address(&self) -> String {
        let host = match self.config.get_hosts().first() {
            Some(Host::Tcp(h)) => h.clone(),
            #[cfg(unix)]
            Some(Host::Unix(path)) => path.display().to_string(),
            None => "localhost".to_string(),
        };
        let port = self.config.get_ports().first().copied().unwrap_or(5432);
        match self.config.get_dbname() {
            Some(db) => format!("{host}:{port}/{db}"),
            None => format!("{host}:{port}"),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.config.get_user() {
            Some(user) => write!(f, "{} {user}@{}", self.role, self.address()),
            None => write!(f, "{} {}", self.role, self.address()),
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("role", &self.role)
            .field("address", &self.address())
            .field("user", &self.config.get_user())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// Environment variable holding the connection string for `service`.
#[must_use]
pub fn connection_key(service: &str) -> String {
    format!("{service}_{CONNECTION_STRING_KEY}")
}

/// Resolve a target for `service` from the process environment.
#[must_use]
pub fn resolve(service: &str, role: Role) -> Option<Target> {
    resolve_with(|key| std::env::var(key).ok(), service, role)
}

/// Resolve a target through an arbitrary key lookup. No side effects.
pub fn resolve_with<F>(lookup: F, service: &str, role: Role) -> Option<Target>
where
    F: Fn(&str) -> Option<String>,
{
    let service = service.trim();
    if service.is_empty() {
        return None;
    }

    let raw = lookup(&connection_key(service))?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let connection_string = match role {
        Role::Primary => raw.to_string(),
        Role::ReadReplica => standby_connection_string(raw)?,
    };
    let config = connection_string.parse::<tokio_postgres::Config>().ok()?;

    Some(Target { role, connection_string, config })
}

/// Rewrite every primary port marker to the standby port. Understands URL
/// (`host:5432`, host list only) and key/value (`port=5432`) forms. `None`
/// when the string carries no marker at all.
fn standby_connection_string(raw: &str) -> Option<String> {
    if let Some((start, end)) = url_host_list(raw) {
        let hosts = rewrite_port(&raw[start..end], &format!(":{PRIMARY_PORT}"), &format!(":{STANDBY_PORT}"), false)?;
        return Some(format!("{}{hosts}{}", &raw[..start], &raw[end..]));
    }
    rewrite_port(raw, &format!("port={PRIMARY_PORT}"), &format!("port={STANDBY_PORT}"), true)
}

/// Byte range of a URL's `host[:port][,host[:port]]` list: after the
/// userinfo, before the path, query, or fragment.
fn url_host_list(raw: &str) -> Option<(usize, usize)> {
    let authority_start = raw.find("://")? + "://".len();
    let authority = &raw[authority_start..];
    let authority_end = authority_start + authority.find(['/', '?', '#']).unwrap_or(authority.len());
    let hosts_start = raw[authority_start..authority_end]
        .rfind('@')
        .map_or(authority_start, |at| authority_start + at + 1);
    Some((hosts_start, authority_end))
}

fn rewrite_port(raw: &str, from: &str, to: &str, needs_word_start: bool) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    let mut rewritten = false;

    while let Some(pos) = rest.find(from) {
        let end = pos + from.len();
        // EDGE: `:54321` and `export=5432` are not port markers.
        let digit_follows = rest[end..].starts_with(|c: char| c.is_ascii_digit());
        let word_start = pos == 0 || rest[..pos].ends_with(char::is_whitespace);
        if digit_follows || (needs_word_start && !word_start) {
            out.push_str(&rest[..end]);
        } else {
            out.push_str(&rest[..pos]);
            out.push_str(to);
            rewritten = true;
        }
        rest = &rest[end..];
    }
    out.push_str(rest);

    rewritten.then_some(out)
}

#[cfg(test)]
#[path = "target_test.rs"]
mod tests;
