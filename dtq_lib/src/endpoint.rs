//! Endpoint resolution across the Classic and Modern path conventions.
//!
//! Pure functions: the same dialect and operation always give the same path.

use crate::config::Dialect;

/// Paths starting with this prefix are already platform paths and pass through.
pub const PLATFORM_PREFIX: &str = "/platform/";
/// Conventional environment API prefix on Classic environments.
pub const CLASSIC_API_PREFIX: &str = "/api/v2";
/// Proxy prefix for the environment API on Modern environments.
pub const PLATFORM_CLASSIC_PREFIX: &str = "/platform/classic/environment-api/v2";

pub const QUERY_EXECUTE: &str = "/platform/storage/query/v1/query:execute";
pub const QUERY_POLL: &str = "/platform/storage/query/v1/query:poll";

/// Logical operations the client knows how to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Problems,
    Entities,
    Metrics,
    Events,
    QueryExecute,
    QueryPoll,
}

impl Operation {
    /// Dialect-independent path of the operation.
    pub fn logical_path(self) -> &'static str {
        match self {
            Operation::Problems => "/problems",
            Operation::Entities => "/entities",
            Operation::Metrics => "/metrics/query",
            Operation::Events => "/events",
            Operation::QueryExecute => QUERY_EXECUTE,
            Operation::QueryPoll => QUERY_POLL,
        }
    }
}

/// Resolve an operation, or an explicit path overriding it, for `dialect`.
pub fn resolve(dialect: Dialect, operation: Operation, explicit_path: Option<&str>) -> String {
    resolve_path(dialect, explicit_path.unwrap_or(operation.logical_path()))
}

/// Map a path onto the dialect's convention.
///
/// `/platform/...` passes through unchanged. `/api/...` is the conventional
/// form; anything else is relative to the v2 environment API.
pub fn resolve_path(dialect: Dialect, path: &str) -> String {
    if path.starts_with(PLATFORM_PREFIX) {
        return path.to_string();
    }
    match dialect {
        Dialect::Modern => match path.strip_prefix("/api/") {
            Some(rest) => format!("/platform/classic/environment-api/{}", rest),
            None => format!("{}{}", PLATFORM_CLASSIC_PREFIX, path),
        },
        Dialect::Classic => {
            if path.starts_with("/api/") {
                path.to_string()
            } else {
                format!("{}{}", CLASSIC_API_PREFIX, path)
            }
        }
    }
}
