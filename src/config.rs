//! DAO configuration
//!
//! Limits and policies shared by every DAO built on the same store.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DaoError;
use crate::uri::Namespaces;

/// What a non-admin search does when it names experiments outside the
/// account's authorized set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnauthorizedExperiments {
    /// Any unauthorized experiment denies the whole search.
    #[default]
    Deny,
    /// Restrict to the authorized part of the request; deny only when nothing is left.
    Intersect,
}

/// What a non-admin search without requested experiments sees when the
/// account has no authorized experiment at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoAuthorizedExperiments {
    /// Only documents without an owning experiment.
    #[default]
    UnassignedOnly,
    /// No experiment restriction.
    Unrestricted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentAccessPolicy {
    pub unauthorized: UnauthorizedExperiments,
    pub no_authorized: NoAuthorizedExperiments,
}

/// Store-wide DAO settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaoConfig {
    /// Base URI under which generated URIs are minted.
    pub generation_prefix: String,
    /// Compact prefixes used to normalize incoming URIs.
    pub namespaces: Namespaces,
    /// Time limit applied to reads (find, count, distinct, aggregate).
    pub read_timeout_ms: u64,
    /// Upper bound of a default count.
    pub max_count_limit: u64,
    /// Number of pages a search count looks ahead.
    pub max_page_count_limit: u64,
    /// Upper bound of `skip + limit` for explicit count options.
    pub max_count_scan: u64,
    pub max_page_size: u64,
    pub transaction_max_retries: u32,
    pub uri_generation_max_attempts: u32,
    pub experiment_access: ExperimentAccessPolicy,
}

fn default_generation_prefix() -> String {
    "http://www.opensilex.org/id".to_string()
}

impl Default for DaoConfig {
    fn default() -> Self {
        Self {
            generation_prefix: default_generation_prefix(),
            namespaces: Namespaces::new(),
            read_timeout_ms: 60_000,
            max_count_limit: 10_000,
            max_page_count_limit: 10,
            max_count_scan: 1_000_000,
            max_page_size: 100_000,
            transaction_max_retries: 3,
            uri_generation_max_attempts: 100,
            experiment_access: ExperimentAccessPolicy::default(),
        }
    }
}

impl DaoConfig {
    /// Read the configuration from `NOSQL_DAO_*` environment variables,
    /// falling back to defaults for unset ones.
    ///
    /// `NOSQL_DAO_NAMESPACES` is a comma separated `prefix=base` list.
    pub fn from_env() -> Result<Self, DaoError> {
        let defaults = Self::default();
        let config = Self {
            generation_prefix: env::var("NOSQL_DAO_GENERATION_PREFIX")
                .unwrap_or(defaults.generation_prefix),
            namespaces: match env::var("NOSQL_DAO_NAMESPACES") {
                Ok(value) => parse_namespaces(&value)?,
                Err(_) => defaults.namespaces,
            },
            read_timeout_ms: env_parse("NOSQL_DAO_READ_TIMEOUT_MS", defaults.read_timeout_ms)?,
            max_count_limit: env_parse("NOSQL_DAO_MAX_COUNT_LIMIT", defaults.max_count_limit)?,
            max_page_count_limit: env_parse(
                "NOSQL_DAO_MAX_PAGE_COUNT_LIMIT",
                defaults.max_page_count_limit,
            )?,
            max_count_scan: env_parse("NOSQL_DAO_MAX_COUNT_SCAN", defaults.max_count_scan)?,
            max_page_size: env_parse("NOSQL_DAO_MAX_PAGE_SIZE", defaults.max_page_size)?,
            transaction_max_retries: env_parse(
                "NOSQL_DAO_TRANSACTION_MAX_RETRIES",
                defaults.transaction_max_retries,
            )?,
            uri_generation_max_attempts: env_parse(
                "NOSQL_DAO_URI_GENERATION_MAX_ATTEMPTS",
                defaults.uri_generation_max_attempts,
            )?,
            experiment_access: ExperimentAccessPolicy {
                unauthorized: match env::var("NOSQL_DAO_UNAUTHORIZED_EXPERIMENTS").as_deref() {
                    Ok("deny") => UnauthorizedExperiments::Deny,
                    Ok("intersect") => UnauthorizedExperiments::Intersect,
                    Ok(other) => {
                        return Err(DaoError::Config(format!(
                            "NOSQL_DAO_UNAUTHORIZED_EXPERIMENTS: unknown policy {other:?}"
                        )))
                    }
                    Err(_) => defaults.experiment_access.unauthorized,
                },
                no_authorized: match env::var("NOSQL_DAO_NO_AUTHORIZED_EXPERIMENTS").as_deref() {
                    Ok("unassigned_only") => NoAuthorizedExperiments::UnassignedOnly,
                    Ok("unrestricted") => NoAuthorizedExperiments::Unrestricted,
                    Ok(other) => {
                        return Err(DaoError::Config(format!(
                            "NOSQL_DAO_NO_AUTHORIZED_EXPERIMENTS: unknown policy {other:?}"
                        )))
                    }
                    Err(_) => defaults.experiment_access.no_authorized,
                },
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that would make every search or count fail.
    pub fn validate(&self) -> Result<(), DaoError> {
        let positive = [
            ("max_count_limit", self.max_count_limit),
            ("max_page_count_limit", self.max_page_count_limit),
            ("max_count_scan", self.max_count_scan),
            ("max_page_size", self.max_page_size),
            ("read_timeout_ms", self.read_timeout_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(DaoError::Config(format!("{name} must be greater than 0")));
            }
        }
        if self.uri_generation_max_attempts == 0 {
            return Err(DaoError::Config(
                "uri_generation_max_attempts must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, DaoError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| DaoError::Config(format!("{key}: cannot parse {value:?}"))),
        Err(_) => Ok(default),
    }
}

fn parse_namespaces(value: &str) -> Result<Namespaces, DaoError> {
    let mut namespaces = Namespaces::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (prefix, base) = entry.split_once('=').ok_or_else(|| {
            DaoError::Config(format!("NOSQL_DAO_NAMESPACES: expected prefix=base, got {entry:?}"))
        })?;
        namespaces.insert(prefix.trim(), base.trim());
    }
    Ok(namespaces)
}
