//! Environment configuration: `.env.<environment>` loading, dialect
//! inference, and credential selection.
//!
//! Files are read with `dotenvy` into a map; the process environment is
//! never modified. Variables already set in the process environment win
//! over file values.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use log::{debug, warn};
use url::Url;

use crate::auth::SSO_URL;
use crate::error::{Error, Result};
use crate::helpers::mask;
use crate::query::{PollPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use crate::transport::TransportOptions;

pub const DEFAULT_ENV_DIR: &str = "env";
pub const DEFAULT_ENVIRONMENT: &str = "dev";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// API path convention used by an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// `*.live.*` environments serving `/api/v2`.
    Classic,
    /// `*.apps.*` platform environments serving `/platform/...`.
    Modern,
}

impl Dialect {
    /// Infer the dialect from the environment URL.
    pub fn infer(base_url: &str) -> Option<Self> {
        if base_url.contains(".apps.") {
            Some(Dialect::Modern)
        } else if base_url.contains(".live.") {
            Some(Dialect::Classic)
        } else {
            None
        }
    }
}

impl FromStr for Dialect {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "classic" | "live" => Ok(Dialect::Classic),
            "modern" | "platform" | "grail" | "apps" => Ok(Dialect::Modern),
            other => Err(format!("unknown dialect: {}", other)),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Classic => write!(f, "Classic"),
            Dialect::Modern => write!(f, "Modern"),
        }
    }
}

/// OAuth client-credentials pair. `Debug` redacts the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthCredential {
    pub client_id: String,
    client_secret: String,
    pub resource: Option<String>,
}

impl OAuthCredential {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        resource: Option<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            resource,
        }
    }

    pub(crate) fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

impl fmt::Debug for OAuthCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredential")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("resource", &self.resource)
            .finish()
    }
}

/// Credential material for one run.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    OAuth(OAuthCredential),
    ApiToken(String),
}

impl Credential {
    /// Pick the credential to use; OAuth wins when both are present.
    pub fn select(oauth: Option<OAuthCredential>, api_token: Option<String>) -> Result<Self> {
        match (oauth, api_token) {
            (Some(o), _) => Ok(Credential::OAuth(o)),
            (None, Some(t)) => Ok(Credential::ApiToken(t)),
            (None, None) => Err(Error::Config(
                "no credentials configured: set OAUTH_CLIENT_ID + OAUTH_CLIENT_SECRET or DT_API_TOKEN"
                    .to_string(),
            )),
        }
    }

    pub fn method(&self) -> AuthMethod {
        match self {
            Credential::OAuth(_) => AuthMethod::OAuth,
            Credential::ApiToken(_) => AuthMethod::ApiToken,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::OAuth(o) => f.debug_tuple("OAuth").field(o).finish(),
            Credential::ApiToken(_) => f.debug_tuple("ApiToken").field(&"[REDACTED]").finish(),
        }
    }
}

/// Authentication method chosen for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[serde(rename = "oauth")]
    OAuth,
    ApiToken,
}

/// Immutable description of the target environment.
#[derive(Debug, Clone)]
pub struct Environment {
    pub base_url: String,
    pub dialect: Dialect,
    pub credential: Credential,
}

impl Environment {
    pub fn new(base_url: impl Into<String>, dialect: Dialect, credential: Credential) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            dialect,
            credential,
        }
    }
}

/// Loaded configuration. Trusted by the client once validated.
#[derive(Clone)]
pub struct Config {
    pub environment: String,
    pub base_url: Option<String>,
    pub dialect: Option<Dialect>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    pub oauth_resource_urn: Option<String>,
    pub api_token: Option<String>,
    pub sso_url: String,
    pub log_level: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub poll_interval: Duration,
    pub skip_ssl_verification: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("dialect", &self.dialect)
            .field("oauth_client_id", &self.oauth_client_id)
            .field("oauth_client_secret", &self.oauth_client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("oauth_resource_urn", &self.oauth_resource_urn)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("sso_url", &self.sso_url)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("poll_interval", &self.poll_interval)
            .field("skip_ssl_verification", &self.skip_ssl_verification)
            .finish()
    }
}

/// Outcome of [`Config::validate`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct Validation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub environment_type: Option<Dialect>,
    pub auth_method: Option<AuthMethod>,
}

/// Path of the env file for `environment` inside `dir`.
pub fn env_file_path(dir: &Path, environment: &str) -> PathBuf {
    dir.join(format!(".env.{}", environment))
}

impl Config {
    /// Load `<dir>/.env.<environment>`, letting process variables override it.
    pub fn load(dir: &Path, environment: &str) -> Result<Self> {
        let path = env_file_path(dir, environment);
        if !path.exists() {
            return Err(Error::Config(format!(
                "environment file not found: {}",
                path.display()
            )));
        }
        let mut vars = HashMap::new();
        let iter = dotenvy::from_path_iter(&path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        for item in iter {
            let (key, value) = item.map_err(|e| {
                Error::Config(format!("failed to parse {}: {}", path.display(), e))
            })?;
            vars.insert(key, value);
        }
        debug!("Loaded {} variables from {}", vars.len(), path.display());
        Ok(Self::from_lookup(environment, |key| {
            std::env::var(key).ok().or_else(|| vars.get(key).cloned())
        }))
    }

    /// Build a config from a key lookup (file map, process env, or a test map).
    pub fn from_lookup(environment: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let parse_u64 = |key: &str, default: u64| {
            get(key)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default)
        };

        let dialect = get("DT_DIALECT").and_then(|d| match d.parse::<Dialect>() {
            Ok(d) => Some(d),
            Err(e) => {
                warn!("Ignoring DT_DIALECT: {}", e);
                None
            }
        });

        Self {
            environment: environment.to_string(),
            base_url: get("DT_ENVIRONMENT").map(|u| u.trim_end_matches('/').to_string()),
            dialect,
            oauth_client_id: get("OAUTH_CLIENT_ID"),
            oauth_client_secret: get("OAUTH_CLIENT_SECRET"),
            oauth_resource_urn: get("OAUTH_RESOURCE_URN"),
            api_token: get("DT_API_TOKEN").or_else(|| get("API_TOKEN")),
            sso_url: get("DT_SSO_URL").unwrap_or_else(|| SSO_URL.to_string()),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            timeout: Duration::from_millis(
                get("REQUEST_TIMEOUT")
                    .and_then(|v| v.parse::<u64>().ok())
                    .filter(|ms| *ms > 0)
                    .unwrap_or(DEFAULT_TIMEOUT_MS),
            ),
            max_retries: get("MAX_RETRIES")
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            poll_interval: Duration::from_millis(parse_u64(
                "POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL.as_millis() as u64,
            )),
            skip_ssl_verification: get("SKIP_SSL_VERIFICATION")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    fn oauth(&self) -> Option<OAuthCredential> {
        match (&self.oauth_client_id, &self.oauth_client_secret) {
            (Some(id), Some(secret)) => Some(OAuthCredential::new(
                id.clone(),
                secret.clone(),
                self.oauth_resource_urn.clone(),
            )),
            _ => None,
        }
    }

    /// Explicit dialect, else inferred from the URL, else Classic.
    pub fn resolved_dialect(&self) -> Dialect {
        self.dialect
            .or_else(|| self.base_url.as_deref().and_then(Dialect::infer))
            .unwrap_or(Dialect::Classic)
    }

    /// Credential selected for this configuration.
    pub fn credential(&self) -> Result<Credential> {
        Credential::select(self.oauth(), self.api_token.clone())
    }

    /// Build the environment descriptor. Fails before any network call
    /// when the URL or credentials are missing.
    pub fn environment(&self) -> Result<Environment> {
        let base_url = self
            .base_url
            .clone()
            .ok_or_else(|| Error::Config("DT_ENVIRONMENT is not set".to_string()))?;
        Ok(Environment::new(
            base_url,
            self.resolved_dialect(),
            self.credential()?,
        ))
    }

    pub fn transport(&self) -> TransportOptions {
        TransportOptions {
            timeout: self.timeout,
            accept_invalid_certs: self.skip_ssl_verification,
            ..TransportOptions::default()
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(self.max_retries, self.poll_interval)
    }

    /// Check format and credential requirements.
    pub fn validate(&self) -> Validation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        match self.base_url.as_deref() {
            None => errors.push("DT_ENVIRONMENT is not set".to_string()),
            Some(u) => match Url::parse(u) {
                Ok(parsed) if parsed.scheme() == "https" || parsed.scheme() == "http" => {}
                _ => errors.push(format!("Invalid DT_ENVIRONMENT format: {}", u)),
            },
        }

        let inferred = self.base_url.as_deref().and_then(Dialect::infer);
        let environment_type = self.dialect.or(inferred);
        if environment_type.is_none() && self.base_url.is_some() {
            warnings.push(
                "Environment URL format not recognized as Modern (.apps.) or Classic (.live.); using Classic"
                    .to_string(),
            );
        }

        let has_oauth = self.oauth().is_some();
        let has_token = self.api_token.is_some();
        match self.resolved_dialect() {
            Dialect::Modern if !has_oauth => {
                errors.push("OAuth credentials required for Modern environments".to_string())
            }
            Dialect::Classic if !has_oauth && !has_token => warnings
                .push("Neither OAuth nor API token configured for Classic environment".to_string()),
            _ => {}
        }
        if has_oauth && has_token {
            warnings.push("Both OAuth and API token configured - OAuth will be preferred".to_string());
        }
        if self.skip_ssl_verification {
            warnings.push("SSL certificate verification is disabled".to_string());
        }

        Validation {
            valid: errors.is_empty(),
            errors,
            warnings,
            environment_type,
            auth_method: self.credential().ok().map(|c| c.method()),
        }
    }

    /// Display lines without secrets.
    pub fn summary(&self) -> Vec<(String, String)> {
        let set = |v: &Option<String>| match v {
            Some(_) => "configured".to_string(),
            None => "not set".to_string(),
        };
        vec![
            ("Environment".into(), self.environment.clone()),
            (
                "URL".into(),
                self.base_url.clone().unwrap_or_else(|| "not set".into()),
            ),
            ("Dialect".into(), self.resolved_dialect().to_string()),
            (
                "OAuth Client".into(),
                self.oauth_client_id
                    .as_deref()
                    .map(mask)
                    .unwrap_or_else(|| "not set".into()),
            ),
            ("Resource URN".into(), set(&self.oauth_resource_urn)),
            ("API Token".into(), set(&self.api_token)),
            ("Timeout".into(), format!("{}ms", self.timeout.as_millis())),
            (
                "Polling".into(),
                format!(
                    "{} attempts every {}ms",
                    self.max_retries,
                    self.poll_interval.as_millis()
                ),
            ),
        ]
    }
}
