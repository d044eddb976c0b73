//! Per-client transport settings.
//!
//! Certificate verification is a property of each built `reqwest::Client`,
//! never a process-wide switch.

use std::time::Duration;

use log::warn;
use reqwest::Client as HttpClient;

use crate::config::DEFAULT_TIMEOUT_MS;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
    pub user_agent: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            accept_invalid_certs: false,
            user_agent: format!("dtq/{}", crate::VERSION),
        }
    }
}

impl TransportOptions {
    pub fn build(&self) -> Result<HttpClient> {
        let mut builder = HttpClient::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone());
        if self.accept_invalid_certs {
            warn!("TLS certificate verification disabled for this client");
            builder = builder.danger_accept_invalid_certs(true);
        }
        builder
            .build()
            .map_err(|e| Error::Other(format!("failed to build HTTP client: {}", e)))
    }
}
