//! OAuth client-credentials token exchange.
//!
//! One attempt per call, no caching: every run fetches a fresh token.

use std::fmt;

use log::{debug, info};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client as HttpClient;
use serde::Deserialize;

use crate::config::OAuthCredential;
use crate::error::{AuthError, Error, Result};
use crate::transport::TransportOptions;

pub const SSO_URL: &str = "https://sso.dynatrace.com";
pub const TOKEN_PATH: &str = "/sso/oauth2/token";

/// Scope names and per-operation scope sets.
pub mod scopes {
    pub const STORAGE_LOGS_READ: &str = "storage:logs:read";
    pub const STORAGE_EVENTS_READ: &str = "storage:events:read";
    pub const STORAGE_METRICS_READ: &str = "storage:metrics:read";
    pub const STORAGE_ENTITIES_READ: &str = "storage:entities:read";
    pub const STORAGE_BIZEVENTS_READ: &str = "storage:bizevents:read";
    pub const STORAGE_BUCKETS_READ: &str = "storage:buckets:read";
    pub const PROBLEMS_READ: &str = "environment-api:problems:read";
    pub const ENTITIES_READ: &str = "environment-api:entities:read";
    pub const EVENTS_READ: &str = "environment-api:events:read";
    pub const METRICS_READ: &str = "environment-api:metrics:read";

    /// DQL queries over logs, events, metrics, entities and business events.
    pub const QUERY: &[&str] = &[
        STORAGE_LOGS_READ,
        STORAGE_EVENTS_READ,
        STORAGE_METRICS_READ,
        STORAGE_ENTITIES_READ,
        STORAGE_BIZEVENTS_READ,
        STORAGE_BUCKETS_READ,
    ];

    /// Conventional environment API reads.
    pub const CLASSIC: &[&str] = &[PROBLEMS_READ, ENTITIES_READ, EVENTS_READ, METRICS_READ];

    /// Business analytics: business events plus the data they join with.
    pub const BIZEVENTS: &[&str] = &[
        STORAGE_BIZEVENTS_READ,
        STORAGE_BUCKETS_READ,
        STORAGE_LOGS_READ,
        STORAGE_EVENTS_READ,
    ];

    /// Everything the CLI may touch in one run.
    pub fn all() -> Vec<&'static str> {
        let mut all: Vec<&'static str> = QUERY.iter().chain(CLASSIC.iter()).copied().collect();
        all.dedup();
        all
    }
}

/// Short-lived bearer token. `Debug` redacts the token.
#[derive(Clone)]
pub struct BearerToken {
    pub access_token: String,
    pub expires_in: u64,
    pub scope: Option<String>,
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
}

/// Exchanges client credentials for a bearer token.
#[derive(Clone)]
pub struct TokenProvider {
    http: HttpClient,
    sso_url: String,
}

impl TokenProvider {
    pub fn new(transport: &TransportOptions) -> Result<Self> {
        Ok(Self {
            http: transport.build()?,
            sso_url: SSO_URL.to_string(),
        })
    }

    /// Point at a different identity host (tests, sovereign regions).
    pub fn with_sso_url(mut self, sso_url: impl Into<String>) -> Self {
        self.sso_url = sso_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Run a single `client_credentials` exchange for `scopes`.
    pub async fn acquire_token(
        &self,
        credential: &OAuthCredential,
        scopes: &[&str],
    ) -> Result<BearerToken> {
        let scope = scopes.join(" ");
        let mut params = vec![
            ("grant_type", "client_credentials"),
            ("client_id", credential.client_id.as_str()),
            ("client_secret", credential.client_secret()),
            ("scope", scope.as_str()),
        ];
        if let Some(ref resource) = credential.resource {
            params.push(("resource", resource.as_str()));
        }
        let body = serde_urlencoded::to_string(&params)
            .map_err(|e| Error::Other(format!("failed to encode token request: {}", e)))?;

        let url = format!("{}{}", self.sso_url, TOKEN_PATH);
        debug!("POST {} (scopes: {})", url, scope);
        let res = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| AuthError::new(format!("OAuth request failed: {}", e), None, None))?;

        let status = res.status();
        let text = res.text().await.map_err(|e| {
            AuthError::new(
                format!("OAuth response unreadable: {}", e),
                Some(status.as_u16()),
                None,
            )
        })?;

        if !status.is_success() {
            return Err(AuthError::new(
                format!("OAuth failed: {} - {}", status.as_u16(), text),
                Some(status.as_u16()),
                Some(text),
            )
            .into());
        }

        let parsed: Option<TokenResponse> = serde_json::from_str(&text).ok();
        let Some(TokenResponse {
            access_token: Some(access_token),
            expires_in,
            scope,
        }) = parsed
        else {
            return Err(AuthError::new(
                "OAuth response missing access_token",
                Some(status.as_u16()),
                Some(text),
            )
            .into());
        };

        let token = BearerToken {
            access_token,
            expires_in: expires_in.unwrap_or(0),
            scope,
        };
        info!("OAuth token obtained (expires in {}s)", token.expires_in);
        if let Some(ref s) = token.scope {
            debug!("Granted scopes: {}", s);
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> TokenProvider {
        TokenProvider::new(&TransportOptions::default())
            .unwrap()
            .with_sso_url(server.uri())
    }

    #[tokio::test]
    async fn acquires_token_with_form_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=dt0s02.abc"))
            .and(body_string_contains("scope=storage%3Alogs%3Aread+storage%3Aevents%3Aread"))
            .and(body_string_contains("resource=urn%3Adtaccount%3A123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "eyJ.token",
                "expires_in": 300,
                "scope": "storage:logs:read storage:events:read"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cred = OAuthCredential::new("dt0s02.abc", "s3cret", Some("urn:dtaccount:123".into()));
        let token = provider(&server)
            .acquire_token(&cred, &[scopes::STORAGE_LOGS_READ, scopes::STORAGE_EVENTS_READ])
            .await
            .unwrap();
        assert_eq!(token.access_token, "eyJ.token");
        assert_eq!(token.expires_in, 300);
        assert!(!format!("{:?}", token).contains("eyJ"));
    }

    #[tokio::test]
    async fn omits_resource_when_absent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "t", "expires_in": 60})),
            )
            .mount(&server)
            .await;

        let cred = OAuthCredential::new("id", "secret", None);
        provider(&server).acquire_token(&cred, scopes::QUERY).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        assert!(!body.contains("resource="));
    }

    #[tokio::test]
    async fn non_success_status_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_client"}"#))
            .mount(&server)
            .await;

        let cred = OAuthCredential::new("id", "bad", None);
        let err = provider(&server).acquire_token(&cred, scopes::QUERY).await.unwrap_err();
        match err {
            Error::Auth(e) => {
                assert_eq!(e.status_code, Some(400));
                assert!(e.body.unwrap().contains("invalid_client"));
            }
            other => panic!("expected auth error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_access_token_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"expires_in": 60})))
            .mount(&server)
            .await;

        let cred = OAuthCredential::new("id", "secret", None);
        let err = provider(&server).acquire_token(&cred, scopes::QUERY).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(err.to_string().contains("access_token"));
    }

    #[test]
    fn all_scopes_cover_query_and_classic() {
        let all = scopes::all();
        assert!(all.contains(&scopes::STORAGE_BIZEVENTS_READ));
        assert!(all.contains(&scopes::PROBLEMS_READ));
    }
}
