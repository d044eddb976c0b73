//! HTTP client for the Dynatrace environment and platform APIs.

use std::fmt;
use std::str::FromStr;

use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client as HttpClient, Method};
use serde_json::Value;

use crate::auth::TokenProvider;
use crate::config::{AuthMethod, Config, Credential, Dialect, Environment};
use crate::endpoint::{self, Operation};
use crate::error::{Error, HttpError, Result};
use crate::helpers::{escape_dql, Timeframe};
use crate::query::PollPolicy;
use crate::transport::TransportOptions;

const EXCERPT_LEN: usize = 100;

/// Event types requested by [`Client::list_events`] when none are given.
pub const DEFAULT_EVENT_TYPES: [&str; 4] = [
    "LOG_EVENT",
    "ERROR_EVENT",
    "CUSTOM_ANNOTATION",
    "AVAILABILITY_EVENT",
];

/// Default lookback of [`Client::lambda_metrics`].
pub const LAMBDA_METRICS_LOOKBACK: &str = "now-2h";
const LAMBDA_METRICS_RESOLUTION: &str = "1m";

/// AWS Lambda metrics available per function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LambdaMetric {
    Errors,
    Duration,
    Invocations,
}

impl LambdaMetric {
    pub const ALL: [LambdaMetric; 3] = [
        LambdaMetric::Errors,
        LambdaMetric::Duration,
        LambdaMetric::Invocations,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LambdaMetric::Errors => "errors",
            LambdaMetric::Duration => "duration",
            LambdaMetric::Invocations => "invocations",
        }
    }

    /// Metric selector scoped to one Lambda function entity.
    pub fn selector(self, entity_id: &str) -> String {
        format!(
            "builtin:cloud.aws.lambda.{}:filter(eq(\"dt.entity.aws_lambda_function\",\"{}\"))",
            self.name(),
            escape_dql(entity_id)
        )
    }
}

impl fmt::Display for LambdaMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LambdaMetric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        LambdaMetric::ALL
            .into_iter()
            .find(|m| m.name() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("Unknown Lambda metric: {}. Available: errors, duration, invocations", s))
    }
}

/// Authorization header material, decided once per run.
#[derive(Clone)]
pub enum Authorization {
    Bearer(String),
    ApiToken(String),
}

impl Authorization {
    pub fn method(&self) -> AuthMethod {
        match self {
            Authorization::Bearer(_) => AuthMethod::OAuth,
            Authorization::ApiToken(_) => AuthMethod::ApiToken,
        }
    }

    fn header_value(&self) -> Result<HeaderValue> {
        let value = match self {
            Authorization::Bearer(t) => format!("Bearer {}", t),
            Authorization::ApiToken(t) => format!("Api-Token {}", t),
        };
        let mut value = HeaderValue::from_str(&value)
            .map_err(|_| Error::Config("credential contains invalid header characters".into()))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// Successfully decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedResponse {
    Json(Value),
    /// Body that was not valid JSON.
    Text(String),
}

impl DecodedResponse {
    /// JSON body, or `Value::Null` for a text body.
    pub fn into_json(self) -> Value {
        match self {
            DecodedResponse::Json(v) => v,
            DecodedResponse::Text(_) => Value::Null,
        }
    }
}

/// Dynatrace API client bound to one environment and one credential.
#[derive(Clone)]
pub struct Client {
    http: HttpClient,
    base_url: String,
    dialect: Dialect,
    auth_method: AuthMethod,
    headers: HeaderMap,
    pub(crate) poll_policy: PollPolicy,
}

impl Client {
    /// Create a client with an already-decided authorization.
    pub fn new(
        environment: &Environment,
        authorization: Authorization,
        transport: &TransportOptions,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization.header_value()?);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Ok(Self {
            http: transport.build()?,
            base_url: environment.base_url.clone(),
            dialect: environment.dialect,
            auth_method: authorization.method(),
            headers,
            poll_policy: PollPolicy::default(),
        })
    }

    /// Build a client from configuration, exchanging OAuth credentials for
    /// a token when OAuth is the selected method.
    pub async fn connect(config: &Config, scopes: &[&str]) -> Result<Self> {
        let environment = config.environment()?;
        let transport = config.transport();
        let authorization = match environment.credential {
            Credential::OAuth(ref cred) => {
                info!("Using OAuth authentication ({} environment)", environment.dialect);
                let token = TokenProvider::new(&transport)?
                    .with_sso_url(config.sso_url.clone())
                    .acquire_token(cred, scopes)
                    .await?;
                Authorization::Bearer(token.access_token)
            }
            Credential::ApiToken(ref token) => {
                info!("Using API token authentication ({} environment)", environment.dialect);
                Authorization::ApiToken(token.clone())
            }
        };
        Ok(Self::new(&environment, authorization, &transport)?.with_poll_policy(config.poll_policy()))
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn auth_method(&self) -> AuthMethod {
        self.auth_method
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform one authenticated request. `path` is resolved for the
    /// client's dialect and may carry a query string.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<DecodedResponse> {
        let url = format!(
            "{}{}",
            self.base_url,
            endpoint::resolve_path(self.dialect, path)
        );
        debug!("{} {}", method, url);
        let mut req = self
            .http
            .request(method, &url)
            .headers(self.headers.clone());
        if let Some(b) = body {
            req = req
                .header(CONTENT_TYPE, "application/json")
                .json(b);
        }
        let res = req.send().await?;
        let status = res.status().as_u16();
        let text = res.text().await?;
        debug!("Response: {} ({} bytes)", status, text.len());
        classify(status, &text).map_err(Error::from)
    }

    /// Perform one request against a logical operation. `query` is
    /// appended as is and must already be encoded.
    pub async fn call(
        &self,
        method: Method,
        operation: Operation,
        query: Option<&str>,
        body: Option<&Value>,
    ) -> Result<DecodedResponse> {
        let mut path = endpoint::resolve(self.dialect, operation, None);
        if let Some(q) = query {
            path.push('?');
            path.push_str(q);
        }
        self.execute(method, &path, body).await
    }

    /// List problems, newest first.
    pub async fn list_problems(
        &self,
        page_size: u32,
        entity_selector: Option<&str>,
        from: Option<&str>,
    ) -> Result<Vec<Value>> {
        let mut query = format!("pageSize={}", page_size);
        if let Some(sel) = entity_selector {
            query.push_str(&format!("&entitySelector={}", urlencoding::encode(sel)));
        }
        if let Some(f) = from {
            query.push_str(&format!("&from={}&to=now", urlencoding::encode(f)));
        }
        let res = self
            .call(Method::GET, Operation::Problems, Some(&query), None)
            .await?
            .into_json();
        Ok(array_field(&res, "problems"))
    }

    /// List monitored entities matching `selector`.
    pub async fn list_entities(&self, selector: &str, fields: Option<&str>) -> Result<Vec<Value>> {
        let mut query = format!("entitySelector={}", urlencoding::encode(selector));
        if let Some(f) = fields {
            query.push_str(&format!("&fields={}", urlencoding::encode(f)));
        }
        let res = self
            .call(Method::GET, Operation::Entities, Some(&query), None)
            .await?
            .into_json();
        Ok(array_field(&res, "entities"))
    }

    /// Query a metric selector; returns the raw metrics document.
    pub async fn query_metrics(&self, selector: &str, resolution: &str, from: &str) -> Result<Value> {
        let query = format!(
            "metricSelector={}&resolution={}&from={}&to=now",
            urlencoding::encode(selector),
            urlencoding::encode(resolution),
            urlencoding::encode(from)
        );
        Ok(self
            .call(Method::GET, Operation::Metrics, Some(&query), None)
            .await?
            .into_json())
    }

    /// One metric series for a single Lambda function at one-minute resolution.
    pub async fn lambda_metrics(&self, entity_id: &str, metric: LambdaMetric, from: &str) -> Result<Value> {
        info!("Fetching {} metrics for {}", metric, entity_id);
        self.query_metrics(&metric.selector(entity_id), LAMBDA_METRICS_RESOLUTION, from)
            .await
    }

    /// List events inside `timeframe` (epoch milliseconds on the wire).
    pub async fn list_events(&self, timeframe: &Timeframe, event_types: &[&str]) -> Result<Vec<Value>> {
        let types = if event_types.is_empty() {
            DEFAULT_EVENT_TYPES.join(",")
        } else {
            event_types.join(",")
        };
        let query = format!(
            "from={}&to={}&eventTypes={}",
            timeframe.start_millis(),
            timeframe.end_millis(),
            urlencoding::encode(&types)
        );
        let res = self
            .call(Method::GET, Operation::Events, Some(&query), None)
            .await?
            .into_json();
        Ok(array_field(&res, "events"))
    }
}

fn array_field(v: &Value, key: &str) -> Vec<Value> {
    v.get(key)
        .and_then(|a| a.as_array())
        .cloned()
        .unwrap_or_default()
}

/// Classify a response: below 400 is success (JSON if it parses, text
/// otherwise); 400 and above becomes an [`HttpError`].
pub fn classify(status: u16, body: &str) -> std::result::Result<DecodedResponse, HttpError> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    if status < 400 {
        return Ok(match parsed {
            Some(v) => DecodedResponse::Json(v),
            None => {
                if !body.is_empty() {
                    warn!("Non-JSON response: {}", excerpt(body));
                }
                DecodedResponse::Text(body.to_string())
            }
        });
    }
    let upstream = parsed.as_ref().and_then(|v| {
        v.get("error")
            .and_then(|e| e.get("message"))
            .or_else(|| v.get("message"))
            .and_then(|m| m.as_str())
            .map(String::from)
    });
    let message = upstream.unwrap_or_else(|| canned_message(status, body));
    Err(HttpError::new(status, message, parsed))
}

fn canned_message(status: u16, body: &str) -> String {
    match status {
        401 => "Unauthorized - Check your API token or OAuth credentials".to_string(),
        403 => "Forbidden - Insufficient permissions or missing scopes".to_string(),
        404 => "Not Found - Endpoint or resource does not exist".to_string(),
        429 => "Rate Limited - Too many requests".to_string(),
        500 => "Internal Server Error".to_string(),
        _ => excerpt(body),
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(EXCERPT_LEN).collect()
}

/// Case-insensitive substring match over an item's JSON text.
pub fn match_text(items: &[Value], needle: &str) -> Vec<Value> {
    let needle = needle.to_lowercase();
    items
        .iter()
        .filter(|item| item.to_string().to_lowercase().contains(&needle))
        .cloned()
        .collect()
}
