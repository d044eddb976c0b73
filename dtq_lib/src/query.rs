//! Async DQL query execution: submit, then poll until a terminal state.
//!
//! The execute endpoint either answers with records straight away or with
//! `{state: "RUNNING", requestToken}`. A running job is polled on a fixed
//! interval for at most [`PollPolicy::max_attempts`] attempts. Attempts are
//! strictly sequential. A failed poll request (transport error or non-2xx)
//! consumes its attempt and is only surfaced when it happens on the last one.

use std::time::Duration;

use log::{debug, info, warn};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;

use crate::client::{Client, DecodedResponse};
use crate::endpoint::Operation;
use crate::error::{Error, Result};
use crate::helpers::{escape_dql, Timeframe};
use crate::result::{normalize, ResultSet};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_MAX_RESULT_RECORDS: u32 = 1000;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u32 = 60;
pub const ERROR_LOG_LIMIT: u32 = 100;
pub const BIZEVENT_LIMIT: u32 = 50;
/// Join window between a log line and a business event.
pub const CORRELATION_WINDOW: &str = "5m";
/// Bucket size of the correlation summary.
pub const CORRELATION_BUCKET: &str = "1m";

/// Poll budget: attempt count and fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL)
    }
}

/// Body of `query:execute`. The timeframe is absolute by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    pub default_timeframe_start: String,
    pub default_timeframe_end: String,
    pub max_result_records: u32,
    pub fetch_timeout_seconds: u32,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, timeframe: &Timeframe) -> Self {
        Self {
            query: query.into(),
            default_timeframe_start: timeframe.start_iso(),
            default_timeframe_end: timeframe.end_iso(),
            max_result_records: DEFAULT_MAX_RESULT_RECORDS,
            fetch_timeout_seconds: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.max_result_records = limit;
        self
    }

    pub fn with_fetch_timeout(mut self, seconds: u32) -> Self {
        self.fetch_timeout_seconds = seconds;
        self
    }

    /// `fetch logs | filter <filter> | limit <limit>`
    pub fn logs(filter: &str, timeframe: &Timeframe, limit: u32) -> Self {
        Self::new(
            format!("fetch logs | filter {} | limit {}", filter, limit),
            timeframe,
        )
        .with_limit(limit)
    }

    /// ERROR-level logs mentioning `name`.
    pub fn error_logs(name: &str, timeframe: &Timeframe) -> Self {
        Self::new(
            format!(
                "fetch logs | filter content.level == \"ERROR\" and matchesPhrase(content, \"{}\") | limit {}",
                escape_dql(name),
                ERROR_LOG_LIMIT
            ),
            timeframe,
        )
        .with_limit(ERROR_LOG_LIMIT)
    }

    /// Business events whose content contains `phrase`, newest first.
    pub fn business_events(phrase: &str, timeframe: &Timeframe) -> Self {
        Self::new(
            format!(
                "fetch bizevents | filter matchesPhrase(toString(content), \"{}\") | sort timestamp desc | limit {}",
                escape_dql(phrase),
                BIZEVENT_LIMIT
            ),
            timeframe,
        )
    }

    /// Logs mentioning `phrase` joined with business events nearby in time,
    /// summarized per minute: log count, event count and summed `total`.
    pub fn correlation(phrase: &str, timeframe: &Timeframe) -> Self {
        Self::new(
            format!(
                "fetch logs, bizevents \
                 | filter matchesPhrase(content, \"{}\") \
                 | join (fetch bizevents), on: timestamp within {} \
                 | summarize logCount = count(logs), bizEventCount = count(bizevents), \
                 businessImpact = sum(bizevents.total) by bin(timestamp, {}) \
                 | sort timestamp desc",
                escape_dql(phrase),
                CORRELATION_WINDOW,
                CORRELATION_BUCKET
            ),
            timeframe,
        )
    }
}

/// Reported state of a query job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState {
    Running,
    Succeeded,
    Failed,
    Other(String),
}

impl From<Option<&str>> for QueryState {
    fn from(s: Option<&str>) -> Self {
        match s {
            Some("RUNNING") => QueryState::Running,
            Some("SUCCEEDED") => QueryState::Succeeded,
            Some("FAILED") => QueryState::Failed,
            Some(other) => QueryState::Other(other.to_string()),
            None => QueryState::Other("<missing>".to_string()),
        }
    }
}

/// What the execute endpoint told us.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Terminal right away; records may be empty.
    Completed(ResultSet),
    Running { request_token: String },
}

impl Submission {
    fn from_response(response: &DecodedResponse) -> Self {
        let immediate = ResultSet::from(response);
        let DecodedResponse::Json(body) = response else {
            return Submission::Completed(immediate);
        };
        if !immediate.is_empty() {
            return Submission::Completed(immediate);
        }
        let state = QueryState::from(body.get("state").and_then(|s| s.as_str()));
        match body.get("requestToken").and_then(|t| t.as_str()) {
            Some(token) if state == QueryState::Running => Submission::Running {
                request_token: token.to_string(),
            },
            _ => Submission::Completed(immediate),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    state: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl PollResponse {
    fn error_message(&self) -> String {
        self.error
            .as_ref()
            .and_then(|e| {
                e.get("message")
                    .and_then(|m| m.as_str())
                    .map(String::from)
                    .or_else(|| e.as_str().map(String::from))
            })
            .unwrap_or_else(|| "Unknown error".to_string())
    }
}

impl Client {
    /// Submit `request` and wait for its records.
    pub async fn execute_query(&self, request: &QueryRequest) -> Result<ResultSet> {
        info!("Executing DQL query: {}", request.query);
        debug!(
            "Timeframe: {} to {}",
            request.default_timeframe_start, request.default_timeframe_end
        );
        match self.submit_query(request).await? {
            Submission::Completed(rs) => {
                info!("Query returned {} records", rs.count);
                Ok(rs)
            }
            Submission::Running { request_token } => {
                info!("Query is running, polling for results");
                self.poll_query(&request_token).await
            }
        }
    }

    /// Send the execute request and interpret the immediate answer.
    pub async fn submit_query(&self, request: &QueryRequest) -> Result<Submission> {
        let body = serde_json::to_value(request)
            .map_err(|e| Error::Other(format!("failed to encode query: {}", e)))?;
        let response = self
            .call(Method::POST, Operation::QueryExecute, None, Some(&body))
            .await?;
        Ok(Submission::from_response(&response))
    }

    /// Poll a running job until it succeeds, fails, or the budget runs out.
    pub async fn poll_query(&self, request_token: &str) -> Result<ResultSet> {
        let policy = self.poll_policy;
        let query = format!("request-token={}", urlencoding::encode(request_token));
        let token_head: String = request_token.chars().take(10).collect();
        debug!("Polling with token {}...", token_head);

        for attempt in 1..=policy.max_attempts {
            if attempt > 1 {
                sleep(policy.interval).await;
            }
            debug!("Poll attempt {}/{}", attempt, policy.max_attempts);

            let response = match self
                .call(Method::GET, Operation::QueryPoll, Some(&query), None)
                .await
            {
                Ok(DecodedResponse::Json(v)) => v,
                Ok(DecodedResponse::Text(_)) => {
                    warn!("Unexpected non-JSON poll response (attempt {}/{})", attempt, policy.max_attempts);
                    continue;
                }
                Err(e) if attempt == policy.max_attempts => return Err(e),
                Err(e) => {
                    warn!("Poll attempt {} failed: {}", attempt, e);
                    continue;
                }
            };

            let poll: PollResponse = match serde_json::from_value(response) {
                Ok(p) => p,
                Err(e) => {
                    warn!("Unexpected poll response shape: {}", e);
                    continue;
                }
            };
            match QueryState::from(poll.state.as_deref()) {
                QueryState::Succeeded => {
                    let rs = poll
                        .result
                        .as_ref()
                        .map(normalize)
                        .unwrap_or_default();
                    info!("Query completed with {} records", rs.count);
                    return Ok(rs);
                }
                QueryState::Failed => {
                    let message = poll.error_message();
                    warn!("Query failed: {}", message);
                    return Err(Error::QueryFailed { message });
                }
                QueryState::Running => {
                    debug!(
                        "Query still running (attempt {}/{})",
                        attempt, policy.max_attempts
                    );
                }
                QueryState::Other(state) => {
                    warn!(
                        "Unexpected query state '{}' (attempt {}/{})",
                        state, attempt, policy.max_attempts
                    );
                }
            }
        }

        Err(Error::QueryTimedOut {
            attempts: policy.max_attempts,
        })
    }

    /// Run [`QueryRequest::logs`].
    pub async fn search_logs(&self, filter: &str, timeframe: &Timeframe, limit: u32) -> Result<ResultSet> {
        self.execute_query(&QueryRequest::logs(filter, timeframe, limit))
            .await
    }

    /// Run [`QueryRequest::correlation`].
    pub async fn correlate(&self, phrase: &str, timeframe: &Timeframe) -> Result<ResultSet> {
        info!("Correlating logs with business events for '{}'", phrase);
        self.execute_query(&QueryRequest::correlation(phrase, timeframe))
            .await
    }

    /// Run [`QueryRequest::error_logs`].
    pub async fn error_logs(&self, name: &str, timeframe: &Timeframe) -> Result<ResultSet> {
        self.execute_query(&QueryRequest::error_logs(name, timeframe))
            .await
    }

    /// Run [`QueryRequest::business_events`].
    pub async fn search_business_events(&self, phrase: &str, timeframe: &Timeframe) -> Result<ResultSet> {
        self.execute_query(&QueryRequest::business_events(phrase, timeframe))
            .await
    }
}
