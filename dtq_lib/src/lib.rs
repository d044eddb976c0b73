//! Dynatrace query client library.
//!
//! Exchanges OAuth client credentials for bearer tokens, addresses Classic
//! and Modern environments, runs DQL queries through the asynchronous
//! execute/poll protocol, and normalizes their records.

pub mod analysis;
pub mod auth;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod helpers;
pub mod query;
pub mod result;
pub mod transport;

pub use analysis::{Analysis, BizEventSummary, ErrorLogCount, SearchResults};
pub use auth::{scopes, BearerToken, TokenProvider};
pub use client::{Authorization, Client, DecodedResponse, LambdaMetric};
pub use config::{AuthMethod, Config, Credential, Dialect, Environment, OAuthCredential, Validation};
pub use error::{AuthError, Error, HttpError, Result};
pub use helpers::Timeframe;
pub use query::{PollPolicy, QueryRequest, QueryState, Submission};
pub use result::ResultSet;
pub use transport::TransportOptions;

/// Library version for User-Agent and diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
