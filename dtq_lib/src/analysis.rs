//! Derived views over query results: error ranking and business-event analytics.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;

use log::{info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::client::{match_text, Client};
use crate::error::Result;
use crate::helpers::Timeframe;
use crate::query::QueryRequest;
use crate::result::ResultSet;

/// Entities enriched per ranking run unless told otherwise.
pub const DEFAULT_ENRICHMENT_LIMIT: usize = 5;
pub const ERROR_LOG_LOOKBACK_HOURS: i64 = 24;
pub const ANALYTICS_LOOKBACK_HOURS: i64 = 24;
/// Problems fetched by [`Client::search_all`] before filtering.
pub const SEARCH_PAGE_SIZE: u32 = 50;
const LAMBDA_SELECTOR: &str = "type(AWS_LAMBDA_FUNCTION)";
const SERVICE_SELECTOR: &str = "type(SERVICE)";

/// Error-log count for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorLogCount {
    pub name: String,
    pub entity_id: String,
    pub error_count: usize,
}

impl Client {
    /// Count ERROR logs for the first `limit` entities, one query at a time,
    /// and return them ordered by count, highest first.
    ///
    /// A failed query for one entity is logged and counted as zero.
    pub async fn rank_error_logs(
        &self,
        entities: &[Value],
        limit: usize,
        timeframe: &Timeframe,
    ) -> Vec<ErrorLogCount> {
        let mut counts = Vec::new();
        for entity in entities.iter().take(limit) {
            let name = string_field(entity, "displayName");
            let entity_id = string_field(entity, "entityId");
            let error_count = match self.error_logs(&name, timeframe).await {
                Ok(rs) => rs.count,
                Err(e) => {
                    warn!("Error log query for {} failed: {}", name, e);
                    0
                }
            };
            info!("{}: {} ERROR logs", name, error_count);
            counts.push(ErrorLogCount {
                name,
                entity_id,
                error_count,
            });
        }
        counts.sort_by(|a, b| b.error_count.cmp(&a.error_count));
        counts
    }

    /// Search every source for `query`, one after another.
    ///
    /// Problems and events are fetched and filtered client-side. A source
    /// that fails is logged and contributes nothing. Business impact is the
    /// sum of `total` over the matching business events.
    pub async fn search_all(&self, query: &str, timeframe: &Timeframe) -> SearchResults {
        info!("Searching all sources for '{}'", query);
        let problems = or_empty("problems", self.list_problems(SEARCH_PAGE_SIZE, None, None)).await;
        let events = or_empty("events", self.list_events(timeframe, &[])).await;
        let lambdas = or_empty("lambda entities", self.list_entities(LAMBDA_SELECTOR, None)).await;
        let services = or_empty("service entities", self.list_entities(SERVICE_SELECTOR, None)).await;
        let business_events = or_empty(
            "business events",
            self.search_business_events(query, timeframe),
        )
        .await;
        let correlation = or_empty("correlation", self.correlate(query, timeframe)).await;

        let business_impact = BizEventSummary::from_records(&business_events.records).revenue;
        SearchResults {
            query: query.to_string(),
            problems: ResultSet::new(match_text(&problems, query)),
            events: ResultSet::new(match_text(&events, query)),
            lambdas: ResultSet::new(lambdas),
            services: ResultSet::new(services),
            business_events,
            correlation,
            business_impact,
        }
    }

    /// Run one of the predefined analytics queries.
    pub async fn run_analysis(&self, analysis: Analysis, timeframe: &Timeframe) -> Result<ResultSet> {
        info!("Running analytics: {}", analysis);
        self.execute_query(&QueryRequest::new(analysis.query(), timeframe))
            .await
    }
}

async fn or_empty<T: Default>(source: &str, pending: impl Future<Output = Result<T>>) -> T {
    match pending.await {
        Ok(v) => v,
        Err(e) => {
            warn!("Search source {} failed: {}", source, e);
            T::default()
        }
    }
}

fn string_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|s| s.as_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Everything [`Client::search_all`] found.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub problems: ResultSet,
    pub events: ResultSet,
    pub lambdas: ResultSet,
    pub services: ResultSet,
    pub business_events: ResultSet,
    pub correlation: ResultSet,
    pub business_impact: f64,
}

/// Client-side rollup of business-event records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BizEventSummary {
    pub total: usize,
    pub by_event_type: BTreeMap<String, usize>,
    pub by_payment_type: BTreeMap<String, usize>,
    pub revenue: f64,
}

impl BizEventSummary {
    pub fn from_records(records: &[Value]) -> Self {
        let mut summary = Self {
            total: records.len(),
            ..Self::default()
        };
        for record in records {
            if let Some(t) = record.get("event.type").and_then(|v| v.as_str()) {
                *summary.by_event_type.entry(t.to_string()).or_default() += 1;
            }
            if let Some(p) = record.get("paymentType").and_then(|v| v.as_str()) {
                *summary.by_payment_type.entry(p.to_string()).or_default() += 1;
            }
            if let Some(total) = record.get("total").and_then(|v| v.as_f64()) {
                summary.revenue += total;
            }
        }
        summary
    }
}

/// Predefined business analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analysis {
    EventsSummary,
    PaymentAnalysis,
    CustomerBehavior,
    RevenueTimeseries,
}

impl Analysis {
    pub const ALL: [Analysis; 4] = [
        Analysis::EventsSummary,
        Analysis::PaymentAnalysis,
        Analysis::CustomerBehavior,
        Analysis::RevenueTimeseries,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Analysis::EventsSummary => "events-summary",
            Analysis::PaymentAnalysis => "payment-analysis",
            Analysis::CustomerBehavior => "customer-behavior",
            Analysis::RevenueTimeseries => "revenue-timeseries",
        }
    }

    pub fn query(self) -> &'static str {
        match self {
            Analysis::EventsSummary => {
                "fetch bizevents \
                 | summarize count = count(), distinctEvents = countDistinct(dt.event.id), \
                 avgTotal = avg(total), maxTotal = max(total), by: {event.type} \
                 | sort count desc"
            }
            Analysis::PaymentAnalysis => {
                "fetch bizevents \
                 | filter isNotNull(paymentType) \
                 | summarize totalRevenue = sum(total), transactionCount = count(), \
                 avgTransactionValue = avg(total), by: {paymentType} \
                 | sort totalRevenue desc"
            }
            Analysis::CustomerBehavior => {
                "fetch bizevents \
                 | filter isNotNull(customer) \
                 | summarize orderCount = count(), totalSpent = sum(total), \
                 avgOrderValue = avg(total), by: {customer = toString(customer)} \
                 | sort totalSpent desc \
                 | limit 20"
            }
            Analysis::RevenueTimeseries => {
                "fetch bizevents \
                 | filter total > 0 \
                 | makeTimeseries revenue = sum(total), transactions = count()"
            }
        }
    }
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Analysis {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Analysis::ALL
            .into_iter()
            .find(|a| a.name() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| {
                let names: Vec<&str> = Analysis::ALL.iter().map(|a| a.name()).collect();
                format!("Unknown analysis type: {}. Available: {}", s, names.join(", "))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::test_client;
    use crate::config::Dialect;
    use crate::endpoint::QUERY_EXECUTE;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn records(n: usize) -> Value {
        let records: Vec<Value> = (0..n).map(|i| json!({"content": format!("ERROR boom {}", i)})).collect();
        json!({ "records": records })
    }

    #[tokio::test]
    async fn ranks_first_entities_sequentially() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(QUERY_EXECUTE))
            .and(body_string_contains("alpha-fn"))
            .respond_with(ResponseTemplate::new(200).set_body_json(records(1)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(QUERY_EXECUTE))
            .and(body_string_contains("beta-fn"))
            .respond_with(ResponseTemplate::new(200).set_body_json(records(4)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(QUERY_EXECUTE))
            .and(body_string_contains("gamma-fn"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(QUERY_EXECUTE))
            .and(body_string_contains("delta-fn"))
            .respond_with(ResponseTemplate::new(200).set_body_json(records(9)))
            .expect(0)
            .mount(&server)
            .await;

        let entities = vec![
            json!({"displayName": "alpha-fn", "entityId": "AWS_LAMBDA_FUNCTION-1"}),
            json!({"displayName": "beta-fn", "entityId": "AWS_LAMBDA_FUNCTION-2"}),
            json!({"displayName": "gamma-fn", "entityId": "AWS_LAMBDA_FUNCTION-3"}),
            json!({"displayName": "delta-fn", "entityId": "AWS_LAMBDA_FUNCTION-4"}),
        ];
        let tf = Timeframe::last(chrono::Duration::hours(ERROR_LOG_LOOKBACK_HOURS));
        let ranked = test_client(&server.uri(), Dialect::Modern)
            .rank_error_logs(&entities, 3, &tf)
            .await;

        let names: Vec<&str> = ranked.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["beta-fn", "alpha-fn", "gamma-fn"]);
        assert_eq!(ranked[0].error_count, 4);
        assert_eq!(ranked[0].entity_id, "AWS_LAMBDA_FUNCTION-2");
        assert_eq!(ranked[2].error_count, 0);
    }

    #[tokio::test]
    async fn runs_predefined_analysis() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(QUERY_EXECUTE))
            .and(body_string_contains("totalRevenue"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "records": [{"paymentType": "paypal", "totalRevenue": 89.5}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tf = Timeframe::last(chrono::Duration::hours(ANALYTICS_LOOKBACK_HOURS));
        let rs = test_client(&server.uri(), Dialect::Modern)
            .run_analysis(Analysis::PaymentAnalysis, &tf)
            .await
            .unwrap();
        assert_eq!(rs.count, 1);
    }

    #[tokio::test]
    async fn search_all_gathers_every_source() {
        const PROXY: &str = "/platform/classic/environment-api/v2";
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/problems", PROXY)))
            .and(query_param("pageSize", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "problems": [
                    {"displayId": "P-1", "title": "Checkout latency"},
                    {"displayId": "P-2", "title": "Database down"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/events", PROXY)))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/entities", PROXY)))
            .and(query_param("entitySelector", "type(AWS_LAMBDA_FUNCTION)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entities": [{"entityId": "AWS_LAMBDA_FUNCTION-1"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/entities", PROXY)))
            .and(query_param("entitySelector", "type(SERVICE)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entities": [{"entityId": "SERVICE-1"}, {"entityId": "SERVICE-2"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(QUERY_EXECUTE))
            .and(body_string_contains("fetch bizevents | filter"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "records": [{"total": 10.5}, {"total": 4.5}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(QUERY_EXECUTE))
            .and(body_string_contains("join (fetch bizevents)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "records": [{"logCount": 3, "bizEventCount": 2, "businessImpact": 15.0}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tf = Timeframe::last(chrono::Duration::hours(1));
        let found = test_client(&server.uri(), Dialect::Modern)
            .search_all("checkout", &tf)
            .await;

        assert_eq!(found.query, "checkout");
        assert_eq!(found.problems.count, 1);
        assert_eq!(found.problems.records[0]["displayId"], "P-1");
        assert!(found.events.is_empty());
        assert_eq!(found.lambdas.count, 1);
        assert_eq!(found.services.count, 2);
        assert_eq!(found.business_events.count, 2);
        assert_eq!(found.correlation.count, 1);
        assert!((found.business_impact - 15.0).abs() < 1e-9);
    }

    #[test]
    fn summarizes_business_events() {
        let records = vec![
            json!({"event.type": "com.shop.order.completed", "paymentType": "credit_card", "total": 156.99}),
            json!({"event.type": "com.shop.order.completed", "paymentType": "paypal", "total": 89.5}),
            json!({"event.type": "com.shop.cart.viewed"}),
        ];
        let s = BizEventSummary::from_records(&records);
        assert_eq!(s.total, 3);
        assert_eq!(s.by_event_type["com.shop.order.completed"], 2);
        assert_eq!(s.by_payment_type.len(), 2);
        assert!((s.revenue - 246.49).abs() < 1e-9);
        assert_eq!(BizEventSummary::from_records(&[]), BizEventSummary::default());
    }

    #[test]
    fn parses_analysis_names() {
        assert_eq!("payment-analysis".parse::<Analysis>().unwrap(), Analysis::PaymentAnalysis);
        assert_eq!("Revenue-Timeseries".parse::<Analysis>().unwrap(), Analysis::RevenueTimeseries);
        let err = "nope".parse::<Analysis>().unwrap_err();
        assert!(err.contains("events-summary"));
        for a in Analysis::ALL {
            assert!(a.query().starts_with("fetch bizevents"));
            assert_eq!(a.to_string().parse::<Analysis>().unwrap(), a);
        }
    }
}
