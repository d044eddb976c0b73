//! Uniform result shape for immediate and polled query responses.

use serde::Serialize;
use serde_json::Value;

use crate::client::DecodedResponse;

/// Query records plus their count. `records` is never absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub records: Vec<Value>,
    pub count: usize,
}

impl ResultSet {
    pub fn new(records: Vec<Value>) -> Self {
        let count = records.len();
        Self { records, count }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Accepts `{records: [...]}` or `{result: {records: [...]}}`; anything
/// else, including a missing or non-array `records`, yields an empty set.
pub fn normalize(payload: &Value) -> ResultSet {
    let records = payload
        .get("records")
        .or_else(|| payload.get("result").and_then(|r| r.get("records")))
        .and_then(|r| r.as_array())
        .cloned()
        .unwrap_or_default();
    ResultSet::new(records)
}

impl From<&DecodedResponse> for ResultSet {
    fn from(response: &DecodedResponse) -> Self {
        match response {
            DecodedResponse::Json(v) => normalize(v),
            DecodedResponse::Text(_) => ResultSet::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn immediate_shape() {
        let rs = normalize(&json!({"records": [{"a": 1}, {"a": 2}]}));
        assert_eq!(rs.count, 2);
        assert_eq!(rs.records[1]["a"], 2);
    }

    #[test]
    fn polled_shape() {
        let rs = normalize(&json!({"result": {"records": [{"content": "x"}], "types": []}}));
        assert_eq!(rs.count, 1);
    }

    #[test]
    fn absent_records_are_empty() {
        assert_eq!(normalize(&json!({})), ResultSet::default());
        assert_eq!(normalize(&json!({"result": {}})).count, 0);
        assert!(normalize(&json!({"records": null})).is_empty());
        assert!(normalize(&Value::Null).records.is_empty());
        assert!(ResultSet::from(&DecodedResponse::Text("ok".into())).is_empty());
    }

    #[test]
    fn serializes_records_and_count() {
        let v = serde_json::to_value(ResultSet::new(vec![json!(1)])).unwrap();
        assert_eq!(v, json!({"records": [1], "count": 1}));
    }
}
