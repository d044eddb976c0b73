//! Output formatting: plain text (human-readable) and JSON.

use std::fmt::Write;

use dtq_lib::{BizEventSummary, ErrorLogCount, ResultSet, SearchResults, Validation};
use serde::Serialize;
use serde_json::Value;

const MAX_COLUMNS: usize = 6;
const MAX_CELL: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Tables and key-value lines
    #[default]
    Plain,
    /// Pretty-printed JSON
    Json,
}

/// Pretty JSON for anything serializable.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

/// Query records as a table, followed by the record count.
pub fn format_records(rs: &ResultSet) -> String {
    let mut out = String::new();
    if rs.is_empty() {
        let _ = writeln!(out, "No records found");
        return out;
    }
    let columns = columns(&rs.records);
    if columns.is_empty() {
        for record in &rs.records {
            let _ = writeln!(out, "{}", cell(record));
        }
    } else {
        let rows: Vec<Vec<String>> = rs
            .records
            .iter()
            .map(|r| {
                columns
                    .iter()
                    .map(|c| r.get(c).map(cell).unwrap_or_else(|| "-".to_string()))
                    .collect()
            })
            .collect();
        let widths: Vec<usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                rows.iter()
                    .map(|row| row[i].chars().count())
                    .chain(std::iter::once(c.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        write_row(&mut out, &columns, &widths);
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        write_row(&mut out, &rule, &widths);
        for row in &rows {
            write_row(&mut out, row, &widths);
        }
    }
    let _ = writeln!(out, "\n{} record(s)", rs.count);
    out
}

fn write_row(out: &mut String, cells: &[String], widths: &[usize]) {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(c, w)| format!("{:<width$}", c, width = *w))
        .collect();
    let _ = writeln!(out, "{}", line.join("  ").trim_end());
}

/// First-seen keys across object records, capped at [`MAX_COLUMNS`].
fn columns(records: &[Value]) -> Vec<String> {
    let mut cols: Vec<String> = Vec::new();
    for map in records.iter().filter_map(|r| r.as_object()) {
        for key in map.keys() {
            if cols.len() == MAX_COLUMNS {
                return cols;
            }
            if !cols.contains(key) {
                cols.push(key.clone());
            }
        }
    }
    cols
}

fn cell(v: &Value) -> String {
    let s = match v {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    };
    truncate(&s, MAX_CELL)
}

fn truncate(s: &str, max: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max {
        s
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}

/// Aligned `key: value` lines.
pub fn format_pairs(pairs: &[(String, String)]) -> String {
    let width = pairs.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    let mut out = String::new();
    for (k, v) in pairs {
        let _ = writeln!(out, "{:<width$}  {}", format!("{}:", k), v, width = width + 1);
    }
    out
}

/// Validation verdict with its errors and warnings.
pub fn format_validation(v: &Validation) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Configuration {}",
        if v.valid { "valid" } else { "invalid" }
    );
    for e in &v.errors {
        let _ = writeln!(out, "  error: {}", e);
    }
    for w in &v.warnings {
        let _ = writeln!(out, "  warning: {}", w);
    }
    out
}

/// Ranked error counts with a proportional bar.
pub fn format_ranking(counts: &[ErrorLogCount]) -> String {
    let mut out = String::new();
    if counts.is_empty() {
        let _ = writeln!(out, "No entities analyzed");
        return out;
    }
    for (i, c) in counts.iter().enumerate() {
        let bar = match c.error_count {
            0 => String::new(),
            n => "█".repeat((n / 5).max(1)),
        };
        let line = format!(
            "{}. {} ({}): {} errors {}",
            i + 1,
            c.name,
            c.entity_id,
            c.error_count,
            bar
        );
        let _ = writeln!(out, "{}", line.trim_end());
    }
    if let Some(top) = counts.first().filter(|c| c.error_count > 0) {
        let _ = writeln!(out, "\n{} has the most ERROR logs ({})", top.name, top.error_count);
    }
    out
}

pub fn format_biz_summary(s: &BizEventSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Events: {}", s.total);
    let _ = writeln!(out, "Revenue: {:.2}", s.revenue);
    if !s.by_event_type.is_empty() {
        let _ = writeln!(out, "By event type:");
        for (k, n) in &s.by_event_type {
            let _ = writeln!(out, "  {}: {}", k, n);
        }
    }
    if !s.by_payment_type.is_empty() {
        let _ = writeln!(out, "By payment type:");
        for (k, n) in &s.by_payment_type {
            let _ = writeln!(out, "  {}: {}", k, n);
        }
    }
    out
}

/// One section per source, empty sources reduced to a single line.
pub fn format_search(found: &SearchResults) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Search results for \"{}\"", found.query);
    let sections = [
        ("Problems", &found.problems),
        ("Events", &found.events),
        ("Lambda functions", &found.lambdas),
        ("Services", &found.services),
        ("Business events", &found.business_events),
        ("Log/business correlation", &found.correlation),
    ];
    for (title, rs) in sections {
        let _ = writeln!(out, "\n{} ({})", title, rs.count);
        if !rs.is_empty() {
            out.push_str(&format_records(rs));
        }
    }
    let _ = writeln!(out, "\nBusiness impact: {:.2}", found.business_impact);
    out
}

/// Nested key-value rendering for raw API documents.
pub fn format_value(value: &Value) -> String {
    let mut out = String::new();
    format_value_into(value, &mut out, 0);
    out
}

fn format_value_into(v: &Value, out: &mut String, indent: usize) {
    let pad = "  ".repeat(indent);
    match v {
        Value::Object(map) => {
            for (k, val) in map {
                if val.is_object() || val.is_array() {
                    let _ = writeln!(out, "{}{}:", pad, k);
                    format_value_into(val, out, indent + 1);
                } else {
                    let _ = writeln!(out, "{}{}: {}", pad, k, cell(val));
                }
            }
        }
        Value::Array(items) if items.is_empty() => {
            let _ = writeln!(out, "{}<empty>", pad);
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if item.is_object() || item.is_array() {
                    let _ = writeln!(out, "{}[{}]", pad, i + 1);
                    format_value_into(item, out, indent + 1);
                } else {
                    let _ = writeln!(out, "{}{}", pad, cell(item));
                }
            }
        }
        scalar => {
            let _ = writeln!(out, "{}{}", pad, cell(scalar));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn output_format_values() {
        use clap::ValueEnum;
        assert_eq!(OutputFormat::from_str("plain", false).unwrap(), OutputFormat::Plain);
        assert_eq!(OutputFormat::from_str("JSON", true).unwrap(), OutputFormat::Json);
        assert!(OutputFormat::from_str("xml", true).is_err());
    }

    #[test]
    fn records_table_has_header_and_count() {
        let rs = ResultSet::new(vec![
            json!({"timestamp": "2024-05-01T11:00:00Z", "content": "ERROR boom"}),
            json!({"timestamp": "2024-05-01T11:01:00Z", "loglevel": "WARN"}),
        ]);
        let out = format_records(&rs);
        let header = out.lines().next().unwrap();
        assert!(header.contains("timestamp"));
        assert!(header.contains("loglevel"));
        assert!(out.contains("ERROR boom"));
        assert!(out.contains("2 record(s)"));
        assert_eq!(format_records(&ResultSet::default()), "No records found\n");
    }

    #[test]
    fn long_cells_are_truncated() {
        let rs = ResultSet::new(vec![json!({"content": "x".repeat(200)})]);
        let out = format_records(&rs);
        assert!(out.contains('…'));
        assert!(!out.contains(&"x".repeat(MAX_CELL)));
    }

    #[test]
    fn ranking_names_the_leader() {
        let counts = vec![
            ErrorLogCount {
                name: "checkout".into(),
                entity_id: "AWS_LAMBDA_FUNCTION-1".into(),
                error_count: 12,
            },
            ErrorLogCount {
                name: "cart".into(),
                entity_id: "AWS_LAMBDA_FUNCTION-2".into(),
                error_count: 0,
            },
        ];
        let out = format_ranking(&counts);
        assert!(out.starts_with("1. checkout"));
        assert!(out.contains("12 errors ██"));
        assert!(out.contains("checkout has the most ERROR logs (12)"));
    }

    #[test]
    fn ranking_draws_no_bar_for_zero_errors() {
        let counts = vec![
            ErrorLogCount {
                name: "search".into(),
                entity_id: "AWS_LAMBDA_FUNCTION-3".into(),
                error_count: 2,
            },
            ErrorLogCount {
                name: "cart".into(),
                entity_id: "AWS_LAMBDA_FUNCTION-2".into(),
                error_count: 0,
            },
        ];
        let out = format_ranking(&counts);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "1. search (AWS_LAMBDA_FUNCTION-3): 2 errors █");
        assert_eq!(lines[1], "2. cart (AWS_LAMBDA_FUNCTION-2): 0 errors");
        assert!(!lines[1].contains('█'));
    }

    #[test]
    fn search_lists_every_source() {
        let found = SearchResults {
            query: "checkout".into(),
            problems: ResultSet::new(vec![json!({"displayId": "P-1", "title": "Checkout latency"})]),
            business_impact: 246.49,
            ..SearchResults::default()
        };
        let out = format_search(&found);
        assert!(out.starts_with("Search results for \"checkout\""));
        assert!(out.contains("Problems (1)"));
        assert!(out.contains("Checkout latency"));
        assert!(out.contains("Services (0)"));
        assert!(out.contains("Log/business correlation (0)"));
        assert!(out.ends_with("Business impact: 246.49\n"));
    }

    #[test]
    fn pairs_are_aligned() {
        let out = format_pairs(&[
            ("Environment".into(), "dev".into()),
            ("Auth".into(), "oauth".into()),
        ]);
        let cols: Vec<usize> = out.lines().map(|l| l.find("dev").or(l.find("oauth")).unwrap()).collect();
        assert_eq!(cols[0], cols[1]);
    }

    #[test]
    fn nested_values() {
        let out = format_value(&json!({"result": [{"metricId": "m", "data": []}]}));
        assert!(out.contains("result:"));
        assert!(out.contains("metricId: m"));
        assert!(out.contains("<empty>"));
    }
}
