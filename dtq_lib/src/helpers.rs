//! Helpers for time windows, DQL string literals, and secret masking.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Lookback used when a relative expression is not recognised.
pub const DEFAULT_LOOKBACK_HOURS: i64 = 1;

/// Absolute query window. Relative expressions are resolved once, at
/// construction, so the window does not drift while a job is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeframe {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Timeframe {
    /// Resolve `from`/`to` against the current clock.
    ///
    /// `from` accepts `now-<N>h`, `now-<N>d`, `now-<N>m` or an ISO 8601
    /// instant; any other `now-...` form falls back to `default_lookback`.
    /// `to` defaults to now.
    pub fn resolve(from: &str, to: Option<&str>, default_lookback: Duration) -> Result<Self, String> {
        Self::resolve_at(from, to, default_lookback, Utc::now())
    }

    pub fn resolve_at(
        from: &str,
        to: Option<&str>,
        default_lookback: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, String> {
        let end = match to.map(str::trim) {
            None | Some("") | Some("now") => now,
            Some(t) => parse_time(t)?,
        };
        let from = from.trim();
        let start = if from.is_empty() || from.starts_with("now-") {
            let lookback = parse_relative(from).unwrap_or(default_lookback);
            now.checked_sub_signed(lookback)
                .ok_or_else(|| format!("Time range out of bounds: {}", from))?
        } else {
            parse_time(from)?
        };
        Ok(Self { start, end })
    }

    /// Window ending now and starting `lookback` earlier.
    pub fn last(lookback: Duration) -> Self {
        let end = Utc::now();
        Self {
            start: end - lookback,
            end,
        }
    }

    pub fn start_iso(&self) -> String {
        format_time(self.start)
    }

    pub fn end_iso(&self) -> String {
        format_time(self.end)
    }

    pub fn start_millis(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_millis(&self) -> i64 {
        self.end.timestamp_millis()
    }
}

/// Parse `now-<N>h|d|m` into a lookback duration.
pub fn parse_relative(expr: &str) -> Option<Duration> {
    let rest = expr.trim().strip_prefix("now-")?;
    let num_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let num: i64 = rest[..num_end].parse().ok()?;
    match rest[num_end..].chars().next()? {
        'h' => Duration::try_hours(num),
        'd' => Duration::try_days(num),
        'm' => Duration::try_minutes(num),
        _ => None,
    }
}

/// Format time as ISO 8601 UTC with millisecond precision.
pub fn format_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse ISO 8601 time string.
pub fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    let s = s.trim().trim_end_matches('Z').trim_end_matches('z');
    let parsed = DateTime::parse_from_rfc3339(&format!("{}Z", s))
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .map_err(|e| format!("Invalid time '{}': {}", s, e))?;
    Ok(parsed.with_timezone(&Utc))
}

/// Escape a value for use inside a double-quoted DQL string literal.
pub fn escape_dql(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Show only the first 8 characters of a secret-ish value.
pub fn mask(value: &str) -> String {
    let head: String = value.chars().take(8).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        parse_time("2024-05-01T12:00:00Z").unwrap()
    }

    #[test]
    fn relative_units() {
        assert_eq!(parse_relative("now-2h"), Some(Duration::hours(2)));
        assert_eq!(parse_relative("now-7d"), Some(Duration::days(7)));
        assert_eq!(parse_relative("now-30m"), Some(Duration::minutes(30)));
        assert_eq!(parse_relative("now-5w"), None);
        assert_eq!(parse_relative("now-h"), None);
        assert_eq!(parse_relative("1h"), None);
    }

    #[test]
    fn resolves_relative_start_and_now_end() {
        let tf = Timeframe::resolve_at("now-1h", None, Duration::hours(1), now()).unwrap();
        assert_eq!(tf.end, now());
        assert_eq!(tf.start_iso(), "2024-05-01T11:00:00.000Z");

        let tf = Timeframe::resolve_at("now-3d", Some("now"), Duration::hours(1), now()).unwrap();
        assert_eq!(tf.start_iso(), "2024-04-28T12:00:00.000Z");

        let tf = Timeframe::resolve_at("now-15m", None, Duration::hours(1), now()).unwrap();
        assert_eq!(tf.start_iso(), "2024-05-01T11:45:00.000Z");
    }

    #[test]
    fn unrecognised_relative_uses_default_lookback() {
        let tf = Timeframe::resolve_at("now-1y", None, Duration::hours(24), now()).unwrap();
        assert_eq!(tf.start_iso(), "2024-04-30T12:00:00.000Z");
    }

    #[test]
    fn explicit_instants_pass_through() {
        let tf = Timeframe::resolve_at(
            "2024-04-01T00:00:00Z",
            Some("2024-04-02T00:00:00Z"),
            Duration::hours(1),
            now(),
        )
        .unwrap();
        assert_eq!(tf.start_iso(), "2024-04-01T00:00:00.000Z");
        assert_eq!(tf.end_iso(), "2024-04-02T00:00:00.000Z");
        assert!(Timeframe::resolve_at("yesterday", None, Duration::hours(1), now()).is_err());
    }

    #[test]
    fn resolve_uses_current_clock() {
        let before = Utc::now();
        let tf = Timeframe::resolve("now-2h", None, Duration::hours(1)).unwrap();
        let after = Utc::now();
        assert!(tf.end >= before && tf.end <= after);
        assert_eq!(tf.end - tf.start, Duration::hours(2));
    }

    #[test]
    fn escape_and_mask() {
        assert_eq!(escape_dql(r#"say "hi""#), r#"say \"hi\""#);
        assert_eq!(escape_dql(r"a\b"), r"a\\b");
        assert_eq!(mask("dt0s02.ABCDEFGHIJ"), "dt0s02.A...");
        assert_eq!(mask("abc"), "abc...");
    }
}
