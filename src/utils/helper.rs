use chrono::{DateTime, TimeZone, Utc};

/// Exchange epoch-millisecond timestamp as UTC. `None` when out of range.
pub fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Comma-joined exchange symbols for log lines.
pub fn join_symbols<'a, I>(symbols: I) -> String
where
    I: IntoIterator<Item = &'a crate::types::InstrumentSymbol>,
{
    symbols
        .into_iter()
        .map(|s| s.exchange())
        .collect::<Vec<_>>()
        .join(",")
}
