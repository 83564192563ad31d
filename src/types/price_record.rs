use chrono::{DateTime, SecondsFormat, Utc};

pub const FIELD_LTP: &str = "ltp";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_ORIGINAL_SYMBOL: &str = "original_symbol";
pub const FIELD_VOLUME_24H: &str = "volume_24h";
pub const FIELD_CURRENT_FUNDING_RATE: &str = "current_funding_rate";
pub const FIELD_ESTIMATED_FUNDING_RATE: &str = "estimated_funding_rate";
pub const FIELD_FUNDING_TIMESTAMP: &str = "funding_timestamp";

/// Funding-style metadata; either rate may be missing from a given update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FundingInfo {
    pub current_rate: Option<String>,
    pub estimated_rate: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Latest observed value for one instrument. Prices stay as text so the
/// exchange's decimal representation reaches the store untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriceRecord {
    pub short_symbol: String,
    pub original_symbol: String,
    pub ltp: String,
    pub timestamp: DateTime<Utc>,
    pub volume_24h: Option<String>,
    pub funding: Option<FundingInfo>,
}

impl PriceRecord {
    /// Full field set written on every upsert.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            (FIELD_LTP, self.ltp.clone()),
            (FIELD_TIMESTAMP, format_timestamp(&self.timestamp)),
            (FIELD_ORIGINAL_SYMBOL, self.original_symbol.clone()),
        ];

        if let Some(volume) = &self.volume_24h {
            fields.push((FIELD_VOLUME_24H, volume.clone()));
        }

        if let Some(funding) = &self.funding {
            if let Some(current) = &funding.current_rate {
                fields.push((FIELD_CURRENT_FUNDING_RATE, current.clone()));
            }
            if let Some(estimated) = &funding.estimated_rate {
                fields.push((FIELD_ESTIMATED_FUNDING_RATE, estimated.clone()));
            }
            fields.push((FIELD_FUNDING_TIMESTAMP, format_timestamp(&funding.timestamp)));
        }

        fields
    }
}

/// RFC 3339, UTC, millisecond precision: `2024-05-01T12:00:00.125Z`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn observed_at() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_714_564_800_125).unwrap()
    }

    #[test]
    fn spot_record_has_minimum_field_set() {
        let record = PriceRecord {
            short_symbol: "BTC".into(),
            original_symbol: "BTCUSDT".into(),
            ltp: "67250.50".into(),
            timestamp: observed_at(),
            volume_24h: None,
            funding: None,
        };

        assert_eq!(
            record.fields(),
            vec![
                (FIELD_LTP, "67250.50".to_string()),
                (FIELD_TIMESTAMP, "2024-05-01T12:00:00.125Z".to_string()),
                (FIELD_ORIGINAL_SYMBOL, "BTCUSDT".to_string()),
            ]
        );
    }

    #[test]
    fn funding_fields_are_appended_when_present() {
        let record = PriceRecord {
            short_symbol: "ETH".into(),
            original_symbol: "ETHUSDT".into(),
            ltp: "3100.1".into(),
            timestamp: observed_at(),
            volume_24h: Some("1200.5".into()),
            funding: Some(FundingInfo {
                current_rate: Some("0.0001".into()),
                estimated_rate: None,
                timestamp: observed_at(),
            }),
        };

        let fields = record.fields();
        let names: Vec<_> = fields.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            vec![
                FIELD_LTP,
                FIELD_TIMESTAMP,
                FIELD_ORIGINAL_SYMBOL,
                FIELD_VOLUME_24H,
                FIELD_CURRENT_FUNDING_RATE,
                FIELD_FUNDING_TIMESTAMP,
            ]
        );
    }

    #[test]
    fn estimated_rate_alone_still_carries_funding_timestamp() {
        let record = PriceRecord {
            short_symbol: "SOL".into(),
            original_symbol: "B-SOL_USDT".into(),
            ltp: "150.2".into(),
            timestamp: observed_at(),
            volume_24h: None,
            funding: Some(FundingInfo {
                current_rate: None,
                estimated_rate: Some("0.00012".into()),
                timestamp: observed_at(),
            }),
        };

        let fields = record.fields();
        assert!(fields.contains(&(FIELD_ESTIMATED_FUNDING_RATE, "0.00012".to_string())));
        assert!(fields.contains(&(FIELD_FUNDING_TIMESTAMP, "2024-05-01T12:00:00.125Z".to_string())));
        assert!(!fields.iter().any(|(name, _)| *name == FIELD_CURRENT_FUNDING_RATE));
    }
}
