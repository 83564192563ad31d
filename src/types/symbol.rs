use std::fmt;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};

/// Venue-specific trading-pair syntax.
///
/// `BTCUSDT` with quote `USDT` normalizes to `BTC`; `B-BTC_USDT` with prefix `B-`
/// and separator `_` normalizes to `BTC` as well.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SymbolRules {
    pub quote_asset: String,
    #[serde(default)]
    pub venue_prefixes: Vec<String>,
    #[serde(default)]
    pub separator: Option<char>,
}

impl SymbolRules {
    pub fn with_quote(quote_asset: &str) -> Self {
        SymbolRules {
            quote_asset: quote_asset.to_ascii_uppercase(),
            venue_prefixes: Vec::new(),
            separator: None,
        }
    }

    pub fn required_suffix(&self) -> String {
        match self.separator {
            Some(sep) => format!("{}{}", sep, self.quote_asset),
            None => self.quote_asset.clone(),
        }
    }
}

impl Default for SymbolRules {
    fn default() -> Self {
        SymbolRules::with_quote("USDT")
    }
}

/// A validated exchange symbol together with its short display form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct InstrumentSymbol {
    exchange: String,
    short: String,
}

impl InstrumentSymbol {
    pub fn parse(raw: &str, rules: &SymbolRules) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidSymbol {
            symbol: raw.to_string(),
            reason,
        };

        let exchange = raw.trim().to_ascii_uppercase();
        if exchange.is_empty() {
            return Err(invalid("empty symbol".to_string()));
        }

        if !exchange
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid("contains characters outside [A-Z0-9_-]".to_string()));
        }

        let suffix = rules.required_suffix();
        let body = exchange
            .strip_suffix(suffix.as_str())
            .ok_or_else(|| invalid(format!("must end with {}", suffix)))?;

        let base = rules
            .venue_prefixes
            .iter()
            .find_map(|prefix| body.strip_prefix(prefix.as_str()))
            .unwrap_or(body);

        if base.is_empty() {
            return Err(invalid("missing base asset".to_string()));
        }
        if !base.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid(format!("base asset '{}' is not alphanumeric", base)));
        }

        Ok(InstrumentSymbol {
            short: base.to_string(),
            exchange,
        })
    }

    /// Symbol as the exchange spells it, e.g. `BTCUSDT`.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Normalized base-asset code, e.g. `BTC`.
    pub fn short(&self) -> &str {
        &self.short
    }
}

impl fmt::Display for InstrumentSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.exchange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_quote_suffix() {
        let symbol = InstrumentSymbol::parse("BTCUSDT", &SymbolRules::default()).unwrap();
        assert_eq!(symbol.exchange(), "BTCUSDT");
        assert_eq!(symbol.short(), "BTC");

        let symbol = InstrumentSymbol::parse("1000PEPEUSDT", &SymbolRules::default()).unwrap();
        assert_eq!(symbol.short(), "1000PEPE");
    }

    #[test]
    fn normalizes_case_and_whitespace() {
        let symbol = InstrumentSymbol::parse("  ethusdt ", &SymbolRules::default()).unwrap();
        assert_eq!(symbol.exchange(), "ETHUSDT");
        assert_eq!(symbol.short(), "ETH");
    }

    #[test]
    fn handles_prefixed_and_separated_symbols() {
        let rules = SymbolRules {
            quote_asset: "USDT".to_string(),
            venue_prefixes: vec!["B-".to_string(), "F-".to_string()],
            separator: Some('_'),
        };

        let symbol = InstrumentSymbol::parse("B-ETH_USDT", &rules).unwrap();
        assert_eq!(symbol.exchange(), "B-ETH_USDT");
        assert_eq!(symbol.short(), "ETH");

        assert!(InstrumentSymbol::parse("B-ETHUSDT", &rules).is_err());
    }

    #[test]
    fn rejects_malformed_symbols() {
        let rules = SymbolRules::default();
        for raw in ["", "   ", "USDT", "BTCUSD", "BTC/USDT", "BTC-USDT", "ÉTHUSDT"] {
            let err = InstrumentSymbol::parse(raw, &rules).unwrap_err();
            assert!(
                matches!(err, Error::InvalidSymbol { .. }),
                "expected {:?} to be rejected, got {:?}",
                raw,
                err
            );
        }
    }
}
