use crate::error::{Error, Result};
use crate::types::{InstrumentSymbol, SymbolRules};

/// Ordered set of instruments, unique by both exchange symbol and short symbol
/// since the short symbol becomes the store key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    symbols: Vec<InstrumentSymbol>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when an instrument with the same short symbol is already present.
    pub fn insert(&mut self, symbol: InstrumentSymbol) -> bool {
        if self.symbols.iter().any(|s| s.short() == symbol.short()) {
            return false;
        }
        self.symbols.push(symbol);
        true
    }

    pub fn remove(&mut self, symbol: &InstrumentSymbol) -> bool {
        let before = self.symbols.len();
        self.symbols.retain(|s| s != symbol);
        self.symbols.len() != before
    }

    pub fn contains(&self, symbol: &InstrumentSymbol) -> bool {
        self.symbols.contains(symbol)
    }

    /// Case-insensitive lookup by the exchange spelling.
    pub fn find_exchange(&self, exchange: &str) -> Option<&InstrumentSymbol> {
        self.symbols
            .iter()
            .find(|s| s.exchange().eq_ignore_ascii_case(exchange))
    }

    /// Members of `self` missing from `other`, in insertion order.
    pub fn difference(&self, other: &SubscriptionSet) -> Vec<InstrumentSymbol> {
        self.symbols
            .iter()
            .filter(|s| !other.contains(s))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstrumentSymbol> {
        self.symbols.iter()
    }

    pub fn exchange_symbols(&self) -> Vec<String> {
        self.symbols.iter().map(|s| s.exchange().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl FromIterator<InstrumentSymbol> for SubscriptionSet {
    fn from_iter<I: IntoIterator<Item = InstrumentSymbol>>(iter: I) -> Self {
        let mut set = SubscriptionSet::new();
        for symbol in iter {
            set.insert(symbol);
        }
        set
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionDiff {
    pub target: SubscriptionSet,
    pub subscribe: Vec<InstrumentSymbol>,
    pub unsubscribe: Vec<InstrumentSymbol>,
}

impl SubscriptionDiff {
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

/// Turns raw symbol lists into validated subscription sets and diffs them
/// against the last accepted set.
pub struct Reconciler {
    feed: String,
    rules: SymbolRules,
    current: SubscriptionSet,
}

impl Reconciler {
    pub fn new(feed: &str, rules: SymbolRules) -> Self {
        Reconciler {
            feed: feed.to_string(),
            rules,
            current: SubscriptionSet::new(),
        }
    }

    /// Valid, de-duplicated subset of `raw`. Each rejected entry is logged.
    pub fn validate(&self, raw: &[String]) -> SubscriptionSet {
        let mut set = SubscriptionSet::new();

        for entry in raw {
            match InstrumentSymbol::parse(entry, &self.rules) {
                Ok(symbol) => {
                    let exchange = symbol.exchange().to_string();
                    if !set.insert(symbol) {
                        tracing::warn!(
                            feed = %self.feed,
                            symbol = %exchange,
                            "Dropping duplicate instrument from subscription list"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(feed = %self.feed, error = %e, "Rejected instrument symbol");
                }
            }
        }

        set
    }

    pub fn initialize(&mut self, raw: &[String]) -> Result<SubscriptionSet> {
        let set = self.validate(raw);
        if set.is_empty() {
            return Err(Error::EmptySubscriptionSet);
        }

        tracing::info!(
            feed = %self.feed,
            requested = raw.len(),
            accepted = set.len(),
            "Initial subscription set"
        );
        self.current = set.clone();
        Ok(set)
    }

    /// `Ok(None)` when the new list changes nothing. An empty valid list is an
    /// error and leaves the current set untouched.
    pub fn reconcile(&mut self, raw: &[String]) -> Result<Option<SubscriptionDiff>> {
        let target = self.validate(raw);
        if target.is_empty() {
            tracing::warn!(
                feed = %self.feed,
                requested = raw.len(),
                "Reload yields no valid instruments; keeping current subscriptions"
            );
            return Err(Error::EmptySubscriptionSet);
        }

        let diff = SubscriptionDiff {
            subscribe: target.difference(&self.current),
            unsubscribe: self.current.difference(&target),
            target,
        };

        if diff.is_empty() {
            tracing::info!(feed = %self.feed, "Reload made no subscription changes");
            return Ok(None);
        }

        tracing::info!(
            feed = %self.feed,
            subscribe = ?diff.subscribe.iter().map(|s| s.exchange()).collect::<Vec<_>>(),
            unsubscribe = ?diff.unsubscribe.iter().map(|s| s.exchange()).collect::<Vec<_>>(),
            "Subscription diff computed"
        );
        self.current = diff.target.clone();
        Ok(Some(diff))
    }

    pub fn current(&self) -> &SubscriptionSet {
        &self.current
    }
}
