use std::collections::HashMap;

use tracing::debug;

use super::ansi::clean_line;
use super::cache::{CacheStats, StrategyCache};
use super::formats::*;
use super::traits::*;
use super::{tail_lines, MAX_SCAN_LINES, PROBE_LINES};

/// Lines sampled from the end of a blob to fingerprint it
pub const FINGERPRINT_LINES: usize = 20;

/// Coarse format of a blob, used as the adaptive cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlobFingerprint {
    Json,
    StructuredText,
    PlainText,
}

impl BlobFingerprint {
    /// Majority vote over the tail of the blob.
    ///
    /// Ties go to the more specific format (JSON, then structured text).
    pub fn detect(blob: &str) -> Self {
        let mut votes: HashMap<BlobFingerprint, usize> = HashMap::new();

        for line in tail_lines(blob, FINGERPRINT_LINES) {
            let line = clean_line(line);
            *votes.entry(Self::classify_line(&line)).or_insert(0) += 1;
        }

        let mut formats: Vec<_> = votes.keys().copied().collect();
        formats.sort();

        let mut best = BlobFingerprint::PlainText;
        let mut best_count = 0;
        for format in formats {
            let count = votes.get(&format).copied().unwrap_or(0);
            if count > best_count {
                best_count = count;
                best = format;
            }
        }
        best
    }

    fn classify_line(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.starts_with('{') && trimmed.ends_with('}') && trimmed.contains("\":") {
            return BlobFingerprint::Json;
        }

        let pairs = trimmed
            .split(|c: char| c.is_whitespace() || c == '|' || c == ',')
            .filter(|tok| {
                tok.len() > 1
                    && (tok.ends_with(':')
                        || tok.find('=').map_or(false, |i| i > 0 && i < tok.len() - 1))
            })
            .count();
        if pairs >= 2 {
            BlobFingerprint::StructuredText
        } else {
            BlobFingerprint::PlainText
        }
    }
}

/// Priority-ordered strategy list
///
/// Strategies are kept sorted by priority (stable, so registration order
/// breaks ties). The default list is optimized JSON, general JSON,
/// structured text, fallback; plan-mode is registered by the parser.
#[derive(Debug, Clone)]
pub struct StrategyFactory {
    strategies: Vec<Strategy>,
}

impl StrategyFactory {
    pub fn new() -> Self {
        Self::with_limits(MAX_SCAN_LINES, PROBE_LINES)
    }

    /// Default list with the given scan window and probe size
    pub fn with_limits(max_scan_lines: usize, probe_lines: usize) -> Self {
        let optimized = JsonStrategyConfig::optimized();
        let json = JsonStrategyConfig {
            max_scan_lines,
            probe_lines,
            ..JsonStrategyConfig::default()
        };

        let mut factory = Self::empty();
        factory.register(Strategy::Json(JsonStrategy::with_config(JsonStrategyConfig {
            max_scan_lines: optimized.max_scan_lines.min(max_scan_lines),
            probe_lines,
            ..optimized
        })));
        factory.register(Strategy::Json(JsonStrategy::with_config(json)));
        factory.register(Strategy::StructuredText(StructuredTextStrategy::with_limits(
            max_scan_lines,
            probe_lines,
        )));
        factory.register(Strategy::Fallback(FallbackStrategy::with_max_scan_lines(
            max_scan_lines,
        )));
        factory
    }

    /// No strategies at all; mostly useful for tests and custom stacks
    pub fn empty() -> Self {
        Self { strategies: Vec::new() }
    }

    /// Add a strategy and re-sort by priority
    pub fn register(&mut self, strategy: Strategy) {
        debug!(strategy = strategy.name(), priority = strategy.priority(), "Registering strategy");
        self.strategies.push(strategy);
        self.strategies.sort_by_key(Strategy::priority);
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn get(&self, name: &str) -> Option<&Strategy> {
        self.strategies.iter().find(|s| s.name() == name)
    }

    /// First strategy, in priority order, whose probe accepts the blob
    pub fn best_strategy(&self, blob: &str) -> Option<&Strategy> {
        self.strategies.iter().find(|s| s.can_parse(blob))
    }

    /// Every strategy whose probe accepts the blob, in priority order
    pub fn eligible(&self, blob: &str) -> Vec<&Strategy> {
        self.strategies.iter().filter(|s| s.can_parse(blob)).collect()
    }
}

impl Default for StrategyFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Factory that remembers the chosen strategy per blob fingerprint.
///
/// Caching never changes the order: strategies are still tried by
/// priority, and a stale entry is dropped as soon as it is outranked.
#[derive(Debug)]
pub struct AdaptiveStrategyFactory {
    factory: StrategyFactory,
    cache: StrategyCache,
}

impl AdaptiveStrategyFactory {
    pub fn new(factory: StrategyFactory, max_cache_entries: usize) -> Self {
        Self {
            factory,
            cache: StrategyCache::new(max_cache_entries),
        }
    }

    pub fn factory(&self) -> &StrategyFactory {
        &self.factory
    }

    /// Registration can change the best choice, so the cache is dropped
    pub fn register(&mut self, strategy: Strategy) {
        self.factory.register(strategy);
        self.cache.clear();
    }

    pub fn best_strategy(&self, blob: &str) -> Option<&Strategy> {
        self.eligible(blob).into_iter().next()
    }

    /// Eligible strategies in priority order.
    ///
    /// A cached choice is confirmed only when no strategy ranked ahead of it
    /// accepts the blob; otherwise the entry is stale and gets replaced. The
    /// fallback is never memoized since its probe accepts everything.
    pub fn eligible(&self, blob: &str) -> Vec<&Strategy> {
        let fingerprint = BlobFingerprint::detect(blob);
        let eligible = self.factory.eligible(blob);
        let first = eligible.first().copied();

        if let Some(name) = self.cache.get(fingerprint) {
            if first.map(Strategy::name) == Some(name.as_str()) {
                return eligible;
            }
            debug!(cached = %name, ?fingerprint, "Cached strategy outranked, dropping entry");
            self.cache.remove(fingerprint);
        }

        match first {
            Some(Strategy::Fallback(_)) | None => {}
            Some(strategy) => self.cache.insert(fingerprint, strategy.name()),
        }
        eligible
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

/// What the result parser selects strategies through
#[derive(Debug)]
pub enum StrategySelector {
    Fixed(StrategyFactory),
    Adaptive(AdaptiveStrategyFactory),
}

impl StrategySelector {
    pub fn new(factory: StrategyFactory, adaptive: bool, max_cache_entries: usize) -> Self {
        if adaptive {
            StrategySelector::Adaptive(AdaptiveStrategyFactory::new(factory, max_cache_entries))
        } else {
            StrategySelector::Fixed(factory)
        }
    }

    pub fn register(&mut self, strategy: Strategy) {
        match self {
            StrategySelector::Fixed(f) => f.register(strategy),
            StrategySelector::Adaptive(a) => a.register(strategy),
        }
    }

    pub fn factory(&self) -> &StrategyFactory {
        match self {
            StrategySelector::Fixed(f) => f,
            StrategySelector::Adaptive(a) => a.factory(),
        }
    }

    /// Owned copies so each attempt can move its strategy onto a blocking task
    pub fn eligible(&self, blob: &str) -> Vec<Strategy> {
        let eligible = match self {
            StrategySelector::Fixed(f) => f.eligible(blob),
            StrategySelector::Adaptive(a) => a.eligible(blob),
        };
        eligible.into_iter().cloned().collect()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        match self {
            StrategySelector::Fixed(_) => None,
            StrategySelector::Adaptive(a) => Some(a.cache_stats()),
        }
    }
}
