use std::fmt;
use std::sync::Arc;

pub use super::model::{ParseError, ResultRecord};
use super::formats::{FallbackStrategy, JsonStrategy, PlanModeStrategy, StructuredTextStrategy};
use super::metrics::StrategyKind;

/// Contract shared by every extraction strategy.
///
/// `can_parse` must stay cheap: keyword probing over a bounded window, never
/// a full parse. `parse` may scan more, but still only a bounded tail.
pub trait ResultStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Lower runs first
    fn priority(&self) -> u32;

    fn can_parse(&self, blob: &str) -> bool;

    /// Extract a candidate record from the blob
    fn parse(&self, blob: &str) -> Result<ResultRecord, ParseError>;
}

/// The closed set of built-in strategies plus runtime-registered ones.
///
/// Built-ins dispatch through `match`; only `Custom` goes through a vtable.
#[derive(Debug, Clone)]
pub enum Strategy {
    Json(JsonStrategy),
    PlanMode(PlanModeStrategy),
    StructuredText(StructuredTextStrategy),
    Fallback(FallbackStrategy),
    Custom(Arc<dyn ResultStrategy>),
}

impl Strategy {
    pub fn custom(strategy: impl ResultStrategy + 'static) -> Self {
        Strategy::Custom(Arc::new(strategy))
    }

    pub fn name(&self) -> &str {
        match self {
            Strategy::Json(s) => s.name(),
            Strategy::PlanMode(s) => s.name(),
            Strategy::StructuredText(s) => s.name(),
            Strategy::Fallback(s) => s.name(),
            Strategy::Custom(s) => s.name(),
        }
    }

    pub fn priority(&self) -> u32 {
        match self {
            Strategy::Json(s) => s.priority(),
            Strategy::PlanMode(s) => s.priority(),
            Strategy::StructuredText(s) => s.priority(),
            Strategy::Fallback(s) => s.priority(),
            Strategy::Custom(s) => s.priority(),
        }
    }

    pub fn can_parse(&self, blob: &str) -> bool {
        match self {
            Strategy::Json(s) => s.can_parse(blob),
            Strategy::PlanMode(s) => s.can_parse(blob),
            Strategy::StructuredText(s) => s.can_parse(blob),
            Strategy::Fallback(s) => s.can_parse(blob),
            Strategy::Custom(s) => s.can_parse(blob),
        }
    }

    pub fn parse(&self, blob: &str) -> Result<ResultRecord, ParseError> {
        match self {
            Strategy::Json(s) => s.parse(blob),
            Strategy::PlanMode(s) => s.parse(blob),
            Strategy::StructuredText(s) => s.parse(blob),
            Strategy::Fallback(s) => s.parse(blob),
            Strategy::Custom(s) => s.parse(blob),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Json(_) => StrategyKind::Json,
            Strategy::PlanMode(_) => StrategyKind::PlanMode,
            Strategy::StructuredText(_) => StrategyKind::StructuredText,
            Strategy::Fallback(_) => StrategyKind::Fallback,
            Strategy::Custom(_) => StrategyKind::Custom,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(p{})", self.name(), self.priority())
    }
}
