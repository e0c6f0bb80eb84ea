//! Pluggable association-matching strategies.
//!
//! An association constraint names its strategy; the registry resolves
//! that name at config time to a concrete matcher. Unknown names fall
//! back to the default exact-name strategy.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use gridplane_model::AssociationConstraint;

/// Decides whether an element present on a node counts as the partner of
/// an association constraint.
pub trait AssociationMatcher: Send + Sync {
    fn matches(&self, constraint: &AssociationConstraint, candidate: &str) -> bool;
}

/// Default strategy: the candidate element name must equal the declared
/// partner name exactly.
pub struct ExactNameMatcher;

impl AssociationMatcher for ExactNameMatcher {
    fn matches(&self, constraint: &AssociationConstraint, candidate: &str) -> bool {
        constraint.partner == candidate
    }
}

/// Name → strategy registry, populated at engine construction.
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn AssociationMatcher>>,
    default: Arc<dyn AssociationMatcher>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
            default: Arc::new(ExactNameMatcher),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, matcher: Arc<dyn AssociationMatcher>) {
        self.strategies.insert(name.into(), matcher);
    }

    /// Resolve a constraint's strategy, falling back to the default when
    /// the constraint names no strategy or names an unknown one.
    pub fn resolve(&self, name: Option<&str>) -> &Arc<dyn AssociationMatcher> {
        match name {
            None => &self.default,
            Some(n) => self.strategies.get(n).unwrap_or_else(|| {
                warn!(strategy = %n, "unknown association strategy, using default");
                &self.default
            }),
        }
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridplane_model::AssociationKind;

    struct PrefixMatcher;

    impl AssociationMatcher for PrefixMatcher {
        fn matches(&self, constraint: &AssociationConstraint, candidate: &str) -> bool {
            candidate.starts_with(&constraint.partner)
        }
    }

    #[test]
    fn exact_name_matching() {
        let c = AssociationConstraint::new(AssociationKind::Colocated, "cache");
        let m = ExactNameMatcher;
        assert!(m.matches(&c, "cache"));
        assert!(!m.matches(&c, "cache-v2"));
    }

    #[test]
    fn unknown_strategy_falls_back_to_default() {
        let registry = StrategyRegistry::new();
        let c = AssociationConstraint::new(AssociationKind::Colocated, "cache");
        assert!(registry.resolve(Some("nonexistent")).matches(&c, "cache"));
        assert!(!registry.resolve(Some("nonexistent")).matches(&c, "cache-v2"));
    }

    #[test]
    fn registered_strategy_is_resolved_by_name() {
        let mut registry = StrategyRegistry::new();
        registry.register("prefix", Arc::new(PrefixMatcher));

        let mut c = AssociationConstraint::new(AssociationKind::Colocated, "cache");
        c.strategy = Some("prefix".to_string());
        assert!(registry.resolve(c.strategy.as_deref()).matches(&c, "cache-v2"));
    }
}
