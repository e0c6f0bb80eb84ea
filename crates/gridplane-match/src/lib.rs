//! gridplane-match — the capability matcher.
//!
//! Answers one question: may this node host an instance of this element
//! right now? The check is a fixed sequence of independent gates over the
//! request and an immutable [`NodeView`](gridplane_model::NodeView); the
//! first failing gate short-circuits with a human-readable reason appended
//! to the request. Ordinary non-matches are never errors — the only hard
//! failure is an unresolvable download size during staged provisioning.

pub mod matcher;
pub mod strategy;

pub use matcher::{can_place, MatchError, MatchOutcome};
pub use strategy::{AssociationMatcher, ExactNameMatcher, StrategyRegistry};
