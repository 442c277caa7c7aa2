//! Dialect translation errors.

use crate::models::Dialect;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while rewriting a canonical statement for a target engine.
///
/// These are developer-facing: a statement that trips one of these was written
/// against the canonical conventions incorrectly, or uses a construct the
/// target engine genuinely cannot express. They are never silently dropped.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum DialectError {
    /// The construct exists in the canonical form but has no mapping in the
    /// target dialect (e.g. `ON DUPLICATE KEY UPDATE` for the embedded engine)
    #[error("construct {construct:?} has no mapping in {dialect} dialect")]
    UnsupportedConstruct { construct: String, dialect: Dialect },

    /// Ordinal parameter markers must run 1..N exactly once each for engines
    /// with purely positional placeholders
    #[error("placeholder ${found} out of order (expected ${expected}) for {dialect} dialect")]
    PlaceholderOutOfOrder {
        expected: u32,
        found: u32,
        dialect: Dialect,
    },

    /// A single-quoted string literal was opened but never closed
    #[error("unterminated string literal in statement")]
    UnterminatedLiteral,
}
