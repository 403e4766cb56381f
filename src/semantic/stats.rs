//! Per-call analysis counters.

use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

/// Counters collected while analyzing one SQL text (or one pair of texts).
///
/// A fresh value is created by every analysis call and handed back to the
/// caller alongside the result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStats {
    /// Scopes whose lineage or change was computed.
    pub scopes_visited: usize,
    /// Column references resolved to a base table or child scope.
    pub columns_resolved: usize,
    /// Trees analyzed unqualified because qualification failed.
    pub qualify_fallbacks: usize,
}

impl AnalysisStats {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AddAssign for AnalysisStats {
    fn add_assign(&mut self, other: Self) {
        self.scopes_visited += other.scopes_visited;
        self.columns_resolved += other.columns_resolved;
        self.qualify_fallbacks += other.qualify_fallbacks;
    }
}
