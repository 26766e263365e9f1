//! Per-field cost table used by the complexity walk.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fixed cost of any connection field.
pub const CONNECTION_BASE_COST: u64 = 2;

/// Fixed cost of analytics roots that fan out to aggregations.
pub const HEAVY_FIELD_COST: u64 = 10;

/// Connection fields counted once per page rather than once per item.
pub const CONNECTION_META_FIELDS: &[&str] = &["pageInfo", "totalCount", "__typename"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldWeight {
    /// `cost` plus the cost of the field's own selections.
    Flat { cost: u64 },
    /// `base` plus page size times the per-item cost of the selections.
    Paginated { base: u64 },
}

#[derive(Debug, Clone)]
pub struct WeightTable {
    weights: HashMap<String, FieldWeight>,
    default_page_size: u64,
    max_page_size: u64,
}

impl WeightTable {
    pub fn new(default_page_size: u64, max_page_size: u64) -> Self {
        let heavy = FieldWeight::Flat {
            cost: HEAVY_FIELD_COST,
        };
        let weights = [
            ("__typename", FieldWeight::Flat { cost: 0 }),
            ("analytics", heavy),
            ("health", heavy),
            ("infra", heavy),
            ("lifecycle", heavy),
            ("usage", heavy),
            ("overview", heavy),
        ]
        .into_iter()
        .map(|(name, weight)| (name.to_string(), weight))
        .collect();

        Self {
            weights,
            default_page_size: default_page_size.max(1),
            max_page_size: max_page_size.max(1),
        }
    }

    /// Merge overrides on top of the built-in entries.
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = (String, FieldWeight)>) -> Self {
        self.weights.extend(overrides);
        self
    }

    /// Explicit entries first; `*Connection` fields are paginated; everything else costs 1.
    pub fn weight_for(&self, field: &str) -> FieldWeight {
        if let Some(weight) = self.weights.get(field) {
            return *weight;
        }
        if field.ends_with("Connection") {
            return FieldWeight::Paginated {
                base: CONNECTION_BASE_COST,
            };
        }
        FieldWeight::Flat { cost: 1 }
    }

    /// Requested page size clamped to `[1, max_page_size]`; absent or non-positive means the default.
    pub fn page_size(&self, requested: Option<i64>) -> u64 {
        match requested {
            Some(n) if n > 0 => (n as u64).min(self.max_page_size),
            _ => self.default_page_size.min(self.max_page_size),
        }
    }
}

impl Default for WeightTable {
    fn default() -> Self {
        Self::new(50, 500)
    }
}
