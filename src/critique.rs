//! Structured critique of a failing candidate

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[serde(alias = "Critical", alias = "CRITICAL")]
    Critical,
    #[serde(alias = "High", alias = "HIGH")]
    High,
    #[serde(alias = "Medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "Low", alias = "LOW")]
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(s)
    }
}

/// One concrete discrepancy between target and candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueItem {
    pub priority: Priority,
    pub category: String,
    pub element: String,
    pub issue: String,
    #[serde(default)]
    pub expected: String,
    #[serde(default)]
    pub actual: String,
}

/// Prioritized fix list for one failing iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub summary: String,
    /// Always `items.len()`
    pub total_issues: usize,
    pub items: Vec<CritiqueItem>,
}

impl Critique {
    pub fn new(summary: impl Into<String>, items: Vec<CritiqueItem>) -> Self {
        Self {
            summary: summary.into(),
            total_issues: items.len(),
            items,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
