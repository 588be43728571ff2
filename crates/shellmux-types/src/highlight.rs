//! Highlight rule definitions as stored by the settings layer.

use serde::{Deserialize, Serialize};

/// Sentinel target id whose rule-set applies when a target has none of its own.
pub const GLOBAL_TARGET: &str = "global";

/// A user-defined match rule before compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightRuleDef {
    #[serde(default)]
    pub id: String,
    pub pattern: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub priority: i32,
    /// Key into the style table.
    pub style_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Colors applied to a match. Colors are hex strings (`#rgb`, `#rrggbb`, `#rrggbbaa`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightStyle {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreground: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
}

/// Binds a rule-set to a target id (or to [`GLOBAL_TARGET`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightAssignment {
    pub target_id: String,
    pub set_id: String,
}
