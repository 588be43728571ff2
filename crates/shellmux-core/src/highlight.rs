//! Real-time output highlighting.
//!
//! Rules come from a [`RuleSource`], are resolved per target (falling back to
//! the global assignment), compiled once into [`HighlightPipeline`]s and then
//! applied to every inbound chunk:
//! - Escape sequences are never matched or split by a rule
//! - Rules run in descending priority, equal priorities keep source order
//! - No rules means the chunk is returned untouched

use crate::{Result, ShellmuxError};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use shellmux_types::{HighlightAssignment, HighlightRuleDef, HighlightStyle, GLOBAL_TARGET};
use std::borrow::Cow;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// SGR reset appended after every match.
pub const ANSI_RESET: &str = "\x1b[0m";

/// Terminal control sequences that must pass through untouched.
static CONTROL_SEQUENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\x1b\[[\x30-\x3f]*[\x20-\x2f]*[\x40-\x7e]", // CSI: params, intermediates, final
        r"|\x1b\][^\x07\x1b]*\x07",                 // OSC ending with BEL
        r"|\x1b\][^\x07\x1b]*\x1b\\",               // OSC ending with ST
        r"|\x1b[P^_X][^\x1b]*\x1b\\",               // DCS, PM, APC, SOS
        r"|\x1b[()][A-Z0-9]",                       // character set selection
        r"|\x1b[=>MNOP78]",                         // single-char escapes
    ))
    .unwrap()
});

/// Convert a hex color into a 24-bit SGR escape.
///
/// Accepts `#rgb`, `#rrggbb` and `#rrggbbaa` (alpha is ignored).
pub fn hex_to_ansi(hex: &str, background: bool) -> Option<String> {
    let digits = hex.trim().trim_start_matches('#');
    let expanded: String = match digits.len() {
        3 => digits.chars().flat_map(|c| [c, c]).collect(),
        6 => digits.to_string(),
        8 => digits[..6].to_string(),
        _ => return None,
    };
    let value = u32::from_str_radix(&expanded, 16).ok()?;
    let (r, g, b) = ((value >> 16) & 0xff, (value >> 8) & 0xff, value & 0xff);
    let layer = if background { 48 } else { 38 };
    Some(format!("\x1b[{};2;{};{};{}m", layer, r, g, b))
}

/// Escape prefix for a style, empty when it sets no valid color.
pub fn style_prefix(style: &HighlightStyle) -> String {
    let mut prefix = String::new();
    if let Some(fg) = style.foreground.as_deref().and_then(|c| hex_to_ansi(c, false)) {
        prefix.push_str(&fg);
    }
    if let Some(bg) = style.background.as_deref().and_then(|c| hex_to_ansi(c, true)) {
        prefix.push_str(&bg);
    }
    prefix
}

/// A rule ready to apply.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub pattern: String,
    pub regex: Regex,
    pub ansi_start: String,
    pub priority: i32,
}

impl CompiledRule {
    pub fn ansi_end(&self) -> &'static str {
        ANSI_RESET
    }

    /// Compile a single rule. `Ok(None)` when the rule is disabled or has no color.
    pub fn compile(def: &HighlightRuleDef, style: Option<&HighlightStyle>) -> Result<Option<Self>> {
        if !def.enabled || def.pattern.is_empty() {
            return Ok(None);
        }
        let ansi_start = style.map(style_prefix).unwrap_or_default();
        if ansi_start.is_empty() {
            return Ok(None);
        }

        let pattern = if def.is_regex {
            def.pattern.clone()
        } else {
            regex::escape(&def.pattern)
        };
        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(!def.case_sensitive)
            .build()
            .map_err(|source| ShellmuxError::InvalidPattern {
                pattern: def.pattern.clone(),
                source,
            })?;

        Ok(Some(Self {
            pattern: def.pattern.clone(),
            regex,
            ansi_start,
            priority: def.priority,
        }))
    }

    /// Wrap every match in the plain-text stretches of `text`.
    /// Returns `None` when nothing matched.
    fn apply(&self, text: &str) -> Option<String> {
        let mut out = String::with_capacity(text.len() + 32);
        let mut changed = false;
        let mut last = 0;
        for control in CONTROL_SEQUENCE.find_iter(text) {
            changed |= self.wrap_matches(&text[last..control.start()], &mut out);
            out.push_str(control.as_str());
            last = control.end();
        }
        changed |= self.wrap_matches(&text[last..], &mut out);
        changed.then_some(out)
    }

    fn wrap_matches(&self, plain: &str, out: &mut String) -> bool {
        let mut changed = false;
        let mut last = 0;
        for m in self.regex.find_iter(plain) {
            if m.as_str().is_empty() {
                continue;
            }
            out.push_str(&plain[last..m.start()]);
            out.push_str(&self.ansi_start);
            out.push_str(m.as_str());
            out.push_str(ANSI_RESET);
            last = m.end();
            changed = true;
        }
        out.push_str(&plain[last..]);
        changed
    }
}

/// Compile rule definitions against a style table.
///
/// Disabled rules, rules without a usable color and invalid patterns are
/// dropped. The result is sorted by descending priority; the sort is stable so
/// equal priorities keep their source order.
pub fn compile_rules(defs: &[HighlightRuleDef], styles: &[HighlightStyle]) -> Vec<CompiledRule> {
    let style_map: HashMap<&str, &HighlightStyle> =
        styles.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut compiled: Vec<CompiledRule> = defs
        .iter()
        .filter_map(|def| {
            match CompiledRule::compile(def, style_map.get(def.style_id.as_str()).copied()) {
                Ok(rule) => rule,
                Err(e) => {
                    warn!(target: "shellmux::highlight", "Skipping rule {}: {}", def.id, e);
                    None
                }
            }
        })
        .collect();
    compiled.sort_by_key(|rule| Reverse(rule.priority));
    compiled
}

/// Immutable set of compiled rules applied to output chunks.
#[derive(Debug, Clone, Default)]
pub struct HighlightPipeline {
    rules: Vec<CompiledRule>,
}

impl HighlightPipeline {
    pub fn new(rules: Vec<CompiledRule>) -> Self {
        Self { rules }
    }

    /// Pipeline that returns every chunk unchanged.
    pub fn passthrough() -> Self {
        Self::default()
    }

    pub fn from_defs(defs: &[HighlightRuleDef], styles: &[HighlightStyle]) -> Self {
        Self::new(compile_rules(defs, styles))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Highlight one chunk of output.
    pub fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if self.rules.is_empty() || text.is_empty() {
            return Cow::Borrowed(text);
        }

        let mut current = Cow::Borrowed(text);
        for rule in &self.rules {
            if let Some(replaced) = rule.apply(&current) {
                current = Cow::Owned(replaced);
            }
        }
        current
    }
}

/// Settings-side tables the highlight rules are read from.
pub trait RuleSource: Send + Sync {
    fn assignments(&self) -> Vec<HighlightAssignment>;

    /// Rules of a set, in source order.
    fn rules_in_set(&self, set_id: &str) -> Vec<HighlightRuleDef>;

    fn styles(&self) -> Vec<HighlightStyle>;

    /// Changes whenever any of the tables change.
    fn revision(&self) -> u64;
}

/// Rules for `target_id`: its own assignment, else the global one, else none.
pub fn resolve_rules(source: &dyn RuleSource, target_id: &str) -> Vec<HighlightRuleDef> {
    let assignments = source.assignments();
    let assignment = assignments
        .iter()
        .find(|a| a.target_id == target_id)
        .or_else(|| assignments.iter().find(|a| a.target_id == GLOBAL_TARGET));

    match assignment {
        Some(a) => source.rules_in_set(&a.set_id),
        None => Vec::new(),
    }
}

#[derive(Debug, Default)]
struct RuleTables {
    styles: Vec<HighlightStyle>,
    sets: HashMap<String, Vec<HighlightRuleDef>>,
    assignments: Vec<HighlightAssignment>,
}

/// In-memory [`RuleSource`] that can be edited at runtime.
#[derive(Debug, Default)]
pub struct MemoryRuleSource {
    tables: RwLock<RuleTables>,
    revision: AtomicU64,
}

impl MemoryRuleSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn edit(&self, f: impl FnOnce(&mut RuleTables)) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        f(&mut tables);
        self.revision.fetch_add(1, Ordering::Release);
    }

    fn read<T>(&self, f: impl FnOnce(&RuleTables) -> T) -> T {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        f(&tables)
    }

    pub fn put_style(&self, style: HighlightStyle) {
        self.edit(|t| {
            t.styles.retain(|s| s.id != style.id);
            t.styles.push(style);
        });
    }

    pub fn put_rule_set(&self, set_id: impl Into<String>, rules: Vec<HighlightRuleDef>) {
        let set_id = set_id.into();
        self.edit(|t| {
            t.sets.insert(set_id, rules);
        });
    }

    /// Assign a set to a target, replacing any existing assignment.
    pub fn assign(&self, target_id: impl Into<String>, set_id: impl Into<String>) {
        let (target_id, set_id) = (target_id.into(), set_id.into());
        self.edit(|t| {
            t.assignments.retain(|a| a.target_id != target_id);
            t.assignments.push(HighlightAssignment { target_id, set_id });
        });
    }

    pub fn unassign(&self, target_id: &str) {
        self.edit(|t| t.assignments.retain(|a| a.target_id != target_id));
    }
}

impl RuleSource for MemoryRuleSource {
    fn assignments(&self) -> Vec<HighlightAssignment> {
        self.read(|t| t.assignments.clone())
    }

    fn rules_in_set(&self, set_id: &str) -> Vec<HighlightRuleDef> {
        self.read(|t| t.sets.get(set_id).cloned().unwrap_or_default())
    }

    fn styles(&self) -> Vec<HighlightStyle> {
        self.read(|t| t.styles.clone())
    }

    fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }
}

/// Per-target cache of compiled pipelines, recompiled when the source changes.
pub struct HighlightRegistry {
    source: Arc<dyn RuleSource>,
    cache: DashMap<String, (u64, Arc<HighlightPipeline>)>,
}

impl HighlightRegistry {
    pub fn new(source: Arc<dyn RuleSource>) -> Self {
        Self {
            source,
            cache: DashMap::new(),
        }
    }

    /// Current pipeline for `target_id`.
    pub fn pipeline_for(&self, target_id: &str) -> Arc<HighlightPipeline> {
        let revision = self.source.revision();
        if let Some(entry) = self.cache.get(target_id) {
            if entry.0 == revision {
                return entry.1.clone();
            }
        }

        let defs = resolve_rules(self.source.as_ref(), target_id);
        let pipeline = if defs.is_empty() {
            Arc::new(HighlightPipeline::passthrough())
        } else {
            Arc::new(HighlightPipeline::from_defs(&defs, &self.source.styles()))
        };
        debug!(
            target: "shellmux::highlight",
            "Compiled {} rules for target {} (revision {})",
            pipeline.rules().len(),
            target_id,
            revision
        );
        self.cache
            .insert(target_id.to_string(), (revision, pipeline.clone()));
        pipeline
    }
}
