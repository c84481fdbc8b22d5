//! Compilation of destination entries into prioritised filter rules.
//!
//! The rule shape mirrors a declarative network-request rule: an integer id,
//! a priority, an allow/block action, and a condition consisting of a URL
//! filter plus the resource types it applies to.
//!
//! # Priorities
//!
//! Allow rules carry [`ALLOW_PRIORITY`] (2) and block rules carry
//! [`BLOCK_PRIORITY`] (1).  When an allow rule and a block rule both match a
//! navigation the allow rule wins, regardless of rule order.  This is what
//! lets `docs.google.com` stay reachable under a `*` block.
//!
//! # Ids
//!
//! Ids are `BASE + index` over the de-duplicated list, so compiling the same
//! input twice yields identical ids and the enforcing host sees no churn.
//! Block ids live in `[1000, 2000)` and allow ids in `[2000, 3000)`; each
//! list is capped at [`MAX_RULES_PER_LIST`] entries to keep the spaces apart.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::pattern::{build_url_filter, parse_entries, ParsedEntry};

/// First id used for block rules.
pub const BLOCK_RULE_ID_BASE: u32 = 1000;
/// First id used for allow rules.
pub const ALLOW_RULE_ID_BASE: u32 = 2000;
/// Priority of block rules.
pub const BLOCK_PRIORITY: u32 = 1;
/// Priority of allow rules; always greater than [`BLOCK_PRIORITY`].
pub const ALLOW_PRIORITY: u32 = 2;
/// Size of each id space.
pub const MAX_RULES_PER_LIST: usize = (ALLOW_RULE_ID_BASE - BLOCK_RULE_ID_BASE) as usize;

/// URL filter that matches every navigation.
pub const MATCH_ALL_FILTER: &str = "*";

/// What a rule does when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Block,
}

/// Request types a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Top-level navigations.
    MainFrame,
    /// Navigations inside frames.
    SubFrame,
}

/// Resource types every compiled rule targets.
pub const NAVIGATION_TYPES: [ResourceType; 2] = [ResourceType::MainFrame, ResourceType::SubFrame];

/// A single compiled filter rule.
///
/// Serialises to the nested declarative shape
/// `{ id, priority, action: { type }, condition: { urlFilter, resourceTypes } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "DeclarativeRule", from = "DeclarativeRule")]
pub struct CompiledRule {
    pub id: u32,
    pub priority: u32,
    pub action: RuleAction,
    pub url_filter: String,
    pub resource_types: Vec<ResourceType>,
}

impl CompiledRule {
    fn allow(index: usize, entry: &ParsedEntry) -> Self {
        Self {
            id: ALLOW_RULE_ID_BASE + index as u32,
            priority: ALLOW_PRIORITY,
            action: RuleAction::Allow,
            url_filter: build_url_filter(entry),
            resource_types: NAVIGATION_TYPES.to_vec(),
        }
    }

    fn block(index: usize, url_filter: String) -> Self {
        Self {
            id: BLOCK_RULE_ID_BASE + index as u32,
            priority: BLOCK_PRIORITY,
            action: RuleAction::Block,
            url_filter,
            resource_types: NAVIGATION_TYPES.to_vec(),
        }
    }

    /// Returns `true` for the single rule produced by a `*` block entry.
    pub fn is_match_all(&self) -> bool {
        self.url_filter == MATCH_ALL_FILTER
    }
}

// ── Wire shape ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeclarativeRule {
    id: u32,
    priority: u32,
    action: ActionSpec,
    condition: ConditionSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActionSpec {
    #[serde(rename = "type")]
    kind: RuleAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConditionSpec {
    url_filter: String,
    resource_types: Vec<ResourceType>,
}

impl From<CompiledRule> for DeclarativeRule {
    fn from(rule: CompiledRule) -> Self {
        Self {
            id: rule.id,
            priority: rule.priority,
            action: ActionSpec { kind: rule.action },
            condition: ConditionSpec {
                url_filter: rule.url_filter,
                resource_types: rule.resource_types,
            },
        }
    }
}

impl From<DeclarativeRule> for CompiledRule {
    fn from(rule: DeclarativeRule) -> Self {
        Self {
            id: rule.id,
            priority: rule.priority,
            action: rule.action.kind,
            url_filter: rule.condition.url_filter,
            resource_types: rule.condition.resource_types,
        }
    }
}

// ── Compiler ──────────────────────────────────────────────────────────────────

/// Returns `true` if any entry, after trimming, is exactly `*`.
///
/// A `*` entry blocks every navigation.  It is distinct from the `*.domain`
/// subdomain wildcard handled by the parser.
pub fn has_wildcard_block<S: AsRef<str>>(raw: &[S]) -> bool {
    raw.iter().any(|d| d.as_ref().trim() == MATCH_ALL_FILTER)
}

fn capped(mut entries: Vec<ParsedEntry>, list: &str) -> Vec<ParsedEntry> {
    if entries.len() > MAX_RULES_PER_LIST {
        warn!(
            "{list} list has {} entries; only the first {MAX_RULES_PER_LIST} are compiled",
            entries.len()
        );
        entries.truncate(MAX_RULES_PER_LIST);
    }
    entries
}

/// Compiles the blocked and allowed lists into an ordered rule set.
///
/// Allow rules come first.  If `blocked` contains a `*` entry the itemised
/// block rules are replaced by a single match-all block rule with id
/// [`BLOCK_RULE_ID_BASE`]; allow rules still apply and still win on priority.
pub fn build_blocking_rules<B, A>(blocked: &[B], allowed: &[A]) -> Vec<CompiledRule>
where
    B: AsRef<str>,
    A: AsRef<str>,
{
    let mut rules: Vec<CompiledRule> = capped(parse_entries(allowed), "allowed")
        .iter()
        .enumerate()
        .map(|(idx, entry)| CompiledRule::allow(idx, entry))
        .collect();

    if has_wildcard_block(blocked) {
        rules.push(CompiledRule::block(0, MATCH_ALL_FILTER.to_string()));
    } else {
        rules.extend(
            capped(parse_entries(blocked), "blocked")
                .iter()
                .enumerate()
                .map(|(idx, entry)| CompiledRule::block(idx, build_url_filter(entry))),
        );
    }

    rules
}

// ── Tests ─────────────────────────────────────────────────────────────────────
