// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Schema evolution rules.
//!
//! Rules reconcile old on-file layouts with new in-memory layouts: a rename
//! maps a source member onto a target member, a transform computes one or
//! more new-layout fields from the full set of decoded old-layout values.
//!
//! Matching precedence: checksum-exact rules first (they handle the case
//! where only the checksum, not the declared version, flags the change),
//! then generic name/type rules, else the default skip/zero-init applies.
//! Conflicting claims on one target member are resolved at descriptor
//! adaptation time: the winner is kept, the loser is logged and ignored,
//! never silently applied twice.

use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// TransformInput
// ---------------------------------------------------------------------------

/// Decoded old-layout field values handed to a transform callback.
pub struct TransformInput<'a> {
    values: &'a HashMap<String, Value>,
}

impl<'a> TransformInput<'a> {
    pub fn new(values: &'a HashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Value of an old-layout member by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Transform callback: old-layout values in, `(target member, value)` pairs out.
pub type TransformFn = dyn Fn(&TransformInput<'_>) -> Vec<(String, Value)> + Send + Sync;

// ---------------------------------------------------------------------------
// EvolutionRule
// ---------------------------------------------------------------------------

/// What a rule does once matched.
#[derive(Clone)]
pub enum RuleKind {
    /// On-file member `from` populates in-memory member `to`.
    Rename { from: String, to: String },
    /// Compute `targets` from the decoded values of `sources`.
    Transform {
        sources: Vec<String>,
        targets: Vec<String>,
        func: Arc<TransformFn>,
    },
}

impl fmt::Debug for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Rename { from, to } => f
                .debug_struct("Rename")
                .field("from", from)
                .field("to", to)
                .finish(),
            RuleKind::Transform { sources, targets, .. } => f
                .debug_struct("Transform")
                .field("sources", sources)
                .field("targets", targets)
                .field("func", &"<fn>")
                .finish(),
        }
    }
}

/// One evolution rule for one class.
#[derive(Clone)]
pub struct EvolutionRule {
    class: Arc<str>,
    /// Restrict the rule to one exact old layout; `None` applies to any
    /// old version of the class.
    source_checksum: Option<u32>,
    kind: RuleKind,
}

impl EvolutionRule {
    pub fn rename(class: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            class: Arc::from(class.into()),
            source_checksum: None,
            kind: RuleKind::Rename {
                from: from.into(),
                to: to.into(),
            },
        }
    }

    pub fn transform<F>(
        class: impl Into<String>,
        sources: Vec<String>,
        targets: Vec<String>,
        func: F,
    ) -> Self
    where
        F: Fn(&TransformInput<'_>) -> Vec<(String, Value)> + Send + Sync + 'static,
    {
        Self {
            class: Arc::from(class.into()),
            source_checksum: None,
            kind: RuleKind::Transform {
                sources,
                targets,
                func: Arc::new(func),
            },
        }
    }

    /// Pin the rule to one exact old-layout checksum.
    pub fn for_checksum(mut self, checksum: u32) -> Self {
        self.source_checksum = Some(checksum);
        self
    }

    pub fn class(&self) -> &Arc<str> {
        &self.class
    }

    pub fn source_checksum(&self) -> Option<u32> {
        self.source_checksum
    }

    pub fn kind(&self) -> &RuleKind {
        &self.kind
    }

    /// Target members this rule claims.
    pub fn targets(&self) -> Vec<&str> {
        match &self.kind {
            RuleKind::Rename { to, .. } => vec![to.as_str()],
            RuleKind::Transform { targets, .. } => targets.iter().map(String::as_str).collect(),
        }
    }

    /// Source members this rule consumes.
    pub fn sources(&self) -> Vec<&str> {
        match &self.kind {
            RuleKind::Rename { from, .. } => vec![from.as_str()],
            RuleKind::Transform { sources, .. } => sources.iter().map(String::as_str).collect(),
        }
    }
}

impl fmt::Debug for EvolutionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RuleKind::Rename { from, to } => write!(
                f,
                "EvolutionRule(rename {}::{} -> {}, checksum={:?})",
                self.class, from, to, self.source_checksum
            ),
            RuleKind::Transform {
                sources, targets, ..
            } => write!(
                f,
                "EvolutionRule(transform {}::{:?} -> {:?}, checksum={:?})",
                self.class, sources, targets, self.source_checksum
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// RuleSet
// ---------------------------------------------------------------------------

/// All rules registered for one class, in registration order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Arc<EvolutionRule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rule: EvolutionRule) {
        self.rules.push(Arc::new(rule));
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Select the winning rules for an old layout with `checksum`.
    ///
    /// Checksum-exact rules outrank generic ones; within a precedence class
    /// registration order wins. A later rule claiming an already-claimed
    /// target member is dropped with a warning.
    pub fn select(&self, checksum: u32) -> Vec<Arc<EvolutionRule>> {
        let exact = self
            .rules
            .iter()
            .filter(|r| r.source_checksum == Some(checksum));
        let generic = self.rules.iter().filter(|r| r.source_checksum.is_none());

        let mut claimed: HashMap<&str, &Arc<EvolutionRule>> = HashMap::new();
        let mut winners = Vec::new();
        for rule in exact.chain(generic) {
            let mut conflict = None;
            for target in rule.targets() {
                if let Some(holder) = claimed.get(target) {
                    conflict = Some((target.to_string(), (*holder).clone()));
                    break;
                }
            }
            match conflict {
                Some((target, holder)) => {
                    log::warn!(
                        "evolution rule conflict on {}::{}: {:?} ignored in favor of {:?}",
                        rule.class,
                        target,
                        rule,
                        holder
                    );
                }
                None => {
                    for target in rule.targets() {
                        claimed.insert(target, rule);
                    }
                    winners.push(rule.clone());
                }
            }
        }
        winners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_rule_shape() {
        let rule = EvolutionRule::rename("Track", "px_old", "px");
        assert_eq!(rule.targets(), vec!["px"]);
        assert_eq!(rule.sources(), vec!["px_old"]);
        assert_eq!(rule.source_checksum(), None);
    }

    #[test]
    fn test_transform_rule_invocation() {
        let rule = EvolutionRule::transform(
            "Event",
            vec!["a".to_string()],
            vec!["d".to_string()],
            |input| {
                let a = input.get("a").and_then(Value::as_i32).unwrap_or(0);
                vec![("d".to_string(), Value::F64(f64::from(a) * 2.0))]
            },
        );

        let mut values = HashMap::new();
        values.insert("a".to_string(), Value::I32(5));
        let input = TransformInput::new(&values);
        match rule.kind() {
            RuleKind::Transform { func, .. } => {
                let out = func(&input);
                assert_eq!(out, vec![("d".to_string(), Value::F64(10.0))]);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_checksum_exact_outranks_generic() {
        let mut set = RuleSet::new();
        set.add(EvolutionRule::rename("Event", "old_generic", "x"));
        set.add(EvolutionRule::rename("Event", "old_exact", "x").for_checksum(0x1234));

        let winners = set.select(0x1234);
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].sources(), vec!["old_exact"]);

        let winners = set.select(0x9999);
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].sources(), vec!["old_generic"]);
    }

    #[test]
    fn test_conflicting_generic_rules_keep_first() {
        let mut set = RuleSet::new();
        set.add(EvolutionRule::rename("Event", "first", "x"));
        set.add(EvolutionRule::rename("Event", "second", "x"));

        let winners = set.select(0);
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].sources(), vec!["first"]);
    }

    #[test]
    fn test_disjoint_rules_all_selected() {
        let mut set = RuleSet::new();
        set.add(EvolutionRule::rename("Event", "a0", "a"));
        set.add(EvolutionRule::rename("Event", "b0", "b"));
        assert_eq!(set.select(0).len(), 2);
    }
}
