//! The build graph: rule table, memoized edges and top-level target blocks.
//!
//! Every output path maps to the single edge producing it. Rules and edges
//! keep first-seen order; the serializer emits them in that order.

use std::collections::{BTreeMap, HashMap};

use crate::builder::errors::GraphError;
use crate::core::step::BuildRule;

/// Prefix of generated rule names. Shared rules must not use it.
pub const RESERVED_RULE_PREFIX: &str = "__";

/// One memoized build edge. Paths are absolute and unescaped.
#[derive(Debug, Clone)]
pub struct Edge {
    pub outs: Vec<String>,
    pub ins: Vec<String>,
    pub order_only: Vec<String>,
    pub rule: String,
    pub variables: BTreeMap<String, String>,
    /// Trace of every definition of this edge, first definition first.
    pub traces: Vec<Vec<String>>,
}

impl Edge {
    /// Whether two edges describe the same step, ignoring provenance.
    pub fn same_definition(&self, other: &Edge) -> bool {
        self.outs == other.outs
            && self.ins == other.ins
            && self.order_only == other.order_only
            && self.rule == other.rule
            && self.variables == other.variables
    }
}

/// A console edge running or testing an exported target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PseudoEdge {
    pub rule: String,
    pub command: String,
}

/// Aggregation block of an exported top-level target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetBlock {
    pub name: String,
    pub rule: String,
    /// Lines echoed when the target is built.
    pub print: Vec<String>,
    /// Sorted frontier of the target, absolute.
    pub inputs: Vec<String>,
    /// Other top-level targets the aggregation edge depends on.
    pub deps: Vec<String>,
    pub run: Option<PseudoEdge>,
    pub test: Option<PseudoEdge>,
}

/// Outcome of defining an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Definition {
    Fresh,
    Merged,
}

/// The memo tables of one generation run.
#[derive(Debug, Default)]
pub struct BuildGraph {
    rules: Vec<BuildRule>,
    named: HashMap<String, usize>,
    anonymous: HashMap<BuildRule, usize>,
    edges: Vec<Edge>,
    producers: HashMap<String, usize>,
    targets: Vec<TargetBlock>,
    next_rule_id: usize,
}

impl BuildGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a unique generated rule name.
    pub fn fresh_rule_name(&mut self) -> String {
        let name = format!("{}rule{}", RESERVED_RULE_PREFIX, self.next_rule_id);
        self.next_rule_id += 1;
        name
    }

    /// Register a rule and return the name edges refer to it by.
    ///
    /// Anonymous rules (empty name) with identical recipes share one block.
    pub fn intern_rule(&mut self, rule: BuildRule) -> Result<String, GraphError> {
        if rule.name.is_empty() {
            if let Some(&idx) = self.anonymous.get(&rule) {
                return Ok(self.rules[idx].name.clone());
            }
            let name = self.fresh_rule_name();
            self.anonymous.insert(rule.clone(), self.rules.len());
            self.rules.push(BuildRule { name: name.clone(), ..rule });
            return Ok(name);
        }

        validate_rule_name(&rule.name)?;

        if let Some(&idx) = self.named.get(&rule.name) {
            if self.rules[idx] != rule {
                return Err(GraphError::RuleConflict { name: rule.name });
            }
            return Ok(rule.name);
        }

        let name = rule.name.clone();
        self.named.insert(name.clone(), self.rules.len());
        self.rules.push(rule);
        Ok(name)
    }

    /// Add an edge, merging it into an equivalent existing definition.
    pub fn define(&mut self, edge: Edge) -> Result<Definition, GraphError> {
        let existing = edge
            .outs
            .iter()
            .find_map(|out| self.producers.get(out).map(|&idx| (out, idx)));

        if let Some((out, idx)) = existing {
            let current = &mut self.edges[idx];
            if !current.same_definition(&edge) {
                return Err(GraphError::IncompatibleRedefinition {
                    output: out.clone(),
                    first: current.traces.first().cloned().unwrap_or_default(),
                    second: edge.traces.into_iter().next().unwrap_or_default(),
                });
            }
            current.traces.extend(edge.traces);
            return Ok(Definition::Merged);
        }

        let idx = self.edges.len();
        for out in &edge.outs {
            self.producers.insert(out.clone(), idx);
        }
        self.edges.push(edge);
        Ok(Definition::Fresh)
    }

    pub fn add_target(&mut self, block: TargetBlock) {
        self.targets.push(block);
    }

    /// The edge producing `output`, if any.
    pub fn producer(&self, output: &str) -> Option<&Edge> {
        self.producers.get(output).map(|&idx| &self.edges[idx])
    }

    pub fn rules(&self) -> &[BuildRule] {
        &self.rules
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn targets(&self) -> &[TargetBlock] {
        &self.targets
    }
}

fn validate_rule_name(name: &str) -> Result<(), GraphError> {
    if name.starts_with(RESERVED_RULE_PREFIX) {
        return Err(GraphError::invalid_step(format!(
            "rule name `{}` uses the reserved prefix `{}`",
            name, RESERVED_RULE_PREFIX
        )));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(GraphError::invalid_step(format!(
            "rule name `{}` may only contain letters, digits, `_`, `-` and `.`",
            name
        )));
    }
    Ok(())
}
