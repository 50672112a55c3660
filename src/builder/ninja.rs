//! Ninja build file rendering.

use crate::builder::graph::{BuildGraph, Edge, PseudoEdge, TargetBlock};
use crate::core::step::BuildRule;

/// Phony anchor every top-level edge depends on, so it is always re-run.
pub const PHONY: &str = "__phony__";

/// Traces printed per edge before the rest are elided.
pub const MAX_TRACES: usize = 10;

/// Render the complete build file.
pub fn render(graph: &BuildGraph) -> String {
    let mut output = String::new();
    output.push_str(&format!("build {}: phony\n\n", PHONY));

    for rule in graph.rules() {
        render_rule(&mut output, rule);
    }

    for edge in graph.edges() {
        render_edge(&mut output, edge);
    }

    for target in graph.targets() {
        render_target(&mut output, target);
    }

    output
}

/// Escape a path for use in a `build` line.
pub fn escape_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '$' => escaped.push_str("$$"),
            ' ' => escaped.push_str("$ "),
            ':' => escaped.push_str("$:"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Escape a printed line for a double-quoted shell string inside a rule
/// command.
fn escape_echo(line: &str) -> String {
    let mut escaped = String::with_capacity(line.len());
    for c in line.chars() {
        match c {
            '\\' | '"' | '`' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '$' => escaped.push_str("\\$$"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn render_rule(output: &mut String, rule: &BuildRule) {
    output.push_str(&format!("rule {}\n", rule.name));
    output.push_str(&format!("  command = {}\n", rule.command));
    if let Some(description) = &rule.description {
        output.push_str(&format!("  description = {}\n", description));
    }
    if let Some(depfile) = &rule.depfile {
        output.push_str(&format!("  depfile = {}\n", depfile));
    }
    if let Some(deps) = &rule.deps {
        output.push_str(&format!("  deps = {}\n", deps));
    }
    if let Some(pool) = &rule.pool {
        output.push_str(&format!("  pool = {}\n", pool));
    }
    output.push('\n');
}

fn render_edge(output: &mut String, edge: &Edge) {
    for trace in edge.traces.iter().take(MAX_TRACES) {
        output.push_str(&format!("# trace: {}\n", trace.join(" // ")));
    }
    if edge.traces.len() > MAX_TRACES {
        output.push_str(&format!("# ... {} more\n", edge.traces.len() - MAX_TRACES));
    }

    let mut line = format!("build {}: {}", join_escaped(&edge.outs), edge.rule);
    if !edge.ins.is_empty() {
        line.push(' ');
        line.push_str(&join_escaped(&edge.ins));
    }
    if !edge.order_only.is_empty() {
        line.push_str(" || ");
        line.push_str(&join_escaped(&edge.order_only));
    }
    output.push_str(&line);
    output.push('\n');

    for (name, value) in &edge.variables {
        output.push_str(&format!("  {} = {}\n", name, value));
    }
    output.push('\n');
}

fn render_target(output: &mut String, target: &TargetBlock) {
    let name = escape_path(&target.name);
    let print: Vec<String> = target.print.iter().map(|p| escape_echo(p)).collect();

    output.push_str(&format!("rule {}\n", target.rule));
    output.push_str(&format!("  command = echo \"{}\"\n", print.join("\\n")));
    output.push_str(&format!("  description = Created {}:\n", target.name));
    output.push('\n');

    let mut line = format!("build {}: {}", name, target.rule);
    for input in target.inputs.iter().chain(&target.deps) {
        line.push(' ');
        line.push_str(&escape_path(input));
    }
    output.push_str(&format!("{} {}\n\n", line, PHONY));

    if let Some(run) = &target.run {
        render_console(output, target, run, "run", "Running");
    }
    if let Some(test) = &target.test {
        render_console(output, target, test, "test", "Testing");
    }
}

fn render_console(
    output: &mut String,
    target: &TargetBlock,
    edge: &PseudoEdge,
    suffix: &str,
    verb: &str,
) {
    output.push_str(&format!("rule {}\n", edge.rule));
    output.push_str(&format!("  command = {}\n", edge.command));
    output.push_str(&format!("  description = {} {}:\n", verb, target.name));
    output.push_str("  pool = console\n");
    output.push('\n');
    let name = escape_path(&target.name);
    output.push_str(&format!(
        "build {}#{}: {} {} {}\n\n",
        name, suffix, edge.rule, name, PHONY
    ));
}

fn join_escaped(paths: &[String]) -> String {
    paths
        .iter()
        .map(|p| escape_path(p))
        .collect::<Vec<_>>()
        .join(" ")
}
