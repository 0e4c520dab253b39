//! Text rendering of a context graph, one line per node.

use super::node::{visit_graph, EdgeDirection, GraphNode, NodeDescription, VisitControl};
use std::fmt::Write;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Wrap property lines at this many columns.
    pub width: usize,
    pub max_depth: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: 100,
            max_depth: 8,
        }
    }
}

fn flags(desc: &NodeDescription) -> String {
    let mut flags = Vec::new();
    if desc.mutable {
        flags.push("mut");
    }
    if desc.unresolved {
        flags.push("unresolved");
    }
    if desc.unused {
        flags.push("unused");
    }
    if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    }
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(16);
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split(' ') {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Render `root` and its descendants.
pub fn render_tree(root: &Arc<dyn GraphNode>, options: &RenderOptions) -> String {
    let mut out = String::new();
    let skipped = visit_graph(
        root,
        |node, depth| {
            let indent = "  ".repeat(depth.max(0) as usize);
            let desc = node.describe();
            let _ = writeln!(out, "{indent}{}{}", desc.label, flags(&desc));
            if !desc.properties.is_empty() {
                let props = desc
                    .properties
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                let body_width = options.width.saturating_sub(indent.len() + 4);
                for line in wrap(&props, body_width) {
                    let _ = writeln!(out, "{indent}  | {line}");
                }
            }
            VisitControl::Continue
        },
        options.max_depth,
        0,
    );

    for edge in skipped
        .iter()
        .filter(|edge| edge.direction == EdgeDirection::Child)
    {
        let _ = writeln!(out, "... {} -> {} (depth limit)", edge.from, edge.to);
    }
    out
}
