//! Grid renderers
//!
//! Two views of the same `{grid, totalColumns}` pair: a box-drawing text view
//! for the terminal and an HTML fragment for the web UI. Tool badges come from
//! an explicit [`ToolRegistry`] passed in by the caller.

use colored::Colorize;
use lazy_static::lazy_static;
use std::fmt::Write as _;

use crate::grid::{Cell, Connector, Grid, NodeCell};
use crate::redact::describe_parameters;

/// Icon family of a tool badge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Search,
    Reader,
    /// Any tool without a dedicated entry
    Generic,
}

impl ToolKind {
    pub fn glyph(&self) -> &'static str {
        match self {
            ToolKind::Search => "◎",
            ToolKind::Reader => "▤",
            ToolKind::Generic => "⚒",
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            ToolKind::Search => "tool-search",
            ToolKind::Reader => "tool-reader",
            ToolKind::Generic => "tool-generic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ToolEntry {
    tool_name: String,
    kind: ToolKind,
    label: String,
}

/// Badge shown on a node that used a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolBadge<'a> {
    pub kind: ToolKind,
    pub label: &'a str,
}

/// Closed lookup table from tool name to badge.
///
/// Names are matched exactly. Unknown names get a generic badge labelled with
/// the tool name itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolRegistry {
    entries: Vec<ToolEntry>,
}

impl ToolRegistry {
    /// An empty registry; every tool renders with the generic badge
    pub fn new() -> Self {
        Self::default()
    }

    /// The two tools the analysis model is known to call
    pub fn standard() -> Self {
        Self::new()
            .with_tool("SearchTool", ToolKind::Search, "Search Tool")
            .with_tool("ReaderTool", ToolKind::Reader, "Webpage Understanding")
    }

    pub fn with_tool(
        mut self,
        tool_name: impl Into<String>,
        kind: ToolKind,
        label: impl Into<String>,
    ) -> Self {
        self.entries.push(ToolEntry {
            tool_name: tool_name.into(),
            kind,
            label: label.into(),
        });
        self
    }

    pub fn badge<'a>(&'a self, tool_name: &'a str) -> ToolBadge<'a> {
        self.entries
            .iter()
            .find(|entry| entry.tool_name == tool_name)
            .map(|entry| ToolBadge {
                kind: entry.kind,
                label: &entry.label,
            })
            .unwrap_or(ToolBadge {
                kind: ToolKind::Generic,
                label: tool_name,
            })
    }

    /// Badge for a node, `None` when the node used no named tool
    pub fn badge_for<'a>(&'a self, node: &'a NodeCell) -> Option<ToolBadge<'a>> {
        node.tool_name().map(|name| self.badge(name))
    }
}

lazy_static! {
    pub static ref STANDARD_TOOLS: ToolRegistry = ToolRegistry::standard();
}

// --- Text rendering --- //

const CONNECTOR_WIDTH: usize = 3;
const MIN_NODE_WIDTH: usize = 4;
const SPINNER: &str = "⋯";
const CHECK: &str = "✓";

/// Options for the text renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextStyle {
    /// Characters per node column
    pub node_width: usize,
    /// Emit ANSI colors
    pub color: bool,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            node_width: 28,
            color: true,
        }
    }
}

/// Box-drawing character for a connector's four segments
pub fn junction(connector: &Connector) -> char {
    match (connector.up, connector.down, connector.left, connector.right) {
        (false, false, false, false) => ' ',
        (true, false, false, false) | (false, true, false, false) | (true, true, false, false) => '│',
        (false, false, _, _) => '─',
        (true, false, false, true) => '└',
        (true, false, true, false) => '┘',
        (false, true, false, true) => '┌',
        (false, true, true, false) => '┐',
        (true, true, false, true) => '├',
        (true, true, true, false) => '┤',
        (false, true, true, true) => '┬',
        (true, false, true, true) => '┴',
        (true, true, true, true) => '┼',
    }
}

// Truncates to fit `width` columns, leaving one column of gap
fn fit(text: &str, width: usize) -> (String, usize) {
    let budget = width.saturating_sub(1);
    let len = text.chars().count();
    if len <= budget {
        return (text.to_string(), width - len);
    }
    let mut cut: String = text.chars().take(budget.saturating_sub(1)).collect();
    cut.push('…');
    (cut, width - budget)
}

fn pad(text: String, padding: usize) -> String {
    format!("{}{}", text, " ".repeat(padding))
}

fn connector_line(connector: &Connector, first_line: bool) -> String {
    if !first_line {
        let centre = if connector.down { '│' } else { ' ' };
        return format!(" {} ", centre);
    }
    let left = if connector.left { '─' } else { ' ' };
    let right = if connector.right { '─' } else { ' ' };
    format!("{}{}{}", left, junction(connector), right)
}

fn node_title_line(node: &NodeCell, style: &TextStyle, width: usize) -> String {
    let indicator = if node.is_complete() { CHECK } else { SPINNER };
    let label = if node.title.is_empty() {
        node.thought.as_str()
    } else {
        node.title.as_str()
    };
    let (text, padding) = fit(&format!("{} {}", indicator, label), width);
    if !style.color {
        return pad(text, padding);
    }
    // indicator is always a single char followed by a space
    let rest: String = text.chars().skip(2).collect();
    let indicator = if node.is_complete() {
        indicator.green().to_string()
    } else {
        indicator.yellow().to_string()
    };
    pad(format!("{} {}", indicator, rest.as_str().bold()), padding)
}

fn node_badge_line(
    node: &NodeCell,
    registry: &ToolRegistry,
    style: &TextStyle,
    width: usize,
) -> String {
    match registry.badge_for(node) {
        Some(badge) => {
            let (text, padding) = fit(&format!("  {} {}", badge.kind.glyph(), badge.label), width);
            if style.color {
                pad(text.as_str().cyan().to_string(), padding)
            } else {
                pad(text, padding)
            }
        }
        None => " ".repeat(width),
    }
}

/// Renders the grid as box-drawing text, one or two lines per grid row
pub fn render_text(grid: &Grid, registry: &ToolRegistry, style: &TextStyle) -> String {
    let width = style.node_width.max(MIN_NODE_WIDTH);
    let mut out = String::new();

    for row in &grid.rows {
        let has_badge = row
            .iter()
            .flatten()
            .filter_map(Cell::as_node)
            .any(|node| registry.badge_for(node).is_some());
        let line_count = if has_badge { 2 } else { 1 };

        for line in 0..line_count {
            let mut text = String::new();
            for (col, cell) in row.iter().enumerate() {
                let rendered = match cell {
                    Some(Cell::Connector(connector)) => connector_line(connector, line == 0),
                    Some(Cell::Node(node)) if line == 0 => node_title_line(node, style, width),
                    Some(Cell::Node(node)) => node_badge_line(node, registry, style, width),
                    None if col % 2 == 0 => " ".repeat(CONNECTOR_WIDTH),
                    None => " ".repeat(width),
                };
                text.push_str(&rendered);
            }
            out.push_str(text.trim_end());
            out.push('\n');
        }
    }
    out
}

// --- HTML rendering --- //

/// CSS column template: narrow connector columns, wide node columns
pub fn grid_template(total_columns: usize) -> String {
    (0..total_columns)
        .map(|i| if i % 2 == 0 { "0.2fr" } else { "1fr" })
        .collect::<Vec<_>>()
        .join(" ")
}

const RESULT_PREVIEW_CHARS: usize = 1000;

fn node_tooltip(node: &NodeCell) -> String {
    let mut lines = vec![
        if node.title.is_empty() {
            "Subtask".to_string()
        } else {
            node.title.clone()
        },
        format!("Thought: {}", node.thought),
    ];
    if let Some(tool_use) = &node.tool_use {
        lines.push(format!(
            "Tool Name: {}",
            tool_use.tool_name.as_deref().unwrap_or("")
        ));
        if let Some(parameters) = &tool_use.parameters {
            lines.push(format!("Parameters: {}", describe_parameters(parameters)));
        }
        let preview: String = tool_use
            .tool_result
            .as_ref()
            .map(describe_parameters)
            .unwrap_or_default()
            .chars()
            .take(RESULT_PREVIEW_CHARS)
            .collect();
        lines.push(format!("Tool Result Preview: {}...", preview));
    }
    lines.push(format!(
        "Subtasks: {}",
        if node.subtask_count > 0 {
            node.subtask_count.to_string()
        } else {
            "None".to_string()
        }
    ));
    let conclusion = if node.tool_use.is_some() {
        "Tool Use"
    } else {
        node.conclusion.as_deref().unwrap_or("")
    };
    lines.push(format!("Conclusion: {}", conclusion));
    lines.join("\n")
}

fn push_node_html(html: &mut String, node: &NodeCell, registry: &ToolRegistry) {
    let label = if node.title.is_empty() {
        &node.thought
    } else {
        &node.title
    };
    let state = if node.is_complete() { "complete" } else { "pending" };
    let _ = write!(
        html,
        "<div class='cell node {}' title=\"{}\"><div class='node-title'>{}</div>",
        state,
        html_escape::encode_double_quoted_attribute(&node_tooltip(node)),
        html_escape::encode_text(label)
    );

    if let Some(badge) = registry.badge_for(node) {
        let _ = write!(
            html,
            "<div class='tool-badge {}'><span class='tool-icon'>{}</span><span class='tool-label'>{}</span></div>",
            badge.kind.css_class(),
            badge.kind.glyph(),
            html_escape::encode_text(badge.label)
        );
    }

    html.push_str("<div class='node-status'>");
    match node.conclusion.as_deref().filter(|c| !c.is_empty()) {
        Some(conclusion) => {
            let _ = write!(
                html,
                "<span class='conclusion'>{}</span>",
                html_escape::encode_text(conclusion)
            );
        }
        None if node.is_complete() => {
            let _ = write!(html, "<span class='check'>{}</span>", CHECK);
        }
        None => html.push_str("<span class='spinner'></span>"),
    }
    html.push_str("</div></div>");
}

fn push_connector_html(html: &mut String, connector: &Connector) {
    if !connector.is_visible() {
        html.push_str("<div class='cell empty'></div>");
        return;
    }
    fn edge(class: &str, on: bool) -> &str {
        if on {
            class
        } else {
            ""
        }
    }
    // 2x2 quadrants; lines run along the shared quadrant borders
    let _ = write!(
        html,
        "<div class='cell connector'><div class='q {} {}'></div><div class='q {}'></div><div class='q {}'></div><div class='q'></div></div>",
        edge("edge-bottom", connector.left),
        edge("edge-right", connector.up),
        edge("edge-bottom", connector.right),
        edge("edge-right", connector.down),
    );
}

/// Renders the grid as an HTML fragment styled by [`GRID_CSS`]
pub fn render_html(grid: &Grid, registry: &ToolRegistry) -> String {
    let template = grid_template(grid.total_columns);
    let mut html = String::from("<div class='reasoning-grid'>");

    // header bar the spine hangs from
    let _ = write!(
        html,
        "<div class='grid-row grid-header' style='grid-template-columns: {}'><div class='cell connector'><div class='q edge-right'></div><div class='q'></div><div class='q edge-right'></div><div class='q'></div></div></div>",
        template
    );

    for row in &grid.rows {
        let _ = write!(
            html,
            "<div class='grid-row' style='grid-template-columns: {}'>",
            template
        );
        for cell in row {
            match cell {
                None => html.push_str("<div class='cell empty'></div>"),
                Some(Cell::Node(node)) => push_node_html(&mut html, node, registry),
                Some(Cell::Connector(connector)) => push_connector_html(&mut html, connector),
            }
        }
        html.push_str("</div>");
    }

    html.push_str("</div>");
    html
}

/// Stylesheet for [`render_html`] output
pub const GRID_CSS: &str = r#"
        .reasoning-grid { display: flex; flex-direction: column; }
        .grid-row { display: grid; width: 100%; }
        .grid-header { height: 8px; }
        .cell { min-height: 48px; width: 100%; }
        .cell.connector { display: grid; grid-template-columns: 1fr 1fr; grid-template-rows: 1fr 1fr; }
        .grid-header .cell.connector { min-height: 8px; }
        .q { width: 100%; height: 100%; border-color: #4b5563; border-style: solid; border-width: 0; }
        .q.edge-bottom { border-bottom-width: 2px; }
        .q.edge-right { border-right-width: 2px; }
        .cell.node {
            display: flex;
            flex-direction: column;
            justify-content: center;
            min-width: 0;
            margin: 8px 0;
            padding: 8px;
            border: 1px solid #c7d2fe;
            border-radius: 6px;
            background: #f5f7ff;
            font-size: 12px;
            cursor: default;
        }
        .node-title { font-weight: bold; white-space: nowrap; overflow: hidden; text-overflow: ellipsis; margin-bottom: 4px; }
        .tool-badge { display: flex; gap: 4px; align-items: center; padding: 2px 4px; margin-bottom: 4px; border: 1px solid #c7d2fe; border-radius: 6px; background: #e0e7ff; }
        .tool-label { font-weight: 500; }
        .node-status { white-space: nowrap; overflow: hidden; text-overflow: ellipsis; }
        .check { color: #27ae60; }
        .spinner {
            display: inline-block;
            width: 10px;
            height: 10px;
            border: 2px solid #95a5a6;
            border-top-color: transparent;
            border-radius: 50%;
            animation: spin 1s linear infinite;
        }
        @keyframes spin { to { transform: rotate(360deg); } }
"#;
