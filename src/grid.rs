//! Grid cell types produced by the layout engine
//!
//! Even columns hold connectors, odd columns hold nodes. A cell is either
//! empty (`None`), a node or a connector; the variant is carried explicitly in
//! the serialized `kind` field.

use serde::{Deserialize, Serialize};

use crate::models::{Task, ToolUse};

/// Projection of a task with its subtasks reduced to a count
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCell {
    pub thought: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use: Option<ToolUse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    pub subtask_count: usize,
}

impl NodeCell {
    /// Builds the node for a task. The count is always the task's true number
    /// of subtasks, even when the layout does not expand them.
    pub fn from_task(task: &Task) -> Self {
        Self {
            thought: task.thought.clone().unwrap_or_default(),
            title: task.label().to_string(),
            tool_use: task.tool_use.clone(),
            conclusion: task.conclusion.clone(),
            subtask_count: task.subtasks.len(),
        }
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.tool_use
            .as_ref()
            .and_then(|t| t.tool_name.as_deref())
            .filter(|name| !name.is_empty())
    }

    /// Finished nodes show a check mark, everything else a spinner
    pub fn is_complete(&self) -> bool {
        self.conclusion.as_deref().is_some_and(|c| !c.is_empty())
            || self.tool_use.as_ref().is_some_and(ToolUse::has_result)
    }
}

/// The four line segments a connector cell may draw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connector {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl Connector {
    /// `{left, right}`: a single child straight across
    pub const STRAIGHT: Connector = Connector {
        up: false,
        down: false,
        left: true,
        right: true,
    };
    /// `{left, right, down}`: first of several children
    pub const FIRST_BRANCH: Connector = Connector {
        up: false,
        down: true,
        left: true,
        right: true,
    };
    /// `{up, right, down}`: an interior child
    pub const MIDDLE_BRANCH: Connector = Connector {
        up: true,
        down: true,
        left: false,
        right: true,
    };
    /// `{up, right}`: last of several children
    pub const LAST_BRANCH: Connector = Connector {
        up: true,
        down: false,
        left: false,
        right: true,
    };
    /// `{up, down}`: a vertical pass-through
    pub const VERTICAL: Connector = Connector {
        up: true,
        down: true,
        left: false,
        right: false,
    };

    /// Returns true if at least one segment is drawn
    pub fn is_visible(&self) -> bool {
        self.up || self.down || self.left || self.right
    }
}

/// A non-empty grid cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Cell {
    Node(NodeCell),
    Connector(Connector),
}

impl Cell {
    pub fn as_node(&self) -> Option<&NodeCell> {
        match self {
            Cell::Node(node) => Some(node),
            Cell::Connector(_) => None,
        }
    }

    pub fn as_connector(&self) -> Option<&Connector> {
        match self {
            Cell::Connector(connector) => Some(connector),
            Cell::Node(_) => None,
        }
    }
}

/// One grid row, always `total_columns` wide
pub type Row = Vec<Option<Cell>>;

/// Allocates a fresh empty row
pub fn empty_row(total_columns: usize) -> Row {
    vec![None; total_columns]
}

/// A laid-out reasoning forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grid {
    #[serde(rename = "grid")]
    pub rows: Vec<Row>,
    pub total_columns: usize,
    #[serde(default)]
    pub node_columns: usize,
}

impl Grid {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns the cell at the given position, `None` if empty or out of range
    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.rows.get(row).and_then(|r| r.get(col)).and_then(Option::as_ref)
    }

    pub fn node(&self, row: usize, col: usize) -> Option<&NodeCell> {
        self.cell(row, col).and_then(Cell::as_node)
    }

    pub fn connector(&self, row: usize, col: usize) -> Option<&Connector> {
        self.cell(row, col).and_then(Cell::as_connector)
    }

    /// Iterates over every node together with its position
    pub fn nodes(&self) -> impl Iterator<Item = (usize, usize, &NodeCell)> {
        self.rows.iter().enumerate().flat_map(|(r, row)| {
            row.iter()
                .enumerate()
                .filter_map(move |(c, cell)| cell.as_ref().and_then(Cell::as_node).map(|n| (r, c, n)))
        })
    }

    /// Iterates over every connector together with its position
    pub fn connectors(&self) -> impl Iterator<Item = (usize, usize, &Connector)> {
        self.rows.iter().enumerate().flat_map(|(r, row)| {
            row.iter().enumerate().filter_map(move |(c, cell)| {
                cell.as_ref().and_then(Cell::as_connector).map(|k| (r, c, k))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cells_serialize_with_kind() {
        let node = Cell::Node(NodeCell {
            thought: String::new(),
            title: "Plan".to_string(),
            tool_use: None,
            conclusion: None,
            subtask_count: 2,
        });
        assert_eq!(
            serde_json::to_value(&node).unwrap(),
            json!({"kind": "node", "thought": "", "title": "Plan", "subtaskCount": 2})
        );

        let connector = Cell::Connector(Connector::STRAIGHT);
        assert_eq!(
            serde_json::to_value(&connector).unwrap(),
            json!({"kind": "connector", "up": false, "down": false, "left": true, "right": true})
        );
    }

    #[test]
    fn test_grid_serializes_rows_as_grid() {
        let mut row = empty_row(6);
        row[0] = Some(Cell::Connector(Connector::VERTICAL));
        let grid = Grid {
            rows: vec![row],
            total_columns: 6,
            node_columns: 3,
        };
        let value = serde_json::to_value(&grid).unwrap();
        assert_eq!(value["totalColumns"], json!(6));
        assert_eq!(value["grid"][0][1], json!(null));
        assert_eq!(value["grid"][0][0]["kind"], json!("connector"));

        let back: Grid = serde_json::from_value(value).unwrap();
        assert_eq!(back, grid);
    }

    #[test]
    fn test_node_from_task() {
        let task = Task::new("why is the sky blue")
            .with_subtask(Task::new("a"))
            .with_subtask(Task::new("b"));
        let node = NodeCell::from_task(&task);
        assert_eq!(node.title, "why is the sky blue");
        assert_eq!(node.subtask_count, 2);
        assert!(!node.is_complete());
        assert_eq!(node.tool_name(), None);
    }

    #[test]
    fn test_accessors() {
        let mut row = empty_row(6);
        row[1] = Some(Cell::Node(NodeCell::default()));
        row[2] = Some(Cell::Connector(Connector::LAST_BRANCH));
        let grid = Grid {
            rows: vec![row],
            total_columns: 6,
            node_columns: 3,
        };
        assert!(grid.node(0, 1).is_some());
        assert!(grid.connector(0, 1).is_none());
        assert_eq!(grid.connector(0, 2), Some(&Connector::LAST_BRANCH));
        assert!(grid.cell(3, 0).is_none());
        assert_eq!(grid.nodes().count(), 1);
        assert_eq!(grid.connectors().count(), 1);
    }
}
