//! Grid layout engine
//!
//! Maps an ordered reasoning forest onto a [`Grid`]. Layout is a pure function
//! of the forest: every call allocates fresh rows and nothing is carried over
//! between calls, so it is safe to rerun on every streaming tick.
//!
//! Placement rules:
//! - a task at depth `d` sits in column `d * 2 + 1`, its connector to the
//!   parent in column `d * 2`
//! - the number of node columns is picked from the forest's maximum depth and
//!   capped at five; tasks in the last node column are drawn as leaves
//! - a parent shares the first row of its first child and gets a connector in
//!   every child row that starts a child node
//! - all roots hang off a spine in column 0, and gaps left in deeper connector
//!   columns are bridged with vertical pass-throughs

use crate::grid::{empty_row, Cell, Connector, Grid, NodeCell, Row};
use crate::models::Task;

/// Never lay out more node columns than this
pub const MAX_NODE_COLUMNS: usize = 5;

/// Returns the deepest subtask nesting in the forest; roots are depth 0
pub fn max_depth(forest: &[Task]) -> usize {
    fn visit(task: &Task, depth: usize) -> usize {
        task.subtasks
            .iter()
            .map(|child| visit(child, depth + 1))
            .fold(depth, usize::max)
    }

    forest.iter().map(|task| visit(task, 0)).max().unwrap_or(0)
}

/// Number of node columns used for a forest of the given depth
pub fn node_columns_for_depth(depth: usize) -> usize {
    match depth {
        0..=2 => 3,
        3 => 4,
        _ => MAX_NODE_COLUMNS,
    }
}

/// Lays out the forest, or returns `None` when there is nothing to render
pub fn layout(forest: &[Task]) -> Option<Grid> {
    if forest.is_empty() {
        return None;
    }

    let node_columns = node_columns_for_depth(max_depth(forest));
    let total_columns = node_columns * 2;
    let budget = Budget {
        node_columns,
        total_columns,
    };

    let mut rows: Vec<Row> = forest
        .iter()
        .flat_map(|task| build_rows(task, 0, &budget))
        .collect();

    stitch_spine(&mut rows);
    smooth_connectors(&mut rows, total_columns);

    tracing::trace!(
        rows = rows.len(),
        total_columns,
        "laid out reasoning forest"
    );

    Some(Grid {
        rows,
        total_columns,
        node_columns,
    })
}

struct Budget {
    node_columns: usize,
    total_columns: usize,
}

// Connector drawn to the right of a parent for the first row of child `index`
fn branch_connector(index: usize, count: usize) -> Connector {
    if count == 1 {
        Connector::STRAIGHT
    } else if index == 0 {
        Connector::FIRST_BRANCH
    } else if index == count - 1 {
        Connector::LAST_BRANCH
    } else {
        Connector::MIDDLE_BRANCH
    }
}

/// Builds the block of rows for one task and all of its laid-out descendants
fn build_rows(task: &Task, depth: usize, budget: &Budget) -> Vec<Row> {
    let col = depth * 2 + 1;
    let is_leaf = depth + 1 >= budget.node_columns || task.subtasks.is_empty();

    if is_leaf {
        let mut row = empty_row(budget.total_columns);
        row[col] = Some(Cell::Node(NodeCell::from_task(task)));
        return vec![row];
    }

    let count = task.subtasks.len();
    let mut rows = Vec::new();
    for (i, child) in task.subtasks.iter().enumerate() {
        // child rows are empty up to col + 1, so they can be filled in place
        for (j, mut row) in build_rows(child, depth + 1, budget).into_iter().enumerate() {
            if i == 0 && j == 0 {
                row[col] = Some(Cell::Node(NodeCell::from_task(task)));
            }
            if row[col + 2].is_some() {
                row[col + 1] = Some(Cell::Connector(branch_connector(i, count)));
            }
            rows.push(row);
        }
    }
    rows
}

/// Draws the column 0 trunk joining every root row
pub fn stitch_spine(rows: &mut [Row]) {
    let root_rows: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| matches!(row.get(1), Some(Some(Cell::Node(_)))))
        .map(|(index, _)| index)
        .collect();

    let Some(&last) = root_rows.last() else {
        return;
    };

    for (index, row) in rows.iter_mut().enumerate().take(last + 1) {
        let connector = if index == last {
            Connector {
                up: true,
                right: true,
                ..Connector::default()
            }
        } else if root_rows.contains(&index) {
            Connector {
                up: true,
                down: true,
                right: true,
                left: false,
            }
        } else {
            Connector::VERTICAL
        };
        row[0] = Some(Cell::Connector(connector));
    }
}

/// Bridges vertical gaps in connector columns 2 and up.
///
/// A row is filled with `{up, down}` when the cell above it opens downward and
/// both the cell itself and its right neighbour are empty. Rows are visited top
/// to bottom so a filled cell can open the row below it. The first and last
/// rows are never filled.
pub fn smooth_connectors(rows: &mut [Row], total_columns: usize) {
    for col in (2..total_columns).step_by(2) {
        for index in 1..rows.len().saturating_sub(1) {
            let opens_down = matches!(
                rows[index - 1].get(col),
                Some(Some(Cell::Connector(Connector { down: true, .. })))
            );
            let current_empty = rows[index].get(col).is_some_and(Option::is_none);
            let right_empty = rows[index].get(col + 1).map_or(true, Option::is_none);

            if opens_down && current_empty && right_empty {
                rows[index][col] = Some(Cell::Connector(Connector::VERTICAL));
            }
        }
    }
}
