//! Redaction filter
//!
//! Replaces the bulky parts of a reasoning tree (tool results and conclusions)
//! with a one-character presence marker, keeping everything the layout needs.

use serde_json::Value;

use crate::models::{ModelResponse, Task, ToolUse};

/// Stands in for a redacted value that was present
pub const PRESENCE_MARKER: &str = "✓";

fn marker(present: bool) -> String {
    if present {
        PRESENCE_MARKER.to_string()
    } else {
        String::new()
    }
}

/// Returns a redacted copy of the response; the input is left untouched
pub fn redact_response(response: &ModelResponse) -> ModelResponse {
    ModelResponse {
        reasoning: response.reasoning.iter().map(redact_task).collect(),
        answer: response.answer.clone(),
    }
}

/// Redacts one task and, recursively, all of its subtasks
pub fn redact_task(task: &Task) -> Task {
    Task {
        thought: task.thought.clone(),
        title: task.title.clone(),
        tool_use: task.tool_use.as_ref().map(|tool_use| ToolUse {
            tool_name: tool_use.tool_name.clone(),
            parameters: tool_use.parameters.clone(),
            tool_result: Some(Value::String(marker(tool_use.has_result()))),
        }),
        subtasks: task.subtasks.iter().map(redact_task).collect(),
        conclusion: Some(marker(task.conclusion.as_deref().is_some_and(|c| !c.is_empty()))),
    }
}

/// Renders tool parameters for display.
///
/// A value that cannot be rendered is replaced by a description of the failure
/// so one bad field never aborts the surrounding pass.
pub fn describe_parameters(parameters: &Value) -> String {
    serde_json::to_string_pretty(parameters).unwrap_or_else(|e| format!("Error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn search(result: Option<Value>) -> ToolUse {
        ToolUse {
            tool_name: Some("SearchTool".to_string()),
            parameters: Some(json!({"query": "diffusion survey"})),
            tool_result: result,
        }
    }

    #[test]
    fn test_tool_result_becomes_marker() {
        let task = Task::new("find surveys")
            .with_title("Surveys")
            .with_tool_use(search(Some(json!({"results": ["a very long page"]}))));

        let redacted = redact_task(&task);
        let tool_use = redacted.tool_use.unwrap();
        assert_eq!(tool_use.tool_result, Some(json!(PRESENCE_MARKER)));
        assert_eq!(tool_use.tool_name.as_deref(), Some("SearchTool"));
        assert_eq!(tool_use.parameters, Some(json!({"query": "diffusion survey"})));
        assert_eq!(redacted.title.as_deref(), Some("Surveys"));
        assert_eq!(redacted.thought.as_deref(), Some("find surveys"));
    }

    #[test]
    fn test_falsy_values_become_empty() {
        let task = Task::new("pending").with_tool_use(search(Some(json!(""))));
        let redacted = redact_task(&task);
        assert_eq!(redacted.tool_use.unwrap().tool_result, Some(json!("")));
        assert_eq!(redacted.conclusion.as_deref(), Some(""));

        let unresolved = redact_task(&Task::new("pending").with_tool_use(search(None)));
        assert_eq!(unresolved.tool_use.unwrap().tool_result, Some(json!("")));
    }

    #[test]
    fn test_conclusion_becomes_marker() {
        let redacted = redact_task(&Task::new("t").with_conclusion("a long summary"));
        assert_eq!(redacted.conclusion.as_deref(), Some(PRESENCE_MARKER));
        assert!(redacted.is_complete());
    }

    #[test]
    fn test_shape_is_preserved_at_every_depth() {
        let deep = Task::new("root")
            .with_subtask(
                Task::new("a")
                    .with_subtask(Task::new("a1").with_conclusion("x"))
                    .with_subtask(Task::new("a2").with_tool_use(search(Some(json!("page"))))),
            )
            .with_subtask(Task::new("b"));
        let response = ModelResponse {
            reasoning: vec![deep.clone(), Task::new("second")],
            answer: "final answer".to_string(),
        };

        let redacted = redact_response(&response);
        assert_eq!(redacted.answer, "final answer");
        assert_eq!(redacted.reasoning.len(), 2);

        fn assert_same_shape(before: &Task, after: &Task) {
            assert_eq!(before.subtasks.len(), after.subtasks.len());
            assert_eq!(before.is_complete(), after.is_complete());
            for (b, a) in before.subtasks.iter().zip(&after.subtasks) {
                assert_same_shape(b, a);
            }
        }
        assert_same_shape(&deep, &redacted.reasoning[0]);

        let a2 = &redacted.reasoning[0].subtasks[0].subtasks[1];
        assert_eq!(
            a2.tool_use.as_ref().unwrap().tool_result,
            Some(json!(PRESENCE_MARKER))
        );
        // input left untouched
        assert_eq!(response.reasoning[0], deep);
    }

    #[test]
    fn test_describe_parameters() {
        assert_eq!(describe_parameters(&json!({"q": 1})), "{\n  \"q\": 1\n}");
    }
}
