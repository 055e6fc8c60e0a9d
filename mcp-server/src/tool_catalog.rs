//! Tool definitions exposed on the `tools/list` boundary.

use mcp_types::Tool;
use mcp_types::ToolInputSchema;
use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use serde::Deserialize;

/// Arguments for `execute_stateless`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub(crate) struct ExecuteStatelessParam {
    /// Source code to validate and run in a one-shot session.
    pub code: String,
}

/// Arguments for `execute_in_session`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub(crate) struct ExecuteInSessionParam {
    /// Id returned by `create_session`.
    pub session_id: String,
    /// Source code to validate and run in the named session.
    pub code: String,
}

/// Arguments for `delete_session`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub(crate) struct DeleteSessionParam {
    /// Id returned by `create_session`.
    pub session_id: String,
}

/// The fixed catalog. Session tools are omitted when sessions are
/// disabled in the configuration.
pub(crate) fn tool_catalog(sessions_enabled: bool) -> Vec<Tool> {
    let mut tools = vec![tool_for::<ExecuteStatelessParam>(
        "execute_stateless",
        "Validate and run a code snippet in a one-shot sandbox session, returning its output.",
    )];
    if sessions_enabled {
        tools.push(argless_tool(
            "create_session",
            "Create a persistent sandbox session and return its id.",
        ));
        tools.push(tool_for::<ExecuteInSessionParam>(
            "execute_in_session",
            "Validate and run a code snippet in an existing session, keeping its state.",
        ));
        tools.push(tool_for::<DeleteSessionParam>(
            "delete_session",
            "Destroy a session and its interpreter state.",
        ));
        tools.push(argless_tool(
            "list_sessions",
            "List the ids of all active sessions.",
        ));
    }
    tools.push(argless_tool(
        "show_interface",
        "Return the reference for the sandbox capability surface.",
    ));
    tools
}

fn tool_for<T: JsonSchema>(name: &str, description: &str) -> Tool {
    let schema = SchemaSettings::draft2019_09()
        .with(|s| {
            s.inline_subschemas = true;
            s.option_add_null_type = false
        })
        .into_generator()
        .into_root_schema_for::<T>();
    let schema_value = serde_json::to_value(&schema).unwrap_or_else(|e| {
        panic!("tool schema for {name} should serialize to JSON: {e}");
    });
    let input_schema = serde_json::from_value::<ToolInputSchema>(schema_value)
        .unwrap_or_else(|e| {
            panic!("failed to create Tool from schema for {name}: {e}");
        });
    Tool {
        name: name.to_string(),
        input_schema,
        description: Some(description.to_string()),
        annotations: None,
    }
}

fn argless_tool(name: &str, description: &str) -> Tool {
    Tool {
        name: name.to_string(),
        input_schema: ToolInputSchema {
            r#type: "object".to_string(),
            properties: None,
            required: None,
        },
        description: Some(description.to_string()),
        annotations: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_catalog_lists_all_six_tools() {
        let names: Vec<String> = tool_catalog(true).into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "execute_stateless",
                "create_session",
                "execute_in_session",
                "delete_session",
                "list_sessions",
                "show_interface",
            ]
        );
    }

    #[test]
    fn session_tools_are_hidden_when_disabled() {
        let names: Vec<String> = tool_catalog(false).into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["execute_stateless", "show_interface"]);
    }

    #[test]
    fn schemas_mark_required_arguments() {
        let tools = tool_catalog(true);
        let execute = tools
            .iter()
            .find(|t| t.name == "execute_in_session")
            .and_then(|t| t.input_schema.required.as_ref())
            .cloned()
            .unwrap_or_default();
        assert!(execute.contains(&"session_id".to_string()));
        assert!(execute.contains(&"code".to_string()));
    }
}
