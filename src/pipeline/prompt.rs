//! Builds the text sent to the model and the tool schema its answer has to follow.

use std::fmt::Write;

use serde_json::{json, Value};

use crate::{
    model::ToolDefinition,
    storage::entities::{ColumnDefinition, ColumnValue, UserSettings},
};

pub const TOOL_NAME: &str = "record_time_entries";

const INSTRUCTIONS: &str = "\
**INSTRUCTIONS:**
1. Parse the input to identify distinct time blocks and activities
2. Map activities to appropriate project codes using the possible values provided
3. Make reasonable assumptions for missing information (document these in the assumptions array)
4. Handle conflicts by prioritizing meetings over regular work (document in conflicts array)
5. Use default work hours (9:00-17:00) unless specified
6. For uncertain mappings, document them in the uncertainMappings array
7. Generate time entries as objects with column names as keys and values as strings

Return structured data with:
- entries: Array of objects where each key is a column name and value is the formatted entry value
- assumptions: Array of strings describing assumptions made
- conflicts: Array of strings describing conflicts resolved
- uncertainMappings: Array of strings describing uncertain mappings
- summary: Brief summary of processing results";

fn describe_column(column: &ColumnDefinition, values: &[ColumnValue]) -> String {
    let mut text = format!(
        "**{}** ({})\nFormat: {}",
        column.name, column.description, column.format
    );
    let possible = values
        .iter()
        .filter(|v| v.column_id == column.id)
        .map(|v| format!("\"{}\" ({})", v.value, v.description))
        .collect::<Vec<_>>();
    if !possible.is_empty() {
        let _ = write!(text, "\nPossible values: {}", possible.join(", "));
    }
    text
}

/// Assembles the full prompt. Columns are listed in sort order, each with the values that
/// belong to it. `input` is expected to be expanded already.
pub fn build_prompt(
    input: &str,
    settings: &UserSettings,
    columns: &[ColumnDefinition],
    values: &[ColumnValue],
) -> String {
    let mut ordered = columns.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|v| v.sort_order);

    let column_info = ordered
        .into_iter()
        .map(|column| describe_column(column, values))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are a time tracking assistant that converts natural language work descriptions into structured time entries.

**GLOBAL CONTEXT:**
{}

**COLUMN DEFINITIONS:**
{column_info}

**INPUT TO PROCESS:**
\"{input}\"

{INSTRUCTIONS}",
        settings.global_context
    )
}

/// JSON Schema of [StructuredResponse](crate::model::StructuredResponse).
pub fn response_schema() -> Value {
    let string_list = |description: &str| {
        json!({
            "type": "array",
            "items": {"type": "string"},
            "description": description
        })
    };

    json!({
        "type": "object",
        "properties": {
            "entries": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": {"type": "string"}
                },
                "description": "Array of time entries with column names as keys"
            },
            "assumptions": string_list("List of assumptions made during processing"),
            "conflicts": string_list("List of conflicts resolved"),
            "uncertainMappings": string_list("List of uncertain mappings made"),
            "summary": {
                "type": "string",
                "description": "Brief summary of what was processed"
            }
        },
        "required": ["entries", "assumptions", "conflicts", "uncertainMappings", "summary"]
    })
}

pub fn time_entry_tool() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.into(),
        description: "Record the time entries extracted from the work description together \
                      with the assumptions, conflicts and uncertain mappings behind them."
            .into(),
        parameters: response_schema(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::storage::entities::{ColumnDefinition, ColumnValue, UserSettings};

    use super::{build_prompt, response_schema, time_entry_tool, TOOL_NAME};

    fn column(id: u64, name: &str, format: &str, sort_order: i64) -> ColumnDefinition {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        ColumnDefinition {
            id,
            name: name.into(),
            description: format!("{name} of the block"),
            format: format.into(),
            sort_order,
            created_at: now,
            updated_at: now,
        }
    }

    fn value(column_id: u64, value: &str, description: &str) -> ColumnValue {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        ColumnValue {
            id: 100,
            column_id,
            value: value.into(),
            description: description.into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn settings() -> UserSettings {
        UserSettings {
            element_delimiter: ",".into(),
            row_end_delimiter: ";".into(),
            global_context: "Work day is 8:00-16:00".into(),
            updated_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn prompt_lists_columns_in_sort_order_with_values() {
        let columns = [
            column(2, "Project Code", "text", 2),
            column(1, "Start Time", "YYYYMMDDTHHMM", 1),
        ];
        let values = [
            value(2, "DEV", "Development"),
            value(2, "MEET", "Meetings"),
        ];
        let prompt = build_prompt("worked on stuff", &settings(), &columns, &values);

        let start = prompt.find("**Start Time**").unwrap();
        let project = prompt.find("**Project Code**").unwrap();
        assert!(start < project);
        assert!(prompt.contains(
            "**Project Code** (Project Code of the block)\nFormat: text\n\
             Possible values: \"DEV\" (Development), \"MEET\" (Meetings)"
        ));
        assert!(prompt
            .contains("**Start Time** (Start Time of the block)\nFormat: YYYYMMDDTHHMM\n\n"));
    }

    #[test]
    fn prompt_contains_context_input_and_instructions() {
        let prompt = build_prompt("meeting 10-11", &settings(), &[], &[]);
        assert!(prompt.contains("**GLOBAL CONTEXT:**\nWork day is 8:00-16:00"));
        assert!(prompt.contains("**INPUT TO PROCESS:**\n\"meeting 10-11\""));
        assert!(prompt.contains("prioritizing meetings over regular work"));
        assert!(prompt.contains("(9:00-17:00)"));
    }

    #[test]
    fn tool_carries_schema() {
        let tool = time_entry_tool();
        assert_eq!(tool.name, TOOL_NAME);
        assert_eq!(tool.parameters, response_schema());
        assert_eq!(
            tool.parameters["properties"]["entries"]["items"]["additionalProperties"]["type"],
            "string"
        );
        assert_eq!(tool.parameters["required"].as_array().unwrap().len(), 5);
    }
}
