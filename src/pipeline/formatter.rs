//! Turns the structured model response into delimited rows and a markdown explanation.

use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;

use crate::{
    model::{StructuredResponse, TimeEntry},
    storage::entities::{ColumnDefinition, UserSettings},
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormattedOutput {
    pub formatted_output: String,
    pub explanation: String,
    /// Values that don't look like their column's format. Advisory only.
    pub format_warnings: Vec<String>,
}

static STAMP_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{8}T[0-9]{4}$").expect("Stamp pattern is valid"));
static CLOCK_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([01]?[0-9]|2[0-3]):[0-5][0-9]$").expect("Clock pattern is valid")
});
static DATE_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").expect("Date pattern is valid"));

/// Checks a value against one of the known format hints. Unknown hints accept anything.
pub fn validate_format(value: &str, format: &str) -> bool {
    match format.trim().to_uppercase().as_str() {
        "YYYYMMDDTHHMM" => STAMP_FORMAT.is_match(value),
        "HH:MM" => CLOCK_FORMAT.is_match(value),
        "YYYY-MM-DD" => DATE_FORMAT.is_match(value),
        _ => true,
    }
}

fn sorted(columns: &[ColumnDefinition]) -> Vec<&ColumnDefinition> {
    let mut columns = columns.iter().collect::<Vec<_>>();
    columns.sort_by_key(|v| v.sort_order);
    columns
}

fn format_row(entry: &TimeEntry, columns: &[&ColumnDefinition], delimiter: &str) -> String {
    columns
        .iter()
        .map(|column| entry.get(&column.name).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(delimiter)
}

fn push_section(explanation: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    explanation.push_str(title);
    explanation.push('\n');
    for item in items {
        explanation.push_str("- ");
        explanation.push_str(item);
        explanation.push('\n');
    }
    explanation.push('\n');
}

/// Values of an entry in column order. Fields the model added on its own come last.
fn restate(entry: &TimeEntry, columns: &[&ColumnDefinition]) -> String {
    let mut values = columns
        .iter()
        .filter_map(|column| entry.get(&column.name))
        .collect::<Vec<_>>();

    let mut extra = entry
        .0
        .iter()
        .filter(|(key, _)| !columns.iter().any(|column| &column.name == *key))
        .collect::<Vec<_>>();
    extra.sort_by(|a, b| a.0.cmp(b.0));
    values.extend(extra.into_iter().map(|(_, value)| value.as_str()));

    values.join(" | ")
}

fn explain(response: &StructuredResponse, columns: &[&ColumnDefinition]) -> String {
    let mut explanation = format!(
        "## Processing Summary\n{}\n\n**✅ Successful Processing:**\n- Generated {} time entries\n\n",
        response.summary,
        response.entries.len()
    );
    push_section(
        &mut explanation,
        "**⚠️ Assumptions Made:**",
        &response.assumptions,
    );
    push_section(
        &mut explanation,
        "**🔀 Conflicts Resolved:**",
        &response.conflicts,
    );
    push_section(
        &mut explanation,
        "**❓ Uncertain Mappings:**",
        &response.uncertain_mappings,
    );

    explanation.push_str("**📝 Time Entries Generated:**\n");
    let restated = response
        .entries
        .iter()
        .enumerate()
        .map(|(i, entry)| format!("- Entry {}: {}", i + 1, restate(entry, columns)))
        .collect::<Vec<_>>()
        .join("\n");
    explanation.push_str(&restated);
    explanation
}

fn check_formats(response: &StructuredResponse, columns: &[&ColumnDefinition]) -> Vec<String> {
    let mut warnings = vec![];
    for (i, entry) in response.entries.iter().enumerate() {
        for column in columns {
            let Some(value) = entry.get(&column.name).filter(|v| !v.is_empty()) else {
                continue;
            };
            if !validate_format(value, &column.format) {
                warnings.push(format!(
                    "Entry {}: {} value {value:?} doesn't match format {}",
                    i + 1,
                    column.name,
                    column.format
                ));
            }
        }
    }
    warnings
}

pub fn format_output(
    response: &StructuredResponse,
    settings: &UserSettings,
    columns: &[ColumnDefinition],
) -> FormattedOutput {
    let columns = sorted(columns);

    let rows = response
        .entries
        .iter()
        .map(|entry| format_row(entry, &columns, &settings.element_delimiter))
        .collect::<Vec<_>>();
    let mut formatted_output = rows.join(format!("{}\n", settings.row_end_delimiter).as_str());
    if !rows.is_empty() {
        formatted_output.push_str(&settings.row_end_delimiter);
    }

    FormattedOutput {
        formatted_output,
        explanation: explain(response, &columns),
        format_warnings: check_formats(response, &columns),
    }
}

/// Sample row showing what the current delimiters and column order produce.
pub fn generate_preview_output(
    settings: &UserSettings,
    columns: &[ColumnDefinition],
    sample: Option<&HashMap<String, String>>,
) -> String {
    let default_sample = |name: &str| match name {
        "Start Time" => "20250606T0900",
        "End Time" => "20250606T1100",
        "Project Code" => "DEV",
        "Description" => "Sample development work",
        _ => "VALUE",
    };

    let values = sorted(columns)
        .into_iter()
        .map(|column| match sample {
            Some(sample) => sample
                .get(&column.name)
                .map(String::as_str)
                .filter(|v| !v.is_empty())
                .unwrap_or("VALUE"),
            None => default_sample(&column.name),
        })
        .collect::<Vec<_>>();

    format!(
        "{}{}",
        values.join(settings.element_delimiter.as_str()),
        settings.row_end_delimiter
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{TimeZone, Utc};

    use crate::{
        model::{StructuredResponse, TimeEntry},
        storage::entities::{ColumnDefinition, UserSettings},
    };

    use super::{format_output, generate_preview_output, validate_format};

    fn column(id: u64, name: &str, format: &str, sort_order: i64) -> ColumnDefinition {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        ColumnDefinition {
            id,
            name: name.into(),
            description: String::new(),
            format: format.into(),
            sort_order,
            created_at: now,
            updated_at: now,
        }
    }

    fn settings(element: &str, row_end: &str) -> UserSettings {
        UserSettings {
            element_delimiter: element.into(),
            row_end_delimiter: row_end.into(),
            global_context: String::new(),
            updated_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    fn ab_columns() -> Vec<ColumnDefinition> {
        // Deliberately out of order
        vec![column(2, "B", "text", 2), column(1, "A", "text", 1)]
    }

    #[test]
    fn single_entry() {
        let response = StructuredResponse {
            entries: vec![TimeEntry::from([("A", "x"), ("B", "y")])],
            ..Default::default()
        };
        let output = format_output(&response, &settings(",", ";"), &ab_columns());
        assert_eq!(output.formatted_output, "x,y;");
    }

    #[test]
    fn rows_are_joined_with_row_end_and_newline() {
        let response = StructuredResponse {
            entries: vec![
                TimeEntry::from([("A", "1"), ("B", "2")]),
                TimeEntry::from([("A", "3"), ("B", "4")]),
            ],
            ..Default::default()
        };
        let output = format_output(&response, &settings("\t", " END"), &ab_columns());
        assert_eq!(output.formatted_output, "1\t2 END\n3\t4 END");
    }

    #[test]
    fn no_entries_is_empty_output() {
        let output = format_output(
            &StructuredResponse::default(),
            &settings(",", ";"),
            &ab_columns(),
        );
        assert_eq!(output.formatted_output, "");
        assert!(output.explanation.contains("- Generated 0 time entries"));
    }

    #[test]
    fn missing_field_becomes_empty() {
        let response = StructuredResponse {
            entries: vec![TimeEntry::from([("A", "x")])],
            ..Default::default()
        };
        let output = format_output(&response, &settings(",", ";"), &ab_columns());
        assert_eq!(output.formatted_output, "x,;");
    }

    #[test]
    fn explanation_lists_only_present_sections() {
        let response = StructuredResponse {
            entries: vec![TimeEntry::from([("B", "y"), ("A", "x")])],
            assumptions: vec!["Ended at 17:00".into()],
            conflicts: vec![],
            uncertain_mappings: vec!["Client call -> MEET".into()],
            summary: "One block of work".into(),
        };
        let output = format_output(&response, &settings(",", ";"), &ab_columns());
        assert_eq!(
            output.explanation,
            "## Processing Summary\n\
             One block of work\n\
             \n\
             **✅ Successful Processing:**\n\
             - Generated 1 time entries\n\
             \n\
             **⚠️ Assumptions Made:**\n\
             - Ended at 17:00\n\
             \n\
             **❓ Uncertain Mappings:**\n\
             - Client call -> MEET\n\
             \n\
             **📝 Time Entries Generated:**\n\
             - Entry 1: x | y"
        );
    }

    #[test]
    fn unknown_fields_are_restated_but_not_output() {
        let response = StructuredResponse {
            entries: vec![TimeEntry::from([("A", "x"), ("Extra", "z")])],
            ..Default::default()
        };
        let output = format_output(&response, &settings(",", ";"), &ab_columns());
        assert_eq!(output.formatted_output, "x,;");
        assert!(output.explanation.ends_with("- Entry 1: x | z"));
    }

    #[test]
    fn format_mismatches_are_warnings_only() {
        let columns = vec![
            column(1, "Start Time", "YYYYMMDDTHHMM", 1),
            column(2, "Day", "YYYY-MM-DD", 2),
        ];
        let response = StructuredResponse {
            entries: vec![TimeEntry::from([("Start Time", "9am"), ("Day", "2025-06-11")])],
            ..Default::default()
        };
        let output = format_output(&response, &settings(",", ";"), &columns);
        assert_eq!(output.formatted_output, "9am,2025-06-11;");
        assert_eq!(output.format_warnings.len(), 1);
        assert!(output.format_warnings[0].contains("Start Time"));
    }

    #[test]
    fn known_formats() {
        assert!(validate_format("20250606T0900", "YYYYMMDDTHHMM"));
        assert!(validate_format("20250606T0900", "yyyymmddthhmm"));
        assert!(!validate_format("2025-06-06 09:00", "YYYYMMDDTHHMM"));
        assert!(validate_format("9:05", "HH:MM"));
        assert!(validate_format("23:59", "HH:MM"));
        assert!(!validate_format("24:00", "HH:MM"));
        assert!(validate_format("2025-06-06", "YYYY-MM-DD"));
        assert!(!validate_format("06/06/2025", "YYYY-MM-DD"));
        assert!(validate_format("anything at all", "text"));
        assert!(validate_format("anything at all", "free form"));
    }

    #[test]
    fn preview_uses_sample_values() {
        let columns = vec![
            column(1, "Start Time", "YYYYMMDDTHHMM", 1),
            column(4, "Description", "text", 4),
            column(3, "Project Code", "text", 3),
            column(5, "Ticket", "text", 5),
        ];
        assert_eq!(
            generate_preview_output(&settings(",", ";"), &columns, None),
            "20250606T0900,DEV,Sample development work,VALUE;"
        );

        let sample = HashMap::from([("Ticket".to_string(), "T-1".to_string())]);
        assert_eq!(
            generate_preview_output(&settings("|", ""), &columns, Some(&sample)),
            "VALUE|VALUE|VALUE|T-1"
        );
    }
}
