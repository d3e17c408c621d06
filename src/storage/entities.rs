use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type EntityId = u64;

/// One field of the output row. Columns of a profile are totally ordered by `sort_order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    /// Advisory format hint, for example `YYYYMMDDTHHMM` or `text`.
    pub format: String,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Vocabulary entry offered to the model as a hint for a single column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnValue {
    pub id: EntityId,
    pub column_id: EntityId,
    pub value: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User defined text macro. `command` includes the leading slash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlashCommand {
    pub id: EntityId,
    pub command: String,
    pub expansion: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub element_delimiter: String,
    pub row_end_delimiter: String,
    pub global_context: String,
    pub updated_at: DateTime<Utc>,
}

/// Everything stored for a single profile. This is the document persisted by
/// [SettingsStore](super::settings_store::SettingsStore) and the snapshot handed to every
/// processing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub settings: UserSettings,
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub column_values: Vec<ColumnValue>,
    #[serde(default)]
    pub slash_commands: Vec<SlashCommand>,
    #[serde(default)]
    pub next_id: EntityId,
}

impl UserProfile {
    pub fn allocate_id(&mut self) -> EntityId {
        self.next_id += 1;
        self.next_id
    }

    /// Columns sorted by sort order.
    pub fn ordered_columns(&self) -> Vec<ColumnDefinition> {
        let mut columns = self.columns.clone();
        columns.sort_by_key(|v| v.sort_order);
        columns
    }

    pub fn values_for(&self, column_id: EntityId) -> impl Iterator<Item = &ColumnValue> {
        self.column_values
            .iter()
            .filter(move |v| v.column_id == column_id)
    }
}

/// Record of a successful run. Stored one per line in daily history files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub original_input: String,
    pub formatted_output: String,
    pub explanation: String,
    pub timestamp: DateTime<Utc>,
}

pub const EXPORT_VERSION: &str = "1.0";

/// Portable form of a profile. Ids are dropped, column values are keyed by column name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedSettings {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub settings: SettingsFormData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsFormData {
    pub element_delimiter: String,
    pub row_end_delimiter: String,
    pub global_context: String,
    pub columns: Vec<ExportedColumn>,
    #[serde(default)]
    pub column_values: BTreeMap<String, Vec<ExportedValue>>,
    #[serde(default)]
    pub slash_commands: Vec<ExportedCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedColumn {
    pub name: String,
    pub description: String,
    pub format: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedValue {
    pub value: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedCommand {
    pub command: String,
    pub expansion: String,
    pub description: String,
}
