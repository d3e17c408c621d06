//! Operations over a [UserProfile]. Everything here is pure, the store only takes care of
//! reading and persisting the document around these calls, so a single call is always
//! written as a whole or not at all.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{
    entities::{
        ColumnDefinition, ColumnValue, EntityId, ExportedColumn, ExportedCommand,
        ExportedSettings, ExportedValue, SettingsFormData, SlashCommand, UserProfile,
        UserSettings, EXPORT_VERSION,
    },
    settings_store::StoreError,
};

pub const DEFAULT_ELEMENT_DELIMITER: &str = ",";
pub const DEFAULT_ROW_END_DELIMITER: &str = ";";
pub const DEFAULT_GLOBAL_CONTEXT: &str =
    "Default work day is 9:00-17:00 unless specified. Breaks are unpaid and should not be tracked.";

#[derive(Debug, Clone, Default)]
pub struct NewColumn {
    pub name: String,
    pub description: String,
    pub format: String,
    /// Appended after the last column when missing.
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ColumnUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub format: Option<String>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct NewValue {
    pub column_id: EntityId,
    pub value: String,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValueUpdate {
    pub value: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewCommand {
    pub command: String,
    pub expansion: String,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct CommandUpdate {
    pub command: Option<String>,
    pub expansion: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub element_delimiter: Option<String>,
    pub row_end_delimiter: Option<String>,
    pub global_context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

fn required(value: &str, field: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        Err(StoreError::Validation(format!("{field} is required")))
    } else {
        Ok(())
    }
}

fn validate_trigger(command: &str) -> Result<(), StoreError> {
    required(command, "Command")?;
    if !command.starts_with('/') || command.len() < 2 {
        return Err(StoreError::Validation(format!(
            "Command {command} must start with '/' followed by a name"
        )));
    }
    if command.chars().any(char::is_whitespace) {
        return Err(StoreError::Validation(format!(
            "Command {command} can't contain whitespace"
        )));
    }
    Ok(())
}

impl UserProfile {
    /// Profile every new user starts with.
    pub fn with_defaults(now: DateTime<Utc>) -> Self {
        let mut profile = UserProfile {
            settings: UserSettings {
                element_delimiter: DEFAULT_ELEMENT_DELIMITER.into(),
                row_end_delimiter: DEFAULT_ROW_END_DELIMITER.into(),
                global_context: DEFAULT_GLOBAL_CONTEXT.into(),
                updated_at: now,
            },
            columns: vec![],
            column_values: vec![],
            slash_commands: vec![],
            next_id: 0,
        };

        let columns = [
            ("Start Time", "When the time entry begins", "YYYYMMDDTHHMM"),
            ("End Time", "When the time entry ends", "YYYYMMDDTHHMM"),
            ("Project Code", "Project identifier or code", "text"),
            ("Description", "Description of work performed", "text"),
        ];
        let mut project_code = None;
        for (index, (name, description, format)) in columns.into_iter().enumerate() {
            let id = profile.allocate_id();
            if name == "Project Code" {
                project_code = Some(id);
            }
            profile.columns.push(ColumnDefinition {
                id,
                name: name.into(),
                description: description.into(),
                format: format.into(),
                sort_order: index as i64 + 1,
                created_at: now,
                updated_at: now,
            });
        }

        if let Some(column_id) = project_code {
            for (value, description) in [
                ("ADMIN", "Administrative tasks"),
                ("MEET", "Meetings and calls"),
                ("DEV", "Development work"),
                ("UNKNOWN", "Unspecified project"),
            ] {
                let id = profile.allocate_id();
                profile.column_values.push(ColumnValue {
                    id,
                    column_id,
                    value: value.into(),
                    description: description.into(),
                    created_at: now,
                    updated_at: now,
                });
            }
        }

        for (command, expansion, description) in [
            ("/break", "Break from 12:00 to 12:30", "Standard lunch break"),
            ("/lunch", "Lunch break from 12:00 to 13:00", "Extended lunch break"),
            ("/meeting", "Team meeting", "Generic team meeting"),
        ] {
            let id = profile.allocate_id();
            profile.slash_commands.push(SlashCommand {
                id,
                command: command.into(),
                expansion: expansion.into(),
                description: description.into(),
                created_at: now,
                updated_at: now,
            });
        }

        profile
    }

    pub fn update_settings(&mut self, update: SettingsUpdate, now: DateTime<Utc>) -> &UserSettings {
        let settings = &mut self.settings;
        if let Some(v) = update.element_delimiter {
            settings.element_delimiter = v;
        }
        if let Some(v) = update.row_end_delimiter {
            settings.row_end_delimiter = v;
        }
        if let Some(v) = update.global_context {
            settings.global_context = v;
        }
        settings.updated_at = now;
        settings
    }

    fn column_index(&self, id: EntityId) -> Result<usize, StoreError> {
        self.columns
            .iter()
            .position(|v| v.id == id)
            .ok_or(StoreError::NotFound { kind: "column", id })
    }

    fn ensure_free_sort_order(
        &self,
        sort_order: i64,
        ignore: Option<EntityId>,
    ) -> Result<(), StoreError> {
        if self
            .columns
            .iter()
            .any(|v| v.sort_order == sort_order && Some(v.id) != ignore)
        {
            return Err(StoreError::Validation(format!(
                "Sort order {sort_order} is already used by another column"
            )));
        }
        Ok(())
    }

    fn ensure_free_column_name(
        &self,
        name: &str,
        ignore: Option<EntityId>,
    ) -> Result<(), StoreError> {
        if self
            .columns
            .iter()
            .any(|v| v.name == name && Some(v.id) != ignore)
        {
            return Err(StoreError::Validation(format!("Column {name} already exists")));
        }
        Ok(())
    }

    pub fn add_column(
        &mut self,
        column: NewColumn,
        now: DateTime<Utc>,
    ) -> Result<ColumnDefinition, StoreError> {
        required(&column.name, "Name")?;
        required(&column.description, "Description")?;
        required(&column.format, "Format")?;
        self.ensure_free_column_name(&column.name, None)?;
        let sort_order = match column.sort_order {
            Some(v) => {
                self.ensure_free_sort_order(v, None)?;
                v
            }
            None => self.columns.iter().map(|v| v.sort_order).max().unwrap_or(0) + 1,
        };

        let definition = ColumnDefinition {
            id: self.allocate_id(),
            name: column.name,
            description: column.description,
            format: column.format,
            sort_order,
            created_at: now,
            updated_at: now,
        };
        self.columns.push(definition.clone());
        Ok(definition)
    }

    pub fn update_column(
        &mut self,
        id: EntityId,
        update: ColumnUpdate,
        now: DateTime<Utc>,
    ) -> Result<ColumnDefinition, StoreError> {
        let index = self.column_index(id)?;
        if let Some(name) = &update.name {
            required(name, "Name")?;
            self.ensure_free_column_name(name, Some(id))?;
        }
        if let Some(description) = &update.description {
            required(description, "Description")?;
        }
        if let Some(format) = &update.format {
            required(format, "Format")?;
        }
        if let Some(sort_order) = update.sort_order {
            self.ensure_free_sort_order(sort_order, Some(id))?;
        }

        let column = &mut self.columns[index];
        if let Some(v) = update.name {
            column.name = v;
        }
        if let Some(v) = update.description {
            column.description = v;
        }
        if let Some(v) = update.format {
            column.format = v;
        }
        if let Some(v) = update.sort_order {
            column.sort_order = v;
        }
        column.updated_at = now;
        Ok(column.clone())
    }

    /// Removes a column together with its vocabulary. Remaining columns are renumbered to
    /// `1..n` keeping their relative order.
    pub fn remove_column(
        &mut self,
        id: EntityId,
        now: DateTime<Utc>,
    ) -> Result<ColumnDefinition, StoreError> {
        let index = self.column_index(id)?;
        let removed = self.columns.remove(index);
        let before = self.column_values.len();
        self.column_values.retain(|v| v.column_id != id);
        debug!(
            "Removed column {} with {} values",
            removed.name,
            before - self.column_values.len()
        );
        self.renumber_columns(now);
        Ok(removed)
    }

    /// Swaps sort orders of the column and its neighbour. Returns false when the column is
    /// already first (or last) and nothing changed.
    pub fn move_column(
        &mut self,
        id: EntityId,
        direction: MoveDirection,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.columns.sort_by_key(|v| v.sort_order);
        let index = self.column_index(id)?;
        let neighbour = match direction {
            MoveDirection::Up if index == 0 => return Ok(false),
            MoveDirection::Up => index - 1,
            MoveDirection::Down if index + 1 >= self.columns.len() => return Ok(false),
            MoveDirection::Down => index + 1,
        };

        let current_order = self.columns[index].sort_order;
        self.columns[index].sort_order = self.columns[neighbour].sort_order;
        self.columns[neighbour].sort_order = current_order;
        self.columns[index].updated_at = now;
        self.columns[neighbour].updated_at = now;
        self.columns.swap(index, neighbour);
        Ok(true)
    }

    fn renumber_columns(&mut self, now: DateTime<Utc>) {
        self.columns.sort_by_key(|v| v.sort_order);
        for (index, column) in self.columns.iter_mut().enumerate() {
            let order = index as i64 + 1;
            if column.sort_order != order {
                column.sort_order = order;
                column.updated_at = now;
            }
        }
    }

    pub fn add_value(
        &mut self,
        value: NewValue,
        now: DateTime<Utc>,
    ) -> Result<ColumnValue, StoreError> {
        self.column_index(value.column_id)?;
        required(&value.value, "Value")?;
        required(&value.description, "Description")?;
        let entry = ColumnValue {
            id: self.allocate_id(),
            column_id: value.column_id,
            value: value.value,
            description: value.description,
            created_at: now,
            updated_at: now,
        };
        self.column_values.push(entry.clone());
        Ok(entry)
    }

    pub fn update_value(
        &mut self,
        id: EntityId,
        update: ValueUpdate,
        now: DateTime<Utc>,
    ) -> Result<ColumnValue, StoreError> {
        if let Some(v) = &update.value {
            required(v, "Value")?;
        }
        if let Some(v) = &update.description {
            required(v, "Description")?;
        }
        let entry = self
            .column_values
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or(StoreError::NotFound { kind: "value", id })?;
        if let Some(v) = update.value {
            entry.value = v;
        }
        if let Some(v) = update.description {
            entry.description = v;
        }
        entry.updated_at = now;
        Ok(entry.clone())
    }

    pub fn remove_value(&mut self, id: EntityId) -> Result<ColumnValue, StoreError> {
        let index = self
            .column_values
            .iter()
            .position(|v| v.id == id)
            .ok_or(StoreError::NotFound { kind: "value", id })?;
        Ok(self.column_values.remove(index))
    }

    fn ensure_free_trigger(
        &self,
        command: &str,
        ignore: Option<EntityId>,
    ) -> Result<(), StoreError> {
        if self
            .slash_commands
            .iter()
            .any(|v| v.command.eq_ignore_ascii_case(command) && Some(v.id) != ignore)
        {
            return Err(StoreError::Validation(format!(
                "Command {command} already exists"
            )));
        }
        Ok(())
    }

    pub fn add_command(
        &mut self,
        command: NewCommand,
        now: DateTime<Utc>,
    ) -> Result<SlashCommand, StoreError> {
        validate_trigger(&command.command)?;
        required(&command.expansion, "Expansion")?;
        required(&command.description, "Description")?;
        self.ensure_free_trigger(&command.command, None)?;
        let entry = SlashCommand {
            id: self.allocate_id(),
            command: command.command,
            expansion: command.expansion,
            description: command.description,
            created_at: now,
            updated_at: now,
        };
        self.slash_commands.push(entry.clone());
        Ok(entry)
    }

    pub fn update_command(
        &mut self,
        id: EntityId,
        update: CommandUpdate,
        now: DateTime<Utc>,
    ) -> Result<SlashCommand, StoreError> {
        if let Some(v) = &update.command {
            validate_trigger(v)?;
            self.ensure_free_trigger(v, Some(id))?;
        }
        if let Some(v) = &update.expansion {
            required(v, "Expansion")?;
        }
        if let Some(v) = &update.description {
            required(v, "Description")?;
        }
        let entry = self
            .slash_commands
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or(StoreError::NotFound { kind: "command", id })?;
        if let Some(v) = update.command {
            entry.command = v;
        }
        if let Some(v) = update.expansion {
            entry.expansion = v;
        }
        if let Some(v) = update.description {
            entry.description = v;
        }
        entry.updated_at = now;
        Ok(entry.clone())
    }

    pub fn remove_command(&mut self, id: EntityId) -> Result<SlashCommand, StoreError> {
        let index = self
            .slash_commands
            .iter()
            .position(|v| v.id == id)
            .ok_or(StoreError::NotFound { kind: "command", id })?;
        Ok(self.slash_commands.remove(index))
    }

    pub fn export(&self, now: DateTime<Utc>) -> ExportedSettings {
        let columns = self.ordered_columns();
        let column_values = columns
            .iter()
            .filter_map(|column| {
                let values = self
                    .values_for(column.id)
                    .map(|v| ExportedValue {
                        value: v.value.clone(),
                        description: v.description.clone(),
                    })
                    .collect::<Vec<_>>();
                (!values.is_empty()).then(|| (column.name.clone(), values))
            })
            .collect::<BTreeMap<_, _>>();

        ExportedSettings {
            version: EXPORT_VERSION.into(),
            exported_at: now,
            settings: SettingsFormData {
                element_delimiter: self.settings.element_delimiter.clone(),
                row_end_delimiter: self.settings.row_end_delimiter.clone(),
                global_context: self.settings.global_context.clone(),
                columns: columns
                    .iter()
                    .map(|v| ExportedColumn {
                        name: v.name.clone(),
                        description: v.description.clone(),
                        format: v.format.clone(),
                        sort_order: v.sort_order,
                    })
                    .collect(),
                column_values,
                slash_commands: self
                    .slash_commands
                    .iter()
                    .map(|v| ExportedCommand {
                        command: v.command.clone(),
                        expansion: v.expansion.clone(),
                        description: v.description.clone(),
                    })
                    .collect(),
            },
        }
    }

    /// Builds a brand new profile out of exported settings. Every entity gets a fresh id and
    /// columns are renumbered so the imported order is kept without duplicates.
    pub fn import(exported: ExportedSettings, now: DateTime<Utc>) -> Result<Self, StoreError> {
        if exported.version.split('.').next() != EXPORT_VERSION.split('.').next() {
            return Err(StoreError::Validation(format!(
                "Unsupported settings version {}",
                exported.version
            )));
        }
        let SettingsFormData {
            element_delimiter,
            row_end_delimiter,
            global_context,
            mut columns,
            column_values,
            slash_commands,
        } = exported.settings;

        let mut profile = UserProfile {
            settings: UserSettings {
                element_delimiter,
                row_end_delimiter,
                global_context,
                updated_at: now,
            },
            columns: vec![],
            column_values: vec![],
            slash_commands: vec![],
            next_id: 0,
        };

        // Stable sort keeps file order for equal sort orders.
        columns.sort_by_key(|v| v.sort_order);
        for (index, column) in columns.into_iter().enumerate() {
            profile.add_column(
                NewColumn {
                    name: column.name,
                    description: column.description,
                    format: column.format,
                    sort_order: Some(index as i64 + 1),
                },
                now,
            )?;
        }

        for (column_name, values) in column_values {
            let column_id = profile
                .columns
                .iter()
                .find(|v| v.name == column_name)
                .map(|v| v.id)
                .ok_or_else(|| {
                    StoreError::Validation(format!(
                        "Values reference unknown column {column_name}"
                    ))
                })?;
            for value in values {
                profile.add_value(
                    NewValue {
                        column_id,
                        value: value.value,
                        description: value.description,
                    },
                    now,
                )?;
            }
        }

        for command in slash_commands {
            profile.add_command(
                NewCommand {
                    command: command.command,
                    expansion: command.expansion,
                    description: command.description,
                },
                now,
            )?;
        }

        Ok(profile)
    }
}
