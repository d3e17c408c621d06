use std::path::PathBuf;

use anyhow::Result;
use chrono::{Local, Utc};
use clap::Subcommand;
use tracing::info;

use crate::{
    pipeline::{expander::BUILTIN_COMMANDS, formatter::generate_preview_output},
    storage::{
        entities::{EntityId, ExportedSettings, UserProfile},
        profile::{
            ColumnUpdate, CommandUpdate, MoveDirection, NewColumn, NewCommand, NewValue,
            SettingsUpdate, ValueUpdate,
        },
        settings_store::SettingsStore,
    },
};

use super::CliContext;

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    #[command(about = "Show delimiters and global context")]
    Show,
    #[command(about = "Change delimiters or global context. \\t and \\n are understood")]
    Set {
        #[arg(long, help = "Separator between values of a row")]
        element_delimiter: Option<String>,
        #[arg(long, help = "Terminator placed after every row")]
        row_end_delimiter: Option<String>,
        #[arg(long = "context", help = "Free text added to every prompt")]
        global_context: Option<String>,
    },
    #[command(about = "Export the whole profile as JSON")]
    Export {
        #[arg(short, long, help = "File to write into. Printed to stdout when missing")]
        output: Option<PathBuf>,
    },
    #[command(about = "Replace the whole profile with a previously exported one")]
    Import { path: PathBuf },
    #[command(about = "Show a sample row produced by the current settings")]
    Preview,
}

#[derive(Subcommand, Debug)]
pub enum ColumnsCommand {
    #[command(about = "List columns in output order")]
    List,
    #[command(about = "Add a column. Goes last unless a free sort order is given")]
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: String,
        #[arg(
            long,
            default_value = "text",
            help = "Format hint, for example YYYYMMDDTHHMM, HH:MM, YYYY-MM-DD or text"
        )]
        format: String,
        #[arg(long)]
        sort_order: Option<i64>,
    },
    #[command(about = "Edit a column")]
    Edit {
        id: EntityId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        format: Option<String>,
        #[arg(long)]
        sort_order: Option<i64>,
    },
    #[command(about = "Remove a column together with its values")]
    Remove { id: EntityId },
    #[command(about = "Move a column one place towards the start of the row")]
    Up { id: EntityId },
    #[command(about = "Move a column one place towards the end of the row")]
    Down { id: EntityId },
}

#[derive(Subcommand, Debug)]
pub enum ValuesCommand {
    #[command(about = "List possible column values")]
    List {
        #[arg(long, help = "Only show values of this column")]
        column: Option<EntityId>,
    },
    #[command(about = "Add a possible value to a column")]
    Add {
        #[arg(long)]
        column: EntityId,
        #[arg(long)]
        value: String,
        #[arg(long)]
        description: String,
    },
    #[command(about = "Edit a value")]
    Edit {
        id: EntityId,
        #[arg(long)]
        value: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    #[command(about = "Remove a value")]
    Remove { id: EntityId },
}

#[derive(Subcommand, Debug)]
pub enum CommandsCommand {
    #[command(about = "List built-in and user slash commands")]
    List,
    #[command(about = "Add a slash command")]
    Add {
        #[arg(help = "Trigger including the leading slash, for example /standup")]
        command: String,
        expansion: String,
        #[arg(long)]
        description: String,
    },
    #[command(about = "Edit a slash command")]
    Edit {
        id: EntityId,
        #[arg(long)]
        command: Option<String>,
        #[arg(long)]
        expansion: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    #[command(about = "Remove a slash command")]
    Remove { id: EntityId },
}

/// Delimiters are hard to type in a shell, so the common escapes are accepted.
fn unescape(value: String) -> String {
    value.replace("\\t", "\t").replace("\\n", "\n")
}

pub async fn process_settings_command(
    context: &CliContext,
    command: SettingsCommand,
) -> Result<()> {
    let store = &context.store;
    match command {
        SettingsCommand::Show => {
            let settings = store.load().await?.settings;
            println!("Element delimiter\t{:?}", settings.element_delimiter);
            println!("Row end delimiter\t{:?}", settings.row_end_delimiter);
            println!("Global context\t{}", settings.global_context);
            println!(
                "Updated\t{}",
                settings.updated_at.with_timezone(&Local).format("%x %H:%M:%S")
            );
        }
        SettingsCommand::Set {
            element_delimiter,
            row_end_delimiter,
            global_context,
        } => {
            let update = SettingsUpdate {
                element_delimiter: element_delimiter.map(unescape),
                row_end_delimiter: row_end_delimiter.map(unescape),
                global_context,
            };
            store
                .modify(|profile| {
                    profile.update_settings(update, Utc::now());
                    Ok(())
                })
                .await?;
            info!("Settings updated");
        }
        SettingsCommand::Export { output } => {
            let exported = store.load().await?.export(Utc::now());
            let data = serde_json::to_string_pretty(&exported)?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, data).await?;
                    eprintln!("Exported to {}", path.display());
                }
                None => println!("{data}"),
            }
        }
        SettingsCommand::Import { path } => {
            let data = tokio::fs::read(&path).await?;
            let exported: ExportedSettings = serde_json::from_slice(&data)?;
            let profile = UserProfile::import(exported, Utc::now())?;
            store.initialize(profile, true).await?;
            eprintln!("Imported settings from {}", path.display());
        }
        SettingsCommand::Preview => {
            let profile = store.load().await?;
            println!(
                "{}",
                generate_preview_output(&profile.settings, &profile.columns, None)
            );
        }
    }
    Ok(())
}

pub async fn process_columns_command(context: &CliContext, command: ColumnsCommand) -> Result<()> {
    let store = &context.store;
    match command {
        ColumnsCommand::List => {
            let profile = store.load().await?;
            for column in profile.ordered_columns() {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    column.id, column.sort_order, column.name, column.format, column.description
                );
            }
        }
        ColumnsCommand::Add {
            name,
            description,
            format,
            sort_order,
        } => {
            let column = store
                .modify(|profile| {
                    profile.add_column(
                        NewColumn {
                            name,
                            description,
                            format,
                            sort_order,
                        },
                        Utc::now(),
                    )
                })
                .await?;
            println!("{}", column.id);
        }
        ColumnsCommand::Edit {
            id,
            name,
            description,
            format,
            sort_order,
        } => {
            let update = ColumnUpdate {
                name,
                description,
                format,
                sort_order,
            };
            store
                .modify(|profile| profile.update_column(id, update, Utc::now()))
                .await?;
        }
        ColumnsCommand::Remove { id } => {
            let removed = store
                .modify(|profile| profile.remove_column(id, Utc::now()))
                .await?;
            eprintln!("Removed column {}", removed.name);
        }
        ColumnsCommand::Up { id } => move_column(context, id, MoveDirection::Up).await?,
        ColumnsCommand::Down { id } => move_column(context, id, MoveDirection::Down).await?,
    }
    Ok(())
}

async fn move_column(context: &CliContext, id: EntityId, direction: MoveDirection) -> Result<()> {
    let moved = context
        .store
        .modify(|profile| profile.move_column(id, direction, Utc::now()))
        .await?;
    if !moved {
        eprintln!("Column {id} is already at the edge");
    }
    Ok(())
}

pub async fn process_values_command(context: &CliContext, command: ValuesCommand) -> Result<()> {
    let store = &context.store;
    match command {
        ValuesCommand::List { column } => {
            let profile = store.load().await?;
            for definition in profile
                .ordered_columns()
                .into_iter()
                .filter(|v| column.map_or(true, |id| id == v.id))
            {
                for value in profile.values_for(definition.id) {
                    println!(
                        "{}\t{}\t{}\t{}",
                        value.id, definition.name, value.value, value.description
                    );
                }
            }
        }
        ValuesCommand::Add {
            column,
            value,
            description,
        } => {
            let value = store
                .modify(|profile| {
                    profile.add_value(
                        NewValue {
                            column_id: column,
                            value,
                            description,
                        },
                        Utc::now(),
                    )
                })
                .await?;
            println!("{}", value.id);
        }
        ValuesCommand::Edit {
            id,
            value,
            description,
        } => {
            let update = ValueUpdate { value, description };
            store
                .modify(|profile| profile.update_value(id, update, Utc::now()))
                .await?;
        }
        ValuesCommand::Remove { id } => {
            store.modify(|profile| profile.remove_value(id)).await?;
        }
    }
    Ok(())
}

pub async fn process_commands_command(
    context: &CliContext,
    command: CommandsCommand,
) -> Result<()> {
    let store = &context.store;
    match command {
        CommandsCommand::List => {
            let today = Local::now().date_naive();
            for builtin in BUILTIN_COMMANDS {
                println!(
                    "-\t{}\t{}\t{}",
                    builtin.trigger,
                    builtin.evaluate(today),
                    builtin.description
                );
            }
            let profile = store.load().await?;
            for command in profile.slash_commands {
                println!(
                    "{}\t{}\t{}\t{}",
                    command.id, command.command, command.expansion, command.description
                );
            }
        }
        CommandsCommand::Add {
            command,
            expansion,
            description,
        } => {
            let command = store
                .modify(|profile| {
                    profile.add_command(
                        NewCommand {
                            command,
                            expansion,
                            description,
                        },
                        Utc::now(),
                    )
                })
                .await?;
            println!("{}", command.id);
        }
        CommandsCommand::Edit {
            id,
            command,
            expansion,
            description,
        } => {
            let update = CommandUpdate {
                command,
                expansion,
                description,
            };
            store
                .modify(|profile| profile.update_command(id, update, Utc::now()))
                .await?;
        }
        CommandsCommand::Remove { id } => {
            store.modify(|profile| profile.remove_command(id)).await?;
        }
    }
    Ok(())
}
