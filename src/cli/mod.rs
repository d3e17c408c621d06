pub mod history;
pub mod output;
pub mod process;
pub mod settings;
pub mod shutdown;

use std::{path::PathBuf, process::ExitCode};

use anyhow::Result;
use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand};
use history::{process_history_command, process_last_command, HistoryCommand};
use process::{process_expand_command, process_process_command, ProcessCommand};
use settings::{
    process_columns_command, process_commands_command, process_settings_command,
    process_values_command, ColumnsCommand, CommandsCommand, SettingsCommand, ValuesCommand,
};
use tracing::{error, level_filters::LevelFilter};

use crate::{
    pipeline::error::ErrorClass,
    storage::{
        entities::UserProfile,
        history::HistoryStorageImpl,
        settings_store::{FileSettingsStore, StoreError},
    },
    utils::{
        dir::{create_application_default_path, profile_path},
        logging::{enable_logging, CLI_PREFIX},
    },
};

const DEFAULT_PROFILE: &str = "default";

#[derive(Parser, Debug)]
#[command(name = "timescript", version, long_about = None)]
#[command(about = "Turns free text descriptions of a work day into delimited time tracking rows", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, global = true, help = "Print logs to stderr")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        default_value = DEFAULT_PROFILE,
        help = "Profile holding settings and history"
    )]
    profile: String,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Create a profile with default columns, values and commands")]
    Init {
        #[arg(long, help = "Overwrite an existing profile")]
        force: bool,
    },
    #[command(about = "Turn a description of a work day into rows")]
    Process {
        #[command(flatten)]
        command: ProcessCommand,
    },
    #[command(about = "Show the input with slash commands expanded, without calling the model")]
    Expand {
        #[arg(help = "Text to expand. Read from stdin when missing")]
        input: Option<String>,
    },
    #[command(about = "Print the rows of the latest run of today")]
    Last {
        #[arg(long, help = "Print the explanation too")]
        explain: bool,
    },
    #[command(about = "List previous runs")]
    History {
        #[command(flatten)]
        command: HistoryCommand,
    },
    #[command(about = "Delimiters, global context, import and export")]
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    #[command(about = "Manage output columns")]
    Columns {
        #[command(subcommand)]
        command: ColumnsCommand,
    },
    #[command(about = "Manage possible values of columns")]
    Values {
        #[command(subcommand)]
        command: ValuesCommand,
    },
    #[command(name = "commands", about = "Manage slash commands")]
    SlashCommands {
        #[command(subcommand)]
        command: CommandsCommand,
    },
}

/// What every command works against: the selected profile of an application directory.
pub struct CliContext {
    pub profile: String,
    pub store: FileSettingsStore,
}

impl CliContext {
    fn new(application_dir: PathBuf, profile: String) -> Result<Self> {
        if profile.is_empty()
            || profile.starts_with('.')
            || profile.contains(['/', '\\'])
        {
            return Err(Args::command()
                .error(
                    clap::error::ErrorKind::ValueValidation,
                    format!("Invalid profile name {profile:?}"),
                )
                .into());
        }
        let store = FileSettingsStore::new(profile_path(&application_dir, &profile))?;
        Ok(Self { profile, store })
    }

    pub fn history(&self) -> Result<HistoryStorageImpl> {
        Ok(HistoryStorageImpl::new(self.store.dir().join("history"))?)
    }
}

pub async fn run_cli() -> Result<ExitCode> {
    let args = Args::parse();

    let application_dir = match args.dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            dir
        }
        None => create_application_default_path()?,
    };

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &application_dir, logging_level, args.log)?;

    let context = CliContext::new(application_dir, args.profile)?;
    let result = match args.commands {
        Commands::Process { command } => return process_process_command(&context, command).await,
        Commands::Init { force } => init(&context, force).await,
        Commands::Expand { input } => process_expand_command(&context, input).await,
        Commands::Last { explain } => process_last_command(context.history()?, explain).await,
        Commands::History { command } => process_history_command(context.history()?, command).await,
        Commands::Settings { command } => process_settings_command(&context, command).await,
        Commands::Columns { command } => process_columns_command(&context, command).await,
        Commands::Values { command } => process_values_command(&context, command).await,
        Commands::SlashCommands { command } => process_commands_command(&context, command).await,
    };

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => match e.downcast_ref::<StoreError>() {
            Some(store_error) => {
                error!("Settings command failed {e:?}");
                eprintln!("Error: {store_error}");
                if matches!(store_error, StoreError::NotInitialized) {
                    eprintln!("Run `timescript init --profile {}` first", context.profile);
                }
                Ok(ExitCode::from(store_error_class(store_error).exit_code()))
            }
            None => Err(e),
        },
    }
}

fn store_error_class(error: &StoreError) -> ErrorClass {
    match error {
        StoreError::NotInitialized => ErrorClass::Authentication,
        StoreError::Validation(_) | StoreError::NotFound { .. } => ErrorClass::Validation,
        StoreError::Corrupted(_) | StoreError::Io(_) => ErrorClass::Fatal,
    }
}

async fn init(context: &CliContext, force: bool) -> Result<()> {
    let created = context
        .store
        .initialize(UserProfile::with_defaults(Utc::now()), force)
        .await?;
    if created {
        eprintln!(
            "Profile {} is ready in {}",
            context.profile,
            context.store.dir().display()
        );
    } else {
        eprintln!(
            "Profile {} already exists, use --force to reset it",
            context.profile
        );
    }
    Ok(())
}
