use std::fmt::Display;

use anyhow::Result;
use chrono::{DateTime, Local};
use chrono_english::parse_date_string;
use clap::{CommandFactory, Parser, ValueEnum};
use futures::{pin_mut, TryStreamExt};
use now::DateTimeNow;

use crate::storage::{
    entities::AuditEntry,
    history::{HistoryStorage, HistoryStorageImpl},
};

use super::{
    output::{self, extract_between},
    Args,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

#[derive(Debug, Parser)]
pub struct HistoryCommand {
    #[arg(
        long = "start",
        short,
        help = "Start of the range. Examples are \"yesterday\", \"1 hour ago\", \"15/03/2025\", \"12:00 16/03/2025\". Defaults to the start of today"
    )]
    start_date: Option<String>,
    #[arg(
        long = "end",
        short,
        help = "End of the range. Same formats as start. Defaults to now"
    )]
    end_date: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
    #[arg(
        long = "days",
        default_value_t = false,
        help = "Take inputs as whole days. For example if start and end are both 15/03/2025 this option allows to extract the whole day"
    )]
    treat_as_days: bool,
    #[arg(short, long, help = "Print the generated rows of every entry")]
    full: bool,
    #[arg(long, conflicts_with = "full", help = "Print entries as JSON lines")]
    json: bool,
}

/// Command to process `history` command. Lists every successful run between `start_date`
/// and `end_date`.
pub async fn process_history_command(
    storage: HistoryStorageImpl,
    HistoryCommand {
        start_date,
        end_date,
        date_style,
        treat_as_days,
        full,
        json,
    }: HistoryCommand,
) -> Result<()> {
    let (start, end) = parse_range(start_date, end_date, date_style, treat_as_days)?;

    let entries = extract_between(
        storage,
        output::ExtractConfig {
            start: start.into(),
            end: end.into(),
        },
    );
    pin_mut!(entries);

    let mut count = 0;
    while let Some(entry) = entries.try_next().await? {
        count += 1;
        if json {
            println!("{}", serde_json::to_string(&entry)?);
        } else {
            print_entry(&entry, full);
        }
    }
    if count == 0 && !json {
        eprintln!("No entries between {} and {}", start.format("%x %H:%M"), end.format("%x %H:%M"));
    }
    Ok(())
}

fn print_entry(entry: &AuditEntry, full: bool) {
    let time = entry.timestamp.with_timezone(&Local);
    println!(
        "{}\t{}",
        time.format("%x %H:%M:%S"),
        entry.original_input.replace('\n', " ")
    );
    if full {
        println!("{}", entry.formatted_output);
        println!();
    }
}

/// Also provides sensible defaults for `history` command.
fn parse_range(
    start_date: Option<String>,
    end_date: Option<String>,
    date_style: DateStyle,
    treat_as_days: bool,
) -> Result<(DateTime<Local>, DateTime<Local>)> {
    let now = Local::now();
    let dialect: chrono_english::Dialect = date_style.into();
    let mut start = match start_date.map(|s| parse_date_string(&s, now, dialect)) {
        Some(Ok(v)) => v.with_timezone(&Local),
        Some(Err(e)) => {
            return Err(Args::command()
                .error(
                    clap::error::ErrorKind::ValueValidation,
                    format!("Failed to validate start date {e}"),
                )
                .into());
        }
        None => now.beginning_of_day(),
    };
    let mut end = match end_date.map(|s| parse_date_string(&s, now, dialect)) {
        Some(Ok(v)) => v.with_timezone(&Local),
        Some(Err(e)) => {
            return Err(Args::command()
                .error(
                    clap::error::ErrorKind::ValueValidation,
                    format!("Failed to validate end date {e}"),
                )
                .into());
        }
        None => now,
    };
    if treat_as_days {
        start = start.beginning_of_day();
        end = end.end_of_day();
    }
    if start > end {
        return Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                "Start of the range is after its end",
            )
            .into());
    }
    Ok((start, end))
}

/// Command to process `last` command. Prints the rows of the most recent run of today.
pub async fn process_last_command(storage: HistoryStorageImpl, explain: bool) -> Result<()> {
    let today = Local::now().date_naive();
    match storage.last_entry_for(today).await? {
        Some(entry) => {
            println!("{}", entry.formatted_output);
            if explain {
                println!();
                println!("{}", entry.explanation);
            }
        }
        None => eprintln!("Nothing was processed today"),
    }
    Ok(())
}
