//! Slash command expansion. Built-in date commands are resolved first, user commands second,
//! and nothing produced by an expansion is scanned again.
//!
//! Matching is plain case-insensitive substring replacement without word boundaries. A user
//! command `/m` therefore also rewrites the start of `/mail`. When several user triggers
//! could match at the same spot the longest one wins.

use std::sync::LazyLock;

use chrono::{Duration, Local, NaiveDate, Weekday};
use regex::{NoExpand, Regex, RegexBuilder};
use tracing::{trace, warn};

use crate::{
    storage::entities::SlashCommand,
    utils::time::{date_to_record_name, last_weekday},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelativeDate {
    Today,
    Yesterday,
    Last(Weekday),
}

/// Command that is never stored and is computed every time it's expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinCommand {
    pub trigger: &'static str,
    pub description: &'static str,
    date: RelativeDate,
}

impl BuiltinCommand {
    pub fn evaluate(&self, today: NaiveDate) -> String {
        let date = match self.date {
            RelativeDate::Today => today,
            RelativeDate::Yesterday => today - Duration::days(1),
            RelativeDate::Last(weekday) => last_weekday(today, weekday),
        };
        date_to_record_name(date)
    }
}

pub const BUILTIN_COMMANDS: [BuiltinCommand; 9] = [
    BuiltinCommand {
        trigger: "/today",
        description: "Today's date",
        date: RelativeDate::Today,
    },
    BuiltinCommand {
        trigger: "/yesterday",
        description: "Yesterday's date",
        date: RelativeDate::Yesterday,
    },
    BuiltinCommand {
        trigger: "/last_monday",
        description: "Last Monday's date",
        date: RelativeDate::Last(Weekday::Mon),
    },
    BuiltinCommand {
        trigger: "/last_tuesday",
        description: "Last Tuesday's date",
        date: RelativeDate::Last(Weekday::Tue),
    },
    BuiltinCommand {
        trigger: "/last_wednesday",
        description: "Last Wednesday's date",
        date: RelativeDate::Last(Weekday::Wed),
    },
    BuiltinCommand {
        trigger: "/last_thursday",
        description: "Last Thursday's date",
        date: RelativeDate::Last(Weekday::Thu),
    },
    BuiltinCommand {
        trigger: "/last_friday",
        description: "Last Friday's date",
        date: RelativeDate::Last(Weekday::Fri),
    },
    BuiltinCommand {
        trigger: "/last_saturday",
        description: "Last Saturday's date",
        date: RelativeDate::Last(Weekday::Sat),
    },
    BuiltinCommand {
        trigger: "/last_sunday",
        description: "Last Sunday's date",
        date: RelativeDate::Last(Weekday::Sun),
    },
];

pub fn find_builtin(token: &str) -> Option<&'static BuiltinCommand> {
    BUILTIN_COMMANDS
        .iter()
        .find(|v| v.trigger.eq_ignore_ascii_case(token))
}

static COMMAND_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/[A-Za-z0-9_]+").expect("Command token pattern is valid"));

fn case_insensitive_literal(literal: &str) -> Option<Regex> {
    RegexBuilder::new(&regex::escape(literal))
        .case_insensitive(true)
        .build()
        .inspect_err(|e| warn!("Can't build a matcher for {literal:?}: {e}"))
        .ok()
}

/// Expands commands against the current local date.
pub fn expand(input: &str, commands: &[SlashCommand]) -> String {
    expand_at(input, commands, Local::now().date_naive())
}

/// Same as [expand] with `today` pinned.
pub fn expand_at(input: &str, commands: &[SlashCommand], today: NaiveDate) -> String {
    let mut text = expand_builtins(input, today);

    let mut ordered = commands
        .iter()
        .filter(|v| !v.command.is_empty())
        .collect::<Vec<_>>();
    if ordered.is_empty() {
        return text;
    }
    // Stable, so commands of equal length keep their stored order.
    ordered.sort_by(|a, b| b.command.len().cmp(&a.command.len()));

    let pattern = ordered
        .iter()
        .map(|v| format!("({})", regex::escape(&v.command)))
        .collect::<Vec<_>>()
        .join("|");
    let Some(matcher) = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .inspect_err(|e| warn!("Can't build a matcher for user commands: {e}"))
        .ok()
    else {
        return text;
    };

    // One pass over the text, so an expansion containing another trigger stays as is.
    text = matcher
        .replace_all(&text, |captures: &regex::Captures| {
            let command = captures
                .iter()
                .skip(1)
                .position(|v| v.is_some())
                .map(|index| ordered[index]);
            match command {
                Some(command) => {
                    trace!("Expanding {}", command.command);
                    command.expansion.clone()
                }
                None => captures[0].to_string(),
            }
        })
        .into_owned();
    text
}

fn expand_builtins(input: &str, today: NaiveDate) -> String {
    let tokens = COMMAND_TOKEN
        .find_iter(input)
        .map(|v| v.as_str().to_string())
        .collect::<Vec<_>>();

    let mut text = input.to_string();
    for token in tokens {
        let Some(builtin) = find_builtin(&token) else {
            continue;
        };
        let Some(matcher) = case_insensitive_literal(&token) else {
            continue;
        };
        let value = builtin.evaluate(today);
        trace!("Expanding {token} into {value}");
        text = matcher.replace_all(&text, NoExpand(&value)).into_owned();
    }
    text
}
