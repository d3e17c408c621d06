use std::{future, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Local, NaiveDate, Utc};
use futures::{stream, Stream, StreamExt};
use tracing::error;

use crate::storage::{entities::AuditEntry, history::HistoryStorage};

pub struct ExtractConfig {
    pub end: DateTime<Utc>,
    pub start: DateTime<Utc>,
}

impl ExtractConfig {
    fn filter(&self, entry: AuditEntry) -> Option<AuditEntry> {
        (self.start <= entry.timestamp && entry.timestamp <= self.end).then_some(entry)
    }
}

/// Extracts [AuditEntry] made between 2 moments. Day files are read a few at a time and
/// streamed in order.
pub fn extract_between(
    storage: impl HistoryStorage + Send + Sync + 'static,
    config: ExtractConfig,
) -> impl Stream<Item = Result<AuditEntry>> {
    let storage = Arc::new(storage);
    // Files are named after local days.
    let start = config.start.with_timezone(&Local).date_naive();
    let end = config.end.with_timezone(&Local).date_naive();

    let files = date_range(start, end)
        .map(move |day| {
            let storage = storage.clone();
            async move { (day, storage.get_entries_for(day).await) }
        })
        .buffered(4);

    files
        .flat_map(|(day, data)| match data {
            Ok(data) => stream::iter(data).map(Ok).boxed(),
            Err(e) => {
                error!("Failed to process file {day} {e}");
                stream::once(future::ready(Err(e))).boxed()
            }
        })
        .filter_map(move |v| future::ready(v.map(|v| config.filter(v)).transpose()))
}

/// Returns a stream of dates between start (inclusive) and end (inclusive).
fn date_range(start: NaiveDate, end: NaiveDate) -> impl Stream<Item = NaiveDate> {
    stream::unfold(Some(start), move |current| {
        future::ready(match current {
            Some(current) if current <= end => Some((current, current.succ_opt())),
            _ => None,
        })
    })
}
