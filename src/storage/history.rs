use std::{
    future::Future,
    io::ErrorKind,
    ops::Deref,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{Local, NaiveDate};
use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader},
};
use tracing::{debug, warn};

use crate::{
    fs::operations::{ends_with_newline, read_line_backwards},
    utils::time::date_to_record_name,
};

use super::entities::AuditEntry;

/// Interface for abstracting storage of processed requests.
pub trait HistoryStorage {
    /// Appends an entry to the file of the local day the entry was made on.
    fn append(&self, entry: &AuditEntry) -> impl Future<Output = Result<()>>;

    /// Retrieves every entry made on a certain local day.
    fn get_entries_for(&self, date: NaiveDate)
        -> impl Future<Output = Result<Vec<AuditEntry>>> + Send;

    /// Retrieves the most recent entry of a day without reading the whole file.
    fn last_entry_for(&self, date: NaiveDate) -> impl Future<Output = Result<Option<AuditEntry>>>;
}

impl<T: Deref> HistoryStorage for T
where
    T::Target: HistoryStorage,
{
    fn append(&self, entry: &AuditEntry) -> impl Future<Output = Result<()>> {
        self.deref().append(entry)
    }

    fn get_entries_for(
        &self,
        date: NaiveDate,
    ) -> impl Future<Output = Result<Vec<AuditEntry>>> + Send {
        self.deref().get_entries_for(date)
    }

    fn last_entry_for(&self, date: NaiveDate) -> impl Future<Output = Result<Option<AuditEntry>>> {
        self.deref().last_entry_for(date)
    }
}

/// The main realization of [HistoryStorage]. One JSON line per entry, one file per day.
pub struct HistoryStorageImpl {
    history_dir: PathBuf,
}

impl HistoryStorageImpl {
    pub fn new(history_dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&history_dir)?;

        Ok(Self { history_dir })
    }

    fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.history_dir.join(date_to_record_name(date))
    }
}

async fn read_entries(path: &Path) -> Result<Vec<AuditEntry>> {
    async fn extract(path: &Path) -> std::result::Result<Vec<AuditEntry>, std::io::Error> {
        debug!("Extracting {path:?}");
        let file = File::open(path).await?;
        file.lock_shared()?;
        let mut lines = BufReader::new(file).lines();
        let mut entries = vec![];
        while let Ok(Some(v)) = lines.next_line().await {
            if v.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(&v) {
                Ok(v) => entries.push(v),
                Err(e) => {
                    // A write cut short by a crash leaves a broken line behind
                    warn!("Found illegal json string in {:?} {}: {e}", path, &v)
                }
            }
        }

        lines.into_inner().into_inner().unlock_async().await?;

        Ok(entries)
    }

    match extract(path).await {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(vec![]),
        Err(e) => Err(e)?,
    }
}

/// Walks the file from the end and returns the first line that parses, skipping broken ones
/// the same way [read_entries] does.
async fn find_last_entry(file: &mut File, path: &Path) -> Result<Option<AuditEntry>> {
    let mut buffer = vec![0; 1024];
    file.seek(std::io::SeekFrom::End(0)).await?;
    while let Some(line) = read_line_backwards(file, &mut buffer).await? {
        if line.trim_ascii().is_empty() {
            continue;
        }
        match serde_json::from_slice::<AuditEntry>(&line) {
            Ok(v) => return Ok(Some(v)),
            Err(e) => warn!(
                "Found illegal json string in {:?} {}: {e}",
                path,
                String::from_utf8_lossy(&line)
            ),
        }
    }
    Ok(None)
}

impl HistoryStorage for HistoryStorageImpl {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let date = entry.timestamp.with_timezone(&Local).date_naive();
        let mut file = File::options()
            .read(true)
            .append(true)
            .create(true)
            .open(self.path_for(date))
            .await?;

        let mut buffer = serde_json::to_vec(entry)?;
        buffer.push(b'\n');

        file.lock_exclusive()?;
        let result = async {
            // Terminate a line left unfinished by an interrupted write.
            if !ends_with_newline(&mut file).await? {
                warn!("Previous entry of {date} was cut short");
                buffer.insert(0, b'\n');
            }
            file.write_all(&buffer).await?;
            file.flush().await
        }
        .await;
        file.unlock_async().await?;
        result?;
        Ok(())
    }

    async fn get_entries_for(&self, date: NaiveDate) -> Result<Vec<AuditEntry>> {
        read_entries(&self.path_for(date)).await
    }

    async fn last_entry_for(&self, date: NaiveDate) -> Result<Option<AuditEntry>> {
        let mut file = match File::open(self.path_for(date)).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let path = self.path_for(date);
        file.lock_shared()?;
        let entry = find_last_entry(&mut file, &path).await;
        file.unlock_async().await?;
        entry
    }
}
