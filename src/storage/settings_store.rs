use std::{
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use fs4::tokio::AsyncFileExt;
use tokio::fs::File;
use tracing::{debug, info};

use super::entities::{EntityId, UserProfile};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Profile is not initialized")]
    NotInitialized,
    #[error("{0}")]
    Validation(String),
    #[error("No {kind} with id {id}")]
    NotFound { kind: &'static str, id: EntityId },
    #[error("Settings document is corrupted: {0}")]
    Corrupted(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Interface for abstracting storage of a profile. Readers always observe a whole document:
/// every change is applied to an in-memory copy and persisted in a single replace.
pub trait SettingsStore {
    /// Current snapshot of the profile.
    fn load(&self) -> impl Future<Output = Result<UserProfile, StoreError>>;

    /// Applies `change` to the stored profile. When `change` fails nothing is written.
    fn modify<T, F>(&self, change: F) -> impl Future<Output = Result<T, StoreError>>
    where
        F: FnOnce(&mut UserProfile) -> Result<T, StoreError>;
}

const DOCUMENT_NAME: &str = "settings.json";
const LOCK_NAME: &str = "settings.lock";

/// The main realization of [SettingsStore]. Keeps the profile as a pretty printed JSON
/// document inside the profile directory.
pub struct FileSettingsStore {
    profile_dir: PathBuf,
}

impl FileSettingsStore {
    pub fn new(profile_dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&profile_dir)?;

        Ok(Self { profile_dir })
    }

    pub fn dir(&self) -> &Path {
        &self.profile_dir
    }

    fn document_path(&self) -> PathBuf {
        self.profile_dir.join(DOCUMENT_NAME)
    }

    pub async fn is_initialized(&self) -> bool {
        tokio::fs::try_exists(self.document_path())
            .await
            .unwrap_or(false)
    }

    /// Writes `profile` as the initial document. Existing profiles are kept untouched unless
    /// `force` is set. Returns whether anything was written.
    pub async fn initialize(&self, profile: UserProfile, force: bool) -> Result<bool, StoreError> {
        let lock = self.open_lock().await?;
        lock.lock_exclusive()?;
        let result: Result<bool, StoreError> = async {
            if !force && self.is_initialized().await {
                info!("Profile in {:?} already exists", self.profile_dir);
                return Ok(false);
            }
            self.write_document(&profile).await?;
            Ok(true)
        }
        .await;
        lock.unlock_async().await?;
        result
    }

    async fn open_lock(&self) -> Result<File, StoreError> {
        Ok(File::options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.profile_dir.join(LOCK_NAME))
            .await?)
    }

    async fn read_document(&self) -> Result<UserProfile, StoreError> {
        let path = self.document_path();
        debug!("Reading {path:?}");
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotInitialized),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces the document through a temporary file so a crash never leaves half a
    /// profile behind.
    async fn write_document(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let path = self.document_path();
        let temporary = self.profile_dir.join(format!("{DOCUMENT_NAME}.tmp"));
        let data = serde_json::to_vec_pretty(profile)?;
        tokio::fs::write(&temporary, data).await?;
        tokio::fs::rename(&temporary, &path).await?;
        debug!("Saved {path:?}");
        Ok(())
    }
}

impl SettingsStore for FileSettingsStore {
    async fn load(&self) -> Result<UserProfile, StoreError> {
        let lock = self.open_lock().await?;
        lock.lock_shared()?;
        let result = self.read_document().await;
        lock.unlock_async().await?;
        result
    }

    async fn modify<T, F>(&self, change: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut UserProfile) -> Result<T, StoreError>,
    {
        let lock = self.open_lock().await?;
        lock.lock_exclusive()?;
        let result: Result<T, StoreError> = async {
            let mut profile = self.read_document().await?;
            let value = change(&mut profile)?;
            self.write_document(&profile).await?;
            Ok(value)
        }
        .await;
        lock.unlock_async().await?;
        result
    }
}
