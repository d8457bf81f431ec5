use std::{
    future::Future,
    io::ErrorKind,
    ops::Deref,
    path::{Path, PathBuf},
};

use chrono::NaiveDate;
use fs4::tokio::AsyncFileExt;
use thiserror::Error;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
};
use tracing::{debug, warn};

use crate::utils::time::date_to_record_name;

use super::entities::SessionRecordEntity;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record file {0:?} is locked by another writer")]
    Busy(PathBuf),
    #[error("failed to access record file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StorageError {
    /// Contention is the only failure worth retrying.
    pub fn is_contention(&self) -> bool {
        match self {
            StorageError::Busy(_) => true,
            StorageError::Io(e) => e.kind() == ErrorKind::WouldBlock,
            StorageError::Encode(_) => false,
        }
    }
}

/// Destination for finished sessions.
pub trait SessionSink: Send + Sync {
    fn save(
        &self,
        record: &SessionRecordEntity,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

impl<T: Deref + Send + Sync> SessionSink for T
where
    T::Target: SessionSink,
{
    fn save(
        &self,
        record: &SessionRecordEntity,
    ) -> impl Future<Output = Result<(), StorageError>> + Send {
        self.deref().save(record)
    }
}

/// The main realization of [SessionSink]. Keeps one json lines file per UTC day.
pub struct SessionStorageImpl {
    session_dir: PathBuf,
}

impl SessionStorageImpl {
    pub fn new(session_dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&session_dir)?;

        Ok(Self { session_dir })
    }

    fn record_path(&self, date: NaiveDate) -> PathBuf {
        self.session_dir.join(date_to_record_name(date))
    }

    /// Reads back the sessions started on `date`. Lines that fail to parse are skipped, they
    /// can appear after an unclean shutdown.
    pub async fn get_sessions_for(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<SessionRecordEntity>, StorageError> {
        let path = self.record_path(date);
        match Self::read_all(&path).await {
            Ok(v) => Ok(v),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(vec![]),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_all(path: &Path) -> Result<Vec<SessionRecordEntity>, std::io::Error> {
        debug!("Extracting {path:?}");
        let file = File::open(path).await?;
        file.lock_shared()?;
        let mut lines = BufReader::new(file).lines();
        let mut sessions = vec![];
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionRecordEntity>(&line) {
                Ok(v) => sessions.push(v),
                Err(e) => warn!("Skipping illegal line in {path:?} {line}: {e}"),
            }
        }

        lines.into_inner().into_inner().unlock_async().await?;

        Ok(sessions)
    }

    async fn append_line(file: &mut File, line: &[u8]) -> Result<(), StorageError> {
        file.write_all(line).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }
}

impl SessionSink for SessionStorageImpl {
    async fn save(&self, record: &SessionRecordEntity) -> Result<(), StorageError> {
        let path = self.record_path(record.start_time.date_naive());

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = File::options()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        // Never wait for the lock here, the persister decides whether to try again.
        if !file.try_lock_exclusive()? {
            debug!("Record file {path:?} is busy");
            return Err(StorageError::Busy(path));
        }

        let result = Self::append_line(&mut file, &line).await;
        file.unlock_async().await?;
        result
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use anyhow::Result;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use fs4::fs_std::FileExt;
    use tempfile::tempdir;

    use crate::{
        daemon::{categorize::Category, session::Session},
        utils::clock::test_clock::TEST_START_DATE,
    };

    use super::{SessionRecordEntity, SessionSink, SessionStorageImpl, StorageError};

    fn record(app: &str, offset_s: i64, duration_s: i64) -> SessionRecordEntity {
        let start = Utc.from_utc_datetime(&TEST_START_DATE) + Duration::seconds(offset_s);
        let closed = Session::open(app, "window", Category::Other, start)
            .close(start + Duration::seconds(duration_s));
        SessionRecordEntity::from(&closed)
    }

    #[tokio::test]
    async fn test_save_and_read_back() -> Result<()> {
        let dir = tempdir()?;
        let storage = SessionStorageImpl::new(dir.path().to_owned())?;
        let records = [record("Slack", 0, 10), record("Zoom", 10, 25)];

        for r in &records {
            storage.save(r).await?;
        }

        let stored = storage.get_sessions_for(TEST_START_DATE.date()).await?;
        assert_eq!(stored, records.to_vec());
        assert!(dir.path().join("2018-07-04").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_sessions_are_partitioned_by_start_day() -> Result<()> {
        let dir = tempdir()?;
        let storage = SessionStorageImpl::new(dir.path().to_owned())?;

        storage.save(&record("Slack", 0, 10)).await?;
        storage.save(&record("Zoom", 60 * 60 * 24, 10)).await?;

        let next_day = NaiveDate::from_ymd_opt(2018, 7, 5).unwrap();
        assert_eq!(storage.get_sessions_for(TEST_START_DATE.date()).await?.len(), 1);
        assert_eq!(storage.get_sessions_for(next_day).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_day_is_empty() -> Result<()> {
        let dir = tempdir()?;
        let storage = SessionStorageImpl::new(dir.path().to_owned())?;
        assert!(storage
            .get_sessions_for(TEST_START_DATE.date())
            .await?
            .is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupted_lines_are_skipped() -> Result<()> {
        let dir = tempdir()?;
        let storage = SessionStorageImpl::new(dir.path().to_owned())?;
        storage.save(&record("Slack", 0, 10)).await?;
        {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(dir.path().join("2018-07-04"))?;
            file.write_all(b"{\"app_name\": \"Sla\n")?;
        }
        storage.save(&record("Zoom", 10, 10)).await?;

        let stored = storage.get_sessions_for(TEST_START_DATE.date()).await?;
        assert_eq!(
            stored.iter().map(|v| &*v.app_name).collect::<Vec<_>>(),
            vec!["Slack", "Zoom"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_locked_file_is_busy() -> Result<()> {
        let dir = tempdir()?;
        let storage = SessionStorageImpl::new(dir.path().to_owned())?;
        let holder = std::fs::File::create(dir.path().join("2018-07-04"))?;
        assert!(holder.try_lock_exclusive()?);

        let result = storage.save(&record("Slack", 0, 10)).await;
        assert!(matches!(result, Err(StorageError::Busy(_))));
        assert!(result.unwrap_err().is_contention());

        FileExt::unlock(&holder)?;
        storage.save(&record("Slack", 0, 10)).await?;
        Ok(())
    }
}
