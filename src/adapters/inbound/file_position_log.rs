use crate::domains::tracking::{Position, PositionLog, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Position log stored as JSON Lines, one file per agent.
///
/// Several processes may share the directory; appends of a single line are
/// atomic on local file systems.
pub struct FilePositionLog {
    base_path: PathBuf,
    // Timestamp of the last line known to be on disk, per agent. An entry is
    // cleared while a write is in flight.
    tails: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl FilePositionLog {
    pub fn new<P: Into<PathBuf>>(base_path: P) -> Self {
        Self {
            base_path: base_path.into(),
            tails: Mutex::new(HashMap::new()),
        }
    }

    fn tails(&self) -> std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.tails.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn tail(&self, agent_id: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        let cached = self.tails().get(agent_id).copied();
        if cached.is_some() {
            return Ok(cached);
        }
        Ok(self.latest(agent_id).await?.map(|position| position.recorded_at))
    }

    fn file_path(&self, agent_id: &str) -> PathBuf {
        let file_stem: String = agent_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_path.join(format!("{}.jsonl", file_stem))
    }

    async fn read_all(&self, agent_id: &str) -> Result<Vec<Position>, StorageError> {
        let file_path = self.file_path(agent_id);
        if !tokio::fs::try_exists(&file_path).await? {
            return Ok(Vec::new());
        }

        let file = File::open(&file_path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut positions = Vec::new();
        let mut line_number = 0usize;

        while let Some(line) = lines.next_line().await? {
            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            let position: Position = serde_json::from_str(&line).map_err(|e| {
                StorageError::Backend(format!(
                    "{} line {}: {}",
                    file_path.display(),
                    line_number,
                    e
                ))
            })?;
            // Another writer may share the directory.
            if position.agent_id == agent_id {
                positions.push(position);
            }
        }

        Ok(positions)
    }
}

#[async_trait]
impl PositionLog for FilePositionLog {
    async fn append(&self, position: &Position) -> Result<(), StorageError> {
        if self
            .tail(&position.agent_id)
            .await?
            .is_some_and(|last| last >= position.recorded_at)
        {
            return Ok(());
        }
        self.tails().remove(&position.agent_id);

        tokio::fs::create_dir_all(&self.base_path).await?;

        let mut line = serde_json::to_vec(position)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path(&position.agent_id))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        self.tails()
            .insert(position.agent_id.clone(), position.recorded_at);
        Ok(())
    }

    async fn latest(&self, agent_id: &str) -> Result<Option<Position>, StorageError> {
        Ok(self.read_all(agent_id).await?.pop())
    }

    async fn history(&self, agent_id: &str, limit: usize) -> Result<Vec<Position>, StorageError> {
        let mut positions = self.read_all(agent_id).await?;
        let skip = positions.len().saturating_sub(limit);
        Ok(positions.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    #[tokio::test]
    async fn appends_and_reads_back_per_agent() {
        let temp_dir = TempDir::new().unwrap();
        let log = FilePositionLog::new(temp_dir.path().join("positions"));
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        for i in 0..3 {
            let at = start + Duration::seconds(i);
            log.append(&Position::new("driver-1", 40.0, -73.0 + i as f64 * 0.001, at).unwrap())
                .await
                .unwrap();
        }
        log.append(&Position::new("driver-2", 41.0, -74.0, start).unwrap())
            .await
            .unwrap();

        let latest = log.latest("driver-1").await.unwrap().unwrap();
        assert_eq!(latest.recorded_at, start + Duration::seconds(2));

        let history = log.history("driver-1", 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].recorded_at, start + Duration::seconds(1));

        assert_eq!(log.history("driver-2", 10).await.unwrap().len(), 1);
        assert!(log.latest("driver-3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_append_writes_one_line() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("positions");
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let position = Position::new("driver-1", 40.0, -73.0, at).unwrap();

        let log = FilePositionLog::new(path.clone());
        log.append(&position).await.unwrap();
        log.append(&position).await.unwrap();

        // A fresh instance reads the tail back from disk.
        let reopened = FilePositionLog::new(path);
        reopened.append(&position).await.unwrap();
        assert_eq!(reopened.history("driver-1", 10).await.unwrap().len(), 1);
    }
}
