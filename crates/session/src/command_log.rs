use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stata_code_chunker::{ChunkPlan, DelimiterMode, Fingerprint};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// What the dispatcher hands over before it sends a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub fingerprint: Fingerprint,
    pub starting_mode: DelimiterMode,
    /// Executable text, exactly what was hashed
    pub normalized_text: String,
    pub excluded_text: Option<String>,
}

impl LogEntry {
    #[must_use]
    pub fn from_plan(plan: &ChunkPlan) -> Self {
        Self {
            fingerprint: plan.fingerprint.clone(),
            starting_mode: plan.starting_mode,
            normalized_text: plan.normalized_text(),
            excluded_text: plan.excluded.as_ref().map(|region| region.text.clone()),
        }
    }
}

/// Persists submitted code keyed by fingerprint
#[async_trait]
pub trait CommandLog: Send + Sync {
    async fn record(&self, entry: &LogEntry) -> Result<()>;
}

/// Writes `<fingerprint>.do` (and `<fingerprint>.excluded.do`) under a directory
#[derive(Clone, Debug)]
pub struct FileCommandLog {
    base_dir: PathBuf,
}

impl FileCommandLog {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[must_use]
    pub fn code_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.base_dir.join(format!("{fingerprint}.do"))
    }

    #[must_use]
    pub fn excluded_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.base_dir.join(format!("{fingerprint}.excluded.do"))
    }
}

#[async_trait]
impl CommandLog for FileCommandLog {
    async fn record(&self, entry: &LogEntry) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;

        let code = self.code_path(&entry.fingerprint);
        write_atomic(&code, &with_trailing_newline(&entry.normalized_text)).await?;

        if let Some(excluded) = entry.excluded_text.as_deref() {
            let path = self.excluded_path(&entry.fingerprint);
            write_atomic(&path, &with_trailing_newline(excluded)).await?;
        }

        log::debug!("recorded {} in {}", entry.fingerprint.short(), self.base_dir.display());
        Ok(())
    }
}

fn with_trailing_newline(text: &str) -> String {
    if text.is_empty() || text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}

async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("do.tmp");
    tokio::fs::write(&tmp, contents).await?;
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use stata_code_chunker::{ChunkPlanner, Chunker};
    use tempfile::TempDir;

    fn plan(text: &str) -> ChunkPlan {
        let output = Chunker::default()
            .chunk_str(text, DelimiterMode::Newline)
            .unwrap();
        ChunkPlanner::default()
            .plan(output, DelimiterMode::Newline)
            .unwrap()
    }

    #[tokio::test]
    async fn writes_code_and_excluded_text() {
        let dir = TempDir::new().unwrap();
        let log = FileCommandLog::new(dir.path().join("log"));
        let plan = plan("di 1 // one\nexit\ndi 2\n");

        log.record(&LogEntry::from_plan(&plan)).await.unwrap();

        let code = std::fs::read_to_string(log.code_path(&plan.fingerprint)).unwrap();
        assert_eq!(code, "di 1\n");
        let excluded = std::fs::read_to_string(log.excluded_path(&plan.fingerprint)).unwrap();
        assert_eq!(excluded, "exit\ndi 2\n");
    }

    #[tokio::test]
    async fn no_excluded_file_without_exit() {
        let dir = TempDir::new().unwrap();
        let log = FileCommandLog::new(dir.path());
        let plan = plan("di 1\n");

        log.record(&LogEntry::from_plan(&plan)).await.unwrap();

        assert!(log.code_path(&plan.fingerprint).exists());
        assert!(!log.excluded_path(&plan.fingerprint).exists());
    }
}
