//! Local record of the last converged challenge.
//!
//! The state file is the caller-side source of truth between runs: it holds the
//! remote id and the model returned by the last successful reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::Challenge;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error on state file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to persist state file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Contents of a state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Incremented on every write.
    pub serial: u64,
    pub updated_at: DateTime<Utc>,
    /// Set when the last apply failed after the challenge was created.
    #[serde(default)]
    pub tainted: bool,
    pub challenge: Challenge,
}

/// A state file on disk.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StateError {
        StateError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    /// `Ok(None)` when no state was written yet.
    pub fn load(&self) -> Result<Option<StateSnapshot>, StateError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Write `challenge` as the new state, replacing the file atomically.
    pub fn save(&self, challenge: &Challenge, tainted: bool) -> Result<StateSnapshot, StateError> {
        let serial = self.load()?.map(|s| s.serial + 1).unwrap_or(1);
        let state = StateSnapshot {
            serial,
            updated_at: Utc::now(),
            tainted,
            challenge: challenge.clone(),
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        let content = serde_json::to_string_pretty(&state)?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path)?;

        tracing::debug!(path = %self.path.display(), serial, "state saved");
        Ok(state)
    }

    pub fn remove(&self) -> Result<(), StateError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| self.io_error(e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChallengeType;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_returns_none() {
        let dir = TempDir::new().expect("tempdir");
        let state = StateFile::new(dir.path().join("state.json"));
        assert!(state.load().expect("load should succeed").is_none());
    }

    #[test]
    fn test_save_then_load_increments_serial() {
        let dir = TempDir::new().expect("tempdir");
        let state = StateFile::new(dir.path().join("nested").join("state.json"));

        let mut challenge = Challenge::new("a", "b", "c", ChallengeType::Standard, 100);
        challenge.id = "4".to_string();

        let first = state.save(&challenge, false).expect("save should succeed");
        assert_eq!(first.serial, 1);

        challenge.value = 200;
        let second = state.save(&challenge, true).expect("save should succeed");
        assert_eq!(second.serial, 2);

        let loaded = state.load().expect("load").expect("state should exist");
        assert_eq!(loaded.serial, 2);
        assert!(loaded.tainted);
        assert_eq!(loaded.challenge.value, 200);
        assert_eq!(loaded.challenge.id, "4");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().expect("tempdir");
        let state = StateFile::new(dir.path().join("state.json"));
        let challenge = Challenge::new("a", "b", "c", ChallengeType::Standard, 1);

        state.save(&challenge, false).expect("save");
        state.remove().expect("remove");
        assert!(!state.path().exists());
        state.remove().expect("second remove");
    }
}
