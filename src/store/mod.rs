//! Persisted per-issue retry state.
//!
//! One JSON file per issue under the state directory. Writes go through a
//! temporary file that is renamed into place, so a crash never leaves a
//! truncated record and distinct issues never touch the same file.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::StoreError;

/// Retry bookkeeping for one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueState {
    pub id: u64,
    pub retry_count: u32,
    /// Prompt text seen on the last attempt.
    #[serde(default)]
    pub prompt: String,
}

impl IssueState {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            retry_count: 0,
            prompt: String::new(),
        }
    }
}

/// File-per-key store of [`IssueState`] records.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: u64) -> PathBuf {
        self.dir.join(format!("issue-{}.json", id))
    }

    /// Read the record for `id`, creating a zeroed one on first access.
    pub fn get(&self, id: u64) -> Result<IssueState, StoreError> {
        match std::fs::read_to_string(self.path_for(id)) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let state = IssueState::new(id);
                self.put(&state)?;
                Ok(state)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn put(&self, state: &IssueState) -> Result<(), StoreError> {
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(serde_json::to_string_pretty(state)?.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(self.path_for(state.id))
            .map_err(|e| StoreError::Persist(e.to_string()))?;
        Ok(())
    }

    /// Count a new attempt for `id` unless the retry ceiling is reached.
    ///
    /// A changed `prompt` resets the count. The incremented count is
    /// persisted before returning, so an attempt that crashes still counts.
    /// Returns `None` when the issue has used up its retries.
    pub fn begin_attempt(
        &self,
        id: u64,
        prompt: &str,
        max_retries: u32,
    ) -> Result<Option<IssueState>, StoreError> {
        let mut state = self.get(id)?;

        if state.prompt != prompt {
            if state.retry_count > 0 {
                info!(issue_id = id, "Issue text changed, resetting retry count");
            }
            state.retry_count = 0;
            state.prompt = prompt.to_string();
        }

        if state.retry_count > max_retries {
            debug!(issue_id = id, retries = state.retry_count, "Retry ceiling reached");
            self.put(&state)?;
            return Ok(None);
        }

        state.retry_count += 1;
        self.put(&state)?;
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_creates_and_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(tmp.path()).unwrap();

        let state = store.get(42).unwrap();
        assert_eq!(state, IssueState::new(42));
        assert!(tmp.path().join("issue-42.json").exists());
    }

    #[test]
    fn test_state_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = FileStateStore::new(tmp.path()).unwrap();
            store.begin_attempt(7, "fix it", 3).unwrap();
        }
        let reopened = FileStateStore::new(tmp.path()).unwrap();
        assert_eq!(reopened.get(7).unwrap().retry_count, 1);
    }

    #[test]
    fn test_retry_ceiling_and_reset() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(tmp.path()).unwrap();

        let counts: Vec<_> = (0..5)
            .map(|_| store.begin_attempt(1, "p", 2).unwrap().map(|s| s.retry_count))
            .collect();
        assert_eq!(counts, vec![Some(1), Some(2), Some(3), None, None]);

        let reset = store.begin_attempt(1, "p edited", 2).unwrap().unwrap();
        assert_eq!(reset.retry_count, 1);
        assert_eq!(reset.prompt, "p edited");
    }

    #[test]
    fn test_distinct_keys_are_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(tmp.path()).unwrap();

        std::thread::scope(|scope| {
            for id in 0..8u64 {
                let store = &store;
                scope.spawn(move || {
                    for _ in 0..3 {
                        store.begin_attempt(id, "same", 10).unwrap();
                    }
                });
            }
        });

        for id in 0..8u64 {
            assert_eq!(store.get(id).unwrap().retry_count, 3);
        }
    }
}
