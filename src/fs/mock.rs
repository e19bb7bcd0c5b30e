// src/fs/mock.rs

use super::FileSystem;
use anyhow::{Result, anyhow};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEntry {
    File(Vec<u8>),
    Dir,
}

#[derive(Debug, Default)]
struct MockState {
    entries: BTreeMap<PathBuf, MockEntry>,
    next_id: u64,
    failing_removals: BTreeSet<PathBuf>,
}

/// In-memory filesystem. Temporary paths live under `/mock-tmp`.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    state: Arc<Mutex<MockState>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_path(&self, prefix: &str) -> PathBuf {
        let mut state = self.state();
        state.next_id += 1;
        PathBuf::from("/mock-tmp").join(format!("{prefix}{}", state.next_id))
    }

    /// Make removal of `path` fail from now on.
    pub fn fail_removal_of(&self, path: impl AsRef<Path>) {
        self.state()
            .failing_removals
            .insert(path.as_ref().to_path_buf());
    }

    /// All paths currently present.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.state().entries.keys().cloned().collect()
    }

    pub fn entry(&self, path: impl AsRef<Path>) -> Option<MockEntry> {
        self.state().entries.get(path.as_ref()).cloned()
    }

    fn remove(&self, path: &Path, expected_dir: bool) -> Result<()> {
        let mut state = self.state();
        if state.failing_removals.contains(path) {
            return Err(anyhow!("Permission denied: {:?}", path));
        }
        match state.entries.get(path) {
            Some(MockEntry::Dir) if expected_dir => {}
            Some(MockEntry::File(_)) if !expected_dir => {}
            Some(_) => return Err(anyhow!("Wrong entry type: {:?}", path)),
            None => return Err(anyhow!("Not found: {:?}", path)),
        }
        state.entries.retain(|p, _| !p.starts_with(path));
        Ok(())
    }
}

impl FileSystem for MockFileSystem {
    fn create_temp_file(&self, prefix: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = self.next_path(prefix);
        self.state()
            .entries
            .insert(path.clone(), MockEntry::File(contents.to_vec()));
        Ok(path)
    }

    fn create_temp_dir(&self, prefix: &str) -> Result<PathBuf> {
        let path = self.next_path(prefix);
        self.state().entries.insert(path.clone(), MockEntry::Dir);
        Ok(path)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.remove(path, false)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        self.remove(path, true)
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        match self.state().entries.get(path) {
            Some(MockEntry::File(content)) => {
                String::from_utf8(content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            Some(MockEntry::Dir) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        self.state().entries.contains_key(path)
    }
}
