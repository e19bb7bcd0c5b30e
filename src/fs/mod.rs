// src/fs/mod.rs

//! Filesystem access for temporary files handed to containers.

use std::fmt::Debug;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub mod mock;

/// Abstract filesystem interface.
pub trait FileSystem: Send + Sync + Debug {
    /// Create a file that outlives this process until explicitly deleted.
    fn create_temp_file(&self, prefix: &str, contents: &[u8]) -> Result<PathBuf>;

    /// Create a directory that outlives this process until explicitly deleted.
    fn create_temp_dir(&self, prefix: &str) -> Result<PathBuf>;

    fn remove_file(&self, path: &Path) -> Result<()>;
    fn remove_dir_all(&self, path: &Path) -> Result<()>;
    fn read_to_string(&self, path: &Path) -> Result<String>;
    fn exists(&self, path: &Path) -> bool;
}

/// Implementation that uses `std::fs` and `tempfile`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn create_temp_file(&self, prefix: &str, contents: &[u8]) -> Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix(prefix)
            .tempfile()
            .with_context(|| format!("creating temporary file with prefix {prefix:?}"))?;
        file.write_all(contents)
            .with_context(|| format!("writing to temporary file {:?}", file.path()))?;

        let (_, path) = file
            .keep()
            .with_context(|| format!("keeping temporary file with prefix {prefix:?}"))?;
        Ok(path)
    }

    fn create_temp_dir(&self, prefix: &str) -> Result<PathBuf> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .with_context(|| format!("creating temporary directory with prefix {prefix:?}"))?;
        Ok(dir.keep())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).with_context(|| format!("removing file {path:?}"))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path).with_context(|| format!("removing directory {path:?}"))
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("reading file {path:?}"))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
