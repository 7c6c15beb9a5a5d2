//! On-disk cache tier.
//!
//! [`DiskIndex`] is the in-memory key -> file name mapping and is only ever
//! touched under the manager's lock. The file operations are free functions
//! that run on the blocking pool so that request handling never waits behind
//! file I/O while holding the lock.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::filename;
use crate::key::CacheKey;

#[derive(Debug, Default)]
pub struct DiskIndex {
    entries: HashMap<CacheKey, String>,
}

impl DiskIndex {
    /// Resolve and create the cache directory, then index the files already in it.
    pub async fn init(cache_dir: &Path, base_dir: &Path) -> Result<(PathBuf, Self)> {
        let dir = resolve_cache_dir(cache_dir, base_dir);
        let scan_dir = dir.clone();

        let entries = tokio::task::spawn_blocking(move || {
            create_cache_dir(&scan_dir)?;
            scan(&scan_dir).map_err(|e| Error::io_init(scan_dir.clone(), e))
        })
        .await
        .map_err(|e| Error::Task(format!("cache dir scan: {e}")))??;

        info!(dir = %dir.display(), files = entries.len(), "TTS file cache loaded");
        Ok((dir, Self { entries }))
    }

    pub fn get(&self, key: &CacheKey) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: CacheKey, filename: String) {
        self.entries.insert(key, filename);
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<String> {
        self.entries.remove(key)
    }

    /// Empty the index, returning every file name it held.
    pub fn drain(&mut self) -> Vec<String> {
        self.entries.drain().map(|(_, filename)| filename).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn resolve_cache_dir(cache_dir: &Path, base_dir: &Path) -> PathBuf {
    if cache_dir.is_absolute() {
        cache_dir.to_path_buf()
    } else {
        base_dir.join(cache_dir)
    }
}

fn create_cache_dir(dir: &Path) -> Result<()> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(Error::io_init(
            dir.to_path_buf(),
            std::io::Error::other("not a directory"),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(dir = %dir.display(), "Create cache dir");
            fs::create_dir_all(dir).map_err(|e| Error::io_init(dir.to_path_buf(), e))
        }
        Err(e) => Err(Error::io_init(dir.to_path_buf(), e)),
    }
}

/// Map every grammar-matching file in `dir` to its cache key.
fn scan(dir: &Path) -> std::io::Result<HashMap<CacheKey, String>> {
    let mut entries = HashMap::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        match filename::parse(&name) {
            // Keep the on-disk spelling so the file can be opened again
            Ok(parsed) => {
                entries.insert(parsed.key, name);
            }
            Err(_) => debug!(file = %name, "Ignoring non-cache file"),
        }
    }
    Ok(entries)
}

/// Durably write `data` to `dir/filename` (temp file + rename).
pub(crate) async fn persist(dir: PathBuf, filename: String, data: Bytes) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        write_atomic(&dir, &filename, &data).map_err(|e| Error::io_write(&filename, e))
    })
    .await
    .map_err(|e| Error::Task(format!("cache write: {e}")))?
}

fn write_atomic(dir: &Path, filename: &str, data: &[u8]) -> std::io::Result<()> {
    // Leading dot keeps half-written files out of the grammar, a crash never
    // leaves something that a later scan would index. Each writer gets its
    // own temp file; it is removed on drop if the rename never happens.
    let mut temp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(dir.join(filename)).map_err(|e| e.error)?;
    Ok(())
}

/// Read a cached file; empty files count as unreadable.
pub(crate) async fn load(dir: PathBuf, key: CacheKey, filename: String) -> Result<Bytes> {
    tokio::task::spawn_blocking(move || {
        let path = dir.join(&filename);
        match fs::read(&path) {
            Ok(data) if data.is_empty() => Err(Error::CacheRead {
                key: key.to_string(),
                reason: format!("{} is empty", path.display()),
            }),
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) => Err(Error::CacheRead {
                key: key.to_string(),
                reason: format!("can't read {}: {e}", path.display()),
            }),
        }
    })
    .await
    .map_err(|e| Error::Task(format!("cache read: {e}")))?
}

/// Delete cache files, logging (not failing) on each error.
pub(crate) async fn remove_files(dir: PathBuf, filenames: Vec<String>) {
    let result = tokio::task::spawn_blocking(move || {
        for filename in filenames {
            if let Err(e) = fs::remove_file(dir.join(&filename)) {
                warn!(file = %filename, error = %e, "Can't remove cache file");
            }
        }
    })
    .await;
    if let Err(e) = result {
        warn!(error = %e, "Cache file removal task failed");
    }
}
