//! Durable user exceptions: certificates a user chose to trust for a host.
//!
//! An exception is keyed by `(host, fingerprint)`. Hosts compare
//! case-insensitively with one trailing dot ignored.

use crate::fingerprint::Fingerprint;
use crate::util;
use crate::TlsAuthError;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::{debug, info};

const FILE_VERSION: u32 = 1;

/// One stored exception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEntry {
    pub host: String,
    pub fingerprint: Fingerprint,
    /// RFC 3339 time the exception was added.
    pub added_at: String,
}

/// Storage for user exceptions. Shared by every verification in the process.
pub trait ExceptionStore: Send + Sync {
    fn lookup(&self, host: &str, fingerprint: &Fingerprint) -> Result<bool, TlsAuthError>;

    /// Persist an exception. Storing an existing pair is a no-op.
    fn store(&self, host: &str, fingerprint: &Fingerprint) -> Result<(), TlsAuthError>;

    /// Remove the exceptions of `host` (only `fingerprint` when given).
    /// Returns how many were removed.
    fn remove(
        &self,
        host: &str,
        fingerprint: Option<&Fingerprint>,
    ) -> Result<usize, TlsAuthError>;

    fn entries(&self) -> Result<Vec<ExceptionEntry>, TlsAuthError>;
}

/// Canonical form of a host for exception keys.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    host.strip_suffix('.').unwrap_or(host).to_ascii_lowercase()
}

fn contains(entries: &[ExceptionEntry], host: &str, fingerprint: &Fingerprint) -> bool {
    entries
        .iter()
        .any(|e| e.host == host && &e.fingerprint == fingerprint)
}

fn insert(entries: &mut Vec<ExceptionEntry>, host: String, fingerprint: &Fingerprint) -> bool {
    if contains(entries, &host, fingerprint) {
        return false;
    }
    entries.push(ExceptionEntry {
        host,
        fingerprint: fingerprint.clone(),
        added_at: util::format_timestamp(util::now_timestamp()),
    });
    true
}

fn remove_matching(
    entries: &mut Vec<ExceptionEntry>,
    host: &str,
    fingerprint: Option<&Fingerprint>,
) -> usize {
    let before = entries.len();
    entries.retain(|e| e.host != host || fingerprint.is_some_and(|fp| &e.fingerprint != fp));
    before - entries.len()
}

/// Process-local exception store.
#[derive(Debug, Default)]
pub struct MemoryExceptionStore {
    entries: RwLock<Vec<ExceptionEntry>>,
}

impl MemoryExceptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExceptionStore for MemoryExceptionStore {
    fn lookup(&self, host: &str, fingerprint: &Fingerprint) -> Result<bool, TlsAuthError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(contains(&entries, &normalize_host(host), fingerprint))
    }

    fn store(&self, host: &str, fingerprint: &Fingerprint) -> Result<(), TlsAuthError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        insert(&mut entries, normalize_host(host), fingerprint);
        Ok(())
    }

    fn remove(
        &self,
        host: &str,
        fingerprint: Option<&Fingerprint>,
    ) -> Result<usize, TlsAuthError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        Ok(remove_matching(&mut entries, &normalize_host(host), fingerprint))
    }

    fn entries(&self) -> Result<Vec<ExceptionEntry>, TlsAuthError> {
        Ok(self.entries.read().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ExceptionFile {
    version: u32,
    exceptions: Vec<ExceptionEntry>,
}

/// JSON-file exception store.
///
/// The file is read once on open and cached. Writes are serialized by a
/// process-local mutex plus an exclusive advisory lock on a sibling
/// `.lock` file, re-read the file under the lock, and replace it atomically.
#[derive(Debug)]
pub struct FileExceptionStore {
    path: PathBuf,
    cache: RwLock<Vec<ExceptionEntry>>,
    writer: Mutex<()>,
}

impl FileExceptionStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TlsAuthError> {
        let path = path.into();
        let entries = read_file(&path)?;
        debug!(path = %path.display(), count = entries.len(), "opened exception store");
        Ok(FileExceptionStore {
            path,
            cache: RwLock::new(entries),
            writer: Mutex::new(()),
        })
    }

    /// `<data dir>/tlsauth/exceptions.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("tlsauth").join("exceptions.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read-modify-write under both locks; refreshes the cache.
    fn update<R>(
        &self,
        change: impl FnOnce(&mut Vec<ExceptionEntry>) -> (R, bool),
    ) -> Result<R, TlsAuthError> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let lock_file = acquire_lock(&self.path)?;

        let mut entries = read_file(&self.path)?;
        let (out, changed) = change(&mut entries);
        if changed {
            write_file_atomic(&self.path, &entries)?;
        }
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = entries;

        lock_file
            .unlock()
            .map_err(|e| store_error(&self.path, "unlock", e))?;
        Ok(out)
    }
}

impl ExceptionStore for FileExceptionStore {
    fn lookup(&self, host: &str, fingerprint: &Fingerprint) -> Result<bool, TlsAuthError> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        Ok(contains(&cache, &normalize_host(host), fingerprint))
    }

    fn store(&self, host: &str, fingerprint: &Fingerprint) -> Result<(), TlsAuthError> {
        let host = normalize_host(host);
        let added = self.update(|entries| {
            let added = insert(entries, host.clone(), fingerprint);
            (added, added)
        })?;
        if added {
            info!(%host, %fingerprint, "stored certificate exception");
        }
        Ok(())
    }

    fn remove(
        &self,
        host: &str,
        fingerprint: Option<&Fingerprint>,
    ) -> Result<usize, TlsAuthError> {
        let host = normalize_host(host);
        let removed = self.update(|entries| {
            let n = remove_matching(entries, &host, fingerprint);
            (n, n > 0)
        })?;
        if removed > 0 {
            info!(%host, removed, "removed certificate exceptions");
        }
        Ok(removed)
    }

    fn entries(&self) -> Result<Vec<ExceptionEntry>, TlsAuthError> {
        Ok(self.cache.read().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

fn store_error(path: &Path, action: &str, err: impl std::fmt::Display) -> TlsAuthError {
    TlsAuthError::Store(format!("failed to {} {}: {}", action, path.display(), err))
}

fn read_file(path: &Path) -> Result<Vec<ExceptionEntry>, TlsAuthError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(store_error(path, "read", e)),
    };
    let file: ExceptionFile =
        serde_json::from_slice(&bytes).map_err(|e| store_error(path, "parse", e))?;
    if file.version != FILE_VERSION {
        return Err(TlsAuthError::Store(format!(
            "{}: unsupported version {} (expected {})",
            path.display(),
            file.version,
            FILE_VERSION
        )));
    }
    Ok(file.exceptions)
}

fn ensure_parent_dir(path: &Path) -> Result<&Path, TlsAuthError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| store_error(parent, "create", e))?;
    Ok(parent)
}

fn acquire_lock(path: &Path) -> Result<fs::File, TlsAuthError> {
    ensure_parent_dir(path)?;
    let lock_path = path.with_extension("lock");
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| store_error(&lock_path, "open", e))?;
    file.lock_exclusive()
        .map_err(|e| store_error(&lock_path, "lock", e))?;
    Ok(file)
}

fn write_file_atomic(path: &Path, entries: &[ExceptionEntry]) -> Result<(), TlsAuthError> {
    let parent = ensure_parent_dir(path)?;
    let file = ExceptionFile {
        version: FILE_VERSION,
        exceptions: entries.to_vec(),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| store_error(parent, "create temp file in", e))?;
    serde_json::to_writer_pretty(tmp.as_file_mut(), &file)?;
    tmp.as_file_mut()
        .flush()
        .map_err(|e| store_error(path, "flush", e))?;
    tmp.as_file_mut()
        .sync_all()
        .map_err(|e| store_error(path, "sync", e))?;
    tmp.persist(path).map_err(|e| store_error(path, "persist", e))?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fingerprint::DigestAlgorithm;

    fn fp(seed: u8) -> Fingerprint {
        Fingerprint::of_der(&[seed; 8], DigestAlgorithm::Sha256)
    }

    #[test]
    fn host_normalization() {
        assert_eq!(normalize_host("Example.COM."), "example.com");
        assert_eq!(normalize_host(" example.com "), "example.com");
    }

    #[test]
    fn memory_store_matches_normalized_hosts() {
        let store = MemoryExceptionStore::new();
        store.store("Example.com.", &fp(1)).unwrap();
        assert!(store.lookup("example.com", &fp(1)).unwrap());
        assert!(!store.lookup("example.com", &fp(2)).unwrap());
        assert!(!store.lookup("other.com", &fp(1)).unwrap());
    }

    #[test]
    fn storing_twice_keeps_one_entry() {
        let store = MemoryExceptionStore::new();
        store.store("example.com", &fp(1)).unwrap();
        store.store("EXAMPLE.com", &fp(1)).unwrap();
        assert_eq!(store.entries().unwrap().len(), 1);
    }

    #[test]
    fn remove_by_host_or_pair() {
        let store = MemoryExceptionStore::new();
        store.store("example.com", &fp(1)).unwrap();
        store.store("example.com", &fp(2)).unwrap();
        store.store("other.com", &fp(1)).unwrap();
        assert_eq!(store.remove("example.com", Some(&fp(2))).unwrap(), 1);
        assert_eq!(store.remove("example.com", None).unwrap(), 1);
        assert_eq!(store.entries().unwrap().len(), 1);
    }
}
