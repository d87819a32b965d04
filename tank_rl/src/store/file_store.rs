//! Filesystem model store.
//!
//! ```text
//! root/
//! └── policy/
//!     ├── CURRENT                              "v00000000000000000003-…"
//!     ├── v00000000000000000002-…/             previous, kept for readers
//!     └── v00000000000000000003-…/
//!         ├── meta.json                        version, controller state
//!         ├── weights.bin
//!         └── optimizer.bin
//! ```
//!
//! A write fills a hidden temporary directory, renames it into place, then
//! swaps `CURRENT` with another rename. Readers therefore see either the old
//! entry or the new one, never a partial write. Old version directories are
//! pruned down to `keep_last`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{ModelState, ModelStore};
use crate::error::StoreError;
use crate::learner::kl_controller::ControllerState;

const CURRENT_FILE: &str = "CURRENT";
const META_FILE: &str = "meta.json";
const WEIGHTS_FILE: &str = "weights.bin";
const OPTIMIZER_FILE: &str = "optimizer.bin";
const TMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    version: u64,
    has_optimizer: bool,
    controller: Option<ControllerState>,
}

/// Directory-per-key model store with atomic pointer swaps.
pub struct FileModelStore {
    root: PathBuf,
    keep_last: usize,
    seq: AtomicU64,
    write_lock: Mutex<()>,
}

impl FileModelStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        Ok(Self {
            root,
            keep_last: 2,
            seq: AtomicU64::new(seed),
            write_lock: Mutex::new(()),
        })
    }

    /// Number of version directories kept per key (minimum 1).
    pub fn with_keep_last(mut self, n: usize) -> Self {
        self.keep_last = n.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && !key.contains(|c: char| c == '/' || c == '\\')
            && key != CURRENT_FILE;
        if !valid {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid store key '{key}'"),
            )));
        }
        Ok(self.root.join(key))
    }

    fn current_entry(&self, key_dir: &Path) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(key_dir.join(CURRENT_FILE)) {
            Ok(name) => Ok(Some(name.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn entry_name(&self, version: u64) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("v{version:020}-{seq:020}")
    }

    fn prune(&self, key_dir: &Path, current: &str) -> Result<(), StoreError> {
        let mut entries: Vec<String> = fs::read_dir(key_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with('v'))
            .collect();
        entries.sort();

        let excess = entries.len().saturating_sub(self.keep_last);
        for name in entries.into_iter().take(excess) {
            if name == current {
                continue;
            }
            if let Err(e) = fs::remove_dir_all(key_dir.join(&name)) {
                log::warn!("store prune failed: dir={name} error={e}");
            }
        }
        Ok(())
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Version encoded in an entry directory name.
fn entry_version(name: &str) -> Option<u64> {
    name.strip_prefix('v')?.split('-').next()?.parse().ok()
}

impl ModelStore for FileModelStore {
    fn get(&self, key: &str) -> Result<Option<ModelState>, StoreError> {
        let key_dir = self.key_dir(key)?;
        let Some(entry) = self.current_entry(&key_dir)? else {
            return Ok(None);
        };
        let dir = key_dir.join(entry);

        let meta: EntryMeta = serde_json::from_slice(&fs::read(dir.join(META_FILE))?)?;
        let weights = fs::read(dir.join(WEIGHTS_FILE))?;
        let optimizer_state = if meta.has_optimizer {
            Some(fs::read(dir.join(OPTIMIZER_FILE))?)
        } else {
            None
        };

        Ok(Some(ModelState {
            weights,
            optimizer_state,
            version: meta.version,
            controller: meta.controller,
        }))
    }

    fn set(&self, key: &str, state: ModelState) -> Result<(), StoreError> {
        let key_dir = self.key_dir(key)?;
        let _guard = self.write_lock.lock();
        fs::create_dir_all(&key_dir)?;

        let name = self.entry_name(state.version);
        let tmp_dir = key_dir.join(format!("{TMP_PREFIX}{name}"));
        fs::create_dir_all(&tmp_dir)?;

        let meta = EntryMeta {
            version: state.version,
            has_optimizer: state.optimizer_state.is_some(),
            controller: state.controller,
        };
        write_file(&tmp_dir.join(META_FILE), &serde_json::to_vec(&meta)?)?;
        write_file(&tmp_dir.join(WEIGHTS_FILE), &state.weights)?;
        if let Some(optimizer) = &state.optimizer_state {
            write_file(&tmp_dir.join(OPTIMIZER_FILE), optimizer)?;
        }
        fs::rename(&tmp_dir, key_dir.join(&name))?;

        let tmp_pointer = key_dir.join(format!("{TMP_PREFIX}{CURRENT_FILE}"));
        write_file(&tmp_pointer, name.as_bytes())?;
        fs::rename(&tmp_pointer, key_dir.join(CURRENT_FILE))?;

        log::debug!("store write: key={key} version={} entry={name}", state.version);
        self.prune(&key_dir, &name)
    }

    fn version(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let key_dir = self.key_dir(key)?;
        Ok(self
            .current_entry(&key_dir)?
            .and_then(|entry| entry_version(&entry)))
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().join(CURRENT_FILE).is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
