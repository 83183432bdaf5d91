//! Run persistence: `KvStore` implementations and the bounded run
//! history.
//!
//! The store is deliberately dumb: string keys to string values with
//! last-writer-wins semantics, so a browser localStorage, a file
//! directory or a test map can all back it. Everything tolerates the
//! store being absent.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use core_types::{KvStore, SimulationRun};
use parking_lot::Mutex;

pub const LAST_RUN_KEY: &str = "gridedge.last_run";
pub const HISTORY_KEY: &str = "gridedge.history";

/// In-memory store; the default when no persistence is wired up.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.lock().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) {
        self.items.lock().insert(key.to_string(), value.to_string());
    }

    fn remove_item(&self, key: &str) {
        self.items.lock().remove(key);
    }
}

/// One file per key under a root directory, written atomically via a
/// tmp-file rename. Read and write failures degrade to "item absent";
/// persistence is best-effort by contract.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).context("create store dir")?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let slug = key
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch == '.' {
                    ch
                } else {
                    '_'
                }
            })
            .collect::<String>();
        self.root.join(format!("{slug}.json"))
    }

    fn write_atomic(&self, target: &Path, value: &str) -> Result<()> {
        let tmp = target.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp).context("create store tmp")?;
            file.write_all(value.as_bytes()).context("write store tmp")?;
            file.sync_all().context("sync store tmp")?;
        }
        if let Err(err) = fs::rename(&tmp, target) {
            if target.exists() {
                let _ = fs::remove_file(target);
                fs::rename(&tmp, target).context("replace store file")?;
            } else {
                return Err(err).context("rename store tmp");
            }
        }
        Ok(())
    }
}

impl KvStore for JsonFileStore {
    fn get_item(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.path_for(key)).ok()
    }

    fn set_item(&self, key: &str, value: &str) {
        let target = self.path_for(key);
        if let Err(err) = self.write_atomic(&target, value) {
            tracing::warn!(%key, %err, "store write failed");
        }
    }

    fn remove_item(&self, key: &str) {
        let _ = fs::remove_file(self.path_for(key));
    }
}

/// Most-recent-first ring buffer of terminal runs.
#[derive(Debug, Clone)]
pub struct RunHistory {
    limit: usize,
    entries: VecDeque<SimulationRun>,
}

impl RunHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Appends a terminal run, evicting the oldest past the cap.
    pub fn push(&mut self, run: SimulationRun) {
        self.entries.push_back(run);
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&SimulationRun> {
        self.entries.back()
    }

    /// Newest first.
    pub fn snapshot(&self) -> Vec<SimulationRun> {
        self.entries.iter().rev().cloned().collect()
    }

    /// Restores the buffer from the store, keeping at most `limit`
    /// newest entries. Decode failures reset to empty.
    pub fn load(store: &dyn KvStore, limit: usize) -> Self {
        let mut history = Self::new(limit);
        let Some(raw) = store.get_item(HISTORY_KEY) else {
            return history;
        };
        let Ok(runs) = serde_json::from_str::<Vec<SimulationRun>>(&raw) else {
            tracing::warn!("undecodable run history, starting fresh");
            return history;
        };
        // Stored newest-first; replay oldest-first so eviction keeps the
        // newest.
        for run in runs.into_iter().rev() {
            history.push(run);
        }
        history
    }

    pub fn persist(&self, store: &dyn KvStore) {
        match serde_json::to_string(&self.snapshot()) {
            Ok(raw) => store.set_item(HISTORY_KEY, &raw),
            Err(err) => tracing::warn!(%err, "run history encode failed"),
        }
    }
}

pub fn persist_last_run(store: &dyn KvStore, run: &SimulationRun) {
    match serde_json::to_string(run) {
        Ok(raw) => store.set_item(LAST_RUN_KEY, &raw),
        Err(err) => tracing::warn!(%err, "last run encode failed"),
    }
}

pub fn load_last_run(store: &dyn KvStore) -> Option<SimulationRun> {
    let raw = store.get_item(LAST_RUN_KEY)?;
    serde_json::from_str(&raw).ok()
}
