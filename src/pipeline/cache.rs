//! Reproducibility-keyed stage cache
//!
//! A stage result is addressed by a BLAKE3 digest of everything that decides
//! it: document identity, stage name and fingerprint, dependency contents,
//! the retrieval settings in effect and caller parameters. Each key is populated at most once even under
//! concurrent requests; a failed or abandoned computation leaves the key
//! empty. Results can optionally be persisted as one JSON file per key.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::ingest::DocumentId;
use crate::logging::short_id;
use crate::pipeline::stage::{RunParams, StageDefinition, StageResult};

/// Hex BLAKE3 digest
pub type CacheKey = String;

/// Pure function of its inputs; dependency order does not matter.
/// `settings` describes how context is obtained (index, strategy, budget).
pub fn reproducibility_key(
    document_id: &DocumentId,
    stage: &StageDefinition,
    dependencies: &[(&str, &str)],
    settings: &str,
    params: &RunParams,
) -> CacheKey {
    let mut deps: Vec<&(&str, &str)> = dependencies.iter().collect();
    deps.sort();

    let mut hasher = blake3::Hasher::new();
    update_field(&mut hasher, document_id.as_str());
    update_field(&mut hasher, &stage.name);
    update_field(&mut hasher, &stage.fingerprint());
    for (name, content) in deps {
        update_field(&mut hasher, name);
        update_field(&mut hasher, content);
    }
    update_field(&mut hasher, settings);
    hasher.update(&params.run_id.to_le_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Key for content that did not come from a model call
pub fn content_key(stage_name: &str, content: &str) -> CacheKey {
    let mut hasher = blake3::Hasher::new();
    update_field(&mut hasher, "content");
    update_field(&mut hasher, stage_name);
    update_field(&mut hasher, content);
    hasher.finalize().to_hex().to_string()
}

// Length-prefixed so ("ab","c") and ("a","bc") differ
fn update_field(hasher: &mut blake3::Hasher, field: &str) {
    hasher.update(&(field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}

/// Statistics for cache performance tracking
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub disk_hits: usize,
    pub writes: usize,
}

impl CacheStats {
    /// Calculate cache hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Shared across sessions; cheap to clone behind an `Arc`
#[derive(Debug, Default)]
pub struct StageCache {
    cells: Mutex<HashMap<CacheKey, Arc<OnceCell<StageResult>>>>,
    dir: Option<PathBuf>,
    stats: Mutex<CacheStats>,
}

impl StageCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Memory cache backed by JSON files under `dir`
    pub fn persistent(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: Some(dir),
            ..Self::default()
        })
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    /// Completed entry for `key`, from memory or disk
    pub fn get(&self, key: &str) -> Option<StageResult> {
        if let Some(result) = self.cell(key).get() {
            return Some(result.clone());
        }
        self.load(key)
    }

    /// Return the entry for `key`, running `compute` only if it is absent.
    ///
    /// Concurrent callers with the same key wait for one computation. An
    /// error or a dropped future leaves the key unpopulated so the next
    /// caller computes afresh. The flag is `true` on a hit.
    pub async fn get_or_try_insert_with<F, Fut>(&self, key: &str, compute: F) -> Result<(StageResult, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StageResult>>,
    {
        let cell = self.cell(key);

        if let Some(result) = cell.get() {
            self.record(|s| s.hits += 1);
            return Ok((result.clone(), true));
        }

        let computed = AtomicBool::new(false);
        let result = cell
            .get_or_try_init(|| async {
                if let Some(stored) = self.load(key) {
                    self.record(|s| s.disk_hits += 1);
                    return Ok(stored);
                }
                computed.store(true, Ordering::SeqCst);
                compute().await
            })
            .await?
            .clone();

        if computed.load(Ordering::SeqCst) {
            self.record(|s| s.misses += 1);
            self.store(key, &result);
            Ok((result, false))
        } else {
            self.record(|s| s.hits += 1);
            Ok((result, true))
        }
    }

    fn cell(&self, key: &str) -> Arc<OnceCell<StageResult>> {
        let mut cells = match self.cells.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cells.entry(key.to_string()).or_default().clone()
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    fn path_for(&self, key: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(format!("{}.json", key)))
    }

    fn load(&self, key: &str) -> Option<StageResult> {
        let path = self.path_for(key)?;
        let json = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&json) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable cache entry");
                None
            }
        }
    }

    // Write-then-rename so a crash never leaves a torn entry
    fn store(&self, key: &str, result: &StageResult) {
        let Some(path) = self.path_for(key) else {
            return;
        };
        let tmp = path.with_extension("json.tmp");
        let written = serde_json::to_string_pretty(result)
            .map_err(std::io::Error::from)
            .and_then(|json| fs::write(&tmp, json))
            .and_then(|_| fs::rename(&tmp, &path));

        match written {
            Ok(()) => {
                self.record(|s| s.writes += 1);
                debug!(key = short_id(key), "cache entry persisted");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to persist cache entry"),
        }
    }
}
