use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::unit::is_unit_name;

static GLOBAL_REGISTRY: OnceLock<Arc<SourceRegistry>> = OnceLock::new();

pub const DEFAULT_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub capacity: usize,
    /// Also write artifacts to `<spill_dir>/<unit name>`.
    pub spill_dir: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            spill_dir: None,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    config: RegistryConfig,
    entries: IndexMap<String, Arc<str>>,
}

/// Source text of synthetic units, by unit name.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    state: Mutex<RegistryState>,
}

impl SourceRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                config,
                entries: IndexMap::new(),
            }),
        }
    }

    /// The process-wide registry used by [`crate::evaluate`].
    pub fn global() -> Arc<SourceRegistry> {
        Arc::clone(GLOBAL_REGISTRY.get_or_init(|| Arc::new(SourceRegistry::default())))
    }

    pub fn config(&self) -> RegistryConfig {
        self.state.lock().config.clone()
    }

    pub fn configure(&self, config: RegistryConfig) {
        let mut state = self.state.lock();
        state.config = config;
        state.evict_over_capacity();
    }

    pub fn register(&self, name: &str, text: &str) {
        let mut state = self.state.lock();
        let text: Arc<str> = match state.entries.shift_remove(name) {
            Some(existing) if &*existing == text => existing,
            _ => Arc::from(text),
        };
        if let Some(dir) = &state.config.spill_dir {
            spill(dir, name, &text);
        }
        state.entries.insert(name.to_string(), text);
        trace!(unit = name, entries = state.entries.len(), "registered source");
        state.evict_over_capacity();
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<str>> {
        let state = self.state.lock();
        if let Some(text) = state.entries.get(name) {
            return Some(Arc::clone(text));
        }
        let dir = state.config.spill_dir.as_ref()?;
        if !is_unit_name(name) {
            return None;
        }
        fs::read_to_string(dir.join(name)).ok().map(Arc::from)
    }

    pub fn release(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state.entries.shift_remove(name).is_some();
        if removed {
            state.unlink(name);
        }
        removed
    }

    /// Returns how many artifacts were dropped, spill files included.
    pub fn prune(&self) -> usize {
        let mut state = self.state.lock();
        let mut dropped = state.evict_over_capacity();
        let Some(dir) = state.config.spill_dir.clone() else {
            return dropped;
        };
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(err) => {
                warn!(dir = %dir.display(), %err, "cannot list spill directory");
                return dropped;
            }
        };
        for entry in listing.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if is_unit_name(name) && !state.entries.contains_key(name) {
                match fs::remove_file(entry.path()) {
                    Ok(()) => dropped += 1,
                    Err(err) => warn!(unit = name, %err, "cannot remove stale spill file"),
                }
            }
        }
        debug!(dropped, "pruned source registry");
        dropped
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        let names: Vec<String> = state.entries.keys().cloned().collect();
        state.entries.clear();
        for name in names {
            state.unlink(&name);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().entries.contains_key(name)
    }
}

impl RegistryState {
    fn evict_over_capacity(&mut self) -> usize {
        let mut evicted = 0;
        while self.entries.len() > self.config.capacity {
            let Some((name, _)) = self.entries.shift_remove_index(0) else {
                break;
            };
            trace!(unit = %name, "evicting source");
            self.unlink(&name);
            evicted += 1;
        }
        evicted
    }

    fn unlink(&self, name: &str) {
        let Some(dir) = &self.config.spill_dir else {
            return;
        };
        let path = dir.join(name);
        if let Err(err) = fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), %err, "cannot remove spill file");
            }
        }
    }
}

fn spill(dir: &Path, name: &str, text: &str) {
    let result = fs::create_dir_all(dir).and_then(|()| fs::write(dir.join(name), text));
    if let Err(err) = result {
        warn!(dir = %dir.display(), unit = name, %err, "cannot write spill file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::SourceUnit;

    #[test]
    fn register_deduplicates_and_bounds_entries() {
        let registry = SourceRegistry::new(RegistryConfig {
            capacity: 2,
            spill_dir: None,
        });
        registry.register("a", "1");
        registry.register("b", "2");
        registry.register("a", "1");
        registry.register("c", "3");
        assert_eq!(registry.len(), 2);
        assert!(!registry.contains("b"));
        assert_eq!(registry.resolve("a").as_deref(), Some("1"));
    }

    #[test]
    fn release_forgets_entries() {
        let registry = SourceRegistry::default();
        registry.register("a", "1");
        assert!(registry.release("a"));
        assert!(!registry.release("a"));
        assert!(registry.is_empty());
    }

    #[test]
    fn spill_files_follow_the_registry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = SourceRegistry::new(RegistryConfig {
            capacity: 8,
            spill_dir: Some(dir.path().to_path_buf()),
        });
        let unit = SourceUnit::new("x = 1");
        registry.register(unit.name(), "x = 1");
        assert!(dir.path().join(unit.name()).exists());

        let stale = SourceUnit::new("stale");
        fs::write(dir.path().join(stale.name()), "stale").expect("write");
        fs::write(dir.path().join("unrelated.txt"), "keep").expect("write");
        assert_eq!(registry.resolve(stale.name()).as_deref(), Some("stale"));
        assert_eq!(registry.prune(), 1);
        assert!(!dir.path().join(stale.name()).exists());
        assert!(dir.path().join("unrelated.txt").exists());

        registry.clear();
        assert!(!dir.path().join(unit.name()).exists());
    }
}
