//! Persistent "already alerted" markers, one set per alert kind.
//!
//! Each namespace is a JSON array of entity keys in its own file under the
//! store directory. Writes go through a temp file and an atomic rename, so a
//! crash leaves either the old or the new set on disk, never a torn file.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use mixboard_shared::domain::EntityKey;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Completion alert fired.
    Notified,
    /// Two-minute warning fired.
    Warned,
}

impl Namespace {
    fn file_name(self) -> &'static str {
        match self {
            Namespace::Notified => "notified.json",
            Namespace::Warned => "warned.json",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("persist error: {0}")]
    Persist(#[from] tempfile::PersistError),
}

pub trait DedupStore: Send + Sync {
    fn has_fired(&self, ns: Namespace, key: &EntityKey) -> bool;

    /// Records `key` in `ns`. Adding a key that is already present is a no-op.
    /// Returns once the marker is durable.
    fn mark_fired(&self, ns: Namespace, key: &EntityKey) -> Result<(), DedupError>;
}

#[derive(Debug, Default)]
struct Sets {
    notified: BTreeSet<EntityKey>,
    warned: BTreeSet<EntityKey>,
}

impl Sets {
    fn get(&self, ns: Namespace) -> &BTreeSet<EntityKey> {
        match ns {
            Namespace::Notified => &self.notified,
            Namespace::Warned => &self.warned,
        }
    }

    fn get_mut(&mut self, ns: Namespace) -> &mut BTreeSet<EntityKey> {
        match ns {
            Namespace::Notified => &mut self.notified,
            Namespace::Warned => &mut self.warned,
        }
    }
}

/// File-backed store living in one directory.
#[derive(Debug)]
pub struct FileDedupStore {
    dir: PathBuf,
    sets: Mutex<Sets>,
}

impl FileDedupStore {
    /// Opens (creating if needed) the store in `dir`. Unreadable or corrupt
    /// namespace files load as empty sets.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DedupError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let sets = Sets {
            notified: load_set(&dir.join(Namespace::Notified.file_name())),
            warned: load_set(&dir.join(Namespace::Warned.file_name())),
        };
        debug!(
            dir = %dir.display(),
            notified = sets.notified.len(),
            warned = sets.warned.len(),
            "dedup store opened"
        );
        Ok(Self {
            dir,
            sets: Mutex::new(sets),
        })
    }

    fn persist(&self, ns: Namespace, set: &BTreeSet<EntityKey>) -> Result<(), DedupError> {
        let keys: Vec<String> = set.iter().map(EntityKey::to_string).collect();
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut tmp, &keys)?;
        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.dir.join(ns.file_name()))?;
        Ok(())
    }
}

fn load_set(path: &Path) -> BTreeSet<EntityKey> {
    let data = match std::fs::read(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeSet::new(),
        Err(e) => {
            warn!(path = %path.display(), error=%e, "dedup: read failed; starting empty");
            return BTreeSet::new();
        }
    };
    match serde_json::from_slice::<Vec<String>>(&data) {
        Ok(keys) => keys
            .iter()
            .filter_map(|k| match k.parse::<EntityKey>() {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(path = %path.display(), error=%e, "dedup: skipping bad marker");
                    None
                }
            })
            .collect(),
        Err(e) => {
            warn!(path = %path.display(), error=%e, "dedup: corrupt file; starting empty");
            BTreeSet::new()
        }
    }
}

impl DedupStore for FileDedupStore {
    fn has_fired(&self, ns: Namespace, key: &EntityKey) -> bool {
        match self.sets.lock() {
            Ok(sets) => sets.get(ns).contains(key),
            Err(poisoned) => poisoned.into_inner().get(ns).contains(key),
        }
    }

    fn mark_fired(&self, ns: Namespace, key: &EntityKey) -> Result<(), DedupError> {
        let mut sets = match self.sets.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !sets.get_mut(ns).insert(key.clone()) {
            return Ok(());
        }
        // Keep the lock while writing so concurrent marks cannot reorder files
        self.persist(ns, sets.get(ns))
    }
}

/// Process-lifetime store used when no data directory is available.
#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    sets: Mutex<Sets>,
}

impl DedupStore for MemoryDedupStore {
    fn has_fired(&self, ns: Namespace, key: &EntityKey) -> bool {
        match self.sets.lock() {
            Ok(sets) => sets.get(ns).contains(key),
            Err(poisoned) => poisoned.into_inner().get(ns).contains(key),
        }
    }

    fn mark_fired(&self, ns: Namespace, key: &EntityKey) -> Result<(), DedupError> {
        let mut sets = match self.sets.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        sets.get_mut(ns).insert(key.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(mix: &str, idx: usize) -> EntityKey {
        EntityKey::new(mix, idx)
    }

    #[test]
    fn markers_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileDedupStore::open(dir.path()).unwrap();
            assert!(!store.has_fired(Namespace::Warned, &key("m1", 0)));
            store.mark_fired(Namespace::Warned, &key("m1", 0)).unwrap();
            store.mark_fired(Namespace::Notified, &key("m1", 1)).unwrap();
        }
        let store = FileDedupStore::open(dir.path()).unwrap();
        assert!(store.has_fired(Namespace::Warned, &key("m1", 0)));
        assert!(store.has_fired(Namespace::Notified, &key("m1", 1)));
        // Namespaces are independent
        assert!(!store.has_fired(Namespace::Notified, &key("m1", 0)));
        assert!(!store.has_fired(Namespace::Warned, &key("m1", 1)));
    }

    #[test]
    fn marking_twice_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDedupStore::open(dir.path()).unwrap();
        store.mark_fired(Namespace::Notified, &key("m1", 0)).unwrap();
        store.mark_fired(Namespace::Notified, &key("m1", 0)).unwrap();
        assert!(store.has_fired(Namespace::Notified, &key("m1", 0)));
        let raw = std::fs::read_to_string(dir.path().join("notified.json")).unwrap();
        let keys: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(keys, vec!["m1:0".to_string()]);
    }

    #[test]
    fn stages_of_one_mix_do_not_collide() {
        let store = MemoryDedupStore::default();
        store.mark_fired(Namespace::Warned, &key("m1", 0)).unwrap();
        assert!(!store.has_fired(Namespace::Warned, &key("m1", 1)));
        assert!(!store.has_fired(Namespace::Warned, &key("m10", 0)));
    }

    #[test]
    fn corrupt_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notified.json"), b"{not json").unwrap();
        std::fs::write(dir.path().join("warned.json"), b"[\"m2:3\"]").unwrap();
        let store = FileDedupStore::open(dir.path()).unwrap();
        assert!(!store.has_fired(Namespace::Notified, &key("m1", 0)));
        assert!(store.has_fired(Namespace::Warned, &key("m2", 3)));
        // And it recovers by overwriting on the next mark
        store.mark_fired(Namespace::Notified, &key("m1", 0)).unwrap();
        let reopened = FileDedupStore::open(dir.path()).unwrap();
        assert!(reopened.has_fired(Namespace::Notified, &key("m1", 0)));
    }

    #[test]
    fn malformed_markers_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("warned.json"),
            br#"["nocolon", "a:b:3", "m1:x", "m1:0"]"#,
        )
        .unwrap();
        let store = FileDedupStore::open(dir.path()).unwrap();
        assert!(store.has_fired(Namespace::Warned, &key("a:b", 3)));
        assert!(store.has_fired(Namespace::Warned, &key("m1", 0)));
        store.mark_fired(Namespace::Warned, &key("m2", 1)).unwrap();
        let raw = std::fs::read_to_string(dir.path().join("warned.json")).unwrap();
        let keys: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(keys, vec!["a:b:3", "m1:0", "m2:1"]);
    }
}
