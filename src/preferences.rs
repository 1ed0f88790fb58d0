use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Maximum number of remembered queries.
pub const RECENT_QUERIES_LIMIT: usize = 5;
pub const RECENT_QUERIES_KEY: &str = "historial-busqueda";
pub const THEME_KEY: &str = "dark-mode";

/// String key/value settings that outlive a session. Writes are best effort.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.values.write().insert(key.to_string(), value);
    }
}

/// Settings kept as a flat JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Opens `path`, starting empty when the file is missing or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!(error = %err, path = %path.display(), "ignoring corrupt preferences file");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            values: RwLock::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, String>) {
        if let Some(parent) = self.path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!(error = %err, "failed to create preferences directory");
                return;
            }
        }
        let bytes = match serde_json::to_vec_pretty(values) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to serialize preferences");
                return;
            }
        };
        if let Err(err) = fs::write(&self.path, bytes) {
            warn!(error = %err, path = %self.path.display(), "failed to write preferences");
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        let mut guard = self.values.write();
        guard.insert(key.to_string(), value);
        self.flush(&guard);
    }
}

/// Most-recent-first list of selected queries, without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecentQueries {
    entries: Vec<String>,
}

impl RecentQueries {
    /// Reads the persisted list. Anything unparsable counts as empty.
    pub fn restore(store: &dyn KeyValueStore) -> Self {
        let Some(raw) = store.get(RECENT_QUERIES_KEY) else {
            return Self::default();
        };
        let mut recent: Self = serde_json::from_str(&raw).unwrap_or_default();
        recent.entries.truncate(RECENT_QUERIES_LIMIT);
        recent
    }

    pub fn save(&self, store: &dyn KeyValueStore) {
        match serde_json::to_string(self) {
            Ok(raw) => store.set(RECENT_QUERIES_KEY, raw),
            Err(err) => warn!(error = %err, "failed to encode recent queries"),
        }
    }

    /// Moves `query` to the front, dropping its previous occurrence and
    /// anything past the limit.
    pub fn record(&mut self, query: &str) {
        self.entries.retain(|entry| entry != query);
        self.entries.insert(0, query.to_string());
        self.entries.truncate(RECENT_QUERIES_LIMIT);
    }

    pub fn list(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn restore(store: &dyn KeyValueStore) -> Self {
        match store.get(THEME_KEY).as_deref() {
            Some("true") => Theme::Dark,
            _ => Theme::Light,
        }
    }

    pub fn save(self, store: &dyn KeyValueStore) {
        store.set(THEME_KEY, (self == Theme::Dark).to_string());
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Theme::Light => write!(f, "light"),
            Theme::Dark => write!(f, "dark"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_five_most_recent() {
        let mut recent = RecentQueries::default();
        for term in ["API", "Bucle", "Caché", "Dato", "Función", "Red"] {
            recent.record(term);
        }
        assert_eq!(recent.list(), ["Red", "Función", "Dato", "Caché", "Bucle"]);
    }

    #[test]
    fn rerecording_moves_to_front_without_growing() {
        let mut recent = RecentQueries::default();
        for term in ["API", "Bucle", "Caché"] {
            recent.record(term);
        }
        recent.record("API");
        assert_eq!(recent.list(), ["API", "Caché", "Bucle"]);
        recent.record("api");
        assert_eq!(recent.list().len(), 4);
    }

    #[test]
    fn round_trips_through_store_as_json_list() {
        let store = MemoryStore::new();
        let mut recent = RecentQueries::restore(&store);
        assert!(recent.is_empty());
        recent.record("Nube");
        recent.save(&store);
        assert_eq!(store.get(RECENT_QUERIES_KEY).as_deref(), Some(r#"["Nube"]"#));
        assert_eq!(RecentQueries::restore(&store).list(), ["Nube"]);
    }

    #[test]
    fn corrupt_history_restores_empty() {
        let store = MemoryStore::new();
        store.set(RECENT_QUERIES_KEY, "{oops".to_string());
        assert!(RecentQueries::restore(&store).is_empty());
    }

    #[test]
    fn theme_persists_as_boolean_string() {
        let store = MemoryStore::new();
        assert_eq!(Theme::restore(&store), Theme::Light);
        Theme::Light.toggled().save(&store);
        assert_eq!(store.get(THEME_KEY).as_deref(), Some("true"));
        assert_eq!(Theme::restore(&store), Theme::Dark);
    }

    #[test]
    fn json_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");
        let store = JsonFileStore::open(&path);
        store.set(THEME_KEY, "true".to_string());
        drop(store);
        let reopened = JsonFileStore::open(&path);
        assert_eq!(reopened.get(THEME_KEY).as_deref(), Some("true"));
        assert_eq!(reopened.path(), path.as_path());
    }
}
