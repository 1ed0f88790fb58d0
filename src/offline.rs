//! Versioned on-disk copy of the glossary assets, consulted when the primary
//! source cannot be reached.

use crate::{DatasetError, TermStore};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const CACHE_VERSION: &str = "glosario-tsds-v2";
pub const DATASET_ASSET: &str = "palabras.json";
pub const VERSION_ASSET: &str = "version.json";

#[derive(Debug)]
pub enum CacheError {
    Io(io::Error),
    InvalidName(String),
    Miss(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "cache io error: {err}"),
            CacheError::InvalidName(name) => write!(f, "invalid asset name {name:?}"),
            CacheError::Miss(name) => write!(f, "{name} is neither reachable nor cached"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<io::Error> for CacheError {
    fn from(value: io::Error) -> Self {
        CacheError::Io(value)
    }
}

impl From<CacheError> for DatasetError {
    fn from(value: CacheError) -> Self {
        DatasetError::Unavailable(value.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct OfflineCache {
    root: PathBuf,
    version: String,
}

impl OfflineCache {
    pub fn new(root: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            version: version.into(),
        }
    }

    /// Directory holding the assets of the current version.
    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.version)
    }

    fn asset_path(&self, name: &str) -> Result<PathBuf, CacheError> {
        let path = Path::new(name);
        match path.file_name() {
            Some(file) if file == path.as_os_str() => Ok(self.dir().join(file)),
            _ => Err(CacheError::InvalidName(name.to_string())),
        }
    }

    /// Stores a snapshot of each asset under the current version.
    pub fn install(&self, assets: &[(&str, &[u8])]) -> Result<(), CacheError> {
        fs::create_dir_all(self.dir())?;
        for (name, bytes) in assets {
            let path = self.asset_path(name)?;
            fs::write(&path, bytes)?;
            debug!(asset = name, path = %path.display(), "cached asset");
        }
        Ok(())
    }

    /// Deletes every cache directory that belongs to another version and
    /// returns their names.
    pub fn activate(&self) -> Result<Vec<String>, CacheError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut purged = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == self.version {
                continue;
            }
            fs::remove_dir_all(entry.path())?;
            info!(cache = %name, "purged stale cache");
            purged.push(name);
        }
        purged.sort();
        Ok(purged)
    }

    pub fn cached(&self, name: &str) -> Result<Vec<u8>, CacheError> {
        let path = self.asset_path(name)?;
        fs::read(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => CacheError::Miss(name.to_string()),
            _ => CacheError::Io(err),
        })
    }

    /// Tries `network` first and serves the cached copy when it fails.
    pub fn fetch<F>(&self, name: &str, network: F) -> Result<Vec<u8>, CacheError>
    where
        F: FnOnce(&str) -> io::Result<Vec<u8>>,
    {
        match network(name) {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                warn!(asset = name, error = %err, "network fetch failed, using offline copy");
                self.cached(name)
            }
        }
    }
}

/// Loads the dataset at `source`, refreshing the offline copy on success and
/// falling back to it otherwise.
pub fn load_dataset(cache: &OfflineCache, source: &Path) -> Result<TermStore, DatasetError> {
    let mut fetched_live = false;
    let bytes = cache.fetch(DATASET_ASSET, |_| {
        let bytes = fs::read(source)?;
        fetched_live = true;
        Ok(bytes)
    })?;
    let store = TermStore::from_json(&bytes)?;
    if fetched_live {
        if let Err(err) = cache.install(&[(DATASET_ASSET, bytes.as_slice())]) {
            warn!(error = %err, "failed to refresh offline dataset copy");
        }
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATASET: &[u8] = br#"[{"palabra": "Nube", "traduccion": "Cloud", "categoria": "informatica"}]"#;

    #[test]
    fn activation_purges_other_versions_only() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("glosario-tsds-v1")).unwrap();
        fs::write(root.path().join("notes.txt"), b"keep").unwrap();
        let cache = OfflineCache::new(root.path(), CACHE_VERSION);
        cache.install(&[(VERSION_ASSET, b"{}".as_slice())]).unwrap();

        assert_eq!(cache.activate().unwrap(), ["glosario-tsds-v1"]);
        assert!(cache.dir().join(VERSION_ASSET).exists());
        assert!(root.path().join("notes.txt").exists());
        assert!(cache.activate().unwrap().is_empty());
    }

    #[test]
    fn activation_without_root_is_a_noop() {
        let root = tempfile::tempdir().unwrap();
        let cache = OfflineCache::new(root.path().join("missing"), CACHE_VERSION);
        assert!(cache.activate().unwrap().is_empty());
    }

    #[test]
    fn network_wins_when_reachable() {
        let root = tempfile::tempdir().unwrap();
        let cache = OfflineCache::new(root.path(), CACHE_VERSION);
        cache.install(&[(DATASET_ASSET, b"old".as_slice())]).unwrap();
        let bytes = cache.fetch(DATASET_ASSET, |_| Ok(b"new".to_vec())).unwrap();
        assert_eq!(bytes, b"new");
    }

    #[test]
    fn falls_back_to_cache_then_reports_miss() {
        let root = tempfile::tempdir().unwrap();
        let cache = OfflineCache::new(root.path(), CACHE_VERSION);
        let offline =
            |_: &str| -> io::Result<Vec<u8>> { Err(io::Error::new(io::ErrorKind::NotConnected, "offline")) };
        assert!(matches!(
            cache.fetch(DATASET_ASSET, offline),
            Err(CacheError::Miss(_))
        ));
        cache.install(&[(DATASET_ASSET, b"cached".as_slice())]).unwrap();
        assert_eq!(cache.fetch(DATASET_ASSET, offline).unwrap(), b"cached");
    }

    #[test]
    fn asset_names_cannot_escape_the_cache() {
        let root = tempfile::tempdir().unwrap();
        let cache = OfflineCache::new(root.path(), CACHE_VERSION);
        assert!(matches!(
            cache.install(&[("../evil.json", b"x".as_slice())]),
            Err(CacheError::InvalidName(_))
        ));
    }

    #[test]
    fn dataset_load_refreshes_then_survives_source_loss() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("palabras.json");
        fs::write(&source, DATASET).unwrap();
        let cache = OfflineCache::new(root.path().join("cache"), CACHE_VERSION);

        assert_eq!(load_dataset(&cache, &source).unwrap().len(), 1);
        fs::remove_file(&source).unwrap();
        assert_eq!(load_dataset(&cache, &source).unwrap().len(), 1);

        let empty = OfflineCache::new(root.path().join("other"), CACHE_VERSION);
        assert!(matches!(
            load_dataset(&empty, &source),
            Err(DatasetError::Unavailable(_))
        ));
    }
}
