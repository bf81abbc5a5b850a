//! JSON-file key-value store for client state that outlives the process.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{KeyValueStore, StoreError};

/// Key-value store persisted as one flat JSON object.
///
/// Every write replaces the file through a temp file and rename, so a crash
/// mid-write leaves the previous contents intact.
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(StoreError::Unavailable(format!(
                    "failed reading store {}: {err}",
                    self.path.display()
                )));
            }
        };

        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&raw).map_err(|err| {
            StoreError::Backend(format!(
                "failed parsing store {}: {err}",
                self.path.display()
            ))
        })
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| {
                StoreError::Unavailable(format!(
                    "failed creating store directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let encoded =
            serde_json::to_vec_pretty(entries).map_err(|err| StoreError::Backend(err.to_string()))?;
        let temp_path = temp_path_for(&self.path);
        fs::write(&temp_path, encoded).map_err(|err| {
            StoreError::Unavailable(format!(
                "failed writing temp store {}: {err}",
                temp_path.display()
            ))
        })?;

        if let Err(rename_err) = fs::rename(&temp_path, &self.path) {
            // Windows refuses to rename over an existing file.
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    let _ = fs::remove_file(&temp_path);
                    return Err(StoreError::Unavailable(format!(
                        "failed replacing store {} after rename error ({rename_err}): {err}",
                        self.path.display()
                    )));
                }
            }
            fs::rename(&temp_path, &self.path).map_err(|err| {
                let _ = fs::remove_file(&temp_path);
                StoreError::Unavailable(format!(
                    "failed writing store {} after temp write: {err}",
                    self.path.display()
                ))
            })?;
        }

        Ok(())
    }

    fn update(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, String>) -> bool,
    ) -> Result<(), StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        let mut entries = self.load()?;
        if apply(&mut entries) {
            self.save(&entries)?;
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.to_owned(), value.to_owned()).as_deref() != Some(value)
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|entries| entries.remove(key).is_some())
    }

    /// One load and one rename for the whole batch.
    fn write_batch(&self, batch: &[(&str, Option<&str>)]) -> Result<(), StoreError> {
        self.update(|entries| {
            let before = entries.clone();
            for (key, value) in batch {
                match value {
                    Some(value) => entries.insert((*key).to_owned(), (*value).to_owned()),
                    None => entries.remove(*key),
                };
            }
            *entries != before
        })
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("store.json");
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    parent.join(format!(".{file_name}.{now_nanos}.tmp"))
}
