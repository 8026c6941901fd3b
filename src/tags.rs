use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

/// Key under which a file's charset is stored.
pub const CHARSET_KEY: &str = "charset";

/// Per-file metadata (such as extended attributes) remembering the charset a file was saved in.
///
/// A stored charset takes the place of detection on the next load.
pub trait CharsetTagStore {
    fn get(&self, path: &Path, key: &str) -> Option<String>;

    /// Stores `value` under `key`, or removes the key when `value` is `None`.
    fn set(&self, path: &Path, key: &str, value: Option<&str>) -> io::Result<()>;

    fn charset(&self, path: &Path) -> Option<String> {
        self.get(path, CHARSET_KEY).filter(|v| !v.trim().is_empty())
    }

    /// Stores the lower-cased `charset`, or removes the tag when `None`.
    fn set_charset(&self, path: &Path, charset: Option<&str>) -> io::Result<()> {
        let value = charset.map(str::to_ascii_lowercase);
        self.set(path, CHARSET_KEY, value.as_deref())
    }
}

/// A store that holds nothing and accepts every update.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTags;

impl CharsetTagStore for NoTags {
    fn get(&self, _: &Path, _: &str) -> Option<String> {
        None
    }

    fn set(&self, _: &Path, _: &str, _: Option<&str>) -> io::Result<()> {
        Ok(())
    }
}

/// A store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryTagStore {
    tags: Mutex<HashMap<(PathBuf, String), String>>,
}

impl MemoryTagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CharsetTagStore for MemoryTagStore {
    fn get(&self, path: &Path, key: &str) -> Option<String> {
        let tags = self.tags.lock().unwrap_or_else(PoisonError::into_inner);
        tags.get(&(path.to_path_buf(), key.to_owned())).cloned()
    }

    fn set(&self, path: &Path, key: &str, value: Option<&str>) -> io::Result<()> {
        let mut tags = self.tags.lock().unwrap_or_else(PoisonError::into_inner);
        let k = (path.to_path_buf(), key.to_owned());
        match value {
            Some(v) => tags.insert(k, v.to_owned()),
            None => tags.remove(&k),
        };
        Ok(())
    }
}
