//! Reference-counted directory registry.
//!
//! Tracks which directories need a native watch. A directory is watched from
//! the first registered file inside it until the last one is released.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct DirRegistry {
    /// Watched directory -> number of registered files inside it.
    dirs: HashMap<PathBuf, usize>,
}

impl DirRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory a file is watched through.
    pub fn watch_dir(file: &Path) -> PathBuf {
        match file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Count one more file in its directory.
    ///
    /// Returns the directory when it was not watched before.
    pub fn acquire(&mut self, file: &Path) -> Option<PathBuf> {
        let dir = Self::watch_dir(file);
        let count = self.dirs.entry(dir.clone()).or_insert(0);
        *count += 1;
        (*count == 1).then_some(dir)
    }

    /// Count one file less in its directory.
    ///
    /// Returns the directory when its count dropped to zero.
    pub fn release(&mut self, file: &Path) -> Option<PathBuf> {
        let dir = Self::watch_dir(file);
        let count = self.dirs.get_mut(&dir)?;
        *count -= 1;
        if *count == 0 {
            self.dirs.remove(&dir);
            Some(dir)
        } else {
            None
        }
    }

    /// Forget a directory whose watch could not be installed.
    pub fn forget(&mut self, dir: &Path) {
        self.dirs.remove(dir);
    }

    pub fn contains(&self, dir: &Path) -> bool {
        self.dirs.contains_key(dir)
    }

    pub fn refcount(&self, dir: &Path) -> usize {
        self.dirs.get(dir).copied().unwrap_or(0)
    }

    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    pub fn dirs(&self) -> impl Iterator<Item = &Path> {
        self.dirs.keys().map(PathBuf::as_path)
    }

    pub fn clear(&mut self) {
        self.dirs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_file_installs_watch() {
        let mut registry = DirRegistry::new();

        let first = registry.acquire(Path::new("/cfg/app.yml"));
        let second = registry.acquire(Path::new("/cfg/db.yml"));
        let other = registry.acquire(Path::new("/cfg/plugins/p.yml"));

        assert_eq!(first, Some(PathBuf::from("/cfg")));
        assert_eq!(second, None);
        assert_eq!(other, Some(PathBuf::from("/cfg/plugins")));
        assert_eq!(registry.refcount(Path::new("/cfg")), 2);
        assert_eq!(registry.dir_count(), 2);
    }

    #[test]
    fn test_last_release_tears_down() {
        let mut registry = DirRegistry::new();
        registry.acquire(Path::new("/cfg/app.yml"));
        registry.acquire(Path::new("/cfg/db.yml"));

        assert_eq!(registry.release(Path::new("/cfg/app.yml")), None);
        assert!(registry.contains(Path::new("/cfg")));
        assert_eq!(
            registry.release(Path::new("/cfg/db.yml")),
            Some(PathBuf::from("/cfg"))
        );
        assert!(!registry.contains(Path::new("/cfg")));
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let mut registry = DirRegistry::new();
        assert_eq!(registry.release(Path::new("/nowhere/x.toml")), None);
    }

    #[test]
    fn test_relative_file_uses_current_dir() {
        assert_eq!(DirRegistry::watch_dir(Path::new("app.yml")), PathBuf::from("."));
    }
}
