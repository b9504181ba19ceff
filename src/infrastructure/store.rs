//! # Workspace Store
//!
//! Policy-enforced file tree the agent is permitted to read and mutate.
//! Every mutation is contained to the workspace root, backed up before
//! overwrite/delete, and tracked in a persisted checksum index.

use crate::domain::config::WorkspaceConfig;
use crate::domain::types::FileEntry;
use chrono::Local;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use walkdir::WalkDir;

const INDEX_FILE: &str = ".checksums.json";
const SNAPSHOT_KEY_FORMAT: &str = "%Y%m%d%H%M%S%3f";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("File '{0}' does not exist")]
    NotFound(String),
    #[error("'{0}' is not a file")]
    NotAFile(String),
    #[error("Path '{0}' escapes the workspace root")]
    PathEscape(String),
    #[error("File extension '{0}' is not allowed")]
    ExtensionNotAllowed(String),
    #[error("File '{0}' exceeds the maximum allowed size")]
    TooLarge(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A timestamped, immutable copy of a file's prior content.
#[derive(Debug, Clone, serde::Serialize, PartialEq)]
pub struct Snapshot {
    pub timestamp: String,
    pub path: String,
}

pub struct WorkspaceStore {
    root: PathBuf,
    backup_root: PathBuf,
    allowed_extensions: Vec<String>,
    max_file_size: u64,
    backup_enabled: bool,
    checksums: Mutex<HashMap<String, String>>,
}

impl WorkspaceStore {
    /// Initialize the workspace: create the root and backup directories and
    /// load the persisted checksum index if one exists.
    pub fn new(config: &WorkspaceConfig) -> Result<Self, StoreError> {
        let root = PathBuf::from(&config.path);
        std::fs::create_dir_all(&root)?;
        let root = root.canonicalize()?;

        let backup_root = match &config.backup_path {
            Some(p) => PathBuf::from(p),
            None => root.join("_backups"),
        };
        if config.backup_enabled {
            std::fs::create_dir_all(&backup_root)?;
        }

        let index_path = root.join(INDEX_FILE);
        let checksums = if index_path.exists() {
            std::fs::read_to_string(&index_path)
                .ok()
                .and_then(|c| serde_json::from_str(&c).ok())
                .unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!("Workspace initialized at {}", root.display());

        Ok(Self {
            root,
            backup_root,
            allowed_extensions: config.allowed_extensions.clone(),
            max_file_size: config.max_file_size_mb * 1024 * 1024,
            backup_enabled: config.backup_enabled,
            checksums: Mutex::new(checksums),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative path, lexically. Absolute paths and any
    /// `..` that climbs above the root are policy errors, not IO errors.
    fn resolve(&self, relative: &str) -> Result<PathBuf, StoreError> {
        let path = Path::new(relative);
        if path.is_absolute() {
            return Err(StoreError::PathEscape(relative.to_string()));
        }

        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(StoreError::PathEscape(relative.to_string()));
                    }
                }
                _ => return Err(StoreError::PathEscape(relative.to_string())),
            }
        }
        Ok(self.root.join(normalized))
    }

    fn extension_of(path: &Path) -> String {
        path.extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default()
    }

    /// Extension allow-list check. Files with no extension always pass.
    fn check_extension(&self, path: &Path, relative: &str) -> Result<(), StoreError> {
        let ext = Self::extension_of(path);
        if ext.is_empty() || self.allowed_extensions.iter().any(|a| a == &ext) {
            Ok(())
        } else {
            tracing::warn!("File extension not allowed for {}: {}", relative, ext);
            Err(StoreError::ExtensionNotAllowed(ext))
        }
    }

    fn in_backup_area(&self, path: &Path) -> bool {
        path.starts_with(&self.backup_root)
    }

    fn hash_file(path: &Path) -> Result<String, StoreError> {
        let bytes = std::fs::read(path)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Read a file's content, enforcing the extension and size policy.
    pub async fn read(&self, filepath: &str) -> Result<String, StoreError> {
        let full = self.resolve(filepath)?;
        if !full.exists() {
            return Err(StoreError::NotFound(filepath.to_string()));
        }
        if !full.is_file() {
            return Err(StoreError::NotAFile(filepath.to_string()));
        }
        self.check_extension(&full, filepath)?;
        if std::fs::metadata(&full)?.len() > self.max_file_size {
            return Err(StoreError::TooLarge(filepath.to_string()));
        }
        Ok(tokio::fs::read_to_string(&full).await?)
    }

    /// Write content to a file, backing up any prior content and updating
    /// the checksum index entry for the path.
    pub async fn write(&self, filepath: &str, content: &str) -> Result<(), StoreError> {
        let full = self.resolve(filepath)?;
        self.check_extension(&full, filepath)?;
        if content.len() as u64 > self.max_file_size {
            return Err(StoreError::TooLarge(filepath.to_string()));
        }

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if full.exists() {
            self.backup_file(&full)?;
        }

        tokio::fs::write(&full, content).await?;
        tracing::info!("File written: {}", filepath);

        let hash = Self::hash_file(&full)?;
        let serialized = {
            let mut checksums = self.checksums.lock().unwrap_or_else(|p| p.into_inner());
            checksums.insert(self.relative_key(&full), hash);
            serde_json::to_string(&*checksums).unwrap_or_else(|_| "{}".to_string())
        };
        self.persist_index(&serialized).await?;
        Ok(())
    }

    /// Delete a file or directory. Prior content is backed up first, then
    /// the whole checksum index is rebuilt by a full rescan.
    pub async fn delete(&self, filepath: &str) -> Result<(), StoreError> {
        let full = self.resolve(filepath)?;
        if !full.exists() {
            return Err(StoreError::NotFound(filepath.to_string()));
        }

        if full.is_file() {
            self.backup_file(&full)?;
            tokio::fs::remove_file(&full).await?;
        } else {
            for entry in WalkDir::new(&full).into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_file() && !self.in_backup_area(entry.path()) {
                    self.backup_file(entry.path())?;
                }
            }
            tokio::fs::remove_dir_all(&full).await?;
        }

        tracing::info!("Deleted: {}", filepath);
        self.rebuild_index().await
    }

    /// Create a directory (and any missing parents).
    pub async fn create_dir(&self, dirpath: &str) -> Result<(), StoreError> {
        let full = self.resolve(dirpath)?;
        tokio::fs::create_dir_all(&full).await?;
        tracing::info!("Directory created: {}", dirpath);
        Ok(())
    }

    /// Recursively list the workspace (or a subpath), skipping the backup
    /// area and dot-prefixed names. A missing path lists as empty.
    pub fn list(&self, relative: &str) -> Result<Vec<FileEntry>, StoreError> {
        let target = self.resolve(relative)?;
        if !target.exists() {
            tracing::warn!("Path does not exist: {}", relative);
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&target)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if self.in_backup_area(path) || name.starts_with('.') {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let modified = metadata
                .modified()
                .map(|t| chrono::DateTime::<Local>::from(t).to_rfc3339())
                .unwrap_or_default();
            let rel = path
                .strip_prefix(&self.root)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string();
            if metadata.is_dir() {
                entries.push(FileEntry {
                    name,
                    path: rel,
                    is_dir: true,
                    size: 0,
                    modified,
                    extension: String::new(),
                });
            } else {
                entries.push(FileEntry {
                    name,
                    path: rel,
                    is_dir: false,
                    size: metadata.len(),
                    modified,
                    extension: Self::extension_of(path),
                });
            }
        }
        Ok(entries)
    }

    /// All snapshots recorded for a path, most recent first.
    pub fn history(&self, filepath: &str) -> Vec<Snapshot> {
        if !self.backup_enabled {
            return Vec::new();
        }

        let mut history = Vec::new();
        let Ok(buckets) = std::fs::read_dir(&self.backup_root) else {
            return history;
        };
        for bucket in buckets.filter_map(|e| e.ok()) {
            if !bucket.path().is_dir() {
                continue;
            }
            let key = bucket.file_name().to_string_lossy().to_string();
            let candidate = bucket.path().join(filepath);
            if candidate.exists() {
                history.push(Snapshot {
                    timestamp: key,
                    path: candidate
                        .strip_prefix(&self.backup_root)
                        .unwrap_or(&candidate)
                        .to_string_lossy()
                        .to_string(),
                });
            }
        }
        // Keys are numeric timestamp buckets; newest first.
        history.sort_by_key(|s| std::cmp::Reverse(s.timestamp.parse::<u128>().unwrap_or(0)));
        history
    }

    /// Rehash every allowed file under the root and report paths whose hash
    /// differs from (or is absent from) the persisted index. Does not update
    /// the index.
    pub fn changed_files(&self) -> Vec<String> {
        let snapshot = {
            let checksums = self.checksums.lock().unwrap_or_else(|p| p.into_inner());
            checksums.clone()
        };

        let mut changed = Vec::new();
        for (rel, path) in self.tracked_files() {
            let Ok(current) = Self::hash_file(&path) else {
                continue;
            };
            match snapshot.get(&rel) {
                Some(known) if known == &current => {}
                _ => changed.push(rel),
            }
        }
        changed.sort();
        changed
    }

    /// Workspace-relative key for an absolute path under the root.
    fn relative_key(&self, full: &Path) -> String {
        full.strip_prefix(&self.root)
            .unwrap_or(full)
            .to_string_lossy()
            .to_string()
    }

    /// Files eligible for checksum tracking: allowed extension (or none),
    /// outside the backup area, not dot-prefixed.
    fn tracked_files(&self) -> Vec<(String, PathBuf)> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy();
            if !entry.file_type().is_file()
                || self.in_backup_area(path)
                || name.starts_with('.')
            {
                continue;
            }
            let ext = Self::extension_of(path);
            if !ext.is_empty() && !self.allowed_extensions.iter().any(|a| a == &ext) {
                continue;
            }
            files.push((self.relative_key(path), path.to_path_buf()));
        }
        files
    }

    /// Full-rescan rebuild of the checksum index, persisted atomically.
    async fn rebuild_index(&self) -> Result<(), StoreError> {
        let mut rebuilt = HashMap::new();
        for (rel, path) in self.tracked_files() {
            if let Ok(hash) = Self::hash_file(&path) {
                rebuilt.insert(rel, hash);
            }
        }
        let serialized = serde_json::to_string(&rebuilt).unwrap_or_else(|_| "{}".to_string());
        {
            let mut checksums = self.checksums.lock().unwrap_or_else(|p| p.into_inner());
            *checksums = rebuilt;
        }
        self.persist_index(&serialized).await
    }

    /// Write-temp-then-rename so a crash mid-write never leaves a torn index.
    async fn persist_index(&self, serialized: &str) -> Result<(), StoreError> {
        let tmp = self.root.join(format!("{INDEX_FILE}.tmp"));
        tokio::fs::write(&tmp, serialized).await?;
        tokio::fs::rename(&tmp, self.root.join(INDEX_FILE)).await?;
        Ok(())
    }

    /// Copy prior content into a timestamp-keyed snapshot bucket, preserving
    /// the workspace-relative path.
    fn backup_file(&self, full: &Path) -> Result<(), StoreError> {
        if !self.backup_enabled {
            return Ok(());
        }

        let rel = self.relative_key(full);
        let mut key: u128 = Local::now()
            .format(SNAPSHOT_KEY_FORMAT)
            .to_string()
            .parse()
            .unwrap_or(0);
        // Bump the key when two backups of the same path land in the same
        // millisecond; snapshots are immutable once created.
        let mut target = self.backup_root.join(key.to_string()).join(&rel);
        while target.exists() {
            key += 1;
            target = self.backup_root.join(key.to_string()).join(&rel);
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(full, &target)?;
        tracing::debug!("Backup created: {}", target.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::WorkspaceConfig;
    use tempfile::tempdir;

    fn test_config(root: &Path) -> WorkspaceConfig {
        WorkspaceConfig {
            path: root.to_string_lossy().to_string(),
            ..WorkspaceConfig::default()
        }
    }

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let dir = tempdir().unwrap();
        let store = WorkspaceStore::new(&test_config(dir.path())).unwrap();
        store.write("hello.py", "print(1)").await.unwrap();
        assert_eq!(store.read("hello.py").await.unwrap(), "print(1)");
    }

    #[tokio::test]
    async fn test_write_updates_checksum_index() {
        let dir = tempdir().unwrap();
        let store = WorkspaceStore::new(&test_config(dir.path())).unwrap();
        store.write("hello.py", "print(1)").await.unwrap();

        let index_path = store.root().join(INDEX_FILE);
        let index: HashMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(index_path).unwrap()).unwrap();
        let expected = WorkspaceStore::hash_file(&store.root().join("hello.py")).unwrap();
        assert_eq!(index.get("hello.py"), Some(&expected));
    }

    #[tokio::test]
    async fn test_extension_policy_rejected() {
        let dir = tempdir().unwrap();
        let store = WorkspaceStore::new(&test_config(dir.path())).unwrap();
        let err = store.write("payload.exe", "MZ").await.unwrap_err();
        assert!(matches!(err, StoreError::ExtensionNotAllowed(_)));
        assert!(!store.root().join("payload.exe").exists());
    }

    #[tokio::test]
    async fn test_empty_extension_always_allowed() {
        let dir = tempdir().unwrap();
        let store = WorkspaceStore::new(&test_config(dir.path())).unwrap();
        store.write("Makefile", "all:\n").await.unwrap();
        assert_eq!(store.read("Makefile").await.unwrap(), "all:\n");
    }

    #[tokio::test]
    async fn test_size_ceiling() {
        let dir = tempdir().unwrap();
        let config = WorkspaceConfig {
            max_file_size_mb: 0,
            ..test_config(dir.path())
        };
        let store = WorkspaceStore::new(&config).unwrap();
        let err = store.write("big.txt", "x").await.unwrap_err();
        assert!(matches!(err, StoreError::TooLarge(_)));
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let dir = tempdir().unwrap();
        let store = WorkspaceStore::new(&test_config(dir.path())).unwrap();
        let err = store.write("../evil.txt", "x").await.unwrap_err();
        assert!(matches!(err, StoreError::PathEscape(_)));
        let err = store.read("/etc/passwd").await.unwrap_err();
        assert!(matches!(err, StoreError::PathEscape(_)));
        let err = store.write("a/../../evil.txt", "x").await.unwrap_err();
        assert!(matches!(err, StoreError::PathEscape(_)));
        // Traversal that stays inside the root is fine.
        store.write("a/../ok.txt", "x").await.unwrap();
        assert_eq!(store.read("ok.txt").await.unwrap(), "x");
    }

    #[tokio::test]
    async fn test_backup_count_invariant() {
        let dir = tempdir().unwrap();
        let store = WorkspaceStore::new(&test_config(dir.path())).unwrap();
        for i in 0..4 {
            store.write("v.txt", &format!("rev {i}")).await.unwrap();
        }
        // 4 writes, first has no prior content: exactly 3 snapshots.
        let history = store.history("v.txt");
        assert_eq!(history.len(), 3);
        // Most recent first.
        let mut sorted = history.clone();
        sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        assert_eq!(history, sorted);
    }

    #[tokio::test]
    async fn test_backups_disabled() {
        let dir = tempdir().unwrap();
        let config = WorkspaceConfig {
            backup_enabled: false,
            ..test_config(dir.path())
        };
        let store = WorkspaceStore::new(&config).unwrap();
        store.write("v.txt", "one").await.unwrap();
        store.write("v.txt", "two").await.unwrap();
        assert!(store.history("v.txt").is_empty());
    }

    #[tokio::test]
    async fn test_delete_snapshots_then_rebuilds_index() {
        let dir = tempdir().unwrap();
        let store = WorkspaceStore::new(&test_config(dir.path())).unwrap();
        store.write("doomed.txt", "one").await.unwrap();
        store.write("doomed.txt", "two").await.unwrap();
        store.write("doomed.txt", "three").await.unwrap();
        store.write("keeper.txt", "stays").await.unwrap();

        store.delete("doomed.txt").await.unwrap();
        // A 4th snapshot captured the current content before removal.
        assert_eq!(store.history("doomed.txt").len(), 3);
        assert!(!store.root().join("doomed.txt").exists());

        let index_path = store.root().join(INDEX_FILE);
        let index: HashMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(index_path).unwrap()).unwrap();
        assert!(!index.contains_key("doomed.txt"));
        assert!(index.contains_key("keeper.txt"));
    }

    #[tokio::test]
    async fn test_changed_files_convergence() {
        let dir = tempdir().unwrap();
        let store = WorkspaceStore::new(&test_config(dir.path())).unwrap();
        store.write("a.py", "a = 1").await.unwrap();
        store.write("b.py", "b = 2").await.unwrap();
        assert!(store.changed_files().is_empty());

        // External modification, bypassing the store.
        std::fs::write(store.root().join("b.py"), "b = 99").unwrap();
        assert_eq!(store.changed_files(), vec!["b.py".to_string()]);
    }

    #[tokio::test]
    async fn test_list_skips_backups_and_dotfiles() {
        let dir = tempdir().unwrap();
        let store = WorkspaceStore::new(&test_config(dir.path())).unwrap();
        store.write("src/app.py", "pass").await.unwrap();
        store.write("src/app.py", "pass  # v2").await.unwrap();
        std::fs::write(store.root().join(".hidden"), "x").unwrap();

        let entries = store.list("").unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"src"));
        assert!(names.contains(&"app.py"));
        assert!(!names.iter().any(|n| n.starts_with('.')));
        assert!(!names.contains(&"_backups"));

        let dir_entry = entries.iter().find(|e| e.name == "src").unwrap();
        assert!(dir_entry.is_dir);
        assert_eq!(dir_entry.size, 0);
        let file_entry = entries.iter().find(|e| e.name == "app.py").unwrap();
        assert_eq!(file_entry.extension, ".py");
        assert_eq!(file_entry.path, "src/app.py");
    }

    #[tokio::test]
    async fn test_list_missing_path_is_empty() {
        let dir = tempdir().unwrap();
        let store = WorkspaceStore::new(&test_config(dir.path())).unwrap();
        assert!(store.list("nope").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_dir_and_nested_write() {
        let dir = tempdir().unwrap();
        let store = WorkspaceStore::new(&test_config(dir.path())).unwrap();
        store.create_dir("pkg/sub").await.unwrap();
        assert!(store.root().join("pkg/sub").is_dir());
        store.write("pkg/sub/mod.py", "x = 0").await.unwrap();
        assert_eq!(store.read("pkg/sub/mod.py").await.unwrap(), "x = 0");
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = tempdir().unwrap();
        let store = WorkspaceStore::new(&test_config(dir.path())).unwrap();
        let err = store.read("ghost.txt").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
