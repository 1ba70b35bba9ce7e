use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::path_ops;

/// Default permission bits for newly created files.
pub const DEFAULT_FILE_MODE: u16 = 0o644;

/// Default permission bits for newly created directories.
pub const DEFAULT_DIR_MODE: u16 = 0o755;

/// The single node type stored in the filesystem keyspace. Identity is the
/// normalized absolute `path`; there is no separate inode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Leaf name, derived from `path`.
    pub name: String,

    /// Full normalized absolute path. This is the storage key.
    pub path: String,

    /// Discriminates directories from regular files.
    pub is_directory: bool,

    /// Raw content bytes. Always empty for directories.
    #[serde(with = "serde_bytes")]
    pub content: Vec<u8>,

    pub created_at: SystemTime,
    pub modified_at: SystemTime,

    /// Unix-style permission bits. Informational only; the filesystem does
    /// not implement a user model.
    pub mode: u16,
}

impl FileEntry {
    /// Creates a file entry at the given (already normalized) path.
    pub fn new_file(path: &str, content: Vec<u8>) -> Self {
        let now = SystemTime::now();
        Self {
            name: path_ops::name(path),
            path: path.to_owned(),
            is_directory: false,
            content,
            created_at: now,
            modified_at: now,
            mode: DEFAULT_FILE_MODE,
        }
    }

    /// Creates a directory entry at the given (already normalized) path.
    pub fn new_directory(path: &str) -> Self {
        let now = SystemTime::now();
        Self {
            name: path_ops::name(path),
            path: path.to_owned(),
            is_directory: true,
            content: Vec::new(),
            created_at: now,
            modified_at: now,
            mode: DEFAULT_DIR_MODE,
        }
    }

    /// Content length for files, zero for directories.
    pub fn size(&self) -> u64 {
        if self.is_directory {
            0
        } else {
            self.content.len() as u64
        }
    }
}

/// Renders `ls -l`-style mode text, e.g. `drwxr-xr-x` or `-rw-r--r--`.
pub fn format_mode(entry: &FileEntry) -> String {
    let mut out = String::with_capacity(10);
    out.push(if entry.is_directory { 'd' } else { '-' });

    for shift in [6u16, 3, 0] {
        let bits = (entry.mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_file_defaults() {
        let entry = FileEntry::new_file("/docs/readme.md", b"hello".to_vec());
        assert_eq!(entry.name, "readme.md");
        assert_eq!(entry.path, "/docs/readme.md");
        assert!(!entry.is_directory);
        assert_eq!(entry.size(), 5);
        assert_eq!(entry.mode, DEFAULT_FILE_MODE);
    }

    #[test]
    fn new_directory_defaults() {
        let entry = FileEntry::new_directory("/docs");
        assert_eq!(entry.name, "docs");
        assert!(entry.is_directory);
        assert_eq!(entry.size(), 0);
        assert_eq!(entry.mode, DEFAULT_DIR_MODE);
    }

    #[test]
    fn directory_size_ignores_content() {
        let mut entry = FileEntry::new_directory("/d");
        entry.content = b"junk".to_vec();
        assert_eq!(entry.size(), 0);
    }

    #[test]
    fn format_mode_file() {
        let entry = FileEntry::new_file("/f", Vec::new());
        assert_eq!(format_mode(&entry), "-rw-r--r--");
    }

    #[test]
    fn format_mode_directory() {
        let entry = FileEntry::new_directory("/d");
        assert_eq!(format_mode(&entry), "drwxr-xr-x");
    }
}
