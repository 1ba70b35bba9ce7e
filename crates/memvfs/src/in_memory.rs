use std::collections::HashMap;
use std::sync::RwLock;

use crate::entry::FileEntry;
use crate::error::VfsResult;
use crate::storage::{decode_pairs, encode_pairs, SerializableBackend, StorageBackend};

/// The default storage backend: a `HashMap` keyspace behind a `RwLock`.
///
/// Every trait operation takes the lock exactly once, so individual
/// operations are atomic; compound transactions are serialized by the owning
/// [`Vfs`](crate::Vfs).
#[derive(Default)]
pub struct InMemoryStorage {
    entries: RwLock<HashMap<String, FileEntry>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for InMemoryStorage {
    fn get(&self, path: &str) -> Option<FileEntry> {
        self.entries.read().unwrap().get(path).cloned()
    }

    fn set(&self, path: &str, entry: FileEntry) {
        self.entries.write().unwrap().insert(path.to_owned(), entry);
    }

    fn delete(&self, path: &str) -> bool {
        self.entries.write().unwrap().remove(path).is_some()
    }

    fn exists(&self, path: &str) -> bool {
        self.entries.read().unwrap().contains_key(path)
    }

    fn all_paths(&self) -> Vec<String> {
        self.entries.read().unwrap().keys().cloned().collect()
    }

    fn paths_by_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .read()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let prefix = if dir == "/" {
            "/".to_owned()
        } else {
            format!("{}/", dir)
        };

        self.entries
            .read()
            .unwrap()
            .keys()
            .filter(|key| {
                key.as_str() != dir
                    && key.starts_with(&prefix)
                    && !key[prefix.len()..].contains('/')
            })
            .cloned()
            .collect()
    }

    fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    fn count(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    fn all_pairs(&self) -> Vec<(String, FileEntry)> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn set_many(&self, pairs: Vec<(String, FileEntry)>) {
        let mut entries = self.entries.write().unwrap();
        for (path, entry) in pairs {
            entries.insert(path, entry);
        }
    }

    fn as_serializable(&self) -> Option<&dyn SerializableBackend> {
        Some(self)
    }
}

impl SerializableBackend for InMemoryStorage {
    fn serialize(&self) -> VfsResult<Vec<u8>> {
        encode_pairs(self.all_pairs())
    }

    fn deserialize(&self, bytes: &[u8]) -> VfsResult<()> {
        let pairs = decode_pairs(bytes)?;
        let mut entries = self.entries.write().unwrap();
        entries.clear();
        entries.extend(pairs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> InMemoryStorage {
        let storage = InMemoryStorage::new();
        storage.set("/", FileEntry::new_directory("/"));
        storage.set("/a", FileEntry::new_directory("/a"));
        storage.set("/a/x.txt", FileEntry::new_file("/a/x.txt", b"x".to_vec()));
        storage.set("/a/b", FileEntry::new_directory("/a/b"));
        storage.set("/a/b/y.txt", FileEntry::new_file("/a/b/y.txt", b"yy".to_vec()));
        storage
    }

    #[test]
    fn set_get_delete() {
        let storage = InMemoryStorage::new();
        assert!(storage.get("/f").is_none());

        storage.set("/f", FileEntry::new_file("/f", b"data".to_vec()));
        assert!(storage.exists("/f"));
        assert_eq!(storage.get("/f").unwrap().content, b"data");

        assert!(storage.delete("/f"));
        assert!(!storage.delete("/f"));
        assert!(!storage.exists("/f"));
    }

    #[test]
    fn children_are_direct_only() {
        let storage = seeded();

        let mut children = storage.children("/a");
        children.sort();
        assert_eq!(children, vec!["/a/b", "/a/x.txt"]);

        let mut root_children = storage.children("/");
        root_children.sort();
        assert_eq!(root_children, vec!["/a"]);
    }

    #[test]
    fn children_excludes_sibling_prefix() {
        let storage = InMemoryStorage::new();
        storage.set("/a", FileEntry::new_directory("/a"));
        storage.set("/ab", FileEntry::new_directory("/ab"));
        storage.set("/a/c", FileEntry::new_file("/a/c", Vec::new()));

        assert_eq!(storage.children("/a"), vec!["/a/c"]);
    }

    #[test]
    fn paths_by_prefix() {
        let storage = seeded();
        let mut under = storage.paths_by_prefix("/a/b");
        under.sort();
        assert_eq!(under, vec!["/a/b", "/a/b/y.txt"]);
    }

    #[test]
    fn count_and_clear() {
        let storage = seeded();
        assert_eq!(storage.count(), 5);
        storage.clear();
        assert_eq!(storage.count(), 0);
    }

    #[test]
    fn native_snapshot_round_trips_keyspace() {
        let storage = seeded();
        let bytes = storage.serialize().unwrap();

        let restored = InMemoryStorage::new();
        restored.deserialize(&bytes).unwrap();

        let mut before = storage.all_pairs();
        let mut after = restored.all_pairs();
        before.sort_by(|a, b| a.0.cmp(&b.0));
        after.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(before, after);

        // Byte-for-byte stability across the round trip.
        assert_eq!(restored.serialize().unwrap(), bytes);
    }

    #[test]
    fn set_many_bulk_inserts() {
        let storage = InMemoryStorage::new();
        storage.set_many(vec![
            ("/".to_owned(), FileEntry::new_directory("/")),
            ("/f".to_owned(), FileEntry::new_file("/f", b"1".to_vec())),
        ]);
        assert_eq!(storage.count(), 2);
        assert!(storage.exists("/f"));
    }
}
