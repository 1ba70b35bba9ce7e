//! Storage backend contract: a thread-safe flat mapping from normalized
//! absolute paths to [`FileEntry`] nodes.

use crate::entry::FileEntry;
use crate::error::{VfsError, VfsResult};

/// Backend that can be used to create a [`Vfs`](crate::Vfs).
///
/// Implementations must make each listed operation atomic and thread-safe on
/// its own; the VFS layers its own mutex on top to make multi-operation
/// transactions atomic.
pub trait StorageBackend: Send + Sync {
    fn get(&self, path: &str) -> Option<FileEntry>;

    fn set(&self, path: &str, entry: FileEntry);

    /// Removes a key, returning whether it existed.
    fn delete(&self, path: &str) -> bool;

    fn exists(&self, path: &str) -> bool;

    fn all_paths(&self) -> Vec<String>;

    /// All keys that start with `prefix`.
    fn paths_by_prefix(&self, prefix: &str) -> Vec<String>;

    /// Direct children of `dir`: keys under `dir` whose remainder contains no
    /// further `/`, excluding `dir` itself.
    fn children(&self, dir: &str) -> Vec<String>;

    fn clear(&self);

    fn count(&self) -> usize;

    fn all_pairs(&self) -> Vec<(String, FileEntry)>;

    fn set_many(&self, pairs: Vec<(String, FileEntry)>);

    /// Returns the backend's native snapshot codec, when it has one. The VFS
    /// falls back to the generic pair encoding otherwise.
    fn as_serializable(&self) -> Option<&dyn SerializableBackend> {
        None
    }
}

/// Storage backend with a native binary snapshot encoding. Round-tripping
/// `serialize` through `deserialize` must reproduce the keyspace
/// byte-for-byte.
pub trait SerializableBackend: StorageBackend {
    fn serialize(&self) -> VfsResult<Vec<u8>>;

    /// Replaces the entire keyspace with the decoded pairs.
    fn deserialize(&self, bytes: &[u8]) -> VfsResult<()>;
}

/// Generic snapshot encoding shared by the fallback path and
/// [`InMemoryStorage`](crate::InMemoryStorage): a bincode blob of the sorted
/// `(path, entry)` pair list. Sorting makes the encoding deterministic for a
/// given keyspace.
pub fn encode_pairs(mut pairs: Vec<(String, FileEntry)>) -> VfsResult<Vec<u8>> {
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    bincode::serde::encode_to_vec(&pairs, bincode::config::standard())
        .map_err(|err| VfsError::Codec(err.to_string()))
}

/// Inverse of [`encode_pairs`].
pub fn decode_pairs(bytes: &[u8]) -> VfsResult<Vec<(String, FileEntry)>> {
    let (pairs, _) =
        bincode::serde::decode_from_slice::<Vec<(String, FileEntry)>, _>(
            bytes,
            bincode::config::standard(),
        )
        .map_err(|err| VfsError::Codec(err.to_string()))?;
    Ok(pairs)
}
