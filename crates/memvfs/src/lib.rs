/*!
Implementation of an in-memory virtual filesystem with a configurable
storage backend.

memvfs stores an entire POSIX-like tree as a flat `path → FileEntry`
mapping. Paths are normalized before use, the root `/` always exists, and
every non-root key has a parent key that is a directory.

## Current Features
* API similar to `std::fs`, plus tree-level queries (sizes, counts)
* Configurable backends through the [`StorageBackend`] trait
    * [`InMemoryStorage`], a `RwLock<HashMap>` keyspace
* Binary snapshots of the whole keyspace, restorable atomically
* Change events delivered over a channel for observers
*/

mod entry;
mod error;
mod in_memory;
pub mod path_ops;
mod storage;

use std::sync::{Mutex, MutexGuard};

pub use entry::{format_mode, FileEntry, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
pub use error::{VfsError, VfsResult};
pub use in_memory::InMemoryStorage;
pub use storage::{decode_pairs, encode_pairs, SerializableBackend, StorageBackend};

/// Represents a change to the filesystem that observers might need to
/// handle.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VfsEvent {
    Create(String),
    Write(String),
    Remove(String),
}

/// Contains implementation details of the Vfs, wrapped by `Vfs` and
/// `VfsLock`, the public interfaces to this type.
struct VfsInner {
    backend: Box<dyn StorageBackend>,
    events_enabled: bool,
    event_sender: crossbeam_channel::Sender<VfsEvent>,
    event_receiver: crossbeam_channel::Receiver<VfsEvent>,
}

impl VfsInner {
    fn emit(&self, event: VfsEvent) {
        if self.events_enabled {
            let _ = self.event_sender.send(event);
        }
    }

    fn ensure_root(&mut self) {
        if !self.backend.exists("/") {
            self.backend.set("/", FileEntry::new_directory("/"));
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.backend.exists(&path_ops::normalize(path))
    }

    fn is_file(&self, path: &str) -> bool {
        self.backend
            .get(&path_ops::normalize(path))
            .is_some_and(|entry| !entry.is_directory)
    }

    fn is_directory(&self, path: &str) -> bool {
        self.backend
            .get(&path_ops::normalize(path))
            .is_some_and(|entry| entry.is_directory)
    }

    fn get_entry(&self, path: &str) -> Option<FileEntry> {
        self.backend.get(&path_ops::normalize(path))
    }

    fn create_directory(&mut self, path: &str) -> VfsResult<()> {
        let path = path_ops::normalize(path);
        if path == "/" {
            return Ok(());
        }

        if let Some(existing) = self.backend.get(&path) {
            if existing.is_directory {
                return Ok(());
            }
            return Err(VfsError::AlreadyExists(path));
        }

        self.create_directory(&path_ops::parent(&path))?;
        self.backend.set(&path, FileEntry::new_directory(&path));
        self.emit(VfsEvent::Create(path));
        Ok(())
    }

    fn list_directory(&self, path: &str) -> VfsResult<Vec<String>> {
        let path = path_ops::normalize(path);
        match self.backend.get(&path) {
            None => Err(VfsError::NotFound(path)),
            Some(entry) if !entry.is_directory => Err(VfsError::NotADirectory(path)),
            Some(_) => {
                let mut names: Vec<String> = self
                    .backend
                    .children(&path)
                    .iter()
                    .map(|child| path_ops::name(child))
                    .collect();
                names.sort();
                Ok(names)
            }
        }
    }

    fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        let path = path_ops::normalize(path);
        match self.backend.get(&path) {
            None => Err(VfsError::NotFound(path)),
            Some(entry) if entry.is_directory => Err(VfsError::IsADirectory(path)),
            Some(entry) => Ok(entry.content),
        }
    }

    fn read_to_string(&self, path: &str) -> VfsResult<String> {
        let normalized = path_ops::normalize(path);
        let content = self.read_file(path)?;
        String::from_utf8(content).map_err(|_| VfsError::InvalidData(normalized))
    }

    fn read_lines(&self, path: &str) -> VfsResult<Vec<String>> {
        Ok(self
            .read_to_string(path)?
            .split('\n')
            .map(str::to_owned)
            .collect())
    }

    fn write_file(&mut self, path: &str, content: &[u8]) -> VfsResult<()> {
        let path = path_ops::normalize(path);

        match self.backend.get(&path) {
            Some(entry) if entry.is_directory => Err(VfsError::IsADirectory(path)),
            Some(mut entry) => {
                entry.content = content.to_vec();
                entry.modified_at = std::time::SystemTime::now();
                self.backend.set(&path, entry);
                self.emit(VfsEvent::Write(path));
                Ok(())
            }
            None => {
                self.create_directory(&path_ops::parent(&path))?;
                self.backend
                    .set(&path, FileEntry::new_file(&path, content.to_vec()));
                self.emit(VfsEvent::Create(path));
                Ok(())
            }
        }
    }

    fn append_to_file(&mut self, path: &str, content: &[u8]) -> VfsResult<()> {
        let path = path_ops::normalize(path);

        match self.backend.get(&path) {
            Some(entry) if entry.is_directory => Err(VfsError::IsADirectory(path)),
            Some(mut entry) => {
                entry.content.extend_from_slice(content);
                entry.modified_at = std::time::SystemTime::now();
                self.backend.set(&path, entry);
                self.emit(VfsEvent::Write(path));
                Ok(())
            }
            None => self.write_file(&path, content),
        }
    }

    fn touch(&mut self, path: &str) -> VfsResult<()> {
        let path = path_ops::normalize(path);

        match self.backend.get(&path) {
            Some(mut entry) => {
                entry.modified_at = std::time::SystemTime::now();
                self.backend.set(&path, entry);
                self.emit(VfsEvent::Write(path));
                Ok(())
            }
            None => self.write_file(&path, &[]),
        }
    }

    fn delete_file(&mut self, path: &str) -> VfsResult<()> {
        let path = path_ops::normalize(path);
        match self.backend.get(&path) {
            None => Err(VfsError::NotFound(path)),
            Some(entry) if entry.is_directory => Err(VfsError::IsADirectory(path)),
            Some(_) => {
                self.backend.delete(&path);
                self.emit(VfsEvent::Remove(path));
                Ok(())
            }
        }
    }

    fn delete_directory(&mut self, path: &str, recursive: bool) -> VfsResult<()> {
        let path = path_ops::normalize(path);
        if path == "/" {
            return Err(VfsError::RootRemoval);
        }

        match self.backend.get(&path) {
            None => Err(VfsError::NotFound(path)),
            Some(entry) if !entry.is_directory => Err(VfsError::NotADirectory(path)),
            Some(_) => {
                let descendants = self.backend.paths_by_prefix(&format!("{}/", path));
                if !descendants.is_empty() && !recursive {
                    return Err(VfsError::DirectoryNotEmpty(path));
                }

                for descendant in descendants {
                    self.backend.delete(&descendant);
                    self.emit(VfsEvent::Remove(descendant));
                }
                self.backend.delete(&path);
                self.emit(VfsEvent::Remove(path));
                Ok(())
            }
        }
    }

    fn delete(&mut self, path: &str, recursive: bool) -> VfsResult<()> {
        let normalized = path_ops::normalize(path);
        match self.backend.get(&normalized) {
            None => Err(VfsError::NotFound(normalized)),
            Some(entry) if entry.is_directory => self.delete_directory(&normalized, recursive),
            Some(_) => self.delete_file(&normalized),
        }
    }

    fn copy(&mut self, src: &str, dst: &str, overwrite: bool) -> VfsResult<()> {
        let src = path_ops::normalize(src);
        let dst = path_ops::normalize(dst);

        let source = match self.backend.get(&src) {
            None => return Err(VfsError::NotFound(src)),
            Some(entry) => entry,
        };

        if self.backend.exists(&dst) {
            if !overwrite {
                return Err(VfsError::AlreadyExists(dst));
            }
            self.delete(&dst, true)?;
        }

        if source.is_directory {
            // Collect the subtree up front so the write phase cannot observe
            // its own insertions.
            let mut subtree = self.backend.paths_by_prefix(&format!("{}/", src));
            subtree.sort();

            self.create_directory(&dst)?;
            for source_path in subtree {
                let target_path = format!("{}{}", dst, &source_path[src.len()..]);
                let entry = match self.backend.get(&source_path) {
                    Some(entry) => entry,
                    None => continue,
                };
                if entry.is_directory {
                    self.create_directory(&target_path)?;
                } else {
                    self.write_file(&target_path, &entry.content)?;
                }
                if let Some(mut copied) = self.backend.get(&target_path) {
                    copied.mode = entry.mode;
                    self.backend.set(&target_path, copied);
                }
            }
        } else {
            self.write_file(&dst, &source.content)?;
            if let Some(mut copied) = self.backend.get(&dst) {
                copied.mode = source.mode;
                self.backend.set(&dst, copied);
            }
        }

        Ok(())
    }

    fn rename(&mut self, src: &str, dst: &str, overwrite: bool) -> VfsResult<()> {
        self.copy(src, dst, overwrite)?;
        self.delete(src, true)
    }

    fn create_snapshot(&self) -> VfsResult<Vec<u8>> {
        match self.backend.as_serializable() {
            Some(serializable) => serializable.serialize(),
            None => encode_pairs(self.backend.all_pairs()),
        }
    }

    fn restore_snapshot(&mut self, bytes: &[u8]) -> VfsResult<()> {
        self.backend.clear();
        match self.backend.as_serializable() {
            Some(serializable) => serializable.deserialize(bytes)?,
            None => {
                let pairs = decode_pairs(bytes)?;
                self.backend.set_many(pairs);
            }
        }
        self.ensure_root();
        log::trace!("Restored snapshot with {} keys", self.backend.count());
        Ok(())
    }

    fn clear(&mut self) {
        self.backend.clear();
        self.ensure_root();
    }

    fn total_size(&self) -> u64 {
        self.backend
            .all_pairs()
            .iter()
            .map(|(_, entry)| entry.size())
            .sum()
    }

    fn file_count(&self) -> usize {
        self.backend
            .all_pairs()
            .iter()
            .filter(|(_, entry)| !entry.is_directory)
            .count()
    }

    fn directory_count(&self) -> usize {
        self.backend
            .all_pairs()
            .iter()
            .filter(|(_, entry)| entry.is_directory)
            .count()
    }

    fn node_count(&self) -> usize {
        self.backend.count()
    }

    fn all_pairs(&self) -> Vec<(String, FileEntry)> {
        self.backend.all_pairs()
    }
}

/// A virtual filesystem with a configurable backend.
///
/// All operations on the Vfs take a lock on an internal backend. For
/// performing large batches of operations atomically, call [`Vfs::lock`] and
/// use [`VfsLock`] instead.
pub struct Vfs {
    inner: Mutex<VfsInner>,
}

impl Vfs {
    /// Creates a new `Vfs` with the default backend, [`InMemoryStorage`].
    pub fn new_in_memory() -> Self {
        Self::new(InMemoryStorage::new())
    }

    /// Creates a new `Vfs` with the given backend, ensuring the root
    /// directory exists.
    pub fn new<B: StorageBackend + 'static>(backend: B) -> Self {
        let (event_sender, event_receiver) = crossbeam_channel::unbounded();
        let mut inner = VfsInner {
            backend: Box::new(backend),
            events_enabled: false,
            event_sender,
            event_receiver,
        };
        inner.ensure_root();

        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Manually lock the Vfs, useful for multi-operation transactions that
    /// other threads must observe atomically.
    pub fn lock(&self) -> VfsLock<'_> {
        VfsLock {
            inner: self.inner.lock().unwrap(),
        }
    }

    /// Turns change-event delivery on or off. Disabled by default so that a
    /// bare `Vfs` with no consumer does not buffer events forever.
    pub fn set_events_enabled(&self, enabled: bool) {
        self.inner.lock().unwrap().events_enabled = enabled;
    }

    /// Retrieve a handle to the change-event receiver for this `Vfs`.
    pub fn event_receiver(&self) -> crossbeam_channel::Receiver<VfsEvent> {
        self.inner.lock().unwrap().event_receiver.clone()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.inner.lock().unwrap().exists(path)
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.inner.lock().unwrap().is_file(path)
    }

    pub fn is_directory(&self, path: &str) -> bool {
        self.inner.lock().unwrap().is_directory(path)
    }

    pub fn get_entry(&self, path: &str) -> Option<FileEntry> {
        self.inner.lock().unwrap().get_entry(path)
    }

    /// Creates a directory and any missing ancestors. Creating the root or
    /// an existing directory is a no-op; an existing file at the path is an
    /// error.
    pub fn create_directory(&self, path: &str) -> VfsResult<()> {
        self.inner.lock().unwrap().create_directory(path)
    }

    /// Returns the child *names* of a directory in ascending lexicographic
    /// order.
    pub fn list_directory(&self, path: &str) -> VfsResult<Vec<String>> {
        self.inner.lock().unwrap().list_directory(path)
    }

    pub fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        self.inner.lock().unwrap().read_file(path)
    }

    /// Reads a file and decodes it as UTF-8.
    pub fn read_to_string(&self, path: &str) -> VfsResult<String> {
        self.inner.lock().unwrap().read_to_string(path)
    }

    /// Reads a file as UTF-8 and splits it on `\n`.
    pub fn read_lines(&self, path: &str) -> VfsResult<Vec<String>> {
        self.inner.lock().unwrap().read_lines(path)
    }

    /// Writes a file, creating missing parent directories. Overwrites an
    /// existing file in place; writing over a directory is an error.
    pub fn write_file(&self, path: &str, content: &[u8]) -> VfsResult<()> {
        self.inner.lock().unwrap().write_file(path, content)
    }

    /// Appends to a file, creating it (like [`Vfs::write_file`]) when
    /// missing.
    pub fn append_to_file(&self, path: &str, content: &[u8]) -> VfsResult<()> {
        self.inner.lock().unwrap().append_to_file(path, content)
    }

    /// Creates an empty file, or bumps `modified_at` when the path already
    /// exists.
    pub fn touch(&self, path: &str) -> VfsResult<()> {
        self.inner.lock().unwrap().touch(path)
    }

    pub fn delete_file(&self, path: &str) -> VfsResult<()> {
        self.inner.lock().unwrap().delete_file(path)
    }

    /// Deletes a directory. Non-recursive deletion of a non-empty directory
    /// is an error; the root can never be deleted.
    pub fn delete_directory(&self, path: &str, recursive: bool) -> VfsResult<()> {
        self.inner.lock().unwrap().delete_directory(path, recursive)
    }

    /// Deletes a path of either type.
    pub fn delete(&self, path: &str, recursive: bool) -> VfsResult<()> {
        self.inner.lock().unwrap().delete(path, recursive)
    }

    /// Copies a file or directory subtree.
    pub fn copy(&self, src: &str, dst: &str, overwrite: bool) -> VfsResult<()> {
        self.inner.lock().unwrap().copy(src, dst, overwrite)
    }

    /// Moves a file or directory subtree: copy plus recursive delete of the
    /// source, executed atomically with respect to other Vfs callers.
    pub fn rename(&self, src: &str, dst: &str, overwrite: bool) -> VfsResult<()> {
        self.inner.lock().unwrap().rename(src, dst, overwrite)
    }

    /// Serializes the entire keyspace into an opaque binary blob, preferring
    /// the backend's native codec when it has one.
    pub fn create_snapshot(&self) -> VfsResult<Vec<u8>> {
        self.inner.lock().unwrap().create_snapshot()
    }

    /// Replaces the entire keyspace with a snapshot blob. Atomic: other
    /// threads observe either the old or the new tree, never a mix.
    pub fn restore_snapshot(&self, bytes: &[u8]) -> VfsResult<()> {
        self.inner.lock().unwrap().restore_snapshot(bytes)
    }

    /// Drops every key and recreates the root.
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear()
    }

    /// Sum of content lengths over all files.
    pub fn total_size(&self) -> u64 {
        self.inner.lock().unwrap().total_size()
    }

    pub fn file_count(&self) -> usize {
        self.inner.lock().unwrap().file_count()
    }

    pub fn directory_count(&self) -> usize {
        self.inner.lock().unwrap().directory_count()
    }

    pub fn node_count(&self) -> usize {
        self.inner.lock().unwrap().node_count()
    }

    /// Every `(path, entry)` pair in the keyspace, in backend order.
    pub fn all_pairs(&self) -> Vec<(String, FileEntry)> {
        self.inner.lock().unwrap().all_pairs()
    }
}

/// A locked handle to a [`Vfs`], created by [`Vfs::lock`].
///
/// Implements roughly the same API as [`Vfs`]; everything done through one
/// `VfsLock` is a single atomic transaction from other threads' point of
/// view.
pub struct VfsLock<'a> {
    inner: MutexGuard<'a, VfsInner>,
}

impl VfsLock<'_> {
    pub fn exists(&self, path: &str) -> bool {
        self.inner.exists(path)
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.inner.is_file(path)
    }

    pub fn is_directory(&self, path: &str) -> bool {
        self.inner.is_directory(path)
    }

    pub fn get_entry(&self, path: &str) -> Option<FileEntry> {
        self.inner.get_entry(path)
    }

    pub fn create_directory(&mut self, path: &str) -> VfsResult<()> {
        self.inner.create_directory(path)
    }

    pub fn list_directory(&self, path: &str) -> VfsResult<Vec<String>> {
        self.inner.list_directory(path)
    }

    pub fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        self.inner.read_file(path)
    }

    pub fn write_file(&mut self, path: &str, content: &[u8]) -> VfsResult<()> {
        self.inner.write_file(path, content)
    }

    pub fn append_to_file(&mut self, path: &str, content: &[u8]) -> VfsResult<()> {
        self.inner.append_to_file(path, content)
    }

    pub fn touch(&mut self, path: &str) -> VfsResult<()> {
        self.inner.touch(path)
    }

    pub fn delete(&mut self, path: &str, recursive: bool) -> VfsResult<()> {
        self.inner.delete(path, recursive)
    }

    pub fn copy(&mut self, src: &str, dst: &str, overwrite: bool) -> VfsResult<()> {
        self.inner.copy(src, dst, overwrite)
    }

    pub fn rename(&mut self, src: &str, dst: &str, overwrite: bool) -> VfsResult<()> {
        self.inner.rename(src, dst, overwrite)
    }

    pub fn restore_snapshot(&mut self, bytes: &[u8]) -> VfsResult<()> {
        self.inner.restore_snapshot(bytes)
    }

    pub fn total_size(&self) -> u64 {
        self.inner.total_size()
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn all_pairs(&self) -> Vec<(String, FileEntry)> {
        self.inner.all_pairs()
    }
}
