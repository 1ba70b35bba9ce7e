//! The sandbox-layer quota wrapper around the bare VFS.
//!
//! Every code path that inserts nodes on behalf of an agent (the direct
//! file API, shell built-ins, redirections, extensions) goes through
//! [`GuardedFs`]. The bare [`Vfs`] underneath enforces nothing, so internal
//! operations like snapshot restore are never blocked by limits.
//!
//! Checks and the mutation they guard run under a single [`Vfs::lock`]
//! transaction, so concurrent writers cannot race past a limit together.

use std::sync::Arc;

use memvfs::{path_ops, Vfs, VfsError, VfsEvent, VfsLock};
use thiserror::Error;

use crate::events::{FileChangeKind, ObserverFanout, SandboxEvent};
use crate::options::SandboxOptions;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuotaError {
    #[error("file size of {size} bytes would exceed the per-file limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("write of {size} bytes would exceed the total storage limit of {limit} bytes")]
    TotalSizeExceeded { size: u64, limit: u64 },

    #[error("operation would exceed the limit of {limit} filesystem nodes")]
    NodeLimitReached { limit: usize },
}

/// Failures surfaced by the quota-aware filesystem entry points.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FsError {
    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error(transparent)]
    Vfs(#[from] VfsError),
}

#[derive(Debug, Clone, Copy)]
struct QuotaLimits {
    max_total_size: u64,
    max_file_size: u64,
    max_node_count: usize,
}

/// Quota-enforcing facade over a shared [`Vfs`], bound to one sandbox.
///
/// Reads pass straight through; mutations are checked against the sandbox
/// limits and publish [`SandboxEvent::FileChanged`] events to the sandbox's
/// observer fanout.
pub struct GuardedFs {
    vfs: Arc<Vfs>,
    limits: QuotaLimits,
    observers: Arc<ObserverFanout>,
    sandbox_id: String,
    vfs_events: crossbeam_channel::Receiver<VfsEvent>,
}

impl GuardedFs {
    pub fn new(
        vfs: Arc<Vfs>,
        options: &SandboxOptions,
        observers: Arc<ObserverFanout>,
        sandbox_id: String,
    ) -> Self {
        let vfs_events = vfs.event_receiver();
        vfs.set_events_enabled(true);

        Self {
            vfs,
            limits: QuotaLimits {
                max_total_size: options.max_total_size,
                max_file_size: options.max_file_size,
                max_node_count: options.max_node_count,
            },
            observers,
            sandbox_id,
            vfs_events,
        }
    }

    /// The unguarded filesystem underneath. Reserved for sandbox-internal
    /// operations (snapshots) that must bypass quotas.
    pub fn vfs(&self) -> &Arc<Vfs> {
        &self.vfs
    }

    // Read-side passthrough.

    pub fn exists(&self, path: &str) -> bool {
        self.vfs.exists(path)
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.vfs.is_file(path)
    }

    pub fn is_directory(&self, path: &str) -> bool {
        self.vfs.is_directory(path)
    }

    pub fn get_entry(&self, path: &str) -> Option<memvfs::FileEntry> {
        self.vfs.get_entry(path)
    }

    pub fn list_directory(&self, path: &str) -> Result<Vec<String>, FsError> {
        Ok(self.vfs.list_directory(path)?)
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        Ok(self.vfs.read_file(path)?)
    }

    pub fn read_to_string(&self, path: &str) -> Result<String, FsError> {
        Ok(self.vfs.read_to_string(path)?)
    }

    pub fn read_lines(&self, path: &str) -> Result<Vec<String>, FsError> {
        Ok(self.vfs.read_lines(path)?)
    }

    // Quota-checked mutations.

    pub fn write_file(&self, path: &str, content: &[u8]) -> Result<(), FsError> {
        let path = path_ops::normalize(path);
        let new_len = content.len() as u64;

        if new_len > self.limits.max_file_size {
            return Err(QuotaError::FileTooLarge {
                size: new_len,
                limit: self.limits.max_file_size,
            }
            .into());
        }

        {
            let mut lock = self.vfs.lock();

            let existing_len = match lock.get_entry(&path) {
                Some(entry) if !entry.is_directory => entry.size(),
                _ => 0,
            };
            self.check_total(&lock, existing_len, new_len)?;
            self.check_nodes(&lock, missing_chain(&lock, &path))?;

            lock.write_file(&path, content)?;
        }

        self.flush_events();
        Ok(())
    }

    pub fn append_to_file(&self, path: &str, content: &[u8]) -> Result<(), FsError> {
        let path = path_ops::normalize(path);

        {
            let mut lock = self.vfs.lock();

            let existing_len = match lock.get_entry(&path) {
                Some(entry) if !entry.is_directory => entry.size(),
                _ => 0,
            };
            let projected = existing_len + content.len() as u64;
            if projected > self.limits.max_file_size {
                return Err(QuotaError::FileTooLarge {
                    size: projected,
                    limit: self.limits.max_file_size,
                }
                .into());
            }
            self.check_total(&lock, 0, content.len() as u64)?;
            self.check_nodes(&lock, missing_chain(&lock, &path))?;

            lock.append_to_file(&path, content)?;
        }

        self.flush_events();
        Ok(())
    }

    pub fn create_directory(&self, path: &str) -> Result<(), FsError> {
        let path = path_ops::normalize(path);

        {
            let mut lock = self.vfs.lock();
            self.check_nodes(&lock, missing_chain(&lock, &path))?;
            lock.create_directory(&path)?;
        }

        self.flush_events();
        Ok(())
    }

    pub fn touch(&self, path: &str) -> Result<(), FsError> {
        let path = path_ops::normalize(path);

        {
            let mut lock = self.vfs.lock();
            self.check_nodes(&lock, missing_chain(&lock, &path))?;
            lock.touch(&path)?;
        }

        self.flush_events();
        Ok(())
    }

    pub fn copy(&self, src: &str, dst: &str, overwrite: bool) -> Result<(), FsError> {
        let src = path_ops::normalize(src);
        let dst = path_ops::normalize(dst);

        {
            let mut lock = self.vfs.lock();

            let source = lock
                .get_entry(&src)
                .ok_or_else(|| VfsError::NotFound(src.clone()))?;
            let target = lock.get_entry(&dst);
            if target.is_some() && !overwrite {
                return Err(VfsError::AlreadyExists(dst).into());
            }

            let pairs = lock.all_pairs();
            let subtree_stats = |root: &str, root_entry_is_dir: bool| -> (u64, usize) {
                if root_entry_is_dir {
                    let mut bytes = 0;
                    let mut nodes = 0;
                    for (path, entry) in &pairs {
                        if path.as_str() == root || path_ops::is_child_of(path, root) {
                            bytes += entry.size();
                            nodes += 1;
                        }
                    }
                    (bytes, nodes)
                } else {
                    let size = pairs
                        .iter()
                        .find(|(path, _)| path.as_str() == root)
                        .map(|(_, entry)| entry.size())
                        .unwrap_or(0);
                    (size, 1)
                }
            };

            let (added_bytes, added_nodes) = subtree_stats(&src, source.is_directory);
            let (removed_bytes, removed_nodes) = match &target {
                Some(entry) => subtree_stats(&dst, entry.is_directory),
                None => (0, 0),
            };
            let new_ancestors = missing_chain(&lock, &path_ops::parent(&dst));

            let projected_bytes = lock.total_size() - removed_bytes + added_bytes;
            if projected_bytes > self.limits.max_total_size {
                return Err(QuotaError::TotalSizeExceeded {
                    size: added_bytes,
                    limit: self.limits.max_total_size,
                }
                .into());
            }

            let projected_nodes =
                lock.node_count() - removed_nodes + added_nodes + new_ancestors;
            if projected_nodes > self.limits.max_node_count {
                return Err(QuotaError::NodeLimitReached {
                    limit: self.limits.max_node_count,
                }
                .into());
            }

            lock.copy(&src, &dst, overwrite)?;
        }

        self.flush_events();
        Ok(())
    }

    /// Move is copy plus recursive delete of the source; its net byte effect
    /// is never positive, so only the node count for newly created target
    /// ancestors is checked.
    pub fn rename(&self, src: &str, dst: &str, overwrite: bool) -> Result<(), FsError> {
        let src = path_ops::normalize(src);
        let dst = path_ops::normalize(dst);

        {
            let mut lock = self.vfs.lock();
            let new_ancestors = missing_chain(&lock, &path_ops::parent(&dst));
            self.check_nodes(&lock, new_ancestors)?;
            lock.rename(&src, &dst, overwrite)?;
        }

        self.flush_events();
        Ok(())
    }

    pub fn delete(&self, path: &str, recursive: bool) -> Result<(), FsError> {
        self.vfs.delete(path, recursive)?;
        self.flush_events();
        Ok(())
    }

    pub fn delete_file(&self, path: &str) -> Result<(), FsError> {
        self.vfs.delete_file(path)?;
        self.flush_events();
        Ok(())
    }

    pub fn delete_directory(&self, path: &str, recursive: bool) -> Result<(), FsError> {
        self.vfs.delete_directory(path, recursive)?;
        self.flush_events();
        Ok(())
    }

    fn check_total(&self, lock: &VfsLock<'_>, replaced: u64, added: u64) -> Result<(), FsError> {
        if lock.total_size() - replaced + added > self.limits.max_total_size {
            return Err(QuotaError::TotalSizeExceeded {
                size: added,
                limit: self.limits.max_total_size,
            }
            .into());
        }
        Ok(())
    }

    fn check_nodes(&self, lock: &VfsLock<'_>, missing: usize) -> Result<(), FsError> {
        if missing > 0 && lock.node_count() + missing > self.limits.max_node_count {
            return Err(QuotaError::NodeLimitReached {
                limit: self.limits.max_node_count,
            }
            .into());
        }
        Ok(())
    }


    /// Drains buffered VFS change events and republishes them to observers
    /// as [`SandboxEvent::FileChanged`].
    pub(crate) fn flush_events(&self) {
        for event in self.vfs_events.try_iter() {
            let (path, kind) = match event {
                VfsEvent::Create(path) => (path, FileChangeKind::Created),
                VfsEvent::Write(path) => (path, FileChangeKind::Modified),
                VfsEvent::Remove(path) => (path, FileChangeKind::Removed),
                _ => continue,
            };

            self.observers.dispatch(&SandboxEvent::FileChanged {
                sandbox_id: self.sandbox_id.clone(),
                path,
                kind,
            });
        }
    }
}

/// Number of nodes that would have to be created for `path` to exist:
/// the path itself plus every missing ancestor.
fn missing_chain(lock: &VfsLock<'_>, path: &str) -> usize {
    let mut missing = 0;
    let mut cursor = path.to_owned();

    while !lock.exists(&cursor) {
        missing += 1;
        if cursor == "/" {
            break;
        }
        cursor = path_ops::parent(&cursor);
    }

    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SandboxOptions;

    fn guard(options: SandboxOptions) -> GuardedFs {
        GuardedFs::new(
            Arc::new(Vfs::new_in_memory()),
            &options,
            ObserverFanout::new(),
            "test".to_owned(),
        )
    }

    #[test]
    fn oversized_file_is_rejected_and_state_unchanged() {
        let fs = guard(SandboxOptions {
            max_file_size: 10,
            ..Default::default()
        });

        let err = fs.write_file("/large.txt", b"xxxxxxxxxxxxxxxxxxxx").unwrap_err();
        assert!(err.to_string().contains("exceed"));
        assert!(!fs.exists("/large.txt"));
        assert_eq!(fs.vfs().total_size(), 0);
    }

    #[test]
    fn total_size_limit_counts_replacement_delta() {
        let fs = guard(SandboxOptions {
            max_total_size: 10,
            ..Default::default()
        });

        fs.write_file("/a", b"12345678").unwrap();
        // Replacing 8 bytes with 10 stays within the limit.
        fs.write_file("/a", b"1234567890").unwrap();
        // One more byte anywhere does not fit.
        let err = fs.write_file("/b", b"1").unwrap_err();
        assert!(matches!(
            err,
            FsError::Quota(QuotaError::TotalSizeExceeded { .. })
        ));
    }

    #[test]
    fn node_limit_counts_implicit_parents() {
        let fs = guard(SandboxOptions {
            max_node_count: 3,
            ..Default::default()
        });

        // Root + /a + /a/b would be 3 nodes: allowed.
        fs.create_directory("/a/b").unwrap();
        // A fourth node is not.
        let err = fs.write_file("/c", b"").unwrap_err();
        assert!(matches!(
            err,
            FsError::Quota(QuotaError::NodeLimitReached { .. })
        ));
        assert_eq!(fs.vfs().node_count(), 3);
    }

    #[test]
    fn rewriting_existing_path_ignores_node_limit() {
        let fs = guard(SandboxOptions {
            max_node_count: 2,
            ..Default::default()
        });

        fs.write_file("/a", b"1").unwrap();
        fs.write_file("/a", b"22").unwrap();
        assert_eq!(fs.read_file("/a").unwrap(), b"22");
    }

    #[test]
    fn append_checks_combined_length() {
        let fs = guard(SandboxOptions {
            max_file_size: 4,
            ..Default::default()
        });

        fs.write_file("/f", b"123").unwrap();
        fs.append_to_file("/f", b"4").unwrap();
        let err = fs.append_to_file("/f", b"5").unwrap_err();
        assert!(matches!(err, FsError::Quota(QuotaError::FileTooLarge { .. })));
        assert_eq!(fs.read_file("/f").unwrap(), b"1234");
    }

    #[test]
    fn copy_is_quota_checked() {
        let fs = guard(SandboxOptions {
            max_total_size: 10,
            ..Default::default()
        });

        fs.write_file("/src", b"123456").unwrap();
        let err = fs.copy("/src", "/dst", false).unwrap_err();
        assert!(matches!(
            err,
            FsError::Quota(QuotaError::TotalSizeExceeded { .. })
        ));
        assert!(!fs.exists("/dst"));
    }

    #[test]
    fn copy_overwrite_reclaims_target_bytes() {
        let fs = guard(SandboxOptions {
            max_total_size: 12,
            ..Default::default()
        });

        fs.write_file("/src", b"123456").unwrap();
        fs.write_file("/dst", b"abcdef").unwrap();
        fs.copy("/src", "/dst", true).unwrap();
        assert_eq!(fs.read_file("/dst").unwrap(), b"123456");
    }

    #[test]
    fn rename_moves_within_quota() {
        let fs = guard(SandboxOptions {
            max_total_size: 6,
            ..Default::default()
        });

        fs.write_file("/src", b"123456").unwrap();
        fs.rename("/src", "/deep/dst", false).unwrap();
        assert!(!fs.exists("/src"));
        assert_eq!(fs.read_file("/deep/dst").unwrap(), b"123456");
    }

    #[test]
    fn mutations_publish_file_changed_events() {
        use std::sync::Mutex;

        struct Collect(Mutex<Vec<(String, FileChangeKind)>>);
        impl crate::events::Observer for Collect {
            fn on_event(&self, event: &SandboxEvent) {
                if let SandboxEvent::FileChanged { path, kind, .. } = event {
                    self.0.lock().unwrap().push((path.clone(), *kind));
                }
            }
        }

        let observers = ObserverFanout::new();
        let fs = GuardedFs::new(
            Arc::new(Vfs::new_in_memory()),
            &SandboxOptions::default(),
            Arc::clone(&observers),
            "sb".to_owned(),
        );

        let collector = Arc::new(Collect(Mutex::new(Vec::new())));
        let _subscription = observers.subscribe(collector.clone());

        fs.write_file("/f", b"1").unwrap();
        fs.write_file("/f", b"2").unwrap();
        fs.delete_file("/f").unwrap();

        assert_eq!(
            *collector.0.lock().unwrap(),
            vec![
                ("/f".to_owned(), FileChangeKind::Created),
                ("/f".to_owned(), FileChangeKind::Modified),
                ("/f".to_owned(), FileChangeKind::Removed),
            ]
        );
    }
}
