use thiserror::Error;

pub type VfsResult<T> = Result<T, VfsError>;

/// Error sum for filesystem operations. Display strings follow the POSIX
/// spellings so shell commands can surface them verbatim on stderr.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VfsError {
    #[error("{0}: No such file or directory")]
    NotFound(String),

    #[error("{0}: Not a directory")]
    NotADirectory(String),

    #[error("{0}: Is a directory")]
    IsADirectory(String),

    #[error("{0}: File exists")]
    AlreadyExists(String),

    #[error("{0}: Directory not empty")]
    DirectoryNotEmpty(String),

    #[error("cannot remove root directory")]
    RootRemoval,

    #[error("{0}: invalid UTF-8 in file content")]
    InvalidData(String),

    #[error("snapshot codec error: {0}")]
    Codec(String),
}
