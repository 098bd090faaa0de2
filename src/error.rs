use thiserror::Error;

/// Public error surface. Variants mirror POSIX errno/strerror/filename
/// triples for file-operation failures; `ObjectStoreError` and `Conflict`
/// are distinct kinds for the git plumbing layer.
#[derive(Error, Debug)]
pub enum Error {
    #[error("No such file or directory: {filename}")]
    NoSuchFileOrDirectory { filename: String },

    #[error("Is a directory: {filename}")]
    IsADirectory { filename: String },

    #[error("Not a directory: {filename}")]
    NotADirectory { filename: String },

    #[error("File exists: {filename}")]
    FileExists { filename: String },

    #[error("invalid mode '{0}', expected \"r\" or \"w\"")]
    BadMode(String),

    #[error("No database found at '{path}'")]
    NoDatabase { path: String },

    #[error("Cannot use detached HEAD state.")]
    DetachedHead,

    #[error("No such branch: {branch}")]
    NoSuchBranch { branch: String },

    #[error("Cannot commit transaction with open files.")]
    OpenFileHandle,

    #[error("git {operation} failed (status {status:?}): {stderr}")]
    ObjectStoreError {
        operation: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("ref advanced during commit")]
    Conflict,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
