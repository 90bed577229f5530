// ABOUTME: Filesystem synchronization between editing sessions and sandboxes
// ABOUTME: Pushes file trees into sandbox storage and watches for external changes

pub mod engine;
pub mod recent;
pub mod tree;

pub use engine::{FileSyncEngine, WatchEvent};
pub use tree::{FileNode, FileTree};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Invalid encoding for {path}: {reason}")]
    Encoding { path: String, reason: String },

    #[error(transparent)]
    Provider(#[from] burrow_runtime::ProviderError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
