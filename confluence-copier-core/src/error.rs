//! Error taxonomy for the copier.
//!
//! Remote failures are never retried: a non-success status on a read or on a
//! write aborts the running command. The one recoverable case, a single failed
//! attachment download, never becomes an error value at all; it is logged and
//! skipped inside [`crate::synchronise`].

use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by a [`crate::contract::ContentClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Non-success status on a read.
    #[error("{operation} failed for {target} (status {status}): {body}")]
    Read {
        operation: &'static str,
        target: String,
        status: u16,
        body: String,
    },

    /// Non-success status on create/update/delete/upload.
    #[error("{operation} failed for {target} (status {status}): {body}")]
    Write {
        operation: &'static str,
        target: String,
        status: u16,
        body: String,
    },

    /// The request never produced a response.
    #[error("{operation} could not reach the server for {target}: {message}")]
    Transport {
        operation: &'static str,
        target: String,
        message: String,
    },

    /// The response did not have the expected shape.
    #[error("{operation} returned an unreadable response for {target}: {message}")]
    Decode {
        operation: &'static str,
        target: String,
        message: String,
    },
}

impl ClientError {
    pub fn operation(&self) -> &'static str {
        match self {
            ClientError::Read { operation, .. }
            | ClientError::Write { operation, .. }
            | ClientError::Transport { operation, .. }
            | ClientError::Decode { operation, .. } => operation,
        }
    }

    /// True for failures of a write operation (create/update/delete/upload).
    pub fn is_write(&self) -> bool {
        matches!(self, ClientError::Write { .. })
    }
}

/// Local filesystem failure in the attachment staging area.
#[derive(Debug, Error)]
#[error("staging {action} failed at {}: {source}", .path.display())]
pub struct StagingError {
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl StagingError {
    pub(crate) fn new(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Display-time problems with a built tree. Construction itself never fails.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("document {id} ({title}) has no ordering key; cannot sort its siblings")]
    MissingOrderingKey { id: String, title: String },
}

/// Anything that aborts a synchronisation command.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] ClientError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("no destination id for parent {parent_id} of source document {source_id}")]
    UnresolvedParent { source_id: String, parent_id: String },
}
