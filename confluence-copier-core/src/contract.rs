//! # contract: the remote content store as seen by the copier
//!
//! This module defines the [`ContentClient`] trait and the plain data types that
//! flow through it. Everything the synchronisation engine needs from a Confluence
//! instance (read a page, list/download/upload/delete attachments, create pages
//! and spaces, write a new page body) is expressed here and nothing more.
//!
//! ## Implementors
//! - [`crate::client::ConfluenceClient`]: the real HTTP client.
//! - `MockContentClient`: generated by `mockall`, exported under the default
//!   `test-export-mocks` feature so integration tests can script a remote.
//!
//! ## Error Handling
//! Every method returns [`ClientError`]. Calls are attempted exactly once; there
//! is no retry anywhere in the system.

use async_trait::async_trait;

use mockall::automock;

use crate::error::ClientError;

/// Destination parent id that means "create at the space root".
pub const ROOT_SENTINEL: &str = "-1";

/// One entry of a document's ancestor chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ancestor {
    pub id: String,
    pub title: String,
}

/// A document as returned by the remote store. Fetched fresh per operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub id: String,
    pub title: String,
    pub version_number: u64,
    pub space_name: String,
    /// Storage-format markup. Empty when the listing did not expand the body.
    pub body_content: String,
    /// Root-most first, immediate parent last.
    pub ancestors: Vec<Ancestor>,
    /// Sibling position hint (`extensions.position`).
    pub ordering_key: Option<i64>,
    /// Base URL of the instance that served this record (`_links.base`).
    pub base_url: String,
}

/// Reference to an attachment hanging off a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub id: String,
    pub title: String,
}

/// A file ready to be uploaded as an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFile {
    pub name: String,
    pub content: Vec<u8>,
}

/// Where a newly created document is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRef {
    /// Top level of the space, no ancestors.
    Root,
    /// Child of an existing destination document.
    Document(String),
}

impl ParentRef {
    /// Parses a raw CLI parent id, mapping [`ROOT_SENTINEL`] to [`ParentRef::Root`].
    pub fn from_raw(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == ROOT_SENTINEL || raw.is_empty() {
            ParentRef::Root
        } else {
            ParentRef::Document(raw.to_string())
        }
    }
}

impl std::fmt::Display for ParentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParentRef::Root => write!(f, "ROOT"),
            ParentRef::Document(id) => write!(f, "{id}"),
        }
    }
}

/// Request to create a new (empty) document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub space_key: String,
    pub parent: ParentRef,
    pub title: String,
}

/// Request to overwrite a document's body with a new version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyUpdate {
    pub document_id: String,
    pub version_number: u64,
    pub comment: String,
    pub body: String,
    pub title: String,
}

/// Operations consumed from one Confluence instance.
///
/// The copier holds two implementors at a time: one for the source instance and
/// one for the destination.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentClient: Send + Sync {
    /// Full detail of one document (body, version, space, title).
    async fn get_document(&self, id: &str) -> Result<DocumentRecord, ClientError>;

    /// Title only.
    async fn get_document_title(&self, id: &str) -> Result<String, ClientError>;

    /// Every current page of a space with its ancestor chain, in a single bounded request.
    async fn list_space_documents(
        &self,
        space_key: &str,
    ) -> Result<Vec<DocumentRecord>, ClientError>;

    /// Attachments of a document, in a single bounded request.
    async fn list_attachments(&self, document_id: &str)
        -> Result<Vec<AttachmentRef>, ClientError>;

    /// Raw bytes of one attachment.
    async fn download_attachment(
        &self,
        document_id: &str,
        attachment: &AttachmentRef,
    ) -> Result<Vec<u8>, ClientError>;

    /// Upload a set of files to a document in one multi-part call.
    async fn upload_attachments(
        &self,
        document_id: &str,
        files: Vec<AttachmentFile>,
    ) -> Result<(), ClientError>;

    /// Delete one attachment by its own id.
    async fn delete_attachment(&self, attachment_id: &str) -> Result<(), ClientError>;

    /// Create an empty document, returning its new id.
    async fn create_document(&self, req: NewDocument) -> Result<String, ClientError>;

    /// Write a new body/version to an existing document.
    async fn update_document_body(&self, req: BodyUpdate) -> Result<(), ClientError>;

    /// Create a space from a display name, returning the derived space key.
    async fn create_space(&self, name: &str) -> Result<String, ClientError>;
}
