//! High-level pipeline: mirrors pages from a source instance onto a destination.
//!
//! For one document the pipeline is strictly sequential:
//!   1. fetch the source page
//!   2. download its attachments into a fresh staging batch (bounded pool,
//!      failed downloads are logged and skipped)
//!   3. delete every attachment already on the destination page
//!   4. upload the staged files in one batch call
//!   5. re-read the destination version and write the source body as version + 1,
//!      with a provenance comment
//!   6. release the staging batch; a failure here is only logged
//!
//! Whole-space copies rebuild the source tree (see [`crate::hierarchy`]) and run
//! the single-page pipeline for every node, parents before children.
//!
//! # Error Handling
//! Any failed remote call aborts the current command immediately; earlier pages
//! stay as they were written. Staged files are removed by the caller through
//! [`StagingArea::cleanup`] once the command is over.
//!
//! # Navigation
//! - Per page: [`Synchroniser::sync_document`], [`Synchroniser::copy_document`]
//! - Whole space: [`Synchroniser::copy_space`]
//! - Audit trail: [`Provenance`]

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::contract::{
    AttachmentFile, AttachmentRef, BodyUpdate, ContentClient, DocumentRecord, NewDocument,
    ParentRef,
};
use crate::error::SyncError;
use crate::hierarchy::{build_tree, Tree};
use crate::staging::{BatchHandle, StagingArea};

/// Structured audit record written as the version comment of every mirrored page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub source_url: String,
    pub source_id: String,
    pub source_version: u64,
    pub source_space: String,
    pub source_title: String,
    pub user: String,
}

const PROVENANCE_KEYS: [&str; 6] = [
    "SourceURL",
    "SourcePageID",
    "SourcePageVersion",
    "SourcePageSpace",
    "SourcePageName",
    "User",
];

impl Provenance {
    pub fn from_record(source: &DocumentRecord, user: &str) -> Self {
        Self {
            source_url: source.base_url.clone(),
            source_id: source.id.clone(),
            source_version: source.version_number,
            source_space: source.space_name.clone(),
            source_title: source.title.clone(),
            user: user.to_string(),
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SourceURL: {}, SourcePageID: {}, SourcePageVersion: {}, SourcePageSpace: {}, SourcePageName: {}, User: {}",
            self.source_url,
            self.source_id,
            self.source_version,
            self.source_space,
            self.source_title,
            self.user
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid provenance comment: {0}")]
pub struct ProvenanceParseError(pub String);

impl FromStr for Provenance {
    type Err = ProvenanceParseError;

    /// Keys are located in their fixed order, so values may themselves contain `", "`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut values = Vec::with_capacity(PROVENANCE_KEYS.len());
        let mut rest = s;
        for (i, key) in PROVENANCE_KEYS.iter().enumerate() {
            let marker = format!("{key}: ");
            let start = if i == 0 {
                rest.find(&marker)
                    .ok_or_else(|| ProvenanceParseError(format!("missing {key}")))?
            } else {
                0
            };
            rest = rest[start..]
                .strip_prefix(&marker)
                .ok_or_else(|| ProvenanceParseError(format!("expected {key}")))?;
            let value = match PROVENANCE_KEYS.get(i + 1) {
                Some(next) => {
                    let next_marker = format!(", {next}: ");
                    let end = rest
                        .find(&next_marker)
                        .ok_or_else(|| ProvenanceParseError(format!("missing {next}")))?;
                    let value = &rest[..end];
                    rest = &rest[end + 2..];
                    value
                }
                None => rest,
            };
            values.push(value.to_string());
        }

        let [source_url, source_id, version, source_space, source_title, user]: [String; 6] = values
            .try_into()
            .map_err(|_| ProvenanceParseError("wrong number of fields".to_string()))?;
        let source_version = version
            .parse()
            .map_err(|_| ProvenanceParseError(format!("bad SourcePageVersion {version:?}")))?;
        Ok(Provenance {
            source_url,
            source_id,
            source_version,
            source_space,
            source_title,
            user,
        })
    }
}

/// Outcome of mirroring one page.
#[derive(Debug, Clone)]
pub struct DocumentReport {
    pub source_id: String,
    pub destination_id: String,
    pub title: String,
    pub attachments_uploaded: usize,
    pub attachments_skipped: usize,
    pub attachments_removed: usize,
    pub new_version: u64,
    pub version_comment: String,
}

/// How a whole-space copy treats the destination.
#[derive(Debug, Clone)]
pub enum SpaceCopyMode {
    /// Build and return the tree only.
    Preview,
    /// Create a new destination space and a new page for every source page.
    Create { destination_space_name: String },
    /// Overwrite existing destination pages, resolved through a source → destination id map.
    Update {
        destination_ids: HashMap<String, String>,
    },
}

/// Outcome of a whole-space copy.
#[derive(Debug)]
pub struct SpaceCopyReport {
    pub tree: Tree,
    pub destination_space_key: Option<String>,
    pub documents: Vec<DocumentReport>,
    /// Source ids that had no destination counterpart in update mode.
    pub skipped: Vec<String>,
}

/// Drives page synchronisation between a source and a destination client.
pub struct Synchroniser<'a, S, D> {
    source: &'a S,
    destination: &'a D,
    staging: &'a StagingArea,
    acting_user: String,
    download_concurrency: usize,
}

impl<'a, S, D> Synchroniser<'a, S, D>
where
    S: ContentClient,
    D: ContentClient,
{
    pub fn new(
        source: &'a S,
        destination: &'a D,
        staging: &'a StagingArea,
        acting_user: impl Into<String>,
    ) -> Self {
        Self {
            source,
            destination,
            staging,
            acting_user: acting_user.into(),
            download_concurrency: crate::config::default_download_concurrency(),
        }
    }

    /// Sets the attachment download pool size (at least 1).
    pub fn with_download_concurrency(mut self, workers: usize) -> Self {
        self.download_concurrency = workers.max(1);
        self
    }

    /// Overwrites an existing destination page with a source page, attachments included.
    pub async fn sync_document(
        &self,
        source_id: &str,
        destination_id: &str,
    ) -> Result<DocumentReport, SyncError> {
        info!(source_id, destination_id, "[SYNC] Synchronising document");

        let source_doc = self.source.get_document(source_id).await.map_err(|e| {
            error!(source_id, error = %e, "[SYNC][ERROR] Failed to read source page");
            e
        })?;

        let batch = self.staging.stage(source_id).await?;
        let skipped = self.download_attachments(source_id, &batch).await?;

        let removed = self.clear_destination_attachments(destination_id).await?;

        let uploaded = self.upload_batch(&batch, destination_id).await?;

        let provenance = Provenance::from_record(&source_doc, &self.acting_user);
        let new_version = self
            .update_body(destination_id, &source_doc, &provenance)
            .await?;

        // Leftovers are removed with the staging directory at the end of the command.
        if let Err(e) = self.staging.release(batch).await {
            warn!(source_id, error = %e, "[SYNC] Could not release staging batch");
        }

        info!(
            source_id,
            destination_id,
            uploaded,
            skipped,
            new_version,
            "[SYNC] Document synchronised"
        );
        Ok(DocumentReport {
            source_id: source_id.to_string(),
            destination_id: destination_id.to_string(),
            title: source_doc.title,
            attachments_uploaded: uploaded,
            attachments_skipped: skipped,
            attachments_removed: removed,
            new_version,
            version_comment: provenance.to_string(),
        })
    }

    /// Creates an empty destination page and returns its id.
    pub async fn create_document(
        &self,
        space_key: &str,
        parent: ParentRef,
        title: &str,
    ) -> Result<String, SyncError> {
        info!(space_key, parent = %parent, title, "[SYNC] Creating destination document");
        let id = self
            .destination
            .create_document(NewDocument {
                space_key: space_key.to_string(),
                parent,
                title: title.to_string(),
            })
            .await?;
        Ok(id)
    }

    /// Copies a source page into a new destination page.
    ///
    /// Without `new_title` the source page's title is reused.
    pub async fn copy_document(
        &self,
        source_id: &str,
        space_key: &str,
        parent: ParentRef,
        new_title: Option<&str>,
    ) -> Result<DocumentReport, SyncError> {
        let title = match new_title {
            Some(title) => title.to_string(),
            None => self.source.get_document_title(source_id).await?,
        };
        info!(source_id, title = %title, space_key, "[SYNC] Copying document");
        let destination_id = self.create_document(space_key, parent, &title).await?;
        self.sync_document(source_id, &destination_id).await
    }

    /// Rebuilds the source space tree and, unless previewing, mirrors every page.
    pub async fn copy_space(
        &self,
        source_space_key: &str,
        mode: SpaceCopyMode,
    ) -> Result<SpaceCopyReport, SyncError> {
        info!(source_space_key, ?mode, "[SYNC] Copying space");
        let documents = self.source.list_space_documents(source_space_key).await?;
        let tree = build_tree(&documents, source_space_key);

        let mut report = SpaceCopyReport {
            tree,
            destination_space_key: None,
            documents: Vec::new(),
            skipped: Vec::new(),
        };

        match mode {
            SpaceCopyMode::Preview => {}
            SpaceCopyMode::Create {
                destination_space_name,
            } => {
                let space_key = self.destination.create_space(&destination_space_name).await?;
                let mut id_map: HashMap<String, String> = HashMap::new();
                let root_id = report.tree.root_id().to_string();
                for node in report.tree.walk() {
                    let parent = match node.parent_id.as_deref() {
                        None => ParentRef::Root,
                        Some(p) if p == root_id => ParentRef::Root,
                        Some(p) => match id_map.get(p) {
                            Some(dest) => ParentRef::Document(dest.clone()),
                            None => {
                                return Err(SyncError::UnresolvedParent {
                                    source_id: node.id.clone(),
                                    parent_id: p.to_string(),
                                })
                            }
                        },
                    };
                    let destination_id =
                        self.create_document(&space_key, parent, &node.title).await?;
                    id_map.insert(node.id.clone(), destination_id.clone());
                    let doc_report = self.sync_document(&node.id, &destination_id).await?;
                    report.documents.push(doc_report);
                }
                report.destination_space_key = Some(space_key);
            }
            SpaceCopyMode::Update { destination_ids } => {
                for node in report.tree.walk() {
                    match destination_ids.get(&node.id) {
                        Some(destination_id) => {
                            let doc_report = self.sync_document(&node.id, destination_id).await?;
                            report.documents.push(doc_report);
                        }
                        None => {
                            warn!(source_id = %node.id, title = %node.title, "[SYNC] No destination page mapped; skipping");
                            report.skipped.push(node.id.clone());
                        }
                    }
                }
            }
        }

        info!(
            source_space_key,
            nodes = report.tree.len(),
            synchronised = report.documents.len(),
            skipped = report.skipped.len(),
            "[SYNC] Space copy finished"
        );
        Ok(report)
    }

    /// Fills the batch with the source page's attachments. Returns how many downloads were skipped.
    async fn download_attachments(
        &self,
        source_id: &str,
        batch: &BatchHandle,
    ) -> Result<usize, SyncError> {
        let attachments = self.source.list_attachments(source_id).await?;
        info!(
            source_id,
            count = attachments.len(),
            "[SYNC] Found attachments on source page"
        );
        if attachments.is_empty() {
            return Ok(0);
        }

        let outcomes: Vec<Result<bool, SyncError>> = stream::iter(attachments)
            .map(|attachment| self.download_one(source_id, attachment, batch))
            .buffer_unordered(self.download_concurrency)
            .collect()
            .await;

        let mut skipped = 0;
        for outcome in outcomes {
            if !outcome? {
                skipped += 1;
            }
        }
        Ok(skipped)
    }

    /// Downloads one attachment into the batch. `Ok(false)` means the download failed and was skipped.
    async fn download_one(
        &self,
        source_id: &str,
        attachment: AttachmentRef,
        batch: &BatchHandle,
    ) -> Result<bool, SyncError> {
        match self.source.download_attachment(source_id, &attachment).await {
            Ok(bytes) => {
                self.staging
                    .put(batch, &attachment.id, &attachment.title, &bytes)
                    .await?;
                Ok(true)
            }
            Err(e) => {
                error!(
                    attachment_id = %attachment.id,
                    title = %attachment.title,
                    error = %e,
                    "[SYNC] Could not download attachment; skipping"
                );
                Ok(false)
            }
        }
    }

    /// Deletes every attachment currently on the destination page.
    async fn clear_destination_attachments(&self, destination_id: &str) -> Result<usize, SyncError> {
        let existing = self.destination.list_attachments(destination_id).await?;
        info!(
            destination_id,
            count = existing.len(),
            "[SYNC] Removing existing destination attachments"
        );
        for attachment in &existing {
            info!(attachment_id = %attachment.id, title = %attachment.title, "[SYNC] Deleting attachment");
            self.destination.delete_attachment(&attachment.id).await?;
        }
        Ok(existing.len())
    }

    /// Uploads every staged file in one call. Returns how many files were sent.
    async fn upload_batch(&self, batch: &BatchHandle, destination_id: &str) -> Result<usize, SyncError> {
        let staged = self.staging.list_files(batch);
        if staged.is_empty() {
            info!(destination_id, "[SYNC] No attachments for upload");
            return Ok(0);
        }

        let mut files = Vec::with_capacity(staged.len());
        for file in staged {
            let content = self.staging.read(batch, &file).await?;
            files.push(AttachmentFile {
                name: file.name,
                content,
            });
        }
        let count = files.len();
        self.destination
            .upload_attachments(destination_id, files)
            .await
            .map_err(|e| {
                error!(destination_id, error = %e, "[SYNC][ERROR] Attachment upload failed");
                e
            })?;
        Ok(count)
    }

    /// Writes the source body onto the destination as its next version.
    async fn update_body(
        &self,
        destination_id: &str,
        source_doc: &DocumentRecord,
        provenance: &Provenance,
    ) -> Result<u64, SyncError> {
        let current = self.destination.get_document(destination_id).await?;
        let next_version = current.version_number + 1;
        self.destination
            .update_document_body(BodyUpdate {
                document_id: destination_id.to_string(),
                version_number: next_version,
                comment: provenance.to_string(),
                body: source_doc.body_content.clone(),
                title: current.title,
            })
            .await?;
        Ok(next_version)
    }
}
