//! HTTP implementation of [`ContentClient`] against the Confluence REST API.
//!
//! Payload construction and response decoding are plain functions so they can
//! be checked without a server. Every request is sent once; a non-success
//! status becomes a [`ClientError`] carrying the response body.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{multipart, Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::config::InstanceConfig;
use crate::contract::{
    Ancestor, AttachmentFile, AttachmentRef, BodyUpdate, ContentClient, DocumentRecord,
    NewDocument, ParentRef,
};
use crate::error::ClientError;

/// `limit` sent when listing attachments. No continuation is followed.
pub const ATTACHMENT_PAGE_LIMIT: usize = 100_000;

/// `limit` sent when listing the pages of a space. No continuation is followed.
pub const SPACE_PAGE_LIMIT: usize = 20_000;

/// Initial body of a freshly created document.
pub const PLACEHOLDER_BODY: &str = "Document created using Confluence Copier";

static NON_KEY_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\W_]+").expect("space key pattern is valid"));

pub struct ConfluenceClient {
    http: Client,
    base: Url,
    base_url: String,
    username: String,
    api_token: String,
}

impl ConfluenceClient {
    pub fn new(instance: &InstanceConfig, timeout_secs: u64) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ClientError::Transport {
                operation: "build_client",
                target: instance.base_url.clone(),
                message: e.to_string(),
            })?;
        let base_url = instance.base_url.trim_end_matches('/').to_string();
        let base = Url::parse(&base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ClientError::Transport {
                operation: "build_client",
                target: instance.base_url.clone(),
                message: "base URL is not an absolute http(s) URL".to_string(),
            })?;
        info!(
            base_url = %instance.base_url,
            username = %instance.username,
            api_token_set = !instance.api_token.is_empty(),
            "Initialised Confluence client"
        );
        Ok(Self {
            http,
            base,
            base_url,
            username: instance.username.clone(),
            api_token: instance.api_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Endpoint URL below the REST root. Each segment is percent-encoded, so
    /// ids cannot inject path or query syntax.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// `GET content` listing every current page of a space.
    pub fn space_listing_request(&self, space_key: &str) -> RequestBuilder {
        self.http
            .get(self.endpoint(&["content"]))
            .query(&[
                ("type", "page"),
                ("spaceKey", space_key),
                ("status", "current"),
                ("expand", "ancestors,descendants.page"),
            ])
            .query(&[("limit", SPACE_PAGE_LIMIT)])
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.username, Some(&self.api_token))
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        operation: &'static str,
        target: &str,
    ) -> Result<Response, ClientError> {
        self.authed(builder).send().await.map_err(|e| {
            error!(error = ?e, operation, target, "Request to Confluence failed");
            ClientError::Transport {
                operation,
                target: target.to_string(),
                message: e.to_string(),
            }
        })
    }

    /// Sends a read and decodes its JSON body.
    async fn read_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        operation: &'static str,
        target: &str,
    ) -> Result<T, ClientError> {
        let resp = self.send(builder, operation, target).await?;
        let resp = check_status(resp, operation, target, false).await?;
        let text = resp.text().await.map_err(|e| ClientError::Decode {
            operation,
            target: target.to_string(),
            message: e.to_string(),
        })?;
        decode(&text, operation, target)
    }
}

/// Turns a non-success response into a [`ClientError`], keeping the body.
async fn check_status(
    resp: Response,
    operation: &'static str,
    target: &str,
    write: bool,
) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
    error!(status = %status, operation, target, "Confluence API returned error. Response body: {body}");
    let target = target.to_string();
    let status = status.as_u16();
    Err(if write {
        ClientError::Write {
            operation,
            target,
            status,
            body,
        }
    } else {
        ClientError::Read {
            operation,
            target,
            status,
            body,
        }
    })
}

fn decode<T: DeserializeOwned>(
    text: &str,
    operation: &'static str,
    target: &str,
) -> Result<T, ClientError> {
    serde_json::from_str(text).map_err(|e| ClientError::Decode {
        operation,
        target: target.to_string(),
        message: e.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    id: String,
    #[serde(default)]
    title: String,
    version: Option<VersionField>,
    space: Option<SpaceField>,
    body: Option<BodyField>,
    #[serde(default)]
    ancestors: Vec<AncestorField>,
    extensions: Option<Value>,
    #[serde(rename = "_links")]
    links: Option<LinksField>,
}

#[derive(Debug, Deserialize)]
struct VersionField {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct SpaceField {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct BodyField {
    storage: Option<StorageField>,
}

#[derive(Debug, Deserialize)]
struct StorageField {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AncestorField {
    id: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct LinksField {
    base: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultsPage<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct AttachmentField {
    id: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct CreatedContent {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TitleOnly {
    title: String,
}

impl From<ContentResponse> for DocumentRecord {
    fn from(c: ContentResponse) -> Self {
        DocumentRecord {
            id: c.id,
            title: c.title,
            version_number: c.version.map(|v| v.number).unwrap_or_default(),
            space_name: c.space.map(|s| s.name).unwrap_or_default(),
            body_content: c
                .body
                .and_then(|b| b.storage)
                .map(|s| s.value)
                .unwrap_or_default(),
            ancestors: c
                .ancestors
                .into_iter()
                .map(|a| Ancestor {
                    id: a.id,
                    title: a.title,
                })
                .collect(),
            ordering_key: c.extensions.as_ref().and_then(ordering_key),
            base_url: c.links.and_then(|l| l.base).unwrap_or_default(),
        }
    }
}

/// Reads `position` from a content `extensions` object. Accepts a number or a numeric string.
fn ordering_key(extensions: &Value) -> Option<i64> {
    match extensions.get("position")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Decodes a single content object (`GET content/{id}`).
pub fn parse_document(json: &str) -> Result<DocumentRecord, ClientError> {
    let content: ContentResponse = decode(json, "get_document", "<response>")?;
    Ok(content.into())
}

/// Decodes a content listing (`GET content?spaceKey=...`).
pub fn parse_document_list(json: &str) -> Result<Vec<DocumentRecord>, ClientError> {
    let page: ResultsPage<ContentResponse> = decode(json, "list_space_documents", "<response>")?;
    Ok(page.results.into_iter().map(Into::into).collect())
}

/// Decodes an attachment listing (`GET content/{id}/child/attachment`).
pub fn parse_attachment_list(json: &str) -> Result<Vec<AttachmentRef>, ClientError> {
    let page: ResultsPage<AttachmentField> = decode(json, "list_attachments", "<response>")?;
    Ok(page
        .results
        .into_iter()
        .map(|a| AttachmentRef {
            id: a.id,
            title: a.title,
        })
        .collect())
}

/// Space key derived from a display name: every non-alphanumeric run removed.
pub fn derive_space_key(name: &str) -> String {
    NON_KEY_CHARS.replace_all(name, "").into_owned()
}

/// JSON body for `POST content`.
pub fn create_document_payload(req: &NewDocument) -> Value {
    let mut payload = json!({
        "space": { "key": req.space_key },
        "type": "page",
        "title": req.title,
        "body": {
            "storage": {
                "value": PLACEHOLDER_BODY,
                "representation": "wiki"
            }
        }
    });
    if let ParentRef::Document(parent_id) = &req.parent {
        payload["ancestors"] = json!([{ "id": parent_id }]);
    }
    payload
}

/// JSON body for `PUT content/{id}`.
pub fn update_body_payload(req: &BodyUpdate) -> Value {
    json!({
        "version": {
            "number": req.version_number,
            "message": req.comment
        },
        "type": "page",
        "body": {
            "storage": {
                "value": req.body,
                "representation": "storage"
            }
        },
        "metadata": {
            "properties": {
                "content-appearance-draft": { "value": "full-width" },
                "content-appearance-published": { "value": "full-width" }
            }
        },
        "title": req.title
    })
}

/// JSON body for `POST space`.
pub fn create_space_payload(name: &str, space_key: &str, username: &str) -> Value {
    json!({
        "key": space_key,
        "name": name,
        "description": {
            "plain": {
                "value": format!("Confluence-copier - User: {username}"),
                "representation": "plain"
            }
        }
    })
}

#[async_trait]
impl ContentClient for ConfluenceClient {
    async fn get_document(&self, id: &str) -> Result<DocumentRecord, ClientError> {
        info!(page_id = id, url = %self.base_url, "Reading page body");
        let builder = self
            .http
            .get(self.endpoint(&["content", id]))
            .query(&[("expand", "body.storage,version,space")]);
        let content: ContentResponse = self
            .read_json(builder, "get_document", id)
            .await?;
        Ok(content.into())
    }

    async fn get_document_title(&self, id: &str) -> Result<String, ClientError> {
        let url = self.endpoint(&["content", id]);
        let title: TitleOnly = self
            .read_json(
                self.http.get(url).header("X-Atlassian-Token", "nocheck"),
                "get_document_title",
                id,
            )
            .await?;
        Ok(title.title)
    }

    async fn list_space_documents(
        &self,
        space_key: &str,
    ) -> Result<Vec<DocumentRecord>, ClientError> {
        info!(space_key, url = %self.base_url, "Reading space hierarchy");
        let page: ResultsPage<ContentResponse> = self
            .read_json(
                self.space_listing_request(space_key),
                "list_space_documents",
                space_key,
            )
            .await?;
        if page.results.len() >= SPACE_PAGE_LIMIT {
            warn!(
                space_key,
                limit = SPACE_PAGE_LIMIT,
                "Space listing hit the page limit; later pages are not fetched"
            );
        }
        Ok(page.results.into_iter().map(Into::into).collect())
    }

    async fn list_attachments(
        &self,
        document_id: &str,
    ) -> Result<Vec<AttachmentRef>, ClientError> {
        info!(page_id = document_id, url = %self.base_url, "Reading page attachments");
        let builder = self
            .http
            .get(self.endpoint(&["content", document_id, "child", "attachment"]))
            .query(&[("limit", ATTACHMENT_PAGE_LIMIT)]);
        let page: ResultsPage<AttachmentField> = self
            .read_json(builder, "list_attachments", document_id)
            .await?;
        if page.results.len() >= ATTACHMENT_PAGE_LIMIT {
            warn!(
                page_id = document_id,
                limit = ATTACHMENT_PAGE_LIMIT,
                "Attachment listing hit the page limit; later pages are not fetched"
            );
        }
        Ok(page
            .results
            .into_iter()
            .map(|a| AttachmentRef {
                id: a.id,
                title: a.title,
            })
            .collect())
    }

    async fn download_attachment(
        &self,
        document_id: &str,
        attachment: &AttachmentRef,
    ) -> Result<Vec<u8>, ClientError> {
        info!(
            attachment_id = %attachment.id,
            title = %attachment.title,
            url = %self.base_url,
            "Downloading attachment"
        );
        let url = self.endpoint(&[
            "content",
            document_id,
            "child",
            "attachment",
            attachment.id.as_str(),
            "download",
        ]);
        let target = format!("{document_id}/{}", attachment.id);
        let resp = self.send(self.http.get(url), "download_attachment", &target).await?;
        let resp = check_status(resp, "download_attachment", &target, false).await?;
        let bytes = resp.bytes().await.map_err(|e| ClientError::Transport {
            operation: "download_attachment",
            target: target.clone(),
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    async fn upload_attachments(
        &self,
        document_id: &str,
        files: Vec<AttachmentFile>,
    ) -> Result<(), ClientError> {
        let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
        info!(
            page_id = document_id,
            count = files.len(),
            files = %names.join(", "),
            url = %self.base_url,
            "Uploading attachments"
        );
        let mut form = multipart::Form::new();
        for file in files {
            let part = multipart::Part::bytes(file.content)
                .file_name(file.name)
                .mime_str("application/octet-stream")
                .map_err(|e| ClientError::Transport {
                    operation: "upload_attachments",
                    target: document_id.to_string(),
                    message: e.to_string(),
                })?;
            form = form.part("file", part);
        }
        let url = self.endpoint(&["content", document_id, "child", "attachment"]);
        let builder = self
            .http
            .post(url)
            .header("X-Atlassian-Token", "nocheck")
            .multipart(form);
        let resp = self.send(builder, "upload_attachments", document_id).await?;
        check_status(resp, "upload_attachments", document_id, true).await?;
        info!(page_id = document_id, files = %names.join(", "), "Uploaded attachments");
        Ok(())
    }

    async fn delete_attachment(&self, attachment_id: &str) -> Result<(), ClientError> {
        info!(attachment_id, url = %self.base_url, "Deleting attachment");
        let url = self.endpoint(&["content", attachment_id]);
        let resp = self
            .send(self.http.delete(url), "delete_attachment", attachment_id)
            .await?;
        check_status(resp, "delete_attachment", attachment_id, true).await?;
        Ok(())
    }

    async fn create_document(&self, req: NewDocument) -> Result<String, ClientError> {
        let target = format!("{} in space {} under {}", req.title, req.space_key, req.parent);
        let builder = self
            .http
            .post(self.endpoint(&["content"]))
            .header("X-Atlassian-Token", "nocheck")
            .json(&create_document_payload(&req));
        let resp = self.send(builder, "create_document", &target).await?;
        let resp = check_status(resp, "create_document", &target, true).await?;
        let text = resp.text().await.map_err(|e| ClientError::Decode {
            operation: "create_document",
            target: target.clone(),
            message: e.to_string(),
        })?;
        let created: CreatedContent = decode(&text, "create_document", &target)?;
        info!(
            title = %req.title,
            id = %created.id,
            parent = %req.parent,
            "Created new document"
        );
        Ok(created.id)
    }

    async fn update_document_body(&self, req: BodyUpdate) -> Result<(), ClientError> {
        info!(page_id = %req.document_id, version = req.version_number, url = %self.base_url, "Updating page body");
        let builder = self
            .http
            .put(self.endpoint(&["content", req.document_id.as_str()]))
            .json(&update_body_payload(&req));
        let resp = self
            .send(builder, "update_document_body", &req.document_id)
            .await?;
        check_status(resp, "update_document_body", &req.document_id, true).await?;
        Ok(())
    }

    async fn create_space(&self, name: &str) -> Result<String, ClientError> {
        let space_key = derive_space_key(name);
        let target = format!("{name} ({space_key})");
        let builder = self
            .http
            .post(self.endpoint(&["space"]))
            .header("X-Atlassian-Token", "nocheck")
            .json(&create_space_payload(name, &space_key, &self.username));
        let resp = self.send(builder, "create_space", &target).await?;
        check_status(resp, "create_space", &target, true).await?;
        info!(space_key = %space_key, name, "Created new space");
        Ok(space_key)
    }
}
