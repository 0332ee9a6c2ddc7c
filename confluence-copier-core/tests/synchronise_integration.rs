use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use confluence_copier_core::contract::{
    Ancestor, AttachmentFile, AttachmentRef, BodyUpdate, DocumentRecord, MockContentClient,
    NewDocument, ParentRef,
};
use confluence_copier_core::error::{ClientError, SyncError};
use confluence_copier_core::staging::StagingArea;
use confluence_copier_core::synchronise::{Provenance, SpaceCopyMode, Synchroniser};
use tempfile::tempdir;

const SOURCE_BASE: &str = "https://source.example/wiki";

fn record(id: &str, title: &str, version: u64) -> DocumentRecord {
    DocumentRecord {
        id: id.to_string(),
        title: title.to_string(),
        version_number: version,
        space_name: "ENG".to_string(),
        body_content: format!("<p>body of {id}</p>"),
        ancestors: vec![],
        ordering_key: None,
        base_url: SOURCE_BASE.to_string(),
    }
}

fn attachment(id: &str, title: &str) -> AttachmentRef {
    AttachmentRef {
        id: id.to_string(),
        title: title.to_string(),
    }
}

fn server_error(operation: &'static str, target: &str) -> ClientError {
    ClientError::Write {
        operation,
        target: target.to_string(),
        status: 500,
        body: "boom".to_string(),
    }
}

#[test]
fn provenance_comment_has_fixed_field_order() {
    let source = record("123", "Spec", 5);
    let comment = Provenance::from_record(&source, "alice").to_string();
    assert_eq!(
        comment,
        "SourceURL: https://source.example/wiki, SourcePageID: 123, SourcePageVersion: 5, SourcePageSpace: ENG, SourcePageName: Spec, User: alice"
    );
}

#[test]
fn provenance_comment_parses_back_even_with_commas_in_title() {
    let source = record("123", "Plans, goals, and risks", 9);
    let provenance = Provenance::from_record(&source, "bob");

    let parsed: Provenance = provenance.to_string().parse().expect("parses");
    assert_eq!(parsed, provenance);

    let prefixed: Provenance = format!("confluence-copier: {provenance}")
        .parse()
        .expect("tolerates a leading tag");
    assert_eq!(prefixed.source_title, "Plans, goals, and risks");

    assert!("SourcePageID: 1".parse::<Provenance>().is_err());
}

#[tokio::test]
async fn sync_without_attachments_uploads_nothing_and_bumps_version() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::create_in(dir.path().join("temp")).await.unwrap();

    let mut source = MockContentClient::new();
    source
        .expect_get_document()
        .withf(|id| id == "123")
        .times(1)
        .returning(|_| Ok(record("123", "Spec", 5)));
    source
        .expect_list_attachments()
        .withf(|id| id == "123")
        .times(1)
        .returning(|_| Ok(vec![]));
    source.expect_download_attachment().times(0);

    let mut destination = MockContentClient::new();
    destination
        .expect_list_attachments()
        .withf(|id| id == "900")
        .times(1)
        .returning(|_| Ok(vec![]));
    destination.expect_delete_attachment().times(0);
    destination.expect_upload_attachments().times(0);
    destination
        .expect_get_document()
        .withf(|id| id == "900")
        .times(1)
        .returning(|_| Ok(record("900", "Destination title", 7)));
    destination
        .expect_update_document_body()
        .withf(|req: &BodyUpdate| {
            req.document_id == "900"
                && req.version_number == 8
                && req.title == "Destination title"
                && req.body == "<p>body of 123</p>"
                && req.comment.contains("SourcePageID: 123")
                && req.comment.ends_with("User: alice")
        })
        .times(1)
        .returning(|_| Ok(()));

    let sync = Synchroniser::new(&source, &destination, &staging, "alice");
    let report = sync.sync_document("123", "900").await.expect("sync succeeds");

    assert_eq!(report.new_version, 8);
    assert_eq!(report.attachments_uploaded, 0);
    assert_eq!(report.attachments_skipped, 0);
    assert_eq!(report.attachments_removed, 0);
    assert!(report.version_comment.starts_with("SourceURL: https://source.example/wiki"));
}

#[tokio::test]
async fn failed_download_is_skipped_and_the_rest_are_uploaded() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::create_in(dir.path().join("temp")).await.unwrap();

    let mut source = MockContentClient::new();
    source
        .expect_get_document()
        .returning(|_| Ok(record("123", "Spec", 2)));
    source.expect_list_attachments().returning(|_| {
        Ok(vec![
            attachment("a1", "one.png"),
            attachment("a2", "two.pdf"),
            attachment("a3", "three.txt"),
        ])
    });
    source
        .expect_download_attachment()
        .times(3)
        .returning(|_, att: &AttachmentRef| {
            if att.id == "a2" {
                Err(ClientError::Read {
                    operation: "download_attachment",
                    target: format!("123/{}", att.id),
                    status: 404,
                    body: "gone".to_string(),
                })
            } else {
                Ok(format!("bytes of {}", att.title).into_bytes())
            }
        });

    let mut destination = MockContentClient::new();
    destination
        .expect_list_attachments()
        .returning(|_| Ok(vec![]));
    destination
        .expect_upload_attachments()
        .withf(|id, files: &Vec<AttachmentFile>| {
            let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
            id == "900" && names == vec!["one.png", "three.txt"]
        })
        .times(1)
        .returning(|_, _| Ok(()));
    destination
        .expect_get_document()
        .returning(|_| Ok(record("900", "Dest", 1)));
    destination
        .expect_update_document_body()
        .withf(|req: &BodyUpdate| req.version_number == 2)
        .times(1)
        .returning(|_| Ok(()));

    let sync = Synchroniser::new(&source, &destination, &staging, "alice")
        .with_download_concurrency(2);
    let report = sync.sync_document("123", "900").await.expect("sync succeeds");

    assert_eq!(report.attachments_uploaded, 2);
    assert_eq!(report.attachments_skipped, 1);
    assert!(
        !staging.root().join("123").exists(),
        "uploaded batch is released"
    );
}

#[tokio::test]
async fn existing_destination_attachments_are_removed_before_upload() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::create_in(dir.path().join("temp")).await.unwrap();

    let mut source = MockContentClient::new();
    source
        .expect_get_document()
        .returning(|_| Ok(record("123", "Spec", 2)));
    source
        .expect_list_attachments()
        .returning(|_| Ok(vec![attachment("a1", "new.png")]));
    source
        .expect_download_attachment()
        .returning(|_, _| Ok(b"png".to_vec()));

    let deleted = Arc::new(Mutex::new(Vec::new()));
    let deleted_in_mock = deleted.clone();

    let mut destination = MockContentClient::new();
    destination
        .expect_list_attachments()
        .returning(|_| Ok(vec![attachment("old1", "old.png"), attachment("old2", "old.pdf")]));
    destination
        .expect_delete_attachment()
        .times(2)
        .returning(move |id| {
            deleted_in_mock.lock().unwrap().push(id.to_string());
            Ok(())
        });
    destination
        .expect_upload_attachments()
        .times(1)
        .returning(|_, _| Ok(()));
    destination
        .expect_get_document()
        .returning(|_| Ok(record("900", "Dest", 3)));
    destination
        .expect_update_document_body()
        .returning(|_| Ok(()));

    let sync = Synchroniser::new(&source, &destination, &staging, "alice");
    let report = sync.sync_document("123", "900").await.expect("sync succeeds");

    assert_eq!(report.attachments_removed, 2);
    assert_eq!(*deleted.lock().unwrap(), vec!["old1".to_string(), "old2".to_string()]);
}

#[tokio::test]
async fn rejected_upload_aborts_before_body_update() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::create_in(dir.path().join("temp")).await.unwrap();

    let mut source = MockContentClient::new();
    source
        .expect_get_document()
        .returning(|_| Ok(record("123", "Spec", 2)));
    source
        .expect_list_attachments()
        .returning(|_| Ok(vec![attachment("a1", "one.png")]));
    source
        .expect_download_attachment()
        .returning(|_, _| Ok(b"png".to_vec()));

    let mut destination = MockContentClient::new();
    destination
        .expect_list_attachments()
        .returning(|_| Ok(vec![]));
    destination
        .expect_upload_attachments()
        .returning(|id, _| Err(server_error("upload_attachments", id)));
    destination.expect_get_document().times(0);
    destination.expect_update_document_body().times(0);

    let sync = Synchroniser::new(&source, &destination, &staging, "alice");
    let err = sync.sync_document("123", "900").await.unwrap_err();

    match err {
        SyncError::Remote(e) => {
            assert!(e.is_write());
            assert_eq!(e.operation(), "upload_attachments");
            assert!(e.to_string().contains("boom"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let batch_dir = staging.root().join("123");
    assert_eq!(
        std::fs::read_dir(&batch_dir).map(|d| d.count()).unwrap_or(0),
        1,
        "batch stays until the command-level cleanup"
    );
    staging.cleanup().await.unwrap();
    assert!(!dir.path().join("temp").exists());
}

#[tokio::test]
async fn attachments_are_uploaded_under_their_source_titles() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::create_in(dir.path().join("temp")).await.unwrap();

    let mut source = MockContentClient::new();
    source
        .expect_get_document()
        .returning(|_| Ok(record("123", "Spec", 2)));
    source.expect_list_attachments().returning(|_| {
        Ok(vec![
            attachment("a1", "flow:v2.png"),
            attachment("a2", "flow_v2.png"),
            attachment("a3", ".env.sample"),
        ])
    });
    source
        .expect_download_attachment()
        .times(3)
        .returning(|_, att: &AttachmentRef| Ok(format!("bytes of {}", att.id).into_bytes()));

    let mut destination = MockContentClient::new();
    destination
        .expect_list_attachments()
        .returning(|_| Ok(vec![]));
    destination
        .expect_upload_attachments()
        .withf(|_, files: &Vec<AttachmentFile>| {
            let uploaded: Vec<(&str, &[u8])> = files
                .iter()
                .map(|f| (f.name.as_str(), f.content.as_slice()))
                .collect();
            uploaded
                == vec![
                    (".env.sample", b"bytes of a3".as_slice()),
                    ("flow:v2.png", b"bytes of a1".as_slice()),
                    ("flow_v2.png", b"bytes of a2".as_slice()),
                ]
        })
        .times(1)
        .returning(|_, _| Ok(()));
    destination
        .expect_get_document()
        .returning(|_| Ok(record("900", "Dest", 1)));
    destination
        .expect_update_document_body()
        .returning(|_| Ok(()));

    let sync = Synchroniser::new(&source, &destination, &staging, "alice");
    let report = sync.sync_document("123", "900").await.expect("sync succeeds");

    assert_eq!(report.attachments_uploaded, 3);
    assert_eq!(report.attachments_skipped, 0);
}

#[tokio::test]
async fn failed_batch_release_still_updates_the_body() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::create_in(dir.path().join("temp")).await.unwrap();
    let batch_dir = staging.root().join("123");

    let mut source = MockContentClient::new();
    source
        .expect_get_document()
        .returning(|_| Ok(record("123", "Spec", 2)));
    source
        .expect_list_attachments()
        .returning(|_| Ok(vec![attachment("a1", "one.png")]));
    source
        .expect_download_attachment()
        .returning(|_, _| Ok(b"png".to_vec()));

    let mut destination = MockContentClient::new();
    destination
        .expect_list_attachments()
        .returning(|_| Ok(vec![]));
    let replaced = batch_dir.clone();
    destination
        .expect_upload_attachments()
        .times(1)
        .returning(move |_, _| {
            // A plain file where the batch directory was cannot be removed as a directory.
            std::fs::remove_dir_all(&replaced).unwrap();
            std::fs::write(&replaced, b"not a directory").unwrap();
            Ok(())
        });
    destination
        .expect_get_document()
        .returning(|_| Ok(record("900", "Dest", 4)));
    destination
        .expect_update_document_body()
        .withf(|req: &BodyUpdate| req.version_number == 5)
        .times(1)
        .returning(|_| Ok(()));

    let sync = Synchroniser::new(&source, &destination, &staging, "alice");
    let report = sync.sync_document("123", "900").await.expect("sync succeeds");

    assert_eq!(report.new_version, 5);
    assert!(batch_dir.is_file());
}

#[tokio::test]
async fn failed_source_read_touches_nothing_on_destination() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::create_in(dir.path().join("temp")).await.unwrap();

    let mut source = MockContentClient::new();
    source.expect_get_document().returning(|id| {
        Err(ClientError::Read {
            operation: "get_document",
            target: id.to_string(),
            status: 404,
            body: "not found".to_string(),
        })
    });
    let destination = MockContentClient::new();

    let sync = Synchroniser::new(&source, &destination, &staging, "alice");
    let err = sync.sync_document("404", "900").await.unwrap_err();
    assert!(matches!(err, SyncError::Remote(ClientError::Read { status: 404, .. })));
}

#[tokio::test]
async fn copy_document_reuses_source_title_and_creates_at_root() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::create_in(dir.path().join("temp")).await.unwrap();

    let mut source = MockContentClient::new();
    source
        .expect_get_document_title()
        .withf(|id| id == "123")
        .times(1)
        .returning(|_| Ok("Spec".to_string()));
    source
        .expect_get_document()
        .returning(|_| Ok(record("123", "Spec", 4)));
    source.expect_list_attachments().returning(|_| Ok(vec![]));

    let mut destination = MockContentClient::new();
    destination
        .expect_create_document()
        .withf(|req: &NewDocument| {
            req.space_key == "DEST" && req.parent == ParentRef::Root && req.title == "Spec"
        })
        .times(1)
        .returning(|_| Ok("555".to_string()));
    destination.expect_list_attachments().returning(|_| Ok(vec![]));
    destination
        .expect_get_document()
        .withf(|id| id == "555")
        .returning(|_| Ok(record("555", "Spec", 1)));
    destination
        .expect_update_document_body()
        .withf(|req: &BodyUpdate| req.document_id == "555" && req.version_number == 2)
        .times(1)
        .returning(|_| Ok(()));

    let sync = Synchroniser::new(&source, &destination, &staging, "alice");
    let report = sync
        .copy_document("123", "DEST", ParentRef::from_raw("-1"), None)
        .await
        .expect("copy succeeds");

    assert_eq!(report.destination_id, "555");
    assert_eq!(report.title, "Spec");
}

#[tokio::test]
async fn copy_document_with_explicit_title_skips_title_lookup() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::create_in(dir.path().join("temp")).await.unwrap();

    let mut source = MockContentClient::new();
    source.expect_get_document_title().times(0);
    source
        .expect_get_document()
        .returning(|_| Ok(record("123", "Spec", 4)));
    source.expect_list_attachments().returning(|_| Ok(vec![]));

    let mut destination = MockContentClient::new();
    destination
        .expect_create_document()
        .withf(|req: &NewDocument| {
            req.title == "Renamed" && req.parent == ParentRef::Document("77".to_string())
        })
        .returning(|_| Ok("556".to_string()));
    destination.expect_list_attachments().returning(|_| Ok(vec![]));
    destination
        .expect_get_document()
        .returning(|_| Ok(record("556", "Renamed", 1)));
    destination
        .expect_update_document_body()
        .returning(|_| Ok(()));

    let sync = Synchroniser::new(&source, &destination, &staging, "alice");
    let report = sync
        .copy_document("123", "DEST", ParentRef::from_raw("77"), Some("Renamed"))
        .await
        .expect("copy succeeds");
    assert_eq!(report.destination_id, "556");
}

fn listed(id: &str, title: &str, ancestors: &[(&str, &str)], position: i64) -> DocumentRecord {
    DocumentRecord {
        ancestors: ancestors
            .iter()
            .map(|(id, title)| Ancestor {
                id: id.to_string(),
                title: title.to_string(),
            })
            .collect(),
        ordering_key: Some(position),
        ..record(id, title, 1)
    }
}

fn space_listing() -> Vec<DocumentRecord> {
    vec![
        listed("B", "Child of A", &[("A", "A")], 1),
        listed("A", "A", &[], 2),
        listed("C", "C", &[], 1),
    ]
}

/// Source mock serving the listing above plus page detail for each id.
fn space_source() -> MockContentClient {
    let mut source = MockContentClient::new();
    source
        .expect_list_space_documents()
        .withf(|key| key == "SRC")
        .times(1)
        .returning(|_| Ok(space_listing()));
    source
        .expect_get_document()
        .returning(|id| Ok(record(id, id, 3)));
    source.expect_list_attachments().returning(|_| Ok(vec![]));
    source
}

#[tokio::test]
async fn preview_builds_the_tree_without_touching_destination() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::create_in(dir.path().join("temp")).await.unwrap();

    let mut source = MockContentClient::new();
    source
        .expect_list_space_documents()
        .times(1)
        .returning(|_| Ok(space_listing()));
    let destination = MockContentClient::new();

    let sync = Synchroniser::new(&source, &destination, &staging, "alice");
    let report = sync
        .copy_space("SRC", SpaceCopyMode::Preview)
        .await
        .expect("preview succeeds");

    assert_eq!(report.tree.len(), 4);
    assert!(report.documents.is_empty());
    assert_eq!(report.destination_space_key, None);
    assert_eq!(
        report.tree.render().unwrap(),
        "SRC\n├── C\n└── A\n    └── Child of A\n"
    );
}

#[tokio::test]
async fn space_copy_creates_pages_parent_first_under_mapped_parents() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::create_in(dir.path().join("temp")).await.unwrap();
    let source = space_source();

    let created = Arc::new(Mutex::new(Vec::<(String, ParentRef)>::new()));
    let created_in_mock = created.clone();

    let mut destination = MockContentClient::new();
    destination
        .expect_create_space()
        .withf(|name| name == "Mirror Space")
        .times(1)
        .returning(|_| Ok("MirrorSpace".to_string()));
    destination
        .expect_create_document()
        .withf(|req: &NewDocument| req.space_key == "MirrorSpace")
        .times(3)
        .returning(move |req: NewDocument| {
            created_in_mock
                .lock()
                .unwrap()
                .push((req.title.clone(), req.parent.clone()));
            Ok(format!("dest-{}", req.title))
        });
    destination.expect_list_attachments().returning(|_| Ok(vec![]));
    destination
        .expect_get_document()
        .returning(|id| Ok(record(id, id, 1)));
    destination
        .expect_update_document_body()
        .times(3)
        .returning(|_| Ok(()));

    let sync = Synchroniser::new(&source, &destination, &staging, "alice");
    let report = sync
        .copy_space(
            "SRC",
            SpaceCopyMode::Create {
                destination_space_name: "Mirror Space".to_string(),
            },
        )
        .await
        .expect("space copy succeeds");

    assert_eq!(report.destination_space_key.as_deref(), Some("MirrorSpace"));
    assert_eq!(
        *created.lock().unwrap(),
        vec![
            ("C".to_string(), ParentRef::Root),
            ("A".to_string(), ParentRef::Root),
            (
                "Child of A".to_string(),
                ParentRef::Document("dest-A".to_string())
            ),
        ]
    );
    let synced: Vec<(&str, &str)> = report
        .documents
        .iter()
        .map(|d| (d.source_id.as_str(), d.destination_id.as_str()))
        .collect();
    assert_eq!(
        synced,
        vec![("C", "dest-C"), ("A", "dest-A"), ("B", "dest-Child of A")]
    );
}

#[tokio::test]
async fn space_update_syncs_mapped_pages_and_skips_the_rest() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::create_in(dir.path().join("temp")).await.unwrap();
    let source = space_source();

    let mut destination = MockContentClient::new();
    destination.expect_create_space().times(0);
    destination.expect_create_document().times(0);
    destination.expect_list_attachments().returning(|_| Ok(vec![]));
    destination
        .expect_get_document()
        .returning(|id| Ok(record(id, id, 10)));
    destination
        .expect_update_document_body()
        .withf(|req: &BodyUpdate| req.version_number == 11)
        .times(2)
        .returning(|_| Ok(()));

    let destination_ids: HashMap<String, String> = [("A", "900"), ("B", "901")]
        .into_iter()
        .map(|(s, d)| (s.to_string(), d.to_string()))
        .collect();

    let sync = Synchroniser::new(&source, &destination, &staging, "alice");
    let report = sync
        .copy_space("SRC", SpaceCopyMode::Update { destination_ids })
        .await
        .expect("space update succeeds");

    assert_eq!(report.skipped, vec!["C".to_string()]);
    let synced: Vec<&str> = report
        .documents
        .iter()
        .map(|d| d.destination_id.as_str())
        .collect();
    assert_eq!(synced, vec!["900", "901"]);
}

#[tokio::test]
async fn space_copy_stops_at_the_first_failed_page() {
    let dir = tempdir().unwrap();
    let staging = StagingArea::create_in(dir.path().join("temp")).await.unwrap();
    let source = space_source();

    let mut destination = MockContentClient::new();
    destination
        .expect_create_space()
        .returning(|_| Ok("MirrorSpace".to_string()));
    destination
        .expect_create_document()
        .times(1)
        .returning(|req: NewDocument| Err(server_error("create_document", &req.title)));

    let sync = Synchroniser::new(&source, &destination, &staging, "alice");
    let err = sync
        .copy_space(
            "SRC",
            SpaceCopyMode::Create {
                destination_space_name: "Mirror Space".to_string(),
            },
        )
        .await
        .unwrap_err();

    match err {
        SyncError::Remote(e) => assert_eq!(e.operation(), "create_document"),
        other => panic!("unexpected error: {other:?}"),
    }
}
