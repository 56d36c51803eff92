mod common;

use bytes::Bytes;
use common::{harness, harness_with, options, pdf, Fault, HarnessOptions};
use object_store::{path::Path, ObjectStoreExt};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use upload_vault::{
    models::{
        BackendKind, Category, DeleteOutcome, FileState, IncomingFile, ListQuery, ListScope,
        ResolveOptions, UploadOptions, Visibility,
    },
    services::{
        ErrorKind, MetadataRegistry, OrchestratorSettings, UploadError, UploadPolicy,
        ValidationError,
    },
};
use uuid::Uuid;

fn never() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn local_upload_round_trips_bytes() {
    let h = harness().await;
    let body = Bytes::from_static(b"%PDF-1.7 quarterly numbers");
    let file = IncomingFile::new("Q3 Report.pdf", Some("application/pdf"), body.clone());

    let receipt = h
        .orchestrator
        .upload(file, &options("alice"), &never())
        .await
        .unwrap();

    assert_eq!(receipt.provider, BackendKind::Local);
    assert_eq!(receipt.category, Category::Document);
    assert_eq!(receipt.size_bytes, body.len() as u64);

    let object = h.orchestrator.get(receipt.id).await.unwrap();
    assert_eq!(object.state, FileState::Stored);
    assert_eq!(object.original_name, "Q3 Report.pdf");
    assert_eq!(object.folder.as_deref(), Some("users/alice"));
    assert_eq!(object.metadata["uploadedBy"], "alice");
    assert_eq!(object.metadata["originalName"], "Q3 Report.pdf");
    assert!(object.stored_key.ends_with(".pdf"));
    assert!(!object.stored_key.contains(' '));
    assert_eq!(
        receipt.url,
        format!("/uploads/documents/{}", object.stored_key)
    );

    let (mut handle, len) = h.local.open(Category::Document, &object.stored_key).await.unwrap();
    let mut read_back = Vec::new();
    handle.read_to_end(&mut read_back).await.unwrap();
    assert_eq!(len, body.len() as u64);
    assert_eq!(read_back, body.as_ref());
}

#[tokio::test]
async fn object_store_upload_round_trips_bytes() {
    let h = harness().await;
    let mut opts = options("bob");
    opts.provider = Some("s3".into());
    opts.visibility = Some(Visibility::Public);
    opts.folder = Some("projects/apollo".into());

    let file = IncomingFile::new("cover.png", Some("image/png"), Bytes::from_static(b"\x89PNG...."));
    let receipt = h.orchestrator.upload(file, &opts, &never()).await.unwrap();
    let object = h.orchestrator.get(receipt.id).await.unwrap();

    assert_eq!(receipt.provider, BackendKind::ObjectStore);
    assert_eq!(
        receipt.url,
        format!(
            "https://vault.s3.eu-west-3.amazonaws.com/projects/apollo/{}",
            object.stored_key
        )
    );

    let stored = h
        .memory
        .get(&Path::from(object.logical_path()))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(stored.as_ref(), b"\x89PNG....");
}

#[tokio::test]
async fn same_name_twice_gets_distinct_keys() {
    let h = harness().await;
    let first = h
        .orchestrator
        .upload(pdf("notes.pdf", 10), &options("alice"), &never())
        .await
        .unwrap();
    let second = h
        .orchestrator
        .upload(pdf("notes.pdf", 10), &options("alice"), &never())
        .await
        .unwrap();

    let a = h.orchestrator.get(first.id).await.unwrap();
    let b = h.orchestrator.get(second.id).await.unwrap();
    assert_ne!(a.stored_key, b.stored_key);
    assert_eq!(h.local_files().await, 2);
}

#[tokio::test]
async fn two_megabyte_report_is_a_stored_document() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .upload(pdf("report.pdf", 2_000_000), &options("carol"), &never())
        .await
        .unwrap();

    assert_eq!(receipt.category, Category::Document);
    assert_eq!(receipt.size_bytes, 2_000_000);
    let object = h.orchestrator.get(receipt.id).await.unwrap();
    assert_eq!(object.state, FileState::Stored);
}

#[tokio::test]
async fn oversized_video_never_reaches_a_backend() {
    let h = harness().await;
    let movie = IncomingFile::new(
        "movie.mp4",
        Some("video/mp4"),
        Bytes::from(vec![0u8; 600_000_000]),
    );

    let err = h
        .orchestrator
        .upload(movie, &options("dave"), &never())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        UploadError::Validation(ValidationError::TooLarge {
            category: Category::Video,
            size_bytes: 600_000_000,
            ..
        })
    ));
    assert_eq!(h.local_faults.store_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(h.local_files().await, 0);
    assert!(h.records_for("dave").await.is_empty());
}

#[tokio::test]
async fn validation_failures_leave_nothing_behind() {
    let h = harness().await;
    let cases = [
        (IncomingFile::new("empty.pdf", Some("application/pdf"), Bytes::new()), ErrorKind::EmptyFile),
        (
            IncomingFile::new("tool.exe", Some("application/x-msdownload"), Bytes::from_static(b"MZ")),
            ErrorKind::UnsupportedType,
        ),
        (
            IncomingFile::new("photo.pdf", Some("image/png"), Bytes::from_static(b"png")),
            ErrorKind::TypeMismatch,
        ),
    ];

    for (file, expected) in cases {
        let err = h
            .orchestrator
            .upload(file, &options("erin"), &never())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), expected);
    }
    assert_eq!(h.local_files().await, 0);
    assert!(h.records_for("erin").await.is_empty());
}

#[tokio::test]
async fn unknown_provider_is_rejected_before_storing() {
    let h = harness().await;
    let mut opts = options("frank");
    opts.provider = Some("ftp".into());

    let err = h
        .orchestrator
        .upload(pdf("a.pdf", 4), &opts, &never())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownProvider);

    opts.provider = Some("cloudinary".into());
    let err = h
        .orchestrator
        .upload(pdf("a.pdf", 4), &opts, &never())
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::ProviderNotConfigured(BackendKind::ManagedMedia)));
    assert_eq!(h.local_files().await, 0);
}

#[tokio::test]
async fn missing_owner_is_invalid() {
    let h = harness().await;
    let err = h
        .orchestrator
        .upload(pdf("a.pdf", 4), &UploadOptions::for_owner("  "), &never())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn registry_failure_removes_stored_bytes() {
    let h = harness().await;
    *h.registry.fail_create.lock().unwrap() = true;

    let err = h
        .orchestrator
        .upload(pdf("ledger.pdf", 64), &options("gina"), &never())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Registry);
    assert_eq!(h.local_faults.store_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(h.local_files().await, 0);
    assert!(h.records_for("gina").await.is_empty());
}

#[tokio::test]
async fn transient_failure_after_write_is_rolled_back() {
    let h = harness().await;
    h.local_faults.set_fault(Fault::FailAfterWrite);

    let err = h
        .orchestrator
        .upload(pdf("flaky.pdf", 64), &options("hank"), &never())
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    assert_eq!(h.local_files().await, 0);
    assert!(h.records_for("hank").await.is_empty());
}

#[tokio::test]
async fn permanent_rejection_is_not_transient() {
    let h = harness().await;
    h.local_faults.set_fault(Fault::Reject);

    let err = h
        .orchestrator
        .upload(pdf("quota.pdf", 64), &options("ivy"), &never())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BackendRejected);
    assert!(!err.is_transient());
    assert!(h.records_for("ivy").await.is_empty());
}

#[tokio::test]
async fn store_timeout_rolls_back_partial_write() {
    let h = harness_with(HarnessOptions {
        settings: OrchestratorSettings {
            backend_timeout: Duration::from_millis(200),
            ..OrchestratorSettings::default()
        },
        ..HarnessOptions::default()
    })
    .await;
    h.local_faults.set_fault(Fault::HangAfterWrite);

    let err = h
        .orchestrator
        .upload(pdf("slow.pdf", 128), &options("jack"), &never())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    assert_eq!(h.local_files().await, 0);
    assert!(h.records_for("jack").await.is_empty());
}

#[tokio::test]
async fn cancellation_mid_store_rolls_back() {
    let h = harness().await;
    h.local_faults.set_fault(Fault::HangAfterWrite);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = h
        .orchestrator
        .upload(pdf("abandoned.pdf", 128), &options("kate"), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Cancelled));
    assert_eq!(h.local_files().await, 0);
    assert!(h.records_for("kate").await.is_empty());
}

#[tokio::test]
async fn already_cancelled_upload_does_nothing() {
    let h = harness().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .orchestrator
        .upload(pdf("late.pdf", 8), &options("kate"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Cancelled));
    assert_eq!(h.local_faults.store_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn url_failure_after_commit_discards_record_and_bytes() {
    let h = harness().await;
    h.local_faults.set_fault(Fault::FailResolve);

    let err = h
        .orchestrator
        .upload(pdf("unsigned.pdf", 32), &options("liam"), &never())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    assert_eq!(h.local_files().await, 0);
    assert!(h.records_for("liam").await.is_empty());
}

#[tokio::test]
async fn private_object_without_signer_is_rolled_back() {
    let h = harness().await;
    let mut opts = options("mia");
    opts.provider = Some("s3".into());

    let err = h
        .orchestrator
        .upload(pdf("secret.pdf", 32), &opts, &never())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BackendRejected);
    assert_eq!(h.s3_objects().await, 0);
    assert!(h.records_for("mia").await.is_empty());
}

#[tokio::test]
async fn batch_reports_each_file_independently() {
    let h = harness_with(HarnessOptions {
        policy: UploadPolicy::default().with_max_bytes(Category::Document, 1024),
        ..HarnessOptions::default()
    })
    .await;

    let files = vec![
        pdf("one.pdf", 100).with_client_ref("a"),
        pdf("two.pdf", 4096).with_client_ref("b"),
        pdf("three.pdf", 100).with_client_ref("c"),
    ];
    let report = h
        .orchestrator
        .upload_batch(files, &options("nora"), &never())
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);

    let indexes: Vec<_> = report.outcomes.iter().map(|o| o.index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
    assert_eq!(report.outcomes[1].client_ref.as_deref(), Some("b"));
    assert_eq!(
        report.outcomes[1].result.as_ref().unwrap_err().kind(),
        ErrorKind::TooLarge
    );

    for index in [0, 2] {
        let receipt = report.outcomes[index].result.as_ref().unwrap();
        let object = h.orchestrator.get(receipt.id).await.unwrap();
        assert_eq!(object.state, FileState::Stored);
    }
    assert_eq!(h.local_files().await, 2);

    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].index, 1);
    assert_eq!(failures[0].file_name, "two.pdf");

    match report.into_result() {
        Err(UploadError::PartialBatchFailure { total, failed, .. }) => {
            assert_eq!((total, failed), (3, 1));
        }
        other => panic!("expected partial failure, got {:?}", other),
    }
}

#[tokio::test]
async fn batch_concurrency_never_exceeds_the_pool() {
    let h = harness_with(HarnessOptions {
        settings: OrchestratorSettings {
            worker_pool_size: 2,
            ..OrchestratorSettings::default()
        },
        ..HarnessOptions::default()
    })
    .await;
    h.local_faults.set_fault(Fault::Delay(50));

    let files = (0..6).map(|i| pdf(&format!("f{}.pdf", i), 16)).collect();
    let report = h
        .orchestrator
        .upload_batch(files, &options("omar"), &never())
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 6);
    let peak = h.local_faults.max_in_flight.load(std::sync::atomic::Ordering::SeqCst);
    assert!(peak <= 2, "peak concurrency was {}", peak);
    assert!(peak >= 1);
}

#[tokio::test]
async fn batch_limits_are_enforced() {
    let h = harness().await;

    let err = h
        .orchestrator
        .upload_batch(Vec::new(), &options("pia"), &never())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);

    let files = (0..11).map(|i| pdf(&format!("f{}.pdf", i), 4)).collect();
    let err = h
        .orchestrator
        .upload_batch(files, &options("pia"), &never())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert_eq!(h.local_files().await, 0);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .upload(pdf("gone.pdf", 16), &options("quinn"), &never())
        .await
        .unwrap();

    assert_eq!(
        h.orchestrator.delete(receipt.id, None).await.unwrap(),
        DeleteOutcome::Purged
    );
    assert_eq!(h.local_files().await, 0);
    assert_eq!(
        h.orchestrator.delete(receipt.id, None).await.unwrap(),
        DeleteOutcome::Purged
    );

    let object = h.orchestrator.get(receipt.id).await.unwrap();
    assert_eq!(object.state, FileState::Purged);
    assert!(h.records_for("quinn").await.is_empty());

    let err = h
        .orchestrator
        .resolve_url(receipt.id, &ResolveOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn delete_of_unknown_id_reports_not_found() {
    let h = harness().await;
    assert_eq!(
        h.orchestrator.delete(Uuid::new_v4(), None).await.unwrap(),
        DeleteOutcome::NotFound
    );
}

#[tokio::test]
async fn delete_with_other_provider_reports_not_found() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .upload(pdf("here.pdf", 16), &options("rosa"), &never())
        .await
        .unwrap();

    assert_eq!(
        h.orchestrator.delete(receipt.id, Some("s3")).await.unwrap(),
        DeleteOutcome::NotFound
    );
    assert_eq!(h.local_files().await, 1);
}

#[tokio::test]
async fn failed_backend_delete_leaves_tombstone_until_reconciled() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .upload(pdf("sticky.pdf", 16), &options("sam"), &never())
        .await
        .unwrap();

    h.local_faults.set_fault(Fault::FailDelete);
    let err = h.orchestrator.delete(receipt.id, None).await.unwrap_err();
    assert!(err.is_transient());

    let object = h.orchestrator.get(receipt.id).await.unwrap();
    assert_eq!(object.state, FileState::Tombstoned);
    assert!(h.records_for("sam").await.is_empty());
    assert_eq!(h.local_files().await, 1);

    let report = h.orchestrator.purge_tombstoned(10).await.unwrap();
    assert_eq!((report.attempted, report.purged, report.still_tombstoned), (1, 0, 1));

    h.local_faults.set_fault(Fault::None);
    let report = h.orchestrator.purge_tombstoned(10).await.unwrap();
    assert_eq!((report.attempted, report.purged), (1, 1));
    assert_eq!(h.local_files().await, 0);
    assert_eq!(
        h.orchestrator.get(receipt.id).await.unwrap().state,
        FileState::Purged
    );
    assert!(h.registry.list_tombstoned(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn resolve_respects_provider_and_download_flag() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .upload(pdf("doc.pdf", 16), &options("tara"), &never())
        .await
        .unwrap();

    let url = h
        .orchestrator
        .resolve_url(
            receipt.id,
            &ResolveOptions {
                force_download: true,
                ..ResolveOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(url.ends_with("?download=1"));

    let err = h
        .orchestrator
        .resolve_url(
            receipt.id,
            &ResolveOptions {
                provider: Some("s3".into()),
                ..ResolveOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn list_filters_by_scope_prefix_and_provider() {
    let h = harness().await;
    let mut opts = options("uma");
    opts.project_id = Some("apollo".into());
    opts.folder = Some("reports".into());
    h.orchestrator
        .upload(pdf("a.pdf", 8), &opts, &never())
        .await
        .unwrap();

    opts.folder = Some("drafts".into());
    h.orchestrator
        .upload(pdf("b.pdf", 8), &opts, &never())
        .await
        .unwrap();

    h.orchestrator
        .upload(pdf("c.pdf", 8), &options("victor"), &never())
        .await
        .unwrap();

    let by_owner = h
        .orchestrator
        .list(&ListQuery {
            scope: ListScope::Owner("uma".into()),
            prefix: None,
            provider: None,
        })
        .await
        .unwrap();
    assert_eq!(by_owner.len(), 2);

    let by_project = h
        .orchestrator
        .list(&ListQuery {
            scope: ListScope::Project("apollo".into()),
            prefix: Some("reports/".into()),
            provider: None,
        })
        .await
        .unwrap();
    assert_eq!(by_project.len(), 1);
    assert_eq!(by_project[0].original_name, "a.pdf");

    let on_s3 = h
        .orchestrator
        .list(&ListQuery {
            scope: ListScope::Owner("uma".into()),
            prefix: None,
            provider: Some(BackendKind::ObjectStore),
        })
        .await
        .unwrap();
    assert!(on_s3.is_empty());

    let err = h
        .orchestrator
        .list(&ListQuery {
            scope: ListScope::Owner(" ".into()),
            prefix: None,
            provider: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn backend_listing_shows_raw_keys() {
    let h = harness().await;
    let receipt = h
        .orchestrator
        .upload(pdf("raw.pdf", 8), &options("wes"), &never())
        .await
        .unwrap();
    let object = h.orchestrator.get(receipt.id).await.unwrap();

    let entries = h.orchestrator.list_backend(None, Some("documents/")).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, format!("documents/{}", object.stored_key));
    assert_eq!(entries[0].size_bytes, 8);

    assert!(h
        .orchestrator
        .list_backend(Some("s3"), None)
        .await
        .unwrap()
        .is_empty());
}
