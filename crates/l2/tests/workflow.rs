//! State machine tests over the in-memory session store: every transition
//! advances exactly one step, and every failed operation leaves state
//! untouched.

use provena_l2::store::SessionStore;
use provena_test_utils::{fixtures, MemSessionStore};
use provena_types::error::SessionError;
use provena_types::session::{PackageStatus, SessionStatus};

async fn seeded_store() -> MemSessionStore {
    let store = MemSessionStore::new();
    fixtures::seed_reference_data(&store).await;
    store
}

#[tokio::test]
async fn happy_path_walks_every_stage() {
    let store = seeded_store().await;

    let session = store.create_session("OPR-001").await.unwrap();
    assert!(session.session_id.starts_with("SES-"));
    assert_eq!(session.status, SessionStatus::Active);
    assert!(session.package_id.is_none());

    let (session, package) = store
        .scan_package(&session.session_id, "PKG-001")
        .await
        .unwrap();
    assert_eq!(session.package_id.as_deref(), Some("PKG-001"));
    assert_eq!(package.status, PackageStatus::PendingValidation);

    let package = store
        .validate_package(&session.session_id, "PKG-001", "sig_acme_electronics_001")
        .await
        .unwrap();
    assert!(package.is_trusted);
    assert_eq!(package.status, PackageStatus::Validated);

    let record = store
        .record_qc(&session.session_id, true, &[])
        .await
        .unwrap();
    assert!(record.qc_id.starts_with("QC-"));
    assert!(record.passed);

    let (session, label) = store
        .create_label(&session.session_id, "CUR-001")
        .await
        .unwrap();
    assert!(label.label_id.starts_with("LBL-"));
    assert!(label.tracking_no.starts_with("TRK-"));
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(!session.is_committed);

    // The assembled view carries every stage.
    let view = store.session_view(&session.session_id).await.unwrap();
    let package = view.package.unwrap();
    assert_eq!(package.package_id, "PKG-001");
    assert_eq!(package.supplier.unwrap().supplier_id, "SUP-001");
    assert_eq!(package.items.len(), 2);
    assert!(view.qc_record.unwrap().passed);
    assert_eq!(view.label.unwrap().courier.unwrap().courier_id, "CUR-001");

    let session = store
        .mark_committed(&session.session_id, &"ab".repeat(32), 3)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Committed);
    assert!(session.is_committed);
    assert_eq!(session.l1_block_height, Some(3));
}

#[tokio::test]
async fn failed_qc_marks_the_package_qc_failed() {
    let store = seeded_store().await;
    let session = store.create_session("OPR-001").await.unwrap();
    store
        .scan_package(&session.session_id, "PKG-001")
        .await
        .unwrap();
    store
        .validate_package(&session.session_id, "PKG-001", "sig")
        .await
        .unwrap();

    let record = store
        .record_qc(
            &session.session_id,
            false,
            &["crushed corner".to_string(), "seal broken".to_string()],
        )
        .await
        .unwrap();
    assert!(!record.passed);
    assert_eq!(record.issues.len(), 2);

    // A failed package cannot be labeled.
    let err = store
        .create_label(&session.session_id, "CUR-001")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::PreconditionFailed(_)));
}

#[tokio::test]
async fn create_session_requires_an_operator() {
    let store = seeded_store().await;
    let err = store.create_session("").await.unwrap_err();
    assert!(matches!(err, SessionError::PreconditionFailed(_)));
    assert_eq!(store.session_count(), 0);
}

#[tokio::test]
async fn stage_skipping_is_refused_and_state_is_unchanged() {
    let store = seeded_store().await;
    let session = store.create_session("OPR-001").await.unwrap();

    // QC before scan/validate.
    let err = store.record_qc(&session.session_id, true, &[]).await.unwrap_err();
    assert!(matches!(err, SessionError::PreconditionFailed(_)));

    // Label before QC.
    store
        .scan_package(&session.session_id, "PKG-001")
        .await
        .unwrap();
    let err = store
        .create_label(&session.session_id, "CUR-001")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::PreconditionFailed(_)));

    // QC before validation.
    let err = store.record_qc(&session.session_id, true, &[]).await.unwrap_err();
    assert!(matches!(err, SessionError::PreconditionFailed(_)));

    // Nothing advanced: the package is still awaiting validation and the
    // session is still active.
    let view = store.session_view(&session.session_id).await.unwrap();
    assert_eq!(view.status, SessionStatus::Active);
    assert!(view.qc_record.is_none());
    assert!(view.label.is_none());
    let package = store
        .validate_package(&session.session_id, "PKG-001", "sig")
        .await
        .unwrap();
    assert_eq!(package.status, PackageStatus::Validated);
}

#[tokio::test]
async fn unknown_references_return_not_found() {
    let store = seeded_store().await;
    let session = store.create_session("OPR-001").await.unwrap();

    let err = store
        .scan_package("SES-deadbeef", "PKG-001")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)));

    let err = store
        .scan_package(&session.session_id, "PKG-404")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)));

    store
        .scan_package(&session.session_id, "PKG-001")
        .await
        .unwrap();
    store
        .validate_package(&session.session_id, "PKG-001", "sig")
        .await
        .unwrap();
    store.record_qc(&session.session_id, true, &[]).await.unwrap();
    let err = store
        .create_label(&session.session_id, "CUR-404")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)));
}

#[tokio::test]
async fn empty_signature_is_refused() {
    let store = seeded_store().await;
    let session = store.create_session("OPR-001").await.unwrap();
    store
        .scan_package(&session.session_id, "PKG-001")
        .await
        .unwrap();

    let err = store
        .validate_package(&session.session_id, "PKG-001", "")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::PreconditionFailed(_)));

    let view = store.session_view(&session.session_id).await.unwrap();
    assert_eq!(view.package.unwrap().signature, "");
}

#[tokio::test]
async fn second_qc_and_second_label_conflict() {
    let store = seeded_store().await;
    let session = store.create_session("OPR-001").await.unwrap();
    store
        .scan_package(&session.session_id, "PKG-001")
        .await
        .unwrap();
    store
        .validate_package(&session.session_id, "PKG-001", "sig")
        .await
        .unwrap();
    store.record_qc(&session.session_id, true, &[]).await.unwrap();

    let err = store.record_qc(&session.session_id, true, &[]).await.unwrap_err();
    assert!(matches!(err, SessionError::Conflict(_)));

    store
        .create_label(&session.session_id, "CUR-001")
        .await
        .unwrap();
    let err = store
        .create_label(&session.session_id, "CUR-001")
        .await
        .unwrap_err();
    // The package is already labeled, so the precondition gate fires first.
    assert!(matches!(err, SessionError::PreconditionFailed(_)));
}

#[tokio::test]
async fn mark_committed_requires_completed_and_happens_once() {
    let store = seeded_store().await;
    let session = store.create_session("OPR-001").await.unwrap();

    let err = store
        .mark_committed(&session.session_id, &"ab".repeat(32), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::PreconditionFailed(_)));

    store
        .scan_package(&session.session_id, "PKG-001")
        .await
        .unwrap();
    store
        .validate_package(&session.session_id, "PKG-001", "sig")
        .await
        .unwrap();
    store.record_qc(&session.session_id, true, &[]).await.unwrap();
    store
        .create_label(&session.session_id, "CUR-001")
        .await
        .unwrap();

    store
        .mark_committed(&session.session_id, &"ab".repeat(32), 1)
        .await
        .unwrap();
    let err = store
        .mark_committed(&session.session_id, &"cd".repeat(32), 2)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Conflict(_)));
}

#[tokio::test]
async fn one_package_cannot_serve_two_sessions() {
    let store = seeded_store().await;
    let first = store.create_session("OPR-001").await.unwrap();
    let second = store.create_session("OPR-002").await.unwrap();

    store.scan_package(&first.session_id, "PKG-001").await.unwrap();
    let err = store
        .scan_package(&second.session_id, "PKG-001")
        .await
        .unwrap_err();
    // Linked and no longer pending; either gate refuses the second session.
    assert!(matches!(
        err,
        SessionError::Conflict(_) | SessionError::PreconditionFailed(_)
    ));
}
