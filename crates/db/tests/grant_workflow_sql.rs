use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use deedline_core::{
    AccessError, AccessGrantWorkflow, AccessLookup, AccessState, Decision, ManualClock,
    PropertyId, RequestStatus, Session, TicketSigner, UserId,
};
use deedline_db::{
    connect_with_settings, migrations, DbPool, DemoSeedDataset, SqlGrantStore,
    SqlPropertyDirectory,
};
use secrecy::SecretString;
use tempfile::TempDir;

async fn file_pool(dir: &TempDir, max_connections: u32) -> DbPool {
    let url = format!("sqlite://{}", dir.path().join("deedline.db").display());
    let pool = connect_with_settings(&url, max_connections, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    DemoSeedDataset::load(&pool).await.expect("seed");
    pool
}

fn workflow(pool: &DbPool, clock: &ManualClock) -> AccessGrantWorkflow {
    let signer = TicketSigner::new(&SecretString::from("sql-workflow-secret-0001".to_string()), 24)
        .expect("signer");
    AccessGrantWorkflow::new(
        Arc::new(SqlGrantStore::new(pool.clone())),
        Arc::new(SqlPropertyDirectory::new(pool.clone())),
        signer,
    )
    .with_clock(Arc::new(clock.clone()))
}

#[tokio::test]
async fn approve_then_exhaust_against_sqlite() {
    let dir = TempDir::new().expect("tempdir");
    let pool = file_pool(&dir, 2).await;
    let clock = ManualClock::at(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    let workflow = workflow(&pool, &clock);
    let buyer = Session::buyer("buyer-1");
    let property = PropertyId("P123".to_string());

    let request = workflow.create(&buyer, &property, None).await.expect("create");
    let approved = workflow
        .decide(
            &Session::seller("seller-demo"),
            &request.id,
            Decision::Approve { expiry_days: None },
        )
        .await
        .expect("approve");
    assert_eq!(approved.document_limits.len(), 2);

    for _ in 0..3 {
        workflow.record_download(&buyer, &request.id, 0).await.expect("download");
    }
    let fourth = workflow.record_download(&buyer, &request.id, 0).await;
    assert!(matches!(fourth, Err(AccessError::LimitExceeded { document_index: 0, .. })));

    let snapshot = workflow
        .check_access(&AccessLookup::PropertyBuyer {
            property_id: property,
            buyer_id: UserId("buyer-1".to_string()),
        })
        .await
        .expect("check");
    assert!(snapshot.has_access);
    assert_eq!(snapshot.state, AccessState::Granted, "second document still has downloads left");
    assert_eq!(snapshot.document_limits[0].remaining_downloads, 0);
    assert_eq!(snapshot.document_limits[1].remaining_downloads, 3);

    clock.advance(Duration::days(7));
    let expired =
        workflow.check_access(&AccessLookup::Request(request.id.clone())).await.expect("check");
    assert_eq!(expired.state, AccessState::Expired);
    assert_eq!(expired.status, Some(RequestStatus::Approved));
}

#[tokio::test]
async fn rejected_request_is_persisted_with_reason() {
    let dir = TempDir::new().expect("tempdir");
    let pool = file_pool(&dir, 2).await;
    let clock = ManualClock::at(Utc::now());
    let workflow = workflow(&pool, &clock);
    let buyer = Session::buyer("buyer-1");

    let request =
        workflow.create(&buyer, &PropertyId("P123".to_string()), None).await.expect("create");
    workflow
        .decide(
            &Session::seller("seller-demo"),
            &request.id,
            Decision::Reject { reason: Some("Incomplete documentation".to_string()) },
        )
        .await
        .expect("reject");

    let stored = SqlGrantStore::new(pool.clone());
    let listed = deedline_core::GrantStore::find_by_id(&stored, &request.id)
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(listed.rejection_reason.as_deref(), Some("Incomplete documentation"));
    assert!(listed.document_limits.is_empty());

    let download = workflow.record_download(&buyer, &request.id, 0).await;
    assert!(matches!(download, Err(AccessError::AccessDenied(_))));
}

#[tokio::test]
async fn stored_expiry_matches_the_decided_request_to_the_nanosecond() {
    let dir = TempDir::new().expect("tempdir");
    let pool = file_pool(&dir, 2).await;
    let decided_at =
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::nanoseconds(987_654_321);
    let clock = ManualClock::at(decided_at);
    let workflow = workflow(&pool, &clock);

    let request = workflow
        .create(&Session::buyer("buyer-1"), &PropertyId("P123".to_string()), None)
        .await
        .expect("create");
    let approved = workflow
        .decide(
            &Session::seller("seller-demo"),
            &request.id,
            Decision::Approve { expiry_days: Some(3) },
        )
        .await
        .expect("approve");

    let store = SqlGrantStore::new(pool.clone());
    let stored = deedline_core::GrantStore::find_by_id(&store, &request.id)
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(stored.approved_at, Some(decided_at));
    assert_eq!(stored.access_expires_on, approved.access_expires_on);

    clock.set(decided_at + Duration::days(3) - Duration::nanoseconds(1));
    let before =
        workflow.check_access(&AccessLookup::Request(request.id.clone())).await.expect("check");
    assert!(before.has_access);
    clock.advance(Duration::nanoseconds(1));
    let at_expiry =
        workflow.check_access(&AccessLookup::Request(request.id.clone())).await.expect("check");
    assert_eq!(at_expiry.state, AccessState::Expired);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_downloads_across_connections_stop_at_the_limit() {
    let dir = TempDir::new().expect("tempdir");
    let pool = file_pool(&dir, 4).await;
    let clock = ManualClock::at(Utc::now());
    let workflow = workflow(&pool, &clock);
    let buyer = Session::buyer("buyer-1");

    let request =
        workflow.create(&buyer, &PropertyId("P456".to_string()), None).await.expect("create");
    workflow
        .decide(
            &Session::seller("seller-demo"),
            &request.id,
            Decision::Approve { expiry_days: None },
        )
        .await
        .expect("approve");

    let mut handles = Vec::new();
    for _ in 0..10 {
        let workflow = workflow.clone();
        let buyer = buyer.clone();
        let request_id = request.id.clone();
        handles.push(tokio::spawn(async move {
            workflow.record_download(&buyer, &request_id, 0).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.expect("task") {
            Ok(_) => succeeded += 1,
            Err(AccessError::LimitExceeded { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(succeeded, 3);

    let log = SqlGrantStore::new(pool.clone()).access_log(&request.id).await.expect("log");
    assert_eq!(log.len(), 3);
}
