mod common;

use chrono::Duration;
use common::{TestDb, new_item, one_hour, t0};
use lost_found::{models::item::ItemStatus, services::item_store::ItemError};

#[tokio::test]
async fn hold_is_live_before_expiry_and_lapses_after() {
    let db = TestDb::with_settings(one_hour()).await;
    let svc = &db.service;
    let id = svc.deposit(new_item("wallet.jpg", vec![1.0, 0.0]), t0()).await.unwrap();

    let hold = svc.claim(id, "alice", t0()).await.unwrap();
    assert_eq!(hold.claimed_at, t0());
    assert_eq!(hold.expires_at, t0() + Duration::hours(1));

    let at_30m = svc.get_item(id, t0() + Duration::minutes(30)).await.unwrap();
    assert_eq!(at_30m.status, ItemStatus::Claimed);
    assert_eq!(at_30m.claimed_by.as_deref(), Some("alice"));

    let at_61m = svc.get_item(id, t0() + Duration::minutes(61)).await.unwrap();
    assert_eq!(at_61m.status, ItemStatus::Available);
    assert_eq!(at_61m.claimed_by, None);

    let available = svc.list_available(t0() + Duration::minutes(61)).await.unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].status, ItemStatus::Available);
}

#[tokio::test]
async fn claim_is_refused_until_the_hold_expires() {
    let db = TestDb::with_settings(one_hour()).await;
    let svc = &db.service;
    let id = svc.deposit(new_item("keys.jpg", vec![0.0, 1.0]), t0()).await.unwrap();
    svc.claim(id, "alice", t0()).await.unwrap();

    let just_before = t0() + Duration::hours(1) - Duration::milliseconds(1);
    let err = svc.claim(id, "bob", just_before).await.unwrap_err();
    assert!(matches!(err, ItemError::AlreadyClaimed(i) if i == id));

    let after = t0() + Duration::hours(1) + Duration::milliseconds(1);
    let hold = svc.claim(id, "bob", after).await.unwrap();
    assert_eq!(hold.claimed_by, "bob");
    assert_eq!(hold.expires_at, after + Duration::hours(1));
}

#[tokio::test]
async fn claiming_a_missing_item_reports_not_found() {
    let db = TestDb::new().await;
    let err = db.service.claim(42, "alice", t0()).await.unwrap_err();
    assert!(matches!(err, ItemError::NotFound(_)));
    assert!(!err.is_storage_failure());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_on_one_item_have_exactly_one_winner() {
    let db = TestDb::with_settings(one_hour()).await;
    let svc = db.service.clone();
    for n in 1..=7 {
        svc.deposit(new_item(&format!("item-{n}.jpg"), vec![1.0, 0.0]), t0())
            .await
            .unwrap();
    }

    let a = tokio::spawn({
        let svc = svc.clone();
        async move { svc.claim(7, "alice", t0()).await }
    });
    let b = tokio::spawn({
        let svc = svc.clone();
        async move { svc.claim(7, "bob", t0()).await }
    });
    let results = [a.await.unwrap(), b.await.unwrap()];

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(ItemError::AlreadyClaimed(7))))
    );

    let stored = svc.get_item(7, t0()).await.unwrap();
    assert_eq!(stored.claimed_by.as_deref(), Some(winners[0].claimed_by.as_str()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_claimants_racing_still_yield_one_hold() {
    let db = TestDb::with_settings(one_hour()).await;
    let svc = db.service.clone();
    let id = svc.deposit(new_item("phone.jpg", vec![1.0]), t0()).await.unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|n| {
            let svc = svc.clone();
            tokio::spawn(async move { svc.claim(id, &format!("claimant-{n}"), t0()).await })
        })
        .collect();

    let mut wins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => wins += 1,
            Err(ItemError::AlreadyClaimed(_)) => {}
            Err(other) => panic!("unexpected claim error: {other}"),
        }
    }
    assert_eq!(wins, 1);
}

#[tokio::test]
async fn release_expired_is_idempotent() {
    let db = TestDb::with_settings(one_hour()).await;
    let svc = &db.service;
    let a = svc.deposit(new_item("a.jpg", vec![1.0]), t0()).await.unwrap();
    let b = svc.deposit(new_item("b.jpg", vec![1.0]), t0()).await.unwrap();
    let c = svc.deposit(new_item("c.jpg", vec![1.0]), t0()).await.unwrap();
    svc.claim(a, "alice", t0()).await.unwrap();
    svc.claim(b, "bob", t0()).await.unwrap();
    svc.claim(c, "carol", t0() + Duration::minutes(50)).await.unwrap();

    let sweep_at = t0() + Duration::minutes(90);
    assert_eq!(svc.release_expired(sweep_at).await.unwrap(), 2);
    assert_eq!(svc.release_expired(sweep_at).await.unwrap(), 0);

    let stored = svc.items().get_by_id(a).await.unwrap();
    assert!(stored.claim.is_none());
    assert_eq!(stored.stored_status(), ItemStatus::Available);

    let still_held = svc.get_item(c, sweep_at).await.unwrap();
    assert_eq!(still_held.status, ItemStatus::Claimed);
}

#[tokio::test]
async fn only_the_holder_can_release_early() {
    let db = TestDb::with_settings(one_hour()).await;
    let svc = &db.service;
    let id = svc.deposit(new_item("scarf.jpg", vec![1.0]), t0()).await.unwrap();
    svc.claim(id, "alice", t0()).await.unwrap();

    let later = t0() + Duration::minutes(5);
    let err = svc.release(id, "bob", later).await.unwrap_err();
    assert!(matches!(err, ItemError::NotClaimHolder { .. }));

    svc.release(id, "alice", later).await.unwrap();
    assert_eq!(svc.get_item(id, later).await.unwrap().status, ItemStatus::Available);

    // A second release finds nothing to give up.
    let err = svc.release(id, "alice", later).await.unwrap_err();
    assert!(matches!(err, ItemError::NotClaimHolder { .. }));

    let err = svc.release(999, "alice", later).await.unwrap_err();
    assert!(matches!(err, ItemError::NotFound(_)));
}

#[tokio::test]
async fn listing_items_sweeps_lapsed_holds() {
    let db = TestDb::with_settings(one_hour()).await;
    let svc = &db.service;
    let id = svc.deposit(new_item("umbrella.jpg", vec![1.0]), t0()).await.unwrap();
    svc.claim(id, "alice", t0()).await.unwrap();

    let views = svc.list_items(t0() + Duration::hours(2)).await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].status, ItemStatus::Available);

    let stored = svc.items().get_by_id(id).await.unwrap();
    assert!(stored.claim.is_none(), "list_items should reset the stored row");
}

#[tokio::test]
async fn duplicate_filenames_and_deletes() {
    let db = TestDb::new().await;
    let svc = &db.service;
    svc.deposit(new_item("bag.jpg", vec![1.0]), t0()).await.unwrap();

    let err = svc
        .deposit(new_item("bag.jpg", vec![0.5]), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, ItemError::DuplicateFilename(ref f) if f == "bag.jpg"));

    svc.delete_item("bag.jpg").await.unwrap();
    assert!(matches!(
        svc.delete_item("bag.jpg").await.unwrap_err(),
        ItemError::NotFound(_)
    ));

    svc.deposit(new_item("x.jpg", vec![1.0]), t0()).await.unwrap();
    svc.deposit(new_item("y.jpg", vec![1.0]), t0()).await.unwrap();
    assert_eq!(svc.clear_items().await.unwrap(), 2);
    assert!(svc.list_items(t0()).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweeps_racing_a_reclaim_never_undo_the_new_hold() {
    let db = TestDb::with_settings(one_hour()).await;
    let svc = db.service.clone();
    let later = t0() + Duration::hours(2);

    for round in 0..20 {
        let id = svc
            .deposit(new_item(&format!("race-{round}.jpg"), vec![1.0]), t0())
            .await
            .unwrap();
        svc.claim(id, "old", t0()).await.unwrap();

        let sweep_a = tokio::spawn({
            let svc = svc.clone();
            async move { svc.release_expired(later).await }
        });
        let reclaim = tokio::spawn({
            let svc = svc.clone();
            async move { svc.claim(id, "new", later).await }
        });
        let sweep_b = tokio::spawn({
            let svc = svc.clone();
            async move { svc.release_expired(later).await }
        });

        let swept = sweep_a.await.unwrap().unwrap() + sweep_b.await.unwrap().unwrap();
        let hold = reclaim.await.unwrap().unwrap();

        assert!(swept <= 1, "round {round}: lapsed hold released {swept} times");
        assert_eq!(hold.claimed_by, "new");
        let stored = svc.items().get_by_id(id).await.unwrap();
        assert_eq!(
            stored.claim.map(|h| h.claimed_by).as_deref(),
            Some("new"),
            "round {round}: sweep cleared the fresh hold"
        );
    }
}
