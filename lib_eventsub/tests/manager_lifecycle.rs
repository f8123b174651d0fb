mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, Harness, MockProvider};
use lib_eventsub::models::catalog;
use lib_eventsub::{
    EventSubError, LiveBinding, MemoryStore, PersistedSubscription, ReconcileReport, SubscriptionStore,
};

#[tokio::test]
async fn duplicate_intent_keeps_a_single_live_subscription() {
    let h = Harness::new(10).await;
    let first = h
        .manager
        .create_subscription("alice", catalog::channel_chat_message("B", "alice-user"))
        .await
        .unwrap();
    let second = h
        .manager
        .create_subscription("bob", catalog::channel_chat_message("B", "bob-user"))
        .await
        .unwrap_err();
    assert!(matches!(second, EventSubError::AlreadySubscribed { .. }));

    let records = h.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, first);
    assert!(records[0].binding.live_id().is_some_and(|id| !id.is_empty()));
    assert_eq!(h.live_count(), 1);
    assert_eq!(h.api.create_count(), 1);
    assert_eq!(h.api.creates()[0].access_token, "token-alice");
}

#[tokio::test]
async fn create_then_delete_leaves_nothing_behind() {
    let h = Harness::new(10).await;
    let record_id = h
        .manager
        .create_subscription("alice", catalog::stream_online("42"))
        .await
        .unwrap();
    assert_eq!(h.registry.len(), 1);
    let live_id = h.store.records()[0].binding.live_id().map(str::to_string).unwrap();

    h.manager.delete_subscription(&record_id).await.unwrap();
    assert!(h.store.is_empty());
    assert_eq!(h.live_count(), 0);
    assert!(h.registry.is_empty());
    assert_eq!(h.api.deletes(), vec![live_id]);
    eventually("provider connection closed", || h.provider.open_connections() == 0).await;
}

#[tokio::test]
async fn delete_while_create_is_in_flight_wins() {
    let h = Harness::new(10).await;
    h.api.delay_creates(Duration::from_millis(200));

    let create = h
        .manager
        .create_subscription("alice", catalog::stream_online("42"));
    let delete = async {
        eventually("pending record saved", || h.store.len() == 1).await;
        let record_id = h.store.records()[0].id.clone();
        h.manager.delete_subscription(&record_id).await.unwrap();
        record_id
    };
    let (created, record_id) = tokio::join!(create, delete);

    assert!(matches!(created, Err(EventSubError::RecordNotFound(ref id)) if *id == record_id));
    assert!(h.store.is_empty());
    assert_eq!(h.live_count(), 0);
    assert_eq!(h.api.deletes(), vec!["live-1".to_string()]);
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn delete_survives_failed_unsubscribe() {
    let h = Harness::new(10).await;
    let record_id = h
        .manager
        .create_subscription("alice", catalog::stream_online("42"))
        .await
        .unwrap();
    h.api.fail_deletes(true);

    h.manager.delete_subscription(&record_id).await.unwrap();
    assert!(h.store.is_empty());
    assert_eq!(h.live_count(), 0);
    assert!(matches!(
        h.manager.delete_subscription(&record_id).await,
        Err(EventSubError::RecordNotFound(_))
    ));
}

#[tokio::test]
async fn rejected_subscribe_marks_record_failed_and_closes_empty_pool() {
    let h = Harness::new(10).await;
    h.api.reject_type(catalog::CHANNEL_SUBSCRIBE);
    let err = h
        .manager
        .create_subscription("alice", catalog::channel_subscribe("42"))
        .await
        .unwrap_err();
    assert!(matches!(err, EventSubError::Api { status: 403, .. }));

    let records = h.store.records();
    assert_eq!(records.len(), 1);
    assert!(matches!(&records[0].binding, LiveBinding::Failed(reason) if reason.contains("403")));
    assert!(h.registry.is_empty());

    // A failed record is dormant: asking again reuses it.
    h.api.allow_all();
    let record_id = h
        .manager
        .create_subscription("alice", catalog::channel_subscribe("42"))
        .await
        .unwrap();
    assert_eq!(record_id, records[0].id);
    assert_eq!(h.store.len(), 1);
    assert!(h.store.records()[0].binding.live_id().is_some());
}

#[tokio::test]
async fn different_authorizers_use_their_own_tokens() {
    let h = Harness::new(10).await;
    h.manager
        .create_subscription("alice", catalog::stream_online("a"))
        .await
        .unwrap();
    h.manager
        .create_subscription("bob", catalog::stream_online("b"))
        .await
        .unwrap();

    let tokens: Vec<String> = h.api.creates().into_iter().map(|c| c.access_token).collect();
    assert_eq!(tokens, vec!["token-alice", "token-bob"]);
    assert_eq!(h.registry.len(), 1);
    assert_eq!(h.live_count(), 2);

    let missing = h
        .manager
        .create_subscription("carol", catalog::stream_online("c"))
        .await
        .unwrap_err();
    assert!(matches!(missing, EventSubError::Token(_)));
}

#[tokio::test]
async fn default_set_skips_existing_subscriptions() {
    let h = Harness::new(50).await;
    h.manager
        .create_subscription("alice", catalog::stream_online("u1"))
        .await
        .unwrap();

    let created = h.manager.create_default_subscriptions("alice", "u1").await.unwrap();
    assert_eq!(created.len(), catalog::default_subscriptions("u1").len() - 1);
    assert_eq!(h.store.len(), catalog::default_subscriptions("u1").len());

    let again = h.manager.create_default_subscriptions("alice", "u1").await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn startup_resubscribes_and_drops_unrestorable_records() {
    let provider = MockProvider::start().await;
    let store = Arc::new(MemoryStore::new());
    let mut stale = PersistedSubscription::pending("alice", catalog::stream_online("1"));
    stale.set_binding(LiveBinding::Subscribed("from-last-run".into()));
    let revoked = PersistedSubscription::pending("alice", catalog::channel_subscribe("1"));
    let orphan = PersistedSubscription::pending("nobody", catalog::stream_offline("1"));
    for record in [&stale, &revoked, &orphan] {
        store.save(record).await.unwrap();
    }

    let config = common::test_config(&provider.url(), 10);
    let h = Harness::with_config(provider, config, store);
    h.api.reject_type(catalog::CHANNEL_SUBSCRIBE);

    let report = h.manager.start().await.unwrap();
    assert_eq!(report, ReconcileReport { subscribed: 1, removed: 2 });

    let records = h.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, stale.id);
    let live_id = records[0].binding.live_id().unwrap();
    assert_ne!(live_id, "from-last-run");
    assert!(h.registry.find_by_subscription(live_id).is_some());
}

#[tokio::test]
async fn shutdown_clears_live_ids_and_closes_pools() {
    let h = Harness::new(1).await;
    for broadcaster in ["1", "2"] {
        h.manager
            .create_subscription("alice", catalog::stream_online(broadcaster))
            .await
            .unwrap();
    }
    assert_eq!(h.registry.len(), 2);
    let pools = h.registry.pools();

    h.manager.shutdown().await.unwrap();
    assert!(h.registry.is_empty());
    assert!(pools.iter().all(|pool| pool.status().is_terminal()));
    assert!(h
        .store
        .records()
        .iter()
        .all(|record| record.binding == LiveBinding::Unsubscribed));
    eventually("provider connections closed", || h.provider.open_connections() == 0).await;

    // The next start trusts only the persisted intent.
    let report = h.manager.start().await.unwrap();
    assert_eq!(report.subscribed, 2);
    assert_eq!(h.live_count(), 2);
}
