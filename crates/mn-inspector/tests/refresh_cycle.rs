//! End-to-end refresh cycles against the scripted node.

mod common;

use chrono::{Duration, Utc};
use common::{CONFIG, FakeNode, NetState, block_at, inspector, reward_at, transfer_at};
use mn_inspector::scheduler::{RefreshOutcome, SkipReason};
use std::collections::HashMap;
use std::sync::Arc;

/// riemann: 50 blocks, a sovereign wallet, some of everything today
fn riemann() -> NetState {
    let now = Utc::now();
    let signed = vec![
        block_at(now, "0xs1"),
        block_at(now - Duration::seconds(1), "0xs2"),
        block_at(now - Duration::seconds(2), "0xs3"),
        block_at(now - Duration::days(3), "0xs4"),
        block_at(now - Duration::days(3) - Duration::hours(1), "0xs5"),
    ];
    let wallet = vec![
        reward_at(now, "0xr1", "1.5"),
        transfer_at(now, "0xt1", "100"),
        reward_at(now - Duration::seconds(5), "0xr2", "2.0"),
        reward_at(now - Duration::days(30), "0xr3", "4.0"),
    ];
    let sovereign = vec![reward_at(now, "0xsov1", "0.25")];

    NetState {
        synced: true,
        block_count: 50,
        blocks_today: 3,
        signed,
        first_signed: vec![block_at(now, "0xs1")],
        history: HashMap::from([("WALLET_R".to_string(), wallet), ("SOV_R".to_string(), sovereign)]),
        sovereign: Some("SOV_R".to_string()),
        panic_on_blocks: false,
    }
}

/// raiden: synced, no sovereign wallet, quiet history
fn raiden() -> NetState {
    let now = Utc::now();
    NetState {
        synced: true,
        block_count: 120,
        blocks_today: 0,
        signed: vec![block_at(now - Duration::days(2), "0xd1")],
        history: HashMap::from([("WALLET_D".to_string(), vec![reward_at(now - Duration::days(2), "0xdr", "8")])]),
        ..NetState::default()
    }
}

#[tokio::test]
async fn crossing_the_threshold_refreshes_and_buckets_today() {
    let dir = tempfile::tempdir().unwrap();
    let node = Arc::new(FakeNode::default());
    node.set("riemann", riemann());
    let app = inspector(node.clone(), &dir.path().join("cache.sqlite"), CONFIG).await;
    let network = app.registry.get("riemann").unwrap().clone();

    // 0 cached, 50 on the network, threshold 30
    let outcome = app.refresher.refresh_network(&network).await.unwrap();
    assert_eq!(
        outcome,
        RefreshOutcome::Refreshed {
            forced: false,
            block_count: 50
        }
    );

    let entry = app.cache.get("riemann");
    assert_eq!(entry.block_count, 50);
    assert_eq!(entry.previous_block_count, 0);
    assert_eq!(entry.block_count_today, Some(3));
    assert_eq!(entry.current_block_reward, Some(2.5));
    assert_eq!(entry.native_ticker.as_deref(), Some("tKEL"));
    assert_eq!(entry.days_cutoff, 20);

    let signed = entry.signed_blocks.as_ref().unwrap();
    assert_eq!(signed.count, 5);
    let today = Utc::now().date_naive();
    let today_bucket = signed.daily_buckets.iter().find(|b| b.date == today).unwrap();
    assert_eq!(today_bucket.sum, 3);
    assert_eq!(signed.today.count, 3);
    assert_eq!(signed.daily_buckets.iter().map(|b| b.sum).sum::<u64>(), 5);

    let rewards = entry.reward_wallet.as_ref().unwrap();
    assert_eq!(rewards.window.count, 3, "the transfer is not a reward");
    assert_eq!(rewards.total_rewards, 7.5);
    assert_eq!(rewards.window.rolling_window.count, 2);
    assert_eq!(rewards.biggest.as_ref().unwrap().tx_hash.as_deref(), Some("0xr3"));

    let sovereign = entry.sovereign_wallet.as_ref().unwrap();
    assert_eq!(sovereign.total_rewards, 0.25);
    assert_eq!(entry.sovereign_wallet_balance.as_ref().unwrap()["CELL"], 12.5);
    assert_eq!(app.registry.sovereign_address("riemann").as_deref(), Some("SOV_R"));

    let info = entry.node_info.as_ref().unwrap();
    assert_eq!(info.total_active_masternodes, 2);
    assert_eq!(info.relative_weight.as_deref(), Some("1.25"));

    // Nothing new since: below threshold and not stale
    let again = app.refresher.refresh_network(&network).await.unwrap();
    assert_eq!(again, RefreshOutcome::Skipped(SkipReason::BelowThreshold));
}

#[tokio::test]
async fn unsynced_network_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let node = Arc::new(FakeNode::default());
    node.set(
        "riemann",
        NetState {
            synced: false,
            ..riemann()
        },
    );
    let app = inspector(node, &dir.path().join("cache.sqlite"), CONFIG).await;
    let network = app.registry.get("riemann").unwrap().clone();

    let outcome = app.refresher.refresh_network(&network).await.unwrap();
    assert_eq!(outcome, RefreshOutcome::Skipped(SkipReason::NotSynced));
    assert!(app.cache.get("riemann").is_empty());
}

#[tokio::test]
async fn unreachable_network_is_skipped_not_failed() {
    let dir = tempfile::tempdir().unwrap();
    let node = Arc::new(FakeNode::default());
    node.set("riemann", riemann());
    let app = inspector(node, &dir.path().join("cache.sqlite"), CONFIG).await;

    // raiden was never scripted, so every call errors
    let outcomes = app.refresher.run_pass().await;
    assert_eq!(
        outcomes,
        vec![
            ("raiden".to_string(), Some(RefreshOutcome::Skipped(SkipReason::StatusUnavailable))),
            (
                "riemann".to_string(),
                Some(RefreshOutcome::Refreshed {
                    forced: false,
                    block_count: 50
                })
            ),
        ]
    );
}

#[tokio::test]
async fn stale_snapshot_needs_new_blocks() {
    let config = CONFIG.replace("days_cutoff = 20", "days_cutoff = 20\nforce_refresh_interval_secs = 0");
    let dir = tempfile::tempdir().unwrap();
    let node = Arc::new(FakeNode::default());
    node.set("riemann", riemann());
    let app = inspector(node.clone(), &dir.path().join("cache.sqlite"), &config).await;
    let network = app.registry.get("riemann").unwrap().clone();

    app.refresher.refresh_network(&network).await.unwrap();

    // Stale immediately, but the node has nothing new
    let outcome = app.refresher.refresh_network(&network).await.unwrap();
    assert_eq!(outcome, RefreshOutcome::Skipped(SkipReason::NothingNew));

    // One new block is below the threshold, staleness forces it anyway
    node.update("riemann", |s| s.block_count = 51);
    let outcome = app.refresher.refresh_network(&network).await.unwrap();
    assert_eq!(
        outcome,
        RefreshOutcome::Refreshed {
            forced: true,
            block_count: 51
        }
    );
    assert_eq!(app.cache.get("riemann").previous_block_count, 50);
}

#[tokio::test]
async fn panicking_network_does_not_stop_the_pass() {
    let config = format!(
        "{CONFIG}\n[[networks]]\nname = \"broken\"\nwallet = \"WALLET_B\"\nblocks_sign_cert = \"broken.master\"\n"
    );
    let dir = tempfile::tempdir().unwrap();
    let node = Arc::new(FakeNode::default());
    node.set("riemann", riemann());
    node.set("raiden", raiden());
    node.set(
        "broken",
        NetState {
            panic_on_blocks: true,
            ..raiden()
        },
    );
    let app = inspector(node, &dir.path().join("cache.sqlite"), &config).await;

    let outcomes: HashMap<_, _> = app.refresher.run_pass().await.into_iter().collect();
    assert_eq!(outcomes["broken"], None);
    assert!(matches!(outcomes["raiden"], Some(RefreshOutcome::Refreshed { .. })));
    assert!(matches!(outcomes["riemann"], Some(RefreshOutcome::Refreshed { .. })));

    assert!(app.cache.get("broken").is_empty());
    assert_eq!(app.cache.get("raiden").block_count, 120);
}

#[tokio::test]
async fn snapshots_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cache.sqlite");
    let node = Arc::new(FakeNode::default());
    node.set("riemann", riemann());
    node.set("raiden", raiden());

    let (riemann_entry, raiden_entry) = {
        let app = inspector(node.clone(), &db, CONFIG).await;
        app.refresher.run_pass().await;
        (app.cache.get("riemann"), app.cache.get("raiden"))
    };
    assert!(riemann_entry.sovereign_wallet.is_some());
    assert!(raiden_entry.sovereign_wallet.is_none());
    assert!(raiden_entry.sovereign_wallet_balance.is_none());

    let restarted = inspector(node, &db, CONFIG).await;
    assert_eq!(restarted.cache.get("riemann"), riemann_entry);
    assert_eq!(restarted.cache.get("raiden"), raiden_entry);
}
