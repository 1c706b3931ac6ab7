//! Action dispatch over cached and live values.

mod common;

use chrono::Utc;
use common::{CONFIG, FakeNode, NODE_ADDRESS, NetState, block_at, inspector, reward_at};
use mn_inspector::actions::{ActionRegistry, LIVE_ACTIONS, NetworkReply, SystemReply};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn values(reply: &NetworkReply) -> &std::collections::BTreeMap<String, Value> {
    match reply {
        NetworkReply::Values(values) => values,
        other => panic!("expected values, got {other:?}"),
    }
}

fn scripted() -> Arc<FakeNode> {
    let now = Utc::now();
    let node = Arc::new(FakeNode::default());
    node.set(
        "riemann",
        NetState {
            synced: true,
            block_count: 64,
            blocks_today: 1,
            signed: vec![block_at(now, "0xs1")],
            first_signed: vec![block_at(now, "0xs1")],
            history: HashMap::from([("WALLET_R".to_string(), vec![reward_at(now, "0xr1", "3.25")])]),
            ..NetState::default()
        },
    );
    node
}

#[tokio::test]
async fn all_returns_cached_and_live_fields_without_markers() {
    let dir = tempfile::tempdir().unwrap();
    let app = inspector(scripted(), &dir.path().join("cache.sqlite"), CONFIG).await;
    app.refresher.run_pass().await;

    let replies = app.actions.network_actions(&names(&["riemann"]), &names(&["all"])).await;
    let fields = values(&replies["riemann"]);

    let cached = app.cache.fields("riemann");
    for key in cached.keys() {
        assert!(fields.contains_key(key), "{key} missing from all");
    }
    for live in LIVE_ACTIONS {
        assert!(fields.contains_key(*live), "{live} missing from all");
    }
    assert!(
        fields
            .values()
            .all(|v| !v.as_str().is_some_and(|s| s.starts_with("unsupported")))
    );

    assert_eq!(fields["block_count"], json!(64));
    assert_eq!(fields["signed_blocks_count"], json!(1));
    assert_eq!(fields["reward_wallet_total_rewards"], json!(3.25));
    assert_eq!(fields["reward_wallet_address"], json!("WALLET_R"));
    assert_eq!(fields["sovereign_reward_wallet_address"], Value::Null);
    assert_eq!(fields["autocollect_status"], json!({"active": true, "rewards": 3.5}));
    assert_eq!(fields["network_status"]["synced"], json!(true));
    assert_eq!(fields["network_status"]["node_address"], json!(NODE_ADDRESS));
    assert!(!fields.contains_key("sovereign_wallet_total_rewards"));
}

#[tokio::test]
async fn unknown_action_gets_exactly_one_marker() {
    let dir = tempfile::tempdir().unwrap();
    let app = inspector(scripted(), &dir.path().join("cache.sqlite"), CONFIG).await;
    app.refresher.run_pass().await;
    let before = app.cache.get("riemann");

    let replies = app
        .actions
        .network_actions(&names(&["riemann"]), &names(&["made_up_field"]))
        .await;
    let fields = values(&replies["riemann"]);

    assert_eq!(fields.len(), 1);
    assert_eq!(fields["made_up_field"], json!("unsupported network action: made_up_field"));
    assert_eq!(app.cache.get("riemann"), before);
}

#[tokio::test]
async fn declared_but_uncomputed_field_is_null() {
    let dir = tempfile::tempdir().unwrap();
    let app = inspector(scripted(), &dir.path().join("cache.sqlite"), CONFIG).await;
    app.refresher.run_pass().await;

    let replies = app
        .actions
        .network_actions(&names(&["riemann"]), &names(&["sovereign_wallet_total_rewards", "block_count"]))
        .await;
    let fields = values(&replies["riemann"]);
    assert_eq!(fields["sovereign_wallet_total_rewards"], Value::Null);
    assert_eq!(fields["block_count"], json!(64));
}

#[tokio::test]
async fn unknown_network_is_marked() {
    let dir = tempfile::tempdir().unwrap();
    let app = inspector(scripted(), &dir.path().join("cache.sqlite"), CONFIG).await;

    let replies = app
        .actions
        .network_actions(&names(&["riemann", "Backbone"]), &names(&["block_count"]))
        .await;
    assert_eq!(replies["Backbone"], NetworkReply::Unsupported("unsupported network".into()));
    assert!(matches!(replies["riemann"], NetworkReply::Values(_)));
}

#[tokio::test]
async fn help_and_all_work_on_an_empty_cache() {
    let dir = tempfile::tempdir().unwrap();
    let app = inspector(scripted(), &dir.path().join("cache.sqlite"), CONFIG).await;

    let replies = app.actions.network_actions(&names(&["raiden"]), &names(&["help"])).await;
    assert_eq!(replies["raiden"], NetworkReply::Help(ActionRegistry::action_names()));

    // Nothing cached yet: only the live actions remain
    let replies = app.actions.network_actions(&names(&["riemann"]), &names(&["all"])).await;
    let fields = values(&replies["riemann"]);
    let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
    assert_eq!(keys, LIVE_ACTIONS);
}

#[tokio::test]
async fn live_action_failure_is_null() {
    let dir = tempfile::tempdir().unwrap();
    // raiden is configured but the node doesn't know it
    let app = inspector(scripted(), &dir.path().join("cache.sqlite"), CONFIG).await;

    let replies = app
        .actions
        .network_actions(&names(&["raiden"]), &names(&["network_status", "autocollect_status"]))
        .await;
    let fields = values(&replies["raiden"]);
    assert_eq!(fields["network_status"], Value::Null);
    assert_eq!(fields["autocollect_status"], Value::Null);
}

#[tokio::test]
async fn system_actions() {
    let dir = tempfile::tempdir().unwrap();
    let app = inspector(scripted(), &dir.path().join("cache.sqlite"), CONFIG).await;

    let SystemReply::Values(all) = app.actions.system_actions(&names(&["all"])).await else {
        panic!("expected values");
    };
    assert_eq!(all["active_networks"], json!(["raiden", "riemann"]));
    assert_eq!(all["node_address"], json!(NODE_ADDRESS));
    assert_eq!(all["current_node_version"], json!("cellframe-node version 5.3-402"));

    let SystemReply::Values(unknown) = app.actions.system_actions(&names(&["uptime"])).await else {
        panic!("expected values");
    };
    assert_eq!(unknown["uptime"], json!("unknown system action: uptime"));

    let help = app.actions.system_actions(&names(&["help"])).await;
    assert_eq!(
        help,
        SystemReply::Help(names(&["active_networks", "current_node_version", "node_address"]))
    );
}
