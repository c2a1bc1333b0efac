mod common;

use serde_json::json;
use std::time::Duration;

use common::{eventually, tracer_registry, TRACER};
use fleet::agent::{AgentAction, AgentStatus, AgentType};
use fleet::engine::EngineState;
use fleet::error::FleetError;
use fleet::registry::AgentRegistry;

#[tokio::test]
async fn duplicate_id_is_rejected_and_first_agent_kept() {
    let registry = AgentRegistry::default();
    registry
        .register_agent("scanner", "alpha", json!({"watchlist": ["ETH"]}))
        .await
        .unwrap();

    let err = registry
        .register_agent("copy_trading", "alpha", json!({"tracked_wallets": []}))
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::AgentAlreadyExists(ref id) if id == "alpha"));
    assert!(err.is_rejected_request());

    let info = registry.get_agent("alpha").unwrap().get_status();
    assert_eq!(info.agent_type, AgentType::Scanner);
    assert_eq!(info.status, AgentStatus::Initialized);
}

#[tokio::test]
async fn unknown_type_is_rejected() {
    let registry = AgentRegistry::default();
    let err = registry
        .register_agent("market_maker", "mm", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::UnknownAgentType(_)));
    assert!(registry.get_all_agents().is_empty());
}

#[tokio::test]
async fn start_all_schedules_exactly_one_cycle_each() {
    let (registry, _tracer) = tracer_registry(4, 30_000);
    for i in 0..5 {
        registry
            .register_agent(TRACER, &format!("p{i}"), json!({"interval_seconds": 60}))
            .await
            .unwrap();
    }

    let results = registry.start_all_agents().await;
    assert_eq!(results.len(), 5);
    assert!(results.values().all(|r| r.success && r.status == "running"));

    // engine not started: cycles wait in the queue
    let stats = registry.engine().stats();
    assert_eq!(stats.state, EngineState::Idle);
    assert_eq!(stats.queued, 5);
    assert_eq!(stats.dispatched, 0);

    // starting again changes nothing
    let again = registry.start_all_agents().await;
    assert!(again.values().all(|r| !r.success));
    assert_eq!(registry.engine().stats().queued, 5);

    let stopped = registry.stop_all_agents().await;
    assert!(stopped.values().all(|r| r.status == "stopped"));
    assert_eq!(registry.engine().stats().queued, 0);
}

#[tokio::test]
async fn stop_mid_cycle_waits_and_releases_lease() {
    let (registry, tracer) = tracer_registry(2, 30_000);
    registry
        .register_agent(TRACER, "slow", json!({"delay_ms": 200, "interval_seconds": 60}))
        .await
        .unwrap();
    registry.start().unwrap();
    assert!(registry.start_agent("slow").await.success);

    assert!(eventually(Duration::from_secs(2), || tracer.in_cycle() == 1).await);
    assert_eq!(registry.pool().in_use(), 1);

    let response = registry.stop_agent("slow").await;
    assert!(response.success);
    assert_eq!(response.status, "stopped");

    // the in-flight cycle completed before stop returned
    assert_eq!(tracer.in_cycle(), 0);
    assert_eq!(tracer.cycles(), 1);
    assert!(eventually(Duration::from_secs(1), || registry.pool().in_use() == 0).await);
    assert!(!registry.engine().is_scheduled("slow"));

    let agent = registry.get_agent("slow").unwrap();
    assert_eq!(agent.status(), AgentStatus::Stopped);
    assert_eq!(agent.metrics().counter("cycles_completed"), 1);

    registry.shutdown().await.unwrap();
    assert!(registry.pool().is_closed());
}

#[tokio::test]
async fn stopped_agent_can_restart() {
    let (registry, tracer) = tracer_registry(1, 30_000);
    registry
        .register_agent(TRACER, "p", json!({"interval_seconds": 0.02}))
        .await
        .unwrap();
    registry.start().unwrap();

    assert!(registry.start_agent("p").await.success);
    assert!(eventually(Duration::from_secs(2), || tracer.cycles() >= 1).await);
    registry.stop_agent("p").await;

    let restarted = registry.start_agent("p").await;
    assert_eq!(restarted.status, "running");
    let before = tracer.cycles();
    assert!(eventually(Duration::from_secs(2), || tracer.cycles() > before).await);

    registry.shutdown().await.unwrap();
}

#[tokio::test]
async fn copy_trading_wallet_actions() {
    let registry = AgentRegistry::default();
    registry
        .register_agent("copy_trading", "copier", json!({"tracked_wallets": []}))
        .await
        .unwrap();
    assert!(registry.start_agent("copier").await.success);

    let added = registry
        .execute_agent_action(
            "copier",
            &AgentAction::new("add_wallet").with_param("wallet", "w1"),
        )
        .await;
    assert!(added.success, "{added:?}");

    let info = registry.get_agent("copier").unwrap().get_status();
    assert_eq!(info.details["tracked_wallets"], json!(["w1"]));
    assert_eq!(info.config.get("tracked_wallets"), Some(&json!(["w1"])));

    let bogus = registry
        .execute_agent_action("copier", &AgentAction::new("bogus"))
        .await;
    assert!(!bogus.success);
    assert!(bogus.message.contains("not supported"));

    let missing = registry
        .execute_agent_action("ghost", &AgentAction::new("add_wallet"))
        .await;
    assert!(!missing.success);

    registry.stop_agent("copier").await;
}

#[tokio::test]
async fn invalid_config_update_keeps_previous_config() {
    let registry = AgentRegistry::default();
    registry
        .register_agent("copy_trading", "copier", json!({"tracked_wallets": [], "copy_ratio": 0.5}))
        .await
        .unwrap();

    let rejected = registry
        .update_agent_config("copier", json!({"copy_ratio": 3}))
        .await;
    assert!(!rejected.success);
    let config = registry.get_agent("copier").unwrap().config();
    assert_eq!(config.get("copy_ratio"), Some(&json!(0.5)));

    let accepted = registry
        .update_agent_config("copier", json!({"copy_ratio": 0.25}))
        .await;
    assert!(accepted.success);
    assert_eq!(accepted.status, "initialized");
}
