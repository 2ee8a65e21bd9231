//! Push dispatch tests: the webhook sink wired to a real pull driver.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use berth::app::PullSink;
use berth_core::{Branch, ConfigCatalog, PortBinding, RegistryCredentials};
use berth_reconciler::{
    ContainerState, EngineCall, ImageRecord, InMemoryEngine, LogScript, PullDriver, PullEvent,
    Reconciler, ReconcilerConfig,
};
use berth_web::PushSink;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

const READY: &str = "Server is listening on ";
const SERVER: &str = "alice/lgd:server";

async fn sink() -> (Arc<InMemoryEngine>, PullSink) {
    let engine = Arc::new(InMemoryEngine::new());
    engine
        .script_logs("server", LogScript::ready_after(Duration::from_secs(1), READY))
        .await;

    let branch = Branch::builder("server", SERVER)
        .readiness_marker(READY)
        .container(
            "server",
            BTreeMap::from([("8082/tcp".to_string(), vec![PortBinding::new("8082/tcp")])]),
        )
        .build()
        .unwrap();
    let catalog = Arc::new(ConfigCatalog::new("alice", "lgd", vec![branch]).unwrap());
    let reconciler = Arc::new(Mutex::new(Reconciler::new(
        engine.clone(),
        catalog.clone(),
        ReconcilerConfig::default(),
    )));
    let driver = Arc::new(PullDriver::new(
        engine.clone(),
        catalog,
        RegistryCredentials::default(),
        reconciler,
    ));
    (engine, PullSink::new(driver))
}

/// Given a pushed tag with a new image staged
/// When the sink dispatches it
/// Then the branch's container ends up running
#[tokio::test(start_paused = true)]
async fn test_dispatch_pulls_and_converges() {
    let (engine, sink) = sink().await;
    engine
        .stage_pull(
            SERVER,
            vec![Ok(PullEvent::status(format!(
                "Status: Downloaded newer image for {SERVER}"
            )))],
            Some(ImageRecord {
                id: "sha256:s1".to_string(),
                repo_tags: vec![SERVER.to_string()],
                created_at: DateTime::<Utc>::UNIX_EPOCH,
            }),
        )
        .await;

    sink.dispatch("server").await.unwrap();

    let containers = engine.containers().await;
    assert_eq!(containers.len(), 1);
    assert_eq!(containers.first().unwrap().name, "server");
    assert_eq!(containers.first().unwrap().state, ContainerState::Running);
    assert!(engine.calls().await.contains(&EngineCall::Pull(SERVER.to_string())));
}

/// Given a tag no branch claims
/// When the sink dispatches it
/// Then the task finishes without touching the engine
#[tokio::test]
async fn test_dispatch_of_unknown_tag_has_no_side_effects() {
    let (engine, sink) = sink().await;

    sink.dispatch("nightly").await.unwrap();

    assert!(engine.calls().await.is_empty());
}

/// Given a push through the webhook trait
/// When the pull runs in the background
/// Then it still reaches the engine
#[tokio::test]
async fn test_push_runs_in_background() {
    let (engine, sink) = sink().await;

    sink.push("server");

    tokio::time::timeout(Duration::from_secs(5), async {
        while !engine
            .calls()
            .await
            .contains(&EngineCall::Pull(SERVER.to_string()))
        {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}
