//! End-to-end coordination: control surface, coordinator actor and agents
//! on in-memory pages, all talking through one router.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::{Value, json};
use wave_reader_agent::{AgentConfig, AgentHandle, AgentRuntime};
use wave_reader_coordinator::{
    CoordinatorConfig, CoordinatorError, CoordinatorHandle, MemoryStore, MemoryTabs,
};
use wave_reader_core::{
    Endpoint, ErrorCode, MemoryDocument, MemoryElement, Message, Notice, Rect, Reply,
    SettingsPatch, TabId,
};
use tokio::sync::oneshot;
use wave_reader_router::{Port, Router};

struct Harness {
    router: Router,
    coordinator: CoordinatorHandle,
    store: Arc<MemoryStore>,
    control: Port,
}

impl Harness {
    async fn new(active: Option<TabId>) -> Self {
        Self::with_store(active, Arc::new(MemoryStore::new())).await
    }

    async fn with_store(active: Option<TabId>, store: Arc<MemoryStore>) -> Self {
        let router = Router::default();
        let coordinator = CoordinatorHandle::spawn(
            &router,
            Arc::new(MemoryTabs::new(active)),
            Arc::clone(&store),
            CoordinatorConfig::default(),
        )
        .await;
        let control = router.port(Endpoint::ControlSurface);
        Self {
            router,
            coordinator,
            store,
            control,
        }
    }

    fn agent(&self, tab: TabId, doc: &Arc<MemoryDocument>) -> AgentHandle {
        AgentRuntime::spawn(&self.router, tab, Arc::clone(doc), AgentConfig::default())
    }

    async fn send(&self, message: Message) -> Reply {
        self.control.send(Endpoint::Coordinator, message).await
    }

    async fn send_to_tab(&self, tab: TabId, message: Message) -> Reply {
        let envelope = self.control.envelope(Endpoint::Coordinator, message).with_tab(tab);
        self.control.request(envelope).await
    }

    async fn agent_status(&self, tab: TabId) -> Reply {
        self.control.send(Endpoint::Agent(tab), Message::GetStatus).await
    }

    async fn state(&self) -> Value {
        self.coordinator.status().await.expect("coordinator running")["state"].clone()
    }
}

fn page(paragraphs: usize) -> Arc<MemoryDocument> {
    let doc = Arc::new(MemoryDocument::default());
    for i in 0..paragraphs {
        #[allow(clippy::cast_precision_loss)]
        let y = 40.0 * i as f64;
        doc.add(MemoryElement::new("p", Rect::new(10.0, y, 300.0, 30.0)));
    }
    doc
}

/// Stand-in agent that records every message and acknowledges it. With
/// `release`, the first reply waits until it fires.
fn recording_agent(
    router: &Router,
    tab: TabId,
    release: Option<oneshot::Receiver<()>>,
) -> Arc<Mutex<Vec<Message>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let mut inbox = router.register(Endpoint::Agent(tab));
    tokio::spawn(async move {
        let mut release = release;
        while let Some(delivery) = inbox.recv().await {
            log.lock().unwrap().push(delivery.message().clone());
            if let Some(release) = release.take() {
                let _ = release.await;
            }
            delivery.respond(Reply::ok());
        }
    });
    seen
}

fn kinds(seen: &Mutex<Vec<Message>>) -> Vec<&'static str> {
    seen.lock().unwrap().iter().map(Message::kind).collect()
}

fn start(selector: &str) -> Message {
    Message::StartWaveReader {
        selector: Some(selector.to_string()),
        options: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_and_stop_through_agent() {
    let harness = Harness::new(Some(1)).await;
    let doc = page(3);
    let _agent = harness.agent(1, &doc);

    let reply = harness.send(start("p")).await;
    assert!(reply.success, "{reply:?}");
    assert_eq!(reply.get("elementCount"), Some(&json!(3)));
    assert!(reply.get("sessionId").is_some());
    assert_eq!(harness.state().await, json!("waving"));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(doc.rule_count() > 0);

    let stop = harness.send(Message::StopWaveReader).await;
    assert!(stop.success);
    assert!(!stop.is_noop());
    assert_eq!(doc.rule_count(), 0);
    assert_eq!(harness.state().await, json!("ready"));

    let again = harness.send(Message::StopWaveReader).await;
    assert!(again.is_noop());
}

#[tokio::test(start_paused = true)]
async fn test_wire_request_starts_session() {
    let harness = Harness::new(Some(1)).await;
    let _agent = harness.agent(1, &page(2));

    let wire = json!({
        "message": { "type": "START_WAVE_READER", "selector": "p" },
        "origin": { "context": "control_surface" },
        "destination": { "context": "coordinator" },
        "correlationId": "7b0c8f2e-3c1d-4c55-9a8e-0a8f1f6f2b11",
    });
    let reply = harness.control.request_wire(&wire.to_string()).await;
    assert!(reply.success, "{reply:?}");
    assert_eq!(reply.get("elementCount"), Some(&json!(2)));

    let unknown = harness
        .control
        .request_wire(r#"{"message":{"type":"SELF_DESTRUCT"},"origin":{"context":"control_surface"},"destination":{"context":"coordinator"}}"#)
        .await;
    assert_eq!(unknown.code, Some(ErrorCode::UnknownMessage));
}

#[tokio::test(start_paused = true)]
async fn test_missing_agent_is_reported() {
    let harness = Harness::new(Some(1)).await;

    let reply = harness.send(start("p")).await;
    assert_eq!(reply.code, Some(ErrorCode::Unreachable));

    let status = harness.coordinator.status().await.expect("coordinator running");
    assert_eq!(status["state"], json!("ready"));
    assert_eq!(status["sessions"], json!([]));
    assert_eq!(harness.coordinator.error_log().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_matching_elements() {
    let harness = Harness::new(Some(1)).await;
    let _agent = harness.agent(1, &page(2));

    let reply = harness.send(start(".nonexistent")).await;
    assert_eq!(reply.code, Some(ErrorCode::ElementsNotFound));
    assert_eq!(
        reply.error.as_deref(),
        Some("No elements found matching selector: .nonexistent")
    );
    assert_eq!(harness.state().await, json!("ready"));
}

#[tokio::test(start_paused = true)]
async fn test_no_active_tab() {
    let harness = Harness::new(None).await;
    let reply = harness.send(start("p")).await;
    assert_eq!(reply.code, Some(ErrorCode::NoActiveTab));
    assert_eq!(harness.state().await, json!("ready"));
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume_reach_agent() {
    let harness = Harness::new(Some(1)).await;
    let _agent = harness.agent(1, &page(1));
    assert!(harness.send(start("p")).await.success);

    assert!(harness.send(Message::PauseWaveReader).await.success);
    assert_eq!(harness.state().await, json!("paused"));
    assert_eq!(harness.agent_status(1).await.get("isPaused"), Some(&json!(true)));

    assert!(harness.send(Message::ResumeWaveReader).await.success);
    assert_eq!(harness.state().await, json!("waving"));
    assert_eq!(harness.agent_status(1).await.get("isPaused"), Some(&json!(false)));
}

#[tokio::test(start_paused = true)]
async fn test_stop_racing_start_ends_stopped() {
    let harness = Harness::new(Some(1)).await;
    let doc = page(2);
    let _agent = harness.agent(1, &doc);

    let (started, stopped) = tokio::join!(
        harness.send(start("p")),
        harness.send(Message::StopWaveReader),
    );
    assert_eq!(started.code, Some(ErrorCode::Superseded));
    assert!(stopped.success);

    let status = harness.coordinator.status().await.expect("coordinator running");
    assert_eq!(status["state"], json!("ready"));
    assert_eq!(status["sessions"], json!([]));
    assert_eq!(harness.agent_status(1).await.get("isActive"), Some(&json!(false)));
    assert_eq!(doc.rule_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_after_start_with_settings_in_between() {
    let harness = Harness::new(Some(1)).await;
    let doc = page(2);
    let _agent = harness.agent(1, &doc);

    let color = |c: &str| Message::UpdateSettings {
        settings: SettingsPatch {
            wave_color: Some(c.to_string()),
            ..SettingsPatch::default()
        },
    };
    let (_, _, _, stopped) = tokio::join!(
        harness.send(start("p")),
        harness.send(color("red")),
        harness.send(color("blue")),
        harness.send(Message::StopWaveReader),
    );
    assert!(stopped.success);

    assert_eq!(harness.agent_status(1).await.get("isActive"), Some(&json!(false)));
    let status = harness.coordinator.status().await.expect("coordinator running");
    assert_eq!(status["state"], json!("ready"));
    assert_eq!(status["settings"]["waveColor"], json!("blue"));
    assert_eq!(doc.rule_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_settings_update_waits_behind_slow_start() {
    let harness = Harness::new(Some(1)).await;
    let (release_tx, release_rx) = oneshot::channel();
    let seen = recording_agent(&harness.router, 1, Some(release_rx));

    let (first, second, updated, ()) = tokio::join!(
        harness.send(start("p")),
        harness.send(start("li")),
        harness.send(Message::UpdateSettings {
            settings: SettingsPatch {
                wave_color: Some("red".to_string()),
                ..SettingsPatch::default()
            },
        }),
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            release_tx.send(()).unwrap();
        },
    );
    assert_eq!(first.code, Some(ErrorCode::Superseded));
    assert!(second.success, "{second:?}");
    assert_eq!(updated.get("delivered"), Some(&json!(1)));

    assert_eq!(
        kinds(&seen),
        vec!["START_WAVE_READER", "START_WAVE_READER", "SETTINGS_UPDATED"]
    );
    let last = seen.lock().unwrap().last().cloned();
    let Some(Message::SettingsUpdated { settings }) = last else {
        panic!("expected settings last, got {last:?}");
    };
    assert_eq!(settings.wave_color, "red");

    let status = harness.coordinator.status().await.expect("coordinator running");
    assert_eq!(status["settings"]["waveColor"], json!("red"));
    assert_eq!(status["sessions"][0]["selector"], json!("li"));
    assert_eq!(status["sessions"][0]["optionsSnapshot"]["waveColor"], json!("red"));
}

#[tokio::test(start_paused = true)]
async fn test_agent_crash_is_not_an_acknowledgment() {
    let harness = Harness::new(Some(1)).await;
    let mut inbox = harness.router.register(Endpoint::Agent(1));
    tokio::spawn(async move {
        while let Some(delivery) = inbox.recv().await {
            if matches!(delivery.message(), Message::StartWaveReader { .. }) {
                panic!("agent crashed while starting");
            }
            delivery.respond(Reply::ok());
        }
    });

    let reply = harness.send(start("p")).await;
    assert!(!reply.success);
    assert_eq!(reply.code, Some(ErrorCode::Unreachable));
    assert!(reply.get("sessionId").is_none());

    let status = harness.coordinator.status().await.expect("coordinator running");
    assert_eq!(status["state"], json!("ready"));
    assert_eq!(status["sessions"], json!([]));
    assert_eq!(harness.coordinator.error_log().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_navigation_only_notifies_control_surface() {
    let harness = Harness::new(Some(1)).await;
    let seen = recording_agent(&harness.router, 1, None);
    let mut inbox = harness.router.register(Endpoint::ControlSurface);
    assert!(harness.send(start("p")).await.success);

    harness.coordinator.tab_updated(1, false).await.expect("coordinator running");
    harness.coordinator.tab_updated(1, true).await.expect("coordinator running");

    let notices = tokio::time::timeout(Duration::from_secs(1), async {
        let mut notices = Vec::new();
        while let Some(delivery) = inbox.recv().await {
            let (envelope, responder) = delivery.into_parts();
            responder.respond(Reply::ok());
            if let Message::Notify { notice } = envelope.message {
                let navigated = matches!(notice, Notice::TabNavigated { .. });
                notices.push(notice);
                if navigated {
                    break;
                }
            }
        }
        notices
    })
    .await
    .expect("notice delivered");
    assert_eq!(notices, vec![Notice::TabNavigated { tab_id: 1 }]);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(kinds(&seen), vec!["START_WAVE_READER"]);
    let status = harness.coordinator.status().await.expect("coordinator running");
    assert_eq!(status["state"], json!("waving"));
    assert_eq!(status["sessions"][0]["animationState"], json!("waving"));
}

#[tokio::test(start_paused = true)]
async fn test_settings_reach_every_agent() {
    let harness = Harness::new(Some(1)).await;
    let _first = harness.agent(1, &page(1));
    let _second = harness.agent(2, &page(1));
    assert!(harness.send_to_tab(1, start("p")).await.success);
    assert!(harness.send_to_tab(2, start("p")).await.success);

    let reply = harness
        .send(Message::UpdateSettings {
            settings: SettingsPatch {
                wave_speed_ms: Some(900),
                ..SettingsPatch::default()
            },
        })
        .await;
    assert!(reply.success);
    assert_eq!(reply.get("delivered"), Some(&json!(2)));
    assert_eq!(reply.get("failed"), Some(&json!(0)));

    for tab in [1, 2] {
        let status = harness.agent_status(tab).await;
        assert_eq!(status.get("settings").map(|s| &s["waveSpeedMs"]), Some(&json!(900)));
    }
    assert_eq!(harness.store.value("settings").expect("persisted")["waveSpeedMs"], json!(900));
}

#[tokio::test(start_paused = true)]
async fn test_closed_tab_gets_no_commands() {
    let harness = Harness::new(Some(1)).await;
    let agent = harness.agent(1, &page(1));
    assert!(harness.send(start("p")).await.success);

    agent.shutdown().await;
    harness.coordinator.tab_removed(1).await.expect("coordinator running");

    // A dispatch would have come back unreachable.
    let reply = harness.send(Message::StopWaveReader).await;
    assert!(reply.is_noop());
    assert_eq!(harness.state().await, json!("ready"));
    assert!(harness.coordinator.error_log().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failure_refuses_operations_until_reset() {
    let harness = Harness::new(Some(1)).await;
    let _agent = harness.agent(1, &page(1));

    harness
        .coordinator
        .coordination_failed("host lost")
        .await
        .expect("coordinator running");
    assert_eq!(harness.state().await, json!("error"));

    let refused = harness.send(start("p")).await;
    assert_eq!(refused.code, Some(ErrorCode::InvalidState));

    assert!(harness.send(Message::ResetCoordinator).await.success);
    assert_eq!(harness.state().await, json!("idle"));

    assert!(harness.send(start("p")).await.success);
    assert_eq!(harness.state().await, json!("waving"));
}

#[tokio::test(start_paused = true)]
async fn test_selectors_survive_restart() {
    let store = Arc::new(MemoryStore::new());
    let first = Harness::with_store(Some(1), Arc::clone(&store)).await;
    first
        .send(Message::SelectorAdded { selector: "h1".into() })
        .await;
    first
        .send(Message::SelectionConfirmed { selector: "article p".into() })
        .await;
    first.coordinator.shutdown().await;

    let second = Harness::with_store(Some(1), store).await;
    let status = second.coordinator.status().await.expect("coordinator running");
    assert_eq!(status["selectors"], json!(["h1", "article p"]));
    assert_eq!(status["currentSelector"], json!("article p"));
}

#[tokio::test(start_paused = true)]
async fn test_failures_notify_control_surface() {
    let harness = Harness::new(Some(1)).await;
    let mut inbox = harness.router.register(Endpoint::ControlSurface);

    let reply = harness.send(start("p")).await;
    assert!(!reply.success);

    let notice = tokio::time::timeout(Duration::from_secs(1), async {
        while let Some(delivery) = inbox.recv().await {
            let (envelope, responder) = delivery.into_parts();
            responder.respond(Reply::ok());
            if let Message::Notify {
                notice: notice @ Notice::OperationFailed { .. },
            } = envelope.message
            {
                return Some(notice);
            }
        }
        None
    })
    .await
    .expect("notice delivered");

    let Some(Notice::OperationFailed { operation, tab_id, .. }) = notice else {
        panic!("expected an operation failure, got {notice:?}");
    };
    assert_eq!(operation, "START_WAVE_READER");
    assert_eq!(tab_id, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_unregisters() {
    let harness = Harness::new(Some(1)).await;
    assert!(harness.router.is_registered(Endpoint::Coordinator));

    harness.coordinator.shutdown().await;
    assert!(!harness.router.is_registered(Endpoint::Coordinator));
    assert!(matches!(
        harness.coordinator.status().await,
        Err(CoordinatorError::Closed)
    ));

    let reply = harness.send(Message::WaveReaderStatus).await;
    assert_eq!(reply.code, Some(ErrorCode::Unreachable));
}
