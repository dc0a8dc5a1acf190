//! Scripted wave reader session against in-memory pages.
//!
//! Run with: cargo run -p wave-reader-sim [config.json]
//!
//! The optional JSON file may set any of `router`, `agent` and
//! `coordinator`; missing fields keep their defaults. Set `RUST_LOG` to
//! change the log filter.

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use futures::StreamExt;
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wave_reader_agent::{AgentConfig, AgentRuntime};
use wave_reader_coordinator::{CoordinatorConfig, CoordinatorHandle, MemoryStore, MemoryTabs};
use wave_reader_core::{
    Endpoint, MemoryDocument, MemoryElement, Message, Point, Rect, Reply, SettingsPatch,
};
use wave_reader_router::{Port, Router, RouterConfig};

/// Configuration for every simulated context.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SimConfig {
    router: RouterConfig,
    agent: AgentConfig,
    coordinator: CoordinatorConfig,
}

impl SimConfig {
    fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

const ARTICLE_TAB: u32 = 1;
const LIST_TAB: u32 = 2;

fn article() -> Arc<MemoryDocument> {
    let doc = Arc::new(MemoryDocument::default());
    doc.add(MemoryElement::new("h1", Rect::new(40.0, 20.0, 600.0, 48.0)));
    for i in 0..4u32 {
        let y = 90.0 + 70.0 * f64::from(i);
        doc.add(MemoryElement::new("p", Rect::new(40.0, y, 600.0, 56.0)).with_class("body"));
    }
    doc
}

fn list() -> Arc<MemoryDocument> {
    let doc = Arc::new(MemoryDocument::default());
    for i in 0..3u32 {
        let y = 30.0 + 40.0 * f64::from(i);
        doc.add(MemoryElement::new("li", Rect::new(60.0, y, 400.0, 32.0)));
    }
    doc
}

/// Log every notice the coordinator pushes, as a control surface would.
fn spawn_control_surface(router: &Router) {
    let mut inbox = router.register(Endpoint::ControlSurface);
    tokio::spawn(async move {
        while let Some(delivery) = inbox.recv().await {
            let (envelope, responder) = delivery.into_parts();
            if let Message::Notify { notice } = envelope.message {
                tracing::info!(?notice, "control surface notified");
            }
            responder.respond(Reply::ok());
        }
    });
}

async fn request(control: &Port, message: Message) -> Reply {
    let kind = message.kind();
    let reply = control.send(Endpoint::Coordinator, message).await;
    if reply.success {
        tracing::info!(kind, data = ?reply.data, "request succeeded");
    } else {
        tracing::warn!(kind, code = ?reply.code, error = ?reply.error, "request failed");
    }
    reply
}

async fn request_tab(control: &Port, tab: u32, message: Message) -> Reply {
    let kind = message.kind();
    let envelope = control.envelope(Endpoint::Coordinator, message).with_tab(tab);
    let reply = control.request(envelope).await;
    tracing::info!(kind, tab, success = reply.success, error = ?reply.error, "tab request answered");
    reply
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let path = std::env::args().nth(1);
    let config = SimConfig::load(path.as_deref().map(Path::new))?;
    tracing::debug!(?config, "configuration loaded");

    let router = Router::new(config.router);
    let tabs = Arc::new(MemoryTabs::new(Some(ARTICLE_TAB)));
    let store = Arc::new(MemoryStore::new());
    let coordinator =
        CoordinatorHandle::spawn(&router, Arc::clone(&tabs), Arc::clone(&store), config.coordinator)
            .await;
    spawn_control_surface(&router);

    let mut errors = coordinator.error_log().history_plus_stream();
    tokio::spawn(async move {
        while let Some(entry) = errors.next().await {
            tracing::warn!(origin = %entry.origin_context, payload = %entry.payload, "error logged");
        }
    });

    let article_doc = article();
    let list_doc = list();
    let article_agent =
        AgentRuntime::spawn(&router, ARTICLE_TAB, Arc::clone(&article_doc), config.agent.clone());
    let list_agent = AgentRuntime::spawn(&router, LIST_TAB, Arc::clone(&list_doc), config.agent);
    let control = router.port(Endpoint::ControlSurface);

    request(&control, Message::SelectorAdded { selector: "p.body".into() }).await;
    let started = request(
        &control,
        Message::StartWaveReader {
            selector: Some("p.body".into()),
            options: Some(SettingsPatch {
                wave_speed_ms: Some(500),
                ..SettingsPatch::default()
            }),
        },
    )
    .await;
    if !started.success {
        bail!("could not start on the article tab: {:?}", started.error);
    }

    let pointer = article_agent.pointer();
    for step in 0..6u32 {
        pointer.moved(Point::new(120.0 * f64::from(step), 60.0 * f64::from(step)));
        tokio::time::sleep(Duration::from_millis(600)).await;
    }

    // A burst of inserted paragraphs restarts the engine once.
    for i in 0..5u32 {
        let y = 400.0 + 70.0 * f64::from(i);
        article_doc.insert(MemoryElement::new("p", Rect::new(40.0, y, 600.0, 56.0)).with_class("body"));
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    request(
        &control,
        Message::UpdateSettings {
            settings: SettingsPatch {
                wave_color: Some("#e94f37".into()),
                ..SettingsPatch::default()
            },
        },
    )
    .await;
    request(&control, Message::PauseWaveReader).await;
    request(&control, Message::ResumeWaveReader).await;

    request_tab(
        &control,
        LIST_TAB,
        Message::StartWaveReader {
            selector: Some("li".into()),
            options: None,
        },
    )
    .await;
    list_agent.shutdown().await;
    coordinator.tab_removed(LIST_TAB).await?;

    let agent_status = control.send(Endpoint::Agent(ARTICLE_TAB), Message::GetStatus).await;
    tracing::info!(stats = ?agent_status.get("stats"), rules = article_doc.rule_count(), "article agent");

    request(&control, Message::StopWaveReader).await;

    let status = coordinator.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    article_agent.shutdown().await;
    coordinator.shutdown().await;
    Ok(())
}
