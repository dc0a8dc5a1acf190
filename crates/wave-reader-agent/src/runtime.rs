//! Agent task: drains the agent inbox, watches the page and runs
//! debounced restarts.

use std::sync::Arc;

use tokio::{
    sync::{broadcast, oneshot},
    task::JoinHandle,
    time::Instant,
};
use wave_reader_core::{Document, DomMutation, Endpoint, TabId};
use wave_reader_engine::PointerHandle;
use wave_reader_router::{Inbox, Router};

use crate::{AgentConfig, AgentController};

/// Why the agent task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExit {
    /// Torn down by its host.
    Shutdown,
    /// Endpoint replaced or unregistered by someone else.
    Detached,
}

/// Handle to a running agent.
pub struct AgentHandle {
    tab: TabId,
    pointer: PointerHandle,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<AgentExit>,
}

impl AgentHandle {
    #[must_use]
    pub const fn tab(&self) -> TabId {
        self.tab
    }

    /// Feed pointer input to the agent's engine.
    #[must_use]
    pub fn pointer(&self) -> PointerHandle {
        self.pointer.clone()
    }

    /// Whether the agent task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the engine, disconnect the observers and unregister. Dropping
    /// the handle does the same without waiting.
    pub async fn shutdown(mut self) -> AgentExit {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match (&mut self.task).await {
            Ok(exit) => exit,
            Err(e) => {
                tracing::error!(tab = self.tab, error = %e, "agent task failed");
                AgentExit::Shutdown
            }
        }
    }
}

/// Per-page agent bound to the router.
pub struct AgentRuntime;

impl AgentRuntime {
    /// Register `Agent(tab)` and start serving it.
    ///
    /// Registering replaces an agent left over from before a navigation;
    /// the old one sees its inbox end and exits without unregistering.
    #[must_use]
    pub fn spawn<D>(router: &Router, tab: TabId, doc: Arc<D>, config: AgentConfig) -> AgentHandle
    where
        D: Document + ?Sized + 'static,
    {
        let endpoint = Endpoint::Agent(tab);
        let inbox = router.register(endpoint);
        let observer = doc.observe_mutations();
        let controller = AgentController::new(doc, config);
        let pointer = controller.pointer();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let router = router.clone();
        let task = tokio::spawn(async move {
            let exit = serve(tab, controller, inbox, observer, shutdown_rx).await;
            if exit == AgentExit::Shutdown {
                router.unregister(endpoint);
            }
            tracing::debug!(tab, ?exit, "agent exited");
            exit
        });

        AgentHandle {
            tab,
            pointer,
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

async fn next_mutation(
    observer: &mut Option<broadcast::Receiver<DomMutation>>,
) -> Result<DomMutation, broadcast::error::RecvError> {
    match observer {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn serve<D>(
    tab: TabId,
    mut controller: AgentController<D>,
    mut inbox: Inbox,
    observer: broadcast::Receiver<DomMutation>,
    mut shutdown: oneshot::Receiver<()>,
) -> AgentExit
where
    D: Document + ?Sized + 'static,
{
    let mut observer = Some(observer);

    let exit = loop {
        let deadline = controller.restart_deadline();
        tokio::select! {
            _ = &mut shutdown => break AgentExit::Shutdown,
            delivery = inbox.recv() => {
                let Some(delivery) = delivery else {
                    break AgentExit::Detached;
                };
                let (envelope, responder) = delivery.into_parts();
                let kind = envelope.kind();
                let reply = controller.handle(envelope.message);
                tracing::debug!(tab, kind, success = reply.success, "agent handled message");
                responder.respond(reply);
            }
            mutation = next_mutation(&mut observer) => match mutation {
                Ok(mutation) => {
                    controller.on_mutation(&mutation, Instant::now());
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Batches were lost; assume one of them mattered.
                    tracing::warn!(tab, missed, "mutation observer lagged");
                    let at = Instant::now() + controller.config().structural_debounce();
                    controller.schedule_restart(at);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!(tab, "document stopped reporting mutations");
                    observer = None;
                }
            },
            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                controller.fire_due_restart(Instant::now());
            }
        }
    };

    drop(observer);
    controller.teardown();
    exit
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wave_reader_core::{ErrorCode, MemoryDocument, MemoryElement, Message, Point, Rect};

    use super::*;

    fn page(paragraphs: usize) -> Arc<MemoryDocument> {
        let doc = Arc::new(MemoryDocument::default());
        for i in 0..paragraphs {
            #[allow(clippy::cast_precision_loss)]
            let y = 40.0 * i as f64;
            doc.add(MemoryElement::new("p", Rect::new(10.0, y, 300.0, 30.0)));
        }
        doc
    }

    fn start(selector: &str) -> Message {
        Message::StartWaveReader {
            selector: Some(selector.to_string()),
            options: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_through_router() {
        let router = Router::default();
        let agent = AgentRuntime::spawn(&router, 3, page(3), AgentConfig::default());
        let port = router.port(Endpoint::Coordinator);

        let reply = port.send(Endpoint::Agent(3), start("p")).await;
        assert!(reply.success);
        assert_eq!(reply.get("elementCount"), Some(&json!(3)));

        let missing = port.send(Endpoint::Agent(3), start(".nonexistent")).await;
        assert_eq!(missing.code, Some(ErrorCode::ElementsNotFound));

        assert_eq!(agent.shutdown().await, AgentExit::Shutdown);
        assert!(!router.is_registered(Endpoint::Agent(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_rejects_coordinator_only_kinds() {
        let router = Router::default();
        let _agent = AgentRuntime::spawn(&router, 1, page(1), AgentConfig::default());
        let port = router.port(Endpoint::Coordinator);

        let reply = port
            .send(Endpoint::Agent(1), Message::SelectorAdded { selector: "p".into() })
            .await;
        assert_eq!(reply.code, Some(ErrorCode::UnknownMessage));
        assert_eq!(reply.error.as_deref(), Some("Unknown message type: SELECTOR_ADDED"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inserted_nodes_restart_once_after_quiet_period() {
        let router = Router::default();
        let doc = page(2);
        let _agent = AgentRuntime::spawn(&router, 1, Arc::clone(&doc), AgentConfig::default());
        let port = router.port(Endpoint::Coordinator);
        assert!(port.send(Endpoint::Agent(1), start("p")).await.success);
        tokio::time::sleep(Duration::from_millis(1)).await;
        let writes_before = doc.write_attempts();

        for _ in 0..10 {
            doc.insert(MemoryElement::new("p", Rect::new(10.0, 500.0, 300.0, 30.0)));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        // One restart re-plans every matching element from scratch.
        assert_eq!(doc.write_attempts() - writes_before, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinjection_replaces_old_agent() {
        let router = Router::default();
        let old = AgentRuntime::spawn(&router, 5, page(1), AgentConfig::default());
        let new = AgentRuntime::spawn(&router, 5, page(1), AgentConfig::default());
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(old.is_finished());
        assert!(router.is_registered(Endpoint::Agent(5)));
        assert!(!new.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pointer_handle_reaches_engine() {
        let router = Router::default();
        let doc = page(1);
        let agent = AgentRuntime::spawn(&router, 2, Arc::clone(&doc), AgentConfig::default());
        let port = router.port(Endpoint::Coordinator);
        port.send(Endpoint::Agent(2), start("p")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let first = doc.rule(0);

        agent.pointer().moved(Point::new(1200.0, 700.0));
        tokio::time::sleep(Duration::from_millis(2000)).await;

        assert_ne!(doc.rule(0), first);
    }
}
