//! Endpoint registry and request/response delivery.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use wave_reader_core::{Endpoint, ErrorCode, Message, Reply, TabId};

use crate::protocol::{Delivery, Envelope, Responder, decode_envelope};

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterConfig {
    /// Upper bound on one request, delivery plus reply.
    pub request_timeout_ms: u64,
    /// Queued deliveries per endpoint before senders wait.
    pub queue_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            queue_capacity: 64,
        }
    }
}

impl RouterConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

struct Inner {
    routes: RwLock<HashMap<Endpoint, mpsc::Sender<Delivery>>>,
    config: RouterConfig,
}

/// Registry of live contexts.
///
/// Cheap to clone; every clone shares the same registry.
#[derive(Clone)]
pub struct Router {
    inner: Arc<Inner>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

impl Router {
    /// Create an empty router.
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                routes: RwLock::new(HashMap::new()),
                config,
            }),
        }
    }

    /// Attach a context, replacing any previous registration of the same
    /// endpoint.
    #[must_use]
    pub fn register(&self, endpoint: Endpoint) -> Inbox {
        let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity.max(1));
        let previous = self
            .inner
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(endpoint, tx);
        if previous.is_some() {
            tracing::debug!(%endpoint, "endpoint re-registered");
        }
        Inbox { endpoint, rx }
    }

    /// Detach a context. Its inbox drains what is already queued and then
    /// ends.
    pub fn unregister(&self, endpoint: Endpoint) {
        self.inner
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&endpoint);
    }

    /// Whether a live context is registered at `endpoint`.
    #[must_use]
    pub fn is_registered(&self, endpoint: Endpoint) -> bool {
        self.inner
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&endpoint)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Tabs with a registered agent, sorted.
    #[must_use]
    pub fn agent_tabs(&self) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self
            .inner
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter_map(|endpoint| match endpoint {
                Endpoint::Agent(tab) => Some(*tab),
                _ => None,
            })
            .collect();
        tabs.sort_unstable();
        tabs
    }

    /// Sending half bound to `origin`.
    #[must_use]
    pub fn port(&self, origin: Endpoint) -> Port {
        Port {
            router: self.clone(),
            origin,
        }
    }

    fn route(&self, endpoint: Endpoint) -> Option<mpsc::Sender<Delivery>> {
        self.inner
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&endpoint)
            .cloned()
    }

    fn prune(&self, endpoint: Endpoint) {
        let mut routes = self.inner.routes.write().unwrap_or_else(PoisonError::into_inner);
        if routes.get(&endpoint).is_some_and(mpsc::Sender::is_closed) {
            routes.remove(&endpoint);
        }
    }

    async fn deliver(&self, envelope: Envelope, interrupt: Option<oneshot::Receiver<()>>) -> Reply {
        let destination = envelope.destination;
        let correlation_id = envelope.correlation_id;
        let kind = envelope.kind();

        let Some(route) = self.route(destination) else {
            return unreachable(destination, kind);
        };

        let exchange = async {
            let (tx, rx) = oneshot::channel();
            let delivery = Delivery {
                envelope,
                responder: Responder::new(correlation_id, tx),
            };
            if route.send(delivery).await.is_err() {
                self.prune(destination);
                return unreachable(destination, kind);
            }
            rx.await.unwrap_or_else(|_| dropped(destination, kind))
        };

        let interrupted = async {
            match interrupt {
                Some(rx) => {
                    if rx.await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        let timeout = self.inner.config.request_timeout();
        let reply = tokio::select! {
            outcome = tokio::time::timeout(timeout, exchange) => match outcome {
                Ok(reply) => reply,
                Err(_) => {
                    tracing::warn!(%destination, kind, %correlation_id, ?timeout, "request timed out");
                    Reply::failure(
                        ErrorCode::Timeout,
                        format!("No reply from {destination} within {}ms", timeout.as_millis()),
                    )
                }
            },
            () = interrupted => {
                tracing::debug!(%destination, kind, %correlation_id, "request interrupted");
                Reply::failure(ErrorCode::Cancelled, format!("Request to {destination} was cancelled"))
            }
        };

        match reply.correlation_id {
            Some(echoed) if echoed != correlation_id => {
                tracing::error!(%destination, kind, %correlation_id, %echoed, "reply correlation mismatch");
                Reply::failure(ErrorCode::Internal, "Reply does not match request")
                    .with_correlation(correlation_id)
            }
            _ => reply.with_correlation(correlation_id),
        }
    }
}

fn unreachable(destination: Endpoint, kind: &str) -> Reply {
    tracing::warn!(%destination, kind, "destination unreachable");
    Reply::failure(
        ErrorCode::Unreachable,
        format!("Could not establish connection. Receiving end does not exist: {destination}"),
    )
}

fn dropped(destination: Endpoint, kind: &str) -> Reply {
    tracing::warn!(%destination, kind, "request dropped before a handler answered");
    Reply::failure(
        ErrorCode::Unreachable,
        format!("Receiving end dropped the request: {destination}"),
    )
}

/// Sending half held by one context.
#[derive(Clone)]
pub struct Port {
    router: Router,
    origin: Endpoint,
}

impl Port {
    /// Endpoint this port sends from.
    #[must_use]
    pub const fn origin(&self) -> Endpoint {
        self.origin
    }

    /// Router behind this port.
    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// Envelope from this port's endpoint.
    #[must_use]
    pub fn envelope(&self, destination: Endpoint, message: Message) -> Envelope {
        Envelope::new(self.origin, destination, message)
    }

    /// Send a message and wait for the reply.
    ///
    /// Never fails: unreachable destinations, timeouts and interrupts come
    /// back as failed replies.
    pub async fn send(&self, destination: Endpoint, message: Message) -> Reply {
        self.request(self.envelope(destination, message)).await
    }

    /// Send a prepared envelope and wait for the reply.
    pub async fn request(&self, envelope: Envelope) -> Reply {
        self.router.deliver(envelope, None).await
    }

    /// Like [`Port::request`], giving up early once `interrupt` fires.
    pub async fn request_with_interrupt(
        &self,
        envelope: Envelope,
        interrupt: oneshot::Receiver<()>,
    ) -> Reply {
        self.router.deliver(envelope, Some(interrupt)).await
    }

    /// Decode a JSON envelope and deliver it. Unknown or malformed messages
    /// are answered here and never reach a handler.
    pub async fn request_wire(&self, json: &str) -> Reply {
        match decode_envelope(json) {
            Ok(envelope) => self.request(envelope).await,
            Err(e) => {
                tracing::warn!(origin = %self.origin, error = %e, "rejected wire message");
                e.to_reply()
            }
        }
    }

    /// Deliver `message` to every registered agent.
    ///
    /// One recipient failing does not stop delivery to the others.
    pub async fn broadcast(&self, message: Message) -> Vec<(TabId, Reply)> {
        let tabs = self.router.agent_tabs();
        let sends = tabs.iter().map(|&tab| {
            let envelope = self.envelope(Endpoint::Agent(tab), message.clone()).with_tab(tab);
            async move { (tab, self.request(envelope).await) }
        });
        let replies = futures::future::join_all(sends).await;

        let failed = replies.iter().filter(|(_, reply)| !reply.success).count();
        if failed > 0 {
            tracing::warn!(kind = message.kind(), failed, total = replies.len(), "broadcast partially failed");
        }
        replies
    }
}

/// Receiving half held by one context.
///
/// Messages arrive in delivery order. Kinds the context does not handle are
/// answered with an unknown-type failure before they reach the caller.
pub struct Inbox {
    endpoint: Endpoint,
    rx: mpsc::Receiver<Delivery>,
}

impl Inbox {
    /// Endpoint this inbox receives for.
    #[must_use]
    pub const fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Next accepted delivery; `None` once the endpoint is unregistered or
    /// replaced and the queue is drained.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            let mut delivery = self.rx.recv().await?;
            if delivery.message().accepted_by(&self.endpoint) {
                delivery.responder.arm();
                return Some(delivery);
            }
            let kind = delivery.message().kind();
            tracing::warn!(endpoint = %self.endpoint, kind, "message kind not handled here");
            delivery.respond(Reply::unknown_kind(kind));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_echo(mut inbox: Inbox) -> tokio::task::JoinHandle<Vec<&'static str>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(delivery) = inbox.recv().await {
                seen.push(delivery.message().kind());
                let kind = delivery.message().kind();
                delivery.respond(Reply::ok_with(serde_json::json!({ "handled": kind })));
            }
            seen
        })
    }

    #[tokio::test]
    async fn test_unreachable_is_soft_failure() {
        let router = Router::default();
        let port = router.port(Endpoint::Coordinator);

        let reply = port.send(Endpoint::Agent(9), Message::StopWaveReader).await;

        assert!(!reply.success);
        assert_eq!(reply.code, Some(ErrorCode::Unreachable));
        assert!(reply.error.unwrap().contains("agent:9"));
    }

    #[tokio::test]
    async fn test_reply_echoes_correlation_id() {
        let router = Router::default();
        let _task = spawn_echo(router.register(Endpoint::Agent(1)));
        let port = router.port(Endpoint::Coordinator);

        let envelope = port.envelope(Endpoint::Agent(1), Message::GetStatus);
        let correlation_id = envelope.correlation_id;
        let reply = port.request(envelope).await;

        assert!(reply.success);
        assert_eq!(reply.correlation_id, Some(correlation_id));
        assert_eq!(reply.get("handled").unwrap(), "GET_STATUS");
    }

    #[tokio::test]
    async fn test_dropped_responder_is_implicit_ack() {
        let router = Router::default();
        let mut inbox = router.register(Endpoint::Coordinator);
        tokio::spawn(async move {
            while let Some(delivery) = inbox.recv().await {
                drop(delivery);
            }
        });

        let reply = router
            .port(Endpoint::ControlSurface)
            .send(Endpoint::Coordinator, Message::SettingsReset)
            .await;

        assert!(reply.success);
        assert!(reply.data.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_handler_is_unreachable() {
        let router = Router::default();
        let mut inbox = router.register(Endpoint::Agent(7));
        tokio::spawn(async move {
            let _delivery = inbox.recv().await;
            panic!("handler failed");
        });

        let reply = router
            .port(Endpoint::Coordinator)
            .send(
                Endpoint::Agent(7),
                Message::StartWaveReader {
                    selector: Some("p".into()),
                    options: None,
                },
            )
            .await;

        assert!(!reply.success);
        assert_eq!(reply.code, Some(ErrorCode::Unreachable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_delivery_dropped_with_inbox_is_unreachable() {
        let router = Router::default();
        let inbox = router.register(Endpoint::Agent(8));
        let port = router.port(Endpoint::Coordinator);

        let request =
            tokio::spawn(async move { port.send(Endpoint::Agent(8), Message::StopWaveReader).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!request.is_finished());
        drop(inbox);

        let reply = request.await.unwrap();
        assert_eq!(reply.code, Some(ErrorCode::Unreachable));
        assert!(reply.error.unwrap().contains("agent:8"));
    }

    #[tokio::test]
    async fn test_unaccepted_kind_rejected_at_inbox() {
        let router = Router::default();
        let task = spawn_echo(router.register(Endpoint::Agent(2)));
        let port = router.port(Endpoint::Coordinator);

        let reply = port
            .send(Endpoint::Agent(2), Message::SelectorAdded { selector: "p".into() })
            .await;
        assert_eq!(reply.error.as_deref(), Some("Unknown message type: SELECTOR_ADDED"));

        router.unregister(Endpoint::Agent(2));
        drop(port);
        let seen = task.await.unwrap();
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_wire_unknown_kind_never_dispatched() {
        let router = Router::default();
        let task = spawn_echo(router.register(Endpoint::Coordinator));
        let port = router.port(Endpoint::ControlSurface);

        let reply = port
            .request_wire(
                r#"{"message":{"type":"FLY"},"origin":{"context":"control_surface"},"destination":{"context":"coordinator"}}"#,
            )
            .await;
        assert_eq!(reply.error.as_deref(), Some("Unknown message type: FLY"));

        router.unregister(Endpoint::Coordinator);
        assert!(task.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_order_within_destination() {
        let router = Router::default();
        let task = spawn_echo(router.register(Endpoint::Agent(3)));
        let port = router.port(Endpoint::Coordinator);

        for message in [
            Message::StartWaveReader { selector: Some("p".into()), options: None },
            Message::PauseWaveReader,
            Message::ResumeWaveReader,
            Message::StopWaveReader,
        ] {
            assert!(port.send(Endpoint::Agent(3), message).await.success);
        }

        router.unregister(Endpoint::Agent(3));
        let seen = task.await.unwrap();
        assert_eq!(
            seen,
            vec!["START_WAVE_READER", "PAUSE_WAVE_READER", "RESUME_WAVE_READER", "STOP_WAVE_READER"]
        );
    }

    #[tokio::test]
    async fn test_broadcast_survives_dead_recipient() {
        let router = Router::default();
        let _a = spawn_echo(router.register(Endpoint::Agent(1)));
        let dead = router.register(Endpoint::Agent(2));
        drop(dead);
        let _c = spawn_echo(router.register(Endpoint::Agent(3)));

        let replies = router
            .port(Endpoint::Coordinator)
            .broadcast(Message::SettingsUpdated { settings: wave_reader_core::Settings::default() })
            .await;

        assert_eq!(replies.len(), 3);
        let ok: Vec<TabId> = replies.iter().filter(|(_, r)| r.success).map(|(t, _)| *t).collect();
        assert_eq!(ok, vec![1, 3]);
        assert!(!router.is_registered(Endpoint::Agent(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_handler_stalls() {
        let router = Router::new(RouterConfig {
            request_timeout_ms: 250,
            ..RouterConfig::default()
        });
        let mut inbox = router.register(Endpoint::Agent(5));
        let _stall = tokio::spawn(async move {
            let held = inbox.recv().await;
            std::future::pending::<()>().await;
            drop(held);
        });

        let reply = router.port(Endpoint::Coordinator).send(Endpoint::Agent(5), Message::GetStatus).await;

        assert_eq!(reply.code, Some(ErrorCode::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_cancels_request() {
        let router = Router::default();
        let mut inbox = router.register(Endpoint::Agent(6));
        let _stall = tokio::spawn(async move {
            let held = inbox.recv().await;
            std::future::pending::<()>().await;
            drop(held);
        });
        let port = router.port(Endpoint::Coordinator);
        let (interrupt_tx, interrupt_rx) = oneshot::channel();

        let request = tokio::spawn({
            let port = port.clone();
            async move {
                let envelope = port.envelope(Endpoint::Agent(6), Message::GetStatus);
                port.request_with_interrupt(envelope, interrupt_rx).await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        interrupt_tx.send(()).unwrap();

        let reply = request.await.unwrap();
        assert_eq!(reply.code, Some(ErrorCode::Cancelled));
    }
}
