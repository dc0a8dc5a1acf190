//! Coordinator actor: owns a [`Coordinator`] and serialises every change to
//! it through one task.

use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc};

use futures::{FutureExt, future::join_all};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use wave_reader_core::{
    Endpoint, ErrorCode, ErrorLog, KeyValueStore, Message, Reply, TabHost, TabId,
};
use wave_reader_router::{Envelope, Inbox, Port, Responder, Router};

use crate::{
    Coordinator, CoordinatorConfig, CoordinatorError,
    coordinator::{Dispatch, Outbound, Outcome, Step, TabEvent, execute},
};

type Completion = (u64, Outcome);

/// Host-side commands.
enum Command {
    Tab {
        event: TabEvent,
        done: oneshot::Sender<()>,
    },
    CoordinationFailed {
        reason: String,
        done: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<Value>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Handle to the coordinator actor.
///
/// Messages from other contexts arrive through the router; this handle
/// carries what the host itself reports (tab lifecycle, fatal failures).
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
    errors: Arc<ErrorLog>,
}

impl CoordinatorHandle {
    /// Register the coordinator endpoint, load durable state and start
    /// serving.
    pub async fn spawn<T, K>(
        router: &Router,
        tabs: Arc<T>,
        store: Arc<K>,
        config: CoordinatorConfig,
    ) -> Self
    where
        T: TabHost + 'static,
        K: KeyValueStore + 'static,
    {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let inbox = router.register(Endpoint::Coordinator);
        let mut coordinator =
            Coordinator::new(router.port(Endpoint::Coordinator), tabs, store, config);
        coordinator.initialize().await;
        let errors = Arc::clone(coordinator.error_log());

        tokio::spawn(actor_loop(coordinator, inbox, rx, router.clone()));
        tracing::info!("coordinator spawned");

        Self { tx, errors }
    }

    async fn send(&self, command: Command) -> Result<(), CoordinatorError> {
        self.tx.send(command).await.map_err(|_| CoordinatorError::Closed)
    }

    async fn tab_event(&self, event: TabEvent) -> Result<(), CoordinatorError> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Tab { event, done }).await?;
        rx.await.map_err(|_| CoordinatorError::Closed)
    }

    /// Report a tab navigation.
    ///
    /// # Errors
    /// Returns error if the coordinator has stopped.
    pub async fn tab_updated(&self, tab: TabId, complete: bool) -> Result<(), CoordinatorError> {
        self.tab_event(TabEvent::Updated { tab, complete }).await
    }

    /// Report a closed tab; its session is dropped.
    ///
    /// # Errors
    /// Returns error if the coordinator has stopped.
    pub async fn tab_removed(&self, tab: TabId) -> Result<(), CoordinatorError> {
        self.tab_event(TabEvent::Removed { tab }).await
    }

    /// Move the coordinator to the error state.
    ///
    /// # Errors
    /// Returns error if the coordinator has stopped.
    pub async fn coordination_failed(&self, reason: impl Into<String>) -> Result<(), CoordinatorError> {
        let (done, rx) = oneshot::channel();
        self.send(Command::CoordinationFailed {
            reason: reason.into(),
            done,
        })
        .await?;
        rx.await.map_err(|_| CoordinatorError::Closed)
    }

    /// Status snapshot.
    ///
    /// # Errors
    /// Returns error if the coordinator has stopped.
    pub async fn status(&self) -> Result<Value, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply }).await?;
        rx.await.map_err(|_| CoordinatorError::Closed)
    }

    /// Errors reported to the coordinator.
    #[must_use]
    pub fn error_log(&self) -> Arc<ErrorLog> {
        Arc::clone(&self.errors)
    }

    /// Stop serving and unregister. Requests still waiting on an agent are
    /// answered as unreachable.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.send(Command::Shutdown { done }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// One delivery queued on an agent's lane.
enum Job {
    /// Completes its ticket with the outcome.
    Dispatch(Dispatch),
    /// One recipient's share of a broadcast.
    Share {
        envelope: Envelope,
        reply: oneshot::Sender<Reply>,
    },
}

/// Delivers dispatches off the actor task. Everything sent to the same
/// agent, broadcasts included, goes through one lane and arrives in
/// dispatch order.
struct Lanes {
    port: Port,
    done: mpsc::UnboundedSender<Completion>,
    lanes: HashMap<Endpoint, mpsc::UnboundedSender<Job>>,
}

impl Lanes {
    fn new(port: Port, done: mpsc::UnboundedSender<Completion>) -> Self {
        Self {
            port,
            done,
            lanes: HashMap::new(),
        }
    }

    fn submit(&mut self, dispatch: Dispatch) {
        let destination = match &dispatch.outbound {
            Outbound::Send(envelope) => envelope.destination,
            Outbound::Broadcast(message) => {
                self.broadcast(dispatch.ticket, message);
                return;
            }
        };
        self.push(destination, Job::Dispatch(dispatch));
    }

    /// Queue a share of `message` behind whatever each agent's lane already
    /// holds; `ticket` completes once every share is answered.
    fn broadcast(&mut self, ticket: u64, message: &Message) {
        let mut shares = Vec::new();
        for tab in self.port.router().agent_tabs() {
            let destination = Endpoint::Agent(tab);
            let envelope = self.port.envelope(destination, message.clone()).with_tab(tab);
            let (reply, rx) = oneshot::channel();
            self.push(destination, Job::Share { envelope, reply });
            shares.push((tab, rx));
        }

        let kind = message.kind();
        let done = self.done.clone();
        tokio::spawn(async move {
            let replies = join_all(shares.into_iter().map(|(tab, rx)| async move {
                let reply = rx.await.unwrap_or_else(|_| {
                    Reply::failure(ErrorCode::Internal, format!("Delivery to agent:{tab} was abandoned"))
                });
                (tab, reply)
            }))
            .await;
            let failed = replies.iter().filter(|(_, reply)| !reply.success).count();
            if failed > 0 {
                tracing::warn!(kind, failed, total = replies.len(), "broadcast partially failed");
            }
            let _ = done.send((ticket, Outcome::Broadcast(replies)));
        });
    }

    fn push(&mut self, destination: Endpoint, job: Job) {
        let job = match self.lanes.get(&destination) {
            Some(lane) => match lane.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };
        self.lanes.retain(|_, lane| !lane.is_closed());
        let lane = self.open(destination);
        if lane.send(job).is_err() {
            tracing::error!(%destination, "delivery lane closed");
        }
        self.lanes.insert(destination, lane);
    }

    /// Release the lane to `destination`. Jobs already queued still run.
    fn close(&mut self, destination: Endpoint) {
        if self.lanes.remove(&destination).is_some() {
            tracing::trace!(%destination, "delivery lane released");
        }
    }

    fn open(&self, destination: Endpoint) -> mpsc::UnboundedSender<Job> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let port = self.port.clone();
        let done = self.done.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Dispatch(dispatch) => {
                        if done.send(run(&port, dispatch).await).is_err() {
                            break;
                        }
                    }
                    Job::Share { envelope, reply } => {
                        let _ = reply.send(port.request(envelope).await);
                    }
                }
            }
            tracing::trace!(%destination, "delivery lane closed");
        });
        tx
    }
}

async fn run(port: &Port, dispatch: Dispatch) -> Completion {
    let outcome = AssertUnwindSafe(execute(port, dispatch.outbound))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Outcome::Aborted("Dispatch task panicked".to_string()));
    (dispatch.ticket, outcome)
}

/// Answer requests whose acknowledgment will never be processed.
fn abandon(waiting: HashMap<u64, Responder>) {
    for (ticket, responder) in waiting {
        tracing::debug!(ticket, "request abandoned at shutdown");
        responder.respond(Reply::failure(ErrorCode::Unreachable, "Coordinator shut down"));
    }
}

async fn actor_loop<T, K>(
    mut coordinator: Coordinator<T, K>,
    mut inbox: Inbox,
    mut commands: mpsc::Receiver<Command>,
    router: Router,
) where
    T: TabHost + 'static,
    K: KeyValueStore + 'static,
{
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
    let mut lanes = Lanes::new(coordinator.port().clone(), done_tx);
    let mut waiting: HashMap<u64, Responder> = HashMap::new();

    loop {
        tokio::select! {
            delivery = inbox.recv() => {
                let Some(delivery) = delivery else {
                    tracing::warn!("coordinator endpoint replaced; exiting");
                    return;
                };
                let (envelope, responder) = delivery.into_parts();
                let kind = envelope.kind();
                match coordinator.prepare(envelope).await {
                    Step::Reply(reply) => {
                        tracing::debug!(kind, success = reply.success, "answered");
                        responder.respond(reply);
                    }
                    Step::Dispatch(dispatch) => {
                        tracing::debug!(kind, ticket = dispatch.ticket, "dispatched");
                        waiting.insert(dispatch.ticket, responder);
                        lanes.submit(dispatch);
                    }
                }
            }
            Some((ticket, outcome)) = done_rx.recv() => {
                let reply = coordinator.complete(ticket, outcome).await;
                if let Some(responder) = waiting.remove(&ticket) {
                    responder.respond(reply);
                }
            }
            command = commands.recv() => match command {
                Some(Command::Tab { event, done }) => {
                    if let TabEvent::Removed { tab } = event {
                        lanes.close(Endpoint::Agent(tab));
                    }
                    coordinator.on_tab_event(event);
                    let _ = done.send(());
                }
                Some(Command::CoordinationFailed { reason, done }) => {
                    coordinator.coordination_failed(&reason);
                    let _ = done.send(());
                }
                Some(Command::Status { reply }) => {
                    let _ = reply.send(coordinator.status());
                }
                Some(Command::Shutdown { done }) => {
                    router.unregister(Endpoint::Coordinator);
                    abandon(waiting);
                    tracing::info!("coordinator shut down");
                    let _ = done.send(());
                    return;
                }
                None => {
                    router.unregister(Endpoint::Coordinator);
                    abandon(waiting);
                    tracing::info!("all coordinator handles dropped; shutting down");
                    return;
                }
            },
        }
    }
}
