//! Coordinator core: owns sessions, settings and the selector registry,
//! and turns incoming messages into agent commands.
//!
//! Handling is split in two halves so the owning task never blocks on an
//! agent: [`Coordinator::prepare`] validates a request and either answers
//! it or returns a [`Dispatch`], and [`Coordinator::complete`] applies the
//! agent's acknowledgment once it arrives.

use std::{collections::HashMap, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use wave_reader_core::{
    AnimationState, Endpoint, ErrorCode, ErrorLog, KeyValueStore, Message, Notice, Reply,
    Settings, SettingsPatch, TabHost, TabId, linear_backoff, retry, validate_selector,
};
use wave_reader_router::{Envelope, Port};

use crate::{
    CoordinatorConfig, CoordinatorError, CoordinatorState, FsmEvent, SelectorRegistry,
    SessionTable,
    state::transition,
    storage::{CURRENT_SELECTOR_KEY, SELECTORS_KEY, SETTINGS_KEY, load},
};

/// Host notification about a browser tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabEvent {
    /// The tab navigated; `complete` once loading finished.
    Updated { tab: TabId, complete: bool },
    /// The tab was closed.
    Removed { tab: TabId },
}

/// Work leaving the coordinator.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Command to one agent.
    Send(Envelope),
    /// Message to every registered agent.
    Broadcast(Message),
}

/// Command the coordinator is waiting on.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub ticket: u64,
    pub outbound: Outbound,
}

/// Result of preparing a request.
#[derive(Debug)]
pub enum Step {
    /// Answer right away.
    Reply(Reply),
    /// Deliver, then pass the outcome to [`Coordinator::complete`].
    Dispatch(Dispatch),
}

impl From<Reply> for Step {
    fn from(reply: Reply) -> Self {
        Self::Reply(reply)
    }
}

/// What came back from a dispatch.
#[derive(Debug, Clone)]
pub enum Outcome {
    Reply(Reply),
    Broadcast(Vec<(TabId, Reply)>),
    /// The dispatch never finished.
    Aborted(String),
}

/// Deliver a dispatch through `port`.
pub async fn execute(port: &Port, outbound: Outbound) -> Outcome {
    match outbound {
        Outbound::Send(envelope) => Outcome::Reply(port.request(envelope).await),
        Outbound::Broadcast(message) => Outcome::Broadcast(port.broadcast(message).await),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionCommand {
    Stop,
    Pause,
    Resume,
}

impl SessionCommand {
    const fn message(self) -> Message {
        match self {
            Self::Stop => Message::StopWaveReader,
            Self::Pause => Message::PauseWaveReader,
            Self::Resume => Message::ResumeWaveReader,
        }
    }

    const fn kind(self) -> &'static str {
        match self {
            Self::Stop => "STOP_WAVE_READER",
            Self::Pause => "PAUSE_WAVE_READER",
            Self::Resume => "RESUME_WAVE_READER",
        }
    }
}

#[derive(Debug, Clone)]
enum Pending {
    Start {
        tab: TabId,
        generation: u64,
        selector: String,
        settings: Settings,
    },
    Session {
        tab: TabId,
        generation: u64,
        command: SessionCommand,
    },
    Selector {
        tab: TabId,
        generation: u64,
        selector: String,
    },
    Settings {
        settings: Settings,
    },
}

impl Pending {
    const fn target(&self) -> Option<(TabId, u64)> {
        match self {
            Self::Start { tab, generation, .. }
            | Self::Session { tab, generation, .. }
            | Self::Selector { tab, generation, .. } => Some((*tab, *generation)),
            Self::Settings { .. } => None,
        }
    }

    const fn operation(&self) -> &'static str {
        match self {
            Self::Start { .. } => "START_WAVE_READER",
            Self::Session { command, .. } => command.kind(),
            Self::Selector { .. } => "SELECTOR_UPDATED",
            Self::Settings { .. } => "SETTINGS_UPDATED",
        }
    }
}

/// Coordinator state, owned by exactly one task.
pub struct Coordinator<T, K> {
    state: CoordinatorState,
    sessions: SessionTable,
    registry: SelectorRegistry,
    settings: Settings,
    errors: Arc<ErrorLog>,
    tabs: Arc<T>,
    store: Arc<K>,
    port: Port,
    config: CoordinatorConfig,
    pending: HashMap<u64, Pending>,
    next_ticket: u64,
    last_operation: Option<Envelope>,
}

impl<T, K> Coordinator<T, K>
where
    T: TabHost,
    K: KeyValueStore,
{
    /// Create an idle coordinator sending through `port`.
    #[must_use]
    pub fn new(port: Port, tabs: Arc<T>, store: Arc<K>, config: CoordinatorConfig) -> Self {
        Self {
            state: CoordinatorState::Idle,
            sessions: SessionTable::new(),
            registry: SelectorRegistry::default(),
            settings: Settings::default(),
            errors: Arc::new(ErrorLog::with_capacity(config.error_log_capacity)),
            tabs,
            store,
            port,
            config,
            pending: HashMap::new(),
            next_ticket: 0,
            last_operation: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> CoordinatorState {
        self.state
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub const fn registry(&self) -> &SelectorRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn error_log(&self) -> &Arc<ErrorLog> {
        &self.errors
    }

    #[must_use]
    pub const fn port(&self) -> &Port {
        &self.port
    }

    /// Load durable settings and selectors, then become ready. Unreadable
    /// values are logged and replaced by defaults.
    pub async fn initialize(&mut self) {
        if let Some(settings) = self.load_logged::<Settings>(SETTINGS_KEY).await {
            self.settings = settings.normalized();
        }
        let selectors = self.load_logged::<Vec<String>>(SELECTORS_KEY).await.unwrap_or_default();
        let current = self.load_logged::<String>(CURRENT_SELECTOR_KEY).await;
        self.registry = SelectorRegistry::new(selectors, current);
        tracing::info!(
            selectors = self.registry.selectors().len(),
            current = ?self.registry.current(),
            "coordinator initialized"
        );
        self.apply(FsmEvent::Initialize);
    }

    /// Handle a request end to end, waiting for any agent involved.
    pub async fn handle(&mut self, envelope: Envelope) -> Reply {
        match self.prepare(envelope).await {
            Step::Reply(reply) => reply,
            Step::Dispatch(dispatch) => {
                let outcome = execute(&self.port, dispatch.outbound).await;
                self.complete(dispatch.ticket, outcome).await
            }
        }
    }

    /// Validate a request and answer it or hand back the command to send.
    pub async fn prepare(&mut self, envelope: Envelope) -> Step {
        let kind = envelope.kind();
        let result = if envelope.message.mutates_session() {
            self.prepare_operation(envelope).await
        } else {
            self.prepare_bookkeeping(envelope).await
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(kind, error = %e, "request refused");
            e.to_reply().into()
        })
    }

    async fn prepare_operation(&mut self, envelope: Envelope) -> Result<Step, CoordinatorError> {
        if self.state == CoordinatorState::Error {
            return Err(CoordinatorError::InvalidState(self.state));
        }
        self.last_operation = Some(envelope.clone());
        let Envelope { message, tab_id, .. } = envelope;
        match message {
            Message::StartWaveReader { selector, options } => {
                self.prepare_start(selector.as_deref(), options, tab_id).await
            }
            Message::StopWaveReader => self.prepare_command(SessionCommand::Stop, tab_id).await,
            Message::PauseWaveReader => self.prepare_command(SessionCommand::Pause, tab_id).await,
            Message::ResumeWaveReader => self.prepare_command(SessionCommand::Resume, tab_id).await,
            other => Ok(Reply::unknown_kind(other.kind()).into()),
        }
    }

    async fn prepare_bookkeeping(&mut self, envelope: Envelope) -> Result<Step, CoordinatorError> {
        let Envelope {
            message,
            origin,
            tab_id,
            ..
        } = envelope;
        match message {
            Message::UpdateSettings { settings: patch } => {
                let mut settings = self.settings.clone();
                settings.merge(&patch);
                Ok(self.replace_settings(settings).await)
            }
            Message::SettingsUpdated { settings } => {
                Ok(self.replace_settings(settings.normalized()).await)
            }
            Message::SettingsReset => Ok(self.replace_settings(Settings::default()).await),
            Message::SelectorAdded { selector } => {
                let selector = validate_selector(&selector)?;
                let added = self.registry.add(selector);
                self.apply(FsmEvent::SelectorOperation);
                self.persist_registry().await;
                Ok(self.registry_reply(added).into())
            }
            Message::SelectorRemoved { selector } => {
                let removed = self.registry.remove(selector.trim());
                self.apply(FsmEvent::SelectorOperation);
                self.persist_registry().await;
                Ok(self.registry_reply(removed).into())
            }
            Message::SelectionConfirmed { selector } => {
                let selector = validate_selector(&selector)?;
                self.registry.confirm(selector);
                self.apply(FsmEvent::SelectorOperation);
                self.persist_registry().await;
                Ok(self.registry_reply(true).into())
            }
            Message::SelectorUpdated { selector } => self.prepare_selector(&selector, tab_id).await,
            Message::ErrorReported { error, context } => {
                let payload = match context {
                    Some(context) => format!("{context}: {error}"),
                    None => error,
                };
                tracing::warn!(%origin, error = %payload, "error reported");
                self.errors.push(origin, payload);
                self.apply(FsmEvent::ErrorReported);
                Ok(Reply::ok().into())
            }
            Message::WaveReaderStatus => Ok(Reply::ok_with(self.status()).into()),
            Message::RetryLastOperation => self.retry().await,
            Message::ResetCoordinator => Ok(self.reset().into()),
            other => Ok(Reply::unknown_kind(other.kind()).into()),
        }
    }

    async fn resolve_tab(&self, tab_id: Option<TabId>) -> Result<TabId, CoordinatorError> {
        match tab_id {
            Some(tab) => Ok(tab),
            None => self.tabs.active_tab().await.ok_or(CoordinatorError::NoActiveTab),
        }
    }

    async fn prepare_start(
        &mut self,
        selector: Option<&str>,
        options: Option<SettingsPatch>,
        tab_id: Option<TabId>,
    ) -> Result<Step, CoordinatorError> {
        let selector = selector
            .or(self.registry.current())
            .ok_or(CoordinatorError::MissingSelector)?;
        let selector = validate_selector(selector)?.to_string();
        let tab = self.resolve_tab(tab_id).await?;

        if let Some(patch) = options.filter(|patch| !patch.is_empty()) {
            self.settings.merge(&patch);
            self.persist(SETTINGS_KEY, &self.settings).await;
        }

        self.apply(FsmEvent::Start);
        let generation = self.sessions.dispatch(tab);
        let message = Message::StartWaveReader {
            selector: Some(selector.clone()),
            options: Some(SettingsPatch::from(&self.settings)),
        };
        tracing::debug!(tab, generation, selector = %selector, "dispatching start");
        Ok(self.dispatch_to(
            tab,
            message,
            Pending::Start {
                tab,
                generation,
                selector,
                settings: self.settings.clone(),
            },
        ))
    }

    async fn prepare_command(
        &mut self,
        command: SessionCommand,
        tab_id: Option<TabId>,
    ) -> Result<Step, CoordinatorError> {
        let tab = self.resolve_tab(tab_id).await?;
        let state = self.sessions.get(tab).map(|s| s.animation_state);
        let needed = match command {
            // A start still in flight has no session yet but must be undone.
            SessionCommand::Stop => {
                self.sessions.has_in_flight(tab) || state.is_some_and(|s| !s.is_terminal())
            }
            SessionCommand::Pause => state == Some(AnimationState::Waving),
            SessionCommand::Resume => state == Some(AnimationState::Paused),
        };
        if !needed {
            tracing::debug!(tab, ?command, ?state, "nothing to do");
            return Ok(Reply::noop().into());
        }

        if command == SessionCommand::Stop {
            self.apply(FsmEvent::Stop);
        }
        let generation = self.sessions.dispatch(tab);
        tracing::debug!(tab, generation, ?command, "dispatching session command");
        Ok(self.dispatch_to(
            tab,
            command.message(),
            Pending::Session {
                tab,
                generation,
                command,
            },
        ))
    }

    async fn prepare_selector(
        &mut self,
        selector: &str,
        tab_id: Option<TabId>,
    ) -> Result<Step, CoordinatorError> {
        let selector = validate_selector(selector)?.to_string();
        self.registry.set_current(&selector);
        self.apply(FsmEvent::SelectorOperation);
        self.persist_registry().await;

        let tab = match tab_id {
            Some(tab) => Some(tab),
            None => self.tabs.active_tab().await,
        };
        let waving = tab.filter(|&tab| {
            self.sessions
                .get(tab)
                .is_some_and(|s| s.animation_state == AnimationState::Waving)
        });
        let Some(tab) = waving else {
            return Ok(Reply::ok().into());
        };

        let generation = self.sessions.dispatch(tab);
        Ok(self.dispatch_to(
            tab,
            Message::SelectorUpdated {
                selector: selector.clone(),
            },
            Pending::Selector {
                tab,
                generation,
                selector,
            },
        ))
    }

    async fn replace_settings(&mut self, settings: Settings) -> Step {
        self.settings = settings;
        self.apply(FsmEvent::SettingsUpdate);
        self.persist(SETTINGS_KEY, &self.settings).await;

        let message = Message::SettingsUpdated {
            settings: self.settings.clone(),
        };
        let pending = Pending::Settings {
            settings: self.settings.clone(),
        };
        self.dispatch(Outbound::Broadcast(message), pending)
    }

    fn dispatch_to(&mut self, tab: TabId, message: Message, pending: Pending) -> Step {
        let mut envelope = self.port.envelope(Endpoint::Agent(tab), message).with_tab(tab);
        if let Some(session) = self.sessions.get(tab) {
            envelope = envelope.with_session(session.id);
        }
        self.dispatch(Outbound::Send(envelope), pending)
    }

    fn dispatch(&mut self, outbound: Outbound, pending: Pending) -> Step {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.pending.insert(ticket, pending);
        Step::Dispatch(Dispatch { ticket, outbound })
    }

    /// Apply the outcome of a dispatch and produce the reply for whoever
    /// asked for it.
    pub async fn complete(&mut self, ticket: u64, outcome: Outcome) -> Reply {
        let Some(pending) = self.pending.remove(&ticket) else {
            tracing::warn!(ticket, "completion for unknown dispatch");
            return Reply::failure(ErrorCode::Internal, format!("Unknown dispatch {ticket}"));
        };

        let reply = match outcome {
            Outcome::Aborted(reason) => {
                if let Some((tab, generation)) = pending.target() {
                    self.sessions.acknowledge(tab, generation);
                }
                self.coordination_failed(&reason);
                Reply::failure(ErrorCode::Internal, reason)
            }
            Outcome::Broadcast(replies) => self.complete_broadcast(pending, &replies),
            Outcome::Reply(reply) => self.complete_command(pending, reply).await,
        };
        self.settle();
        reply
    }

    async fn complete_command(&mut self, pending: Pending, reply: Reply) -> Reply {
        let operation = pending.operation();
        let Some((tab, generation)) = pending.target() else {
            return reply;
        };
        if !self.sessions.acknowledge(tab, generation) {
            tracing::debug!(tab, generation, operation, "stale acknowledgment ignored");
            return Reply::failure(
                ErrorCode::Superseded,
                format!("{operation} for tab {tab} was superseded by a newer command"),
            );
        }
        if !reply.success {
            self.report_failure(operation, tab, &reply);
            return reply;
        }

        match pending {
            Pending::Start {
                tab,
                generation,
                selector,
                settings,
            } => {
                let session_id = self.sessions.start(tab, selector.clone(), settings, generation).id;
                self.registry.confirm(&selector);
                self.persist_registry().await;
                tracing::info!(tab, %session_id, selector = %selector, "wave reader started");
                let mut reply = reply;
                reply.data.insert("sessionId".to_string(), json!(session_id));
                reply
            }
            Pending::Session {
                tab,
                generation,
                command,
            } => {
                let state = match command {
                    SessionCommand::Stop => AnimationState::Stopped,
                    SessionCommand::Pause => AnimationState::Paused,
                    SessionCommand::Resume => AnimationState::Waving,
                };
                self.sessions.set_state(tab, state, generation);
                tracing::info!(tab, ?state, "session updated");
                reply
            }
            Pending::Selector {
                tab,
                generation,
                selector,
            } => {
                if let Some(session) = self.sessions.get_mut(tab) {
                    session.selector = selector;
                    session.generation = generation;
                }
                reply
            }
            Pending::Settings { .. } => reply,
        }
    }

    fn complete_broadcast(&mut self, pending: Pending, replies: &[(TabId, Reply)]) -> Reply {
        let settings = match pending {
            Pending::Settings { settings } => settings,
            other => {
                tracing::warn!(operation = other.operation(), "broadcast outcome for a single-tab command");
                return Reply::failure(ErrorCode::Internal, "Mismatched dispatch outcome");
            }
        };
        let mut delivered = 0;
        for (tab, reply) in replies {
            if !reply.success {
                tracing::debug!(tab, error = ?reply.error, "agent did not take settings");
                continue;
            }
            delivered += 1;
            if let Some(session) = self.sessions.get_mut(*tab) {
                session.options_snapshot = settings.clone();
            }
        }
        Reply::ok_with(json!({
            "settings": settings,
            "delivered": delivered,
            "failed": replies.len() - delivered,
        }))
    }

    /// Move to the state implied by the sessions once nothing is in flight.
    fn settle(&mut self) {
        if !self.sessions.any_in_flight() {
            self.apply(FsmEvent::CoordinationComplete(self.sessions.derived_state()));
        }
    }

    fn apply(&mut self, event: FsmEvent) {
        let Some(next) = transition(self.state, event) else {
            return;
        };
        if next != self.state {
            tracing::info!(from = %self.state, to = %next, ?event, "coordinator state changed");
            self.state = next;
            self.notify(Notice::StateChanged {
                state: next.to_string(),
            });
        }
    }

    /// A coordination step failed beyond recovery; refuse session
    /// operations until RETRY or RESET.
    pub fn coordination_failed(&mut self, reason: &str) {
        tracing::error!(reason, "coordination failed");
        self.errors.push(Endpoint::Coordinator, reason);
        self.apply(FsmEvent::CoordinationFailed);
    }

    /// Leave the error state and replay the last session operation.
    ///
    /// # Errors
    /// Returns error if the coordinator is not in the error state.
    pub async fn retry(&mut self) -> Result<Step, CoordinatorError> {
        if self.state != CoordinatorState::Error {
            return Err(CoordinatorError::InvalidState(self.state));
        }
        self.apply(FsmEvent::Retry);
        let Some(envelope) = self.last_operation.clone() else {
            return Ok(Reply::noop().into());
        };
        tracing::info!(kind = envelope.kind(), "replaying last operation");
        self.prepare_operation(envelope).await
    }

    /// Back to idle with no sessions. Acknowledgments still in flight are
    /// answered as superseded.
    pub fn reset(&mut self) -> Reply {
        let dropped = self.sessions.len();
        self.sessions.clear();
        self.last_operation = None;
        self.apply(FsmEvent::Reset);
        tracing::info!(dropped, "coordinator reset");
        Reply::ok()
    }

    /// React to a tab navigating or closing.
    pub fn on_tab_event(&mut self, event: TabEvent) {
        match event {
            TabEvent::Updated { tab, complete } => {
                self.apply(FsmEvent::TabUpdated);
                if complete && self.sessions.get(tab).is_some() {
                    tracing::debug!(tab, "tab with session navigated");
                    self.notify(Notice::TabNavigated { tab_id: tab });
                }
            }
            TabEvent::Removed { tab } => {
                self.apply(FsmEvent::TabRemoved);
                if let Some(session) = self.sessions.remove(tab) {
                    tracing::info!(tab, session_id = %session.id, "session ended with its tab");
                    self.notify(Notice::SessionEnded { tab_id: tab });
                }
                self.settle();
            }
        }
    }

    /// Status snapshot.
    #[must_use]
    pub fn status(&self) -> Value {
        json!({
            "state": self.state,
            "sessions": self.sessions.iter().collect::<Vec<_>>(),
            "settings": self.settings,
            "currentSelector": self.registry.current(),
            "selectors": self.registry.selectors(),
            "activeSelectors": self.sessions.active_selectors(),
            "errorCount": self.errors.len(),
        })
    }

    fn registry_reply(&self, changed: bool) -> Reply {
        if !changed {
            return Reply::noop();
        }
        Reply::ok_with(json!({
            "selectors": self.registry.selectors(),
            "currentSelector": self.registry.current(),
        }))
    }

    fn report_failure(&self, operation: &str, tab: TabId, reply: &Reply) {
        let error = reply.error.clone().unwrap_or_else(|| "unknown error".to_string());
        tracing::warn!(operation, tab, code = ?reply.code, error = %error, "agent command failed");
        self.errors
            .push(Endpoint::Coordinator, format!("{operation} failed for tab {tab}: {error}"));
        self.notify(Notice::OperationFailed {
            operation: operation.to_string(),
            tab_id: Some(tab),
            error,
        });
    }

    /// Push a notice to the control surface without waiting for it.
    fn notify(&self, notice: Notice) {
        let user_facing = !matches!(notice, Notice::StateChanged { .. });
        if user_facing && !self.settings.notifications_enabled {
            return;
        }
        if !self.port.router().is_registered(Endpoint::ControlSurface) {
            tracing::debug!(?notice, "no control surface to notify");
            return;
        }
        let port = self.port.clone();
        tokio::spawn(async move {
            let reply = port.send(Endpoint::ControlSurface, Message::Notify { notice }).await;
            if !reply.success {
                tracing::debug!(error = ?reply.error, "notification not delivered");
            }
        });
    }

    async fn persist_registry(&self) {
        self.persist(SELECTORS_KEY, &self.registry.selectors()).await;
        self.persist(CURRENT_SELECTOR_KEY, &self.registry.current()).await;
    }

    /// Best-effort write: failures are logged and the in-memory value
    /// stands.
    async fn persist<V: Serialize + ?Sized>(&self, key: &str, value: &V) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "value not serializable");
                return;
            }
        };
        let store = &self.store;
        let backoff = linear_backoff(self.config.persist_backoff());
        let result = retry(self.config.persist_attempts, backoff, move |_| {
            store.set(key, value.clone())
        })
        .await;
        if let Err(e) = result {
            tracing::warn!(key, error = %e, "could not persist; keeping in-memory value");
            self.errors
                .push(Endpoint::Coordinator, format!("Failed to persist {key}: {e}"));
        }
    }

    async fn load_logged<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        match load::<K, V>(self.store.as_ref(), key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "could not load; using default");
                None
            }
        }
    }
}
