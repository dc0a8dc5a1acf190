//! Execution agent lifecycle.

use std::sync::Arc;

use serde_json::json;
use tokio::time::Instant;
use wave_reader_core::{
    Document, DomMutation, Message, Reply, Settings, SettingsPatch, validate_selector,
};
use wave_reader_engine::{PointerHandle, WaveEngine};

use crate::{AgentConfig, AgentError};

/// Attributes whose change on a matching element calls for a restart.
const RESTART_ATTRIBUTES: &[&str] = &["style", "class"];

/// Per-page agent state and command handling.
///
/// Owns one engine. Observer-triggered restarts are coalesced: every
/// qualifying mutation pushes the restart deadline out and one restart
/// runs once the page has been quiet until that deadline.
pub struct AgentController<D: Document + ?Sized + 'static> {
    doc: Arc<D>,
    config: AgentConfig,
    engine: WaveEngine<D>,
    settings: Settings,
    current_selector: Option<String>,
    is_active: bool,
    is_paused: bool,
    restart_at: Option<Instant>,
    restarts: u64,
}

impl<D: Document + ?Sized + 'static> AgentController<D> {
    #[must_use]
    pub fn new(doc: Arc<D>, config: AgentConfig) -> Self {
        let engine = WaveEngine::new(Arc::clone(&doc), config.engine.clone());
        Self {
            doc,
            config,
            engine,
            settings: Settings::default(),
            current_selector: None,
            is_active: false,
            is_paused: false,
            restart_at: None,
            restarts: 0,
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.is_active
    }

    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.is_paused
    }

    #[must_use]
    pub fn current_selector(&self) -> Option<&str> {
        self.current_selector.as_deref()
    }

    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub const fn engine(&self) -> &WaveEngine<D> {
        &self.engine
    }

    /// Handle for feeding pointer input to the engine.
    #[must_use]
    pub fn pointer(&self) -> PointerHandle {
        self.engine.pointer()
    }

    /// Observer-triggered restarts run so far.
    #[must_use]
    pub const fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Pending observer restart.
    #[must_use]
    pub const fn restart_deadline(&self) -> Option<Instant> {
        self.restart_at
    }

    const fn is_waving(&self) -> bool {
        self.is_active && !self.is_paused
    }

    /// Handle one command.
    pub fn handle(&mut self, message: Message) -> Reply {
        match message {
            Message::StartWaveReader { selector, options } => {
                match self.start(selector.as_deref(), options.as_ref()) {
                    Ok(count) => Reply::ok_with(json!({ "elementCount": count })),
                    Err(e) => {
                        tracing::warn!(error = %e, "start refused");
                        e.to_reply()
                    }
                }
            }
            Message::StopWaveReader => self.stop(),
            Message::PauseWaveReader => self.pause(),
            Message::ResumeWaveReader => self.resume(),
            Message::SettingsUpdated { settings } => {
                self.settings = settings.normalized();
                self.restart_if_waving();
                Reply::ok()
            }
            Message::SelectorUpdated { selector } => match validate_selector(&selector) {
                Ok(selector) => {
                    self.current_selector = Some(selector.to_string());
                    self.restart_if_waving();
                    Reply::ok()
                }
                Err(e) => AgentError::from(e).to_reply(),
            },
            Message::GetStatus => Reply::ok_with(self.status()),
            other => Reply::unknown_kind(other.kind()),
        }
    }

    /// Status snapshot.
    #[must_use]
    pub fn status(&self) -> serde_json::Value {
        json!({
            "isActive": self.is_active,
            "isPaused": self.is_paused,
            "currentSelector": self.current_selector,
            "settings": self.settings,
            "stats": self.engine.stats(),
        })
    }

    fn start(
        &mut self,
        selector: Option<&str>,
        options: Option<&SettingsPatch>,
    ) -> Result<usize, AgentError> {
        let selector = selector
            .or(self.current_selector.as_deref())
            .ok_or(AgentError::MissingSelector)?;
        let selector = validate_selector(selector)?.to_string();
        let count = self.doc.query_selector_all(&selector)?.len();
        if count == 0 {
            return Err(AgentError::ElementsNotFound(selector));
        }

        if let Some(patch) = options {
            self.settings.merge(patch);
        }
        self.engine.start(&selector, &self.settings);
        tracing::info!(selector = %selector, elements = count, "wave reader started");
        self.current_selector = Some(selector);
        self.is_active = true;
        self.is_paused = false;
        Ok(count)
    }

    fn stop(&mut self) -> Reply {
        if !self.is_active {
            return Reply::noop();
        }
        self.engine.stop();
        self.is_active = false;
        self.is_paused = false;
        self.current_selector = None;
        self.restart_at = None;
        tracing::info!("wave reader stopped");
        Reply::ok()
    }

    fn pause(&mut self) -> Reply {
        if !self.is_waving() {
            return Reply::noop();
        }
        self.engine.stop();
        self.is_paused = true;
        self.restart_at = None;
        tracing::debug!("wave reader paused");
        Reply::ok()
    }

    fn resume(&mut self) -> Reply {
        if !self.is_active || !self.is_paused {
            return Reply::noop();
        }
        self.is_paused = false;
        self.restart_if_waving();
        tracing::debug!("wave reader resumed");
        Reply::ok()
    }

    fn restart_if_waving(&mut self) {
        if !self.is_waving() {
            return;
        }
        if let Some(selector) = self.current_selector.as_deref() {
            self.engine.restart(selector, &self.settings);
        }
    }

    /// Inspect a mutation batch and schedule a restart when it touches the
    /// active selector. Returns whether a restart was scheduled.
    pub fn on_mutation(&mut self, mutation: &DomMutation, now: Instant) -> bool {
        if !self.is_waving() {
            return false;
        }
        let Some(selector) = self.current_selector.as_deref() else {
            return false;
        };
        let delay = match mutation {
            DomMutation::NodesInserted(nodes)
                if nodes.iter().any(|&node| self.doc.matches(node, selector)) =>
            {
                self.config.structural_debounce()
            }
            DomMutation::AttributeChanged { element, attribute }
                if RESTART_ATTRIBUTES.contains(&attribute.as_str())
                    && self.doc.matches(*element, selector) =>
            {
                self.config.attribute_debounce()
            }
            _ => return false,
        };
        self.schedule_restart(now + delay);
        true
    }

    /// Schedule an observer restart; the later of the pending and the new
    /// deadline wins.
    pub fn schedule_restart(&mut self, at: Instant) {
        self.restart_at = Some(self.restart_at.map_or(at, |pending| pending.max(at)));
    }

    /// Run the pending restart if its deadline has passed. Returns whether
    /// the engine was restarted.
    pub fn fire_due_restart(&mut self, now: Instant) -> bool {
        if self.restart_at.is_none_or(|at| at > now) {
            return false;
        }
        self.restart_at = None;
        if !self.is_waving() {
            return false;
        }
        self.restart_if_waving();
        self.restarts += 1;
        tracing::debug!(restarts = self.restarts, "engine restarted after page mutation");
        true
    }

    /// Stop the engine for good.
    pub fn teardown(&mut self) {
        self.engine.stop();
        self.is_active = false;
        self.is_paused = false;
        self.restart_at = None;
    }
}
