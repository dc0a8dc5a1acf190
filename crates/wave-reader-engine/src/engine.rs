//! Timer-driven wave engine bound to one document.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use wave_reader_core::{Document, Point, Settings, linear_backoff, retry};

use crate::{EngineConfig, EngineStats, Plan, WaveCore, css::render_fragment};

#[derive(Default)]
struct PointerInput {
    listening: AtomicBool,
    position: Mutex<Point>,
}

/// Latest pointer position, fed by the host's pointer listener.
///
/// Clones share state with the engine that handed them out. Positions are
/// dropped while that engine is disabled.
#[derive(Clone, Default)]
pub struct PointerHandle {
    input: Arc<PointerInput>,
}

impl PointerHandle {
    /// Record a pointer move.
    pub fn moved(&self, point: Point) {
        if self.input.listening.load(Ordering::Acquire) {
            *self.input.position.lock().unwrap_or_else(PoisonError::into_inner) = point;
        }
    }

    fn get(&self) -> Point {
        *self.input.position.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listen(&self, on: bool) {
        self.input.listening.store(on, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Target {
    selector: String,
    settings: Settings,
}

/// Wave engine.
///
/// Enabled, it recomputes once immediately and then once per wave period,
/// writing a rule for every matched element whose transform changed.
/// Disabled, nothing runs and pointer input is ignored.
pub struct WaveEngine<D: Document + ?Sized + 'static> {
    doc: Arc<D>,
    config: EngineConfig,
    pointer: PointerHandle,
    stats: Arc<Mutex<EngineStats>>,
    target: Option<Target>,
    task: Option<JoinHandle<()>>,
}

impl<D: Document + ?Sized + 'static> WaveEngine<D> {
    /// Create a disabled engine.
    #[must_use]
    pub fn new(doc: Arc<D>, config: EngineConfig) -> Self {
        Self {
            doc,
            config,
            pointer: PointerHandle::default(),
            stats: Arc::new(Mutex::new(EngineStats::default())),
            target: None,
            task: None,
        }
    }

    /// Whether the recompute loop is running.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Selector being waved.
    #[must_use]
    pub fn selector(&self) -> Option<&str> {
        self.target.as_ref().map(|t| t.selector.as_str())
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed a pointer position. Ignored while disabled.
    pub fn pointer_moved(&self, point: Point) {
        self.pointer.moved(point);
    }

    /// Handle for feeding pointer positions from another task.
    #[must_use]
    pub fn pointer(&self) -> PointerHandle {
        self.pointer.clone()
    }

    /// Enable for `selector`. Enabling again with the same selector and
    /// settings is a no-op; anything else restarts.
    pub fn start(&mut self, selector: &str, settings: &Settings) {
        let target = Target {
            selector: selector.to_string(),
            settings: settings.clone(),
        };
        if self.is_enabled() && self.target.as_ref() == Some(&target) {
            return;
        }
        self.stop();

        tracing::debug!(selector, period_ms = settings.wave_speed_ms, "wave engine enabled");
        self.pointer.listen(true);
        let recompute = Recompute {
            doc: Arc::clone(&self.doc),
            config: self.config.clone(),
            core: WaveCore::new(self.config.clone()),
            pointer: self.pointer.clone(),
            stats: Arc::clone(&self.stats),
            target: target.clone(),
        };
        self.task = Some(tokio::spawn(recompute.run()));
        self.target = Some(target);
    }

    /// Stop and start again with fresh state.
    pub fn restart(&mut self, selector: &str, settings: &Settings) {
        self.stop();
        self.start(selector, settings);
    }

    /// Disable: cancel the timer, drop the last-applied cache and the
    /// written rules, stop listening to the pointer. No-op when disabled.
    pub fn stop(&mut self) {
        self.pointer.listen(false);
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        self.doc.clear_rules();
        if let Some(target) = self.target.take() {
            tracing::debug!(selector = %target.selector, "wave engine disabled");
        }
    }
}

impl<D: Document + ?Sized + 'static> Drop for WaveEngine<D> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// State owned by the recompute task.
struct Recompute<D: Document + ?Sized> {
    doc: Arc<D>,
    config: EngineConfig,
    core: WaveCore,
    pointer: PointerHandle,
    stats: Arc<Mutex<EngineStats>>,
    target: Target,
}

impl<D: Document + ?Sized> Recompute<D> {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.target.settings.wave_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            // The first tick completes immediately.
            ticker.tick().await;
            self.once().await;
        }
    }

    async fn once(&mut self) {
        let started = Instant::now();
        let selector = self.target.selector.as_str();

        let plan = match self.doc.query_selector_all(selector) {
            Ok(elements) => {
                let rects: Vec<_> = elements
                    .iter()
                    .map(|&el| (el, self.doc.bounding_rect(el)))
                    .collect();
                self.core.plan(self.pointer.get(), self.doc.viewport(), &rects)
            }
            Err(e) => {
                tracing::warn!(selector, error = %e, "wave recompute could not query elements");
                self.stats.lock().unwrap_or_else(PoisonError::into_inner).errors += 1;
                return;
            }
        };

        let (mut writes, mut errors, mut skipped) = (0, 0, 0);
        match plan {
            Plan::Skip(reason) => {
                tracing::trace!(?reason, "wave recompute skipped");
                skipped += 1;
            }
            Plan::Apply { writes: planned, degenerate } => {
                if degenerate > 0 {
                    tracing::trace!(degenerate, "skipped elements without usable geometry");
                }
                let backoff = linear_backoff(self.config.write_backoff());
                for write in planned {
                    let css = render_fragment(write.element, write.params, &self.target.settings);
                    let doc = &self.doc;
                    let outcome = retry(self.config.write_attempts, backoff, |_| {
                        std::future::ready(doc.write_rule(write.element, &css))
                    })
                    .await;
                    match outcome {
                        Ok(()) => {
                            self.core.commit(write);
                            writes += 1;
                        }
                        Err(e) => {
                            tracing::warn!(element = write.element, error = %e, "dropping wave rule for this frame");
                            errors += 1;
                        }
                    }
                }
            }
        }

        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.writes += writes;
        stats.errors += errors;
        stats.skipped += skipped;
        if stats.record_recompute(started.elapsed(), self.config.stats_log_interval) {
            tracing::info!(
                recomputes = stats.recomputes,
                writes = stats.writes,
                errors = stats.errors,
                skipped = stats.skipped,
                avg_recompute_us = stats.avg_recompute_us,
                "wave engine diagnostics"
            );
        }
    }
}
