//! Pure planning step of one recompute.

use std::collections::HashMap;

use wave_reader_core::{ElementId, Point, Rect, Viewport};

use crate::{EngineConfig, WaveParams, compute_params};

/// Why a recompute wrote nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Pointer moved less than the threshold since the last recompute
    /// that proceeded.
    BelowThreshold,
    /// Pointer or viewport unusable.
    InvalidPointer,
}

/// One element to rewrite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedWrite {
    pub element: ElementId,
    pub params: WaveParams,
}

/// Outcome of planning one recompute.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Skip(SkipReason),
    Apply {
        /// Elements whose parameters changed.
        writes: Vec<PlannedWrite>,
        /// Elements skipped this cycle for missing or degenerate geometry.
        degenerate: usize,
    },
}

impl Plan {
    /// Planned writes, empty when skipped.
    #[must_use]
    pub fn writes(&self) -> &[PlannedWrite] {
        match self {
            Self::Skip(_) => &[],
            Self::Apply { writes, .. } => writes,
        }
    }
}

/// Recompute state between frames: movement anchor and last applied
/// parameters per element.
#[derive(Debug)]
pub struct WaveCore {
    config: EngineConfig,
    anchor: Option<Point>,
    applied: HashMap<ElementId, WaveParams>,
}

impl WaveCore {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            anchor: None,
            applied: HashMap::new(),
        }
    }

    /// Forget everything; the next plan proceeds unconditionally.
    pub fn reset(&mut self) {
        self.anchor = None;
        self.applied.clear();
    }

    /// Parameters last written for `element`.
    #[must_use]
    pub fn applied(&self, element: ElementId) -> Option<WaveParams> {
        self.applied.get(&element).copied()
    }

    /// Decide which elements need a new rule.
    ///
    /// The first plan after construction or [`WaveCore::reset`] always
    /// proceeds. Later plans are skipped while the pointer stays within the
    /// movement threshold of the position used by the last plan that
    /// proceeded.
    pub fn plan(
        &mut self,
        pointer: Point,
        viewport: Viewport,
        elements: &[(ElementId, Option<Rect>)],
    ) -> Plan {
        let Some(pointer) = viewport.clamp(pointer) else {
            return Plan::Skip(SkipReason::InvalidPointer);
        };
        let threshold = self.config.movement_threshold_px;
        if self.anchor.is_some_and(|anchor| pointer.distance(anchor) < threshold) {
            return Plan::Skip(SkipReason::BelowThreshold);
        }
        self.anchor = Some(pointer);

        let mut writes = Vec::new();
        let mut degenerate = 0;
        for &(element, rect) in elements {
            let Some(params) =
                rect.and_then(|r| compute_params(pointer, &r, self.config.max_translate_pct))
            else {
                degenerate += 1;
                continue;
            };
            let changed = self
                .applied
                .get(&element)
                .is_none_or(|last| params.differs_from(last, self.config.change_epsilon));
            if changed {
                writes.push(PlannedWrite { element, params });
            }
        }
        Plan::Apply { writes, degenerate }
    }

    /// Record a write that reached the stylesheet.
    pub fn commit(&mut self, write: PlannedWrite) {
        self.applied.insert(write.element, write.params);
    }
}
