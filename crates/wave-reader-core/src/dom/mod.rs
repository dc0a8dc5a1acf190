//! Page abstraction the execution agent and the engine run against.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::SelectorError;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{MemoryDocument, MemoryElement};

/// Stable handle of an element within one document.
pub type ElementId = u64;

/// Point in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Element bounding rectangle in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Zero, negative or non-finite geometry.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        !(self.x.is_finite() && self.y.is_finite())
            || !(self.width.is_finite() && self.height.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
    }
}

/// Visible area of the page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Pull a point into the viewport. `None` for non-finite input or an
    /// empty viewport.
    #[must_use]
    pub fn clamp(&self, point: Point) -> Option<Point> {
        if !point.is_finite() || !(self.width > 0.0 && self.height > 0.0) {
            return None;
        }
        Some(Point::new(
            point.x.clamp(0.0, self.width),
            point.y.clamp(0.0, self.height),
        ))
    }
}

/// Change reported by the page's mutation observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomMutation {
    /// Nodes inserted anywhere in the subtree.
    NodesInserted(Vec<ElementId>),
    /// Attribute change on one element.
    AttributeChanged { element: ElementId, attribute: String },
}

/// Page error.
#[derive(Debug, Error)]
pub enum DomError {
    #[error(transparent)]
    InvalidSelector(#[from] SelectorError),
    #[error("Stylesheet write failed: {0}")]
    StyleWrite(String),
    #[error("Unsupported selector: {0}")]
    Unsupported(String),
    #[error("Document is detached")]
    Detached,
}

/// Live document of one tab.
///
/// Implemented by the host binding; [`MemoryDocument`] backs tests and the
/// simulator.
pub trait Document: Send + Sync {
    /// Elements matching `selector`, in document order.
    ///
    /// # Errors
    /// Returns error if the selector does not parse.
    fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementId>, DomError>;

    /// Whether `element` matches `selector`.
    fn matches(&self, element: ElementId, selector: &str) -> bool;

    /// Bounding rectangle, `None` once the element is gone.
    fn bounding_rect(&self, element: ElementId) -> Option<Rect>;

    /// Current viewport.
    fn viewport(&self) -> Viewport;

    /// Insert or replace the wave rule for one element in the shared
    /// stylesheet.
    ///
    /// # Errors
    /// Returns error if the stylesheet rejects the write.
    fn write_rule(&self, element: ElementId, css: &str) -> Result<(), DomError>;

    /// Drop every wave rule.
    fn clear_rules(&self);

    /// Subscribe to structural and attribute mutations.
    fn observe_mutations(&self) -> broadcast::Receiver<DomMutation>;
}
