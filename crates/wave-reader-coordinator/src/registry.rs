//! Known selectors and the current one.

use serde::{Deserialize, Serialize};

/// Ordered, deduplicated selector list plus the current selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorRegistry {
    selectors: Vec<String>,
    current: Option<String>,
}

impl SelectorRegistry {
    #[must_use]
    pub fn new(selectors: Vec<String>, current: Option<String>) -> Self {
        let mut registry = Self { selectors: Vec::new(), current };
        for selector in selectors {
            registry.add(&selector);
        }
        registry
    }

    #[must_use]
    pub fn selectors(&self) -> &[String] {
        &self.selectors
    }

    #[must_use]
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Append unless already present. Returns whether it was added.
    pub fn add(&mut self, selector: &str) -> bool {
        if self.contains(selector) {
            return false;
        }
        self.selectors.push(selector.to_string());
        true
    }

    /// Remove a selector, clearing the current one if it was that.
    /// Returns whether it was present.
    pub fn remove(&mut self, selector: &str) -> bool {
        let before = self.selectors.len();
        self.selectors.retain(|s| s != selector);
        if self.current.as_deref() == Some(selector) {
            self.current = None;
        }
        self.selectors.len() != before
    }

    pub fn set_current(&mut self, selector: &str) {
        self.current = Some(selector.to_string());
    }

    /// Make `selector` current and remember it.
    pub fn confirm(&mut self, selector: &str) {
        self.set_current(selector);
        self.add(selector);
    }

    #[must_use]
    pub fn contains(&self, selector: &str) -> bool {
        self.selectors.iter().any(|s| s == selector)
    }

    pub fn clear(&mut self) {
        self.selectors.clear();
        self.current = None;
    }
}
