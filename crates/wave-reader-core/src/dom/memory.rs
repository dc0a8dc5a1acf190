//! In-memory document.
//!
//! Supports compound selectors (`tag`, `#id`, `.class`, `*` and
//! combinations such as `p.lead`) joined by commas. Useful for tests and
//! the simulator; a host binding uses the real page.

use std::{
    collections::BTreeMap,
    sync::{PoisonError, RwLock},
};

use tokio::sync::broadcast;

use super::{Document, DomError, DomMutation, ElementId, Rect, Viewport};
use crate::validate_selector;

/// Element stored by [`MemoryDocument`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryElement {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub rect: Rect,
}

impl MemoryElement {
    #[must_use]
    pub fn new(tag: &str, rect: Rect) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            id: None,
            classes: Vec::new(),
            rect,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    #[must_use]
    pub fn with_class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }
}

#[derive(Debug, Default, PartialEq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

impl Compound {
    fn matches(&self, element: &MemoryElement) -> bool {
        self.tag.as_ref().is_none_or(|tag| *tag == element.tag)
            && self.id.as_ref().is_none_or(|id| element.id.as_ref() == Some(id))
            && self.classes.iter().all(|c| element.classes.contains(c))
    }
}

fn parse_selector(selector: &str) -> Result<Vec<Compound>, DomError> {
    let selector = validate_selector(selector)?;
    selector.split(',').map(|part| parse_compound(part.trim())).collect()
}

fn parse_compound(part: &str) -> Result<Compound, DomError> {
    let unsupported = || DomError::Unsupported(part.to_string());
    let mut compound = Compound::default();
    let mut rest = part;

    let tag_end = rest.find(['.', '#']).unwrap_or(rest.len());
    let tag = &rest[..tag_end];
    if tag != "*" && !tag.is_empty() {
        if !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(unsupported());
        }
        compound.tag = Some(tag.to_ascii_lowercase());
    }
    rest = &rest[tag_end..];

    while let Some(marker) = rest.chars().next() {
        let body = &rest[1..];
        let end = body.find(['.', '#']).unwrap_or(body.len());
        let name = &body[..end];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(unsupported());
        }
        match marker {
            '.' => compound.classes.push(name.to_string()),
            '#' if compound.id.is_none() => compound.id = Some(name.to_string()),
            _ => return Err(unsupported()),
        }
        rest = &body[end..];
    }
    Ok(compound)
}

#[derive(Default)]
struct DocState {
    elements: BTreeMap<ElementId, MemoryElement>,
    next_id: ElementId,
    rules: BTreeMap<ElementId, String>,
    failing_writes: u32,
    write_attempts: u64,
    attached: bool,
}

/// Document held entirely in memory.
pub struct MemoryDocument {
    state: RwLock<DocState>,
    viewport: RwLock<Viewport>,
    mutations: broadcast::Sender<DomMutation>,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new(Viewport::new(1280.0, 800.0))
    }
}

impl MemoryDocument {
    /// Create an empty document.
    #[must_use]
    pub fn new(viewport: Viewport) -> Self {
        let (mutations, _) = broadcast::channel(256);
        Self {
            state: RwLock::new(DocState {
                attached: true,
                ..DocState::default()
            }),
            viewport: RwLock::new(viewport),
            mutations,
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DocState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DocState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an element as part of the initial page, without notifying
    /// observers.
    pub fn add(&self, element: MemoryElement) -> ElementId {
        let mut state = self.write();
        let id = state.next_id;
        state.next_id += 1;
        state.elements.insert(id, element);
        id
    }

    /// Insert an element and notify structural observers.
    pub fn insert(&self, element: MemoryElement) -> ElementId {
        let id = self.add(element);
        let _ = self.mutations.send(DomMutation::NodesInserted(vec![id]));
        id
    }

    /// Remove an element.
    pub fn remove(&self, element: ElementId) {
        let mut state = self.write();
        state.elements.remove(&element);
        state.rules.remove(&element);
    }

    /// Change an attribute and notify attribute observers. `class` and `id`
    /// update the element; other attributes only notify.
    pub fn set_attribute(&self, element: ElementId, attribute: &str, value: &str) {
        {
            let mut state = self.write();
            let Some(el) = state.elements.get_mut(&element) else {
                return;
            };
            match attribute {
                "class" => el.classes = value.split_whitespace().map(str::to_string).collect(),
                "id" => el.id = Some(value.to_string()),
                _ => {}
            }
        }
        let _ = self.mutations.send(DomMutation::AttributeChanged {
            element,
            attribute: attribute.to_string(),
        });
    }

    /// Move or resize an element.
    pub fn set_rect(&self, element: ElementId, rect: Rect) {
        if let Some(el) = self.write().elements.get_mut(&element) {
            el.rect = rect;
        }
    }

    /// Resize the viewport.
    pub fn set_viewport(&self, viewport: Viewport) {
        *self.viewport.write().unwrap_or_else(PoisonError::into_inner) = viewport;
    }

    /// Make the next `count` stylesheet writes fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.write().failing_writes = count;
    }

    /// Make every write fail until reattached, as a detached document does.
    pub fn detach(&self) {
        self.write().attached = false;
    }

    /// Rule currently written for `element`.
    #[must_use]
    pub fn rule(&self, element: ElementId) -> Option<String> {
        self.read().rules.get(&element).cloned()
    }

    /// Number of rules in the stylesheet.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.read().rules.len()
    }

    /// Stylesheet writes attempted so far, failed ones included.
    #[must_use]
    pub fn write_attempts(&self) -> u64 {
        self.read().write_attempts
    }
}

impl Document for MemoryDocument {
    fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementId>, DomError> {
        let compounds = parse_selector(selector)?;
        Ok(self
            .read()
            .elements
            .iter()
            .filter(|(_, el)| compounds.iter().any(|c| c.matches(el)))
            .map(|(id, _)| *id)
            .collect())
    }

    fn matches(&self, element: ElementId, selector: &str) -> bool {
        let Ok(compounds) = parse_selector(selector) else {
            return false;
        };
        self.read()
            .elements
            .get(&element)
            .is_some_and(|el| compounds.iter().any(|c| c.matches(el)))
    }

    fn bounding_rect(&self, element: ElementId) -> Option<Rect> {
        self.read().elements.get(&element).map(|el| el.rect)
    }

    fn viewport(&self) -> Viewport {
        *self.viewport.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_rule(&self, element: ElementId, css: &str) -> Result<(), DomError> {
        let mut state = self.write();
        state.write_attempts += 1;
        if !state.attached {
            return Err(DomError::Detached);
        }
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(DomError::StyleWrite("stylesheet rejected rule".to_string()));
        }
        state.rules.insert(element, css.to_string());
        Ok(())
    }

    fn clear_rules(&self) {
        self.write().rules.clear();
    }

    fn observe_mutations(&self) -> broadcast::Receiver<DomMutation> {
        self.mutations.subscribe()
    }
}
