//! Capability interface of a reflowable-document render engine.
//!
//! Components never own the engine's lifecycle. They hold a shared handle,
//! call the capability methods and observe engine events through
//! [`Subscription`]s, which detach themselves when dropped.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::rc::{Rc, Weak};

use thiserror::Error;

/// Style id under which annotation highlights are registered.
pub const HIGHLIGHT_STYLE_ID: &str = "highlight";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("locator `{0}` is not mounted")]
    NotMounted(String),
    #[error("section `{0}` failed to load")]
    SectionLoad(String),
    #[error("display failed: {0}")]
    Display(String),
    #[error("render engine error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
    pub start_cfi: Option<String>,
    pub percentage: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

/// Text selection reported by the engine, in the sub-document's coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionEvent {
    pub locator: String,
    pub text: String,
    pub rect: Rect,
    /// Position of the hosting frame in the page, when content lives in an
    /// embedded sub-document.
    pub frame_offset: Option<Point>,
    pub scroll_y: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    Displayed,
    Rendered,
    Relocated(Location),
    Selected(SelectionEvent),
    Click,
    HighlightClicked(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Displayed,
    Rendered,
    Relocated,
    Selected,
    Click,
    HighlightClicked,
}

impl RenderEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RenderEvent::Displayed => EventKind::Displayed,
            RenderEvent::Rendered => EventKind::Rendered,
            RenderEvent::Relocated(_) => EventKind::Relocated,
            RenderEvent::Selected(_) => EventKind::Selected,
            RenderEvent::Click => EventKind::Click,
            RenderEvent::HighlightClicked(_) => EventKind::HighlightClicked,
        }
    }
}

type EventQueue = Rc<RefCell<VecDeque<RenderEvent>>>;

struct Listener {
    id: u64,
    kinds: Vec<EventKind>,
    queue: EventQueue,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    listeners: Vec<Listener>,
}

/// Fan-out of engine events to subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Rc<RefCell<BusInner>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        let queue: EventQueue = Rc::default();
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.listeners.push(Listener {
            id,
            kinds: kinds.to_vec(),
            queue: Rc::clone(&queue),
        });
        Subscription {
            id,
            bus: Rc::downgrade(&self.inner),
            queue,
        }
    }

    pub fn emit(&self, event: RenderEvent) {
        let kind = event.kind();
        let inner = self.inner.borrow();
        for listener in inner.listeners.iter().filter(|l| l.kinds.contains(&kind)) {
            listener.queue.borrow_mut().push_back(event.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }
}

/// Registered interest in engine events. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    bus: Weak<RefCell<BusInner>>,
    queue: EventQueue,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    /// Takes all events received since the last drain, oldest first.
    pub fn drain(&self) -> Vec<RenderEvent> {
        self.queue.borrow_mut().drain(..).collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade()
            && let Ok(mut inner) = bus.try_borrow_mut()
        {
            inner.listeners.retain(|l| l.id != self.id);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HighlightStyle {
    pub fill: String,
    pub fill_opacity: f32,
}

impl HighlightStyle {
    pub fn with_fill(fill: &str) -> Self {
        Self {
            fill: fill.to_string(),
            fill_opacity: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    pub index: usize,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayTarget {
    Cfi(String),
    Href(String),
}

/// A loaded section document; lookups return the CFI of the matching element.
pub trait SectionDocument {
    fn element_by_id(&self, id: &str) -> Option<String>;
    fn element_by_name(&self, name: &str) -> Option<String>;
    fn anchor_by_id(&self, id: &str) -> Option<String>;
}

/// What the engine core needs from a reflowable-document renderer.
pub trait RenderEngine {
    type Section: SectionDocument;

    fn events(&self) -> &EventBus;

    /// True once content has been mounted at least once.
    fn is_displaying(&self) -> bool;

    fn current_location(&self) -> Option<Location>;

    fn spine(&self) -> Vec<SpineItem>;

    fn spine_item(&self, href: &str) -> Option<SpineItem> {
        self.spine().into_iter().find(|item| item.href == href)
    }

    fn highlight(
        &self,
        locator: &str,
        annotation_id: i64,
        style_id: &str,
        style: &HighlightStyle,
    ) -> Result<(), RenderError>;

    fn remove_highlight(&self, locator: &str, style_id: &str) -> Result<(), RenderError>;

    fn load_section(&self, href: &str) -> impl Future<Output = Result<Self::Section, RenderError>>;

    fn display(&self, target: &DisplayTarget) -> impl Future<Output = Result<(), RenderError>>;

    fn prev(&self);

    fn next(&self);

    fn resize(&self);

    fn set_font_size(&self, percent: u16);
}
