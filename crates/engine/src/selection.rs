//! Turns text selections into pending annotation requests.

use bookclub_core::{AnnotationScope, ContentId, DEFAULT_HIGHLIGHT_COLOR, Locator, NewAnnotation};

use crate::render::{EventBus, EventKind, Point, Rect, RenderEvent, SelectionEvent, Subscription};

#[derive(Debug, Clone, PartialEq)]
pub struct PendingSelection {
    pub locator: Locator,
    pub text: String,
}

#[derive(Debug)]
pub struct SelectionCapturer {
    subscription: Option<Subscription>,
    pending: Option<PendingSelection>,
    button: Option<Point>,
}

impl SelectionCapturer {
    pub fn attach(bus: &EventBus) -> Self {
        Self {
            subscription: Some(bus.subscribe(&[EventKind::Selected, EventKind::Click])),
            pending: None,
            button: None,
        }
    }

    /// Capturer without a render engine, fed through [`capture_plain`].
    ///
    /// [`capture_plain`]: Self::capture_plain
    pub fn detached() -> Self {
        Self {
            subscription: None,
            pending: None,
            button: None,
        }
    }

    /// Processes queued selection and click events.
    pub fn poll(&mut self) {
        let events = self
            .subscription
            .as_ref()
            .map(Subscription::drain)
            .unwrap_or_default();
        for event in events {
            match event {
                RenderEvent::Selected(selection) => self.capture(selection),
                RenderEvent::Click => self.clear(),
                _ => {}
            }
        }
    }

    pub fn capture(&mut self, selection: SelectionEvent) {
        let text = selection.text.trim();
        if text.is_empty() {
            return;
        }
        let frame = selection.frame_offset.unwrap_or_default();
        self.button = Some(popup_point(selection.rect, frame, selection.scroll_y));
        self.pending = Some(PendingSelection {
            locator: Locator::Cfi(selection.locator),
            text: text.to_string(),
        });
    }

    /// Selection made in a plain-text page; the snippet is its own locator.
    pub fn capture_plain(&mut self, text: &str, rect: Rect, scroll_y: f32) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.button = Some(popup_point(rect, Point::default(), scroll_y));
        self.pending = Some(PendingSelection {
            locator: Locator::Snippet(text.to_string()),
            text: text.to_string(),
        });
    }

    pub fn pending(&self) -> Option<&PendingSelection> {
        self.pending.as_ref()
    }

    /// Where the "add comment" button should appear, when it is shown.
    pub fn button(&self) -> Option<Point> {
        self.button
    }

    /// Hides the button but keeps the selection for an open comment form.
    pub fn hide(&mut self) {
        self.button = None;
    }

    pub fn clear(&mut self) {
        self.pending = None;
        self.button = None;
    }

    /// Consumes the pending selection into a create request.
    pub fn take_request(
        &mut self,
        content_id: &ContentId,
        scope: AnnotationScope,
        comment: &str,
        owner: &str,
    ) -> Option<NewAnnotation> {
        let pending = self.pending.take()?;
        self.button = None;
        Some(NewAnnotation {
            content_id: content_id.clone(),
            scope,
            locator: pending.locator,
            text: comment.trim().to_string(),
            color: DEFAULT_HIGHLIGHT_COLOR.to_string(),
            owner: owner.to_string(),
        })
    }
}

/// Centre of the selection's top edge, in host-page coordinates.
fn popup_point(rect: Rect, frame: Point, scroll_y: f32) -> Point {
    Point {
        x: frame.x + rect.left + rect.width / 2.0,
        y: frame.y + rect.top + scroll_y,
    }
}
