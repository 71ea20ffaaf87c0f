//! Keeps stored annotations highlighted in the rendered section.
//!
//! The render engine mounts content asynchronously and silently ignores
//! highlight calls issued too early, so every trigger schedules an apply pass
//! after an initial delay followed by a fixed number of retries. Each pass
//! reads live state: the engine's current location and the latest
//! annotation set.

use std::rc::Rc;
use std::time::{Duration, Instant};

use bookclub_core::{Annotation, Locator, Timings};
use tracing::{debug, trace};

use crate::cfi;
use crate::render::{
    EventKind, HIGHLIGHT_STYLE_ID, HighlightStyle, RenderEngine, RenderEvent, Subscription,
};
use crate::timers::TaskQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No content displayed yet; annotation changes are only stored.
    Unbound,
    Ready,
}

/// Outcome of one apply pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub applied: usize,
    /// Snippet locators and annotations outside the current section.
    pub skipped: usize,
    pub rejected: usize,
    pub malformed: usize,
}

pub struct HighlightSynchronizer<R: RenderEngine> {
    engine: Rc<R>,
    subscription: Subscription,
    timings: Timings,
    state: SyncState,
    annotations: Vec<Annotation>,
    applied: Vec<String>,
    active: Option<i64>,
    passes: TaskQueue<()>,
}

impl<R: RenderEngine> HighlightSynchronizer<R> {
    pub fn new(engine: Rc<R>, timings: Timings) -> Self {
        let subscription = engine.events().subscribe(&[
            EventKind::Displayed,
            EventKind::Rendered,
            EventKind::Relocated,
            EventKind::HighlightClicked,
        ]);
        let state = if engine.is_displaying() {
            SyncState::Ready
        } else {
            SyncState::Unbound
        };
        Self {
            engine,
            subscription,
            timings,
            state,
            annotations: Vec::new(),
            applied: Vec::new(),
            active: None,
            passes: TaskQueue::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Locators highlighted by the last pass.
    pub fn applied(&self) -> &[String] {
        &self.applied
    }

    /// Annotation whose highlight was clicked last.
    pub fn active_annotation(&self) -> Option<i64> {
        self.active
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    pub fn set_annotations(&mut self, annotations: Vec<Annotation>, now: Instant) {
        self.annotations = annotations;
        if self.state == SyncState::Ready {
            self.schedule(self.timings.highlight_annotations_delay_ms, now);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.passes.next_deadline()
    }

    pub fn pending_passes(&self) -> usize {
        self.passes.len()
    }

    /// Handles engine events and runs due passes. Returns the report of the
    /// last pass that ran.
    pub fn poll(&mut self, now: Instant) -> Option<PassReport> {
        for event in self.subscription.drain() {
            match event {
                RenderEvent::Displayed | RenderEvent::Rendered => {
                    self.state = SyncState::Ready;
                    self.schedule(self.timings.highlight_display_delay_ms, now);
                }
                RenderEvent::Relocated(_) => {
                    self.state = SyncState::Ready;
                    self.schedule(self.timings.highlight_relocate_delay_ms, now);
                }
                RenderEvent::HighlightClicked(id) => self.active = Some(id),
                RenderEvent::Selected(_) | RenderEvent::Click => {}
            }
        }

        let due = self.passes.take_due(now);
        let mut report = None;
        for () in due {
            report = Some(self.apply());
        }
        report
    }

    /// Starts a fresh pass chain, superseding any chain still pending.
    fn schedule(&mut self, delay_ms: u64, now: Instant) {
        self.passes.supersede();
        let first = now + Duration::from_millis(delay_ms);
        self.passes.schedule(first, ());
        let step = Duration::from_millis(self.timings.highlight_retry_step_ms);
        for attempt in 1..=self.timings.highlight_retries {
            self.passes.schedule(first + step * attempt, ());
        }
        trace!(delay_ms, retries = self.timings.highlight_retries, "highlight pass scheduled");
    }

    /// Clears highlights added earlier and re-applies those for the current
    /// section.
    pub fn apply(&mut self) -> PassReport {
        self.remove_applied();

        let current = self
            .engine
            .current_location()
            .and_then(|location| location.start_cfi)
            .and_then(|start| cfi::spine_position(&start));

        let mut report = PassReport::default();
        for annotation in &self.annotations {
            let Locator::Cfi(locator) = &annotation.locator else {
                report.skipped += 1;
                continue;
            };
            let Some(position) = cfi::spine_position(locator) else {
                debug!(id = annotation.id, locator = %locator, "malformed annotation locator");
                report.malformed += 1;
                continue;
            };
            if Some(position) != current {
                report.skipped += 1;
                continue;
            }

            let style = HighlightStyle::with_fill(&annotation.color);
            match self
                .engine
                .highlight(locator, annotation.id, HIGHLIGHT_STYLE_ID, &style)
            {
                Ok(()) => {
                    self.applied.push(locator.clone());
                    report.applied += 1;
                }
                Err(err) => {
                    debug!(id = annotation.id, error = %err, "highlight rejected");
                    report.rejected += 1;
                }
            }
        }
        report
    }

    fn remove_applied(&mut self) {
        for locator in self.applied.drain(..) {
            if let Err(err) = self.engine.remove_highlight(&locator, HIGHLIGHT_STYLE_ID) {
                debug!(locator = %locator, error = %err, "highlight removal failed");
            }
        }
    }

    /// Drops pending passes and removes every highlight this instance added.
    pub fn unmount(&mut self) {
        self.passes.clear();
        self.remove_applied();
    }
}

impl<R: RenderEngine> Drop for HighlightSynchronizer<R> {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Location;
    use crate::render::fake::{Call, FakeEngine};
    use bookclub_core::{AnnotationScope, ContentId};

    fn annotation(id: i64, locator: Locator) -> Annotation {
        Annotation {
            id,
            content_id: ContentId("book".to_string()),
            scope: AnnotationScope::Personal,
            locator,
            text: format!("note {id}"),
            color: "#FFFF00".to_string(),
            owner: "reader".to_string(),
        }
    }

    fn cfi(position: u32) -> Locator {
        Locator::Cfi(format!("epubcfi(/6/{position}!/4/2,/1:0,/1:5)"))
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn only_current_section_is_highlighted() {
        let engine = Rc::new(FakeEngine::default());
        engine.displaying.set(true);
        engine.set_location("epubcfi(/6/2!/4/2/1:0)");
        let mut sync = HighlightSynchronizer::new(Rc::clone(&engine), Timings::default());

        sync.set_annotations(vec![annotation(1, cfi(2)), annotation(2, cfi(5))], Instant::now());
        let report = sync.apply();

        assert_eq!(report.applied, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            engine.highlight_calls(),
            vec![("epubcfi(/6/2!/4/2,/1:0,/1:5)".to_string(), 1)]
        );
    }

    #[test]
    fn unbound_until_content_is_displayed() {
        let t0 = Instant::now();
        let engine = Rc::new(FakeEngine::default());
        let mut sync = HighlightSynchronizer::new(Rc::clone(&engine), Timings::default());
        assert_eq!(sync.state(), SyncState::Unbound);

        sync.set_annotations(vec![annotation(1, cfi(2))], t0);
        assert_eq!(sync.pending_passes(), 0);

        engine.set_location("epubcfi(/6/2!/4)");
        engine.bus.emit(RenderEvent::Displayed);
        assert!(sync.poll(t0).is_none());
        assert_eq!(sync.state(), SyncState::Ready);
        // first pass plus three retries
        assert_eq!(sync.pending_passes(), 4);
        assert_eq!(sync.next_deadline(), Some(t0 + ms(250)));

        let report = sync.poll(t0 + ms(250)).unwrap();
        assert_eq!(report.applied, 1);
    }

    #[test]
    fn retries_follow_linear_schedule() {
        let t0 = Instant::now();
        let engine = Rc::new(FakeEngine::default());
        engine.displaying.set(true);
        engine.set_location("epubcfi(/6/4!/4)");
        let mut sync = HighlightSynchronizer::new(Rc::clone(&engine), Timings::default());
        sync.set_annotations(vec![annotation(7, cfi(4))], t0);

        let mut ran_at = Vec::new();
        for step in 0..=1200u64 {
            if step % 50 != 0 {
                continue;
            }
            if sync.poll(t0 + ms(step)).is_some() {
                ran_at.push(step);
            }
        }
        assert_eq!(ran_at, vec![150, 450, 750, 1050]);
        // each pass clears the previous highlight before adding it again
        assert_eq!(engine.highlight_calls().len(), 4);
        let removals = engine
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Remove(_)))
            .count();
        assert_eq!(removals, 3);
    }

    #[test]
    fn relocation_supersedes_pending_chain() {
        let t0 = Instant::now();
        let engine = Rc::new(FakeEngine::default());
        engine.displaying.set(true);
        engine.set_location("epubcfi(/6/2!/4)");
        let mut sync = HighlightSynchronizer::new(Rc::clone(&engine), Timings::default());
        sync.set_annotations(vec![annotation(1, cfi(2)), annotation(2, cfi(6))], t0);

        engine.set_location("epubcfi(/6/6!/4)");
        engine.bus.emit(RenderEvent::Relocated(Location {
            start_cfi: Some("epubcfi(/6/6!/4)".to_string()),
            percentage: Some(0.5),
        }));
        sync.poll(t0 + ms(100));
        assert_eq!(sync.pending_passes(), 4);
        assert_eq!(sync.next_deadline(), Some(t0 + ms(300)));

        assert!(sync.poll(t0 + ms(299)).is_none());
        let report = sync.poll(t0 + ms(300)).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(sync.applied(), ["epubcfi(/6/6!/4/2,/1:0,/1:5)".to_string()]);
    }

    #[test]
    fn failures_do_not_abort_the_pass() {
        let engine = Rc::new(FakeEngine::default());
        engine.displaying.set(true);
        engine.set_location("epubcfi(/6/2!/4)");
        let broken = "epubcfi(/6/2!/4/8,/1:0,/1:5)".to_string();
        engine.rejected.borrow_mut().insert(broken.clone());
        let mut sync = HighlightSynchronizer::new(Rc::clone(&engine), Timings::default());
        sync.set_annotations(
            vec![
                annotation(1, Locator::Cfi(broken)),
                annotation(2, Locator::Cfi("not a cfi".to_string())),
                annotation(3, cfi(2)),
                annotation(4, Locator::Snippet("plain text".to_string())),
            ],
            Instant::now(),
        );

        let report = sync.apply();
        assert_eq!(
            report,
            PassReport {
                applied: 1,
                skipped: 1,
                rejected: 1,
                malformed: 1,
            }
        );
    }

    #[test]
    fn missing_location_matches_nothing() {
        let engine = Rc::new(FakeEngine::default());
        engine.displaying.set(true);
        let mut sync = HighlightSynchronizer::new(Rc::clone(&engine), Timings::default());
        sync.set_annotations(vec![annotation(1, cfi(2))], Instant::now());
        assert_eq!(sync.apply().applied, 0);
        assert!(engine.highlight_calls().is_empty());
    }

    #[test]
    fn highlight_click_sets_active_annotation() {
        let engine = Rc::new(FakeEngine::default());
        let mut sync = HighlightSynchronizer::new(Rc::clone(&engine), Timings::default());
        engine.bus.emit(RenderEvent::HighlightClicked(42));
        sync.poll(Instant::now());
        assert_eq!(sync.active_annotation(), Some(42));
        sync.clear_active();
        assert_eq!(sync.active_annotation(), None);
    }

    #[test]
    fn drop_removes_highlights_and_listener() {
        let engine = Rc::new(FakeEngine::default());
        engine.displaying.set(true);
        engine.set_location("epubcfi(/6/2!/4)");
        let mut sync = HighlightSynchronizer::new(Rc::clone(&engine), Timings::default());
        sync.set_annotations(vec![annotation(1, cfi(2))], Instant::now());
        sync.apply();
        assert_eq!(engine.bus.listener_count(), 1);

        drop(sync);
        assert_eq!(engine.bus.listener_count(), 0);
        assert_eq!(
            engine.calls().last(),
            Some(&Call::Remove("epubcfi(/6/2!/4/2,/1:0,/1:5)".to_string()))
        );
    }
}
