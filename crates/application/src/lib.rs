//! Application orchestration layer for Bookclub.

use std::collections::HashMap;
use std::time::Instant;

use bookclub_core::{
    Annotation, AnnotationScope, AnnotationStore, ContentId, LayoutConfig, NewAnnotation,
    Progress, ProgressStore, Settings,
};
use engine::timers::{Debouncer, earliest};
use engine::{LineSpan, Paginator, Recalculation, TextMeasurer, line_spans};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct AppContext {
    pub settings: Settings,
    pub owner: String,
    pub scope: AnnotationScope,
    pub annotations_by_content: HashMap<ContentId, Vec<Annotation>>,
    pub dirty_settings: bool,
}

impl AppContext {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            owner: String::new(),
            scope: AnnotationScope::Personal,
            annotations_by_content: HashMap::new(),
            dirty_settings: false,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_scope(mut self, scope: AnnotationScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn annotations_for(&self, content_id: &ContentId) -> &[Annotation] {
        self.annotations_by_content
            .get(content_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn update_settings(&mut self, update: impl FnOnce(&mut Settings)) {
        let before = self.settings.clone();
        update(&mut self.settings);
        self.settings.normalize();
        if self.settings != before {
            self.dirty_settings = true;
        }
    }

    /// Replaces the cached annotations of `content_id` with the store's list.
    pub fn refresh_annotations(
        &mut self,
        store: &impl AnnotationStore,
        content_id: &ContentId,
    ) -> anyhow::Result<&[Annotation]> {
        let list = store.list_annotations(content_id, self.scope)?;
        debug!(content = %content_id.as_str(), count = list.len(), "annotations loaded");
        let entry = self
            .annotations_by_content
            .entry(content_id.clone())
            .or_default();
        *entry = list;
        Ok(entry.as_slice())
    }

    pub fn add_annotation(
        &mut self,
        store: &impl AnnotationStore,
        new: &NewAnnotation,
    ) -> anyhow::Result<Annotation> {
        let created = store.create_annotation(new)?;
        info!(id = created.id, "annotation created");
        self.annotations_by_content
            .entry(created.content_id.clone())
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    pub fn edit_annotation(
        &mut self,
        store: &impl AnnotationStore,
        id: i64,
        text: &str,
        color: &str,
    ) -> anyhow::Result<()> {
        store.update_annotation(id, text, color)?;
        for list in self.annotations_by_content.values_mut() {
            if let Some(annotation) = list.iter_mut().find(|a| a.id == id) {
                annotation.text = text.to_string();
                annotation.color = color.to_string();
            }
        }
        Ok(())
    }

    pub fn remove_annotation(&mut self, store: &impl AnnotationStore, id: i64) -> anyhow::Result<()> {
        store.delete_annotation(id)?;
        for list in self.annotations_by_content.values_mut() {
            list.retain(|a| a.id != id);
        }
        Ok(())
    }
}

/// Debounced persistence of the reading position; writes only on change.
#[derive(Debug, Clone)]
pub struct ProgressSync {
    debouncer: Debouncer,
    saved: Option<Progress>,
    pending: Option<Progress>,
}

impl ProgressSync {
    pub fn new(settings: &Settings, saved: Option<Progress>) -> Self {
        Self {
            debouncer: Debouncer::new(settings.timings.progress_debounce()),
            saved,
            pending: None,
        }
    }

    pub fn record(&mut self, mut progress: Progress, now: Instant) {
        let latest = self.pending.as_ref().or(self.saved.as_ref());
        // completion is never revoked by paging back
        if latest.is_some_and(|latest| latest.is_completed) {
            progress.is_completed = true;
            progress.record_percent(progress.percent);
        }
        if latest.is_some_and(|latest| latest.same_position(&progress)) {
            return;
        }
        self.pending = Some(progress);
        self.debouncer.trigger(now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    pub fn saved(&self) -> Option<&Progress> {
        self.saved.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.pending.is_some()
    }

    /// Saves when the debounce window has elapsed. Returns whether it wrote.
    pub fn poll(
        &mut self,
        now: Instant,
        store: &impl ProgressStore,
        content_id: &ContentId,
    ) -> anyhow::Result<bool> {
        if !self.debouncer.poll(now) {
            return Ok(false);
        }
        self.write(store, content_id)
    }

    /// Saves any pending change immediately.
    pub fn flush(&mut self, store: &impl ProgressStore, content_id: &ContentId) -> anyhow::Result<bool> {
        self.debouncer.cancel();
        self.write(store, content_id)
    }

    fn write(&mut self, store: &impl ProgressStore, content_id: &ContentId) -> anyhow::Result<bool> {
        let Some(progress) = self.pending.take() else {
            return Ok(false);
        };
        store.save_progress(content_id, &progress)?;
        debug!(
            content = %content_id.as_str(),
            page = progress.current_page,
            total = progress.total_pages,
            "progress saved"
        );
        self.saved = Some(progress);
        Ok(true)
    }
}

/// One open plain-text book: pagination plus its persisted position.
#[derive(Debug)]
pub struct ReaderSession {
    content_id: ContentId,
    paginator: Paginator,
    progress: ProgressSync,
    restore: Option<i64>,
}

impl ReaderSession {
    pub fn open(
        content_id: ContentId,
        content: impl Into<String>,
        layout: LayoutConfig,
        settings: &Settings,
        store: &impl ProgressStore,
    ) -> anyhow::Result<Self> {
        let saved = store.load_progress(&content_id)?;
        let restore = saved
            .as_ref()
            .and_then(|p| i64::try_from(p.character_offset).ok());
        let paginator = Paginator::new(content, layout, settings, 0);
        Ok(Self {
            content_id,
            paginator,
            progress: ProgressSync::new(settings, saved),
            restore,
        })
    }

    pub fn content_id(&self) -> &ContentId {
        &self.content_id
    }

    pub fn paginator(&self) -> &Paginator {
        &self.paginator
    }

    pub fn progress_sync(&self) -> &ProgressSync {
        &self.progress
    }

    pub fn mount(&mut self, now: Instant) {
        self.paginator.mount(now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        earliest(self.paginator.next_deadline(), self.progress.next_deadline())
    }

    pub fn on_resize(&mut self, width: f32, height: f32, now: Instant) {
        self.paginator.on_resize(width, height, now);
    }

    /// Runs due pagination and persistence timers.
    pub fn poll(
        &mut self,
        now: Instant,
        measurer: &impl TextMeasurer,
        store: &impl ProgressStore,
    ) -> anyhow::Result<Option<Recalculation>> {
        let outcome = self.paginator.poll(now, measurer);
        if let Some(outcome) = outcome {
            self.after_recalculation(outcome, now);
        }
        self.progress.poll(now, store, &self.content_id)?;
        Ok(outcome)
    }

    fn after_recalculation(&mut self, outcome: Recalculation, now: Instant) {
        if outcome == Recalculation::NotReady || !self.paginator.is_initialized() {
            return;
        }
        if let Some(offset) = self.restore.take() {
            self.paginator.restore_position(offset);
            debug!(offset, page = self.paginator.current_page(), "position restored");
        }
        self.record(now);
    }

    fn record(&mut self, now: Instant) {
        if self.paginator.is_initialized() {
            self.progress.record(self.paginator.progress(), now);
        }
    }

    pub fn next_page(&mut self, now: Instant) {
        self.paginator.go_to_next_page();
        self.record(now);
    }

    pub fn prev_page(&mut self, now: Instant) {
        self.paginator.go_to_prev_page();
        self.record(now);
    }

    pub fn go_to_page(&mut self, page: usize, now: Instant) {
        self.paginator.go_to_page(page);
        self.record(now);
    }

    /// Applies font, column and reflow settings to the live pagination.
    pub fn apply_settings(&mut self, settings: &Settings, measurer: &impl TextMeasurer, now: Instant) {
        self.paginator.set_reflow_anchor(settings.reflow_anchor);
        let layout = LayoutConfig {
            font_size_percent: settings.font_size_percent,
            column_count: settings.column_count,
            column_gap_px: settings.column_gap_px,
            ..*self.paginator.layout()
        };
        if let Some(outcome) = self.paginator.set_layout(layout, measurer) {
            self.after_recalculation(outcome, now);
        }
    }

    /// Snippet highlights for the lines of the current page.
    pub fn page_highlights(&self, annotations: &[Annotation]) -> Vec<LineSpan> {
        line_spans(self.paginator.page_lines(), annotations)
    }

    pub fn close(&mut self, store: &impl ProgressStore) -> anyhow::Result<()> {
        self.paginator.unmount();
        self.progress.flush(store, &self.content_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::time::Duration;

    use super::*;
    use bookclub_core::Locator;
    use engine::{TextExtent, TextStyle};

    #[derive(Default)]
    struct MemoryStore {
        progress: RefCell<HashMap<ContentId, Progress>>,
        writes: RefCell<usize>,
        annotations: RefCell<Vec<Annotation>>,
    }

    impl ProgressStore for MemoryStore {
        fn load_progress(&self, content_id: &ContentId) -> anyhow::Result<Option<Progress>> {
            Ok(self.progress.borrow().get(content_id).cloned())
        }

        fn save_progress(&self, content_id: &ContentId, progress: &Progress) -> anyhow::Result<()> {
            *self.writes.borrow_mut() += 1;
            self.progress
                .borrow_mut()
                .insert(content_id.clone(), progress.clone());
            Ok(())
        }
    }

    impl AnnotationStore for MemoryStore {
        fn list_annotations(
            &self,
            content_id: &ContentId,
            scope: AnnotationScope,
        ) -> anyhow::Result<Vec<Annotation>> {
            Ok(self
                .annotations
                .borrow()
                .iter()
                .filter(|a| &a.content_id == content_id && a.scope == scope)
                .cloned()
                .collect())
        }

        fn create_annotation(&self, new: &NewAnnotation) -> anyhow::Result<Annotation> {
            let mut annotations = self.annotations.borrow_mut();
            let annotation = Annotation {
                id: annotations.len() as i64 + 1,
                content_id: new.content_id.clone(),
                scope: new.scope,
                locator: new.locator.clone(),
                text: new.text.clone(),
                color: new.color.clone(),
                owner: new.owner.clone(),
            };
            annotations.push(annotation.clone());
            Ok(annotation)
        }

        fn update_annotation(&self, id: i64, text: &str, color: &str) -> anyhow::Result<()> {
            if let Some(a) = self.annotations.borrow_mut().iter_mut().find(|a| a.id == id) {
                a.text = text.to_string();
                a.color = color.to_string();
            }
            Ok(())
        }

        fn delete_annotation(&self, id: i64) -> anyhow::Result<()> {
            self.annotations.borrow_mut().retain(|a| a.id != id);
            Ok(())
        }
    }

    struct GridMeasurer;

    impl TextMeasurer for GridMeasurer {
        fn computed_style(&self) -> TextStyle {
            TextStyle {
                column_gap_px: Some(0.0),
                ..TextStyle::default()
            }
        }

        fn measure_text(&self, _style: &TextStyle, sample: &str) -> TextExtent {
            TextExtent {
                width: sample.chars().count() as f32,
                height: 1.0,
            }
        }
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.column_count = 1;
        settings.tuning.width_margin = 1.0;
        settings.tuning.line_count_margin = 1.0;
        settings
    }

    fn content() -> String {
        (0..40)
            .map(|i| format!("row {i:02}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn book() -> ContentId {
        ContentId("book-1".to_string())
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn progress_is_saved_once_after_debounce() {
        let t0 = Instant::now();
        let store = MemoryStore::default();
        let settings = settings();
        let mut session =
            ReaderSession::open(book(), content(), settings.layout(30.0, 10.0), &settings, &store)
                .unwrap();
        session.mount(t0);
        session.poll(t0 + ms(100), &GridMeasurer, &store).unwrap();
        assert_eq!(session.paginator().total_pages(), 4);

        session.next_page(t0 + ms(200));
        session.next_page(t0 + ms(300));
        session.poll(t0 + ms(1200), &GridMeasurer, &store).unwrap();
        assert_eq!(*store.writes.borrow(), 0);
        session.poll(t0 + ms(1300), &GridMeasurer, &store).unwrap();
        assert_eq!(*store.writes.borrow(), 1);
        assert_eq!(store.load_progress(&book()).unwrap().unwrap().current_page, 3);

        // same position again is not a change
        session.go_to_page(3, t0 + ms(1400));
        assert!(!session.progress_sync().is_dirty());
    }

    #[test]
    fn saved_offset_is_restored_after_first_pagination() {
        let t0 = Instant::now();
        let store = MemoryStore::default();
        let saved = Progress {
            current_page: 3,
            total_pages: 4,
            character_offset: 185,
            ..Progress::default()
        };
        store.save_progress(&book(), &saved).unwrap();

        let settings = settings();
        let mut session =
            ReaderSession::open(book(), content(), settings.layout(30.0, 10.0), &settings, &store)
                .unwrap();
        session.mount(t0);
        session.poll(t0 + ms(100), &GridMeasurer, &store).unwrap();
        // "row NN" plus newline is 7 chars; offset 185 sits on row 26
        assert_eq!(session.paginator().current_page(), 3);
        assert_eq!(session.paginator().character_offset(), 185);
        assert!(!session.progress_sync().is_dirty());
    }

    #[test]
    fn close_flushes_pending_progress() {
        let t0 = Instant::now();
        let store = MemoryStore::default();
        let settings = settings();
        let mut session =
            ReaderSession::open(book(), content(), settings.layout(30.0, 10.0), &settings, &store)
                .unwrap();
        session.mount(t0);
        session.poll(t0 + ms(100), &GridMeasurer, &store).unwrap();
        session.next_page(t0 + ms(150));
        session.close(&store).unwrap();
        assert_eq!(store.load_progress(&book()).unwrap().unwrap().current_page, 2);
    }

    #[test]
    fn finished_book_stays_at_full_percent_when_paging_back() {
        let t0 = Instant::now();
        let store = MemoryStore::default();
        let finished = Progress {
            current_page: 4,
            total_pages: 4,
            character_offset: 200,
            percent: 100.0,
            is_completed: true,
            ..Progress::default()
        };
        let mut sync = ProgressSync::new(&settings(), Some(finished));

        let mut early = Progress {
            current_page: 1,
            total_pages: 4,
            character_offset: 10,
            ..Progress::default()
        };
        early.record_percent(5.0);
        sync.record(early, t0);
        assert!(sync.flush(&store, &book()).unwrap());

        let stored = store.load_progress(&book()).unwrap().unwrap();
        assert_eq!(stored.current_page, 1);
        assert!(stored.is_completed);
        assert_eq!(stored.percent, 100.0);
    }

    #[test]
    fn settings_changes_mark_dirty_only_when_effective() {
        let mut ctx = AppContext::new(Settings::default());
        ctx.update_settings(|s| s.column_count = 2);
        assert!(!ctx.dirty_settings);
        ctx.update_settings(|s| s.increase_font_size());
        assert!(ctx.dirty_settings);
        assert_eq!(ctx.settings.font_size_percent, 110);
    }

    #[test]
    fn annotation_cache_follows_store() {
        let store = MemoryStore::default();
        let mut ctx = AppContext::new(Settings::default()).with_owner("reader");
        let new = NewAnnotation {
            content_id: book(),
            scope: AnnotationScope::Personal,
            locator: Locator::Snippet("row 01".to_string()),
            text: "first".to_string(),
            color: "#FFFF00".to_string(),
            owner: ctx.owner.clone(),
        };
        let created = ctx.add_annotation(&store, &new).unwrap();
        assert_eq!(ctx.annotations_for(&book()).len(), 1);

        ctx.edit_annotation(&store, created.id, "edited", "#00FF00").unwrap();
        assert_eq!(ctx.annotations_for(&book())[0].text, "edited");

        ctx.remove_annotation(&store, created.id).unwrap();
        assert!(ctx.annotations_for(&book()).is_empty());

        let listed = ctx.refresh_annotations(&store, &book()).unwrap();
        assert!(listed.is_empty());
    }
}
