//! Test helpers and fixtures.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use bookclub_core::{
    Annotation, AnnotationScope, ContentId, DEFAULT_HIGHLIGHT_COLOR, Locator, Settings,
};
use bookclub_engine::{
    DisplayTarget, EventBus, HighlightStyle, Location, RenderEngine, RenderError,
    SectionDocument, SpineItem, TextExtent, TextMeasurer, TextStyle,
};

/// One unit per character and per line, so container size is the text grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridMeasurer;

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

/// Settings without correction margins, for exact grid arithmetic.
pub fn make_settings(column_count: u16) -> Settings {
    let mut settings = Settings::default();
    settings.column_count = column_count;
    settings.tuning.width_margin = 1.0;
    settings.tuning.line_count_margin = 1.0;
    settings
}

/// `count` short lines, `"line 000"` onwards.
pub fn numbered_lines(count: usize) -> String {
    (0..count)
        .map(|i| format!("line {i:03}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn sample_prose() -> String {
    "It was the best of times, it was the worst of times, it was the age of wisdom, \
     it was the age of foolishness, it was the epoch of belief, it was the epoch of \
     incredulity, it was the season of Light, it was the season of Darkness, it was \
     the spring of hope, it was the winter of despair."
        .repeat(8)
}

pub fn annotation(id: i64, content: &str, locator: Locator) -> Annotation {
    Annotation {
        id,
        content_id: ContentId(content.to_string()),
        scope: AnnotationScope::Personal,
        locator,
        text: format!("comment {id}"),
        color: DEFAULT_HIGHLIGHT_COLOR.to_string(),
        owner: "tester".to_string(),
    }
}

/// Range CFI inside spine item `position`.
pub fn cfi_at(position: u32) -> Locator {
    Locator::Cfi(format!("epubcfi(/6/{position}!/4/2,/1:0,/1:8)"))
}

#[derive(Debug, Clone, Default)]
pub struct StaticSection {
    pub anchors: HashMap<String, String>,
}

impl SectionDocument for StaticSection {
    fn element_by_id(&self, id: &str) -> Option<String> {
        self.anchors.get(id).cloned()
    }

    fn element_by_name(&self, _name: &str) -> Option<String> {
        None
    }

    fn anchor_by_id(&self, _id: &str) -> Option<String> {
        None
    }
}

/// Render engine that records highlight and display calls.
#[derive(Default)]
pub struct RecordingEngine {
    pub bus: EventBus,
    pub displaying: Cell<bool>,
    pub location: RefCell<Option<String>>,
    pub spine: Vec<String>,
    pub sections: HashMap<String, StaticSection>,
    pub highlights: RefCell<Vec<(String, i64)>>,
    pub removals: RefCell<Vec<String>>,
    pub displayed: RefCell<Vec<DisplayTarget>>,
}

impl RecordingEngine {
    pub fn with_spine(hrefs: &[&str]) -> Self {
        Self {
            spine: hrefs.iter().map(|href| href.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn show(&self, cfi: &str) {
        self.displaying.set(true);
        *self.location.borrow_mut() = Some(cfi.to_string());
    }
}

impl RenderEngine for RecordingEngine {
    type Section = StaticSection;

    fn events(&self) -> &EventBus {
        &self.bus
    }

    fn is_displaying(&self) -> bool {
        self.displaying.get()
    }

    fn current_location(&self) -> Option<Location> {
        self.location.borrow().clone().map(|cfi| Location {
            start_cfi: Some(cfi),
            percentage: None,
        })
    }

    fn spine(&self) -> Vec<SpineItem> {
        self.spine
            .iter()
            .enumerate()
            .map(|(index, href)| SpineItem {
                index,
                href: href.clone(),
            })
            .collect()
    }

    fn highlight(
        &self,
        locator: &str,
        annotation_id: i64,
        _style_id: &str,
        _style: &HighlightStyle,
    ) -> Result<(), RenderError> {
        self.highlights
            .borrow_mut()
            .push((locator.to_string(), annotation_id));
        Ok(())
    }

    fn remove_highlight(&self, locator: &str, _style_id: &str) -> Result<(), RenderError> {
        self.removals.borrow_mut().push(locator.to_string());
        Ok(())
    }

    async fn load_section(&self, href: &str) -> Result<StaticSection, RenderError> {
        self.sections
            .get(href)
            .cloned()
            .ok_or_else(|| RenderError::SectionLoad(href.to_string()))
    }

    async fn display(&self, target: &DisplayTarget) -> Result<(), RenderError> {
        self.displayed.borrow_mut().push(target.clone());
        Ok(())
    }

    fn prev(&self) {}

    fn next(&self) {}

    fn resize(&self) {}

    fn set_font_size(&self, _percent: u16) {}
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    use super::*;
    use bookclub_application::{AppContext, ReaderSession};
    use bookclub_core::{NewAnnotation, ProgressStore};
    use bookclub_engine::{
        ChapterNavigator, HighlightSynchronizer, NavigationOutcome, Paginator, RenderEvent,
        line_index_to_offset, offset_to_line_index, total_pages, wrap_lines,
    };
    use bookclub_storage::Storage;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn wrap_scenarios() {
        assert_eq!(
            wrap_lines("The quick brown fox jumps over", 10),
            vec!["The quick", "brown fox", "jumps over"]
        );
        let chunks = wrap_lines("Supercalifragilisticexpialidocious", 10);
        let lengths: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
        assert_eq!(lengths, vec![10, 10, 10, 4]);
        assert_eq!(chunks.concat(), "Supercalifragilisticexpialidocious");
    }

    #[test]
    fn wrapped_lines_respect_limit_and_codec_round_trips() {
        let text = sample_prose();
        for max_len in [20, 33, 57, 80] {
            let lines = wrap_lines(&text, max_len);
            assert!(lines.iter().all(|l| l.chars().count() <= max_len));
            for index in 0..lines.len() {
                let offset = line_index_to_offset(&lines, index);
                assert_eq!(offset_to_line_index(&lines, offset), index);
            }
            assert_eq!(wrap_lines(&text, max_len), lines);
        }
    }

    #[test]
    fn page_count_matches_line_count() {
        let settings = make_settings(1);
        for (width, height) in [(30.0, 7.0), (45.0, 12.0), (80.0, 5.0)] {
            let mut paginator =
                Paginator::new(sample_prose(), settings.layout(width, height), &settings, 0);
            paginator.recalculate(&GridMeasurer);
            let params = paginator.params();
            let lines = wrap_lines(&sample_prose(), params.symbols_per_line);
            assert_eq!(
                paginator.total_pages(),
                total_pages(lines.len(), params.lines_per_page)
            );
        }
    }

    #[test]
    fn reflow_never_skips_the_first_line_of_the_page() {
        let settings = make_settings(1);
        let layouts = [(40.0, 10.0), (24.0, 6.0), (70.0, 15.0), (33.0, 9.0)];
        for (from, to) in layouts.iter().zip(layouts.iter().skip(1)) {
            for page in 1..=4 {
                let mut paginator =
                    Paginator::new(sample_prose(), settings.layout(from.0, from.1), &settings, 0);
                paginator.recalculate(&GridMeasurer);
                paginator.go_to_page(page);
                let first = paginator.character_offset();

                paginator.on_resize(to.0, to.1, Instant::now());
                paginator.recalculate(&GridMeasurer);

                let per_page = paginator.params().lines_per_page;
                let lines = paginator.lines();
                let start = (paginator.current_page() - 1) * per_page;
                let end = (start + per_page).min(lines.len());
                let page_start = line_index_to_offset(lines, start);
                let page_end = line_index_to_offset(lines, end);
                assert!(
                    page_start <= first && first <= page_end,
                    "offset {first} outside page {page_start}..{page_end}"
                );
            }
        }
    }

    #[test]
    fn highlight_only_current_spine_position() {
        let engine = Rc::new(RecordingEngine::default());
        engine.show("epubcfi(/6/2!/4/2/1:0)");
        let mut sync = HighlightSynchronizer::new(Rc::clone(&engine), Settings::default().timings);
        sync.set_annotations(
            vec![
                annotation(1, "book", cfi_at(2)),
                annotation(2, "book", cfi_at(5)),
            ],
            Instant::now(),
        );
        sync.apply();
        assert_eq!(
            *engine.highlights.borrow(),
            vec![("epubcfi(/6/2!/4/2,/1:0,/1:8)".to_string(), 1)]
        );
    }

    #[test]
    fn stale_retry_reads_live_annotation_set() {
        let t0 = Instant::now();
        let engine = Rc::new(RecordingEngine::default());
        engine.show("epubcfi(/6/4!/4)");
        let mut sync = HighlightSynchronizer::new(Rc::clone(&engine), Settings::default().timings);
        sync.set_annotations(vec![annotation(1, "book", cfi_at(4))], t0);

        engine.bus.emit(RenderEvent::Displayed);
        sync.poll(t0 + ms(10));
        sync.set_annotations(
            vec![
                annotation(1, "book", cfi_at(4)),
                annotation(2, "book", cfi_at(4)),
            ],
            t0 + ms(20),
        );
        let report = sync.poll(t0 + ms(170)).unwrap();
        assert_eq!(report.applied, 2);
    }

    #[tokio::test]
    async fn navigation_to_toc_anchor() {
        let mut engine = RecordingEngine::with_spine(&["OPS/intro.xhtml", "OPS/ch%201.xhtml"]);
        let mut section = StaticSection::default();
        section
            .anchors
            .insert("part-2".to_string(), "epubcfi(/6/4!/4/12)".to_string());
        engine.sections.insert("OPS/intro.xhtml".to_string(), section);
        let engine = Rc::new(engine);
        let nav = ChapterNavigator::new(Rc::clone(&engine));

        let outcome = nav.go_to("./intro.xhtml#part-2").await;
        assert_eq!(
            outcome,
            NavigationOutcome::Displayed(DisplayTarget::Cfi("epubcfi(/6/4!/4/12)".to_string()))
        );
        assert_eq!(nav.go_to("missing.xhtml").await, NavigationOutcome::NotFound);
        assert_eq!(engine.displayed.borrow().len(), 1);
    }

    #[test]
    fn reading_position_survives_reopen() -> anyhow::Result<()> {
        let storage = Storage::open_in_memory()?;
        let settings = make_settings(1);
        let id = ContentId("numbered.txt".to_string());
        let t0 = Instant::now();

        let mut session = ReaderSession::open(
            id.clone(),
            numbered_lines(100),
            settings.layout(40.0, 10.0),
            &settings,
            &storage,
        )?;
        session.mount(t0);
        session.poll(t0 + ms(100), &GridMeasurer, &storage)?;
        session.go_to_page(5, t0 + ms(200));
        session.poll(t0 + ms(1200), &GridMeasurer, &storage)?;
        let saved = storage.load_progress(&id)?.map(|p| p.current_page);
        assert_eq!(saved, Some(5));

        let mut reopened = ReaderSession::open(
            id.clone(),
            numbered_lines(100),
            settings.layout(40.0, 10.0),
            &settings,
            &storage,
        )?;
        reopened.mount(t0);
        reopened.poll(t0 + ms(100), &GridMeasurer, &storage)?;
        assert_eq!(reopened.paginator().current_page(), 5);
        Ok(())
    }

    #[test]
    fn stored_snippets_highlight_visible_page() -> anyhow::Result<()> {
        let storage = Storage::open_in_memory()?;
        let settings = make_settings(1);
        let id = ContentId("numbered.txt".to_string());
        let mut ctx = AppContext::new(settings.clone()).with_owner("tester");
        ctx.add_annotation(
            &storage,
            &NewAnnotation {
                content_id: id.clone(),
                scope: AnnotationScope::Personal,
                locator: Locator::Snippet("line 002".to_string()),
                text: "second".to_string(),
                color: "#FF0000".to_string(),
                owner: "tester".to_string(),
            },
        )?;

        let mut fresh = AppContext::new(settings.clone());
        fresh.refresh_annotations(&storage, &id)?;

        let t0 = Instant::now();
        let mut session = ReaderSession::open(
            id.clone(),
            numbered_lines(30),
            settings.layout(40.0, 10.0),
            &settings,
            &storage,
        )?;
        session.mount(t0);
        session.poll(t0 + ms(100), &GridMeasurer, &storage)?;
        let spans = session.page_highlights(fresh.annotations_for(&id));
        assert_eq!(spans.len(), 1);
        assert_eq!((spans[0].line, spans[0].start, spans[0].end), (2, 0, 8));

        session.next_page(t0 + ms(200));
        assert!(session.page_highlights(fresh.annotations_for(&id)).is_empty());
        Ok(())
    }
}
