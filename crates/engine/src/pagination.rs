//! Adaptive pagination of plain text.
//!
//! The reading position is a character offset into the original text, which
//! survives reflows; page numbers are recomputed from it whenever the wrapped
//! lines change.

use std::time::{Duration, Instant};

use bookclub_core::{
    LayoutConfig, PaginationParams, PaginationTuning, Progress, ReflowAnchor, Settings,
};
use tracing::debug;

use crate::codec::WrappedLines;
use crate::measure::{TextMeasurer, measure_params};
use crate::timers::{Debouncer, earliest};
use crate::wrap::wrap_lines;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recalculation {
    /// Nothing measurable yet; retried on the next trigger.
    NotReady,
    /// Measured parameters match the current ones.
    Unchanged,
    Reflowed {
        params: PaginationParams,
        page: usize,
    },
}

#[derive(Debug, Clone)]
pub struct Paginator {
    content: String,
    content_len: usize,
    layout: LayoutConfig,
    tuning: PaginationTuning,
    anchor: ReflowAnchor,
    params: PaginationParams,
    lines: WrappedLines,
    current_page: usize,
    character_offset: usize,
    initialized: bool,
    init_delay: Duration,
    init_at: Option<Instant>,
    resize: Debouncer,
}

pub fn total_pages(line_count: usize, lines_per_page: usize) -> usize {
    line_count.div_ceil(lines_per_page.max(1)).max(1)
}

impl Paginator {
    pub fn new(
        content: impl Into<String>,
        layout: LayoutConfig,
        settings: &Settings,
        initial_offset: usize,
    ) -> Self {
        let content = content.into();
        let params = PaginationParams::default();
        let lines = WrappedLines::new(wrap_lines(&content, params.symbols_per_line));
        Self {
            content_len: content.chars().count(),
            content,
            layout,
            tuning: settings.tuning,
            anchor: settings.reflow_anchor,
            params,
            lines,
            current_page: 1,
            character_offset: initial_offset,
            initialized: false,
            init_delay: settings.timings.init_delay(),
            init_at: None,
            resize: Debouncer::new(settings.timings.resize_debounce()),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    pub fn params(&self) -> PaginationParams {
        self.params
    }

    pub fn lines(&self) -> &[String] {
        self.lines.lines()
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn total_pages(&self) -> usize {
        total_pages(self.lines.len(), self.params.lines_per_page)
    }

    pub fn character_offset(&self) -> usize {
        self.character_offset
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_reflow_anchor(&mut self, anchor: ReflowAnchor) {
        self.anchor = anchor;
    }

    /// Lines shown on the current page.
    pub fn page_lines(&self) -> &[String] {
        let lines = self.lines.lines();
        let per_page = self.params.lines_per_page.max(1);
        let start = ((self.current_page - 1) * per_page).min(lines.len());
        let end = (start + per_page).min(lines.len());
        &lines[start..end]
    }

    pub fn current_text(&self) -> String {
        collapse_blank_lines(self.page_lines())
    }

    pub fn wrapped_text(&self) -> String {
        collapse_blank_lines(self.lines.lines())
    }

    /// Schedules the first measurement once the container had time to settle.
    pub fn mount(&mut self, now: Instant) {
        if !self.initialized && !self.content.is_empty() {
            self.init_at = Some(now + self.init_delay);
        }
    }

    /// Drops pending timers.
    pub fn unmount(&mut self) {
        self.init_at = None;
        self.resize.cancel();
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        earliest(self.init_at, self.resize.deadline())
    }

    /// Container size changed; recalculation is debounced.
    pub fn on_resize(&mut self, container_width_px: f32, container_height_px: f32, now: Instant) {
        self.layout.container_width_px = container_width_px;
        self.layout.container_height_px = container_height_px;
        self.resize.trigger(now);
    }

    /// Runs due timers. Returns the recalculation outcome when one ran.
    pub fn poll(&mut self, now: Instant, measurer: &impl TextMeasurer) -> Option<Recalculation> {
        let mut outcome = None;
        if self.init_at.is_some_and(|at| now >= at) {
            self.init_at = None;
            outcome = Some(self.recalculate(measurer));
            self.initialized = true;
        }
        if self.resize.poll(now) {
            outcome = Some(self.recalculate(measurer));
        }
        outcome
    }

    /// Applies a font/column change; recalculates at once when initialized.
    pub fn set_layout(
        &mut self,
        layout: LayoutConfig,
        measurer: &impl TextMeasurer,
    ) -> Option<Recalculation> {
        self.layout = layout;
        self.initialized.then(|| self.recalculate(measurer))
    }

    pub fn set_font_size(
        &mut self,
        font_size_percent: u16,
        measurer: &impl TextMeasurer,
    ) -> Option<Recalculation> {
        let layout = LayoutConfig {
            font_size_percent,
            ..self.layout
        };
        self.set_layout(layout, measurer)
    }

    pub fn set_columns(
        &mut self,
        column_count: u16,
        measurer: &impl TextMeasurer,
    ) -> Option<Recalculation> {
        let layout = LayoutConfig {
            column_count,
            ..self.layout
        };
        self.set_layout(layout, measurer)
    }

    pub fn recalculate(&mut self, measurer: &impl TextMeasurer) -> Recalculation {
        if self.content.is_empty() {
            return Recalculation::NotReady;
        }
        let Some(params) = measure_params(&self.layout, &self.tuning, measurer) else {
            debug!("container not measurable yet; pagination deferred");
            return Recalculation::NotReady;
        };
        if params == self.params {
            return Recalculation::Unchanged;
        }

        let lines = WrappedLines::new(wrap_lines(&self.content, params.symbols_per_line));
        let per_page = params.lines_per_page.max(1);
        let line = lines.line_at(self.character_offset);
        let page = (line / per_page + 1).clamp(1, total_pages(lines.len(), per_page));

        self.character_offset = match self.anchor {
            ReflowAnchor::Page => lines.offset_of((page - 1) * per_page),
            ReflowAnchor::Line => self.character_offset,
        };
        debug!(
            symbols_per_line = params.symbols_per_line,
            lines_per_page = params.lines_per_page,
            page,
            offset = self.character_offset,
            "reflowed"
        );

        self.lines = lines;
        self.params = params;
        self.current_page = page;
        Recalculation::Reflowed { params, page }
    }

    pub fn go_to_page(&mut self, page: usize) {
        let page = page.clamp(1, self.total_pages());
        self.current_page = page;
        self.character_offset = self
            .lines
            .offset_of((page - 1) * self.params.lines_per_page.max(1));
    }

    pub fn go_to_prev_page(&mut self) {
        self.go_to_page(self.current_page.saturating_sub(1));
    }

    pub fn go_to_next_page(&mut self) {
        self.go_to_page(self.current_page + 1);
    }

    /// Jumps to the page holding a persisted offset. The offset itself is kept
    /// verbatim so later reflows start from the exact saved position.
    pub fn restore_position(&mut self, offset: i64) {
        if self.content.is_empty() || offset < 0 {
            return;
        }
        let offset = offset as usize;
        let line = self.lines.line_at(offset);
        let page = line / self.params.lines_per_page.max(1) + 1;
        self.current_page = page.clamp(1, self.total_pages());
        self.character_offset = offset;
    }

    /// Snapshot for persistence.
    pub fn progress(&self) -> Progress {
        let mut progress = Progress {
            current_page: u32::try_from(self.current_page).unwrap_or(u32::MAX),
            total_pages: u32::try_from(self.total_pages()).unwrap_or(u32::MAX),
            character_offset: self.character_offset,
            ..Progress::default()
        };
        let percent = progress.text_percent(self.content_len);
        progress.record_percent(percent);
        progress
    }
}

/// Joins lines with newlines, collapsing blank-line runs into one newline.
pub fn collapse_blank_lines(lines: &[String]) -> String {
    let joined = lines.join("\n");
    let mut out = String::with_capacity(joined.len());
    let mut prev_newline = false;
    for ch in joined.chars() {
        if ch == '\n' {
            if prev_newline {
                continue;
            }
            prev_newline = true;
        } else {
            prev_newline = false;
        }
        out.push(ch);
    }
    out
}
