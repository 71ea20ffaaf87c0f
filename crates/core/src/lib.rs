//! Core domain types for Bookclub.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const MIN_FONT_SIZE_PERCENT: u16 = 50;
pub const MAX_FONT_SIZE_PERCENT: u16 = 200;
pub const FONT_SIZE_STEP_PERCENT: u16 = 10;
pub const MAX_COLUMN_COUNT: u16 = 4;
pub const DEFAULT_HIGHLIGHT_COLOR: &str = "#FFFF00";

/// Progress at or above this percentage marks a book as completed.
pub const COMPLETION_THRESHOLD_PERCENT: f32 = 95.0;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentId(pub String);

impl ContentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub font_size_percent: u16,
    pub column_count: u16,
    pub column_gap_px: f32,
    pub reflow_anchor: ReflowAnchor,
    pub tuning: PaginationTuning,
    pub timings: Timings,
}

/// Where the reading position lands after a reflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReflowAnchor {
    /// Snap to the first line of the page that contains the old position.
    Page,
    /// Keep the exact character offset; only the page number follows it.
    Line,
}

impl ReflowAnchor {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReflowAnchor::Page => "page",
            ReflowAnchor::Line => "line",
        }
    }
}

impl std::fmt::Display for ReflowAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReflowAnchor {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "page" => Ok(ReflowAnchor::Page),
            "line" => Ok(ReflowAnchor::Line),
            _ => Err("unknown reflow anchor"),
        }
    }
}

/// Heuristic correction factors applied when turning glyph metrics into
/// pagination parameters.
///
/// `width_margin` keeps logical lines strictly inside the rendering column so
/// that the renderer's own word wrapping never produces short orphaned tails.
/// `line_count_margin` accounts for word-boundary wrapping producing slightly
/// more visual lines than a plain division predicts. Both were tuned for one
/// rendering surface and need re-deriving for others.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationTuning {
    pub width_margin: f32,
    pub line_count_margin: f32,
    pub min_symbols_per_line: usize,
    pub min_lines_per_column: usize,
}

impl Default for PaginationTuning {
    fn default() -> Self {
        Self {
            width_margin: 0.85,
            line_count_margin: 0.97,
            min_symbols_per_line: 20,
            min_lines_per_column: 5,
        }
    }
}

impl PaginationTuning {
    pub fn normalize(&mut self) {
        if !self.width_margin.is_finite() || self.width_margin <= 0.0 {
            self.width_margin = Self::default().width_margin;
        }
        if !self.line_count_margin.is_finite() || self.line_count_margin <= 0.0 {
            self.line_count_margin = Self::default().line_count_margin;
        }
        self.width_margin = self.width_margin.min(1.0);
        self.line_count_margin = self.line_count_margin.min(1.0);
        self.min_symbols_per_line = self.min_symbols_per_line.max(1);
        self.min_lines_per_column = self.min_lines_per_column.max(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub resize_debounce_ms: u64,
    pub init_delay_ms: u64,
    pub progress_debounce_ms: u64,
    pub highlight_display_delay_ms: u64,
    pub highlight_relocate_delay_ms: u64,
    pub highlight_annotations_delay_ms: u64,
    pub highlight_retry_step_ms: u64,
    pub highlight_retries: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            resize_debounce_ms: 150,
            init_delay_ms: 100,
            progress_debounce_ms: 1000,
            highlight_display_delay_ms: 250,
            highlight_relocate_delay_ms: 200,
            highlight_annotations_delay_ms: 150,
            highlight_retry_step_ms: 300,
            highlight_retries: 3,
        }
    }
}

impl Timings {
    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }

    pub fn init_delay(&self) -> Duration {
        Duration::from_millis(self.init_delay_ms)
    }

    pub fn progress_debounce(&self) -> Duration {
        Duration::from_millis(self.progress_debounce_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            font_size_percent: 100,
            column_count: 2,
            column_gap_px: 40.0,
            reflow_anchor: ReflowAnchor::Page,
            tuning: PaginationTuning::default(),
            timings: Timings::default(),
        }
    }
}

impl Settings {
    pub fn normalize(&mut self) {
        self.font_size_percent = self
            .font_size_percent
            .clamp(MIN_FONT_SIZE_PERCENT, MAX_FONT_SIZE_PERCENT);
        self.column_count = self.column_count.clamp(1, MAX_COLUMN_COUNT);
        if !self.column_gap_px.is_finite() || self.column_gap_px < 0.0 {
            self.column_gap_px = 0.0;
        }
        self.tuning.normalize();
        self.timings.highlight_retries = self.timings.highlight_retries.min(10);
    }

    pub fn increase_font_size(&mut self) {
        self.font_size_percent = self
            .font_size_percent
            .saturating_add(FONT_SIZE_STEP_PERCENT)
            .min(MAX_FONT_SIZE_PERCENT);
    }

    pub fn decrease_font_size(&mut self) {
        self.font_size_percent = self
            .font_size_percent
            .saturating_sub(FONT_SIZE_STEP_PERCENT)
            .max(MIN_FONT_SIZE_PERCENT);
    }

    pub fn increase_columns(&mut self) {
        self.column_count = (self.column_count + 1).min(MAX_COLUMN_COUNT);
    }

    pub fn decrease_columns(&mut self) {
        self.column_count = self.column_count.saturating_sub(1).max(1);
    }

    pub fn cycle_reflow_anchor(&mut self) {
        self.reflow_anchor = match self.reflow_anchor {
            ReflowAnchor::Page => ReflowAnchor::Line,
            ReflowAnchor::Line => ReflowAnchor::Page,
        };
    }

    /// Layout for a container of the given inner size.
    pub fn layout(&self, container_width_px: f32, container_height_px: f32) -> LayoutConfig {
        LayoutConfig {
            font_size_percent: self.font_size_percent,
            column_count: self.column_count,
            column_gap_px: self.column_gap_px,
            container_width_px,
            container_height_px,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub font_size_percent: u16,
    pub column_count: u16,
    pub column_gap_px: f32,
    pub container_width_px: f32,
    pub container_height_px: f32,
}

impl LayoutConfig {
    pub fn columns(&self) -> u16 {
        self.column_count.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationParams {
    pub lines_per_page: usize,
    pub symbols_per_line: usize,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            lines_per_page: 18,
            symbols_per_line: 75,
        }
    }
}

/// Serializable reference to a position or range inside content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Locator {
    /// EPUB canonical fragment identifier, for reflowable documents.
    Cfi(String),
    /// Raw text snippet, matched against plain-text content.
    Snippet(String),
}

impl Locator {
    pub fn kind(&self) -> &'static str {
        match self {
            Locator::Cfi(_) => "cfi",
            Locator::Snippet(_) => "snippet",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Locator::Cfi(value) | Locator::Snippet(value) => value,
        }
    }

    pub fn from_parts(kind: &str, value: String) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "cfi" => Some(Locator::Cfi(value)),
            "snippet" => Some(Locator::Snippet(value)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationScope {
    Personal,
    Group(i64),
}

impl std::fmt::Display for AnnotationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnnotationScope::Personal => f.write_str("personal"),
            AnnotationScope::Group(id) => write!(f, "group:{id}"),
        }
    }
}

impl std::str::FromStr for AnnotationScope {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_lowercase();
        if value == "personal" {
            return Ok(AnnotationScope::Personal);
        }
        match value.strip_prefix("group:") {
            Some(id) => id
                .trim()
                .parse::<i64>()
                .map(AnnotationScope::Group)
                .map_err(|_| "invalid group id"),
            None => Err("unknown annotation scope"),
        }
    }
}

/// A stored comment/highlight. Owned by the backend; clients hold a read cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: i64,
    pub content_id: ContentId,
    pub scope: AnnotationScope,
    pub locator: Locator,
    pub text: String,
    pub color: String,
    pub owner: String,
}

/// Request produced by a selection, submitted to create an annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAnnotation {
    pub content_id: ContentId,
    pub scope: AnnotationScope,
    pub locator: Locator,
    pub text: String,
    pub color: String,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub current_page: u32,
    pub total_pages: u32,
    pub character_offset: usize,
    /// Last reflowable-document location, when the content is an EPUB.
    pub location: Option<String>,
    pub percent: f32,
    pub is_completed: bool,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            current_page: 1,
            total_pages: 1,
            character_offset: 0,
            location: None,
            percent: 0.0,
            is_completed: false,
        }
    }
}

impl Progress {
    /// Percent read for plain text, measured by character offset.
    pub fn text_percent(&self, content_len: usize) -> f32 {
        if content_len == 0 {
            0.0
        } else {
            ((self.character_offset as f32 / content_len as f32) * 100.0).min(100.0)
        }
    }

    /// Records a new percentage; crossing the completion threshold completes
    /// the book for good.
    pub fn record_percent(&mut self, percent: f32) {
        if !percent.is_finite() {
            return;
        }
        self.percent = percent.clamp(0.0, 100.0);
        if self.percent >= COMPLETION_THRESHOLD_PERCENT && !self.is_completed {
            self.is_completed = true;
        }
        if self.is_completed {
            self.percent = 100.0;
        }
    }

    pub fn same_position(&self, other: &Progress) -> bool {
        self.current_page == other.current_page
            && self.total_pages == other.total_pages
            && self.character_offset == other.character_offset
            && self.location == other.location
    }
}

/// Guards in-flight navigations; only the most recently issued token may take
/// visible effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NavigationToken(pub u64);

impl NavigationToken {
    pub fn next(self) -> Self {
        NavigationToken(self.0.wrapping_add(1))
    }
}

/// Backend collaborator for annotation CRUD.
pub trait AnnotationStore {
    fn list_annotations(
        &self,
        content_id: &ContentId,
        scope: AnnotationScope,
    ) -> anyhow::Result<Vec<Annotation>>;
    fn create_annotation(&self, new: &NewAnnotation) -> anyhow::Result<Annotation>;
    fn update_annotation(&self, id: i64, text: &str, color: &str) -> anyhow::Result<()>;
    fn delete_annotation(&self, id: i64) -> anyhow::Result<()>;
}

/// Persisted reading position collaborator.
pub trait ProgressStore {
    fn load_progress(&self, content_id: &ContentId) -> anyhow::Result<Option<Progress>>;
    fn save_progress(&self, content_id: &ContentId, progress: &Progress) -> anyhow::Result<()>;
}
