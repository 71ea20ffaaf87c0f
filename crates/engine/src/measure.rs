//! Glyph measurement and derivation of pagination parameters.

use bookclub_core::{LayoutConfig, PaginationParams, PaginationTuning};

/// Representative text mixing wide Latin words, narrow punctuation and
/// Cyrillic, so the average character width is not skewed by one script.
pub const MEASURE_SAMPLE: &str = "The quick brown fox jumps. Быстрая лиса прыгает.";

/// Computed text style of the live content element.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub font_family: String,
    pub font_size_px: f32,
    pub line_height_px: Option<f32>,
    pub letter_spacing_px: f32,
    /// Column gap actually applied by the renderer, if it reports one.
    pub column_gap_px: Option<f32>,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_family: "monospace".to_string(),
            font_size_px: 16.0,
            line_height_px: None,
            letter_spacing_px: 0.0,
            column_gap_px: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextExtent {
    pub width: f32,
    pub height: f32,
}

/// Platform capability for measuring rendered text.
///
/// Implementations render `sample` with `style` on a transient probe and
/// report its extent, leaving nothing behind.
pub trait TextMeasurer {
    fn computed_style(&self) -> TextStyle;
    fn measure_text(&self, style: &TextStyle, sample: &str) -> TextExtent;
}

impl<T: TextMeasurer + ?Sized> TextMeasurer for &T {
    fn computed_style(&self) -> TextStyle {
        (**self).computed_style()
    }

    fn measure_text(&self, style: &TextStyle, sample: &str) -> TextExtent {
        (**self).measure_text(style, sample)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphMetrics {
    pub char_width: f32,
    pub line_height: f32,
    pub column_width: f32,
    pub available_height: f32,
}

/// Measures glyph metrics for `layout`, or `None` while the container has no
/// measurable space.
pub fn measure(layout: &LayoutConfig, measurer: &impl TextMeasurer) -> Option<GlyphMetrics> {
    let available_width = layout.container_width_px;
    let available_height = layout.container_height_px;
    if !(available_width > 0.0 && available_height > 0.0) {
        return None;
    }

    let style = measurer.computed_style();
    let columns = layout.columns() as f32;
    let gap = style
        .column_gap_px
        .filter(|gap| gap.is_finite() && *gap >= 0.0)
        .unwrap_or(layout.column_gap_px);
    let column_width = if layout.columns() > 1 {
        (available_width - gap * (columns - 1.0)) / columns
    } else {
        available_width
    };

    let extent = measurer.measure_text(&style, MEASURE_SAMPLE);
    let sample_len = MEASURE_SAMPLE.chars().count() as f32;
    let char_width = extent.width / sample_len;
    let line_height = extent.height;
    if !(char_width > 0.0 && line_height > 0.0 && column_width > 0.0) {
        return None;
    }

    Some(GlyphMetrics {
        char_width,
        line_height,
        column_width,
        available_height,
    })
}

pub fn derive_params(
    metrics: &GlyphMetrics,
    layout: &LayoutConfig,
    tuning: &PaginationTuning,
) -> PaginationParams {
    let symbols_per_line = ((metrics.column_width / metrics.char_width) * tuning.width_margin)
        .floor() as usize;
    let symbols_per_line = symbols_per_line.max(tuning.min_symbols_per_line);

    let lines_per_column = (metrics.available_height / metrics.line_height).floor() as usize;
    let lines_per_column = lines_per_column.max(tuning.min_lines_per_column);
    let lines_per_page = (lines_per_column as f32
        * layout.columns() as f32
        * tuning.line_count_margin)
        .floor() as usize;

    PaginationParams {
        lines_per_page: lines_per_page.max(1),
        symbols_per_line,
    }
}

/// Measures and derives in one step.
pub fn measure_params(
    layout: &LayoutConfig,
    tuning: &PaginationTuning,
    measurer: &impl TextMeasurer,
) -> Option<PaginationParams> {
    let metrics = measure(layout, measurer)?;
    Some(derive_params(&metrics, layout, tuning))
}
