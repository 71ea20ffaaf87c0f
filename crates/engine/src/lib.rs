//! Pagination and annotation-anchoring engine.
//!
//! Plain text is wrapped and paginated against measured glyph metrics;
//! reflowable documents are driven through the [`RenderEngine`] capability
//! trait, which the highlight, selection and navigation components share.

pub mod cfi;
pub mod codec;
pub mod highlight;
pub mod measure;
pub mod navigator;
pub mod pagination;
pub mod plain;
pub mod render;
pub mod selection;
pub mod timers;
pub mod wrap;

pub use cfi::{Cfi, CfiError};
pub use codec::{WrappedLines, line_index_to_offset, offset_to_line_index};
pub use highlight::{HighlightSynchronizer, PassReport, SyncState};
pub use measure::{GlyphMetrics, MEASURE_SAMPLE, TextExtent, TextMeasurer, TextStyle};
pub use navigator::{ChapterNavigator, NavigationOutcome, normalize_href};
pub use pagination::{Paginator, Recalculation, collapse_blank_lines, total_pages};
pub use plain::{HighlightSpan, LineSpan, line_spans, snippet_spans};
pub use render::{
    DisplayTarget, EventBus, EventKind, HIGHLIGHT_STYLE_ID, HighlightStyle, Location, Point, Rect,
    RenderEngine, RenderError, RenderEvent, SectionDocument, SelectionEvent, SpineItem,
    Subscription,
};
pub use selection::{PendingSelection, SelectionCapturer};
pub use timers::{Debouncer, TaskQueue};
pub use wrap::wrap_lines;
