//! ratatui-based reader.

use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use bookclub_application::{AppContext, ReaderSession};
use bookclub_core::{Annotation, AnnotationStore, DEFAULT_HIGHLIGHT_COLOR, ProgressStore};
use bookclub_engine::{
    LineSpan, Rect as SelectionRect, SelectionCapturer, TextExtent, TextMeasurer,
    TextStyle,
};
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{event, terminal};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use tracing::{debug, warn};
use unicode_width::UnicodeWidthStr;

/// Blank cells between text columns.
const COLUMN_GAP_CELLS: u16 = 2;

#[derive(Debug, Clone)]
pub struct UiOutcome {
    pub ctx: AppContext,
}

/// Measures text in terminal cells, scaled by the font size setting.
#[derive(Debug, Clone, Copy)]
pub struct TerminalMeasurer {
    font_size_percent: u16,
}

impl TerminalMeasurer {
    pub fn new(font_size_percent: u16) -> Self {
        Self { font_size_percent }
    }

    fn scale(&self) -> f32 {
        f32::from(self.font_size_percent.max(1)) / 100.0
    }
}

impl TextMeasurer for TerminalMeasurer {
    fn computed_style(&self) -> TextStyle {
        TextStyle {
            font_family: "terminal".to_string(),
            font_size_px: self.scale(),
            line_height_px: Some(self.scale()),
            letter_spacing_px: 0.0,
            column_gap_px: Some(f32::from(COLUMN_GAP_CELLS)),
        }
    }

    fn measure_text(&self, style: &TextStyle, sample: &str) -> TextExtent {
        TextExtent {
            width: UnicodeWidthStr::width(sample) as f32 * style.font_size_px,
            height: style.line_height_px.unwrap_or(style.font_size_px),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormField {
    Snippet,
    Comment,
}

#[derive(Debug, Clone)]
struct AnnotateForm {
    field: FormField,
    snippet: String,
    comment: String,
    error: Option<String>,
    /// Annotation being edited; its snippet is fixed.
    editing: Option<i64>,
}

impl AnnotateForm {
    fn new() -> Self {
        Self {
            field: FormField::Snippet,
            snippet: String::new(),
            comment: String::new(),
            error: None,
            editing: None,
        }
    }

    fn edit(annotation: &Annotation) -> Self {
        Self {
            field: FormField::Comment,
            snippet: annotation.locator.value().to_string(),
            comment: annotation.text.clone(),
            error: None,
            editing: Some(annotation.id),
        }
    }

    fn input_mut(&mut self) -> &mut String {
        match self.field {
            FormField::Snippet => &mut self.snippet,
            FormField::Comment => &mut self.comment,
        }
    }
}

#[derive(Debug, Clone)]
enum Panel {
    None,
    Goto(String),
    Annotate(AnnotateForm),
    Annotations(ListState),
}

pub struct Ui<'a, S> {
    ctx: AppContext,
    session: ReaderSession,
    store: &'a S,
    title: String,
    panel: Panel,
    capturer: SelectionCapturer,
    notice: Option<String>,
}

impl<'a, S: AnnotationStore + ProgressStore> Ui<'a, S> {
    pub fn new(mut ctx: AppContext, session: ReaderSession, store: &'a S, title: String) -> Self {
        ctx.settings.normalize();
        let capturer = SelectionCapturer::detached();
        Self {
            ctx,
            session,
            store,
            title,
            panel: Panel::None,
            capturer,
            notice: None,
        }
    }

    pub fn run(&mut self) -> anyhow::Result<UiOutcome> {
        let mut terminal = setup_terminal()?;
        terminal.clear().ok();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.event_loop(&mut terminal)
        }));
        let restore_result = restore_terminal(&mut terminal);
        let close_result = self.session.close(self.store);

        match (result, restore_result) {
            (Ok(Ok(outcome)), Ok(())) => {
                close_result?;
                Ok(outcome)
            }
            (Ok(Ok(_)), Err(err)) => Err(err),
            (Ok(Err(err)), _) => Err(err),
            (Err(panic), Ok(())) => Err(anyhow::anyhow!(panic_to_string(panic))),
            (Err(panic), Err(err)) => Err(anyhow::anyhow!(
                "{}\n(additionally failed to restore terminal: {err})",
                panic_to_string(panic)
            )),
        }
    }

    fn measurer(&self) -> TerminalMeasurer {
        TerminalMeasurer::new(self.ctx.settings.font_size_percent)
    }

    fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    ) -> anyhow::Result<UiOutcome> {
        let tick_rate = Duration::from_millis(250);
        let mut needs_redraw = true;

        let size = terminal.size().context("read terminal size")?;
        let (width, height) = body_size(Rect::new(0, 0, size.width, size.height));
        let now = Instant::now();
        self.session.on_resize(f32::from(width), f32::from(height), now);
        self.session.mount(now);

        loop {
            let measurer = self.measurer();
            if self
                .session
                .poll(Instant::now(), &measurer, self.store)?
                .is_some()
            {
                needs_redraw = true;
            }

            if needs_redraw {
                terminal.draw(|frame| self.draw(frame.area(), frame))?;
                needs_redraw = false;
            }

            let timeout = self
                .session
                .next_deadline()
                .map(|deadline| {
                    deadline
                        .saturating_duration_since(Instant::now())
                        .min(tick_rate)
                })
                .unwrap_or(tick_rate);
            if !event::poll(timeout)? {
                continue;
            }

            match event::read()? {
                Event::Resize(width, height) => {
                    let (width, height) = body_size(Rect::new(0, 0, width, height));
                    self.session
                        .on_resize(f32::from(width), f32::from(height), Instant::now());
                    needs_redraw = true;
                }
                Event::Key(key) => {
                    if key.kind == KeyEventKind::Release {
                        continue;
                    }
                    needs_redraw = true;

                    let quit = match self.panel {
                        Panel::None => self.handle_reader_key(key)?,
                        Panel::Goto(_) => self.handle_goto_key(key),
                        Panel::Annotate(_) => self.handle_annotate_key(key)?,
                        Panel::Annotations(_) => self.handle_annotations_key(key)?,
                    };
                    if quit {
                        return Ok(UiOutcome {
                            ctx: self.ctx.clone(),
                        });
                    }
                }
                _ => {}
            }
        }
    }

    fn handle_reader_key(&mut self, key: KeyEvent) -> anyhow::Result<bool> {
        let now = Instant::now();
        self.notice = None;
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Right | KeyCode::Char('l') | KeyCode::Char(' ') | KeyCode::PageDown => {
                self.session.next_page(now);
            }
            KeyCode::Left | KeyCode::Char('h') | KeyCode::PageUp => {
                self.session.prev_page(now);
            }
            KeyCode::Home => self.session.go_to_page(1, now),
            KeyCode::End => {
                let last = self.session.paginator().total_pages();
                self.session.go_to_page(last, now);
            }
            KeyCode::Char('+') | KeyCode::Char('=') => {
                self.update_settings(|s| s.increase_font_size());
            }
            KeyCode::Char('-') => self.update_settings(|s| s.decrease_font_size()),
            KeyCode::Char(']') => self.update_settings(|s| s.increase_columns()),
            KeyCode::Char('[') => self.update_settings(|s| s.decrease_columns()),
            KeyCode::Char('r') => self.update_settings(|s| s.cycle_reflow_anchor()),
            KeyCode::Char('g') => self.panel = Panel::Goto(String::new()),
            KeyCode::Char('a') => self.panel = Panel::Annotate(AnnotateForm::new()),
            KeyCode::Char('n') => {
                let mut state = ListState::default();
                if !self.current_annotations().is_empty() {
                    state.select(Some(0));
                }
                self.panel = Panel::Annotations(state);
            }
            _ => {}
        }
        Ok(false)
    }

    fn update_settings(&mut self, update: impl FnOnce(&mut bookclub_core::Settings)) {
        self.ctx.update_settings(update);
        let measurer = self.measurer();
        self.session
            .apply_settings(&self.ctx.settings, &measurer, Instant::now());
    }

    fn handle_goto_key(&mut self, key: KeyEvent) -> bool {
        let Panel::Goto(input) = &mut self.panel else {
            return false;
        };
        match key.code {
            KeyCode::Esc => self.panel = Panel::None,
            KeyCode::Enter => {
                match input.trim().parse::<usize>() {
                    Ok(page) => self.session.go_to_page(page, Instant::now()),
                    Err(_) => self.notice = Some("not a page number".to_string()),
                }
                self.panel = Panel::None;
            }
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Char(ch) if ch.is_ascii_digit() => input.push(ch),
            _ => {}
        }
        false
    }

    fn handle_annotate_key(&mut self, key: KeyEvent) -> anyhow::Result<bool> {
        let Panel::Annotate(form) = &mut self.panel else {
            return Ok(false);
        };
        match key.code {
            KeyCode::Esc => {
                self.capturer.clear();
                self.panel = Panel::None;
            }
            KeyCode::Tab | KeyCode::BackTab if form.editing.is_none() => {
                form.field = match form.field {
                    FormField::Snippet => FormField::Comment,
                    FormField::Comment => FormField::Snippet,
                };
            }
            KeyCode::Enter => {
                let snippet = form.snippet.trim().to_string();
                let comment = form.comment.trim().to_string();
                if let Some(id) = form.editing {
                    let color = self
                        .ctx
                        .annotations_for(self.session.content_id())
                        .iter()
                        .find(|a| a.id == id)
                        .map(|a| a.color.clone())
                        .unwrap_or_else(|| DEFAULT_HIGHLIGHT_COLOR.to_string());
                    self.ctx.edit_annotation(self.store, id, &comment, &color)?;
                    self.notice = Some("Annotation updated".to_string());
                    self.panel = Panel::None;
                    return Ok(false);
                }
                if snippet.is_empty() {
                    form.error = Some("Snippet cannot be empty".to_string());
                    return Ok(false);
                }
                if !self.session.paginator().content().contains(snippet.as_str()) {
                    form.error = Some("Snippet not found in text".to_string());
                    return Ok(false);
                }
                self.capturer
                    .capture_plain(&snippet, SelectionRect::default(), 0.0);
                self.capturer.hide();
                let content_id = self.session.content_id().clone();
                let request = self.capturer.take_request(
                    &content_id,
                    self.ctx.scope,
                    &comment,
                    &self.ctx.owner,
                );
                if let Some(request) = request {
                    let created = self.ctx.add_annotation(self.store, &request)?;
                    debug!(id = created.id, "annotation added from reader");
                    self.notice = Some("Annotation saved".to_string());
                }
                self.panel = Panel::None;
            }
            KeyCode::Backspace => {
                form.input_mut().pop();
            }
            KeyCode::Char(ch) => {
                if !ch.is_control() {
                    form.input_mut().push(ch);
                }
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_annotations_key(&mut self, key: KeyEvent) -> anyhow::Result<bool> {
        let count = self.current_annotations().len();
        let selected_id = match &self.panel {
            Panel::Annotations(state) => state
                .selected()
                .and_then(|idx| self.current_annotations().get(idx))
                .map(|a| a.id),
            _ => return Ok(false),
        };
        let Panel::Annotations(state) = &mut self.panel else {
            return Ok(false);
        };
        match key.code {
            KeyCode::Esc | KeyCode::Char('n') => self.panel = Panel::None,
            KeyCode::Down | KeyCode::Char('j') => {
                if count > 0 {
                    let next = state.selected().map_or(0, |i| (i + 1).min(count - 1));
                    state.select(Some(next));
                }
            }
            KeyCode::Up | KeyCode::Char('k') => {
                if count > 0 {
                    let prev = state.selected().map_or(0, |i| i.saturating_sub(1));
                    state.select(Some(prev));
                }
            }
            KeyCode::Char('e') | KeyCode::Enter => {
                let form = selected_id.and_then(|id| {
                    self.current_annotations()
                        .iter()
                        .find(|a| a.id == id)
                        .map(AnnotateForm::edit)
                });
                if let Some(form) = form {
                    self.panel = Panel::Annotate(form);
                }
            }
            KeyCode::Char('d') | KeyCode::Delete => {
                if let Some(id) = selected_id {
                    if let Err(err) = self.ctx.remove_annotation(self.store, id) {
                        warn!(id, error = %err, "delete annotation failed");
                        self.notice = Some(format!("Delete failed: {err}"));
                    }
                    let remaining = self.current_annotations().len();
                    if let Panel::Annotations(state) = &mut self.panel {
                        let selected = state.selected().unwrap_or(0);
                        state.select(remaining.checked_sub(1).map(|last| selected.min(last)));
                    }
                }
            }
            _ => {}
        }
        Ok(false)
    }

    fn current_annotations(&self) -> &[Annotation] {
        self.ctx.annotations_for(self.session.content_id())
    }

    fn draw(&mut self, area: Rect, frame: &mut ratatui::Frame) {
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(2),
            ])
            .split(area);

        let header = Paragraph::new(Line::from(vec![Span::styled(
            self.title.clone(),
            Style::default().add_modifier(Modifier::BOLD),
        )]))
        .alignment(Alignment::Center);
        frame.render_widget(header, layout[0]);

        self.draw_page(layout[1], frame);
        frame.render_widget(Paragraph::new(self.footer_lines()), layout[2]);

        match &self.panel {
            Panel::None => {}
            Panel::Goto(input) => draw_goto_panel(input, area, frame),
            Panel::Annotate(form) => draw_annotate_panel(form, area, frame),
            Panel::Annotations(state) => {
                let mut state = state.clone();
                draw_annotations_panel(self.current_annotations(), &mut state, area, frame);
            }
        }
    }

    fn draw_page(&self, area: Rect, frame: &mut ratatui::Frame) {
        let block = Block::default().borders(Borders::ALL);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let paginator = self.session.paginator();
        if !paginator.is_initialized() {
            frame.render_widget(Paragraph::new("Loading…"), inner);
            return;
        }

        let lines = paginator.page_lines();
        let highlights = self.session.page_highlights(self.current_annotations());
        let columns = column_rects(inner, self.ctx.settings.column_count);
        let per_column = lines.len().div_ceil(columns.len().max(1)).max(1);

        for (col_idx, rect) in columns.iter().enumerate() {
            let start = col_idx * per_column;
            let end = (start + per_column).min(lines.len());
            if start >= end {
                break;
            }
            let text: Vec<Line<'static>> = (start..end)
                .map(|line_idx| styled_line(&lines[line_idx], line_idx, &highlights))
                .collect();
            frame.render_widget(Paragraph::new(text), *rect);
        }
    }

    fn footer_lines(&self) -> Vec<Line<'static>> {
        let paginator = self.session.paginator();
        let progress = paginator.progress();
        let settings = &self.ctx.settings;
        let status = format!(
            "p{}/{} · {:.0}% · font {}% · {} col · anchor {}{}",
            paginator.current_page(),
            paginator.total_pages(),
            progress.percent,
            settings.font_size_percent,
            settings.column_count,
            settings.reflow_anchor,
            if progress.is_completed { " · finished" } else { "" },
        );
        let hints = match &self.notice {
            Some(notice) => notice.clone(),
            None => "←/→ page · g goto · +/- font · [/] columns · r anchor · a annotate · n notes · q quit"
                .to_string(),
        };
        vec![
            Line::from(Span::styled(status, Style::default().add_modifier(Modifier::BOLD))),
            Line::from(Span::styled(hints, Style::default().fg(Color::DarkGray))),
        ]
    }
}

/// Inner reading area for a terminal of the given size.
fn body_size(area: Rect) -> (u16, u16) {
    // header line, footer lines and the page border
    (
        area.width.saturating_sub(2),
        area.height.saturating_sub(1 + 2 + 2),
    )
}

fn column_rects(area: Rect, columns: u16) -> Vec<Rect> {
    let columns = columns.max(1);
    let gaps = COLUMN_GAP_CELLS * (columns - 1);
    let width = area.width.saturating_sub(gaps) / columns;
    (0..columns)
        .map(|idx| Rect {
            x: area.x + idx * (width + COLUMN_GAP_CELLS),
            y: area.y,
            width,
            height: area.height,
        })
        .collect()
}

fn styled_line(line: &str, line_idx: usize, highlights: &[LineSpan]) -> Line<'static> {
    let mut spans = Vec::new();
    let mut cursor = 0usize;
    let len = line.chars().count();
    for span in highlights.iter().filter(|span| span.line == line_idx) {
        let start = span.start.max(cursor);
        let end = span.end.min(len);
        if start >= end {
            continue;
        }
        if start > cursor {
            spans.push(Span::raw(char_slice(line, cursor, start)));
        }
        spans.push(Span::styled(
            char_slice(line, start, end),
            Style::default()
                .bg(parse_hex_color(&span.color).unwrap_or(Color::Yellow))
                .fg(Color::Black),
        ));
        cursor = end;
    }
    if cursor < len {
        spans.push(Span::raw(char_slice(line, cursor, len)));
    }
    Line::from(spans)
}

fn char_slice(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

fn parse_hex_color(value: &str) -> Option<Color> {
    let hex = value.trim().strip_prefix('#')?;
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |idx: usize| u8::from_str_radix(&hex[idx..idx + 2], 16).ok();
    Some(Color::Rgb(channel(0)?, channel(2)?, channel(4)?))
}

fn draw_goto_panel(input: &str, area: Rect, frame: &mut ratatui::Frame) {
    let popup_area = centered_rect(40, 20, area);
    frame.render_widget(Clear, popup_area);
    let block = Block::default().borders(Borders::ALL).title(Span::styled(
        "Go to page",
        Style::default().add_modifier(Modifier::BOLD),
    ));
    let body = Paragraph::new(vec![
        Line::from(format!("Page: {input}")),
        Line::from(Span::styled(
            "Enter go · Esc cancel",
            Style::default().fg(Color::DarkGray),
        )),
    ])
    .block(block);
    frame.render_widget(body, popup_area);
}

fn draw_annotate_panel(form: &AnnotateForm, area: Rect, frame: &mut ratatui::Frame) {
    let popup_area = centered_rect(70, 40, area);
    frame.render_widget(Clear, popup_area);
    let block = Block::default().borders(Borders::ALL).title(Span::styled(
        if form.editing.is_some() {
            "Edit annotation"
        } else {
            "Annotate"
        },
        Style::default().add_modifier(Modifier::BOLD),
    ));

    let field_style = |field: FormField| {
        if form.field == field {
            Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().add_modifier(Modifier::BOLD)
        }
    };
    let mut lines = vec![
        Line::from(vec![
            Span::styled("Snippet: ", field_style(FormField::Snippet)),
            Span::raw(form.snippet.clone()),
        ]),
        Line::from(vec![
            Span::styled("Comment: ", field_style(FormField::Comment)),
            Span::raw(form.comment.clone()),
        ]),
        Line::from(""),
    ];
    if let Some(error) = &form.error {
        lines.push(Line::from(Span::styled(
            error.clone(),
            Style::default().fg(Color::Red),
        )));
    }
    lines.push(Line::from(Span::styled(
        "Tab switch field · Enter save · Esc cancel",
        Style::default().fg(Color::DarkGray),
    )));

    let body = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(block);
    frame.render_widget(body, popup_area);
}

fn draw_annotations_panel(
    annotations: &[Annotation],
    state: &mut ListState,
    area: Rect,
    frame: &mut ratatui::Frame,
) {
    let popup_area = centered_rect(80, 60, area);
    frame.render_widget(Clear, popup_area);
    let block = Block::default().borders(Borders::ALL).title(Span::styled(
        "Annotations · e edit · d delete",
        Style::default().add_modifier(Modifier::BOLD),
    ));

    if annotations.is_empty() {
        let body = Paragraph::new("No annotations yet · a to add").block(block);
        frame.render_widget(body, popup_area);
        return;
    }

    let items: Vec<ListItem> = annotations
        .iter()
        .map(|annotation| {
            let color = parse_hex_color(&annotation.color).unwrap_or(Color::Yellow);
            ListItem::new(vec![
                Line::from(vec![
                    Span::styled("■ ", Style::default().fg(color)),
                    Span::styled(
                        format!("\"{}\"", annotation.locator.value()),
                        Style::default().add_modifier(Modifier::ITALIC),
                    ),
                ]),
                Line::from(format!("  {}", annotation.text)),
            ])
        })
        .collect();
    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    frame.render_stateful_widget(list, popup_area, state);
}

fn setup_terminal() -> anyhow::Result<Terminal<CrosstermBackend<Stdout>>> {
    terminal::enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).context("create terminal")
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> anyhow::Result<()> {
    terminal::disable_raw_mode().context("disable raw mode")?;
    crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("leave alt screen")?;
    Ok(())
}

fn panic_to_string(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: (unknown payload)".to_string()
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
