use crate::app::{App, CachePanel, Focus};
use crate::error::{ClientError, Result};
use crate::notify::{NoticeKind, NoticePhase};
use crate::session::NEW_SESSION_TITLE;
use crate::view::{Entry, STOPPED_MARKER, Transcript};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use std::io::{self, IsTerminal, Write};
use std::time::{Duration, Instant};
use tracing::info;

type TuiTerminal = Terminal<CrosstermBackend<io::Stdout>>;

const INPUT_HEIGHT: u16 = 5;
const SIDEBAR_WIDTH: u16 = 30;
const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const TABLE_STEP: u16 = 4;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = io::stdout().flush();
    }
}

struct InputBuffer {
    lines: Vec<String>,
    // Counted in chars, not bytes.
    cursor_x: usize,
    cursor_y: usize,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn clear(&mut self) {
        self.lines = vec![String::new()];
        self.cursor_x = 0;
        self.cursor_y = 0;
    }

    fn line_len(&self, y: usize) -> usize {
        self.lines[y].chars().count()
    }

    fn insert_char(&mut self, c: char) {
        let line = &mut self.lines[self.cursor_y];
        let at = byte_index(line, self.cursor_x);
        line.insert(at, c);
        self.cursor_x += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            let line = &mut self.lines[self.cursor_y];
            let at = byte_index(line, self.cursor_x - 1);
            line.remove(at);
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            let removed = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
            self.lines[self.cursor_y].push_str(&removed);
        }
    }

    fn new_line(&mut self) {
        let line = &mut self.lines[self.cursor_y];
        let at = byte_index(line, self.cursor_x);
        let remaining = line.split_off(at);
        self.lines.insert(self.cursor_y + 1, remaining);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
        }
    }

    fn move_right(&mut self) {
        if self.cursor_x < self.line_len(self.cursor_y) {
            self.cursor_x += 1;
        } else if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn move_up(&mut self) {
        if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn move_down(&mut self) {
        if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn text(&self) -> String {
        self.lines.join("\n")
    }

    fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.is_empty())
    }

    fn render(&self, enabled: bool) -> Text<'static> {
        if self.is_empty() {
            let hint = if enabled {
                "Ask a question about your data..."
            } else {
                "Waiting for the response..."
            };
            return Text::from(Span::styled(hint, Style::default().fg(Color::DarkGray)));
        }
        let style = if enabled {
            Style::default()
        } else {
            Style::default().fg(Color::DarkGray)
        };
        Text::from(
            self.lines
                .iter()
                .map(|l| Line::styled(l.clone(), style))
                .collect::<Vec<_>>(),
        )
    }
}

fn byte_index(line: &str, chars: usize) -> usize {
    line.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(line.len())
}

struct Tui {
    app: App,
    input: InputBuffer,
    sidebar_visible: bool,
    transcript_rows: u16,
    should_quit: bool,
}

impl Tui {
    fn new(app: App) -> Self {
        Self {
            app,
            input: InputBuffer::new(),
            sidebar_visible: true,
            transcript_rows: 0,
            should_quit: false,
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let area = f.area();
        let [sidebar_area, main_area] = if self.sidebar_visible {
            Layout::horizontal([Constraint::Length(SIDEBAR_WIDTH), Constraint::Min(20)])
                .areas(area)
        } else {
            Layout::horizontal([Constraint::Length(0), Constraint::Min(20)]).areas(area)
        };
        let [header_area, transcript_area, input_area, help_area] = Layout::vertical([
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(INPUT_HEIGHT),
            Constraint::Length(1),
        ])
        .areas(main_area);

        if self.sidebar_visible {
            self.draw_sidebar(f, sidebar_area);
        }
        self.draw_header(f, header_area);
        self.draw_transcript(f, transcript_area);
        self.draw_input(f, input_area);
        f.render_widget(
            Paragraph::new(HELP_TEXT).style(Style::default().fg(Color::DarkGray)),
            help_area,
        );

        draw_notices(f, &self.app, area);
        if let Some(panel) = &self.app.cache_panel {
            draw_cache_panel(f, panel, area);
        }
        if let Some(dialog) = &self.app.dialog {
            draw_dialog(f, &dialog.message, dialog.note.as_deref(), area);
        }
    }

    fn draw_sidebar(&self, f: &mut Frame, area: Rect) {
        let active = self.app.store.active();
        let items: Vec<ListItem> = self
            .app
            .store
            .sessions()
            .iter()
            .map(|session| {
                let is_active = active == Some(session.session_id.as_str());
                let marker = if is_active { "● " } else { "  " };
                let title_style = if is_active {
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                ListItem::new(vec![
                    Line::styled(format!("{}{}", marker, session.title), title_style),
                    Line::styled(
                        format!("  {} messages", session.message_count),
                        Style::default().fg(Color::DarkGray),
                    ),
                ])
            })
            .collect();

        let focused = self.app.focus == Focus::Sidebar;
        let border = if focused { Color::Cyan } else { Color::DarkGray };
        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Sessions ")
                    .border_style(Style::default().fg(border)),
            )
            .highlight_style(if focused {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                Style::default()
            });

        let mut state = ListState::default().with_selected(Some(self.app.sidebar_cursor));
        f.render_stateful_widget(list, area, &mut state);
    }

    fn draw_header(&self, f: &mut Frame, area: Rect) {
        let title = self
            .app
            .store
            .active()
            .and_then(|id| {
                self.app
                    .store
                    .sessions()
                    .iter()
                    .find(|s| s.session_id == id)
                    .map(|s| s.title.clone())
            })
            .unwrap_or_else(|| NEW_SESSION_TITLE.to_string());

        let mut spans = vec![Span::styled(
            format!(" {} ", title),
            Style::default().add_modifier(Modifier::BOLD),
        )];
        if self.app.view.cache_indicator() {
            spans.push(Span::styled(
                "⚡ cached",
                Style::default().fg(Color::Green),
            ));
        }
        f.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_transcript(&mut self, f: &mut Frame, area: Rect) {
        let width = area.width as usize;
        let lines = transcript_lines(&self.app.view, width);

        self.transcript_rows = area.height;
        let scroll = &mut self.app.view.scroll;
        scroll.layout(lines.len(), area.height as usize);
        let start = scroll.offset().min(lines.len());
        let end = (start + area.height as usize).min(lines.len());

        f.render_widget(Paragraph::new(lines[start..end].to_vec()), area);
    }

    fn draw_input(&self, f: &mut Frame, area: Rect) {
        let enabled = self.app.input_enabled();
        let title = if enabled {
            " Message (Enter to send, Shift+Enter for newline) "
        } else {
            " Generating... (Esc to stop) "
        };
        let focused = self.app.focus == Focus::Input;
        let border = if focused && enabled {
            Color::Gray
        } else {
            Color::DarkGray
        };

        let input_paragraph = Paragraph::new(self.input.render(enabled)).block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(Style::default().fg(border)),
        );
        f.render_widget(input_paragraph, area);

        if focused && enabled && self.app.dialog.is_none() && self.app.cache_panel.is_none() {
            let cursor_x = (self.input.cursor_x + 1) as u16;
            let cursor_y = self.input.cursor_y as u16;
            let x = (area.x + cursor_x).min(area.x + area.width.saturating_sub(2));
            let y = (area.y + 1 + cursor_y).min(area.y + area.height.saturating_sub(2));
            f.set_cursor_position((x, y));
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        if ctrl && key.code == KeyCode::Char('c') {
            self.app.cancel_turn();
            self.should_quit = true;
            return;
        }

        if self.app.dialog.is_some() {
            match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                    self.app.answer_dialog(true)
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    self.app.answer_dialog(false)
                }
                _ => {}
            }
            return;
        }

        if self.app.cache_panel.is_some() {
            match key.code {
                KeyCode::Esc | KeyCode::Char('q') => self.app.close_cache_panel(),
                KeyCode::Char('c') => self.app.clear_cache(),
                KeyCode::Char('r') => self.app.open_cache_panel(),
                _ => {}
            }
            return;
        }

        if ctrl {
            match key.code {
                KeyCode::Char('n') => self.app.new_session(),
                KeyCode::Char('d') => self.app.delete_active(),
                KeyCode::Char('l') => self.app.clear_active(),
                KeyCode::Char('k') => self.app.open_cache_panel(),
                KeyCode::Char('b') => {
                    self.sidebar_visible = !self.sidebar_visible;
                    if !self.sidebar_visible {
                        self.app.focus = Focus::Input;
                    }
                }
                _ => {}
            }
            return;
        }

        let page = (self.transcript_rows / 2).max(1) as usize;
        match key.code {
            KeyCode::Esc => {
                if self.app.turns.is_busy() {
                    self.app.cancel_turn();
                } else {
                    self.app.focus = Focus::Input;
                }
                return;
            }
            KeyCode::Tab if self.sidebar_visible => {
                self.app.focus = match self.app.focus {
                    Focus::Input => Focus::Sidebar,
                    Focus::Sidebar => Focus::Input,
                };
                return;
            }
            KeyCode::PageUp => {
                self.app.view.scroll.up(page);
                return;
            }
            KeyCode::PageDown => {
                self.app.view.scroll.down(page);
                return;
            }
            KeyCode::Left if key.modifiers.contains(KeyModifiers::SHIFT) => {
                let view = &mut self.app.view;
                view.table_offset = view.table_offset.saturating_sub(TABLE_STEP);
                return;
            }
            KeyCode::Right if key.modifiers.contains(KeyModifiers::SHIFT) => {
                let view = &mut self.app.view;
                view.table_offset = view.table_offset.saturating_add(TABLE_STEP);
                return;
            }
            _ => {}
        }

        match self.app.focus {
            Focus::Sidebar => self.handle_sidebar_key(key),
            Focus::Input => self.handle_input_key(key),
        }
    }

    fn handle_sidebar_key(&mut self, key: KeyEvent) {
        let count = self.app.store.sessions().len();
        match key.code {
            KeyCode::Up => {
                self.app.sidebar_cursor = self.app.sidebar_cursor.saturating_sub(1);
            }
            KeyCode::Down => {
                if self.app.sidebar_cursor + 1 < count {
                    self.app.sidebar_cursor += 1;
                }
            }
            KeyCode::Enter => {
                if let Some(id) = self.cursor_session() {
                    self.app.select_session(&id);
                    self.app.focus = Focus::Input;
                }
            }
            KeyCode::Delete | KeyCode::Char('d') => {
                if let Some(id) = self.cursor_session() {
                    self.app.delete_session(&id);
                }
            }
            _ => {}
        }
    }

    fn cursor_session(&self) -> Option<String> {
        self.app
            .store
            .sessions()
            .get(self.app.sidebar_cursor)
            .map(|s| s.session_id.clone())
    }

    fn handle_input_key(&mut self, key: KeyEvent) {
        if !self.app.input_enabled() {
            return;
        }
        match key.code {
            KeyCode::Enter => {
                if key
                    .modifiers
                    .intersects(KeyModifiers::SHIFT | KeyModifiers::ALT)
                {
                    self.input.new_line();
                } else if !self.input.is_empty() && self.app.submit(&self.input.text()) {
                    self.input.clear();
                }
            }
            KeyCode::Char(c) => self.input.insert_char(c),
            KeyCode::Backspace => self.input.delete_char(),
            KeyCode::Left => self.input.move_left(),
            KeyCode::Right => self.input.move_right(),
            KeyCode::Up => self.input.move_up(),
            KeyCode::Down => self.input.move_down(),
            KeyCode::Home => self.input.cursor_x = 0,
            KeyCode::End => self.input.cursor_x = self.input.line_len(self.input.cursor_y),
            _ => {}
        }
    }
}

const HELP_TEXT: &str = " Tab sessions · ^N new · ^D delete · ^L clear · ^K cache · ^B sidebar · PgUp/PgDn scroll · Shift+←/→ tables · ^C quit";

fn welcome_lines() -> Vec<Line<'static>> {
    vec![
        Line::default(),
        Line::styled(
            "  Welcome to AskDB",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Line::styled(
            "  Your intelligent database assistant",
            Style::default().fg(Color::Gray),
        ),
        Line::default(),
        Line::styled(
            "  Ask a question in plain language, e.g. \"How many orders were placed today?\"",
            Style::default().fg(Color::DarkGray),
        ),
    ]
}

/// Every row of the transcript pane at `width` columns. Tables are left
/// unwrapped and shifted by the view's horizontal offset.
fn transcript_lines(view: &Transcript, width: usize) -> Vec<Line<'static>> {
    if view.shows_welcome() {
        return welcome_lines()
            .into_iter()
            .flat_map(|line| wrap_line(line, width))
            .collect();
    }

    let mut out = Vec::new();
    for entry in view.entries() {
        match entry {
            Entry::User(text) => {
                out.push(Line::styled(
                    "You",
                    Style::default()
                        .fg(Color::Blue)
                        .add_modifier(Modifier::BOLD),
                ));
                for line in text.lines() {
                    let line = Line::styled(format!("  {}", line), Style::default().fg(Color::Blue));
                    out.extend(wrap_line(line, width));
                }
            }
            Entry::Assistant(entry) => {
                let mut header = vec![Span::styled(
                    "Assistant",
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                )];
                if entry.cached {
                    header.push(Span::styled(" ⚡ cached", Style::default().fg(Color::Green)));
                }
                out.push(Line::from(header));

                if let Some(status) = &entry.status {
                    let line = Line::styled(
                        format!("  {}", status),
                        Style::default()
                            .fg(Color::Gray)
                            .add_modifier(Modifier::ITALIC),
                    );
                    out.extend(wrap_line(line, width));
                }
                for block in &entry.blocks {
                    for line in &block.lines {
                        let line = indent(line.clone());
                        if block.scrolls_horizontally {
                            out.push(shift_line(line, view.table_offset as usize));
                        } else {
                            out.extend(wrap_line(line, width));
                        }
                    }
                }
                if entry.stopped {
                    out.push(Line::styled(
                        format!("  {}", STOPPED_MARKER),
                        Style::default()
                            .fg(Color::DarkGray)
                            .add_modifier(Modifier::ITALIC),
                    ));
                }
                if let Some(error) = &entry.error {
                    let line = Line::styled(format!("  {}", error), Style::default().fg(Color::Red));
                    out.extend(wrap_line(line, width));
                }
            }
        }
        out.push(Line::default());
    }
    out
}

fn indent(line: Line<'static>) -> Line<'static> {
    let mut spans = vec![Span::raw("  ")];
    spans.extend(line.spans);
    Line::from(spans).style(line.style)
}

/// Hard-wrap a styled line into rows of at most `width` chars.
fn wrap_line(line: Line<'static>, width: usize) -> Vec<Line<'static>> {
    let width = width.max(1);
    let total: usize = line.spans.iter().map(|s| s.content.chars().count()).sum();
    if total <= width {
        return vec![line];
    }

    let line_style = line.style;
    let mut rows = Vec::new();
    let mut current: Vec<Span<'static>> = Vec::new();
    let mut used = 0;
    for span in line.spans {
        let mut piece = String::new();
        for ch in span.content.chars() {
            if used == width {
                if !piece.is_empty() {
                    current.push(Span::styled(std::mem::take(&mut piece), span.style));
                }
                rows.push(Line::from(std::mem::take(&mut current)).style(line_style));
                used = 0;
            }
            piece.push(ch);
            used += 1;
        }
        if !piece.is_empty() {
            current.push(Span::styled(piece, span.style));
        }
    }
    if !current.is_empty() {
        rows.push(Line::from(current).style(line_style));
    }
    rows
}

/// Drop the first `offset` chars of a line, keeping span styles.
fn shift_line(line: Line<'static>, offset: usize) -> Line<'static> {
    if offset == 0 {
        return line;
    }
    let line_style = line.style;
    let mut skip = offset;
    let mut spans = Vec::new();
    for span in line.spans {
        let len = span.content.chars().count();
        if skip >= len {
            skip -= len;
            continue;
        }
        let rest: String = span.content.chars().skip(skip).collect();
        skip = 0;
        spans.push(Span::styled(rest, span.style));
    }
    Line::from(spans).style(line_style)
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn draw_notices(f: &mut Frame, app: &App, area: Rect) {
    let now = Instant::now();
    let width = 48.min(area.width);
    let mut y = area.y + 1;
    for (notice, phase) in app.notices.visible(now) {
        if y + 3 > area.y + area.height {
            break;
        }
        let color = match (notice.kind, phase) {
            (_, NoticePhase::Fading) => Color::DarkGray,
            (NoticeKind::Info, NoticePhase::Shown) => Color::Green,
            (NoticeKind::Error, NoticePhase::Shown) => Color::Red,
        };
        let rect = Rect {
            x: area.x + area.width - width,
            y,
            width,
            height: 3,
        };
        f.render_widget(Clear, rect);
        f.render_widget(
            Paragraph::new(notice.message.clone())
                .style(Style::default().fg(color))
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(color)),
                ),
            rect,
        );
        y += 3;
    }
}

fn draw_dialog(f: &mut Frame, message: &str, note: Option<&str>, area: Rect) {
    let rect = centered(area, 56, 7);
    let mut lines = vec![Line::from(message.to_string())];
    if let Some(note) = note {
        lines.push(Line::styled(
            note.to_string(),
            Style::default().fg(Color::DarkGray),
        ));
    }
    lines.push(Line::default());
    lines.push(Line::styled(
        "[y] Yes    [n] No",
        Style::default().add_modifier(Modifier::BOLD),
    ));

    f.render_widget(Clear, rect);
    f.render_widget(
        Paragraph::new(lines).wrap(Wrap { trim: false }).block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Confirm ")
                .border_style(Style::default().fg(Color::Yellow)),
        ),
        rect,
    );
}

fn cache_panel_lines(panel: &CachePanel) -> Vec<Line<'static>> {
    let mut lines = match panel {
        CachePanel::Loading => vec![Line::styled(
            "Loading cache statistics...",
            Style::default().fg(Color::DarkGray),
        )],
        CachePanel::Failed(message) => {
            vec![Line::styled(message.clone(), Style::default().fg(Color::Red))]
        }
        CachePanel::Loaded(stats) => stats
            .summary_rows()
            .into_iter()
            .map(|(label, value)| {
                Line::from(vec![
                    Span::styled(format!("{:<15}", label), Style::default().fg(Color::Gray)),
                    Span::styled(value, Style::default().add_modifier(Modifier::BOLD)),
                ])
            })
            .collect(),
    };
    lines.push(Line::default());
    lines.push(Line::styled(
        "c clear cache · r refresh · Esc close",
        Style::default().fg(Color::DarkGray),
    ));
    lines
}

fn draw_cache_panel(f: &mut Frame, panel: &CachePanel, area: Rect) {
    let rect = centered(area, 44, 11);
    f.render_widget(Clear, rect);
    f.render_widget(
        Paragraph::new(cache_panel_lines(panel)).block(
            Block::default()
                .borders(Borders::ALL)
                .title(" System Cache ")
                .border_style(Style::default().fg(Color::Cyan)),
        ),
        rect,
    );
}

fn setup_terminal() -> Result<TuiTerminal> {
    if !io::stdout().is_terminal() {
        return Err(ClientError::Terminal(
            "standard output is not a terminal; use a subcommand instead".to_string(),
        ));
    }
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    Ok(Terminal::new(CrosstermBackend::new(stdout))?)
}

/// Run the full-screen client until the user quits. The caller has already
/// asked `app` to load its sessions.
pub async fn run_tui(app: App) -> Result<()> {
    let mut terminal = setup_terminal()?;
    let _guard = TerminalGuard;
    let mut tui = Tui::new(app);

    while !tui.should_quit {
        tui.app.drain();
        terminal.draw(|f| tui.draw(f))?;

        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    tui.handle_key(key);
                }
            }
        }

        tokio::time::sleep(FRAME_INTERVAL).await;
    }

    info!("leaving full-screen client");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UiConfig;
    use crate::protocol::Message;
    use crate::render::MarkdownRenderer;
    use crate::session::fake::FakeApi;
    use std::sync::Arc;

    fn plain(lines: &[Line<'static>]) -> Vec<String> {
        lines
            .iter()
            .map(|line| line.spans.iter().map(|s| s.content.as_ref()).collect())
            .collect()
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn input_buffer_shift_enter_inserts_new_line() {
        let mut buffer = InputBuffer::new();
        for ch in "hello".chars() {
            buffer.insert_char(ch);
        }
        buffer.new_line();
        for ch in "world".chars() {
            buffer.insert_char(ch);
        }

        assert_eq!(buffer.text(), "hello\nworld");
        assert_eq!(buffer.lines.len(), 2);
        assert_eq!(buffer.cursor_y, 1);
    }

    #[test]
    fn input_buffer_edits_multibyte_text() {
        let mut buffer = InputBuffer::new();
        for ch in "héllo".chars() {
            buffer.insert_char(ch);
        }
        buffer.move_left();
        buffer.move_left();
        buffer.move_left();
        buffer.delete_char();
        assert_eq!(buffer.text(), "hllo");
        buffer.insert_char('é');
        assert_eq!(buffer.text(), "héllo");
        assert_eq!(buffer.cursor_x, 2);
    }

    #[test]
    fn wrap_line_splits_at_width_and_keeps_styles() {
        let bold = Style::default().add_modifier(Modifier::BOLD);
        let line = Line::from(vec![Span::raw("abcd"), Span::styled("efgh", bold)]);
        let rows = wrap_line(line, 3);

        assert_eq!(plain(&rows), vec!["abc", "def", "gh"]);
        assert_eq!(rows[1].spans[1].style, bold);
    }

    #[test]
    fn shift_line_drops_leading_columns() {
        let line = Line::from(vec![Span::raw("│ id "), Span::raw("│ name │")]);
        assert_eq!(plain(&[shift_line(line, 6)]), vec![" name │"]);
    }

    #[test]
    fn welcome_view_shows_banner() {
        let view = Transcript::new(Arc::new(MarkdownRenderer));
        let lines = plain(&transcript_lines(&view, 80));
        assert!(lines.iter().any(|l| l.contains("Welcome to AskDB")));
    }

    #[test]
    fn history_renders_roles_and_tables() {
        let mut view = Transcript::new(Arc::new(MarkdownRenderer));
        view.load_history(
            "s1",
            &[
                Message::user("top customers"),
                Message::assistant("| id | name |\n|----|------|\n| 1 | Ada |"),
            ],
        );
        view.table_offset = 2;
        let lines = plain(&transcript_lines(&view, 8));

        assert_eq!(lines[0], "You");
        assert_eq!(lines[1], "  top cu");
        assert_eq!(lines[2], "stomers");
        assert!(lines.contains(&"Assistant".to_string()));
        // Tables are shifted, never wrapped.
        assert!(lines.iter().any(|l| l.starts_with("│ id") && l.chars().count() > 8));
    }

    #[test]
    fn cache_panel_reports_failure() {
        let lines = plain(&cache_panel_lines(&CachePanel::Failed(
            "Failed to load cache stats: boom".to_string(),
        )));
        assert_eq!(lines[0], "Failed to load cache stats: boom");
    }

    #[tokio::test]
    async fn enter_submits_and_locks_the_input() {
        let api = Arc::new(FakeApi::with_sessions(&["s1"]));
        let mut app = App::new(api.clone(), Arc::new(MarkdownRenderer), UiConfig::default());
        app.start();
        while app.view.session_id() != Some("s1") {
            app.pump().await;
        }

        let mut tui = Tui::new(app);
        for ch in "count orders".chars() {
            tui.handle_key(key(KeyCode::Char(ch)));
        }
        tui.handle_key(key(KeyCode::Enter));

        assert!(tui.input.is_empty());
        assert!(tui.app.turns.is_busy());

        tui.handle_key(key(KeyCode::Char('x')));
        assert!(tui.input.is_empty());

        tui.handle_key(key(KeyCode::Esc));
        assert!(!tui.app.turns.is_busy());
        assert_eq!(tui.app.focus, Focus::Input);
    }

    #[tokio::test]
    async fn sidebar_navigation_selects_sessions() {
        let api = Arc::new(FakeApi::with_sessions(&["a", "b"]));
        api.set_history("b", vec![Message::user("hi"), Message::assistant("hello")]);
        let mut app = App::new(api.clone(), Arc::new(MarkdownRenderer), UiConfig::default());
        app.start();
        while app.view.session_id() != Some("a") {
            app.pump().await;
        }

        let mut tui = Tui::new(app);
        tui.handle_key(key(KeyCode::Tab));
        assert_eq!(tui.app.focus, Focus::Sidebar);
        tui.handle_key(key(KeyCode::Down));
        tui.handle_key(key(KeyCode::Enter));
        assert_eq!(tui.app.store.active(), Some("b"));
        assert_eq!(tui.app.focus, Focus::Input);

        while tui.app.view.session_id() != Some("b") {
            tui.app.pump().await;
        }
        assert_eq!(tui.app.view.entries().len(), 2);
    }
}
