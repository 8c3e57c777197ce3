//! Markdown to styled terminal lines.
//!
//! Only the subset the assistant actually produces is handled: headings,
//! bullet lists, quotes, fenced code, pipe tables and a few inline spans.

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Prose,
    Code,
    Table,
}

/// One contiguous piece of rendered output.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkupBlock {
    pub kind: BlockKind,
    pub lines: Vec<Line<'static>>,
    /// Rendered unwrapped and shifted by the view's horizontal offset.
    pub scrolls_horizontally: bool,
}

impl MarkupBlock {
    fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            lines: Vec::new(),
            scrolls_horizontally: false,
        }
    }

    pub fn plain_lines(&self) -> Vec<String> {
        self.lines
            .iter()
            .map(|line| {
                line.spans
                    .iter()
                    .map(|span| span.content.as_ref())
                    .collect::<String>()
            })
            .collect()
    }
}

pub trait Renderer: Send + Sync {
    fn render(&self, markdown: &str) -> Vec<MarkupBlock>;
}

/// Render and mark every table for horizontal scrolling.
pub fn render_for_view(renderer: &dyn Renderer, markdown: &str) -> Vec<MarkupBlock> {
    let mut blocks = renderer.render(markdown);
    wrap_tables(&mut blocks);
    blocks
}

pub fn wrap_tables(blocks: &mut [MarkupBlock]) {
    for block in blocks.iter_mut().filter(|b| b.kind == BlockKind::Table) {
        block.scrolls_horizontally = true;
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownRenderer;

impl Renderer for MarkdownRenderer {
    fn render(&self, markdown: &str) -> Vec<MarkupBlock> {
        let mut blocks: Vec<MarkupBlock> = Vec::new();
        let mut current = MarkupBlock::new(BlockKind::Prose);
        let mut table_rows: Vec<Vec<String>> = Vec::new();

        let flush = |blocks: &mut Vec<MarkupBlock>, block: &mut MarkupBlock, next: BlockKind| {
            let done = std::mem::replace(block, MarkupBlock::new(next));
            if !done.lines.is_empty() {
                blocks.push(done);
            }
        };

        for raw_line in markdown.split('\n') {
            let trimmed = raw_line.trim_start();

            if current.kind != BlockKind::Code && is_table_row(trimmed) {
                if current.kind != BlockKind::Table {
                    flush(&mut blocks, &mut current, BlockKind::Table);
                }
                if !is_table_separator(trimmed) {
                    table_rows.push(split_table_row(trimmed));
                }
                continue;
            }

            if current.kind == BlockKind::Table {
                current.lines = table_lines(&std::mem::take(&mut table_rows));
                flush(&mut blocks, &mut current, BlockKind::Prose);
            }

            if trimmed.starts_with("```") {
                let next = if current.kind == BlockKind::Code {
                    BlockKind::Prose
                } else {
                    BlockKind::Code
                };
                flush(&mut blocks, &mut current, next);
                continue;
            }

            if current.kind == BlockKind::Code {
                current.lines.push(Line::from(Span::styled(
                    raw_line.to_string(),
                    Style::default().fg(Color::LightBlue),
                )));
                continue;
            }

            current.lines.push(prose_line(raw_line, trimmed));
        }

        if current.kind == BlockKind::Table {
            current.lines = table_lines(&table_rows);
        }
        flush(&mut blocks, &mut current, BlockKind::Prose);

        blocks
    }
}

fn prose_line(raw_line: &str, trimmed: &str) -> Line<'static> {
    let indent_len = raw_line.len().saturating_sub(trimmed.len());
    let indent = raw_line.get(0..indent_len).unwrap_or("").to_string();
    let mut spans = Vec::new();
    if !indent.is_empty() {
        spans.push(Span::raw(indent));
    }

    if let Some((level, heading)) = parse_heading(trimmed) {
        let style = match level {
            1 => Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
            2 => Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
            _ => Style::default()
                .fg(Color::LightYellow)
                .add_modifier(Modifier::BOLD),
        };
        spans.extend(inline_spans(heading, style));
    } else if let Some(quote) = trimmed.strip_prefix("> ") {
        let style = Style::default().fg(Color::DarkGray);
        spans.push(Span::styled("│ ", style));
        spans.extend(inline_spans(quote, style));
    } else if let Some(item) = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
        .or_else(|| trimmed.strip_prefix("+ "))
    {
        spans.push(Span::styled("• ", Style::default().fg(Color::Yellow)));
        spans.extend(inline_spans(item, Style::default()));
    } else {
        spans.extend(inline_spans(trimmed, Style::default()));
    }

    Line::from(spans)
}

fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = line.get(level..)?;
    if !rest.starts_with(' ') {
        return None;
    }
    Some((level, rest.trim()))
}

fn inline_spans(text: &str, base: Style) -> Vec<Span<'static>> {
    let mut spans = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        let code = remaining.find('`');
        let bold = remaining.find("**");
        let next = match (code, bold) {
            (Some(c), Some(b)) if b < c => Some((b, "**")),
            (Some(c), _) => Some((c, "`")),
            (None, Some(b)) => Some((b, "**")),
            (None, None) => None,
        };

        let Some((pos, marker)) = next else {
            spans.push(Span::styled(remaining.to_string(), base));
            break;
        };

        if pos > 0 {
            spans.push(Span::styled(remaining[..pos].to_string(), base));
        }

        let after = &remaining[pos + marker.len()..];
        match after.find(marker) {
            Some(end) => {
                let inner = &after[..end];
                let style = if marker == "`" {
                    Style::default().fg(Color::LightBlue)
                } else {
                    base.add_modifier(Modifier::BOLD)
                };
                spans.push(Span::styled(inner.to_string(), style));
                remaining = &after[end + marker.len()..];
            }
            None => {
                spans.push(Span::styled(marker.to_string(), base));
                remaining = after;
            }
        }
    }

    spans
}

fn is_table_row(line: &str) -> bool {
    let line = line.trim_end();
    line.len() > 1 && line.starts_with('|') && line.ends_with('|')
}

fn is_table_separator(line: &str) -> bool {
    split_table_row(line).iter().all(|cell| {
        !cell.is_empty() && cell.chars().all(|c| matches!(c, '-' | ':' | ' '))
    })
}

fn split_table_row(line: &str) -> Vec<String> {
    let line = line.trim();
    let inner = line
        .strip_prefix('|')
        .and_then(|l| l.strip_suffix('|'))
        .unwrap_or(line);
    inner.split('|').map(|cell| cell.trim().to_string()).collect()
}

fn table_lines(rows: &[Vec<String>]) -> Vec<Line<'static>> {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|col| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    let border = Style::default().fg(Color::DarkGray);
    let mut lines = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        let style = if index == 0 {
            Style::default().add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        let mut spans = vec![Span::styled("│", border)];
        for (col, width) in widths.iter().enumerate() {
            let cell = row.get(col).map(String::as_str).unwrap_or("");
            spans.push(Span::styled(format!(" {:<width$} ", cell, width = width), style));
            spans.push(Span::styled("│", border));
        }
        lines.push(Line::from(spans));

        if index == 0 && rows.len() > 1 {
            let rule = widths
                .iter()
                .map(|w| "─".repeat(w + 2))
                .collect::<Vec<_>>()
                .join("┼");
            lines.push(Line::from(Span::styled(format!("├{}┤", rule), border)));
        }
    }
    lines
}
