//! Markdown rendering for assistant replies.
//!
//! Replies are converted into styled ratatui lines. Fenced code blocks are
//! highlighted with syntect and framed; lines too wide for the transcript are
//! cut with an ellipsis instead of wrapping.

use std::sync::OnceLock;

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use syntect::easy::HighlightLines;
use syntect::highlighting::{FontStyle, Theme, ThemeSet};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;

const THEME: &str = "base16-ocean.dark";

/// Render `text` as markdown for a transcript `width` columns wide.
#[must_use]
pub fn render_markdown(text: &str, width: usize) -> Vec<Line<'static>> {
    LineBuilder::new(width).build(text)
}

// =============================================================================
// Highlighting
// =============================================================================

struct Highlighter {
    syntaxes: SyntaxSet,
    theme: Theme,
}

impl Highlighter {
    /// Syntax and theme sets are loaded once; rendering runs on every delta.
    fn shared() -> &'static Self {
        static HIGHLIGHTER: OnceLock<Highlighter> = OnceLock::new();
        HIGHLIGHTER.get_or_init(|| {
            let mut themes = ThemeSet::load_defaults();
            let theme = themes.themes.remove(THEME).unwrap_or_default();
            Self {
                syntaxes: SyntaxSet::load_defaults_newlines(),
                theme,
            }
        })
    }

    fn highlight(&self, code: &str, lang: &str) -> Vec<Vec<Span<'static>>> {
        let syntax = self
            .syntaxes
            .find_syntax_by_token(lang)
            .unwrap_or_else(|| self.syntaxes.find_syntax_plain_text());
        let mut highlighter = HighlightLines::new(syntax, &self.theme);

        LinesWithEndings::from(code)
            .map(|line| match highlighter.highlight_line(line, &self.syntaxes) {
                Ok(ranges) => ranges
                    .into_iter()
                    .filter_map(|(style, piece)| {
                        let piece = piece.trim_end_matches(['\n', '\r']);
                        (!piece.is_empty()).then(|| Span::styled(piece.to_string(), convert_style(style)))
                    })
                    .collect(),
                Err(_) => vec![Span::styled(
                    line.trim_end_matches(['\n', '\r']).to_string(),
                    Style::default().fg(Color::Yellow),
                )],
            })
            .collect()
    }
}

fn convert_style(style: syntect::highlighting::Style) -> Style {
    let fg = style.foreground;
    let mut converted = Style::default().fg(Color::Rgb(fg.r, fg.g, fg.b));
    if style.font_style.contains(FontStyle::BOLD) {
        converted = converted.add_modifier(Modifier::BOLD);
    }
    if style.font_style.contains(FontStyle::ITALIC) {
        converted = converted.add_modifier(Modifier::ITALIC);
    }
    if style.font_style.contains(FontStyle::UNDERLINE) {
        converted = converted.add_modifier(Modifier::UNDERLINED);
    }
    converted
}

// =============================================================================
// Line Builder
// =============================================================================

struct LineBuilder {
    width: usize,
    lines: Vec<Line<'static>>,
    spans: Vec<Span<'static>>,
    styles: Vec<Style>,
    code: Option<CodeBlock>,
    lists: Vec<Option<u64>>,
    link: Option<String>,
}

struct CodeBlock {
    lang: String,
    body: String,
}

impl LineBuilder {
    fn new(width: usize) -> Self {
        Self {
            width,
            lines: Vec::new(),
            spans: Vec::new(),
            styles: vec![Style::default()],
            code: None,
            lists: Vec::new(),
            link: None,
        }
    }

    fn build(mut self, text: &str) -> Vec<Line<'static>> {
        let parser = Parser::new_ext(text, Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES);

        for event in parser {
            match event {
                Event::Start(tag) => self.start(tag),
                Event::End(tag) => self.end(tag),
                Event::Text(text) => self.text(&text),
                Event::Code(code) => self.spans.push(Span::styled(
                    code.to_string(),
                    Style::default().fg(Color::Yellow).bg(Color::Rgb(40, 40, 40)),
                )),
                // Terminal output reads better with source line breaks kept.
                Event::SoftBreak | Event::HardBreak => self.flush(),
                Event::Rule => {
                    self.flush();
                    self.lines.push(Line::styled(
                        "─".repeat(self.width.min(60)),
                        Style::default().fg(Color::DarkGray),
                    ));
                }
                _ => {}
            }
        }

        // An unterminated fence mid-stream still shows its content.
        if self.code.is_some() {
            self.emit_code_block();
        }
        self.flush();

        while self.lines.last().is_some_and(|line| line.spans.is_empty()) {
            self.lines.pop();
        }
        self.lines
    }

    fn style(&self) -> Style {
        self.styles.last().copied().unwrap_or_default()
    }

    fn push_style(&mut self, style: Style) {
        self.styles.push(self.style().patch(style));
    }

    fn pop_style(&mut self) {
        if self.styles.len() > 1 {
            self.styles.pop();
        }
    }

    fn flush(&mut self) {
        if !self.spans.is_empty() {
            self.lines.push(Line::from(std::mem::take(&mut self.spans)));
        }
    }

    fn blank(&mut self) {
        self.flush();
        if self.lines.last().is_some_and(|line| !line.spans.is_empty()) {
            self.lines.push(Line::default());
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(code) = self.code.as_mut() {
            code.body.push_str(text);
            return;
        }

        let style = self.style();
        for (i, part) in text.split('\n').enumerate() {
            if i > 0 {
                self.flush();
            }
            if !part.is_empty() {
                self.spans.push(Span::styled(part.to_string(), style));
            }
        }
    }

    fn start(&mut self, tag: Tag) {
        match tag {
            Tag::Heading { level, .. } => {
                self.blank();
                let marker = match level {
                    HeadingLevel::H1 => "# ",
                    HeadingLevel::H2 => "## ",
                    HeadingLevel::H3 => "### ",
                    _ => "#### ",
                };
                self.spans
                    .push(Span::styled(marker, Style::default().fg(Color::Magenta)));
                self.push_style(Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD));
            }
            Tag::Paragraph => self.flush(),
            Tag::BlockQuote(_) => {
                self.flush();
                self.spans
                    .push(Span::styled("│ ", Style::default().fg(Color::Blue)));
                self.push_style(Style::default().fg(Color::Blue));
            }
            Tag::CodeBlock(kind) => {
                self.flush();
                let lang = match kind {
                    CodeBlockKind::Fenced(lang) => lang.split_whitespace().next().unwrap_or("").to_string(),
                    CodeBlockKind::Indented => String::new(),
                };
                self.code = Some(CodeBlock {
                    lang,
                    body: String::new(),
                });
            }
            Tag::List(start) => {
                self.flush();
                self.lists.push(start);
            }
            Tag::Item => {
                let indent = "  ".repeat(self.lists.len().saturating_sub(1));
                let bullet = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let bullet = format!("{indent}{n}. ");
                        *n += 1;
                        bullet
                    }
                    _ => format!("{indent}• "),
                };
                self.spans
                    .push(Span::styled(bullet, Style::default().fg(Color::Cyan)));
            }
            Tag::Emphasis => self.push_style(Style::default().add_modifier(Modifier::ITALIC)),
            Tag::Strong => self.push_style(Style::default().add_modifier(Modifier::BOLD)),
            Tag::Strikethrough => self.push_style(Style::default().add_modifier(Modifier::CROSSED_OUT)),
            Tag::Link { dest_url, .. } => {
                self.link = Some(dest_url.to_string());
                self.push_style(Style::default().fg(Color::Blue).add_modifier(Modifier::UNDERLINED));
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Heading(_) => {
                self.pop_style();
                self.flush();
            }
            TagEnd::Paragraph => self.blank(),
            TagEnd::BlockQuote(_) => {
                self.pop_style();
                self.flush();
            }
            TagEnd::CodeBlock => self.emit_code_block(),
            TagEnd::List(_) => {
                self.flush();
                self.lists.pop();
                if self.lists.is_empty() {
                    self.blank();
                }
            }
            TagEnd::Item => self.flush(),
            TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough => self.pop_style(),
            TagEnd::Link => {
                self.pop_style();
                if let Some(url) = self.link.take() {
                    self.spans
                        .push(Span::styled(format!(" ({url})"), Style::default().fg(Color::DarkGray)));
                }
            }
            _ => {}
        }
    }

    fn emit_code_block(&mut self) {
        let Some(CodeBlock { lang, body }) = self.code.take() else {
            return;
        };

        let frame = Style::default().fg(Color::DarkGray);
        let rule_width = self.width.saturating_sub(2).min(44);

        if lang.is_empty() {
            self.lines
                .push(Line::styled(format!("┌{}", "─".repeat(rule_width)), frame));
        } else {
            self.lines.push(Line::from(vec![
                Span::styled("┌─ ", frame),
                Span::styled(lang.clone(), Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
                Span::styled(
                    format!(" {}", "─".repeat(rule_width.saturating_sub(lang.chars().count() + 3))),
                    frame,
                ),
            ]));
        }

        let highlighted = Highlighter::shared().highlight(&body, &lang);
        let numbered = highlighted.len() > 1;
        let digits = highlighted.len().to_string().len();
        let gutter = if numbered { 2 + digits + 3 } else { 2 };
        let room = self.width.saturating_sub(gutter + 2);

        for (n, spans) in highlighted.into_iter().enumerate() {
            let mut line = vec![Span::styled("│ ", frame)];
            if numbered {
                line.push(Span::styled(
                    format!("{:>digits$}", n + 1),
                    Style::default().fg(Color::Rgb(100, 100, 100)),
                ));
                line.push(Span::styled(" │ ", frame));
            }
            line.extend(clip(spans, room));
            self.lines.push(Line::from(line));
        }

        self.lines
            .push(Line::styled(format!("└{}", "─".repeat(rule_width)), frame));
        self.lines.push(Line::default());
    }
}

/// Cut spans to at most `room` characters, marking the cut with `…`.
fn clip(spans: Vec<Span<'static>>, room: usize) -> Vec<Span<'static>> {
    let total: usize = spans.iter().map(|s| s.content.chars().count()).sum();
    if total <= room {
        return spans;
    }

    let mut left = room.saturating_sub(1);
    let mut clipped = Vec::new();
    for span in spans {
        if left == 0 {
            break;
        }
        let len = span.content.chars().count();
        if len <= left {
            left -= len;
            clipped.push(span);
        } else {
            let cut: String = span.content.chars().take(left).collect();
            clipped.push(Span::styled(cut, span.style));
            left = 0;
        }
    }
    clipped.push(Span::styled("…", Style::default().fg(Color::DarkGray)));
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(lines: &[Line<'_>]) -> Vec<String> {
        lines
            .iter()
            .map(|line| line.spans.iter().map(|s| s.content.as_ref()).collect())
            .collect()
    }

    #[test]
    fn paragraphs_are_separated() {
        let lines = plain(&render_markdown("Hello world\n\nSecond", 80));
        assert_eq!(lines, vec!["Hello world", "", "Second"]);
    }

    #[test]
    fn emphasis_is_styled() {
        let lines = render_markdown("**bold** and *italic*", 80);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].spans[0].style.add_modifier.contains(Modifier::BOLD));
        assert!(lines[0].spans[2].style.add_modifier.contains(Modifier::ITALIC));
    }

    #[test]
    fn lists_get_markers() {
        let lines = plain(&render_markdown("- one\n- two\n\n3. three\n4. four", 80));
        assert_eq!(lines, vec!["• one", "• two", "", "3. three", "4. four"]);
    }

    #[test]
    fn code_block_is_framed_and_numbered() {
        let lines = plain(&render_markdown("```rust\nfn main() {}\nlet x = 1;\n```", 80));
        assert!(lines[0].starts_with("┌─ rust"));
        assert_eq!(lines[1], "│ 1 │ fn main() {}");
        assert_eq!(lines[2], "│ 2 │ let x = 1;");
        assert!(lines[3].starts_with('└'));
    }

    #[test]
    fn unterminated_fence_still_renders() {
        let lines = plain(&render_markdown("Here:\n\n```python\nprint(1)", 80));
        assert!(lines.iter().any(|l| l == "│ print(1)"));
    }

    #[test]
    fn long_code_lines_are_clipped() {
        let code = format!("```\n{}\n```", "x".repeat(100));
        let lines = render_markdown(&code, 20);
        let body = &lines[1];
        assert!(body.width() <= 20);
        assert_eq!(body.spans.last().map(|s| s.content.as_ref()), Some("…"));
    }

    #[test]
    fn links_show_their_target() {
        let lines = plain(&render_markdown("[docs](https://example.com)", 80));
        assert_eq!(lines, vec!["docs (https://example.com)"]);
    }
}
