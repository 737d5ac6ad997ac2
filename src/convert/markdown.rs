//! Streaming markdown → sanitized HTML conversion.
//!
//! [`MarkdownConverter`] is a plain state machine: feed it chunks as they
//! arrive from an agent's `agent_message_chunk` stream, and ask it whether a
//! block boundary is ready to render. It owns no clock and spawns nothing —
//! a caller on a timer drives [`MarkdownConverter::due_for_hard_flush`] and
//! [`MarkdownConverter::due_for_soft_flush`] the way it already drives any
//! other periodic task (see `scanner::defense::spawn_pruner` for the same
//! caller-owns-the-interval shape).

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use regex::Regex;
use syntect::easy::HighlightLines;
use syntect::highlighting::{Theme, ThemeSet};
use syntect::html::{styled_line_to_highlighted_html, IncludeBackground};
use syntect::parsing::SyntaxSet;

/// Default hard inactivity flush: render whatever remains buffered even if
/// it isn't at a block boundary.
pub const HARD_FLUSH_INTERVAL: Duration = Duration::from_secs(2);
/// Default soft flush: attempt a block-boundary flush after this much quiet.
pub const SOFT_FLUSH_INTERVAL: Duration = Duration::from_millis(200);

/// Incremental markdown renderer for one streaming conversation turn.
pub struct MarkdownConverter {
    workspace_dir: PathBuf,
    buffer: String,
    last_feed_at: Option<Instant>,
}

impl MarkdownConverter {
    /// Construct a converter that resolves relative file-path links against
    /// `workspace_dir`.
    #[must_use]
    pub fn new(workspace_dir: PathBuf) -> Self {
        Self {
            workspace_dir,
            buffer: String::new(),
            last_feed_at: None,
        }
    }

    /// Append a chunk of streamed markdown text.
    pub fn feed(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
        self.last_feed_at = Some(Instant::now());
    }

    /// Whether enough quiet time has passed to attempt a block-boundary
    /// flush.
    #[must_use]
    pub fn due_for_soft_flush(&self) -> bool {
        self.last_feed_at
            .is_some_and(|at| at.elapsed() >= SOFT_FLUSH_INTERVAL)
    }

    /// Whether the buffer has gone long enough without activity that it
    /// should be rendered regardless of block completeness.
    #[must_use]
    pub fn due_for_hard_flush(&self) -> bool {
        self.last_feed_at
            .is_some_and(|at| at.elapsed() >= HARD_FLUSH_INTERVAL)
    }

    /// Render and drain every complete block currently in the buffer,
    /// leaving any trailing incomplete block (an open fence, an unterminated
    /// inline span) for the next call. Returns `None` if nothing is ready.
    #[must_use]
    pub fn flush_complete_blocks(&mut self) -> Option<String> {
        let boundary = last_complete_block_boundary(&self.buffer)?;
        if boundary == 0 {
            return None;
        }
        let ready: String = self.buffer.drain(..boundary).collect();
        if ready.trim().is_empty() {
            return None;
        }
        Some(render(&ready, &self.workspace_dir))
    }

    /// Render and drain the entire remaining buffer, complete or not. Used
    /// on the hard-inactivity flush and at stream end.
    pub fn flush_all(&mut self) -> String {
        let remaining = std::mem::take(&mut self.buffer);
        self.last_feed_at = None;
        render(&remaining, &self.workspace_dir)
    }

    /// Whether the buffer currently holds anything unflushed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// One-shot conversion of a complete markdown document, with no streaming
/// state involved.
#[must_use]
pub fn render_document(markdown: &str, workspace_dir: &Path) -> String {
    render(markdown, workspace_dir)
}

/// Find the end offset of the last run of buffered text that forms a
/// complete sequence of blocks: a blank-line boundary with every triple-
/// backtick fence closed. Returns `None` if no safe boundary exists yet.
fn last_complete_block_boundary(buffer: &str) -> Option<usize> {
    let mut search_end = buffer.len();
    loop {
        let idx = buffer[..search_end].rfind("\n\n")?;
        let candidate = idx + 2;
        if is_balanced(&buffer[..candidate]) {
            return Some(candidate);
        }
        search_end = idx;
    }
}

/// Whether `prefix` has no open fenced code block and no dangling inline
/// code span (an odd number of backticks outside of fences).
fn is_balanced(prefix: &str) -> bool {
    if prefix.matches("```").count() % 2 != 0 {
        return false;
    }
    strip_fenced_blocks(prefix).matches('`').count() % 2 == 0
}

/// Drop the content of every fenced code block, so inline-backtick balance
/// checks aren't confused by backticks that legitimately appear inside one.
fn strip_fenced_blocks(s: &str) -> String {
    s.split("```")
        .enumerate()
        .filter_map(|(i, part)| (i % 2 == 0).then_some(part))
        .collect()
}

fn render(markdown: &str, workspace_dir: &Path) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut events = Vec::new();
    let mut code_lang: Option<String> = None;
    let mut code_text = String::new();
    let mut in_code_block = false;

    for event in Parser::new_ext(markdown, options) {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(lang))) => {
                in_code_block = true;
                code_lang = Some(lang.to_string());
                code_text.clear();
            }
            Event::Start(Tag::CodeBlock(CodeBlockKind::Indented)) => {
                in_code_block = true;
                code_lang = None;
                code_text.clear();
            }
            Event::Text(text) if in_code_block => code_text.push_str(&text),
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                events.push(Event::Html(highlight_code(&code_text, code_lang.as_deref()).into()));
            }
            Event::Text(text) => events.push(Event::Html(linkify_text(&text, workspace_dir).into())),
            Event::Code(text) => events.push(Event::Html(linkify_bare_url_in_code(&text).into())),
            other => events.push(other),
        }
    }

    let mut html_out = String::new();
    pulldown_cmark::html::push_html(&mut html_out, events.into_iter());
    sanitize(&html_out)
}

fn highlight_code(code: &str, lang: Option<&str>) -> String {
    let syntax_set = syntax_set();
    let syntax = lang
        .and_then(|token| syntax_set.find_syntax_by_token(token))
        .unwrap_or_else(|| syntax_set.find_syntax_plain_text());

    let mut highlighter = HighlightLines::new(syntax, theme());
    let mut body = String::new();
    for line in code.lines() {
        let Ok(ranges) = highlighter.highlight_line(line, syntax_set) else {
            body.push_str(&escape_html(line));
            body.push('\n');
            continue;
        };
        match styled_line_to_highlighted_html(&ranges, IncludeBackground::No) {
            Ok(html) => {
                body.push_str(&html);
                body.push('\n');
            }
            Err(_) => {
                body.push_str(&escape_html(line));
                body.push('\n');
            }
        }
    }
    format!("<pre><code class=\"highlight\">{body}</code></pre>")
}

fn syntax_set() -> &'static SyntaxSet {
    static SET: OnceLock<SyntaxSet> = OnceLock::new();
    SET.get_or_init(SyntaxSet::load_defaults_newlines)
}

fn theme() -> &'static Theme {
    static THEME: OnceLock<Theme> = OnceLock::new();
    THEME.get_or_init(|| {
        let themes = ThemeSet::load_defaults();
        themes
            .themes
            .get("InspiredGitHub")
            .or_else(|| themes.themes.values().next())
            .cloned()
            .expect("syntect ships at least one default theme")
    })
}

fn file_path_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[\w.-]*(?:/[\w.-]+)+\.[A-Za-z0-9]{1,8}\b").expect("static regex"))
}

fn bare_url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s<]+").expect("static regex"))
}

/// Escape plain text, then wrap any substring that resolves to an existing
/// file under `workspace_dir` in a link. Escaping first keeps the regex
/// match offsets free of HTML metacharacters to worry about.
fn linkify_text(text: &str, workspace_dir: &Path) -> String {
    let escaped = escape_html(text);
    file_path_pattern()
        .replace_all(&escaped, |caps: &regex::Captures<'_>| {
            let candidate = &caps[0];
            let resolved = workspace_dir.join(candidate);
            if resolved.exists() {
                format!(
                    r#"<a href="file://{}" class="file-path-link">{candidate}</a>"#,
                    resolved.display()
                )
            } else {
                candidate.to_owned()
            }
        })
        .into_owned()
}

/// Escape an inline-code span, wrapping any bare URL in a link without
/// altering the surrounding `<code>` styling.
fn linkify_bare_url_in_code(text: &str) -> String {
    let escaped = escape_html(text);
    let linked = bare_url_pattern().replace_all(&escaped, |caps: &regex::Captures<'_>| {
        let url = &caps[0];
        format!(r#"<a href="{url}">{url}</a>"#)
    });
    format!("<code>{linked}</code>")
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn sanitize(html: &str) -> String {
    ammonia::Builder::default()
        .add_tags(["span"])
        .add_tag_attributes("span", ["style", "class"])
        .add_tag_attributes("code", ["class"])
        .add_tag_attributes("pre", ["style", "class"])
        .add_tag_attributes("a", ["href", "class"])
        .clean(html)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_waits_for_a_closed_fence() {
        let mut converter = MarkdownConverter::new(PathBuf::from("/tmp"));
        converter.feed("```rust\nfn main() {\n\n");
        assert!(converter.flush_complete_blocks().is_none());
        converter.feed("}\n```\n\ntrailing text\n\n");
        let flushed = converter.flush_complete_blocks().expect("fence is now closed");
        assert!(flushed.contains("highlight"));
    }

    #[test]
    fn flush_all_renders_whatever_is_left() {
        let mut converter = MarkdownConverter::new(PathBuf::from("/tmp"));
        converter.feed("half of a ```fence");
        let html = converter.flush_all();
        assert!(!html.is_empty());
        assert!(converter.is_empty());
    }

    #[test]
    fn bare_url_in_inline_code_is_linked() {
        let html = render_document("`see https://example.com/docs`", Path::new("/tmp"));
        assert!(html.contains("<code>"));
        assert!(html.contains(r#"<a href="https://example.com/docs">"#));
    }

    #[test]
    fn nonexistent_path_is_left_as_plain_text() {
        let html = render_document("see src/definitely/missing.rs for details", Path::new("/tmp"));
        assert!(!html.contains("<a href"));
        assert!(html.contains("src/definitely/missing.rs"));
    }

    #[test]
    fn existing_path_is_linkified() {
        let dir = std::env::temp_dir();
        let marker = dir.join("mitto_markdown_test_marker.txt");
        std::fs::write(&marker, b"x").expect("write temp marker");
        let html = render_document("see mitto_markdown_test_marker.txt please", &dir);
        let _ = std::fs::remove_file(&marker);
        assert!(html.contains("<a href=\"file://"));
    }

    #[test]
    fn balance_check_ignores_backticks_inside_fences() {
        assert!(is_balanced("```\nlet x = `backtick`;\n```\n"));
        assert!(!is_balanced("`unterminated span"));
    }
}
