//! Source loading: read a markdown policy file and reduce it to plain text.
//!
//! The conversion keeps every word a reader would see and drops markup:
//! heading markers, emphasis, link targets, HTML comments, rules and table
//! pipes.

use policypilot_core::error::IngestionError;
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use std::path::Path;
use tracing::debug;

/// A source document reduced to plain text.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    /// Path as given in the configuration
    pub file_path: String,
    pub text: String,
}

/// Reads source files from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceLoader;

impl SourceLoader {
    pub async fn load(&self, path: &Path) -> Result<SourceDocument, IngestionError> {
        let file_path = path.display().to_string();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| IngestionError::SourceUnreadable {
                path: file_path.clone(),
                reason: e.to_string(),
            })?;

        let raw = String::from_utf8(bytes).map_err(|e| IngestionError::Parse {
            path: file_path.clone(),
            reason: format!("not valid UTF-8: {e}"),
        })?;

        let text = markdown_to_text(&raw);
        debug!(path = %file_path, bytes = raw.len(), words = text.split_whitespace().count(), "Loaded source");
        Ok(SourceDocument { file_path, text })
    }
}

/// Convert markdown to plain text.
///
/// Top-level blocks are separated by a blank line. List markers are kept,
/// so numbered steps keep their numbers.
pub fn markdown_to_text(markdown: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    let mut text = PlainText::default();
    let mut depth = 0usize;

    for (event, range) in Parser::new_ext(markdown, options).into_offset_iter() {
        match event {
            Event::Start(tag) => {
                if depth == 0 {
                    text.end_block();
                }
                depth += 1;
                match tag {
                    Tag::List(_) => text.end_line(),
                    Tag::Item => {
                        text.end_line();
                        if let Some(marker) = item_marker(markdown, range.start) {
                            text.push(marker);
                            text.push(" ");
                        }
                    }
                    _ => {}
                }
            }
            Event::End(tag) => {
                depth = depth.saturating_sub(1);
                match tag {
                    TagEnd::Paragraph
                    | TagEnd::Heading(_)
                    | TagEnd::CodeBlock
                    | TagEnd::Item
                    | TagEnd::TableHead
                    | TagEnd::TableRow => text.end_line(),
                    TagEnd::TableCell => text.push(" "),
                    _ => {}
                }
            }
            Event::Text(content) | Event::Code(content) => text.push(&content),
            Event::SoftBreak | Event::HardBreak => text.end_line(),
            // HTML, comments and rules carry no words
            _ => {}
        }
    }

    text.finish()
}

/// The list marker (`-`, `+`, `3.`) on the line where an item starts.
fn item_marker(markdown: &str, offset: usize) -> Option<&str> {
    let line_start = markdown[..offset].rfind('\n').map_or(0, |i| i + 1);
    let line = markdown[line_start..].trim_start_matches(|c: char| c == ' ' || c == '\t' || c == '>');
    let marker = line.split_whitespace().next()?;

    let is_bullet = matches!(marker, "-" | "*" | "+");
    let is_ordered = marker.len() > 1
        && marker.ends_with(['.', ')'])
        && marker[..marker.len() - 1].bytes().all(|b| b.is_ascii_digit());
    (is_bullet || is_ordered).then_some(marker)
}

/// Plain text assembled line by line, with whitespace collapsed.
#[derive(Default)]
struct PlainText {
    lines: Vec<String>,
    line: String,
}

impl PlainText {
    fn push(&mut self, content: &str) {
        let mut parts = content.split('\n');
        if let Some(first) = parts.next() {
            self.line.push_str(first);
        }
        for part in parts {
            self.end_line();
            self.line.push_str(part);
        }
    }

    fn end_line(&mut self) {
        let line = self.line.split_whitespace().collect::<Vec<_>>().join(" ");
        self.line.clear();
        if !line.is_empty() {
            self.lines.push(line);
        }
    }

    /// End the current line and leave one blank line after it.
    fn end_block(&mut self) {
        self.end_line();
        if self.lines.last().is_some_and(|l| !l.is_empty()) {
            self.lines.push(String::new());
        }
    }

    fn finish(mut self) -> String {
        self.end_line();
        while self.lines.last().is_some_and(String::is_empty) {
            self.lines.pop();
        }
        self.lines.join("\n")
    }
}
