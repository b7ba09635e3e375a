use std::fmt::Display;
use std::ops::Range;

pub use annotate_snippets::Renderer;
use annotate_snippets::{Level, Snippet};
use loam_query::{QueryError, QueryErrorKind};
use loam_tree::Node;
pub use text_size::{TextRange, TextSize};

/// An error tied to a range of some source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    message: String,
    range: TextRange,
}

impl Diagnostic {
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn range(&self) -> TextRange {
        self.range
    }

    pub fn error(message: impl Into<String>, range: TextRange) -> Self {
        Self { message: message.into(), range }
    }

    /// Points a query compilation error at the part of `source` it is about.
    pub fn from_query_error(error: &QueryError, source: &str) -> Self {
        let at = |offset: usize, len: usize| {
            let start = offset.min(source.len());
            text_range(start..(start + len).min(source.len()))
        };
        let name = &error.message;
        match error.kind {
            QueryErrorKind::NodeType => {
                Self::error(format!("invalid node type `{name}`"), at(error.offset, name.len()))
            }
            QueryErrorKind::Field => {
                Self::error(format!("invalid field name `{name}`"), at(error.offset, name.len()))
            }
            QueryErrorKind::Capture => {
                Self::error(format!("invalid capture name `@{name}`"), at(error.offset, name.len()))
            }
            QueryErrorKind::Syntax => Self::error("invalid query syntax", at(error.offset, 0)),
            QueryErrorKind::Structure => Self::error("impossible pattern", at(error.offset, 0)),
            QueryErrorKind::Predicate => {
                let line = source.split_inclusive('\n').nth(error.row).unwrap_or_default();
                let start = source.split_inclusive('\n').take(error.row).map(str::len).sum();
                Self::error(format!("invalid predicate: {name}"), at(start, line.trim_end().len()))
            }
            QueryErrorKind::Language => Self::error(name.clone(), at(0, 0)),
        }
    }

    /// One diagnostic per `ERROR` or `MISSING` node under `node`.
    pub fn syntax_errors(node: Node<'_>, text: &str) -> Vec<Self> {
        let mut diagnostics = Vec::new();
        let mut cursor = node.walk();
        loop {
            let node = cursor.node();
            let descend = if node.is_error() {
                diagnostics.push(Self::error(unexpected(node, text), text_range(node.byte_range())));
                false
            } else if node.is_missing() {
                let message = if node.is_named() {
                    format!("missing {}", node.kind())
                } else {
                    format!("missing `{}`", node.kind())
                };
                diagnostics.push(Self::error(message, text_range(node.byte_range())));
                false
            } else {
                node.has_error()
            };

            if descend && cursor.goto_first_child() {
                continue;
            }
            while !cursor.goto_next_sibling() {
                if !cursor.goto_parent() {
                    return diagnostics;
                }
            }
        }
    }

    pub fn render<'a>(
        &'a self,
        renderer: &'a Renderer,
        path: &'a str,
        text: &'a str,
    ) -> impl Display + 'a {
        let message = Level::Error.title(&self.message).snippet(
            Snippet::source(text)
                .origin(path)
                .annotation(Level::Error.span(self.range.into()).label("here"))
                .fold(true),
        );
        renderer.render(message)
    }
}

fn unexpected(node: Node<'_>, text: &str) -> String {
    match node.utf8_text(text.as_bytes()) {
        Ok("") => "unexpected end of input".to_owned(),
        Ok(skipped) if skipped.len() <= 16 && !skipped.contains('\n') => {
            format!("unexpected `{skipped}`")
        }
        _ => "syntax error".to_owned(),
    }
}

fn text_range(range: Range<usize>) -> TextRange {
    let size = |offset: usize| TextSize::new(u32::try_from(offset).unwrap_or(u32::MAX));
    TextRange::new(size(range.start), size(range.end))
}
