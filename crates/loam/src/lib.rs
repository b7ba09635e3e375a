//! Incremental parsing and structural queries.
//!
//! Build a [`Parser`], give it a [`Language`], and parse text into a
//! [`Tree`]. After editing the text, describe the change with
//! [`Tree::edit`] and parse again with the old tree to reuse everything the
//! edit did not touch. A [`Query`] run through a [`QueryCursor`] finds
//! patterns in the result.

pub use loam_errors::{Diagnostic, Renderer};
pub use loam_language::{
    ExternalScanner, ExternalScannerDef, FieldId, LANGUAGE_VERSION, Language, LanguageError,
    LexContext, LookaheadIterator, MIN_COMPATIBLE_LANGUAGE_VERSION, StateId, Symbol,
};
pub use loam_parse::{IncludedRangesError, LogType, Logger, ParseOptions, ParseState, Parser};
pub use loam_query::{
    CaptureQuantifier, Query, QueryCapture, QueryCaptures, QueryCursor, QueryCursorOptions,
    QueryCursorState, QueryError, QueryErrorKind, QueryMatch, QueryMatches, QueryPredicate,
    QueryPredicateArg, QueryProperty, TextPredicate, TextProvider,
};
pub use loam_span::{InputEdit, Point, Range, TextRange, TextSize};
pub use loam_tree::{Node, Tree, TreeCursor};

/// Grammars bundled for tests and benchmarks.
pub mod grammars {
    pub use loam_grammars::{heredoc, javascript, json, rust};
}
