//! Structural pattern matching over syntax trees.
//!
//! A [`Query`] compiles S-expression patterns such as
//! `(call_expression function: (identifier) @callee)` against a
//! [`Language`](loam_language::Language). A [`QueryCursor`] then walks a tree
//! once and reports every match, or every capture in text order, while
//! honoring byte and point ranges, a match limit and cancellation.

mod cursor;
mod error;
mod predicate;
mod quantifier;
mod query;
mod syntax;

use std::iter;

use loam_tree::Node;

pub use cursor::{
    QueryCapture, QueryCaptures, QueryCursor, QueryCursorOptions, QueryCursorState, QueryMatch,
    QueryMatches,
};
pub use error::{QueryError, QueryErrorKind};
pub use predicate::{QueryPredicate, QueryPredicateArg, QueryProperty, TextPredicate};
pub use quantifier::CaptureQuantifier;
pub use query::Query;

/// Supplies the text of captured nodes to text predicates, possibly in
/// several chunks.
pub trait TextProvider<I>
where
    I: AsRef<[u8]>,
{
    type Chunks: Iterator<Item = I>;

    fn text(&mut self, node: Node<'_>) -> Self::Chunks;
}

impl<F, R, I> TextProvider<I> for F
where
    F: FnMut(Node<'_>) -> R,
    R: Iterator<Item = I>,
    I: AsRef<[u8]>,
{
    type Chunks = R;

    fn text(&mut self, node: Node<'_>) -> Self::Chunks {
        self(node)
    }
}

impl<'a> TextProvider<&'a [u8]> for &'a [u8] {
    type Chunks = iter::Once<&'a [u8]>;

    fn text(&mut self, node: Node<'_>) -> Self::Chunks {
        iter::once(self.get(node.byte_range()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests;
