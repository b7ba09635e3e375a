//! The incremental GLR parser.
//!
//! [`Parser`] drives a [`Lexer`](loam_lexer::Lexer) over caller-supplied text
//! and builds a [`Tree`](loam_tree::Tree) with the tables of a
//! [`Language`](loam_language::Language). Given the previous tree of an edited
//! document it reuses every subtree the edit did not touch.

/// Formats a parse log message, only when someone is listening.
macro_rules! log {
    ($session:expr, $($arg:tt)*) => {
        if $session.engine.is_logging() {
            let message = format!($($arg)*);
            $session.engine.log_message(&message);
        }
    };
}

mod input;
mod parser;
mod recover;
mod reduce;
mod session;
mod stack;

pub use loam_lexer::{IncludedRangesError, LogType, Logger};
pub use parser::{ParseOptions, ParseState, Parser};

#[cfg(test)]
mod tests;
