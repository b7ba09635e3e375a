//! Compiles grammars into [`Language`] tables.
//!
//! A [`Grammar`] is declared with the rule combinators in [`rule`] and a
//! hand-written lex function. [`Grammar::build`] flattens the rules, builds an
//! LALR(1) automaton, resolves conflicts with precedence and associativity,
//! and keeps declared conflicts as multiple actions for the GLR parser.
//!
//! The crate also ships small JSON, JavaScript, Rust and heredoc grammars that
//! the rest of the workspace parses in tests and benchmarks.

mod error;
mod grammar;
mod lalr;
mod lex;
mod prepare;
pub mod rule;
mod tables;

mod heredoc;
mod javascript;
mod json;
mod rust;

use std::sync::OnceLock;

use loam_language::Language;

pub use error::GrammarError;
pub use grammar::{Grammar, LexStateFn};

fn cached(cell: &'static OnceLock<Language>, grammar: fn() -> Grammar) -> Language {
    cell.get_or_init(|| match grammar().build() {
        Ok(language) => language,
        Err(error) => panic!("bundled grammar is invalid: {error}"),
    })
    .clone()
}

/// JSON documents with `//` and `/* */` comments.
///
/// # Panics
///
/// Panics if the bundled grammar does not build, which the tests rule out.
pub fn json() -> Language {
    static LANGUAGE: OnceLock<Language> = OnceLock::new();
    cached(&LANGUAGE, json::grammar)
}

/// A JavaScript subset: declarations, control flow, arrow functions and the
/// usual operators, with regex literals and required semicolons.
///
/// # Panics
///
/// Panics if the bundled grammar does not build.
pub fn javascript() -> Language {
    static LANGUAGE: OnceLock<Language> = OnceLock::new();
    cached(&LANGUAGE, javascript::grammar)
}

/// A Rust subset of functions, structs and simple expressions.
///
/// # Panics
///
/// Panics if the bundled grammar does not build.
pub fn rust() -> Language {
    static LANGUAGE: OnceLock<Language> = OnceLock::new();
    cached(&LANGUAGE, rust::grammar)
}

/// Line-oriented commands with heredoc redirects, scanned externally.
///
/// # Panics
///
/// Panics if the bundled grammar does not build.
pub fn heredoc() -> Language {
    static LANGUAGE: OnceLock<Language> = OnceLock::new();
    cached(&LANGUAGE, heredoc::grammar)
}

#[cfg(test)]
mod tests;
