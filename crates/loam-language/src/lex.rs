use std::fmt;

use crate::{StateId, Symbol};

/// Largest serialized external scanner state that is stored on a token.
pub const SERIALIZATION_BUFFER_SIZE: usize = 1024;

/// The view of the lexer that lex functions and external scanners drive.
///
/// `lookahead` is the current code point, `'\0'` at the end of input, and
/// `char::REPLACEMENT_CHARACTER` for bytes that do not decode.
pub trait LexContext {
    fn lookahead(&self) -> char;

    /// Consumes the lookahead. Skipped characters become part of the next
    /// token's leading padding instead of its content.
    fn advance(&mut self, skip: bool);

    /// Ends the token at the current position. Without a call, the token ends
    /// wherever the lex function returns.
    fn mark_end(&mut self);

    fn set_result_symbol(&mut self, symbol: Symbol);

    /// Column of the lookahead, in bytes from the start of its row.
    fn column(&mut self) -> u32;

    fn is_at_included_range_start(&self) -> bool;

    fn eof(&self) -> bool;
}

/// A generated lex function: scans one token from `lex_state` and reports
/// whether one was recognized.
pub type LexFn = fn(&mut dyn LexContext, StateId) -> bool;

/// A hand-written scanner for tokens that the generated lexer cannot
/// describe. One instance lives in each parser.
pub trait ExternalScanner: Send {
    /// Scans one token. `valid_symbols` is indexed by external token index,
    /// and so is the result symbol the scanner reports.
    fn scan(&mut self, lexer: &mut dyn LexContext, valid_symbols: &[bool]) -> bool;

    /// Writes the scanner state into `buffer`, which has room for
    /// `SERIALIZATION_BUFFER_SIZE` bytes, and returns the length written.
    fn serialize(&self, buffer: &mut [u8]) -> usize;

    /// Restores a state produced by `serialize`. An empty slice means the
    /// initial state.
    fn deserialize(&mut self, buffer: &[u8]);
}

/// How a language plugs its external scanner into the table.
#[derive(Clone)]
pub struct ExternalScannerDef {
    pub create: fn() -> Box<dyn ExternalScanner>,
    /// Grammar symbol for each external token index.
    pub symbol_map: Vec<Symbol>,
    /// Valid external tokens for each external lex state. State zero is
    /// unused.
    pub states: Vec<Vec<bool>>,
}

impl fmt::Debug for ExternalScannerDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalScannerDef")
            .field("symbol_map", &self.symbol_map)
            .field("states", &self.states.len())
            .finish_non_exhaustive()
    }
}
