//! Building blocks for hand-written lex functions.

use std::str::Chars;

use loam_language::{LexContext, LexFn, Symbol};

pub(crate) fn skip_whitespace(lexer: &mut dyn LexContext) {
    while !lexer.eof() && lexer.lookahead().is_whitespace() {
        lexer.advance(true);
    }
}

/// Skips spaces and tabs but stops at line breaks.
pub(crate) fn skip_blanks(lexer: &mut dyn LexContext) {
    while !lexer.eof() && matches!(lexer.lookahead(), ' ' | '\t' | '\r') {
        lexer.advance(true);
    }
}

pub(crate) fn accept(lexer: &mut dyn LexContext, symbol: Symbol) -> bool {
    lexer.set_result_symbol(symbol);
    lexer.mark_end();
    true
}

/// Consumes the lookahead as a one-character token.
pub(crate) fn single(lexer: &mut dyn LexContext, symbol: Symbol) -> bool {
    lexer.advance(false);
    accept(lexer, symbol)
}

/// Consumes the lookahead, then `second` if it follows, choosing between a
/// one- and a two-character token.
pub(crate) fn single_or_double(
    lexer: &mut dyn LexContext,
    second: char,
    single_symbol: Symbol,
    double_symbol: Symbol,
) -> bool {
    lexer.advance(false);
    if lexer.lookahead() == second {
        lexer.advance(false);
        accept(lexer, double_symbol)
    } else {
        accept(lexer, single_symbol)
    }
}

/// Consumes characters while `predicate` holds and returns them.
pub(crate) fn take_while(lexer: &mut dyn LexContext, predicate: impl Fn(char) -> bool) -> String {
    let mut text = String::new();
    while !lexer.eof() && predicate(lexer.lookahead()) {
        text.push(lexer.lookahead());
        lexer.advance(false);
    }
    text
}

/// Consumes `//` and `/* */` comments after the first `/` has been seen.
/// Returns false, having consumed the slash, when no comment follows.
pub(crate) fn comment_after_slash(lexer: &mut dyn LexContext, symbol: Symbol) -> bool {
    match lexer.lookahead() {
        '/' => {
            while !lexer.eof() && lexer.lookahead() != '\n' {
                lexer.advance(false);
            }
            accept(lexer, symbol)
        }
        '*' => {
            lexer.advance(false);
            let mut previous = '\0';
            while !lexer.eof() {
                let c = lexer.lookahead();
                lexer.advance(false);
                if previous == '*' && c == '/' {
                    return accept(lexer, symbol);
                }
                previous = c;
            }
            false
        }
        _ => false,
    }
}

/// Digits with an optional fraction and exponent.
pub(crate) fn number(lexer: &mut dyn LexContext, symbol: Symbol) -> bool {
    if take_while(lexer, |c| c.is_ascii_digit()).is_empty() {
        return false;
    }
    if lexer.lookahead() == '.' {
        lexer.advance(false);
        take_while(lexer, |c| c.is_ascii_digit());
    }
    if matches!(lexer.lookahead(), 'e' | 'E') {
        lexer.advance(false);
        if matches!(lexer.lookahead(), '+' | '-') {
            lexer.advance(false);
        }
        take_while(lexer, |c| c.is_ascii_digit());
    }
    accept(lexer, symbol)
}

/// A quoted string with backslash escapes, ending at the matching quote.
pub(crate) fn quoted(lexer: &mut dyn LexContext, symbol: Symbol) -> bool {
    let quote = lexer.lookahead();
    lexer.advance(false);
    while !lexer.eof() {
        match lexer.lookahead() {
            '\n' => return false,
            '\\' => {
                lexer.advance(false);
                lexer.advance(false);
            }
            c => {
                lexer.advance(false);
                if c == quote {
                    return accept(lexer, symbol);
                }
            }
        }
    }
    false
}

pub(crate) fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

pub(crate) fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Lexes a whole identifier and reports it as the keyword it spells, if any.
pub(crate) fn keyword(lexer: &mut dyn LexContext, keywords: &[(&str, Symbol)]) -> bool {
    if !is_identifier_start(lexer.lookahead()) {
        return false;
    }
    let word = take_while(lexer, is_identifier_char);
    match keywords.iter().find(|(text, _)| *text == word) {
        Some(&(_, symbol)) => accept(lexer, symbol),
        None => false,
    }
}

/// Runs `lex_fn` over `text` alone and returns the symbol it reports, if the
/// token it recognizes spans the whole text.
pub(crate) fn lex_text(lex_fn: LexFn, text: &str) -> Option<Symbol> {
    let mut lexer = TextLexer::new(text);
    if !lex_fn(&mut lexer, 0) {
        return None;
    }
    (lexer.end == text.len()).then_some(lexer.result_symbol)
}

/// A [`LexContext`] over a string held in memory.
struct TextLexer<'a> {
    chars: Chars<'a>,
    lookahead: char,
    offset: usize,
    column: u32,
    end: usize,
    result_symbol: Symbol,
}

impl<'a> TextLexer<'a> {
    fn new(text: &'a str) -> Self {
        let mut chars = text.chars();
        let lookahead = chars.next().unwrap_or('\0');
        Self { chars, lookahead, offset: 0, column: 0, end: 0, result_symbol: 0 }
    }
}

impl LexContext for TextLexer<'_> {
    fn lookahead(&self) -> char {
        self.lookahead
    }

    fn advance(&mut self, _skip: bool) {
        if self.eof() {
            return;
        }
        let len = self.lookahead.len_utf8();
        self.offset += len;
        self.column = if self.lookahead == '\n' { 0 } else { self.column + len as u32 };
        self.lookahead = self.chars.next().unwrap_or('\0');
    }

    fn mark_end(&mut self) {
        self.end = self.offset;
    }

    fn set_result_symbol(&mut self, symbol: Symbol) {
        self.result_symbol = symbol;
    }

    fn column(&mut self) -> u32 {
        self.column
    }

    fn is_at_included_range_start(&self) -> bool {
        self.offset == 0
    }

    fn eof(&self) -> bool {
        self.chars.as_str().is_empty() && self.lookahead == '\0'
    }
}
