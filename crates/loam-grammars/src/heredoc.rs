//! Shell-like commands whose heredoc bodies are recognized by an external
//! scanner that remembers the pending delimiter across tokens.

use loam_language::{END, ExternalScanner, LexContext, StateId};

use crate::grammar::Grammar;
use crate::lex::{accept, single, skip_blanks, take_while};
use crate::rule::{choice, field, optional, repeat, seq, string, sym};

pub(crate) mod sym {
    use loam_language::Symbol;

    pub(crate) const WORD: Symbol = 1;
    pub(crate) const HEREDOC_OPERATOR: Symbol = 2;
    pub(crate) const SEMICOLON: Symbol = 3;
    pub(crate) const NEWLINE: Symbol = 4;
    pub(crate) const COMMENT: Symbol = 5;
    pub(crate) const HEREDOC_START: Symbol = 6;
    pub(crate) const HEREDOC_BODY: Symbol = 7;
}

/// External token indices, as reported by the scanner.
const START: usize = 0;
const BODY: usize = 1;

pub(crate) fn grammar() -> Grammar {
    Grammar::new("heredoc", lex)
        .token(sym::WORD, "word", true)
        .token(sym::HEREDOC_OPERATOR, "<<", false)
        .token(sym::SEMICOLON, ";", false)
        .token(sym::NEWLINE, "\n", false)
        .token(sym::COMMENT, "comment", true)
        .external(sym::HEREDOC_START, "heredoc_start", true)
        .external(sym::HEREDOC_BODY, "heredoc_body", true)
        .rule("program", repeat(choice([sym("command"), string("\n")])))
        .rule(
            "command",
            seq([
                field("name", sym("word")),
                repeat(choice([
                    field("argument", sym("word")),
                    field("redirect", sym("heredoc_redirect")),
                ])),
                choice([
                    string(";"),
                    seq([string("\n"), optional(field("body", sym("heredoc_body")))]),
                ]),
            ]),
        )
        .rule("heredoc_redirect", seq([string("<<"), field("delimiter", sym("heredoc_start"))]))
        .extras([sym("comment")])
        .external_scanner(create_scanner)
}

fn create_scanner() -> Box<dyn ExternalScanner> {
    Box::<HeredocScanner>::default()
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, ';' | '<' | '#')
}

fn lex(lexer: &mut dyn LexContext, _state: StateId) -> bool {
    skip_blanks(lexer);
    if lexer.eof() {
        return accept(lexer, END);
    }
    match lexer.lookahead() {
        '\n' => single(lexer, sym::NEWLINE),
        ';' => single(lexer, sym::SEMICOLON),
        '<' => {
            lexer.advance(false);
            lexer.lookahead() == '<' && single(lexer, sym::HEREDOC_OPERATOR)
        }
        '#' => {
            take_while(lexer, |c| c != '\n');
            accept(lexer, sym::COMMENT)
        }
        c if is_word_char(c) => {
            take_while(lexer, is_word_char);
            accept(lexer, sym::WORD)
        }
        _ => false,
    }
}

#[derive(Debug, Default)]
struct HeredocScanner {
    delimiter: Option<String>,
}

impl ExternalScanner for HeredocScanner {
    fn scan(&mut self, lexer: &mut dyn LexContext, valid_symbols: &[bool]) -> bool {
        // Both tokens are only valid together during error recovery.
        if valid_symbols[START] && valid_symbols[BODY] {
            return false;
        }

        if valid_symbols[BODY] {
            let Some(delimiter) = self.delimiter.as_deref() else {
                return false;
            };
            loop {
                let line = take_while(lexer, |c| c != '\n');
                if line.trim_end_matches('\r') == delimiter {
                    self.delimiter = None;
                    lexer.set_result_symbol(BODY as u16);
                    lexer.mark_end();
                    return true;
                }
                if lexer.eof() {
                    return false;
                }
                lexer.advance(false);
            }
        }

        if valid_symbols[START] {
            while matches!(lexer.lookahead(), ' ' | '\t') {
                lexer.advance(true);
            }
            let delimiter = take_while(lexer, |c| c.is_alphanumeric() || c == '_');
            if delimiter.is_empty() {
                return false;
            }
            self.delimiter = Some(delimiter);
            lexer.set_result_symbol(START as u16);
            lexer.mark_end();
            return true;
        }

        false
    }

    fn serialize(&self, buffer: &mut [u8]) -> usize {
        let Some(delimiter) = &self.delimiter else {
            return 0;
        };
        let len = delimiter.len().min(buffer.len());
        buffer[..len].copy_from_slice(&delimiter.as_bytes()[..len]);
        len
    }

    fn deserialize(&mut self, buffer: &[u8]) {
        self.delimiter =
            (!buffer.is_empty()).then(|| String::from_utf8_lossy(buffer).into_owned());
    }
}

#[cfg(test)]
mod tests {
    use loam_language::ExternalScanner as _;

    use super::HeredocScanner;

    #[test]
    fn scanner_state_round_trips_the_delimiter() {
        let scanner = HeredocScanner { delimiter: Some("EOF".to_owned()) };
        let mut buffer = [0; 16];
        let len = scanner.serialize(&mut buffer);
        assert_eq!(&buffer[..len], b"EOF");

        let mut restored = HeredocScanner::default();
        restored.deserialize(&buffer[..len]);
        assert_eq!(restored.delimiter.as_deref(), Some("EOF"));

        restored.deserialize(&[]);
        assert_eq!(restored.delimiter, None);
    }
}
