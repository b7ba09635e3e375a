use loam_language::{END, LexContext, StateId};

use crate::grammar::Grammar;
use crate::lex::{accept, comment_after_slash, number, single, skip_whitespace, take_while};
use crate::rule::{choice, field, repeat, sep, seq, string, sym};

pub(crate) mod sym {
    use loam_language::Symbol;

    pub(crate) const LBRACE: Symbol = 1;
    pub(crate) const COMMA: Symbol = 2;
    pub(crate) const RBRACE: Symbol = 3;
    pub(crate) const COLON: Symbol = 4;
    pub(crate) const LBRACKET: Symbol = 5;
    pub(crate) const RBRACKET: Symbol = 6;
    pub(crate) const QUOTE: Symbol = 7;
    pub(crate) const STRING_CONTENT: Symbol = 8;
    pub(crate) const ESCAPE_SEQUENCE: Symbol = 9;
    pub(crate) const NUMBER: Symbol = 10;
    pub(crate) const TRUE: Symbol = 11;
    pub(crate) const FALSE: Symbol = 12;
    pub(crate) const NULL: Symbol = 13;
    pub(crate) const COMMENT: Symbol = 14;
}

const STRING_STATE: StateId = 1;

pub(crate) fn grammar() -> Grammar {
    Grammar::new("json", lex)
        .token(sym::LBRACE, "{", false)
        .token(sym::COMMA, ",", false)
        .token(sym::RBRACE, "}", false)
        .token(sym::COLON, ":", false)
        .token(sym::LBRACKET, "[", false)
        .token(sym::RBRACKET, "]", false)
        .token(sym::QUOTE, "\"", false)
        .token(sym::STRING_CONTENT, "string_content", true)
        .token(sym::ESCAPE_SEQUENCE, "escape_sequence", true)
        .token(sym::NUMBER, "number", true)
        .token(sym::TRUE, "true", true)
        .token(sym::FALSE, "false", true)
        .token(sym::NULL, "null", true)
        .token(sym::COMMENT, "comment", true)
        .rule("document", repeat(sym("_value")))
        .rule(
            "_value",
            choice([
                sym("object"),
                sym("array"),
                sym("number"),
                sym("string"),
                sym("true"),
                sym("false"),
                sym("null"),
            ]),
        )
        .rule("object", seq([string("{"), sep(sym("pair"), ","), string("}")]))
        .rule(
            "pair",
            seq([field("key", sym("string")), string(":"), field("value", sym("_value"))]),
        )
        .rule("array", seq([string("["), sep(sym("_value"), ","), string("]")]))
        .rule(
            "string",
            seq([
                string("\""),
                repeat(choice([sym("string_content"), sym("escape_sequence")])),
                string("\""),
            ]),
        )
        .extras([sym("comment")])
        .supertype("_value")
        .lex_states(lex_state)
}

/// String contents are lexed in their own state, where whitespace and
/// punctuation are ordinary characters.
fn lex_state(valid: &[bool]) -> u16 {
    if valid[sym::STRING_CONTENT as usize] && !valid[sym::LBRACE as usize] {
        STRING_STATE
    } else {
        0
    }
}

fn lex(lexer: &mut dyn LexContext, state: StateId) -> bool {
    if state == STRING_STATE {
        return lex_string(lexer);
    }
    skip_whitespace(lexer);
    if lexer.eof() {
        return accept(lexer, END);
    }
    match lexer.lookahead() {
        '{' => single(lexer, sym::LBRACE),
        '}' => single(lexer, sym::RBRACE),
        '[' => single(lexer, sym::LBRACKET),
        ']' => single(lexer, sym::RBRACKET),
        ',' => single(lexer, sym::COMMA),
        ':' => single(lexer, sym::COLON),
        '"' => single(lexer, sym::QUOTE),
        '/' => {
            lexer.advance(false);
            comment_after_slash(lexer, sym::COMMENT)
        }
        '-' => {
            lexer.advance(false);
            number(lexer, sym::NUMBER)
        }
        '0'..='9' => number(lexer, sym::NUMBER),
        c if c.is_ascii_alphabetic() => {
            match take_while(lexer, |c| c.is_ascii_alphabetic()).as_str() {
                "true" => accept(lexer, sym::TRUE),
                "false" => accept(lexer, sym::FALSE),
                "null" => accept(lexer, sym::NULL),
                _ => false,
            }
        }
        _ => false,
    }
}

fn lex_string(lexer: &mut dyn LexContext) -> bool {
    if lexer.eof() {
        return accept(lexer, END);
    }
    match lexer.lookahead() {
        '"' => single(lexer, sym::QUOTE),
        '\\' => {
            lexer.advance(false);
            if lexer.eof() || lexer.lookahead() == '\n' {
                return false;
            }
            lexer.advance(false);
            accept(lexer, sym::ESCAPE_SEQUENCE)
        }
        _ => {
            let content = take_while(lexer, |c| !matches!(c, '"' | '\\' | '\n'));
            !content.is_empty() && accept(lexer, sym::STRING_CONTENT)
        }
    }
}
