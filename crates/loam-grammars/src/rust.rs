use loam_language::{END, LexContext, StateId, Symbol};

use crate::grammar::Grammar;
use crate::lex::{
    accept, comment_after_slash, is_identifier_char, is_identifier_start, keyword, quoted, single,
    single_or_double, skip_whitespace, take_while,
};
use crate::rule::{
    Rule, alias, choice, field, optional, prec, prec_left, repeat, sep, seq, string, sym,
};

pub(crate) mod sym {
    use loam_language::Symbol;

    pub(crate) const IDENTIFIER: Symbol = 1;
    pub(crate) const INTEGER_LITERAL: Symbol = 2;
    pub(crate) const STRING_LITERAL: Symbol = 3;
    pub(crate) const LINE_COMMENT: Symbol = 4;
    pub(crate) const BLOCK_COMMENT: Symbol = 5;
    pub(crate) const FN: Symbol = 6;
    pub(crate) const LET: Symbol = 7;
    pub(crate) const MUT: Symbol = 8;
    pub(crate) const STRUCT: Symbol = 9;
    pub(crate) const PUB: Symbol = 10;
    pub(crate) const TRUE: Symbol = 11;
    pub(crate) const FALSE: Symbol = 12;
    pub(crate) const LPAREN: Symbol = 13;
    pub(crate) const RPAREN: Symbol = 14;
    pub(crate) const LBRACE: Symbol = 15;
    pub(crate) const RBRACE: Symbol = 16;
    pub(crate) const COMMA: Symbol = 17;
    pub(crate) const COLON: Symbol = 18;
    pub(crate) const SEMICOLON: Symbol = 19;
    pub(crate) const ARROW: Symbol = 20;
    pub(crate) const EQ: Symbol = 21;
    pub(crate) const EQ_EQ: Symbol = 22;
    pub(crate) const PLUS: Symbol = 23;
    pub(crate) const MINUS: Symbol = 24;
    pub(crate) const STAR: Symbol = 25;
    pub(crate) const SLASH: Symbol = 26;
    pub(crate) const LT: Symbol = 27;
    pub(crate) const GT: Symbol = 28;
    pub(crate) const DOT: Symbol = 29;
    pub(crate) const AMPERSAND: Symbol = 30;
}

const KEYWORDS: &[(&str, Symbol)] = &[
    ("fn", sym::FN),
    ("let", sym::LET),
    ("mut", sym::MUT),
    ("struct", sym::STRUCT),
    ("pub", sym::PUB),
    ("true", sym::TRUE),
    ("false", sym::FALSE),
];

pub(crate) fn grammar() -> Grammar {
    Grammar::new("rust", lex)
        .token(sym::IDENTIFIER, "identifier", true)
        .token(sym::INTEGER_LITERAL, "integer_literal", true)
        .token(sym::STRING_LITERAL, "string_literal", true)
        .token(sym::LINE_COMMENT, "line_comment", true)
        .token(sym::BLOCK_COMMENT, "block_comment", true)
        .token(sym::FN, "fn", false)
        .token(sym::LET, "let", false)
        .token(sym::MUT, "mut", false)
        .token(sym::STRUCT, "struct", false)
        .token(sym::PUB, "pub", false)
        .token(sym::TRUE, "true", false)
        .token(sym::FALSE, "false", false)
        .token(sym::LPAREN, "(", false)
        .token(sym::RPAREN, ")", false)
        .token(sym::LBRACE, "{", false)
        .token(sym::RBRACE, "}", false)
        .token(sym::COMMA, ",", false)
        .token(sym::COLON, ":", false)
        .token(sym::SEMICOLON, ";", false)
        .token(sym::ARROW, "->", false)
        .token(sym::EQ, "=", false)
        .token(sym::EQ_EQ, "==", false)
        .token(sym::PLUS, "+", false)
        .token(sym::MINUS, "-", false)
        .token(sym::STAR, "*", false)
        .token(sym::SLASH, "/", false)
        .token(sym::LT, "<", false)
        .token(sym::GT, ">", false)
        .token(sym::DOT, ".", false)
        .token(sym::AMPERSAND, "&", false)
        .rule("source_file", repeat(sym("_item")))
        .rule("_item", choice([sym("function_item"), sym("struct_item")]))
        .rule(
            "function_item",
            seq([
                optional(sym("visibility_modifier")),
                string("fn"),
                field("name", sym("identifier")),
                field("parameters", sym("parameters")),
                optional(seq([string("->"), field("return_type", sym("_type"))])),
                field("body", sym("block")),
            ]),
        )
        .rule("visibility_modifier", string("pub"))
        .rule("parameters", seq([string("("), sep(sym("parameter"), ","), string(")")]))
        .rule(
            "parameter",
            seq([
                optional(sym("mutable_specifier")),
                field("pattern", sym("identifier")),
                string(":"),
                field("type", sym("_type")),
            ]),
        )
        .rule("mutable_specifier", string("mut"))
        .rule("_type", choice([type_identifier(), sym("reference_type")]))
        .rule(
            "reference_type",
            seq([string("&"), optional(sym("mutable_specifier")), field("type", sym("_type"))]),
        )
        .rule(
            "struct_item",
            seq([
                optional(sym("visibility_modifier")),
                string("struct"),
                field("name", type_identifier()),
                field("body", sym("field_declaration_list")),
            ]),
        )
        .rule(
            "field_declaration_list",
            seq([
                string("{"),
                sep(sym("field_declaration"), ","),
                optional(string(",")),
                string("}"),
            ]),
        )
        .rule(
            "field_declaration",
            seq([
                optional(sym("visibility_modifier")),
                field("name", field_identifier()),
                string(":"),
                field("type", sym("_type")),
            ]),
        )
        .rule(
            "block",
            seq([
                string("{"),
                repeat(sym("_statement")),
                optional(sym("_expression")),
                string("}"),
            ]),
        )
        .rule(
            "_statement",
            choice([sym("expression_statement"), sym("let_declaration"), sym("_item")]),
        )
        .rule("expression_statement", seq([sym("_expression"), string(";")]))
        .rule(
            "let_declaration",
            seq([
                string("let"),
                optional(sym("mutable_specifier")),
                field("pattern", sym("identifier")),
                optional(seq([string(":"), field("type", sym("_type"))])),
                optional(seq([string("="), field("value", sym("_expression"))])),
                string(";"),
            ]),
        )
        .rule(
            "_expression",
            choice([
                sym("identifier"),
                sym("integer_literal"),
                sym("string_literal"),
                sym("boolean_literal"),
                sym("binary_expression"),
                sym("call_expression"),
                sym("field_expression"),
            ]),
        )
        .rule("boolean_literal", choice([string("true"), string("false")]))
        .rule("binary_expression", binary_expression())
        .rule(
            "call_expression",
            prec(
                4,
                seq([
                    field("function", sym("_expression")),
                    field("arguments", sym("arguments")),
                ]),
            ),
        )
        .rule("arguments", seq([string("("), sep(sym("_expression"), ","), string(")")]))
        .rule(
            "field_expression",
            prec(
                5,
                seq([
                    field("value", sym("_expression")),
                    string("."),
                    field("field", field_identifier()),
                ]),
            ),
        )
        .extras([sym("line_comment"), sym("block_comment")])
        .word("identifier", lex_keyword)
        .supertype("_expression")
}

fn type_identifier() -> Rule {
    alias(sym("identifier"), "type_identifier", true)
}

fn field_identifier() -> Rule {
    alias(sym("identifier"), "field_identifier", true)
}

fn binary_expression() -> Rule {
    let levels: [(i32, &[&'static str]); 3] =
        [(1, &["==", "<", ">"]), (2, &["+", "-"]), (3, &["*", "/"])];
    choice(levels.into_iter().flat_map(|(level, operators)| {
        operators.iter().map(move |&operator| {
            prec_left(
                level,
                seq([
                    field("left", sym("_expression")),
                    field("operator", string(operator)),
                    field("right", sym("_expression")),
                ]),
            )
        })
    }))
}

fn lex(lexer: &mut dyn LexContext, _state: StateId) -> bool {
    skip_whitespace(lexer);
    if lexer.eof() {
        return accept(lexer, END);
    }
    match lexer.lookahead() {
        '(' => single(lexer, sym::LPAREN),
        ')' => single(lexer, sym::RPAREN),
        '{' => single(lexer, sym::LBRACE),
        '}' => single(lexer, sym::RBRACE),
        ',' => single(lexer, sym::COMMA),
        ':' => single(lexer, sym::COLON),
        ';' => single(lexer, sym::SEMICOLON),
        '+' => single(lexer, sym::PLUS),
        '*' => single(lexer, sym::STAR),
        '<' => single(lexer, sym::LT),
        '>' => single(lexer, sym::GT),
        '.' => single(lexer, sym::DOT),
        '&' => single(lexer, sym::AMPERSAND),
        '-' => single_or_double(lexer, '>', sym::MINUS, sym::ARROW),
        '=' => single_or_double(lexer, '=', sym::EQ, sym::EQ_EQ),
        '/' => {
            lexer.advance(false);
            match lexer.lookahead() {
                '/' => comment_after_slash(lexer, sym::LINE_COMMENT),
                '*' => comment_after_slash(lexer, sym::BLOCK_COMMENT),
                _ => accept(lexer, sym::SLASH),
            }
        }
        '"' => quoted(lexer, sym::STRING_LITERAL),
        '0'..='9' => {
            take_while(lexer, |c| c.is_ascii_digit() || c == '_');
            accept(lexer, sym::INTEGER_LITERAL)
        }
        c if is_identifier_start(c) && c != '$' => {
            take_while(lexer, |c| is_identifier_char(c) && c != '$');
            accept(lexer, sym::IDENTIFIER)
        }
        _ => false,
    }
}

fn lex_keyword(lexer: &mut dyn LexContext, _state: StateId) -> bool {
    keyword(lexer, KEYWORDS)
}
