use loam_language::{END, LexContext, StateId, Symbol};

use crate::grammar::Grammar;
use crate::lex::{
    accept, comment_after_slash, is_identifier_char, is_identifier_start, keyword, number, quoted,
    single, single_or_double, skip_whitespace, take_while,
};
use crate::rule::{
    Rule, alias, choice, field, optional, prec, prec_left, prec_right, repeat, sep, sep1, seq,
    string, sym,
};

pub(crate) mod sym {
    use loam_language::Symbol;

    pub(crate) const IDENTIFIER: Symbol = 1;
    pub(crate) const NUMBER: Symbol = 2;
    pub(crate) const STRING: Symbol = 3;
    pub(crate) const REGEX: Symbol = 4;
    pub(crate) const COMMENT: Symbol = 5;
    pub(crate) const SEMICOLON: Symbol = 6;
    pub(crate) const LBRACE: Symbol = 7;
    pub(crate) const RBRACE: Symbol = 8;
    pub(crate) const LPAREN: Symbol = 9;
    pub(crate) const RPAREN: Symbol = 10;
    pub(crate) const LBRACKET: Symbol = 11;
    pub(crate) const RBRACKET: Symbol = 12;
    pub(crate) const COMMA: Symbol = 13;
    pub(crate) const DOT: Symbol = 14;
    pub(crate) const COLON: Symbol = 15;
    pub(crate) const EQ: Symbol = 16;
    pub(crate) const ARROW: Symbol = 17;
    pub(crate) const PLUS: Symbol = 18;
    pub(crate) const MINUS: Symbol = 19;
    pub(crate) const STAR: Symbol = 20;
    pub(crate) const SLASH: Symbol = 21;
    pub(crate) const PERCENT: Symbol = 22;
    pub(crate) const STRICT_EQ: Symbol = 23;
    pub(crate) const STRICT_NOT_EQ: Symbol = 24;
    pub(crate) const LT: Symbol = 25;
    pub(crate) const GT: Symbol = 26;
    pub(crate) const LT_EQ: Symbol = 27;
    pub(crate) const GT_EQ: Symbol = 28;
    pub(crate) const AND: Symbol = 29;
    pub(crate) const OR: Symbol = 30;
    pub(crate) const BANG: Symbol = 31;
    pub(crate) const QUESTION: Symbol = 32;
    pub(crate) const FUNCTION: Symbol = 33;
    pub(crate) const RETURN: Symbol = 34;
    pub(crate) const IF: Symbol = 35;
    pub(crate) const ELSE: Symbol = 36;
    pub(crate) const WHILE: Symbol = 37;
    pub(crate) const LET: Symbol = 38;
    pub(crate) const CONST: Symbol = 39;
    pub(crate) const VAR: Symbol = 40;
    pub(crate) const TRUE: Symbol = 41;
    pub(crate) const FALSE: Symbol = 42;
    pub(crate) const NULL: Symbol = 43;
    pub(crate) const THIS: Symbol = 44;
}

const REGEX_STATE: StateId = 1;

const KEYWORDS: &[(&str, Symbol)] = &[
    ("function", sym::FUNCTION),
    ("return", sym::RETURN),
    ("if", sym::IF),
    ("else", sym::ELSE),
    ("while", sym::WHILE),
    ("let", sym::LET),
    ("const", sym::CONST),
    ("var", sym::VAR),
    ("true", sym::TRUE),
    ("false", sym::FALSE),
    ("null", sym::NULL),
    ("this", sym::THIS),
];

mod precedence {
    pub(super) const ASSIGN: i32 = -2;
    pub(super) const TERNARY: i32 = -1;
    pub(super) const OR: i32 = 1;
    pub(super) const AND: i32 = 2;
    pub(super) const EQUALITY: i32 = 3;
    pub(super) const RELATIONAL: i32 = 4;
    pub(super) const ADD: i32 = 5;
    pub(super) const MULTIPLY: i32 = 6;
    pub(super) const UNARY: i32 = 7;
    pub(super) const CALL: i32 = 8;
    pub(super) const MEMBER: i32 = 9;
}

pub(crate) fn grammar() -> Grammar {
    Grammar::new("javascript", lex)
        .token(sym::IDENTIFIER, "identifier", true)
        .token(sym::NUMBER, "number", true)
        .token(sym::STRING, "string", true)
        .token(sym::REGEX, "regex", true)
        .token(sym::COMMENT, "comment", true)
        .token(sym::SEMICOLON, ";", false)
        .token(sym::LBRACE, "{", false)
        .token(sym::RBRACE, "}", false)
        .token(sym::LPAREN, "(", false)
        .token(sym::RPAREN, ")", false)
        .token(sym::LBRACKET, "[", false)
        .token(sym::RBRACKET, "]", false)
        .token(sym::COMMA, ",", false)
        .token(sym::DOT, ".", false)
        .token(sym::COLON, ":", false)
        .token(sym::EQ, "=", false)
        .token(sym::ARROW, "=>", false)
        .token(sym::PLUS, "+", false)
        .token(sym::MINUS, "-", false)
        .token(sym::STAR, "*", false)
        .token(sym::SLASH, "/", false)
        .token(sym::PERCENT, "%", false)
        .token(sym::STRICT_EQ, "===", false)
        .token(sym::STRICT_NOT_EQ, "!==", false)
        .token(sym::LT, "<", false)
        .token(sym::GT, ">", false)
        .token(sym::LT_EQ, "<=", false)
        .token(sym::GT_EQ, ">=", false)
        .token(sym::AND, "&&", false)
        .token(sym::OR, "||", false)
        .token(sym::BANG, "!", false)
        .token(sym::QUESTION, "?", false)
        .token(sym::FUNCTION, "function", false)
        .token(sym::RETURN, "return", false)
        .token(sym::IF, "if", false)
        .token(sym::ELSE, "else", false)
        .token(sym::WHILE, "while", false)
        .token(sym::LET, "let", false)
        .token(sym::CONST, "const", false)
        .token(sym::VAR, "var", false)
        .token(sym::TRUE, "true", true)
        .token(sym::FALSE, "false", true)
        .token(sym::NULL, "null", true)
        .token(sym::THIS, "this", true)
        .rule("program", repeat(sym("_statement")))
        .rule(
            "_statement",
            choice([
                sym("expression_statement"),
                sym("variable_declaration"),
                sym("lexical_declaration"),
                sym("function_declaration"),
                sym("return_statement"),
                sym("if_statement"),
                sym("while_statement"),
                sym("statement_block"),
                sym("empty_statement"),
            ]),
        )
        .rule("expression_statement", seq([sym("_expression"), string(";")]))
        .rule(
            "variable_declaration",
            seq([string("var"), sep1(sym("variable_declarator"), ","), string(";")]),
        )
        .rule(
            "lexical_declaration",
            seq([
                field("kind", choice([string("let"), string("const")])),
                sep1(sym("variable_declarator"), ","),
                string(";"),
            ]),
        )
        .rule(
            "variable_declarator",
            seq([
                field("name", sym("identifier")),
                optional(seq([string("="), field("value", sym("_expression"))])),
            ]),
        )
        .rule(
            "function_declaration",
            seq([
                string("function"),
                field("name", sym("identifier")),
                field("parameters", sym("formal_parameters")),
                field("body", sym("statement_block")),
            ]),
        )
        .rule("formal_parameters", seq([string("("), sep(sym("identifier"), ","), string(")")]))
        .rule("statement_block", seq([string("{"), repeat(sym("_statement")), string("}")]))
        .rule(
            "return_statement",
            seq([string("return"), optional(sym("_expression")), string(";")]),
        )
        .rule(
            "if_statement",
            prec_right(
                0,
                seq([
                    string("if"),
                    field("condition", sym("parenthesized_expression")),
                    field("consequence", sym("_statement")),
                    optional(field("alternative", sym("else_clause"))),
                ]),
            ),
        )
        .rule("else_clause", seq([string("else"), sym("_statement")]))
        .rule(
            "while_statement",
            seq([
                string("while"),
                field("condition", sym("parenthesized_expression")),
                field("body", sym("_statement")),
            ]),
        )
        .rule("empty_statement", string(";"))
        .rule(
            "_expression",
            choice([
                sym("_primary_expression"),
                sym("assignment_expression"),
                sym("binary_expression"),
                sym("unary_expression"),
                sym("ternary_expression"),
                sym("arrow_function"),
            ]),
        )
        .rule(
            "_primary_expression",
            choice([
                sym("identifier"),
                sym("number"),
                sym("string"),
                sym("regex"),
                sym("true"),
                sym("false"),
                sym("null"),
                sym("this"),
                sym("parenthesized_expression"),
                sym("array"),
                sym("object"),
                sym("call_expression"),
                sym("member_expression"),
                sym("subscript_expression"),
            ]),
        )
        .rule("parenthesized_expression", seq([string("("), sym("_expression"), string(")")]))
        .rule("array", seq([string("["), sep(sym("_expression"), ","), string("]")]))
        .rule("object", seq([string("{"), sep(sym("pair"), ","), string("}")]))
        .rule(
            "pair",
            seq([
                field(
                    "key",
                    choice([property_identifier(), sym("string"), sym("number")]),
                ),
                string(":"),
                field("value", sym("_expression")),
            ]),
        )
        .rule(
            "call_expression",
            prec(
                precedence::CALL,
                seq([
                    field("function", sym("_expression")),
                    field("arguments", sym("arguments")),
                ]),
            ),
        )
        .rule("arguments", seq([string("("), sep(sym("_expression"), ","), string(")")]))
        .rule(
            "member_expression",
            prec(
                precedence::MEMBER,
                seq([
                    field("object", sym("_expression")),
                    string("."),
                    field("property", property_identifier()),
                ]),
            ),
        )
        .rule(
            "subscript_expression",
            prec(
                precedence::MEMBER,
                seq([
                    field("object", sym("_expression")),
                    string("["),
                    field("index", sym("_expression")),
                    string("]"),
                ]),
            ),
        )
        .rule(
            "assignment_expression",
            prec_right(
                precedence::ASSIGN,
                seq([
                    field(
                        "left",
                        choice([
                            sym("identifier"),
                            sym("member_expression"),
                            sym("subscript_expression"),
                        ]),
                    ),
                    string("="),
                    field("right", sym("_expression")),
                ]),
            ),
        )
        .rule("binary_expression", binary_expression())
        .rule(
            "unary_expression",
            prec_left(
                precedence::UNARY,
                seq([
                    field("operator", choice([string("!"), string("-"), string("+")])),
                    field("argument", sym("_expression")),
                ]),
            ),
        )
        .rule(
            "ternary_expression",
            prec_right(
                precedence::TERNARY,
                seq([
                    field("condition", sym("_expression")),
                    string("?"),
                    field("consequence", sym("_expression")),
                    string(":"),
                    field("alternative", sym("_expression")),
                ]),
            ),
        )
        .rule(
            "arrow_function",
            prec_right(
                precedence::ASSIGN,
                seq([
                    choice([
                        field("parameter", sym("identifier")),
                        field("parameters", sym("formal_parameters")),
                    ]),
                    string("=>"),
                    field("body", choice([sym("_expression"), sym("statement_block")])),
                ]),
            ),
        )
        .extras([sym("comment")])
        .word("identifier", lex_keyword)
        .conflict(["statement_block", "object"])
        .conflict(["_primary_expression", "formal_parameters"])
        .supertype("_statement")
        .supertype("_expression")
        .supertype("_primary_expression")
        .lex_states(lex_state)
}

fn property_identifier() -> Rule {
    alias(sym("identifier"), "property_identifier", true)
}

fn binary_expression() -> Rule {
    let levels: [(i32, &[&'static str]); 6] = [
        (precedence::OR, &["||"]),
        (precedence::AND, &["&&"]),
        (precedence::EQUALITY, &["===", "!=="]),
        (precedence::RELATIONAL, &["<", ">", "<=", ">="]),
        (precedence::ADD, &["+", "-"]),
        (precedence::MULTIPLY, &["*", "/", "%"]),
    ];
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

/// A slash starts a regex wherever an operand is expected.
fn lex_state(valid: &[bool]) -> u16 {
    if valid[sym::REGEX as usize] && !valid[sym::SLASH as usize] { REGEX_STATE } else { 0 }
}

fn lex(lexer: &mut dyn LexContext, state: StateId) -> bool {
    skip_whitespace(lexer);
    if lexer.eof() {
        return accept(lexer, END);
    }
    match lexer.lookahead() {
        ';' => single(lexer, sym::SEMICOLON),
        '{' => single(lexer, sym::LBRACE),
        '}' => single(lexer, sym::RBRACE),
        '(' => single(lexer, sym::LPAREN),
        ')' => single(lexer, sym::RPAREN),
        '[' => single(lexer, sym::LBRACKET),
        ']' => single(lexer, sym::RBRACKET),
        ',' => single(lexer, sym::COMMA),
        '.' => single(lexer, sym::DOT),
        ':' => single(lexer, sym::COLON),
        '?' => single(lexer, sym::QUESTION),
        '+' => single(lexer, sym::PLUS),
        '-' => single(lexer, sym::MINUS),
        '*' => single(lexer, sym::STAR),
        '%' => single(lexer, sym::PERCENT),
        '<' => single_or_double(lexer, '=', sym::LT, sym::LT_EQ),
        '>' => single_or_double(lexer, '=', sym::GT, sym::GT_EQ),
        '=' => {
            lexer.advance(false);
            match lexer.lookahead() {
                '>' => single(lexer, sym::ARROW),
                '=' => {
                    lexer.advance(false);
                    lexer.lookahead() == '=' && single(lexer, sym::STRICT_EQ)
                }
                _ => accept(lexer, sym::EQ),
            }
        }
        '!' => {
            lexer.advance(false);
            if lexer.lookahead() != '=' {
                return accept(lexer, sym::BANG);
            }
            lexer.advance(false);
            lexer.lookahead() == '=' && single(lexer, sym::STRICT_NOT_EQ)
        }
        '&' => {
            lexer.advance(false);
            lexer.lookahead() == '&' && single(lexer, sym::AND)
        }
        '|' => {
            lexer.advance(false);
            lexer.lookahead() == '|' && single(lexer, sym::OR)
        }
        '/' => {
            lexer.advance(false);
            match lexer.lookahead() {
                '/' | '*' => comment_after_slash(lexer, sym::COMMENT),
                _ if state == REGEX_STATE => regex(lexer),
                _ => accept(lexer, sym::SLASH),
            }
        }
        '"' | '\'' => quoted(lexer, sym::STRING),
        '0'..='9' => number(lexer, sym::NUMBER),
        c if is_identifier_start(c) => {
            take_while(lexer, is_identifier_char);
            accept(lexer, sym::IDENTIFIER)
        }
        _ => false,
    }
}

/// The body and flags of a regex literal, after its opening slash.
fn regex(lexer: &mut dyn LexContext) -> bool {
    let mut in_class = false;
    loop {
        if lexer.eof() {
            return false;
        }
        match lexer.lookahead() {
            '\n' => return false,
            '\\' => {
                lexer.advance(false);
                if lexer.eof() {
                    return false;
                }
            }
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => break,
            _ => {}
        }
        lexer.advance(false);
    }
    lexer.advance(false);
    take_while(lexer, |c| c.is_ascii_alphabetic());
    accept(lexer, sym::REGEX)
}

fn lex_keyword(lexer: &mut dyn LexContext, _state: StateId) -> bool {
    keyword(lexer, KEYWORDS)
}
