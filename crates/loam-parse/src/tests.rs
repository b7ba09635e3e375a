use std::io;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use expect_test::{Expect, expect};
use loam_language::Language;
use loam_span::{InputEdit, Point, Range, TextSize};
use loam_tree::Tree;

use crate::{LogType, ParseOptions, ParseState, Parser};

fn parser(language: &Language) -> Parser {
    let mut parser = Parser::new();
    parser.set_language(language).unwrap();
    parser
}

fn parse(language: &Language, text: &str) -> Tree {
    parser(language).parse(text, None).unwrap()
}

fn check(language: &Language, text: &str, expect: Expect) {
    let tree = parse(language, text);
    expect.assert_eq(&tree.root_node().to_sexp());
}

/// Collects logger output so that tests can look for specific steps.
fn record_log(parser: &mut Parser) -> Arc<Mutex<Vec<(LogType, String)>>> {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&messages);
    parser.set_logger(Some(Box::new(move |kind, message: &str| {
        sink.lock().unwrap().push((kind, message.to_owned()));
    })));
    messages
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn long_json_array(count: usize) -> String {
    let items: Vec<String> = (0..count).map(|item| item.to_string()).collect();
    format!("[{}]", items.join(", "))
}

#[test]
fn json_document() {
    check(
        &loam_grammars::json(),
        r#"{"a": [1, true, null]}"#,
        expect![[r#"(document (object (pair key: (string (string_content)) value: (array (number) (true) (null)))))"#]],
    );
}

#[test]
fn json_string_escapes() {
    check(
        &loam_grammars::json(),
        r#""a\nb""#,
        expect![[r#"(document (string (string_content) (escape_sequence) (string_content)))"#]],
    );
}

#[test]
fn json_comments_are_extras() {
    check(
        &loam_grammars::json(),
        "[1, /* two */ 2] // done",
        expect![[r#"(document (array (number) (comment) (number)) (comment))"#]],
    );
}

#[test]
fn empty_document() {
    let tree = parse(&loam_grammars::json(), "");
    let root = tree.root_node();
    assert_eq!(root.kind(), "document");
    assert_eq!(root.child_count(), 0);
    assert!(!root.has_error());
}

#[test]
fn node_positions() {
    let text = "{\n  \"key\": 10\n}";
    let tree = parse(&loam_grammars::json(), text);
    let object = tree.root_node().named_child(0).unwrap();
    assert_eq!(object.kind(), "object");
    assert_eq!(object.byte_range(), 0..text.len());

    let pair = object.named_child(0).unwrap();
    let value = pair.child_by_field_name("value").unwrap();
    assert_eq!(value.kind(), "number");
    assert_eq!(value.utf8_text(text.as_bytes()).unwrap(), "10");
    assert_eq!(value.start_position(), Point::new(1, 9));
    assert_eq!(value.end_position(), Point::new(1, 11));
    assert_eq!(pair.child_by_field_name("key").unwrap().kind(), "string");
}

#[test]
fn javascript_operator_precedence() {
    check(
        &loam_grammars::javascript(),
        "let x = a + b * c;",
        expect![[r#"(program (lexical_declaration (variable_declarator name: (identifier) value: (binary_expression left: (identifier) right: (binary_expression left: (identifier) right: (identifier))))))"#]],
    );
}

#[test]
fn javascript_associativity() {
    check(
        &loam_grammars::javascript(),
        "a - b - c; a = b = c;",
        expect![[r#"(program (expression_statement (binary_expression left: (binary_expression left: (identifier) right: (identifier)) right: (identifier))) (expression_statement (assignment_expression left: (identifier) right: (assignment_expression left: (identifier) right: (identifier)))))"#]],
    );
}

#[test]
fn javascript_dangling_else() {
    check(
        &loam_grammars::javascript(),
        "if (a) if (b) c; else d;",
        expect![[r#"(program (if_statement condition: (parenthesized_expression (identifier)) consequence: (if_statement condition: (parenthesized_expression (identifier)) consequence: (expression_statement (identifier)) alternative: (else_clause (expression_statement (identifier))))))"#]],
    );
}

#[test]
fn javascript_ambiguous_parentheses() {
    check(
        &loam_grammars::javascript(),
        "(a) => a; (b);",
        expect![[r#"(program (expression_statement (arrow_function parameters: (formal_parameters (identifier)) body: (identifier))) (expression_statement (parenthesized_expression (identifier))))"#]],
    );
}

#[test]
fn javascript_regex_and_division() {
    check(
        &loam_grammars::javascript(),
        "x = a / b; y = /ab+c/g;",
        expect![[r#"(program (expression_statement (assignment_expression left: (identifier) right: (binary_expression left: (identifier) right: (identifier)))) (expression_statement (assignment_expression left: (identifier) right: (regex))))"#]],
    );
}

#[test]
fn javascript_keyword_as_property() {
    check(
        &loam_grammars::javascript(),
        "a.if;",
        expect![[r#"(program (expression_statement (member_expression object: (identifier) property: (property_identifier))))"#]],
    );
}

#[test]
fn javascript_calls_and_functions() {
    check(
        &loam_grammars::javascript(),
        "function f(a, b) { return g(a)[b]; }",
        expect![[r#"(program (function_declaration name: (identifier) parameters: (formal_parameters (identifier) (identifier)) body: (statement_block (return_statement (subscript_expression object: (call_expression function: (identifier) arguments: (arguments (identifier))) index: (identifier))))))"#]],
    );
}

#[test]
fn missing_token_is_inserted() {
    let tree = parse(&loam_grammars::javascript(), "let a = 1\nlet b = 2;");
    let root = tree.root_node();
    assert!(root.has_error());
    assert!(root.to_sexp().contains(r#"(MISSING ";")"#), "{}", root.to_sexp());

    let first = root.named_child(0).unwrap();
    assert_eq!(first.kind(), "lexical_declaration");
    let missing = first.child(first.child_count() - 1).unwrap();
    assert!(missing.is_missing());
    assert_eq!(missing.start_byte(), missing.end_byte());
}

#[test]
fn unexpected_characters_become_errors() {
    let text = r#"{"a": 1 @}"#;
    let tree = parse(&loam_grammars::json(), text);
    let root = tree.root_node();
    assert!(root.has_error());
    let sexp = root.to_sexp();
    assert!(sexp.contains("(pair"), "{sexp}");
    assert!(sexp.contains("ERROR"), "{sexp}");
    assert_eq!(root.end_byte(), text.len());
}

#[test]
fn errors_span_the_whole_input() {
    let text = "let = ;\nlet ok = 1;";
    let tree = parse(&loam_grammars::javascript(), text);
    let root = tree.root_node();
    assert_eq!(root.kind(), "program");
    assert!(root.has_error());
    assert_eq!(root.end_byte(), text.len());
    let last = root.named_child(root.named_child_count() - 1).unwrap();
    assert_eq!(last.kind(), "lexical_declaration");
    assert!(!last.has_error());
}

#[test]
fn rust_fields_and_aliases() {
    check(
        &loam_grammars::rust(),
        "pub fn add(a: i32, b: &mut i32) -> i32 { a + b }",
        expect![[r#"(source_file (function_item (visibility_modifier) name: (identifier) parameters: (parameters (parameter pattern: (identifier) type: (type_identifier)) (parameter pattern: (identifier) type: (reference_type (mutable_specifier) type: (type_identifier)))) return_type: (type_identifier) body: (block (binary_expression left: (identifier) right: (identifier)))))"#]],
    );
}

#[test]
fn rust_struct() {
    check(
        &loam_grammars::rust(),
        "struct Point { x: i32, pub y: i32, }",
        expect![[r#"(source_file (struct_item name: (type_identifier) body: (field_declaration_list (field_declaration name: (field_identifier) type: (type_identifier)) (field_declaration (visibility_modifier) name: (field_identifier) type: (type_identifier)))))"#]],
    );
}

#[test]
fn external_scanner_tokens() {
    let text = "cat <<EOF\nhello\nworld\nEOF\necho done;\n";
    let tree = parse(&loam_grammars::heredoc(), text);
    expect![[r#"(program (command name: (word) redirect: (heredoc_redirect delimiter: (heredoc_start)) body: (heredoc_body)) (command name: (word) argument: (word)))"#]]
        .assert_eq(&tree.root_node().to_sexp());

    let command = tree.root_node().named_child(0).unwrap();
    let body = command.child_by_field_name("body").unwrap();
    assert_eq!(body.utf8_text(text.as_bytes()).unwrap(), "hello\nworld\nEOF");
}

#[test]
fn logger_receives_parse_and_lex_messages() {
    let mut parser = parser(&loam_grammars::json());
    let messages = record_log(&mut parser);
    parser.parse("[1]", None).unwrap();

    let messages = messages.lock().unwrap();
    let parse_messages: Vec<&str> = messages
        .iter()
        .filter(|(kind, _)| *kind == LogType::Parse)
        .map(|(_, message)| message.as_str())
        .collect();
    assert_eq!(parse_messages.first(), Some(&"new_parse"));
    assert_eq!(parse_messages.last(), Some(&"done"));
    assert!(parse_messages.contains(&"accept"));
    assert!(parse_messages.iter().any(|message| message.starts_with("shift state:")));
    assert!(parse_messages.iter().any(|message| message.starts_with("reduce sym:array")));
    assert!(
        messages
            .iter()
            .any(|(kind, message)| *kind == LogType::Lex && message == "consume character:'['")
    );
}

#[test]
fn dot_graphs() {
    let mut parser = parser(&loam_grammars::json());
    let out = SharedBuffer::default();
    parser.print_dot_graphs(out.clone());
    parser.parse("[1]", None).unwrap();
    parser.stop_printing_dot_graphs();

    let text = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
    assert!(text.contains("digraph stack {"));
    assert!(text.contains("digraph tree {"));
    assert!(text.contains("label=\"new_parse\""));
}

#[test]
fn tracing_subscriber_sees_parse() {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .finish();
    let tree = tracing::subscriber::with_default(subscriber, || {
        parse(&loam_grammars::json(), "[true]")
    });
    assert_eq!(tree.root_node().to_sexp(), "(document (array (true)))");
}

#[test]
fn incremental_reparse_reuses_unchanged_statements() {
    let language = loam_grammars::javascript();
    let old_text = "let a = 1;\nlet b = 2;\nlet c = 3;\n";
    let new_text = "let a = 1;\nlet b = 22;\nlet c = 3;\n";
    let mut parser = parser(&language);
    let mut tree = parser.parse(old_text, None).unwrap();

    tree.edit(&InputEdit {
        start_byte: TextSize::new(19),
        old_end_byte: TextSize::new(20),
        new_end_byte: TextSize::new(21),
        start_position: Point::new(1, 8),
        old_end_position: Point::new(1, 9),
        new_end_position: Point::new(1, 10),
    });
    assert!(tree.root_node().has_changes());

    let messages = record_log(&mut parser);
    let new_tree = parser.parse(new_text, Some(&tree)).unwrap();
    assert_eq!(new_tree.root_node().to_sexp(), parse(&language, new_text).root_node().to_sexp());
    assert_eq!(new_tree.root_node().end_byte(), new_text.len());

    let messages = messages.lock().unwrap();
    assert!(messages.iter().any(|(_, message)| message == "parse_after_edit"));
    assert!(messages.iter().any(|(_, message)| message.starts_with("reuse_node")));
}

#[test]
fn incremental_reparse_after_deleting_everything() {
    let language = loam_grammars::json();
    let mut parser = parser(&language);
    let mut tree = parser.parse("[1, 2]", None).unwrap();
    tree.edit(&InputEdit {
        start_byte: TextSize::new(0),
        old_end_byte: TextSize::new(6),
        new_end_byte: TextSize::new(0),
        start_position: Point::new(0, 0),
        old_end_position: Point::new(0, 6),
        new_end_position: Point::new(0, 0),
    });
    let new_tree = parser.parse("", Some(&tree)).unwrap();
    assert_eq!(new_tree.root_node().to_sexp(), "(document)");
}

#[test]
fn cancellation_halts_and_resumes() {
    let text = long_json_array(2000);
    let mut parser = parser(&loam_grammars::json());
    let flag = Arc::new(AtomicUsize::new(1));
    parser.set_cancellation_flag(Some(Arc::clone(&flag)));
    assert!(parser.parse(&text, None).is_none());

    flag.store(0, Ordering::Relaxed);
    let tree = parser.parse(&text, None).unwrap();
    let array = tree.root_node().named_child(0).unwrap();
    assert_eq!(array.named_child_count(), 2000);
    assert!(!tree.root_node().has_error());
}

#[test]
fn timeout_halts_and_resumes() {
    let text = long_json_array(2000);
    let mut parser = parser(&loam_grammars::json());
    parser.set_timeout_micros(1);
    assert_eq!(parser.timeout_micros(), 1);
    assert!(parser.parse(&text, None).is_none());

    parser.set_timeout_micros(0);
    let tree = parser.parse(&text, None).unwrap();
    assert_eq!(tree.root_node().named_child(0).unwrap().named_child_count(), 2000);
}

#[test]
fn reset_discards_halted_parse() {
    let mut parser = parser(&loam_grammars::json());
    parser.set_timeout_micros(1);
    assert!(parser.parse(long_json_array(2000), None).is_none());

    parser.set_timeout_micros(0);
    parser.reset();
    let tree = parser.parse("[true]", None).unwrap();
    assert_eq!(tree.root_node().to_sexp(), "(document (array (true)))");
}

#[test]
fn progress_callback_can_halt() {
    let text = long_json_array(2000);
    let bytes = text.as_bytes();
    let mut read = |offset: usize, _: Point| &bytes[offset.min(bytes.len())..];
    let mut parser = parser(&loam_grammars::json());

    let mut halt = |_: &ParseState| ControlFlow::Break(());
    let options = ParseOptions::new().progress_callback(&mut halt);
    assert!(parser.parse_with_options(&mut read, None, options).is_none());
    parser.reset();

    let mut calls = 0;
    let mut last_offset = 0;
    let mut count = |state: &ParseState| {
        calls += 1;
        last_offset = state.current_byte_offset();
        ControlFlow::Continue(())
    };
    let options = ParseOptions::new().progress_callback(&mut count);
    let tree = parser.parse_with_options(&mut read, None, options).unwrap();
    assert!(!tree.root_node().has_error());
    assert!(calls > 0);
    assert!(last_offset > 0);
}

#[test]
fn included_ranges_skip_other_text() {
    let text = "xx[1, yy 2]";
    let mut parser = parser(&loam_grammars::json());
    let ranges = [
        Range::new(TextSize::new(2), TextSize::new(6), Point::new(0, 2), Point::new(0, 6)),
        Range::new(TextSize::new(9), TextSize::new(11), Point::new(0, 9), Point::new(0, 11)),
    ];
    parser.set_included_ranges(&ranges).unwrap();
    assert_eq!(parser.included_ranges(), ranges);

    let tree = parser.parse(text, None).unwrap();
    let root = tree.root_node();
    assert_eq!(root.to_sexp(), "(document (array (number) (number)))");
    let array = root.named_child(0).unwrap();
    assert_eq!(array.named_child(1).unwrap().start_byte(), 9);
    assert_eq!(tree.included_ranges(), ranges);
}

#[test]
fn unordered_included_ranges_are_rejected() {
    let mut parser = parser(&loam_grammars::json());
    let first = Range::new(TextSize::new(0), TextSize::new(4), Point::new(0, 0), Point::new(0, 4));
    let second = Range::new(TextSize::new(8), TextSize::new(9), Point::new(0, 8), Point::new(0, 9));
    assert!(parser.set_included_ranges(&[second, first]).is_err());
    assert!(parser.set_included_ranges(&[first, second]).is_ok());
    assert_eq!(parser.included_ranges(), [first, second]);
}

#[test]
fn utf16_input() {
    let text: Vec<u16> = "[1, 2]".encode_utf16().collect();
    let mut parser = parser(&loam_grammars::json());
    let tree = parser.parse_utf16_le(&text, None).unwrap();
    let root = tree.root_node();
    assert_eq!(root.to_sexp(), "(document (array (number) (number)))");
    assert_eq!(root.end_byte(), text.len() * 2);
    let second = root.named_child(0).unwrap().named_child(1).unwrap();
    assert_eq!(second.start_byte(), 8);
    assert_eq!(second.utf16_text(&text), &text[4..5]);
}

#[test]
fn non_ascii_identifiers() {
    let text = "let größe = naïve;";
    let tree = parse(&loam_grammars::javascript(), text);
    let declarator = tree.root_node().named_child(0).unwrap().named_child(0).unwrap();
    let name = declarator.child_by_field_name("name").unwrap();
    assert_eq!(name.utf8_text(text.as_bytes()).unwrap(), "größe");
    assert!(!tree.root_node().has_error());
}

#[test]
fn parse_without_language() {
    let mut parser = Parser::new();
    assert!(parser.language().is_none());
    assert!(parser.parse("[]", None).is_none());
}
