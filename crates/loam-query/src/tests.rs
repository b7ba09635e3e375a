use std::fmt::Write as _;
use std::ops::ControlFlow;

use expect_test::{Expect, expect};
use loam_language::Language;
use loam_parse::Parser;
use loam_span::Point;
use loam_tree::Tree;

use crate::{
    CaptureQuantifier, Query, QueryCursor, QueryCursorOptions, QueryErrorKind, QueryPredicate,
    QueryPredicateArg, QueryProperty,
};

fn parse(language: &Language, text: &str) -> Tree {
    let mut parser = Parser::new();
    parser.set_language(language).unwrap();
    parser.parse(text, None).unwrap()
}

fn query(language: &Language, source: &str) -> Query {
    match Query::new(language, source) {
        Ok(query) => query,
        Err(error) => panic!("{source:?} should compile: {error}"),
    }
}

/// One line per match: the pattern index followed by `name=text` for each
/// capture.
fn format_matches(cursor: &mut QueryCursor, query: &Query, tree: &Tree, text: &str) -> String {
    let mut out = String::new();
    for query_match in cursor.matches(query, tree.root_node(), text.as_bytes()) {
        write!(out, "{}:", query_match.pattern_index).unwrap();
        for capture in &query_match.captures {
            let name = &query.capture_names()[capture.index as usize];
            write!(out, " {name}={}", capture.node.utf8_text(text.as_bytes()).unwrap()).unwrap();
        }
        out.push('\n');
    }
    out
}

fn check_matches(language: &Language, source: &str, text: &str, expect: Expect) {
    let query = query(language, source);
    let tree = parse(language, text);
    expect.assert_eq(&format_matches(&mut QueryCursor::new(), &query, &tree, text));
}

fn capture_texts<'a>(cursor: &mut QueryCursor, query: &Query, tree: &Tree, text: &'a str) -> Vec<&'a str> {
    cursor
        .captures(query, tree.root_node(), text.as_bytes())
        .map(|(query_match, index)| query_match.captures[index].node.utf8_text(text.as_bytes()).unwrap())
        .collect()
}

fn error(language: &Language, source: &str) -> (QueryErrorKind, usize, String) {
    match Query::new(language, source) {
        Ok(_) => panic!("{source:?} should be rejected"),
        Err(error) => (error.kind, error.offset, error.message),
    }
}

#[test]
fn captures_within_byte_range() {
    let language = loam_grammars::javascript();
    let text = "[a, b, c, d, e, f, g]";
    let query = query(&language, "(identifier) @element");
    let tree = parse(&language, text);

    let mut cursor = QueryCursor::new();
    cursor.set_byte_range(0..8);
    assert_eq!(capture_texts(&mut cursor, &query, &tree, text), ["a", "b", "c"]);
}

#[test]
fn captures_within_point_range() {
    let language = loam_grammars::javascript();
    let text = "a;\nb;\nc;";
    let query = query(&language, "(identifier) @id");
    let tree = parse(&language, text);

    let mut cursor = QueryCursor::new();
    cursor.set_point_range(Point::new(1, 0)..Point::new(2, 0));
    assert_eq!(capture_texts(&mut cursor, &query, &tree, text), ["b"]);
}

#[test]
fn max_start_depth_limits_where_matches_begin() {
    let language = loam_grammars::javascript();
    let text = "a; [b];";
    let query = query(&language, "(identifier) @id");
    let tree = parse(&language, text);

    let mut cursor = QueryCursor::new();
    cursor.set_max_start_depth(Some(2));
    assert_eq!(capture_texts(&mut cursor, &query, &tree, text), ["a"]);
    cursor.set_max_start_depth(None);
    assert_eq!(capture_texts(&mut cursor, &query, &tree, text), ["a", "b"]);
}

#[test]
fn fields_select_children() {
    check_matches(
        &loam_grammars::javascript(),
        "(member_expression object: (identifier) @object property: (property_identifier) @property)",
        "a.b; c.d.e;",
        expect![[r#"
            0: object=a property=b
            0: object=c property=d
        "#]],
    );
}

#[test]
fn nested_patterns_capture_inner_nodes() {
    check_matches(
        &loam_grammars::javascript(),
        "(call_expression function: (identifier) @callee arguments: (arguments (identifier) @arg))",
        "f(a, b); g(1);",
        expect![[r#"
            0: callee=f arg=a
            0: callee=f arg=b
        "#]],
    );
}

#[test]
fn several_patterns_match_in_one_pass() {
    check_matches(
        &loam_grammars::json(),
        r#"(pair key: (string) @key) (number) @number"#,
        r#"{"a": 1, "b": [2]}"#,
        expect![[r#"
            0: key="a"
            1: number=1
            0: key="b"
            1: number=2
        "#]],
    );
}

#[test]
fn anchors_pin_first_and_last_children() {
    let language = loam_grammars::javascript();
    let text = "[a, b, c];";
    check_matches(&language, "(array . (identifier) @first)", text, expect![[r#"
        0: first=a
    "#]]);
    check_matches(&language, "(array (identifier) @last .)", text, expect![[r#"
        0: last=c
    "#]]);
    check_matches(&language, "(array (identifier) @left . (identifier) @right)", text, expect![[r#"
        0: left=a right=b
        0: left=b right=c
    "#]]);
}

#[test]
fn alternations_match_any_branch() {
    check_matches(
        &loam_grammars::javascript(),
        "[(number) (string)] @literal",
        r#"f(1, "a", b);"#,
        expect![[r#"
            0: literal=1
            0: literal="a"
        "#]],
    );
}

#[test]
fn negated_fields_exclude_nodes_with_that_field() {
    check_matches(
        &loam_grammars::javascript(),
        "(arrow_function !parameters) @arrow",
        "a => a; (b) => b;",
        expect![[r#"
            0: arrow=a => a
        "#]],
    );
}

#[test]
fn supertypes_match_their_subtypes() {
    check_matches(
        &loam_grammars::javascript(),
        "(expression_statement (_expression) @value)",
        "a; 1;",
        expect![[r#"
            0: value=a
            0: value=1
        "#]],
    );
}

#[test]
fn missing_nodes_can_be_queried() {
    let language = loam_grammars::javascript();
    let text = "let a = 1\nlet b = 2;";
    let query = query(&language, r#"(MISSING ";") @missing"#);
    let tree = parse(&language, text);

    let mut cursor = QueryCursor::new();
    let matches: Vec<_> = cursor.matches(&query, tree.root_node(), text.as_bytes()).collect();
    let [query_match] = matches.as_slice() else { panic!("expected one match, got {matches:?}") };
    let node = query_match.captures[0].node;
    assert!(node.is_missing());
    assert_eq!(node.start_byte(), node.end_byte());
}

#[test]
fn repetitions_collect_siblings() {
    let language = loam_grammars::javascript();
    let text = "[1, 2, 3];";
    let query = query(&language, "(array (number)+ @numbers)");
    let tree = parse(&language, text);

    let mut cursor = QueryCursor::new();
    let longest = cursor
        .matches(&query, tree.root_node(), text.as_bytes())
        .map(|query_match| query_match.nodes_for_capture_index(0).count())
        .max();
    assert_eq!(longest, Some(3));
}

#[test]
fn text_predicates_filter_matches() {
    let language = loam_grammars::javascript();
    let text = "a; b; c;";
    check_matches(&language, r#"((identifier) @id (#eq? @id "b"))"#, text, expect![[r#"
        0: id=b
    "#]]);
    check_matches(&language, r#"((identifier) @id (#not-eq? @id "b"))"#, text, expect![[r#"
        0: id=a
        0: id=c
    "#]]);
    check_matches(&language, r#"((identifier) @id (#match? @id "^[ab]$"))"#, text, expect![[r#"
        0: id=a
        0: id=b
    "#]]);
    check_matches(&language, r#"((identifier) @id (#any-of? @id "a" "c"))"#, text, expect![[r#"
        0: id=a
        0: id=c
    "#]]);
    check_matches(&language, r#"((identifier) @id (#not-any-of? @id "a" "c"))"#, text, expect![[r#"
        0: id=b
    "#]]);
}

#[test]
fn eq_predicates_compare_two_captures() {
    check_matches(
        &loam_grammars::javascript(),
        "((assignment_expression left: (identifier) @left right: (identifier) @right) (#eq? @left @right))",
        "a = a; b = c;",
        expect![[r#"
            0: left=a right=a
        "#]],
    );
}

#[test]
fn text_predicates_read_chunks_from_a_callback() {
    let language = loam_grammars::javascript();
    let text = "ab; ba;";
    let query = query(&language, r#"((identifier) @id (#eq? @id "ba"))"#);
    let tree = parse(&language, text);

    let mut cursor = QueryCursor::new();
    let provider = |node: loam_tree::Node<'_>| {
        node.byte_range().map(|index| std::slice::from_ref(&text.as_bytes()[index]))
    };
    let ids: Vec<_> = cursor
        .matches(&query, tree.root_node(), provider)
        .map(|query_match| query_match.captures[0].node.start_byte())
        .collect();
    assert_eq!(ids, [4]);
}

#[test]
fn properties_and_general_predicates_are_exposed() {
    let language = loam_grammars::javascript();
    let query = query(
        &language,
        "((identifier) @id (#set! kind var) (#is? local) (#is-not? @id global) (#select-adjacent! @id \"x\"))\n(number)",
    );
    assert_eq!(query.pattern_count(), 2);
    assert_eq!(query.property_settings(0), [QueryProperty::new("kind", Some("var"), None)]);
    assert_eq!(
        query.property_predicates(0),
        [
            (QueryProperty::new("local", None, None), true),
            (QueryProperty::new("global", None, Some(0)), false),
        ]
    );
    assert_eq!(
        query.general_predicates(0),
        [QueryPredicate {
            operator: "select-adjacent!".into(),
            args: vec![QueryPredicateArg::Capture(0), QueryPredicateArg::String("x".into())].into(),
        }]
    );
    assert!(query.property_settings(1).is_empty());
    assert!(query.text_predicates(1).is_empty());
}

#[test]
fn pattern_byte_ranges() {
    let language = loam_grammars::json();
    let source = "(number) @n\n((string) @s (#eq? @s \"\\\"a\\\"\"))\n";
    let query = query(&language, source);
    assert_eq!(query.start_byte_for_pattern(0), 0);
    assert_eq!(query.start_byte_for_pattern(1), 12);
    assert_eq!(query.end_byte_for_pattern(1), source.len());
}

#[test]
fn capture_quantifiers_follow_the_pattern_shape() {
    let language = loam_grammars::javascript();
    let query = query(
        &language,
        "(array (identifier)? @optional (number)* @many (string)+ @some) @array\n[(identifier) @either (number)]",
    );
    let index = |name: &str| query.capture_index_for_name(name).unwrap() as usize;

    let first = query.capture_quantifiers(0);
    assert_eq!(first[index("array")], CaptureQuantifier::One);
    assert_eq!(first[index("optional")], CaptureQuantifier::ZeroOrOne);
    assert_eq!(first[index("many")], CaptureQuantifier::ZeroOrMore);
    assert_eq!(first[index("some")], CaptureQuantifier::OneOrMore);
    assert_eq!(first[index("either")], CaptureQuantifier::Zero);

    let second = query.capture_quantifiers(1);
    assert_eq!(second[index("either")], CaptureQuantifier::ZeroOrOne);
    assert_eq!(second[index("array")], CaptureQuantifier::Zero);
}

#[test]
fn rooted_and_non_local_patterns() {
    let language = loam_grammars::javascript();
    let query = query(
        &language,
        "(identifier) ((identifier) (number)) [(identifier) (number)] ((else_clause) (statement_block))",
    );
    assert!(query.is_pattern_rooted(0));
    assert!(!query.is_pattern_non_local(0));

    assert!(!query.is_pattern_rooted(1));
    assert!(query.is_pattern_non_local(1));

    assert!(query.is_pattern_rooted(2));

    assert!(!query.is_pattern_rooted(3));
    assert!(!query.is_pattern_non_local(3));
}

#[test]
fn guaranteed_steps() {
    let language = loam_grammars::json();
    let query = query(&language, "(pair key: (string) @key)");
    assert!(!query.is_pattern_guaranteed_at_step(0));
    assert!(query.is_pattern_guaranteed_at_step(6));

    let query = self::query(&language, r#"((pair key: (string) @key) (#eq? @key "\"a\""))"#);
    assert!(!query.is_pattern_guaranteed_at_step(7));
}

#[test]
fn invalid_names_are_reported_with_their_offset() {
    let language = loam_grammars::javascript();
    assert_eq!(error(&language, "(clas)"), (QueryErrorKind::NodeType, 1, "clas".to_owned()));
    assert_eq!(error(&language, "(program (wat))"), (QueryErrorKind::NodeType, 10, "wat".to_owned()));
    assert_eq!(
        error(&language, "(member_expression foo: (identifier))"),
        (QueryErrorKind::Field, 19, "foo".to_owned())
    );
    assert_eq!(
        error(&language, r#"((identifier) @a (#eq? @b "x"))"#),
        (QueryErrorKind::Capture, 24, "b".to_owned())
    );
}

#[test]
fn impossible_patterns_are_rejected() {
    let language = loam_grammars::javascript();
    let kind_and_offset = |source: &str| {
        let (kind, offset, _) = error(&language, source);
        (kind, offset)
    };
    assert_eq!(kind_and_offset("(if_statement (identifier))"), (QueryErrorKind::Structure, 14));
    assert_eq!(
        kind_and_offset("(member_expression property: (identifier))"),
        (QueryErrorKind::Structure, 19)
    );
    assert_eq!(kind_and_offset("(binary_expression name: (identifier))"), (QueryErrorKind::Structure, 19));
    assert_eq!(kind_and_offset("(_statement/identifier)"), (QueryErrorKind::Structure, 0));

    let (_, _, message) = error(&language, "(if_statement (identifier))");
    assert_eq!(message, "(if_statement (identifier))\n              ^");

    assert!(Query::new(&language, "(_expression/identifier) @e").is_ok());
    assert!(Query::new(&language, "(if_statement (comment))").is_ok());
}

#[test]
fn invalid_predicates_are_rejected() {
    let language = loam_grammars::javascript();
    let predicate_error = |source: &str| {
        let (kind, _, message) = error(&language, source);
        assert_eq!(kind, QueryErrorKind::Predicate);
        message
    };
    expect![[r#"Wrong number of arguments to #eq? predicate. Expected 2, got 1."#]]
        .assert_eq(&predicate_error("((identifier) @a (#eq? @a))"));
    expect![[r#"First argument to #match? predicate must be a capture name. Got literal a."#]]
        .assert_eq(&predicate_error(r#"((identifier) @a (#match? "a" @a))"#));
    expect![[r#"Invalid regex: '('"#]].assert_eq(&predicate_error(r#"((identifier) @a (#match? @a "("))"#));
    expect![[r#"Arguments to #any-of? predicate must be literals. Got capture @a."#]]
        .assert_eq(&predicate_error("((identifier) @a (#any-of? @a @a))"));
    expect![[r#"Invalid arguments to set! predicate. Missing key argument"#]]
        .assert_eq(&predicate_error("((identifier) @a (#set! @a))"));
}

#[test]
fn error_display() {
    let language = loam_grammars::javascript();
    let Err(error) = Query::new(&language, "(identifier)\n(clas)") else { panic!("should fail") };
    assert_eq!(error.to_string(), "Query error at 2:2. Invalid node type clas");

    let Err(error) = Query::new(&language, "(identifier") else { panic!("should fail") };
    assert_eq!(error.kind, QueryErrorKind::Syntax);
}

#[test]
fn captures_are_ordered_by_position() {
    let language = loam_grammars::javascript();
    let text = "f(x); y;";
    let query = query(&language, "(call_expression) @call (identifier) @id");
    let tree = parse(&language, text);
    assert_eq!(capture_texts(&mut QueryCursor::new(), &query, &tree, text), ["f(x)", "f", "x", "y"]);
}

#[test]
fn removed_matches_yield_no_further_captures() {
    let language = loam_grammars::javascript();
    let text = "f(a); g(b);";
    let query = query(&language, "(call_expression function: (identifier) @callee arguments: (arguments (identifier) @arg))");
    let tree = parse(&language, text);

    let mut cursor = QueryCursor::new();
    let mut seen = Vec::new();
    for (query_match, index) in cursor.captures(&query, tree.root_node(), text.as_bytes()) {
        let node = query_match.captures[index].node;
        seen.push(node.utf8_text(text.as_bytes()).unwrap());
        if node.start_byte() == 0 {
            query_match.remove();
        }
    }
    assert_eq!(seen, ["f", "g", "b"]);
}

#[test]
fn exhausted_iterators_stay_exhausted() {
    let language = loam_grammars::javascript();
    let text = "a;";
    let query = query(&language, "(identifier) @id");
    let tree = parse(&language, text);

    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&query, tree.root_node(), text.as_bytes());
    assert!(matches.next().is_some());
    assert!(matches.next().is_none());
    assert!(matches.next().is_none());
}

#[test]
fn disabled_captures_and_patterns() {
    let language = loam_grammars::javascript();
    let text = r#"f(a, "s");"#;
    let tree = parse(&language, text);

    let mut query = query(&language, "(call_expression function: (identifier) @callee arguments: (arguments (identifier) @arg))");
    query.disable_capture("arg");
    assert_eq!(capture_texts(&mut QueryCursor::new(), &query, &tree, text), ["f"]);
    assert_eq!(query.capture_names().len(), 2);

    let mut query = self::query(&language, "(identifier) @id (string) @string");
    query.disable_pattern(0);
    assert_eq!(capture_texts(&mut QueryCursor::new(), &query, &tree, text), [r#""s""#]);
}

#[test]
fn match_limit_drops_in_progress_matches() {
    let language = loam_grammars::json();
    let text = r#"[1, 2, 3, 4, 5, 6, 7, 8, 9, "x"]"#;
    let query = query(&language, "(array (number) @number (string) @string)");
    let tree = parse(&language, text);

    let mut cursor = QueryCursor::new();
    assert_eq!(cursor.match_limit(), u32::MAX);
    let all = cursor.matches(&query, tree.root_node(), text.as_bytes()).count();
    assert_eq!(all, 9);
    assert!(!cursor.did_exceed_match_limit());

    cursor.set_match_limit(2);
    let limited = cursor.matches(&query, tree.root_node(), text.as_bytes()).count();
    assert!(limited < all);
    assert!(cursor.did_exceed_match_limit());

    cursor.set_match_limit(0);
    assert_eq!(cursor.match_limit(), 1);
    cursor.set_match_limit(u32::MAX);
    assert_eq!(cursor.match_limit(), 65536);
}

#[test]
fn timeout_setting() {
    let mut cursor = QueryCursor::new();
    assert_eq!(cursor.timeout_micros(), 0);
    cursor.set_timeout_micros(250);
    assert_eq!(cursor.timeout_micros(), 250);
    cursor.set_timeout_micros(0);
    assert_eq!(cursor.timeout_micros(), 0);
}

#[test]
fn progress_callback_can_halt() {
    let language = loam_grammars::json();
    let items: Vec<String> = (0..2000).map(|item| item.to_string()).collect();
    let text = format!("[{}]", items.join(", "));
    let query = query(&language, "(number) @number");
    let tree = parse(&language, &text);

    let mut calls = 0;
    let mut halt = |state: &crate::QueryCursorState| {
        calls += 1;
        assert!(state.current_byte_offset() <= text.len());
        ControlFlow::Break(())
    };
    let mut cursor = QueryCursor::new();
    let options = QueryCursorOptions::new().progress_callback(&mut halt);
    let found = cursor.matches_with_options(&query, tree.root_node(), text.as_bytes(), options).count();
    assert!(found < items.len());
    assert_eq!(calls, 1);
}
