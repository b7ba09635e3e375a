use loam::{Diagnostic, Parser, Query, QueryCursor, QueryErrorKind};

#[test]
fn captures_inside_a_byte_range() {
    let language = loam::grammars::javascript();
    let text = "[a, b, c, d, e, f, g]";
    let mut parser = Parser::new();
    parser.set_language(&language).unwrap();
    let tree = parser.parse(text, None).unwrap();
    let query = Query::new(&language, "(identifier) @element").unwrap();

    let mut cursor = QueryCursor::new();
    cursor.set_byte_range(0..8);
    let captures: Vec<_> = cursor
        .captures(&query, tree.root_node(), text.as_bytes())
        .map(|(query_match, index)| {
            let capture = query_match.captures[index];
            assert_eq!(&*query.capture_names()[capture.index as usize], "element");
            capture.node.utf8_text(text.as_bytes()).unwrap()
        })
        .collect();
    assert_eq!(captures, ["a", "b", "c"]);
}

#[test]
fn matches_over_rust_items() {
    let language = loam::grammars::rust();
    let text = "struct Stuff {} fn main() {} fn helper() {}";
    let mut parser = Parser::new();
    parser.set_language(&language).unwrap();
    let tree = parser.parse(text, None).unwrap();
    let query = Query::new(&language, "(function_item name: (identifier) @name)").unwrap();

    let mut cursor = QueryCursor::new();
    let names: Vec<_> = cursor
        .matches(&query, tree.root_node(), text.as_bytes())
        .flat_map(|query_match| query_match.captures)
        .map(|capture| capture.node.utf8_text(text.as_bytes()).unwrap())
        .collect();
    assert_eq!(names, ["main", "helper"]);
}

#[test]
fn query_errors_become_diagnostics() {
    let language = loam::grammars::json();
    let source = "(pair key: (strin))";
    let Err(error) = Query::new(&language, source) else { panic!("query should be rejected") };
    assert_eq!(error.kind, QueryErrorKind::NodeType);

    let diagnostic = Diagnostic::from_query_error(&error, source);
    assert_eq!(diagnostic.message(), "invalid node type `strin`");
    assert_eq!(&source[diagnostic.range()], "strin");
}
