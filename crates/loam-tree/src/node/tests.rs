use expect_test::expect;
use loam_language::Language;
use loam_span::Point;

use crate::tests::{
    ALIASED_PRODUCTION, edit, length, leaf, node, node_with, sample_language, sum_tree, sym,
};
use crate::{Subtree, Tree};

const SOURCE: &[u8] = b"a + bc";

fn comment(language: &Language, padding: u32, size: u32) -> Subtree {
    let mut comment = leaf(language, sym::COMMENT, padding, size);
    comment.make_mut().set_extra(true);
    comment
}

/// `a b c` where `a b` sits under a hidden repetition node.
fn repeat_tree(language: &Language) -> Tree {
    let repeat = node(
        language,
        sym::PROGRAM_REPEAT,
        vec![leaf(language, sym::IDENTIFIER, 0, 1), leaf(language, sym::IDENTIFIER, 1, 1)],
    );
    let root = node(language, sym::PROGRAM, vec![repeat, leaf(language, sym::IDENTIFIER, 1, 1)]);
    Tree::new(root, language.clone(), vec![Default::default()])
}

#[test]
fn kinds_and_positions() {
    let language = sample_language();
    let tree = sum_tree(&language);
    let root = tree.root_node();
    assert_eq!(root.kind(), "program");
    assert_eq!(root.child_count(), 1);
    assert_eq!(root.descendant_count(), 5);
    assert!(root.parent().is_none());

    let sum = root.child(0).unwrap();
    assert_eq!(sum.kind(), "sum");
    assert_eq!(sum.kind_id(), sym::SUM);
    assert_eq!(sum.byte_range(), 0..6);
    assert_eq!(sum.end_position(), Point::new(0, 6));
    assert_eq!(sum.child_count(), 3);
    assert_eq!(sum.named_child_count(), 2);
    assert_eq!(sum.parent(), Some(root));

    let plus = sum.child(1).unwrap();
    assert_eq!(plus.kind(), "+");
    assert!(!plus.is_named());
    assert_eq!(plus.byte_range(), 2..3);

    let right = sum.named_child(1).unwrap();
    assert_eq!(right.utf8_text(SOURCE).unwrap(), "bc");
    assert_eq!(right.start_position(), Point::new(0, 4));
    assert!(sum.child(3).is_none());
    assert!(sum.named_child(2).is_none());

    assert_eq!(format!("{sum:?}"), "{Node sum (0, 0) - (0, 6)}");
}

#[test]
fn fields() {
    let language = sample_language();
    let tree = sum_tree(&language);
    let sum = tree.root_node().child(0).unwrap();

    assert_eq!(sum.child_by_field_name("left").unwrap().byte_range(), 0..1);
    assert_eq!(sum.child_by_field_name("operator").unwrap().kind(), "+");
    assert_eq!(sum.child_by_field_name("right").unwrap().utf8_text(SOURCE).unwrap(), "bc");
    assert!(sum.child_by_field_name("middle").is_none());
    assert!(sum.child_by_field_id(0).is_none());

    assert_eq!(sum.field_name_for_child(0), Some("left"));
    assert_eq!(sum.field_name_for_child(1), Some("operator"));
    assert_eq!(sum.field_name_for_child(2), Some("right"));
    assert_eq!(sum.field_name_for_child(3), None);
    assert_eq!(sum.field_name_for_named_child(1), Some("right"));
    assert_eq!(tree.root_node().field_name_for_child(0), None);

    let mut cursor = sum.walk();
    let right: Vec<_> = sum.children_by_field_name("right", &mut cursor).collect();
    assert_eq!(right.len(), 1);
    assert_eq!(right[0].start_byte(), 4);
    assert_eq!(sum.children_by_field_name("middle", &mut cursor).count(), 0);
}

#[test]
fn children_iterators() {
    let language = sample_language();
    let tree = sum_tree(&language);
    let sum = tree.root_node().child(0).unwrap();
    let mut cursor = tree.walk();

    let kinds: Vec<_> = sum.children(&mut cursor).map(|child| child.kind()).collect();
    assert_eq!(kinds, ["identifier", "+", "identifier"]);

    let texts: Vec<_> =
        sum.named_children(&mut cursor).map(|child| child.utf8_text(SOURCE).unwrap()).collect();
    assert_eq!(texts, ["a", "bc"]);
}

#[test]
fn siblings() {
    let language = sample_language();
    let tree = sum_tree(&language);
    let sum = tree.root_node().child(0).unwrap();
    let a = sum.child(0).unwrap();
    let plus = sum.child(1).unwrap();
    let bc = sum.child(2).unwrap();

    assert_eq!(a.next_sibling(), Some(plus));
    assert_eq!(a.next_named_sibling(), Some(bc));
    assert_eq!(bc.prev_sibling(), Some(plus));
    assert_eq!(bc.prev_named_sibling(), Some(a));
    assert!(a.prev_sibling().is_none());
    assert!(bc.next_sibling().is_none());
    assert!(sum.next_sibling().is_none());
}

#[test]
fn hidden_nodes_are_transparent() {
    let language = sample_language();
    let tree = repeat_tree(&language);
    let root = tree.root_node();
    assert_eq!(root.child_count(), 3);
    assert_eq!(root.named_child_count(), 3);

    let x = root.child(0).unwrap();
    let y = root.child(1).unwrap();
    let z = root.child(2).unwrap();
    assert_eq!(y.start_byte(), 2);
    assert_eq!(y.parent(), Some(root));
    assert_eq!(x.next_sibling(), Some(y));
    assert_eq!(y.next_sibling(), Some(z));
    assert_eq!(z.prev_sibling(), Some(y));
    assert_eq!(root.child_with_descendant(y), Some(y));
    assert_eq!(root.first_child_for_byte(2), Some(y));
}

#[test]
fn descendants_for_ranges() {
    let language = sample_language();
    let tree = sum_tree(&language);
    let root = tree.root_node();
    let sum = root.child(0).unwrap();

    assert_eq!(root.descendant_for_byte_range(4, 5).unwrap().utf8_text(SOURCE).unwrap(), "bc");
    assert_eq!(root.descendant_for_byte_range(2, 3).unwrap().kind(), "+");
    assert_eq!(root.named_descendant_for_byte_range(2, 3), Some(sum));
    assert_eq!(root.descendant_for_byte_range(0, 6), Some(sum));
    assert!(root.descendant_for_byte_range(3, 2).is_none());

    let bc = root.descendant_for_point_range(Point::new(0, 4), Point::new(0, 5)).unwrap();
    assert_eq!(bc.start_byte(), 4);

    assert_eq!(sum.first_child_for_byte(2).unwrap().kind(), "+");
    assert_eq!(sum.first_named_child_for_byte(2), Some(bc));
    assert!(sum.first_child_for_byte(6).is_none());
}

#[test]
fn sexp() {
    let language = sample_language();
    let tree = sum_tree(&language);
    expect![[r#"(program (sum left: (identifier) right: (identifier)))"#]].assert_eq(&tree.root_node().to_sexp());
    assert_eq!(tree.root_node().child(0).unwrap().child(1).unwrap().to_sexp(), "(\"+\")");
}

#[test]
fn aliases_and_extras() {
    let language = sample_language();
    let root = node_with(
        &language,
        sym::PROGRAM,
        ALIASED_PRODUCTION,
        vec![
            comment(&language, 0, 3),
            leaf(&language, sym::IDENTIFIER, 1, 1),
            leaf(&language, sym::IDENTIFIER, 1, 1),
        ],
    );
    let tree = Tree::new(root, language.clone(), vec![Default::default()]);
    let root = tree.root_node();

    let comment = root.child(0).unwrap();
    assert_eq!(comment.kind(), "comment");
    assert!(comment.is_extra());

    let name = root.child(1).unwrap();
    assert_eq!(name.kind(), "name");
    assert_eq!(name.kind_id(), sym::NAME);
    assert_eq!(name.grammar_name(), "identifier");
    assert_eq!(name.grammar_id(), sym::IDENTIFIER);
    assert!(name.is_named());
    assert_eq!(name.to_sexp(), "(name)");

    assert_eq!(root.child(2).unwrap().kind(), "identifier");
    assert_eq!(root.to_sexp(), "(program (comment) (name) (identifier))");
}

#[test]
fn errors_and_missing_nodes() {
    let language = sample_language();
    let root = node(
        &language,
        sym::PROGRAM,
        vec![
            leaf(&language, sym::IDENTIFIER, 0, 1),
            Subtree::new_error('@', length(1), length(1), 1, 1, &language),
            Subtree::new_missing_leaf(sym::IDENTIFIER, length(0), 0, &language),
        ],
    );
    let tree = Tree::new(root, language.clone(), vec![Default::default()]);
    let root = tree.root_node();

    assert!(root.has_error());
    assert!(root.child(1).unwrap().is_error());
    assert!(root.child(2).unwrap().is_missing());
    assert!(!root.child(0).unwrap().has_error());
    assert_eq!(root.to_sexp(), "(program (identifier) (UNEXPECTED '@') (MISSING identifier))");
}

#[test]
fn edited_node_moves() {
    let language = sample_language();
    let tree = sum_tree(&language);
    let mut bc = tree.root_node().child(0).unwrap().child(2).unwrap();
    bc.edit(&edit(0, 0, 2));
    assert_eq!(bc.start_byte(), 6);
    assert_eq!(bc.start_position(), Point::new(0, 6));
    assert_eq!(bc.end_byte(), 8);
}
