use loam_language::Language;
use loam_span::Point;

use super::*;
use crate::tests::{leaf, node, sample_language, sum_tree, sym};

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
fn walks_visible_nodes() {
    let language = sample_language();
    let tree = sum_tree(&language);
    let mut cursor = tree.walk();
    assert_eq!(cursor.node().kind(), "program");
    assert_eq!(cursor.depth(), 0);

    assert!(cursor.goto_first_child());
    assert_eq!(cursor.node().kind(), "sum");
    assert_eq!(cursor.field_name(), None);
    assert_eq!(cursor.descendant_index(), 1);

    assert!(cursor.goto_first_child());
    assert_eq!(cursor.node().byte_range(), 0..1);
    assert_eq!(cursor.field_name(), Some("left"));
    assert_eq!(cursor.depth(), 2);
    assert_eq!(cursor.descendant_index(), 2);
    assert!(!cursor.goto_first_child());

    assert!(cursor.goto_next_sibling());
    assert_eq!(cursor.node().kind(), "+");
    assert_eq!(cursor.field_name(), Some("operator"));
    assert_eq!(cursor.descendant_index(), 3);

    assert!(cursor.goto_next_sibling());
    assert_eq!(cursor.field_id(), language.field_id_for_name("right"));
    assert_eq!(cursor.descendant_index(), 4);
    assert!(!cursor.goto_next_sibling());
    assert_eq!(cursor.node().byte_range(), 4..6);

    assert!(cursor.goto_previous_sibling());
    assert_eq!(cursor.node().kind(), "+");

    assert!(cursor.goto_parent());
    assert_eq!(cursor.node().kind(), "sum");
    assert!(cursor.goto_parent());
    assert_eq!(cursor.node().kind(), "program");
    assert!(!cursor.goto_parent());
}

#[test]
fn last_child() {
    let language = sample_language();
    let tree = sum_tree(&language);
    let mut cursor = tree.root_node().child(0).unwrap().walk();
    assert!(cursor.goto_last_child());
    assert_eq!(cursor.node().start_byte(), 4);
    assert!(!cursor.goto_last_child());
}

#[test]
fn descends_through_hidden_nodes() {
    let language = sample_language();
    let tree = repeat_tree(&language);
    let mut cursor = tree.walk();

    assert!(cursor.goto_first_child());
    assert_eq!(cursor.node().start_byte(), 0);
    assert_eq!(cursor.depth(), 1);
    assert_eq!(cursor.descendant_index(), 1);

    assert!(cursor.goto_next_sibling());
    assert_eq!(cursor.node().start_byte(), 2);
    assert!(cursor.goto_next_sibling());
    assert_eq!(cursor.node().start_byte(), 4);
    assert_eq!(cursor.descendant_index(), 3);
    assert!(!cursor.goto_next_sibling());
    assert_eq!(cursor.node().start_byte(), 4);

    assert!(cursor.goto_previous_sibling());
    assert_eq!(cursor.node().start_byte(), 2);
    assert_eq!(cursor.depth(), 1);

    assert!(cursor.goto_parent());
    assert_eq!(cursor.node().kind(), "program");
}

#[test]
fn status_sees_through_hidden_parents() {
    let language = sample_language();
    let tree = repeat_tree(&language);
    let mut cursor = tree.walk();
    cursor.goto_first_child();
    cursor.goto_next_sibling();

    let status = cursor.current_status();
    assert_eq!(status.field_id, 0);
    assert!(status.has_later_siblings);
    assert!(status.has_later_named_siblings);
    assert!(status.supertypes.is_empty());
    assert_eq!(cursor.parent_node(), Some(tree.root_node()));
}

#[test]
fn later_field_siblings() {
    let language = sample_language();
    let tree = sum_tree(&language);
    let mut cursor = tree.walk();
    cursor.goto_first_child();
    cursor.goto_first_child();

    let status = cursor.current_status();
    assert_eq!(status.field_id, 1);
    assert!(status.has_later_siblings);
    assert!(status.has_later_named_siblings);
    assert!(!status.can_have_later_siblings_with_this_field);

    cursor.goto_next_sibling();
    cursor.goto_next_sibling();
    let status = cursor.current_status();
    assert!(!status.has_later_siblings);
}

#[test]
fn descendant_indices() {
    let language = sample_language();
    let tree = repeat_tree(&language);
    let mut cursor = tree.walk();

    cursor.goto_descendant(2);
    assert_eq!(cursor.node().start_byte(), 2);
    assert_eq!(cursor.descendant_index(), 2);

    cursor.goto_descendant(3);
    assert_eq!(cursor.node().start_byte(), 4);

    cursor.goto_descendant(0);
    assert_eq!(cursor.node().kind(), "program");
    assert_eq!(cursor.depth(), 0);

    let tree = sum_tree(&language);
    let mut cursor = tree.walk();
    cursor.goto_descendant(3);
    assert_eq!(cursor.node().kind(), "+");
    assert_eq!(cursor.depth(), 2);
}

#[test]
fn first_child_for_offsets() {
    let language = sample_language();
    let tree = sum_tree(&language);
    let mut cursor = tree.walk();

    assert_eq!(cursor.goto_first_child_for_byte(3), Some(0));
    assert_eq!(cursor.node().kind(), "sum");
    assert_eq!(cursor.goto_first_child_for_byte(3), Some(2));
    assert_eq!(cursor.node().start_byte(), 4);
    assert_eq!(cursor.goto_first_child_for_byte(10), None);

    cursor.goto_parent();
    assert_eq!(cursor.goto_first_child_for_point(Point::new(0, 2)), Some(1));
    assert_eq!(cursor.node().kind(), "+");
}

#[test]
fn reset_and_copy() {
    let language = sample_language();
    let tree = sum_tree(&language);
    let sum = tree.root_node().child(0).unwrap();

    let mut cursor = tree.walk();
    cursor.reset(sum);
    assert_eq!(cursor.node(), sum);
    assert_eq!(cursor.depth(), 0);
    assert!(!cursor.goto_parent());
    cursor.goto_last_child();

    let mut copy = tree.walk();
    copy.reset_to(&cursor);
    assert_eq!(copy.node().start_byte(), 4);
    assert_eq!(copy.field_name(), Some("right"));
}
