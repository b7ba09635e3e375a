use loam_language::{
    FieldMapSlice, LANGUAGE_VERSION, LanguageData, LexContext, LexMode, SymbolMetadata, TableEntry,
};
use loam_span::{Point, TextSize};

use super::*;

const A: u16 = 1;
const B: u16 = 2;
const C: u16 = 3;
const COMMENT: u16 = 4;

fn lex_nothing(_: &mut dyn LexContext, _: StateId) -> bool {
    false
}

fn language() -> Language {
    let names = ["end", "a", "b", "c", "comment", "node"];
    let named = SymbolMetadata { visible: true, named: true, supertype: false };
    Language::new(LanguageData {
        name: Some("stack".to_owned()),
        abi_version: LANGUAGE_VERSION,
        metadata: None,
        symbol_names: names.map(str::to_owned).to_vec(),
        symbol_metadata: vec![SymbolMetadata::default(), named, named, named, named, named],
        public_symbol_map: (0..names.len() as u16).collect(),
        token_count: 5,
        external_token_count: 0,
        field_names: vec![String::new()],
        state_count: 8,
        parse_table: vec![0; 8 * names.len()],
        parse_actions: vec![TableEntry::default()],
        lex_modes: vec![LexMode::default(); 8],
        lex_fn: lex_nothing,
        keyword_lex_fn: None,
        keyword_capture_token: 0,
        alias_sequences: vec![Vec::new()],
        field_map_slices: vec![FieldMapSlice::default()],
        field_map_entries: Vec::new(),
        supertype_symbols: Vec::new(),
        supertype_map: Vec::new(),
        primary_state_ids: (0..8).collect(),
        external_scanner: None,
        node_types: Vec::new(),
        extras: vec![COMMENT],
    })
}

fn length(bytes: u32) -> Length {
    Length::new(TextSize::new(bytes), Point::new(0, bytes))
}

fn token(language: &Language, symbol: u16, size: u32) -> Subtree {
    Subtree::new_leaf(symbol, length(0), length(size), 0, 1, language)
}

fn comment(language: &Language) -> Subtree {
    let mut comment = token(language, COMMENT, 2);
    comment.make_mut().set_extra(true);
    comment
}

#[test]
fn push_tracks_position_and_state() {
    let language = language();
    let mut stack = Stack::new();
    assert_eq!(stack.version_count(), 1);
    assert_eq!(stack.state(0), START_STATE);
    assert_eq!(stack.position(0), Length::ZERO);

    stack.push(0, Some(token(&language, A, 1)), false, 2);
    stack.push(0, Some(token(&language, B, 2)), false, 3);
    assert_eq!(stack.state(0), 3);
    assert_eq!(stack.position(0), length(3));
    assert_eq!(stack.error_cost(0), 0);
    assert!(stack.has_advanced_since_error(0));
}

#[test]
fn merges_versions_in_the_same_state() {
    let language = language();
    let (a, b, c) = (token(&language, A, 1), token(&language, B, 2), token(&language, C, 3));
    let mut stack = Stack::new();

    stack.push(0, Some(a.clone()), false, 2);
    let copy = stack.copy_version(0);
    assert_eq!(copy, 1);
    stack.swap_versions(0, 1);
    stack.swap_versions(0, 1);
    stack.push(0, Some(b.clone()), false, 5);
    assert!(!stack.can_merge(0, copy));

    stack.remove_version(copy);
    let copy = stack.copy_version(0);
    stack.push(copy, Some(token(&language, C, 0)), false, 6);
    assert!(!stack.merge(0, copy));
    stack.remove_version(copy);

    // A second path to the same state and position: C instead of A B.
    stack.push_at_base(c.clone(), 5);
    assert!(stack.can_merge(0, 1));
    assert!(stack.merge(0, 1));
    assert_eq!(stack.version_count(), 1);

    let slices = stack.pop_count(0, 1);
    assert_eq!(slices.len(), 2);
    assert_eq!(stack.version_count(), 3);
    assert!(slices[0].subtrees[0].ptr_eq(&b));
    assert_eq!(stack.state(slices[0].version), 2);
    assert!(slices[1].subtrees[0].ptr_eq(&c));
    assert_eq!(stack.state(slices[1].version), START_STATE);

    let slices = stack.pop_count(0, 2);
    assert_eq!(slices.len(), 1);
    let subtrees = &slices[0].subtrees;
    assert!(subtrees[0].ptr_eq(&a) && subtrees[1].ptr_eq(&b));
}

#[test]
fn extras_are_popped_but_not_counted() {
    let language = language();
    let mut stack = Stack::new();
    stack.push(0, Some(token(&language, A, 1)), false, 2);
    stack.push(0, Some(comment(&language)), false, 2);

    let slices = stack.pop_count(0, 1);
    assert_eq!(slices.len(), 1);
    let symbols: Vec<_> = slices[0].subtrees.iter().map(Subtree::symbol).collect();
    assert_eq!(symbols, [A, COMMENT]);
    assert_eq!(stack.state(slices[0].version), START_STATE);
}

#[test]
fn pop_pending_replaces_the_version() {
    let language = language();
    let mut stack = Stack::new();
    stack.push(0, Some(token(&language, A, 1)), false, 2);
    assert!(stack.pop_pending(0).is_empty());

    stack.push(0, Some(token(&language, B, 1)), true, 3);
    let slices = stack.pop_pending(0);
    assert_eq!(slices.len(), 1);
    assert_eq!(slices[0].version, 0);
    assert_eq!(stack.version_count(), 1);
    assert_eq!(stack.state(0), 2);
}

#[test]
fn summary_lists_states_by_depth() {
    let language = language();
    let mut stack = Stack::new();
    stack.push(0, Some(token(&language, A, 1)), false, 2);
    stack.push(0, Some(token(&language, B, 1)), false, 3);
    stack.push(0, Some(token(&language, C, 1)), false, 4);
    stack.record_summary(0, 2);

    let summary: Vec<_> =
        stack.summary(0).unwrap().iter().map(|entry| (entry.depth, entry.state)).collect();
    assert_eq!(summary, [(0, 4), (1, 3), (2, 2)]);
}

#[test]
fn error_state_and_pausing() {
    let language = language();
    let mut stack = Stack::new();
    stack.push(0, Some(token(&language, A, 1)), false, 2);
    stack.push(0, None, false, ERROR_STATE);
    assert_eq!(stack.error_cost(0), ERROR_COST_PER_RECOVERY);
    assert_eq!(stack.node_count_since_error(0), 0);

    let error = Subtree::new_error('%', length(0), length(1), 0, 0, &language);
    stack.push(0, Some(error), false, ERROR_STATE);
    assert_eq!(stack.node_count_since_error(0), 1);
    assert!(stack.has_advanced_since_error(0));
    assert_eq!(stack.pop_error(0).len(), 1);
    assert_eq!(stack.position(0), length(1));

    let lookahead = token(&language, B, 1);
    stack.pause(0, lookahead.clone());
    assert!(stack.is_paused(0));
    assert_eq!(stack.error_cost(0), ERROR_COST_PER_RECOVERY);
    assert!(stack.resume(0).is_some_and(|tree| tree.ptr_eq(&lookahead)));
    assert!(stack.is_active(0));

    stack.halt(0);
    assert!(stack.is_halted(0));
    assert_eq!(stack.halted_version_count(), 1);
}

#[test]
fn pop_all_reaches_the_base() {
    let language = language();
    let mut stack = Stack::new();
    stack.push(0, Some(token(&language, A, 1)), false, 2);
    stack.push(0, Some(comment(&language)), false, 2);
    stack.push(0, Some(token(&language, B, 1)), false, 3);

    let slices = stack.pop_all(0);
    assert_eq!(slices.len(), 1);
    assert_eq!(slices[0].subtrees.len(), 3);
    assert_eq!(stack.state(slices[0].version), START_STATE);
}

#[test]
fn dot_graph() {
    let language = language();
    let mut stack = Stack::new();
    stack.push(0, Some(token(&language, A, 1)), false, 2);
    let mut out = Vec::new();
    stack.print_dot_graph(&language, &mut out).unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.starts_with("digraph stack {\nrankdir=\"RL\";\n"));
    assert!(out.contains("node_head_0 -> node_1 [label=0"));
    assert!(out.contains("node_1 -> node_0 [label=\"a\""));
    assert!(out.ends_with("}\n"));
}

impl Stack {
    /// Starts a new version at the base node and pushes `subtree` onto it.
    fn push_at_base(&mut self, subtree: Subtree, state: StateId) {
        self.heads.push(Head::new(NodeId(0)));
        let version = self.heads.len() - 1;
        self.push(version, Some(subtree), false, state);
    }
}
