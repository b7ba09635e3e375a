use super::*;

fn lex_nothing(_: &mut dyn LexContext, _: StateId) -> bool {
    false
}

fn visible(named: bool) -> SymbolMetadata {
    SymbolMetadata { visible: true, named, supertype: false }
}

fn shift(state: StateId) -> ParseAction {
    ParseAction::Shift { state, extra: false, repetition: false }
}

fn sample(abi_version: usize) -> Language {
    const WIDTH: usize = 6;
    let mut parse_table = vec![0; 4 * WIDTH];
    parse_table[WIDTH + 1] = 1;
    parse_table[WIDTH + 3] = 3;
    parse_table[2 * WIDTH] = 2;
    parse_table[2 * WIDTH + 2] = 1;
    parse_table[3 * WIDTH] = 3;

    Language::new(LanguageData {
        name: Some("sample".to_owned()),
        abi_version,
        metadata: Some(LanguageMetadata { major_version: 1, minor_version: 2, patch_version: 3 }),
        symbol_names: ["end", "identifier", "+", "sum", "_expr", "name"]
            .map(str::to_owned)
            .to_vec(),
        symbol_metadata: vec![
            SymbolMetadata::default(),
            visible(true),
            visible(false),
            visible(true),
            SymbolMetadata { visible: false, named: true, supertype: true },
            visible(true),
        ],
        public_symbol_map: vec![0, 1, 2, 3, 4, 5],
        token_count: 3,
        external_token_count: 0,
        field_names: ["", "left", "right"].map(str::to_owned).to_vec(),
        state_count: 4,
        parse_table,
        parse_actions: vec![
            TableEntry::default(),
            TableEntry::new(vec![shift(2)], true),
            TableEntry::new(vec![ParseAction::Reduce {
                symbol: 3,
                child_count: 1,
                dynamic_precedence: 0,
                production_id: 1,
            }], true),
            TableEntry::new(vec![ParseAction::Accept], true),
        ],
        lex_modes: vec![LexMode::default(); 4],
        lex_fn: lex_nothing,
        keyword_lex_fn: None,
        keyword_capture_token: 0,
        alias_sequences: vec![vec![], vec![0, 0, 5]],
        field_map_slices: vec![FieldMapSlice::default(), FieldMapSlice { index: 0, length: 2 }],
        field_map_entries: vec![
            FieldMapEntry { field_id: 1, child_index: 0, inherited: false },
            FieldMapEntry { field_id: 2, child_index: 2, inherited: false },
        ],
        supertype_symbols: vec![4],
        supertype_map: vec![vec![1, 3]],
        primary_state_ids: vec![0, 1, 2, 3],
        external_scanner: None,
        node_types: Vec::new(),
        extras: Vec::new(),
    })
}

#[test]
fn node_kinds() {
    let language = sample(LANGUAGE_VERSION);
    assert_eq!(language.node_kind_count(), 6);
    assert_eq!(language.node_kind_for_id(3), Some("sum"));
    assert_eq!(language.node_kind_for_id(ERROR), Some("ERROR"));
    assert_eq!(language.node_kind_for_id(42), None);

    assert_eq!(language.id_for_node_kind("identifier", true), 1);
    assert_eq!(language.id_for_node_kind("+", false), 2);
    assert_eq!(language.id_for_node_kind("+", true), 0);
    assert_eq!(language.id_for_node_kind("_expr", true), 4);
    assert_eq!(language.id_for_node_kind("end", false), 0);
    assert_eq!(language.id_for_node_kind("ERROR", true), ERROR);

    assert!(language.node_kind_is_named(1));
    assert!(!language.node_kind_is_named(2));
    assert!(language.node_kind_is_visible(2));
    assert!(language.node_kind_is_supertype(4));
    assert!(language.node_kind_is_named(ERROR));
}

#[test]
fn fields() {
    let language = sample(LANGUAGE_VERSION);
    assert_eq!(language.field_count(), 2);
    assert_eq!(language.field_name_for_id(0), None);
    assert_eq!(language.field_name_for_id(2), Some("right"));
    assert_eq!(language.field_id_for_name("left"), Some(1));
    assert_eq!(language.field_id_for_name("middle"), None);
    assert_eq!(language.field_map(1).len(), 2);
    assert!(language.field_map(0).is_empty());
    assert!(language.field_map(9).is_empty());
}

#[test]
fn aliases_and_supertypes() {
    let language = sample(LANGUAGE_VERSION);
    assert_eq!(language.alias_at(1, 2), 5);
    assert_eq!(language.alias_at(1, 1), 0);
    assert_eq!(language.alias_at(0, 2), 0);
    assert_eq!(language.supertypes(), &[4]);
    assert_eq!(language.subtypes_for_supertype(4), &[1, 3]);
    assert!(language.subtypes_for_supertype(3).is_empty());
}

#[test]
fn table_lookups() {
    let language = sample(LANGUAGE_VERSION);
    assert_eq!(language.actions(1, 1), &[shift(2)]);
    assert!(language.actions(1, 2).is_empty());
    assert!(language.has_reduce_action(2, 0));
    assert!(!language.has_reduce_action(1, 1));

    assert_eq!(language.next_state(1, 1), 2);
    assert_eq!(language.next_state(1, 3), 3);
    assert_eq!(language.next_state(2, 0), 0);
    assert_eq!(language.next_state(1, ERROR), 0);
    assert_eq!(language.next_state(1, ERROR_REPEAT), 0);
}

#[test]
fn lookahead_iterator_includes_gotos() {
    let language = sample(LANGUAGE_VERSION);
    let symbols: Vec<_> = language.lookahead_iterator(1).into_iter().flatten().collect();
    assert_eq!(symbols, vec![1, 3]);

    let mut lookahead = language.lookahead_iterator(2).unwrap();
    assert_eq!(lookahead.iter_names().collect::<Vec<_>>(), vec!["end", "+"]);
    assert!(lookahead.reset_state(3));
    assert_eq!(lookahead.next(), Some(0));
    assert_eq!(lookahead.current_symbol_name(), Some("end"));
    assert_eq!(lookahead.next(), None);
    assert!(!lookahead.reset_state(4));

    assert!(language.lookahead_iterator(4).is_none());
}

#[test]
fn version_window() {
    assert!(sample(LANGUAGE_VERSION).check_version().is_ok());
    assert!(sample(MIN_COMPATIBLE_LANGUAGE_VERSION).check_version().is_ok());
    let error = sample(12).check_version().unwrap_err();
    assert_eq!(
        error.to_string(),
        "Incompatible language version 12. Expected minimum 13, maximum 15"
    );
}

#[test]
fn handles_compare_by_identity() {
    let language = sample(LANGUAGE_VERSION);
    assert_eq!(language, language.clone());
    assert_ne!(language, sample(LANGUAGE_VERSION));
    assert_eq!(language.name(), Some("sample"));
    assert_eq!(language.metadata().map(|m| m.minor_version), Some(2));
}
