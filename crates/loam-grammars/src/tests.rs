use loam_language::{END, Language, LexContext, ParseAction, StateId};

use crate::rule::{choice, field, prec_left, repeat, seq, string, sym};
use crate::{Grammar, GrammarError};

fn no_tokens(_lexer: &mut dyn LexContext, _state: StateId) -> bool {
    false
}

fn arithmetic() -> Grammar {
    Grammar::new("arithmetic", no_tokens)
        .token(1, "+", false)
        .token(2, "number", true)
        .rule("expression", choice([seq([sym("expression"), string("+"), sym("expression")]), sym("number")]))
}

fn sorted_names(language: &Language, symbols: &[u16]) -> Vec<String> {
    let mut names: Vec<String> =
        symbols.iter().map(|&symbol| language.symbol_name(symbol).to_owned()).collect();
    names.sort();
    names
}

#[test]
fn bundled_grammars_build() {
    for language in [crate::json(), crate::javascript(), crate::rust(), crate::heredoc()] {
        assert!(language.check_version().is_ok());
        assert!(language.parse_state_count() > 2);
        assert_eq!(language.symbol_name(END), "end");
    }
}

#[test]
fn grammar_without_rules() {
    let result = Grammar::new("empty", no_tokens).build();
    assert_eq!(result.err(), Some(GrammarError::NoRules));
}

#[test]
fn token_ids_follow_declaration_order() {
    let result = Grammar::new("tokens", no_tokens)
        .token(2, "number", true)
        .rule("value", sym("number"))
        .build();
    assert_eq!(
        result.err(),
        Some(GrammarError::TokenId { name: "number".to_owned(), expected: 1, found: 2 })
    );
}

#[test]
fn undefined_symbol() {
    let result = Grammar::new("undefined", no_tokens)
        .token(1, "number", true)
        .rule("value", choice([sym("number"), sym("string")]))
        .build();
    assert_eq!(result.err(), Some(GrammarError::UndefinedSymbol("string".to_owned())));
}

#[test]
fn extras_must_be_tokens() {
    let result = Grammar::new("extras", no_tokens)
        .token(1, "number", true)
        .rule("value", repeat(sym("number")))
        .rule("other", sym("number"))
        .extras([sym("other")])
        .build();
    assert_eq!(result.err(), Some(GrammarError::InvalidExtra("other".to_owned())));
}

#[test]
fn ambiguous_operator_is_a_conflict() {
    let error = arithmetic().build().err();
    assert_eq!(
        error,
        Some(GrammarError::Conflict { lookahead: "+".to_owned(), rules: vec!["expression".to_owned()] })
    );
    assert_eq!(
        error.map(|error| error.to_string()).as_deref(),
        Some("unresolved conflict on `+` between expression")
    );
}

#[test]
fn associativity_resolves_conflict() {
    let language = Grammar::new("arithmetic", no_tokens)
        .token(1, "+", false)
        .token(2, "number", true)
        .rule(
            "expression",
            choice([
                prec_left(1, seq([sym("expression"), string("+"), sym("expression")])),
                sym("number"),
            ]),
        )
        .build();
    let Ok(language) = language else { panic!("grammar should build: {language:?}") };

    let plus = language.id_for_node_kind("+", false);
    let reduce_only = (0..language.parse_state_count() as StateId)
        .map(|state| language.actions(state, plus))
        .filter(|actions| actions.iter().any(|action| matches!(action, ParseAction::Reduce { .. })))
        .all(|actions| actions.len() == 1);
    assert!(reduce_only);
}

#[test]
fn declared_conflict_keeps_both_actions() {
    let Ok(language) = arithmetic().conflict(["expression"]).build() else {
        panic!("declared conflict should build");
    };
    let plus = language.id_for_node_kind("+", false);
    let forked = (0..language.parse_state_count() as StateId)
        .map(|state| language.actions(state, plus))
        .any(|actions| {
            matches!(
                actions,
                [ParseAction::Reduce { .. }, ParseAction::Shift { repetition: false, .. }]
            )
        });
    assert!(forked);
}

#[test]
fn error_state_recovers_on_every_token() {
    let language = crate::json();
    for symbol in 1..language.token_count() as u16 {
        let actions = language.actions(0, symbol);
        assert!(
            actions.iter().any(|action| matches!(action, ParseAction::Recover))
                || actions.iter().any(|action| matches!(action, ParseAction::Shift { extra: true, .. })),
            "symbol {}",
            language.symbol_name(symbol)
        );
    }
}

#[test]
fn json_node_kinds_and_fields() {
    let language = crate::json();
    assert_eq!(language.name(), Some("json"));

    let pair = language.id_for_node_kind("pair", true);
    assert_ne!(pair, 0);
    assert!(language.node_kind_is_named(pair));
    assert!(language.node_kind_is_visible(pair));
    assert_eq!(language.id_for_node_kind("pair", false), 0);

    let key = language.field_id_for_name("key");
    assert!(key.is_some());
    assert_eq!(key.and_then(|id| language.field_name_for_id(id)), Some("key"));
    assert_eq!(language.field_count(), 2);
}

#[test]
fn json_supertypes() {
    let language = crate::json();
    let [value] = language.supertypes() else { panic!("json has one supertype") };
    assert_eq!(language.symbol_name(*value), "_value");
    assert!(language.node_kind_is_supertype(*value));
    assert!(!language.node_kind_is_visible(*value));
    assert_eq!(
        sorted_names(&language, language.subtypes_for_supertype(*value)),
        ["array", "false", "null", "number", "object", "string", "true"]
    );
}

#[test]
fn aliases_become_node_kinds() {
    let language = crate::rust();
    for kind in ["type_identifier", "field_identifier"] {
        let id = language.id_for_node_kind(kind, true);
        assert_ne!(id, 0, "{kind}");
        assert!(language.node_kind_is_named(id));
    }
    assert_eq!(language.keyword_capture_token(), language.id_for_node_kind("identifier", true));
}

#[test]
fn external_tokens_follow_internal_tokens() {
    let language = crate::heredoc();
    assert_eq!(language.external_token_count(), 2);
    let Some(scanner) = language.external_scanner() else { panic!("heredoc has a scanner") };
    assert_eq!(
        sorted_names(&language, &scanner.symbol_map),
        ["heredoc_body", "heredoc_start"]
    );
    assert_eq!(language.token_count(), 8);
}

#[test]
fn repetition_helpers_are_hidden() {
    let language = Grammar::new("list", no_tokens)
        .token(1, "item", true)
        .rule("list", repeat(field("item", sym("item"))))
        .build();
    let Ok(language) = language else { panic!("list grammar should build") };
    let names = &language.data().symbol_names;
    let helper = names.iter().position(|name| name == "list_repeat1");
    let Some(helper) = helper else { panic!("missing repetition helper in {names:?}") };
    assert!(!language.node_kind_is_visible(helper as u16));
}

#[test]
fn builds_are_deterministic() {
    let first = crate::javascript::grammar().build();
    let second = crate::javascript::grammar().build();
    let (Ok(first), Ok(second)) = (first, second) else { panic!("javascript should build") };
    assert_eq!(first.parse_state_count(), second.parse_state_count());
    assert_eq!(first.data().parse_actions, second.data().parse_actions);
    assert_eq!(first.data().symbol_names, second.data().symbol_names);
}

#[test]
fn node_types_track_required_and_repeated_children() {
    let language = crate::json();
    let object = language.id_for_node_kind("object", true);
    let pair = language.id_for_node_kind("pair", true);
    let Some(object_info) = language.node_type_info(object) else { panic!("object has node types") };
    assert_eq!(sorted_names(&language, &object_info.required_children), ["{", "}"]);
    assert_eq!(sorted_names(&language, &object_info.repeated_children), [",", "pair"]);

    let Some(pair_info) = language.node_type_info(pair) else { panic!("pair has node types") };
    let mut required: Vec<&str> = pair_info
        .required_fields
        .iter()
        .filter_map(|&field| language.field_name_for_id(field))
        .collect();
    required.sort_unstable();
    assert_eq!(required, ["key", "value"]);
    assert!(pair_info.repeated_children.is_empty());
}

fn lex_if(lexer: &mut dyn LexContext, _state: StateId) -> bool {
    crate::lex::keyword(lexer, &[("if", 3)])
}

#[test]
fn lexing_a_token_name() {
    assert_eq!(crate::lex::lex_text(lex_if, "if"), Some(3));
    assert_eq!(crate::lex::lex_text(lex_if, "iffy"), None);
    assert_eq!(crate::lex::lex_text(lex_if, "+"), None);
}

#[test]
fn word_token_is_not_reusable_where_keywords_are_valid() {
    let language = crate::javascript();
    let identifier = language.keyword_capture_token();
    let function = language.id_for_node_kind("function", false);
    let mut checked = 0;
    for state in 1..language.parse_state_count() as StateId {
        let entry = language.table_entry(state, identifier);
        if language.has_actions(state, function) && !entry.is_empty() {
            assert!(!entry.reusable, "state {state}");
            checked += 1;
        }
    }
    assert!(checked > 0);
}

#[test]
fn tokens_of_one_lex_state_stay_reusable() {
    let language = crate::json();
    let number = language.id_for_node_kind("number", true);
    for state in 0..language.parse_state_count() as StateId {
        let entry = language.table_entry(state, number);
        assert!(entry.is_empty() || entry.reusable, "state {state}");
    }

    // A quote opens strings in one lex state and closes them in another.
    let quote = language.id_for_node_kind("\"", false);
    let fragile = (0..language.parse_state_count() as StateId)
        .map(|state| language.table_entry(state, quote))
        .any(|entry| !entry.is_empty() && !entry.reusable);
    assert!(fragile);
}
