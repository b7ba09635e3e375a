//! Lays the automaton out in the dense tables a [`Language`] reads.

use std::collections::{BTreeMap, BTreeSet};

use loam_language::{
    ExternalScannerDef, FieldId, FieldMapEntry, FieldMapSlice, LANGUAGE_VERSION, Language,
    LanguageData, LexMode, NodeTypeInfo, ParseAction, StateId, Symbol, SymbolMetadata, TableEntry,
};
use rustc_hash::FxHashMap;

use crate::GrammarError;
use crate::grammar::Grammar;
use crate::lalr::{Action, Automaton};
use crate::lex::lex_text;
use crate::prepare::{Prepared, SymbolKind};

pub(crate) fn language(
    grammar: &Grammar,
    prepared: &Prepared,
    automaton: &Automaton,
) -> Result<Language, GrammarError> {
    let width = prepared.symbols.len();
    let state_count = automaton.states.len();
    let productions = ProductionIds::new(prepared)?;

    let valid = valid_tokens(prepared, automaton);
    let (lex_modes, external_states) = lex_modes(grammar, prepared, &valid);
    let reusability = Reusability::new(grammar, prepared, &valid, &lex_modes);

    let mut entries: FxHashMap<(Vec<ParseAction>, bool), u16> = FxHashMap::default();
    let mut parse_actions = vec![TableEntry::default()];
    let mut intern = |actions: Vec<ParseAction>, reusable: bool| -> Result<u16, GrammarError> {
        let key = (actions, reusable);
        if let Some(&index) = entries.get(&key) {
            return Ok(index);
        }
        let Ok(index) = u16::try_from(parse_actions.len()) else {
            return Err(GrammarError::TooLarge(parse_actions.len()));
        };
        parse_actions.push(TableEntry::new(key.0.clone(), reusable));
        entries.insert(key, index);
        Ok(index)
    };

    let mut parse_table = vec![0; state_count * width];
    let recover = vec![ParseAction::Recover];
    let shift_extra = vec![ParseAction::Shift { state: 0, extra: true, repetition: false }];

    // The error-recovery state accepts every token.
    for symbol in 0..prepared.token_count {
        parse_table[symbol] = intern(recover.clone(), reusability.get(0, symbol as Symbol))?;
    }

    for (index, state) in automaton.states.iter().enumerate().skip(1) {
        let row = &mut parse_table[index * width..(index + 1) * width];
        for (&symbol, actions) in &state.actions {
            let actions = actions
                .iter()
                .map(|&action| match action {
                    Action::Shift { state, repetition } => {
                        ParseAction::Shift { state, extra: false, repetition }
                    }
                    Action::Reduce(production) => productions.reduce_action(prepared, production),
                    Action::Accept => ParseAction::Accept,
                })
                .collect();
            row[symbol as usize] = intern(actions, reusability.get(index, symbol))?;
        }
        for (&symbol, &target) in &state.gotos {
            row[symbol as usize] = target;
        }
    }

    for (index, row) in parse_table.chunks_mut(width).enumerate() {
        for &extra in &prepared.extras {
            let cell = &mut row[extra as usize];
            // Extras shift in every state, even where recovery would start.
            if *cell == 0 || index == 0 {
                *cell = intern(shift_extra.clone(), reusability.get(index, extra))?;
            }
        }
    }

    let mut node_types = NodeTypes::new(prepared);

    let external_scanner = grammar.external_scanner.map(|create| ExternalScannerDef {
        create,
        symbol_map: (prepared.token_count - prepared.external_count..prepared.token_count)
            .map(|symbol| symbol as Symbol)
            .collect(),
        states: external_states,
    });

    let supertype_map =
        prepared.supertypes.iter().map(|&supertype| node_types.subtypes(supertype)).collect();

    Ok(Language::new(LanguageData {
        name: Some(grammar.name.to_owned()),
        abi_version: LANGUAGE_VERSION,
        metadata: None,
        symbol_names: prepared.symbols.iter().map(|info| info.name.clone()).collect(),
        symbol_metadata: prepared
            .symbols
            .iter()
            .map(|info| SymbolMetadata {
                visible: info.visible,
                named: info.named,
                supertype: info.supertype,
            })
            .collect(),
        public_symbol_map: (0..width as Symbol).map(|symbol| prepared.public_symbol(symbol)).collect(),
        token_count: prepared.token_count,
        external_token_count: prepared.external_count,
        field_names: prepared.field_names.clone(),
        state_count,
        parse_table,
        parse_actions,
        lex_modes,
        lex_fn: grammar.lex_fn,
        keyword_lex_fn: grammar.keyword_lex_fn,
        keyword_capture_token: prepared.word.unwrap_or(0),
        alias_sequences: productions.alias_sequences,
        field_map_slices: productions.field_map_slices,
        field_map_entries: productions.field_map_entries,
        supertype_symbols: prepared.supertypes.clone(),
        supertype_map,
        primary_state_ids: (0..state_count as StateId).collect(),
        external_scanner,
        node_types: node_types.into_infos(prepared),
        extras: prepared.extras.clone(),
    }))
}

/// The tokens the lexer may return in each state: those with an action, plus
/// the extras. Every token is valid in the error-recovery state.
fn valid_tokens(prepared: &Prepared, automaton: &Automaton) -> Vec<Vec<bool>> {
    automaton
        .states
        .iter()
        .enumerate()
        .map(|(index, state)| {
            let mut valid = vec![index == 0; prepared.token_count];
            for &symbol in state.actions.keys() {
                valid[symbol as usize] = true;
            }
            for &extra in &prepared.extras {
                valid[extra as usize] = true;
            }
            valid
        })
        .collect()
}

/// Lex modes of every state, and the distinct sets of valid external tokens
/// they refer to.
fn lex_modes(
    grammar: &Grammar,
    prepared: &Prepared,
    valid: &[Vec<bool>],
) -> (Vec<LexMode>, Vec<Vec<bool>>) {
    let first_external = prepared.token_count - prepared.external_count;
    let mut external_states: Vec<Vec<bool>> = vec![Vec::new()];
    let mut modes = Vec::with_capacity(valid.len());

    for valid in valid {
        let lex_state = grammar.lex_state_fn.map_or(0, |lex_state_fn| lex_state_fn(valid));
        let external = &valid[first_external..];
        let external_lex_state = if external.iter().any(|&valid| valid) {
            match external_states.iter().position(|state| state == external) {
                Some(position) => position as u16,
                None => {
                    external_states.push(external.to_vec());
                    (external_states.len() - 1) as u16
                }
            }
        } else {
            0
        };
        modes.push(LexMode { lex_state, external_lex_state });
    }
    (modes, external_states)
}

/// Decides, per state and token, whether a token lexed in some other state
/// comes out the same when lexed in this one.
///
/// Lex functions are opaque, so overlaps between tokens are found two ways.
/// A token that is valid under more than one lex state may be scanned
/// differently by each of them. The word token overlaps every keyword, found
/// by running the keyword lex function over the token names, so it is
/// fragile wherever a keyword is valid.
struct Reusability {
    fragile: Vec<Vec<bool>>,
}

impl Reusability {
    fn new(grammar: &Grammar, prepared: &Prepared, valid: &[Vec<bool>], lex_modes: &[LexMode]) -> Self {
        let mut lex_states: Vec<BTreeSet<u16>> = vec![BTreeSet::new(); prepared.token_count];
        for (valid, mode) in valid.iter().zip(lex_modes) {
            for (symbol, _) in valid.iter().enumerate().filter(|(_, valid)| **valid) {
                lex_states[symbol].insert(mode.lex_state);
            }
        }

        let keywords: Vec<Symbol> = match (prepared.word, grammar.keyword_lex_fn) {
            (Some(word), Some(keyword_lex_fn)) => (1..prepared.token_count as Symbol)
                .filter(|&symbol| {
                    symbol != word
                        && lex_text(keyword_lex_fn, &prepared.symbols[symbol as usize].name)
                            == Some(symbol)
                })
                .collect(),
            _ => Vec::new(),
        };

        let fragile = valid
            .iter()
            .map(|valid| {
                let keyword_valid = keywords.iter().any(|&keyword| valid[keyword as usize]);
                (0..prepared.token_count)
                    .map(|symbol| {
                        lex_states[symbol].len() > 1
                            || (keyword_valid && prepared.word == Some(symbol as Symbol))
                    })
                    .collect()
            })
            .collect();
        Self { fragile }
    }

    fn get(&self, state: usize, symbol: Symbol) -> bool {
        !self.fragile[state][symbol as usize]
    }
}

/// Numbers the distinct alias sequences and field maps of the productions.
struct ProductionIds {
    ids: Vec<u16>,
    alias_sequences: Vec<Vec<Symbol>>,
    field_map_slices: Vec<FieldMapSlice>,
    field_map_entries: Vec<FieldMapEntry>,
}

impl ProductionIds {
    fn new(prepared: &Prepared) -> Result<Self, GrammarError> {
        let mut hidden_fields = HiddenFields::new(prepared);
        let mut keys: FxHashMap<(Vec<Symbol>, Vec<FieldMapEntry>), u16> = FxHashMap::default();
        let mut result = Self {
            ids: Vec::with_capacity(prepared.productions.len()),
            alias_sequences: vec![Vec::new()],
            field_map_slices: vec![FieldMapSlice::default()],
            field_map_entries: Vec::new(),
        };

        for production in &prepared.productions {
            let mut aliases: Vec<Symbol> =
                production.steps.iter().map(|step| step.alias.unwrap_or(0)).collect();
            while aliases.last() == Some(&0) {
                aliases.pop();
            }

            let mut fields = Vec::new();
            for (child_index, step) in production.steps.iter().enumerate() {
                let Ok(child_index) = u8::try_from(child_index) else {
                    return Err(GrammarError::TooLarge(production.steps.len()));
                };
                if let Some(field_id) = step.field {
                    fields.push(FieldMapEntry { field_id, child_index, inherited: false });
                }
                let info = &prepared.symbols[step.symbol as usize];
                if step.alias.is_none() && !info.visible && !prepared.is_terminal(step.symbol) {
                    for field_id in hidden_fields.get(step.symbol) {
                        fields.push(FieldMapEntry { field_id, child_index, inherited: true });
                    }
                }
            }
            fields.sort_by_key(|entry| (entry.field_id, entry.child_index, entry.inherited));
            fields.dedup();

            if aliases.is_empty() && fields.is_empty() {
                result.ids.push(0);
                continue;
            }
            let next = result.alias_sequences.len();
            let id = *keys.entry((aliases.clone(), fields.clone())).or_insert(next as u16);
            if id as usize == next {
                result.alias_sequences.push(aliases);
                result.field_map_slices.push(FieldMapSlice {
                    index: result.field_map_entries.len() as u16,
                    length: fields.len() as u16,
                });
                result.field_map_entries.extend(fields);
            }
            result.ids.push(id);
        }
        Ok(result)
    }

    fn reduce_action(&self, prepared: &Prepared, production: usize) -> ParseAction {
        let info = &prepared.productions[production];
        ParseAction::Reduce {
            symbol: info.lhs,
            child_count: info.steps.len() as u8,
            dynamic_precedence: info.dynamic_precedence as i16,
            production_id: self.ids[production],
        }
    }
}

/// Fields that can appear below a hidden nonterminal without a visible node
/// in between.
struct HiddenFields<'a> {
    prepared: &'a Prepared,
    memo: Vec<Option<BTreeSet<FieldId>>>,
}

impl<'a> HiddenFields<'a> {
    fn new(prepared: &'a Prepared) -> Self {
        Self { prepared, memo: vec![None; prepared.symbols.len()] }
    }

    fn get(&mut self, symbol: Symbol) -> BTreeSet<FieldId> {
        if let Some(fields) = &self.memo[symbol as usize] {
            return fields.clone();
        }
        // Recursive references see the empty set.
        self.memo[symbol as usize] = Some(BTreeSet::new());
        let mut fields = BTreeSet::new();
        for &production in &self.prepared.by_lhs[symbol as usize] {
            for step in &self.prepared.productions[production].steps {
                fields.extend(step.field);
                let info = &self.prepared.symbols[step.symbol as usize];
                if step.alias.is_none() && !info.visible && !self.prepared.is_terminal(step.symbol) {
                    fields.extend(self.get(step.symbol));
                }
            }
        }
        self.memo[symbol as usize] = Some(fields.clone());
        fields
    }
}

#[derive(Debug, Clone, Default)]
struct Content {
    children: BTreeSet<Symbol>,
    fields: BTreeMap<FieldId, BTreeSet<Symbol>>,
}

impl Content {
    fn merge(&mut self, other: Self) {
        self.children.extend(other.children);
        for (field, symbols) in other.fields {
            self.fields.entry(field).or_default().extend(symbols);
        }
    }
}

/// Possible visible children of each node kind.
struct NodeTypes<'a> {
    prepared: &'a Prepared,
    hidden: Vec<Option<Content>>,
}

impl<'a> NodeTypes<'a> {
    fn new(prepared: &'a Prepared) -> Self {
        Self { prepared, hidden: vec![None; prepared.symbols.len()] }
    }

    fn symbol_content(&mut self, symbol: Symbol) -> Content {
        if let Some(content) = &self.hidden[symbol as usize] {
            return content.clone();
        }
        self.hidden[symbol as usize] = Some(Content::default());
        let mut content = Content::default();
        for &production in &self.prepared.by_lhs[symbol as usize] {
            let production_content = self.production_content(production);
            content.merge(production_content);
        }
        self.hidden[symbol as usize] = Some(content.clone());
        content
    }

    fn production_content(&mut self, production: usize) -> Content {
        let prepared = self.prepared;
        let mut content = Content::default();
        for step in &prepared.productions[production].steps {
            let info = &prepared.symbols[step.symbol as usize];
            let mut symbols = BTreeSet::new();
            if let Some(alias) = step.alias {
                symbols.insert(prepared.public_symbol(alias));
            } else if info.visible {
                symbols.insert(prepared.public_symbol(step.symbol));
            } else if !prepared.is_terminal(step.symbol) {
                let inner = self.symbol_content(step.symbol);
                symbols = inner.children;
                if info.supertype {
                    symbols.insert(step.symbol);
                }
                for (field, field_symbols) in inner.fields {
                    content.fields.entry(field).or_default().extend(field_symbols);
                }
            }
            if let Some(field) = step.field {
                content.fields.entry(field).or_default().extend(symbols.iter().copied());
            }
            content.children.extend(symbols);
        }
        content
    }

    fn subtypes(&mut self, supertype: Symbol) -> Vec<Symbol> {
        let content = self.symbol_content(supertype);
        content.children.into_iter().filter(|&symbol| symbol != supertype).collect()
    }

    fn into_infos(mut self, prepared: &Prepared) -> Vec<NodeTypeInfo> {
        let mut infos = vec![NodeTypeInfo::default(); prepared.symbols.len()];
        let mut contents: BTreeMap<Symbol, Content> = BTreeMap::new();
        let mut required: BTreeMap<Symbol, BTreeSet<FieldId>> = BTreeMap::new();
        let mut required_children: BTreeMap<Symbol, BTreeSet<Symbol>> = BTreeMap::new();
        let mut repeated: BTreeMap<Symbol, BTreeSet<Symbol>> = BTreeMap::new();
        for (index, production) in prepared.productions.iter().enumerate() {
            let info = &prepared.symbols[production.lhs as usize];
            if info.visible {
                let content = self.production_content(index);
                contents.entry(production.lhs).or_default().merge(content);
                let fields: BTreeSet<FieldId> =
                    production.steps.iter().filter_map(|step| step.field).collect();
                required
                    .entry(production.lhs)
                    .and_modify(|common| common.retain(|field| fields.contains(field)))
                    .or_insert(fields);

                let children: BTreeSet<Symbol> = production
                    .steps
                    .iter()
                    .filter_map(|step| match step.alias {
                        Some(alias) => Some(prepared.public_symbol(alias)),
                        None => prepared.symbols[step.symbol as usize]
                            .visible
                            .then(|| prepared.public_symbol(step.symbol)),
                    })
                    .collect();
                required_children
                    .entry(production.lhs)
                    .and_modify(|common| common.retain(|symbol| children.contains(symbol)))
                    .or_insert(children);

                for step in &production.steps {
                    if prepared.symbols[step.symbol as usize].kind == SymbolKind::Auxiliary {
                        let content = self.symbol_content(step.symbol);
                        repeated.entry(production.lhs).or_default().extend(content.children);
                    }
                }
            }
            for step in &production.steps {
                if let Some(alias) = step.alias {
                    if !prepared.is_terminal(step.symbol) {
                        let content = self.symbol_content(step.symbol);
                        contents.entry(alias).or_default().merge(content);
                    }
                }
            }
        }

        let extras: BTreeSet<Symbol> = prepared.extras.iter().copied().collect();
        for (symbol, content) in contents {
            let kind = prepared.symbols[symbol as usize].kind;
            if !matches!(kind, SymbolKind::NonTerminal | SymbolKind::Alias) {
                continue;
            }
            infos[symbol as usize] = NodeTypeInfo {
                fields: content
                    .fields
                    .into_iter()
                    .map(|(field, symbols)| (field, symbols.into_iter().collect()))
                    .collect(),
                required_fields: required
                    .remove(&symbol)
                    .map(|fields| fields.into_iter().collect())
                    .unwrap_or_default(),
                children: content.children.difference(&extras).copied().collect(),
                required_children: required_children
                    .remove(&symbol)
                    .map(|children| children.into_iter().collect())
                    .unwrap_or_default(),
                repeated_children: repeated
                    .remove(&symbol)
                    .map(|children| children.into_iter().collect())
                    .unwrap_or_default(),
            };
        }
        infos
    }
}
