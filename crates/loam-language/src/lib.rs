//! The boundary between the parsing engine and a compiled grammar.
//!
//! A [`Language`] is an immutable, cheaply cloneable handle over the tables a
//! grammar compiler produces: the symbol and field name tables, the dense LR
//! parse table, per-state lex modes, alias and field maps, supertype
//! information and an optional external scanner. The engine only performs
//! lookups; it never needs to know how the tables were built.

mod error;
mod lex;
mod lookahead;
mod table;

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

/// Rejection of a table whose ABI version is outside the supported window.
pub use error::LanguageError;
/// Lexing hooks implemented by generated lex functions and external scanners.
pub use lex::{ExternalScanner, ExternalScannerDef, LexContext, LexFn, SERIALIZATION_BUFFER_SIZE};
/// Iterator over the symbols that are valid in a parse state.
pub use lookahead::LookaheadIterator;
/// Parse table building blocks.
pub use table::{
    FieldMapEntry, FieldMapSlice, LanguageMetadata, LexMode, NodeTypeInfo, ParseAction,
    SymbolMetadata, TableEntry,
};

pub type Symbol = u16;
pub type StateId = u16;
pub type FieldId = u16;

/// Newest table ABI this engine understands.
pub const LANGUAGE_VERSION: usize = 15;
/// Oldest table ABI this engine understands.
pub const MIN_COMPATIBLE_LANGUAGE_VERSION: usize = 13;

/// The end-of-input token.
pub const END: Symbol = 0;
/// Symbol of nodes that wrap unparseable input.
pub const ERROR: Symbol = u16::MAX;
/// Hidden symbol used to chain skipped tokens during recovery.
pub const ERROR_REPEAT: Symbol = u16::MAX - 1;

/// State the parser enters while recovering from an error.
pub const ERROR_STATE: StateId = 0;
/// Initial state of every parse.
pub const START_STATE: StateId = 1;

/// Raw tables of a compiled grammar.
///
/// `parse_table` is dense: `state * symbol_names.len() + symbol`. For
/// terminals a cell indexes `parse_actions` (entry zero is the empty entry);
/// for nonterminals it is the goto state.
#[derive(Debug, Clone)]
pub struct LanguageData {
    pub name: Option<String>,
    pub abi_version: usize,
    pub metadata: Option<LanguageMetadata>,
    pub symbol_names: Vec<String>,
    pub symbol_metadata: Vec<SymbolMetadata>,
    pub public_symbol_map: Vec<Symbol>,
    /// Terminals, including `END` and external tokens, come first.
    pub token_count: usize,
    pub external_token_count: usize,
    /// Index zero is reserved; field ids start at one.
    pub field_names: Vec<String>,
    pub state_count: usize,
    pub parse_table: Vec<u16>,
    pub parse_actions: Vec<TableEntry>,
    pub lex_modes: Vec<LexMode>,
    pub lex_fn: LexFn,
    pub keyword_lex_fn: Option<LexFn>,
    pub keyword_capture_token: Symbol,
    /// Per production, the alias applied to each structural child, zero for
    /// none.
    pub alias_sequences: Vec<Vec<Symbol>>,
    pub field_map_slices: Vec<FieldMapSlice>,
    pub field_map_entries: Vec<FieldMapEntry>,
    pub supertype_symbols: Vec<Symbol>,
    /// Subtypes of each entry of `supertype_symbols`, in the same order.
    pub supertype_map: Vec<Vec<Symbol>>,
    pub primary_state_ids: Vec<StateId>,
    pub external_scanner: Option<ExternalScannerDef>,
    /// Indexed by symbol. May be empty.
    pub node_types: Vec<NodeTypeInfo>,
    /// Symbols that may appear anywhere as extras.
    pub extras: Vec<Symbol>,
}

/// A shared handle to a compiled grammar.
#[derive(Clone)]
pub struct Language(Arc<LanguageInner>);

struct LanguageInner {
    data: LanguageData,
    kind_ids: FxHashMap<(String, bool), Symbol>,
    field_ids: FxHashMap<String, FieldId>,
    empty_entry: TableEntry,
}

impl Language {
    pub fn new(data: LanguageData) -> Self {
        let mut kind_ids = FxHashMap::default();
        for (symbol, name) in data.symbol_names.iter().enumerate() {
            let metadata = data.symbol_metadata.get(symbol).copied().unwrap_or_default();
            if !metadata.visible && !metadata.supertype {
                continue;
            }
            let public = data.public_symbol_map.get(symbol).copied().unwrap_or(symbol as Symbol);
            kind_ids.entry((name.clone(), metadata.named)).or_insert(public);
        }

        let field_ids = data
            .field_names
            .iter()
            .enumerate()
            .skip(1)
            .map(|(id, name)| (name.clone(), id as FieldId))
            .collect();

        Self(Arc::new(LanguageInner { data, kind_ids, field_ids, empty_entry: TableEntry::default() }))
    }

    /// The raw tables.
    #[inline]
    pub fn data(&self) -> &LanguageData {
        &self.0.data
    }

    pub fn name(&self) -> Option<&str> {
        self.data().name.as_deref()
    }

    pub fn abi_version(&self) -> usize {
        self.data().abi_version
    }

    pub fn metadata(&self) -> Option<LanguageMetadata> {
        self.data().metadata
    }

    /// Fails when the table was produced for an unsupported ABI.
    pub fn check_version(&self) -> Result<(), LanguageError> {
        let version = self.abi_version();
        if (MIN_COMPATIBLE_LANGUAGE_VERSION..=LANGUAGE_VERSION).contains(&version) {
            Ok(())
        } else {
            Err(LanguageError::Version(version))
        }
    }

    /// Number of distinct symbols, aliases included.
    pub fn node_kind_count(&self) -> usize {
        self.data().symbol_names.len()
    }

    pub fn parse_state_count(&self) -> usize {
        self.data().state_count
    }

    pub fn token_count(&self) -> usize {
        self.data().token_count
    }

    pub fn external_token_count(&self) -> usize {
        self.data().external_token_count
    }

    pub fn node_kind_for_id(&self, id: Symbol) -> Option<&str> {
        match id {
            ERROR => Some("ERROR"),
            ERROR_REPEAT => Some("_ERROR"),
            _ => self.data().symbol_names.get(id as usize).map(String::as_str),
        }
    }

    /// Name of `symbol`, or the empty string for unknown ids.
    pub fn symbol_name(&self, symbol: Symbol) -> &str {
        self.node_kind_for_id(symbol).unwrap_or("")
    }

    /// Public id of the visible node kind called `kind`, or zero.
    pub fn id_for_node_kind(&self, kind: &str, named: bool) -> Symbol {
        if kind == "ERROR" {
            return ERROR;
        }
        self.0.kind_ids.get(&(kind.to_owned(), named)).copied().unwrap_or(0)
    }

    pub fn symbol_metadata(&self, symbol: Symbol) -> SymbolMetadata {
        match symbol {
            ERROR => SymbolMetadata { visible: true, named: true, supertype: false },
            ERROR_REPEAT => SymbolMetadata::default(),
            _ => self.data().symbol_metadata.get(symbol as usize).copied().unwrap_or_default(),
        }
    }

    pub fn node_kind_is_named(&self, id: Symbol) -> bool {
        self.symbol_metadata(id).named
    }

    pub fn node_kind_is_visible(&self, id: Symbol) -> bool {
        self.symbol_metadata(id).visible
    }

    pub fn node_kind_is_supertype(&self, id: Symbol) -> bool {
        self.symbol_metadata(id).supertype
    }

    /// Canonical id shared by all symbols with the same name and kind.
    pub fn public_symbol(&self, symbol: Symbol) -> Symbol {
        if symbol == ERROR {
            return symbol;
        }
        self.data().public_symbol_map.get(symbol as usize).copied().unwrap_or(symbol)
    }

    pub fn field_count(&self) -> usize {
        self.data().field_names.len().saturating_sub(1)
    }

    pub fn field_name_for_id(&self, field_id: FieldId) -> Option<&str> {
        if field_id == 0 {
            return None;
        }
        self.data().field_names.get(field_id as usize).map(String::as_str)
    }

    pub fn field_id_for_name(&self, name: &str) -> Option<FieldId> {
        self.0.field_ids.get(name).copied()
    }

    pub fn supertypes(&self) -> &[Symbol] {
        &self.data().supertype_symbols
    }

    pub fn subtypes_for_supertype(&self, supertype: Symbol) -> &[Symbol] {
        let data = self.data();
        data.supertype_symbols
            .iter()
            .position(|&symbol| symbol == supertype)
            .and_then(|index| data.supertype_map.get(index))
            .map_or(&[], Vec::as_slice)
    }

    fn lookup(&self, state: StateId, symbol: Symbol) -> u16 {
        let data = self.data();
        let width = data.symbol_names.len();
        if symbol as usize >= width {
            return 0;
        }
        data.parse_table.get(state as usize * width + symbol as usize).copied().unwrap_or(0)
    }

    /// Actions for the terminal `symbol` in `state`.
    pub fn table_entry(&self, state: StateId, symbol: Symbol) -> &TableEntry {
        if symbol == ERROR || symbol == ERROR_REPEAT || symbol as usize >= self.token_count() {
            return &self.0.empty_entry;
        }
        let index = self.lookup(state, symbol) as usize;
        self.data().parse_actions.get(index).unwrap_or(&self.0.empty_entry)
    }

    pub fn actions(&self, state: StateId, symbol: Symbol) -> &[ParseAction] {
        &self.table_entry(state, symbol).actions
    }

    /// Whether `symbol` can be consumed in `state`, either as a terminal
    /// action or as a goto.
    pub fn has_actions(&self, state: StateId, symbol: Symbol) -> bool {
        if (symbol as usize) < self.token_count() {
            !self.table_entry(state, symbol).is_empty()
        } else {
            self.lookup(state, symbol) != 0
        }
    }

    pub fn has_reduce_action(&self, state: StateId, symbol: Symbol) -> bool {
        self.actions(state, symbol)
            .first()
            .is_some_and(|action| matches!(action, ParseAction::Reduce { .. }))
    }

    /// The state reached after consuming `symbol` in `state`, or zero.
    pub fn next_state(&self, state: StateId, symbol: Symbol) -> StateId {
        if symbol == ERROR || symbol == ERROR_REPEAT {
            return 0;
        }
        if (symbol as usize) < self.token_count() {
            return match self.actions(state, symbol).last() {
                Some(ParseAction::Shift { state: next, extra, .. }) => {
                    if *extra {
                        state
                    } else {
                        *next
                    }
                }
                _ => 0,
            };
        }
        self.lookup(state, symbol)
    }

    pub fn lex_mode(&self, state: StateId) -> LexMode {
        self.data().lex_modes.get(state as usize).copied().unwrap_or_default()
    }

    pub fn lex_fn(&self) -> LexFn {
        self.data().lex_fn
    }

    pub fn keyword_lex_fn(&self) -> Option<LexFn> {
        self.data().keyword_lex_fn
    }

    pub fn keyword_capture_token(&self) -> Symbol {
        self.data().keyword_capture_token
    }

    pub fn alias_sequence(&self, production_id: u16) -> &[Symbol] {
        if production_id == 0 {
            return &[];
        }
        self.data().alias_sequences.get(production_id as usize).map_or(&[], Vec::as_slice)
    }

    /// Alias applied to the structural child at `child_index`, or zero.
    pub fn alias_at(&self, production_id: u16, child_index: usize) -> Symbol {
        self.alias_sequence(production_id).get(child_index).copied().unwrap_or(0)
    }

    /// Field map entries of a production, sorted by field id.
    pub fn field_map(&self, production_id: u16) -> &[FieldMapEntry] {
        let data = self.data();
        let Some(slice) = data.field_map_slices.get(production_id as usize) else {
            return &[];
        };
        let start = slice.index as usize;
        let end = start + slice.length as usize;
        data.field_map_entries.get(start..end).unwrap_or(&[])
    }

    pub fn external_scanner(&self) -> Option<&ExternalScannerDef> {
        self.data().external_scanner.as_ref()
    }

    /// Valid external tokens for an external lex state.
    pub fn enabled_external_tokens(&self, external_lex_state: u16) -> Option<&[bool]> {
        if external_lex_state == 0 {
            return None;
        }
        self.external_scanner()?.states.get(external_lex_state as usize).map(Vec::as_slice)
    }

    /// Representative of the set of states that behave identically.
    pub fn primary_state(&self, state: StateId) -> StateId {
        self.data().primary_state_ids.get(state as usize).copied().unwrap_or(state)
    }

    pub fn node_type_info(&self, symbol: Symbol) -> Option<&NodeTypeInfo> {
        self.data().node_types.get(symbol as usize)
    }

    pub fn has_node_types(&self) -> bool {
        !self.data().node_types.is_empty()
    }

    pub fn extras(&self) -> &[Symbol] {
        &self.data().extras
    }

    /// Iterates the symbols with actions in `state`.
    pub fn lookahead_iterator(&self, state: StateId) -> Option<LookaheadIterator> {
        if state as usize >= self.parse_state_count() {
            return None;
        }
        Some(LookaheadIterator::new(self.clone(), state))
    }
}

impl PartialEq for Language {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Language {}

impl fmt::Debug for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Language")
            .field("name", &self.name())
            .field("abi_version", &self.abi_version())
            .field("node_kind_count", &self.node_kind_count())
            .field("parse_state_count", &self.parse_state_count())
            .finish()
    }
}

#[cfg(test)]
mod tests;
