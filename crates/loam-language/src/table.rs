use crate::{FieldId, StateId, Symbol};

/// One action of the LR automaton for a `(state, lookahead)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseAction {
    /// Push the lookahead and move to `state`. `extra` tokens keep the
    /// current state; `repetition` shifts are ambiguous continuations of a
    /// repeat and are skipped in favour of reducing.
    Shift { state: StateId, extra: bool, repetition: bool },
    /// Pop `child_count` entries and push a node of `symbol`.
    Reduce { symbol: Symbol, child_count: u8, dynamic_precedence: i16, production_id: u16 },
    Accept,
    /// Enter error recovery.
    Recover,
}

/// The list of actions stored for a terminal in a given state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableEntry {
    /// Whether tokens lexed in another state may be reused here.
    pub reusable: bool,
    pub actions: Vec<ParseAction>,
}

impl TableEntry {
    pub fn new(actions: Vec<ParseAction>, reusable: bool) -> Self {
        Self { reusable, actions }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Which lex function state and which external-scanner token set apply in a
/// parse state. An `external_lex_state` of zero disables the scanner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LexMode {
    pub lex_state: u16,
    pub external_lex_state: u16,
}

impl LexMode {
    /// Marks the end of a non-terminal extra: the parser reduces without
    /// asking the lexer for another token.
    pub const END_OF_NON_TERMINAL_EXTRA: Self = Self { lex_state: u16::MAX, external_lex_state: 0 };
}

/// Associates a field with the structural child at `child_index` of a
/// production. `inherited` entries point at hidden children that carry the
/// field somewhere below them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldMapEntry {
    pub field_id: FieldId,
    pub child_index: u8,
    pub inherited: bool,
}

/// The run of `field_map_entries` that belongs to one production.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FieldMapSlice {
    pub index: u16,
    pub length: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SymbolMetadata {
    pub visible: bool,
    pub named: bool,
    pub supertype: bool,
}

/// Possible children of a node kind, as reported by the grammar compiler.
///
/// Languages that omit this information get no structural validation of
/// queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTypeInfo {
    pub fields: Vec<(FieldId, Vec<Symbol>)>,
    /// Fields present in every production of the kind.
    pub required_fields: Vec<FieldId>,
    pub children: Vec<Symbol>,
    /// Visible kinds that appear as a direct child in every production.
    pub required_children: Vec<Symbol>,
    /// Kinds that can occur inside a repetition among the children.
    pub repeated_children: Vec<Symbol>,
}

/// Semantic version of the grammar that produced a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LanguageMetadata {
    pub major_version: u8,
    pub minor_version: u8,
    pub patch_version: u8,
}
