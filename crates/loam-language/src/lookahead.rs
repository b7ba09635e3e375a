use crate::{Language, StateId, Symbol};

/// Yields, in ascending id order, every symbol that has an action in a parse
/// state: terminals with table entries and nonterminals with a goto.
#[derive(Debug, Clone)]
pub struct LookaheadIterator {
    language: Language,
    state: StateId,
    next_symbol: usize,
    current: Option<Symbol>,
}

impl LookaheadIterator {
    pub(crate) fn new(language: Language, state: StateId) -> Self {
        Self { language, state, next_symbol: 0, current: None }
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    pub fn state(&self) -> StateId {
        self.state
    }

    /// The symbol most recently produced by `next`.
    pub fn current_symbol(&self) -> Option<Symbol> {
        self.current
    }

    pub fn current_symbol_name(&self) -> Option<&str> {
        self.current.and_then(|symbol| self.language.node_kind_for_id(symbol))
    }

    /// Restarts iteration in another state of the same language. Returns
    /// false when the state does not exist.
    pub fn reset_state(&mut self, state: StateId) -> bool {
        if state as usize >= self.language.parse_state_count() {
            return false;
        }
        self.state = state;
        self.next_symbol = 0;
        self.current = None;
        true
    }

    /// Restarts iteration in a state of another language.
    pub fn reset(&mut self, language: Language, state: StateId) -> bool {
        if state as usize >= language.parse_state_count() {
            return false;
        }
        self.language = language;
        self.reset_state(state)
    }

    /// Like `next`, but yields symbol names.
    pub fn iter_names(&mut self) -> impl Iterator<Item = &str> + '_ {
        let Self { language, state, next_symbol, current } = self;
        let language = &*language;
        std::iter::from_fn(move || {
            *current = step(language, *state, next_symbol);
            current.map(|symbol| language.symbol_name(symbol))
        })
    }
}

fn step(language: &Language, state: StateId, next_symbol: &mut usize) -> Option<Symbol> {
    let count = language.node_kind_count();
    while *next_symbol < count {
        let symbol = *next_symbol as Symbol;
        *next_symbol += 1;
        if language.has_actions(state, symbol) {
            return Some(symbol);
        }
    }
    None
}

impl Iterator for LookaheadIterator {
    type Item = Symbol;

    fn next(&mut self) -> Option<Symbol> {
        self.current = step(&self.language, self.state, &mut self.next_symbol);
        self.current
    }
}
