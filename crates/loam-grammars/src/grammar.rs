use loam_language::{ExternalScanner, Language, LexFn, Symbol};

use crate::GrammarError;
use crate::rule::Rule;

/// Chooses the lex state of a parse state from the terminals that are valid
/// in it, indexed by symbol.
pub type LexStateFn = fn(&[bool]) -> u16;

#[derive(Debug, Clone, Copy)]
pub(crate) struct TokenDef {
    pub(crate) id: Symbol,
    pub(crate) name: &'static str,
    pub(crate) named: bool,
}

/// A context-free grammar together with the hand-written lex functions that
/// recognize its tokens.
///
/// Tokens are numbered in declaration order starting at one, followed by the
/// external tokens. Each declaration repeats the expected id so that lex
/// functions can name tokens by constant. The first rule is the start rule.
/// Rules whose names start with `_` produce hidden nodes.
pub struct Grammar {
    pub(crate) name: &'static str,
    pub(crate) tokens: Vec<TokenDef>,
    pub(crate) externals: Vec<TokenDef>,
    pub(crate) rules: Vec<(&'static str, Rule)>,
    pub(crate) extras: Vec<Rule>,
    pub(crate) word: Option<&'static str>,
    pub(crate) conflicts: Vec<Vec<&'static str>>,
    pub(crate) supertypes: Vec<&'static str>,
    pub(crate) lex_fn: LexFn,
    pub(crate) keyword_lex_fn: Option<LexFn>,
    pub(crate) lex_state_fn: Option<LexStateFn>,
    pub(crate) external_scanner: Option<fn() -> Box<dyn ExternalScanner>>,
}

impl Grammar {
    pub fn new(name: &'static str, lex_fn: LexFn) -> Self {
        Self {
            name,
            tokens: Vec::new(),
            externals: Vec::new(),
            rules: Vec::new(),
            extras: Vec::new(),
            word: None,
            conflicts: Vec::new(),
            supertypes: Vec::new(),
            lex_fn,
            keyword_lex_fn: None,
            lex_state_fn: None,
            external_scanner: None,
        }
    }

    #[must_use]
    pub fn token(mut self, id: Symbol, name: &'static str, named: bool) -> Self {
        self.tokens.push(TokenDef { id, name, named });
        self
    }

    /// A token recognized by the external scanner, which reports it by its
    /// index among the external tokens.
    #[must_use]
    pub fn external(mut self, id: Symbol, name: &'static str, named: bool) -> Self {
        self.externals.push(TokenDef { id, name, named });
        self
    }

    #[must_use]
    pub fn rule(mut self, name: &'static str, rule: Rule) -> Self {
        self.rules.push((name, rule));
        self
    }

    /// Tokens that may appear between any two tokens.
    #[must_use]
    pub fn extras(mut self, extras: impl IntoIterator<Item = Rule>) -> Self {
        self.extras.extend(extras);
        self
    }

    /// The identifier-like token from which keywords are extracted.
    #[must_use]
    pub fn word(mut self, name: &'static str, keyword_lex_fn: LexFn) -> Self {
        self.word = Some(name);
        self.keyword_lex_fn = Some(keyword_lex_fn);
        self
    }

    /// Rules whose ambiguity is resolved at runtime by forking the parse.
    #[must_use]
    pub fn conflict(mut self, rules: impl IntoIterator<Item = &'static str>) -> Self {
        self.conflicts.push(rules.into_iter().collect());
        self
    }

    #[must_use]
    pub fn supertype(mut self, name: &'static str) -> Self {
        self.supertypes.push(name);
        self
    }

    #[must_use]
    pub fn lex_states(mut self, lex_state_fn: LexStateFn) -> Self {
        self.lex_state_fn = Some(lex_state_fn);
        self
    }

    #[must_use]
    pub fn external_scanner(mut self, create: fn() -> Box<dyn ExternalScanner>) -> Self {
        self.external_scanner = Some(create);
        self
    }

    /// Computes the LALR(1) tables and wraps them in a [`Language`].
    pub fn build(&self) -> Result<Language, GrammarError> {
        let prepared = crate::prepare::prepare(self)?;
        let automaton = crate::lalr::build(&prepared)?;
        tracing::debug!(
            grammar = self.name,
            symbols = prepared.symbols.len(),
            productions = prepared.productions.len(),
            states = automaton.states.len(),
            "built parse table"
        );
        crate::tables::language(self, &prepared, &automaton)
    }
}
