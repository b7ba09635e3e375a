//! LALR(1) automaton construction.
//!
//! States are built from LR(1) item sets whose kernels are merged when they
//! share a core, propagating lookaheads until nothing changes. State zero is
//! left empty for the engine's error-recovery state, so the start state is
//! state one.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use loam_language::{END, StateId, Symbol};
use rustc_hash::FxHashMap;

use crate::prepare::{Prepared, Production, Step};
use crate::rule::Associativity;
use crate::GrammarError;

/// Stands for the augmented start rule `S' -> start`.
const AUGMENTED: Symbol = u16::MAX - 2;

/// An action before production ids are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Shift { state: StateId, repetition: bool },
    Reduce(usize),
    Accept,
}

#[derive(Debug, Default)]
pub(crate) struct State {
    /// Actions of each terminal that has any, reductions first.
    pub(crate) actions: BTreeMap<Symbol, Vec<Action>>,
    pub(crate) gotos: BTreeMap<Symbol, StateId>,
}

#[derive(Debug)]
pub(crate) struct Automaton {
    pub(crate) states: Vec<State>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TokenSet(Vec<u64>);

impl TokenSet {
    fn single(symbol: Symbol) -> Self {
        let mut set = Self::default();
        set.insert(symbol);
        set
    }

    fn insert(&mut self, symbol: Symbol) -> bool {
        let (word, bit) = (symbol as usize / 64, symbol % 64);
        if self.0.len() <= word {
            self.0.resize(word + 1, 0);
        }
        let changed = self.0[word] & (1u64 << bit) == 0;
        self.0[word] |= 1u64 << bit;
        changed
    }

    fn contains(&self, symbol: Symbol) -> bool {
        self.0.get(symbol as usize / 64).is_some_and(|&word| word & (1u64 << (symbol % 64)) != 0)
    }

    fn union(&mut self, other: &Self) -> bool {
        if self.0.len() < other.0.len() {
            self.0.resize(other.0.len(), 0);
        }
        let mut changed = false;
        for (word, &incoming) in self.0.iter_mut().zip(&other.0) {
            changed |= *word | incoming != *word;
            *word |= incoming;
        }
        changed
    }

    fn iter(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.0.iter().enumerate().flat_map(|(index, &word)| {
            (0..64usize)
                .filter(move |&bit| word & (1u64 << bit) != 0)
                .map(move |bit| (index * 64 + bit) as Symbol)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Item {
    production: usize,
    step: usize,
}

type ItemSet = BTreeMap<Item, TokenSet>;

struct Builder<'a> {
    prepared: &'a Prepared,
    productions: Vec<Production>,
    first: Vec<TokenSet>,
    nullable: Vec<bool>,
    kernels: Vec<ItemSet>,
    transitions: Vec<BTreeMap<Symbol, usize>>,
}

pub(crate) fn build(prepared: &Prepared) -> Result<Automaton, GrammarError> {
    let mut productions = prepared.productions.clone();
    productions.push(Production {
        lhs: AUGMENTED,
        steps: vec![Step::new(prepared.start)],
        precedence: 0,
        associativity: None,
        dynamic_precedence: 0,
        is_repetition: false,
    });

    let mut builder = Builder {
        prepared,
        productions,
        first: vec![TokenSet::default(); prepared.symbols.len()],
        nullable: vec![false; prepared.symbols.len()],
        kernels: Vec::new(),
        transitions: Vec::new(),
    };
    builder.compute_first_sets();
    builder.build_item_sets()?;

    let mut states = Vec::with_capacity(builder.kernels.len());
    states.push(State::default());
    for index in 1..builder.kernels.len() {
        states.push(builder.state(index)?);
    }
    Ok(Automaton { states })
}

impl Builder<'_> {
    fn compute_first_sets(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            for production in &self.productions {
                if production.lhs == AUGMENTED {
                    continue;
                }
                let lhs = production.lhs as usize;
                let mut all_nullable = true;
                for step in &production.steps {
                    if self.prepared.is_terminal(step.symbol) {
                        changed |= self.first[lhs].insert(step.symbol);
                        all_nullable = false;
                        break;
                    }
                    let first = self.first[step.symbol as usize].clone();
                    changed |= self.first[lhs].union(&first);
                    if !self.nullable[step.symbol as usize] {
                        all_nullable = false;
                        break;
                    }
                }
                if all_nullable && !self.nullable[lhs] {
                    self.nullable[lhs] = true;
                    changed = true;
                }
            }
        }
    }

    /// FIRST of `steps` followed by `lookahead`.
    fn first_of(&self, steps: &[Step], lookahead: &TokenSet) -> TokenSet {
        let mut result = TokenSet::default();
        for step in steps {
            if self.prepared.is_terminal(step.symbol) {
                result.insert(step.symbol);
                return result;
            }
            result.union(&self.first[step.symbol as usize]);
            if !self.nullable[step.symbol as usize] {
                return result;
            }
        }
        result.union(lookahead);
        result
    }

    fn next_symbol(&self, item: Item) -> Option<Symbol> {
        self.productions[item.production].steps.get(item.step).map(|step| step.symbol)
    }

    fn closure(&self, kernel: &ItemSet) -> ItemSet {
        let mut items = kernel.clone();
        let mut queue: Vec<Item> = items.keys().copied().collect();
        while let Some(item) = queue.pop() {
            let Some(symbol) = self.next_symbol(item) else { continue };
            if self.prepared.is_terminal(symbol) {
                continue;
            }
            let steps = &self.productions[item.production].steps[item.step + 1..];
            let lookahead = self.first_of(steps, &items[&item]);
            for &production in &self.prepared.by_lhs[symbol as usize] {
                let predicted = Item { production, step: 0 };
                if items.entry(predicted).or_default().union(&lookahead) {
                    queue.push(predicted);
                }
            }
        }
        items
    }

    fn build_item_sets(&mut self) -> Result<(), GrammarError> {
        let mut cores: FxHashMap<Vec<Item>, usize> = FxHashMap::default();
        self.kernels.push(ItemSet::new());
        self.transitions.push(BTreeMap::new());

        let start = Item { production: self.productions.len() - 1, step: 0 };
        self.kernels.push(BTreeMap::from([(start, TokenSet::single(END))]));
        self.transitions.push(BTreeMap::new());
        cores.insert(vec![start], 1);

        let mut queue = VecDeque::from([1]);
        let mut queued = vec![false, true];
        while let Some(index) = queue.pop_front() {
            queued[index] = false;
            let closure = self.closure(&self.kernels[index]);

            let mut successors: BTreeMap<Symbol, ItemSet> = BTreeMap::new();
            for (&item, lookahead) in &closure {
                if let Some(symbol) = self.next_symbol(item) {
                    let advanced = Item { step: item.step + 1, ..item };
                    successors.entry(symbol).or_default().entry(advanced).or_default().union(lookahead);
                }
            }

            for (symbol, kernel) in successors {
                let core: Vec<Item> = kernel.keys().copied().collect();
                let target = match cores.get(&core) {
                    Some(&target) => {
                        let mut changed = false;
                        for (item, lookahead) in &kernel {
                            changed |= self.kernels[target].entry(*item).or_default().union(lookahead);
                        }
                        if changed && !queued[target] {
                            queued[target] = true;
                            queue.push_back(target);
                        }
                        target
                    }
                    None => {
                        let target = self.kernels.len();
                        if target >= StateId::MAX as usize {
                            return Err(GrammarError::TooLarge(target));
                        }
                        cores.insert(core, target);
                        self.kernels.push(kernel);
                        self.transitions.push(BTreeMap::new());
                        queued.push(true);
                        queue.push_back(target);
                        target
                    }
                };
                self.transitions[index].insert(symbol, target);
            }
        }
        Ok(())
    }

    fn state(&self, index: usize) -> Result<State, GrammarError> {
        let closure = self.closure(&self.kernels[index]);
        let mut state = State::default();

        let mut reductions: BTreeMap<Symbol, Vec<usize>> = BTreeMap::new();
        for (item, lookahead) in &closure {
            if self.next_symbol(*item).is_none() {
                for symbol in lookahead.iter() {
                    reductions.entry(symbol).or_default().push(item.production);
                }
            }
        }

        let mut terminals: BTreeSet<Symbol> = reductions.keys().copied().collect();
        for (&symbol, &target) in &self.transitions[index] {
            if self.prepared.is_terminal(symbol) {
                terminals.insert(symbol);
            } else {
                state.gotos.insert(symbol, target as StateId);
            }
        }

        for symbol in terminals {
            let shift = self.transitions[index].get(&symbol).map(|&target| target as StateId);
            let reduces = reductions.remove(&symbol).unwrap_or_default();
            let actions = self.resolve(&closure, symbol, shift, reduces)?;
            if !actions.is_empty() {
                state.actions.insert(symbol, actions);
            }
        }
        Ok(state)
    }

    /// Items that are partway through a production and would consume
    /// `lookahead` next, directly or as the first token of a nonterminal.
    fn shift_items<'c>(&'c self, closure: &'c ItemSet, lookahead: Symbol) -> impl Iterator<Item = Item> + 'c {
        closure.keys().copied().filter(move |&item| {
            item.step > 0
                && self.next_symbol(item).is_some_and(|symbol| {
                    symbol == lookahead
                        || (!self.prepared.is_terminal(symbol) && self.first[symbol as usize].contains(lookahead))
                })
        })
    }

    fn resolve(
        &self,
        closure: &ItemSet,
        lookahead: Symbol,
        shift: Option<StateId>,
        mut reduces: Vec<usize>,
    ) -> Result<Vec<Action>, GrammarError> {
        reduces.sort_unstable();
        reduces.dedup();
        if reduces.iter().any(|&production| self.productions[production].lhs == AUGMENTED) {
            return Ok(vec![Action::Accept]);
        }

        let mut shift = shift.map(|state| Action::Shift { state, repetition: false });
        if let Some(Action::Shift { state, .. }) = shift {
            if !reduces.is_empty() {
                if reduces.iter().all(|&production| self.productions[production].is_repetition) {
                    shift = Some(Action::Shift { state, repetition: true });
                } else {
                    let shift_precedence = self
                        .shift_items(closure, lookahead)
                        .map(|item| self.productions[item.production].precedence)
                        .max()
                        .unwrap_or(0);
                    let mut keep_shift = true;
                    let mut unresolved = Vec::new();
                    reduces.retain(|&production| {
                        let production_info = &self.productions[production];
                        let ordering = production_info.precedence.cmp(&shift_precedence);
                        match (ordering, production_info.associativity) {
                            (Ordering::Greater, _) | (Ordering::Equal, Some(Associativity::Left)) => {
                                keep_shift = false;
                                true
                            }
                            (Ordering::Less, _) | (Ordering::Equal, Some(Associativity::Right)) => false,
                            (Ordering::Equal, None) => {
                                unresolved.push(production);
                                true
                            }
                        }
                    });
                    if !keep_shift {
                        shift = None;
                    } else if !unresolved.is_empty() {
                        let mut rules: BTreeSet<Symbol> =
                            unresolved.iter().map(|&production| self.productions[production].lhs).collect();
                        rules.extend(
                            self.shift_items(closure, lookahead)
                                .map(|item| self.productions[item.production].lhs),
                        );
                        self.check_expected(lookahead, &rules)?;
                    }
                }
            }
        }

        if reduces.len() > 1 {
            let best = reduces
                .iter()
                .map(|&production| self.productions[production].precedence)
                .max()
                .unwrap_or(0);
            reduces.retain(|&production| self.productions[production].precedence == best);
            if reduces.len() > 1 {
                let rules = reduces.iter().map(|&production| self.productions[production].lhs).collect();
                self.check_expected(lookahead, &rules)?;
            }
        }

        let mut actions: Vec<Action> = reduces.into_iter().map(Action::Reduce).collect();
        actions.extend(shift);
        Ok(actions)
    }

    fn check_expected(&self, lookahead: Symbol, rules: &BTreeSet<Symbol>) -> Result<(), GrammarError> {
        // Conflicts inside a single rule, such as nested repetitions, need no
        // declaration.
        if rules.len() <= 1 && rules.iter().all(|&rule| self.is_auxiliary(rule)) {
            return Ok(());
        }
        let expected = self.prepared.conflicts.iter().any(|declared| {
            rules.iter().all(|rule| declared.contains(rule) || self.is_auxiliary(*rule))
        });
        if expected {
            Ok(())
        } else {
            Err(GrammarError::Conflict {
                lookahead: self.prepared.name(lookahead).to_owned(),
                rules: rules.iter().map(|&rule| self.prepared.name(rule).to_owned()).collect(),
            })
        }
    }

    fn is_auxiliary(&self, symbol: Symbol) -> bool {
        self.prepared
            .symbols
            .get(symbol as usize)
            .is_some_and(|info| info.kind == crate::prepare::SymbolKind::Auxiliary)
    }
}
