//! Flattens the rule trees of a [`Grammar`] into numbered symbols and
//! productions.

use std::collections::BTreeSet;

use loam_language::{FieldId, Symbol};
use rustc_hash::FxHashMap;

use crate::grammar::{Grammar, TokenDef};
use crate::rule::{Associativity, Rule};
use crate::GrammarError;

/// Symbols at or above this id are reserved by the engine.
const MAX_SYMBOL_COUNT: usize = u16::MAX as usize - 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SymbolKind {
    End,
    Terminal,
    External,
    NonTerminal,
    Auxiliary,
    Alias,
}

#[derive(Debug, Clone)]
pub(crate) struct SymbolInfo {
    pub(crate) name: String,
    pub(crate) kind: SymbolKind,
    pub(crate) visible: bool,
    pub(crate) named: bool,
    pub(crate) supertype: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Step {
    pub(crate) symbol: Symbol,
    pub(crate) field: Option<FieldId>,
    pub(crate) alias: Option<Symbol>,
}

impl Step {
    pub(crate) fn new(symbol: Symbol) -> Self {
        Self { symbol, field: None, alias: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Production {
    pub(crate) lhs: Symbol,
    pub(crate) steps: Vec<Step>,
    pub(crate) precedence: i32,
    pub(crate) associativity: Option<Associativity>,
    pub(crate) dynamic_precedence: i32,
    /// The `R -> R R` production of a repetition helper.
    pub(crate) is_repetition: bool,
}

#[derive(Debug)]
pub(crate) struct Prepared {
    pub(crate) symbols: Vec<SymbolInfo>,
    /// `END`, the declared tokens and the external tokens.
    pub(crate) token_count: usize,
    pub(crate) external_count: usize,
    pub(crate) productions: Vec<Production>,
    /// Productions of each symbol, indexed by symbol.
    pub(crate) by_lhs: Vec<Vec<usize>>,
    pub(crate) start: Symbol,
    /// Index zero is unused.
    pub(crate) field_names: Vec<String>,
    pub(crate) extras: Vec<Symbol>,
    pub(crate) word: Option<Symbol>,
    pub(crate) conflicts: Vec<BTreeSet<Symbol>>,
    pub(crate) supertypes: Vec<Symbol>,
}

impl Prepared {
    #[inline]
    pub(crate) fn is_terminal(&self, symbol: Symbol) -> bool {
        (symbol as usize) < self.token_count
    }

    pub(crate) fn name(&self, symbol: Symbol) -> &str {
        self.symbols.get(symbol as usize).map_or("", |info| info.name.as_str())
    }

    /// The first symbol that shares `symbol`'s name and kind of visibility.
    pub(crate) fn public_symbol(&self, symbol: Symbol) -> Symbol {
        let Some(info) = self.symbols.get(symbol as usize) else {
            return symbol;
        };
        self.symbols
            .iter()
            .position(|other| {
                other.name == info.name && other.named == info.named && other.visible == info.visible
            })
            .map_or(symbol, |index| index as Symbol)
    }
}

#[derive(Debug, Clone, Default)]
struct Alternative {
    steps: Vec<Step>,
    precedence: Option<i32>,
    associativity: Option<Associativity>,
    dynamic_precedence: i32,
}

impl Alternative {
    fn single(symbol: Symbol) -> Self {
        Self { steps: vec![Step::new(symbol)], ..Self::default() }
    }

    fn join(&self, other: &Self) -> Self {
        let mut steps = self.steps.clone();
        steps.extend_from_slice(&other.steps);
        Self {
            steps,
            precedence: self.precedence.or(other.precedence),
            associativity: self.associativity.or(other.associativity),
            dynamic_precedence: self.dynamic_precedence + other.dynamic_precedence,
        }
    }
}

struct Flattener {
    names: FxHashMap<(&'static str, bool), Symbol>,
    symbols: Vec<SymbolInfo>,
    productions: Vec<Production>,
    field_ids: FxHashMap<&'static str, FieldId>,
    aliases: FxHashMap<(&'static str, bool), Symbol>,
    repeat_counts: FxHashMap<&'static str, u32>,
}

pub(crate) fn prepare(grammar: &Grammar) -> Result<Prepared, GrammarError> {
    let Some(&(start_name, _)) = grammar.rules.first() else {
        return Err(GrammarError::NoRules);
    };

    let mut flattener = Flattener {
        names: FxHashMap::default(),
        symbols: vec![SymbolInfo {
            name: "end".to_owned(),
            kind: SymbolKind::End,
            visible: false,
            named: true,
            supertype: false,
        }],
        productions: Vec::new(),
        field_ids: FxHashMap::default(),
        aliases: FxHashMap::default(),
        repeat_counts: FxHashMap::default(),
    };

    for token in &grammar.tokens {
        flattener.declare_token(*token, SymbolKind::Terminal)?;
    }
    for token in &grammar.externals {
        flattener.declare_token(*token, SymbolKind::External)?;
    }
    let token_count = flattener.symbols.len();

    for &(name, _) in &grammar.rules {
        flattener.declare(name, true, SymbolKind::NonTerminal, !name.starts_with('_'))?;
    }

    let mut field_names = BTreeSet::new();
    for (_, rule) in &grammar.rules {
        collect_fields(rule, &mut field_names);
    }
    flattener.field_ids =
        field_names.iter().enumerate().map(|(index, &name)| (name, index as FieldId + 1)).collect();

    for (name, rule) in &grammar.rules {
        let lhs = flattener.resolve(name, true)?;
        for alternative in flattener.flatten(rule, *name)? {
            flattener.push_production(lhs, alternative, false);
        }
    }

    if flattener.symbols.len() > MAX_SYMBOL_COUNT {
        return Err(GrammarError::TooLarge(flattener.symbols.len()));
    }

    let extras = grammar
        .extras
        .iter()
        .map(|rule| {
            let symbol = match *rule {
                Rule::String(text) => flattener.resolve(text, false)?,
                Rule::Symbol(name) => flattener.resolve(name, true)?,
                _ => return Err(GrammarError::InvalidExtra(format!("{rule:?}"))),
            };
            if (symbol as usize) < token_count {
                Ok(symbol)
            } else {
                Err(GrammarError::InvalidExtra(flattener.symbols[symbol as usize].name.clone()))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let word = match grammar.word {
        Some(name) => match flattener.names.get(&(name, true)) {
            Some(&symbol) if (symbol as usize) < token_count => Some(symbol),
            _ => return Err(GrammarError::InvalidWord(name.to_owned())),
        },
        None => None,
    };

    let conflicts = grammar
        .conflicts
        .iter()
        .map(|names| {
            names.iter().map(|&name| flattener.resolve(name, true)).collect::<Result<BTreeSet<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut supertypes = Vec::new();
    for &name in &grammar.supertypes {
        let symbol = flattener.resolve(name, true)?;
        let info = &mut flattener.symbols[symbol as usize];
        if info.kind != SymbolKind::NonTerminal || info.visible {
            return Err(GrammarError::InvalidSupertype(name.to_owned()));
        }
        info.supertype = true;
        supertypes.push(symbol);
    }

    let mut by_lhs = vec![Vec::new(); flattener.symbols.len()];
    for (index, production) in flattener.productions.iter().enumerate() {
        by_lhs[production.lhs as usize].push(index);
    }

    let start = flattener.resolve(start_name, true)?;
    Ok(Prepared {
        token_count,
        external_count: grammar.externals.len(),
        symbols: flattener.symbols,
        productions: flattener.productions,
        by_lhs,
        start,
        field_names: std::iter::once(String::new())
            .chain(field_names.into_iter().map(str::to_owned))
            .collect(),
        extras,
        word,
        conflicts,
        supertypes,
    })
}

fn collect_fields(rule: &Rule, fields: &mut BTreeSet<&'static str>) {
    match rule {
        Rule::Blank | Rule::String(_) | Rule::Symbol(_) => {}
        Rule::Seq(rules) | Rule::Choice(rules) => {
            for rule in rules {
                collect_fields(rule, fields);
            }
        }
        Rule::Field(name, rule) => {
            fields.insert(*name);
            collect_fields(rule, fields);
        }
        Rule::Repeat(rule)
        | Rule::Alias { rule, .. }
        | Rule::Prec { rule, .. }
        | Rule::DynamicPrec(_, rule) => collect_fields(rule, fields),
    }
}

impl Flattener {
    fn declare_token(&mut self, token: TokenDef, kind: SymbolKind) -> Result<(), GrammarError> {
        let expected = self.symbols.len() as Symbol;
        if token.id != expected {
            return Err(GrammarError::TokenId {
                name: token.name.to_owned(),
                expected,
                found: token.id,
            });
        }
        self.declare(token.name, token.named, kind, !token.name.starts_with('_'))
    }

    fn declare(
        &mut self,
        name: &'static str,
        named: bool,
        kind: SymbolKind,
        visible: bool,
    ) -> Result<(), GrammarError> {
        let symbol = self.symbols.len() as Symbol;
        if self.names.insert((name, named), symbol).is_some() {
            return Err(GrammarError::DuplicateName(name.to_owned()));
        }
        self.symbols.push(SymbolInfo { name: name.to_owned(), kind, visible, named, supertype: false });
        Ok(())
    }

    fn resolve(&self, name: &str, named: bool) -> Result<Symbol, GrammarError> {
        self.names
            .get(&(name, named))
            .copied()
            .ok_or_else(|| GrammarError::UndefinedSymbol(name.to_owned()))
    }

    fn add_symbol(&mut self, name: String, kind: SymbolKind, visible: bool, named: bool) -> Symbol {
        let symbol = self.symbols.len() as Symbol;
        self.symbols.push(SymbolInfo { name, kind, visible, named, supertype: false });
        symbol
    }

    fn alias_symbol(&mut self, value: &'static str, named: bool) -> Symbol {
        if let Some(&symbol) = self.names.get(&(value, named)) {
            if self.symbols[symbol as usize].visible {
                return symbol;
            }
        }
        if let Some(&symbol) = self.aliases.get(&(value, named)) {
            return symbol;
        }
        let symbol = self.add_symbol(value.to_owned(), SymbolKind::Alias, true, named);
        self.aliases.insert((value, named), symbol);
        symbol
    }

    fn push_production(&mut self, lhs: Symbol, alternative: Alternative, is_repetition: bool) {
        let production = Production {
            lhs,
            steps: alternative.steps,
            precedence: alternative.precedence.unwrap_or(0),
            associativity: alternative.associativity,
            dynamic_precedence: alternative.dynamic_precedence,
            is_repetition,
        };
        if !self.productions.contains(&production) {
            self.productions.push(production);
        }
    }

    fn flatten(&mut self, rule: &Rule, rule_name: &'static str) -> Result<Vec<Alternative>, GrammarError> {
        let alternatives = match rule {
            Rule::Blank => vec![Alternative::default()],
            Rule::String(text) => vec![Alternative::single(self.resolve(text, false)?)],
            Rule::Symbol(name) => vec![Alternative::single(self.resolve(name, true)?)],
            Rule::Seq(rules) => {
                let mut result = vec![Alternative::default()];
                for rule in rules {
                    let suffixes = self.flatten(rule, rule_name)?;
                    result = result
                        .iter()
                        .flat_map(|prefix| suffixes.iter().map(|suffix| prefix.join(suffix)))
                        .collect();
                }
                result
            }
            Rule::Choice(rules) => {
                let mut result = Vec::new();
                for rule in rules {
                    result.extend(self.flatten(rule, rule_name)?);
                }
                result
            }
            Rule::Repeat(rule) => {
                let count = self.repeat_counts.entry(rule_name).or_insert(0);
                *count += 1;
                let name = format!("{rule_name}_repeat{count}");
                let symbol = self.add_symbol(name, SymbolKind::Auxiliary, false, false);
                let pair = Alternative {
                    steps: vec![Step::new(symbol), Step::new(symbol)],
                    ..Alternative::default()
                };
                self.push_production(symbol, pair, true);
                for alternative in self.flatten(rule, rule_name)? {
                    self.push_production(symbol, alternative, false);
                }
                vec![Alternative::single(symbol)]
            }
            Rule::Field(name, rule) => {
                let field = self.field_ids.get(name).copied();
                let mut alternatives = self.flatten(rule, rule_name)?;
                for step in alternatives.iter_mut().flat_map(|alternative| &mut alternative.steps) {
                    step.field = field;
                }
                alternatives
            }
            Rule::Alias { rule, value, named } => {
                let mut alternatives = self.flatten(rule, rule_name)?;
                let alias = self.alias_symbol(*value, *named);
                for alternative in &mut alternatives {
                    let [step] = alternative.steps.as_mut_slice() else {
                        return Err(GrammarError::InvalidAlias((*value).to_owned()));
                    };
                    if step.symbol != alias {
                        step.alias = Some(alias);
                    }
                }
                alternatives
            }
            Rule::Prec { precedence, associativity, rule } => {
                let mut alternatives = self.flatten(rule, rule_name)?;
                for alternative in &mut alternatives {
                    if alternative.precedence.is_none() {
                        alternative.precedence = Some(*precedence);
                        alternative.associativity = *associativity;
                    }
                }
                alternatives
            }
            Rule::DynamicPrec(precedence, rule) => {
                let mut alternatives = self.flatten(rule, rule_name)?;
                for alternative in &mut alternatives {
                    alternative.dynamic_precedence += precedence;
                }
                alternatives
            }
        };
        Ok(alternatives)
    }
}
