//! Combinators for declaring grammar rules.

/// How operators of equal precedence group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Associativity {
    Left,
    Right,
}

/// The right-hand side of a grammar rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Blank,
    /// An anonymous token, referenced by its text.
    String(&'static str),
    /// A named token, external token or rule.
    Symbol(&'static str),
    Seq(Vec<Rule>),
    Choice(Vec<Rule>),
    /// One or more repetitions.
    Repeat(Box<Rule>),
    Field(&'static str, Box<Rule>),
    Alias { rule: Box<Rule>, value: &'static str, named: bool },
    Prec { precedence: i32, associativity: Option<Associativity>, rule: Box<Rule> },
    DynamicPrec(i32, Box<Rule>),
}

pub fn sym(name: &'static str) -> Rule {
    Rule::Symbol(name)
}

pub fn string(text: &'static str) -> Rule {
    Rule::String(text)
}

pub fn blank() -> Rule {
    Rule::Blank
}

pub fn seq(rules: impl IntoIterator<Item = Rule>) -> Rule {
    Rule::Seq(rules.into_iter().collect())
}

pub fn choice(rules: impl IntoIterator<Item = Rule>) -> Rule {
    Rule::Choice(rules.into_iter().collect())
}

pub fn optional(rule: Rule) -> Rule {
    Rule::Choice(vec![rule, Rule::Blank])
}

pub fn repeat(rule: Rule) -> Rule {
    optional(repeat1(rule))
}

pub fn repeat1(rule: Rule) -> Rule {
    Rule::Repeat(Box::new(rule))
}

pub fn field(name: &'static str, rule: Rule) -> Rule {
    Rule::Field(name, Box::new(rule))
}

/// Shows `rule`, which must be a single symbol, under another name.
pub fn alias(rule: Rule, value: &'static str, named: bool) -> Rule {
    Rule::Alias { rule: Box::new(rule), value, named }
}

pub fn prec(precedence: i32, rule: Rule) -> Rule {
    Rule::Prec { precedence, associativity: None, rule: Box::new(rule) }
}

pub fn prec_left(precedence: i32, rule: Rule) -> Rule {
    Rule::Prec { precedence, associativity: Some(Associativity::Left), rule: Box::new(rule) }
}

pub fn prec_right(precedence: i32, rule: Rule) -> Rule {
    Rule::Prec { precedence, associativity: Some(Associativity::Right), rule: Box::new(rule) }
}

/// Precedence applied at runtime, between the trees of an ambiguity.
pub fn prec_dynamic(precedence: i32, rule: Rule) -> Rule {
    Rule::DynamicPrec(precedence, Box::new(rule))
}

/// `rule` one or more times, separated by `separator`.
pub fn sep1(rule: Rule, separator: &'static str) -> Rule {
    seq([rule.clone(), repeat(seq([string(separator), rule]))])
}

/// `rule` any number of times, separated by `separator`.
pub fn sep(rule: Rule, separator: &'static str) -> Rule {
    optional(sep1(rule, separator))
}
