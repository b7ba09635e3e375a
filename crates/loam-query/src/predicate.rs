use regex::bytes::Regex;

use crate::error::QueryError;
use crate::syntax::{Predicate, PredicateArg};
use crate::{QueryCapture, TextProvider};

/// A key-value pair attached to a pattern with `#set!`, `#is?` or
/// `#is-not?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryProperty {
    pub key: Box<str>,
    pub value: Option<Box<str>>,
    pub capture_id: Option<u32>,
}

impl QueryProperty {
    pub fn new(key: &str, value: Option<&str>, capture_id: Option<u32>) -> Self {
        Self { key: key.into(), value: value.map(Into::into), capture_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPredicateArg {
    Capture(u32),
    String(Box<str>),
}

/// A predicate the query engine does not interpret itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPredicate {
    pub operator: Box<str>,
    pub args: Box<[QueryPredicateArg]>,
}

/// A predicate on the text of captured nodes, checked before a match is
/// returned.
///
/// `match_all` predicates hold when every captured node passes the test;
/// the `any-` forms hold when at least one does.
#[derive(Debug, Clone)]
pub enum TextPredicate {
    EqString { capture: u32, value: Box<str>, positive: bool, match_all: bool },
    EqCapture { capture: u32, other: u32, positive: bool, match_all: bool },
    Match { capture: u32, regex: Regex, positive: bool, match_all: bool },
    AnyOf { capture: u32, values: Box<[Box<str>]>, positive: bool },
}

impl TextPredicate {
    /// The captures whose text the predicate reads.
    pub(crate) fn captures(&self) -> impl Iterator<Item = u32> {
        let (first, second) = match self {
            Self::EqString { capture, .. }
            | Self::Match { capture, .. }
            | Self::AnyOf { capture, .. } => (*capture, None),
            Self::EqCapture { capture, other, .. } => (*capture, Some(*other)),
        };
        std::iter::once(first).chain(second)
    }

    pub(crate) fn is_satisfied<T, I>(
        &self,
        captures: &[QueryCapture<'_>],
        text_provider: &mut T,
        buffers: &mut (Vec<u8>, Vec<u8>),
    ) -> bool
    where
        T: TextProvider<I>,
        I: AsRef<[u8]>,
    {
        let nodes = |index: u32| captures.iter().filter(move |capture| capture.index == index);
        let (first, second) = buffers;
        match self {
            Self::EqCapture { capture, other, positive, match_all } => {
                let mut left = nodes(*capture);
                let mut right = nodes(*other);
                loop {
                    match (left.next(), right.next()) {
                        (Some(a), Some(b)) => {
                            read_text(text_provider, a, first);
                            read_text(text_provider, b, second);
                            let is_positive = first == second;
                            if is_positive != *positive && *match_all {
                                return false;
                            }
                            if is_positive == *positive && !*match_all {
                                return true;
                            }
                        }
                        (None, None) => return true,
                        _ => return false,
                    }
                }
            }
            Self::EqString { capture, value, positive, match_all } => {
                test_nodes(nodes(*capture), *match_all, |node| {
                    read_text(text_provider, node, first);
                    (first.as_slice() == value.as_bytes()) == *positive
                })
            }
            Self::Match { capture, regex, positive, match_all } => {
                test_nodes(nodes(*capture), *match_all, |node| {
                    read_text(text_provider, node, first);
                    regex.is_match(first) == *positive
                })
            }
            Self::AnyOf { capture, values, positive } => {
                test_nodes(nodes(*capture), true, |node| {
                    read_text(text_provider, node, first);
                    values.iter().any(|value| first.as_slice() == value.as_bytes()) == *positive
                })
            }
        }
    }
}

/// Applies `test` to every captured node. With no nodes the predicate holds.
fn test_nodes<'a, 'tree: 'a>(
    nodes: impl Iterator<Item = &'a QueryCapture<'tree>>,
    match_all: bool,
    mut test: impl FnMut(&QueryCapture<'tree>) -> bool,
) -> bool {
    let mut seen = false;
    for node in nodes {
        seen = true;
        let passed = test(node);
        if passed != match_all {
            return passed;
        }
    }
    match_all || !seen
}

fn read_text<T, I>(text_provider: &mut T, capture: &QueryCapture<'_>, buffer: &mut Vec<u8>)
where
    T: TextProvider<I>,
    I: AsRef<[u8]>,
{
    buffer.clear();
    for chunk in text_provider.text(capture.node) {
        buffer.extend_from_slice(chunk.as_ref());
    }
}

/// Predicates of one pattern, sorted by kind.
#[derive(Debug, Default)]
pub(crate) struct PatternPredicates {
    pub(crate) text: Vec<TextPredicate>,
    pub(crate) property_settings: Vec<QueryProperty>,
    pub(crate) property_predicates: Vec<(QueryProperty, bool)>,
    pub(crate) general: Vec<QueryPredicate>,
}

enum Arg<'a> {
    Capture(u32, &'a str),
    String(&'a str),
}

impl Arg<'_> {
    fn describe(&self) -> String {
        match self {
            Self::Capture(_, name) => format!("capture @{name}"),
            Self::String(value) => format!("literal {value}"),
        }
    }
}

impl PatternPredicates {
    pub(crate) fn compile(
        source: &str,
        row: usize,
        predicates: &[Predicate],
        capture_index: impl Fn(&str) -> Option<u32>,
    ) -> Result<Self, QueryError> {
        let mut compiled = Self::default();
        for predicate in predicates {
            let mut args = Vec::with_capacity(predicate.args.len());
            for arg in &predicate.args {
                args.push(match arg {
                    PredicateArg::Capture(name) => {
                        let Some(index) = capture_index(&name.text) else {
                            return Err(QueryError::name(
                                source,
                                name.start,
                                crate::QueryErrorKind::Capture,
                                &name.text,
                            ));
                        };
                        Arg::Capture(index, &name.text)
                    }
                    PredicateArg::String(value) => Arg::String(value),
                });
            }
            compiled.add(row, &predicate.name, &args)?;
        }
        Ok(compiled)
    }

    fn add(&mut self, row: usize, operator: &str, args: &[Arg<'_>]) -> Result<(), QueryError> {
        let error = |message: String| Err(QueryError::predicate(row, message));
        match operator {
            "eq?" | "not-eq?" | "any-eq?" | "any-not-eq?" => {
                let [first, second] = args else {
                    return error(format!(
                        "Wrong number of arguments to #eq? predicate. Expected 2, got {}.",
                        args.len()
                    ));
                };
                let Arg::Capture(capture, _) = first else {
                    return error(format!(
                        "First argument to #eq? predicate must be a capture name. Got {}.",
                        first.describe()
                    ));
                };
                let positive = matches!(operator, "eq?" | "any-eq?");
                let match_all = matches!(operator, "eq?" | "not-eq?");
                self.text.push(match second {
                    Arg::Capture(other, _) => {
                        TextPredicate::EqCapture { capture: *capture, other: *other, positive, match_all }
                    }
                    Arg::String(value) => TextPredicate::EqString {
                        capture: *capture,
                        value: (*value).into(),
                        positive,
                        match_all,
                    },
                });
            }
            "match?" | "not-match?" | "any-match?" | "any-not-match?" => {
                let [first, second] = args else {
                    return error(format!(
                        "Wrong number of arguments to #match? predicate. Expected 2, got {}.",
                        args.len()
                    ));
                };
                let Arg::Capture(capture, _) = first else {
                    return error(format!(
                        "First argument to #match? predicate must be a capture name. Got {}.",
                        first.describe()
                    ));
                };
                let Arg::String(pattern) = second else {
                    return error(format!(
                        "Second argument to #match? predicate must be a literal. Got {}.",
                        second.describe()
                    ));
                };
                let Ok(regex) = Regex::new(pattern) else {
                    return error(format!("Invalid regex: '{pattern}'"));
                };
                self.text.push(TextPredicate::Match {
                    capture: *capture,
                    regex,
                    positive: matches!(operator, "match?" | "any-match?"),
                    match_all: matches!(operator, "match?" | "not-match?"),
                });
            }
            "any-of?" | "not-any-of?" => {
                let [first, rest @ ..] = args else {
                    return error(
                        "Wrong number of arguments to #any-of? predicate. Expected at least 1, got 0."
                            .to_owned(),
                    );
                };
                let Arg::Capture(capture, _) = first else {
                    return error(format!(
                        "First argument to #any-of? predicate must be a capture name. Got {}.",
                        first.describe()
                    ));
                };
                let mut values = Vec::with_capacity(rest.len());
                for arg in rest {
                    match arg {
                        Arg::String(value) => values.push((*value).into()),
                        Arg::Capture(..) => {
                            return error(format!(
                                "Arguments to #any-of? predicate must be literals. Got {}.",
                                arg.describe()
                            ));
                        }
                    }
                }
                self.text.push(TextPredicate::AnyOf {
                    capture: *capture,
                    values: values.into_boxed_slice(),
                    positive: operator == "any-of?",
                });
            }
            "set!" => {
                let property = parse_property(row, operator, args)?;
                self.property_settings.push(property);
            }
            "is?" | "is-not?" => {
                let property = parse_property(row, operator, args)?;
                self.property_predicates.push((property, operator == "is?"));
            }
            _ => self.general.push(QueryPredicate {
                operator: operator.into(),
                args: args
                    .iter()
                    .map(|arg| match arg {
                        Arg::Capture(index, _) => QueryPredicateArg::Capture(*index),
                        Arg::String(value) => QueryPredicateArg::String((*value).into()),
                    })
                    .collect(),
            }),
        }
        Ok(())
    }
}

fn parse_property(row: usize, operator: &str, args: &[Arg<'_>]) -> Result<QueryProperty, QueryError> {
    if args.is_empty() || args.len() > 3 {
        return Err(QueryError::predicate(
            row,
            format!(
                "Wrong number of arguments to {operator} predicate. Expected 1 to 3, got {}.",
                args.len()
            ),
        ));
    }

    let mut capture_id = None;
    let mut key = None;
    let mut value = None;
    for arg in args {
        match arg {
            Arg::Capture(index, name) => {
                if capture_id.is_some() {
                    return Err(QueryError::predicate(
                        row,
                        format!(
                            "Invalid arguments to {operator} predicate. Unexpected second capture name @{name}"
                        ),
                    ));
                }
                capture_id = Some(*index);
            }
            Arg::String(text) if key.is_none() => key = Some(*text),
            Arg::String(text) if value.is_none() => value = Some(*text),
            Arg::String(text) => {
                return Err(QueryError::predicate(
                    row,
                    format!("Invalid arguments to {operator} predicate. Unexpected third argument @{text}"),
                ));
            }
        }
    }

    let Some(key) = key else {
        return Err(QueryError::predicate(
            row,
            format!("Invalid arguments to {operator} predicate. Missing key argument"),
        ));
    };
    Ok(QueryProperty::new(key, value, capture_id))
}
