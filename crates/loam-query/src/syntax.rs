//! Reads query source into a tree of patterns. Names are resolved against a
//! language later, when the patterns are lowered into steps.

use std::mem;

use crate::error::QueryError;

/// A name as written in the source, with the offset it starts at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Name {
    pub(crate) text: String,
    pub(crate) start: usize,
    /// End of the raw source text, before unescaping.
    pub(crate) end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Quantifier {
    ZeroOrOne,
    ZeroOrMore,
    OneOrMore,
}

#[derive(Debug)]
pub(crate) struct Item {
    /// Offset of the item, including its field prefix.
    pub(crate) start: usize,
    pub(crate) field: Option<Name>,
    pub(crate) kind: ItemKind,
    /// Suffix quantifiers, innermost first.
    pub(crate) quantifiers: Vec<Quantifier>,
    pub(crate) captures: Vec<Name>,
}

#[derive(Debug)]
pub(crate) enum ItemKind {
    Node(NodeItem),
    Group(Vec<Child>),
    Alternation(Vec<Item>),
}

#[derive(Debug)]
pub(crate) struct NodeItem {
    /// Offset of the opening parenthesis, or of the token for bare items.
    pub(crate) open: usize,
    pub(crate) kind: NodeKind,
    pub(crate) children: Vec<Child>,
    pub(crate) negated_fields: Vec<Name>,
}

#[derive(Debug)]
pub(crate) enum NodeKind {
    /// `_` matches any node, `(_)` only named ones.
    Wildcard { named: bool },
    Named { name: Name, supertype: Option<Name> },
    Anonymous(Name),
    Error,
    Missing { name: Option<Name>, named: bool },
}

#[derive(Debug)]
pub(crate) enum Child {
    Item(Item),
    /// A `.` between siblings.
    Anchor,
}

#[derive(Debug)]
pub(crate) enum PredicateArg {
    Capture(Name),
    String(String),
}

#[derive(Debug)]
pub(crate) struct Predicate {
    pub(crate) name: String,
    pub(crate) args: Vec<PredicateArg>,
}

#[derive(Debug)]
pub(crate) struct Pattern {
    pub(crate) item: Item,
    pub(crate) predicates: Vec<Predicate>,
    pub(crate) start: usize,
    pub(crate) end: usize,
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-')
}

fn is_identifier_char(c: char) -> bool {
    is_identifier_start(c) || matches!(c, '.' | '?' | '!')
}

pub(crate) fn parse(source: &str) -> Result<Vec<Pattern>, QueryError> {
    let mut parser = Parser { source, pos: 0, predicates: Vec::new() };
    let mut patterns: Vec<Pattern> = Vec::new();
    loop {
        parser.skip_trivia();
        let start = parser.pos;
        if parser.peek().is_none() {
            break;
        }
        if parser.at_predicate() {
            let predicate = parser.predicate()?;
            let Some(pattern) = patterns.last_mut() else {
                return Err(QueryError::syntax(source, start));
            };
            pattern.predicates.push(predicate);
            parser.skip_trivia();
            pattern.end = parser.pos;
            continue;
        }
        let item = parser.item()?;
        let predicates = mem::take(&mut parser.predicates);
        parser.skip_trivia();
        patterns.push(Pattern { item, predicates, start, end: parser.pos });
    }
    Ok(patterns)
}

struct Parser<'a> {
    source: &'a str,
    pos: usize,
    /// Predicates of the pattern being read.
    predicates: Vec<Predicate>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        let found = self.peek() == Some(expected);
        if found {
            self.bump();
        }
        found
    }

    fn error(&self) -> QueryError {
        QueryError::syntax(self.source, self.pos)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => self.bump(),
                Some(';') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                }
                _ => return,
            }
        }
    }

    fn identifier(&mut self) -> Name {
        let start = self.pos;
        if self.peek().is_some_and(is_identifier_start) {
            self.bump();
            while self.peek().is_some_and(is_identifier_char) {
                self.bump();
            }
        }
        Name { text: self.source[start..self.pos].to_owned(), start, end: self.pos }
    }

    /// Whether the next tokens are `(` and `#`.
    fn at_predicate(&self) -> bool {
        let rest = &self.source[self.pos..];
        rest.strip_prefix('(').is_some_and(|rest| rest.trim_start().starts_with('#'))
    }

    /// Reads a string literal. The name starts after the opening quote.
    fn string(&mut self) -> Result<Name, QueryError> {
        let open = self.pos;
        self.bump();
        let start = self.pos;
        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => return Err(QueryError::syntax(self.source, open)),
                Some('"') => {
                    let end = self.pos;
                    self.bump();
                    return Ok(Name { text, start, end });
                }
                Some('\\') => {
                    self.bump();
                    match self.peek() {
                        None => return Err(QueryError::syntax(self.source, open)),
                        Some('n') => text.push('\n'),
                        Some('r') => text.push('\r'),
                        Some('t') => text.push('\t'),
                        Some('0') => text.push('\0'),
                        Some(c) => text.push(c),
                    }
                    self.bump();
                }
                Some(c) => {
                    text.push(c);
                    self.bump();
                }
            }
        }
    }

    fn predicate(&mut self) -> Result<Predicate, QueryError> {
        self.bump();
        self.skip_trivia();
        self.bump();
        let name = self.identifier();
        if name.text.is_empty() {
            return Err(self.error());
        }
        let mut args = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                Some(')') => {
                    self.bump();
                    return Ok(Predicate { name: name.text, args });
                }
                Some('@') => {
                    self.bump();
                    let capture = self.identifier();
                    if capture.text.is_empty() {
                        return Err(self.error());
                    }
                    args.push(PredicateArg::Capture(capture));
                }
                Some('"') => args.push(PredicateArg::String(self.string()?.text)),
                Some(c) if is_identifier_start(c) => {
                    args.push(PredicateArg::String(self.identifier().text));
                }
                _ => return Err(self.error()),
            }
        }
    }

    fn item(&mut self) -> Result<Item, QueryError> {
        let start = self.pos;
        if self.peek().is_some_and(is_identifier_start) {
            let name = self.identifier();
            self.skip_trivia();
            if self.eat(':') {
                self.skip_trivia();
                let mut item = self.item()?;
                if item.field.is_some() {
                    return Err(QueryError::syntax(self.source, item.start));
                }
                item.start = start;
                item.field = Some(name);
                return Ok(item);
            }
            if name.text != "_" {
                return Err(QueryError::syntax(self.source, name.start));
            }
            let node = NodeItem {
                open: start,
                kind: NodeKind::Wildcard { named: false },
                children: Vec::new(),
                negated_fields: Vec::new(),
            };
            return self.suffixes(start, ItemKind::Node(node));
        }

        let kind = match self.peek() {
            Some('(') => self.parenthesized()?,
            Some('[') => self.alternation()?,
            Some('"') => {
                let name = self.string()?;
                ItemKind::Node(NodeItem {
                    open: start,
                    kind: NodeKind::Anonymous(name),
                    children: Vec::new(),
                    negated_fields: Vec::new(),
                })
            }
            _ => return Err(self.error()),
        };
        self.suffixes(start, kind)
    }

    fn suffixes(&mut self, start: usize, kind: ItemKind) -> Result<Item, QueryError> {
        let mut item = Item { start, field: None, kind, quantifiers: Vec::new(), captures: Vec::new() };
        loop {
            self.skip_trivia();
            match self.peek() {
                Some('?') => item.quantifiers.push(Quantifier::ZeroOrOne),
                Some('*') => item.quantifiers.push(Quantifier::ZeroOrMore),
                Some('+') => item.quantifiers.push(Quantifier::OneOrMore),
                Some('@') => {
                    self.bump();
                    let name = self.identifier();
                    if name.text.is_empty() {
                        return Err(self.error());
                    }
                    item.captures.push(name);
                    continue;
                }
                _ => return Ok(item),
            }
            self.bump();
        }
    }

    fn alternation(&mut self) -> Result<ItemKind, QueryError> {
        self.bump();
        let mut branches = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                Some(']') if branches.is_empty() => return Err(self.error()),
                Some(']') => {
                    self.bump();
                    return Ok(ItemKind::Alternation(branches));
                }
                None => return Err(self.error()),
                Some(_) => branches.push(self.item()?),
            }
        }
    }

    /// A node, a group of siblings, or a `MISSING` node.
    fn parenthesized(&mut self) -> Result<ItemKind, QueryError> {
        let open = self.pos;
        self.bump();
        self.skip_trivia();
        match self.peek() {
            Some('(' | '[' | '"' | '.') => {
                let children = self.children(None)?;
                Ok(ItemKind::Group(children))
            }
            Some(c) if is_identifier_start(c) => self.node(open),
            _ => Err(self.error()),
        }
    }

    fn node(&mut self, open: usize) -> Result<ItemKind, QueryError> {
        let name = self.identifier();
        let kind = match name.text.as_str() {
            "_" => NodeKind::Wildcard { named: true },
            "ERROR" => NodeKind::Error,
            "MISSING" => {
                self.skip_trivia();
                let kind = match self.peek() {
                    Some('"') => NodeKind::Missing { name: Some(self.string()?), named: false },
                    Some(c) if is_identifier_start(c) => {
                        NodeKind::Missing { name: Some(self.identifier()), named: true }
                    }
                    _ => NodeKind::Missing { name: None, named: true },
                };
                self.skip_trivia();
                if !self.eat(')') {
                    return Err(self.error());
                }
                return Ok(ItemKind::Node(NodeItem {
                    open,
                    kind,
                    children: Vec::new(),
                    negated_fields: Vec::new(),
                }));
            }
            _ if self.eat('/') => {
                let subtype = self.identifier();
                if subtype.text.is_empty() {
                    return Err(self.error());
                }
                NodeKind::Named { name: subtype, supertype: Some(name) }
            }
            _ => NodeKind::Named { name, supertype: None },
        };

        let mut negated_fields = Vec::new();
        let children = self.children(Some(&mut negated_fields))?;
        Ok(ItemKind::Node(NodeItem { open, kind, children, negated_fields }))
    }

    /// Reads children up to and including the closing parenthesis. Negated
    /// fields are only accepted inside nodes.
    fn children(&mut self, mut negated_fields: Option<&mut Vec<Name>>) -> Result<Vec<Child>, QueryError> {
        let mut children = Vec::new();
        let mut has_items = false;
        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Err(self.error()),
                Some(')') => {
                    let has_anchor = children.iter().any(|child| matches!(child, Child::Anchor));
                    if has_anchor && !has_items {
                        return Err(self.error());
                    }
                    self.bump();
                    return Ok(children);
                }
                Some('.') => {
                    children.push(Child::Anchor);
                    self.bump();
                }
                Some('!') => {
                    let Some(fields) = negated_fields.as_deref_mut() else {
                        return Err(self.error());
                    };
                    self.bump();
                    self.skip_trivia();
                    let name = self.identifier();
                    if name.text.is_empty() {
                        return Err(self.error());
                    }
                    fields.push(name);
                }
                Some('(') if self.at_predicate() => {
                    let predicate = self.predicate()?;
                    self.predicates.push(predicate);
                }
                Some(_) => {
                    children.push(Child::Item(self.item()?));
                    has_items = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Child, ItemKind, NodeKind, PredicateArg, Quantifier, parse};

    #[test]
    fn reads_fields_captures_and_quantifiers() {
        let Ok(patterns) = parse("(pair key: (string) @key . (_)* @rest) ; trailing\n") else {
            panic!("pattern should parse");
        };
        let [pattern] = patterns.as_slice() else { panic!("one pattern") };
        assert_eq!(pattern.start, 0);
        let ItemKind::Node(node) = &pattern.item.kind else { panic!("node pattern") };
        let [Child::Item(key), Child::Anchor, Child::Item(rest)] = node.children.as_slice()
        else {
            panic!("unexpected children: {:?}", node.children);
        };
        assert_eq!(key.field.as_ref().map(|name| name.text.as_str()), Some("key"));
        assert_eq!(key.start, 6);
        assert_eq!(key.captures[0].text, "key");
        assert_eq!(rest.quantifiers, [Quantifier::ZeroOrMore]);
        let ItemKind::Node(rest) = &rest.kind else { panic!("wildcard node") };
        assert!(matches!(rest.kind, NodeKind::Wildcard { named: true }));
    }

    #[test]
    fn predicates_attach_to_their_pattern() {
        let Ok(patterns) = parse(r#"((identifier) @x (#eq? @x "a\tb")) (number) (#set! kind num)"#)
        else {
            panic!("patterns should parse");
        };
        let [first, second] = patterns.as_slice() else { panic!("two patterns") };
        let [predicate] = first.predicates.as_slice() else { panic!("one predicate") };
        assert_eq!(predicate.name, "eq?");
        assert!(matches!(&predicate.args[..], [PredicateArg::Capture(capture), PredicateArg::String(text)]
            if capture.text == "x" && text == "a\tb"));
        assert_eq!(second.predicates[0].name, "set!");
        assert_eq!(second.predicates[0].args.len(), 2);
    }

    #[test]
    fn syntax_errors_point_at_the_offending_token() {
        let offset = |source: &str| parse(source).err().map(|error| error.offset);
        assert_eq!(offset("(if_statement"), Some(13));
        assert_eq!(offset("(if_statement identifier)"), Some(14));
        assert_eq!(offset("(if_statement condition:)"), Some(24));
        assert_eq!(offset(r#"(identifier) "h "#), Some(13));
        assert_eq!(offset("((identifier) ()"), Some(15));
        assert_eq!(offset("((identifier) [])"), Some(15));
        assert_eq!(offset("((identifier) @id (@id))"), Some(19));
        assert_eq!(offset("(statement_block .)"), Some(18));
        assert_eq!(offset("(statement_block ! (if_statement))"), Some(19));
        assert_eq!(offset("(MISSING (identifier))"), Some(9));
        assert_eq!(offset("(MISSING identifier identifier)"), Some(20));
        assert_eq!(offset("(a))"), Some(3));
    }
}
