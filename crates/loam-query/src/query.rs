use std::ops::Range;

use bitflags::bitflags;
use loam_language::{ERROR, FieldId, Language, Symbol};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{SmallVec, smallvec};

use crate::error::{QueryError, QueryErrorKind};
use crate::predicate::{PatternPredicates, QueryPredicate, QueryProperty, TextPredicate};
use crate::quantifier::CaptureQuantifier;
use crate::syntax::{self, Child, Item, ItemKind, Name, NodeItem, NodeKind, Quantifier};

pub(crate) const WILDCARD_SYMBOL: Symbol = 0;
/// Depth of the step that ends every pattern.
pub(crate) const PATTERN_DONE: u16 = u16::MAX;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct StepFlags: u8 {
        const NAMED = 1 << 0;
        /// Must match the next named sibling, or the first named child.
        const IMMEDIATE = 1 << 1;
        /// Must match the last named child.
        const LAST_CHILD = 1 << 2;
        /// Matches nothing. States continue at both the next step and the
        /// alternative.
        const PASS_THROUGH = 1 << 3;
        /// Matches nothing. States jump to the alternative.
        const DEAD_END = 1 << 4;
        const MISSING = 1 << 5;
        /// This step or a later, deeper step of the pattern captures.
        const CONTAINS_CAPTURES = 1 << 6;
    }
}

/// One node-matching step of a compiled pattern.
#[derive(Debug, Clone)]
pub(crate) struct Step {
    pub(crate) symbol: Symbol,
    /// Hidden supertype the node must be reached through, or zero.
    pub(crate) supertype: Symbol,
    pub(crate) field: FieldId,
    pub(crate) negated_fields: SmallVec<[FieldId; 2]>,
    pub(crate) capture_ids: SmallVec<[u32; 2]>,
    pub(crate) depth: u16,
    pub(crate) alternative: Option<usize>,
    pub(crate) flags: StepFlags,
}

impl Step {
    fn new(depth: u16) -> Self {
        Self {
            symbol: WILDCARD_SYMBOL,
            supertype: 0,
            field: 0,
            negated_fields: SmallVec::new(),
            capture_ids: SmallVec::new(),
            depth,
            alternative: None,
            flags: StepFlags::empty(),
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.depth == PATTERN_DONE
    }
}

#[derive(Debug)]
pub(crate) struct PatternInfo {
    pub(crate) start_step: usize,
    pub(crate) byte_range: Range<usize>,
    pub(crate) is_rooted: bool,
    pub(crate) is_non_local: bool,
}

/// A step that can begin a match of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PatternEntry {
    pub(crate) pattern_index: usize,
    pub(crate) step_index: usize,
}

/// A compiled set of patterns for one language.
///
/// Patterns are numbered in source order. Capture names are shared across
/// all patterns of the query.
#[derive(Debug)]
pub struct Query {
    language: Language,
    pub(crate) steps: Vec<Step>,
    pub(crate) patterns: Vec<PatternInfo>,
    capture_names: Vec<Box<str>>,
    capture_quantifiers: Vec<Box<[CaptureQuantifier]>>,
    pub(crate) text_predicates: Vec<Box<[TextPredicate]>>,
    property_settings: Vec<Box<[QueryProperty]>>,
    property_predicates: Vec<Box<[(QueryProperty, bool)]>>,
    general_predicates: Vec<Box<[QueryPredicate]>>,
    pub(crate) symbol_starts: FxHashMap<Symbol, Vec<PatternEntry>>,
    pub(crate) wildcard_starts: Vec<PatternEntry>,
    /// Source offsets of node steps and whether a match that reaches the
    /// step must succeed, sorted by offset.
    step_offsets: Vec<(usize, bool)>,
}

impl Query {
    pub fn new(language: &Language, source: &str) -> Result<Self, QueryError> {
        if let Err(error) = language.check_version() {
            return Err(QueryError {
                row: 0,
                column: 0,
                offset: 0,
                message: error.to_string(),
                kind: QueryErrorKind::Language,
            });
        }

        let patterns = syntax::parse(source)?;
        let mut compiler = Compiler {
            source,
            language,
            steps: Vec::new(),
            capture_names: Vec::new(),
        };
        let mut query = Self {
            language: language.clone(),
            steps: Vec::new(),
            patterns: Vec::with_capacity(patterns.len()),
            capture_names: Vec::new(),
            capture_quantifiers: Vec::with_capacity(patterns.len()),
            text_predicates: Vec::with_capacity(patterns.len()),
            property_settings: Vec::with_capacity(patterns.len()),
            property_predicates: Vec::with_capacity(patterns.len()),
            general_predicates: Vec::with_capacity(patterns.len()),
            symbol_starts: FxHashMap::default(),
            wildcard_starts: Vec::new(),
            step_offsets: Vec::new(),
        };

        let repeated: FxHashSet<Symbol> = (0..language.node_kind_count() as Symbol)
            .filter_map(|symbol| language.node_type_info(symbol))
            .flat_map(|info| info.repeated_children.iter().copied())
            .collect();

        let mut quantifiers = Vec::with_capacity(patterns.len());
        for pattern in &patterns {
            let start_step = compiler.steps.len();
            compiler.lower_item(&pattern.item, 0)?;
            compiler.steps.push(Step::new(PATTERN_DONE));
            compiler.check_item(None, &pattern.item, None)?;

            let row = source[..pattern.start].matches('\n').count();
            let predicates = PatternPredicates::compile(source, row, &pattern.predicates, |name| {
                compiler.capture_names.iter().position(|known| &**known == name).map(|index| index as u32)
            })?;

            let is_rooted = is_rooted(&pattern.item);
            let is_non_local = !is_rooted && compiler.is_non_local(&pattern.item, &repeated)?;
            tracing::trace!(
                target: "loam",
                pattern = query.patterns.len(),
                steps = compiler.steps.len() - start_step,
                is_rooted,
                is_non_local,
                "compiled pattern"
            );

            let text_captures: FxHashSet<u32> =
                predicates.text.iter().flat_map(TextPredicate::captures).collect();
            let mut guarantees = Guarantees { compiler: &compiler, text_captures, offsets: Vec::new() };
            guarantees.walk(&[&pattern.item], false, None, true, false)?;
            query.step_offsets.extend(guarantees.offsets);

            quantifiers.push(compiler.item_quantifiers(&pattern.item));
            query.patterns.push(PatternInfo {
                start_step,
                byte_range: pattern.start..pattern.end,
                is_rooted,
                is_non_local,
            });
            query.text_predicates.push(predicates.text.into_boxed_slice());
            query.property_settings.push(predicates.property_settings.into_boxed_slice());
            query.property_predicates.push(predicates.property_predicates.into_boxed_slice());
            query.general_predicates.push(predicates.general.into_boxed_slice());
        }

        let capture_count = compiler.capture_names.len();
        query.capture_quantifiers = quantifiers
            .into_iter()
            .map(|quantifiers| {
                (0..capture_count as u32)
                    .map(|id| quantifiers.get(&id).copied().unwrap_or_default())
                    .collect()
            })
            .collect();
        query.capture_names = compiler.capture_names;
        query.steps = compiler.steps;
        query.step_offsets.sort_by_key(|&(offset, _)| offset);
        query.mark_captures();
        query.build_start_entries();
        Ok(query)
    }

    /// Sets `CONTAINS_CAPTURES` on every step that is followed, before the
    /// pattern climbs back to its depth, by a capturing step.
    fn mark_captures(&mut self) {
        for index in (0..self.steps.len()).rev() {
            let step = &self.steps[index];
            if step.is_done() || step.flags.intersects(StepFlags::PASS_THROUGH | StepFlags::DEAD_END) {
                continue;
            }
            let depth = step.depth;
            let contains = self.steps[index..]
                .iter()
                .take_while(|later| !later.is_done())
                .enumerate()
                .take_while(|&(offset, later)| offset == 0 || later.depth > depth)
                .any(|(_, later)| !later.capture_ids.is_empty());
            self.steps[index].flags.set(StepFlags::CONTAINS_CAPTURES, contains);
        }
    }

    fn build_start_entries(&mut self) {
        self.symbol_starts.clear();
        self.wildcard_starts.clear();
        for (pattern_index, pattern) in self.patterns.iter().enumerate() {
            for step_index in self.expand(pattern.start_step) {
                let step = &self.steps[step_index];
                if step.is_done() {
                    continue;
                }
                let entry = PatternEntry { pattern_index, step_index };
                if step.symbol == WILDCARD_SYMBOL {
                    self.wildcard_starts.push(entry);
                } else {
                    self.symbol_starts.entry(step.symbol).or_default().push(entry);
                }
            }
        }
    }

    /// Resolves `index` to the node-matching steps a state placed there
    /// actually waits on, following pass-through and dead-end steps. The
    /// path through `index + 1` comes first.
    pub(crate) fn expand(&self, index: usize) -> SmallVec<[usize; 4]> {
        let mut targets = SmallVec::new();
        let mut visited: SmallVec<[usize; 8]> = SmallVec::new();
        let mut stack: SmallVec<[usize; 8]> = smallvec![index];
        while let Some(index) = stack.pop() {
            if visited.contains(&index) {
                continue;
            }
            visited.push(index);
            let step = &self.steps[index];
            match step.alternative {
                Some(alternative) if step.flags.contains(StepFlags::DEAD_END) => stack.push(alternative),
                Some(alternative) if step.flags.contains(StepFlags::PASS_THROUGH) => {
                    stack.push(alternative);
                    stack.push(index + 1);
                }
                _ => targets.push(index),
            }
        }
        targets
    }

    /// Whether failing to match the step at `index` can still leave the
    /// pattern waiting on deeper steps.
    pub(crate) fn step_is_fallible(&self, index: usize) -> bool {
        let depth = self.steps[index].depth;
        self.steps.get(index + 1).is_some_and(|next| !next.is_done() && next.depth > depth)
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn capture_names(&self) -> &[Box<str>] {
        &self.capture_names
    }

    pub fn capture_index_for_name(&self, name: &str) -> Option<u32> {
        self.capture_names.iter().position(|known| &**known == name).map(|index| index as u32)
    }

    /// How many nodes each capture can hold in a match of the pattern,
    /// indexed by capture id.
    pub fn capture_quantifiers(&self, pattern_index: usize) -> &[CaptureQuantifier] {
        self.capture_quantifiers.get(pattern_index).map(|quantifiers| &**quantifiers).unwrap_or_default()
    }

    pub fn start_byte_for_pattern(&self, pattern_index: usize) -> usize {
        self.patterns.get(pattern_index).map_or(0, |pattern| pattern.byte_range.start)
    }

    pub fn end_byte_for_pattern(&self, pattern_index: usize) -> usize {
        self.patterns.get(pattern_index).map_or(0, |pattern| pattern.byte_range.end)
    }

    pub fn text_predicates(&self, pattern_index: usize) -> &[TextPredicate] {
        self.text_predicates.get(pattern_index).map(|predicates| &**predicates).unwrap_or_default()
    }

    /// Properties set on the pattern with `#set!`.
    pub fn property_settings(&self, pattern_index: usize) -> &[QueryProperty] {
        self.property_settings.get(pattern_index).map(|properties| &**properties).unwrap_or_default()
    }

    /// Properties asserted with `#is?` (`true`) or `#is-not?` (`false`).
    pub fn property_predicates(&self, pattern_index: usize) -> &[(QueryProperty, bool)] {
        self.property_predicates.get(pattern_index).map(|properties| &**properties).unwrap_or_default()
    }

    pub fn general_predicates(&self, pattern_index: usize) -> &[QueryPredicate] {
        self.general_predicates.get(pattern_index).map(|predicates| &**predicates).unwrap_or_default()
    }

    /// Stops recording the named capture. Matches are still produced.
    pub fn disable_capture(&mut self, name: &str) {
        let Some(id) = self.capture_index_for_name(name) else {
            return;
        };
        for step in &mut self.steps {
            step.capture_ids.retain(|capture| *capture != id);
        }
        self.mark_captures();
        tracing::debug!(target: "loam", capture = name, "disabled capture");
    }

    /// Stops the pattern from starting new matches.
    pub fn disable_pattern(&mut self, pattern_index: usize) {
        self.wildcard_starts.retain(|entry| entry.pattern_index != pattern_index);
        for entries in self.symbol_starts.values_mut() {
            entries.retain(|entry| entry.pattern_index != pattern_index);
        }
        tracing::debug!(target: "loam", pattern = pattern_index, "disabled pattern");
    }

    /// Whether the pattern has a single root node. Only rooted patterns may
    /// start on a node that intersects the cursor's range but whose parent
    /// does not.
    pub fn is_pattern_rooted(&self, pattern_index: usize) -> bool {
        self.patterns.get(pattern_index).is_some_and(|pattern| pattern.is_rooted)
    }

    /// Whether the pattern can match a run of siblings inside a repetition,
    /// so that its matches are not contained in a single node.
    pub fn is_pattern_non_local(&self, pattern_index: usize) -> bool {
        self.patterns.get(pattern_index).is_some_and(|pattern| pattern.is_non_local)
    }

    /// Whether a match that reaches the step written at `byte_offset` is
    /// certain to complete.
    pub fn is_pattern_guaranteed_at_step(&self, byte_offset: usize) -> bool {
        let index = self.step_offsets.partition_point(|&(offset, _)| offset <= byte_offset);
        index.checked_sub(1).is_some_and(|index| self.step_offsets[index].1)
    }
}

/// A single top-level node, optionally quantified with `?`, or an
/// alternation of such nodes.
fn is_rooted(item: &Item) -> bool {
    if item.quantifiers.iter().any(|quantifier| *quantifier != Quantifier::ZeroOrOne) {
        return false;
    }
    match &item.kind {
        ItemKind::Node(_) => true,
        ItemKind::Group(children) => {
            let mut items = child_items(children);
            matches!((items.next(), items.next()), (Some(only), None) if is_rooted(only))
        }
        ItemKind::Alternation(branches) => branches.iter().all(is_rooted),
    }
}

fn child_items(children: &[Child]) -> impl Iterator<Item = &Item> {
    children.iter().filter_map(|child| match child {
        Child::Item(item) => Some(item),
        Child::Anchor => None,
    })
}

fn has_anchor(children: &[Child]) -> bool {
    children.iter().any(|child| matches!(child, Child::Anchor))
}

/// Steps that begin and end a lowered item.
#[derive(Debug, Default)]
struct Roots {
    first: SmallVec<[usize; 2]>,
    last: SmallVec<[usize; 2]>,
}

/// Kind of a node item after name resolution.
#[derive(Debug, Clone, Copy)]
struct Resolved {
    symbol: Symbol,
    supertype: Symbol,
    flags: StepFlags,
}

impl Resolved {
    /// The symbol when the item names one particular kind.
    fn concrete(self) -> Option<Symbol> {
        (self.symbol != WILDCARD_SYMBOL
            && self.symbol != ERROR
            && !self.flags.contains(StepFlags::MISSING))
        .then_some(self.symbol)
    }
}

struct Compiler<'a> {
    source: &'a str,
    language: &'a Language,
    steps: Vec<Step>,
    capture_names: Vec<Box<str>>,
}

impl Compiler<'_> {
    fn raw(&self, name: &Name) -> &str {
        &self.source[name.start..name.end]
    }

    fn field_id(&self, name: &Name) -> Result<FieldId, QueryError> {
        self.language.field_id_for_name(&name.text).ok_or_else(|| {
            QueryError::name(self.source, name.start, QueryErrorKind::Field, self.raw(name))
        })
    }

    fn symbol(&self, name: &Name, named: bool) -> Result<Symbol, QueryError> {
        match self.language.id_for_node_kind(&name.text, named) {
            0 => Err(QueryError::name(self.source, name.start, QueryErrorKind::NodeType, self.raw(name))),
            symbol => Ok(symbol),
        }
    }

    fn capture_id(&mut self, name: &str) -> u32 {
        let index = match self.capture_names.iter().position(|known| &**known == name) {
            Some(index) => index,
            None => {
                self.capture_names.push(name.into());
                self.capture_names.len() - 1
            }
        };
        index as u32
    }

    fn resolve(&self, node: &NodeItem) -> Result<Resolved, QueryError> {
        let mut resolved = Resolved { symbol: WILDCARD_SYMBOL, supertype: 0, flags: StepFlags::empty() };
        match &node.kind {
            NodeKind::Wildcard { named } => resolved.flags.set(StepFlags::NAMED, *named),
            NodeKind::Error => {
                resolved.symbol = ERROR;
                resolved.flags = StepFlags::NAMED;
            }
            NodeKind::Missing { name, named } => {
                resolved.flags = StepFlags::MISSING;
                if let Some(name) = name {
                    resolved.symbol = self.symbol(name, *named)?;
                }
            }
            NodeKind::Anonymous(name) => resolved.symbol = self.symbol(name, false)?,
            NodeKind::Named { name, supertype: None } => {
                let symbol = self.symbol(name, true)?;
                resolved.flags = StepFlags::NAMED;
                if self.language.node_kind_is_supertype(symbol) {
                    resolved.supertype = symbol;
                } else {
                    resolved.symbol = symbol;
                }
            }
            NodeKind::Named { name, supertype: Some(supertype) } => {
                let supertype_symbol = self.symbol(supertype, true)?;
                let symbol = self.symbol(name, true)?;
                if !self.language.node_kind_is_supertype(supertype_symbol)
                    || !self.language.subtypes_for_supertype(supertype_symbol).contains(&symbol)
                {
                    return Err(QueryError::structure(self.source, node.open));
                }
                resolved = Resolved { symbol, supertype: supertype_symbol, flags: StepFlags::NAMED };
            }
        }
        Ok(resolved)
    }

    fn push_control(&mut self, depth: u16, flag: StepFlags) -> usize {
        let mut step = Step::new(depth);
        step.flags = flag;
        self.steps.push(step);
        self.steps.len() - 1
    }

    fn lower_item(&mut self, item: &Item, depth: u16) -> Result<Roots, QueryError> {
        let field = item.field.as_ref().map(|name| self.field_id(name)).transpose()?;
        let roots = self.lower_quantified(item, item.quantifiers.len(), depth)?;
        if let Some(field) = field {
            for &index in &roots.first {
                self.steps[index].field = field;
            }
        }
        for capture in &item.captures {
            let id = self.capture_id(&capture.text);
            for &index in &roots.first {
                let ids = &mut self.steps[index].capture_ids;
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        Ok(roots)
    }

    /// Lowers `item` with only its first `count` quantifiers applied.
    fn lower_quantified(&mut self, item: &Item, count: usize, depth: u16) -> Result<Roots, QueryError> {
        let Some(&quantifier) = count.checked_sub(1).and_then(|index| item.quantifiers.get(index)) else {
            return self.lower_kind(item, depth);
        };
        match quantifier {
            Quantifier::ZeroOrOne => {
                let skip = self.push_control(depth, StepFlags::PASS_THROUGH);
                let roots = self.lower_quantified(item, count - 1, depth)?;
                self.steps[skip].alternative = Some(self.steps.len());
                Ok(roots)
            }
            Quantifier::OneOrMore => {
                let start = self.steps.len();
                let roots = self.lower_quantified(item, count - 1, depth)?;
                let repeat = self.push_control(depth, StepFlags::PASS_THROUGH);
                self.steps[repeat].alternative = Some(start);
                Ok(roots)
            }
            Quantifier::ZeroOrMore => {
                let skip = self.push_control(depth, StepFlags::PASS_THROUGH);
                let start = self.steps.len();
                let roots = self.lower_quantified(item, count - 1, depth)?;
                let repeat = self.push_control(depth, StepFlags::PASS_THROUGH);
                self.steps[repeat].alternative = Some(start);
                self.steps[skip].alternative = Some(self.steps.len());
                Ok(roots)
            }
        }
    }

    fn lower_kind(&mut self, item: &Item, depth: u16) -> Result<Roots, QueryError> {
        match &item.kind {
            ItemKind::Node(node) => {
                let resolved = self.resolve(node)?;
                let mut step = Step::new(depth);
                step.symbol = resolved.symbol;
                step.supertype = resolved.supertype;
                step.flags = resolved.flags;
                for name in &node.negated_fields {
                    let field = self.field_id(name)?;
                    if !step.negated_fields.contains(&field) {
                        step.negated_fields.push(field);
                    }
                }
                step.negated_fields.sort_unstable();
                self.steps.push(step);
                let index = self.steps.len() - 1;
                self.lower_children(&node.children, depth + 1)?;
                Ok(Roots { first: smallvec![index], last: smallvec![index] })
            }
            ItemKind::Group(children) => self.lower_children(children, depth),
            ItemKind::Alternation(branches) => {
                let mut roots = Roots::default();
                let mut dead_ends = Vec::new();
                for (index, branch) in branches.iter().enumerate() {
                    let next_branch = (index + 1 < branches.len())
                        .then(|| self.push_control(depth, StepFlags::PASS_THROUGH));
                    let branch_roots = self.lower_item(branch, depth)?;
                    roots.first.extend(branch_roots.first);
                    roots.last.extend(branch_roots.last);
                    if let Some(next_branch) = next_branch {
                        dead_ends.push(self.push_control(depth, StepFlags::DEAD_END));
                        self.steps[next_branch].alternative = Some(self.steps.len());
                    }
                }
                let end = self.steps.len();
                for index in dead_ends {
                    self.steps[index].alternative = Some(end);
                }
                Ok(roots)
            }
        }
    }

    fn lower_children(&mut self, children: &[Child], depth: u16) -> Result<Roots, QueryError> {
        let mut first = None;
        let mut last = Roots::default();
        let mut anchored = false;
        for child in children {
            match child {
                Child::Anchor => anchored = true,
                Child::Item(item) => {
                    let roots = self.lower_item(item, depth)?;
                    if anchored {
                        for &index in &roots.first {
                            self.steps[index].flags |= StepFlags::IMMEDIATE;
                        }
                    }
                    anchored = false;
                    first.get_or_insert_with(|| roots.first.clone());
                    last = roots;
                }
            }
        }
        if anchored {
            for &index in &last.last {
                self.steps[index].flags |= StepFlags::LAST_CHILD;
            }
        }
        Ok(Roots { first: first.unwrap_or_default(), last: last.last })
    }

    /// Rejects parent-child combinations the language can never produce.
    fn check_item(
        &self,
        parent: Option<Symbol>,
        item: &Item,
        inherited_field: Option<(&Name, usize)>,
    ) -> Result<(), QueryError> {
        if !self.language.has_node_types() {
            return Ok(());
        }
        let field = item.field.as_ref().map(|name| (name, item.start)).or(inherited_field);
        match &item.kind {
            ItemKind::Node(node) => {
                let resolved = self.resolve(node)?;
                if let Some(parent) = parent {
                    self.check_child(parent, resolved, item.start, field)?;
                }
                for child in child_items(&node.children) {
                    self.check_item(resolved.concrete(), child, None)?;
                }
            }
            ItemKind::Group(children) => {
                for child in child_items(children) {
                    self.check_item(parent, child, field)?;
                }
            }
            ItemKind::Alternation(branches) => {
                for branch in branches {
                    self.check_item(parent, branch, field)?;
                }
            }
        }
        Ok(())
    }

    fn check_child(
        &self,
        parent: Symbol,
        child: Resolved,
        offset: usize,
        field: Option<(&Name, usize)>,
    ) -> Result<(), QueryError> {
        let Some(info) = self.language.node_type_info(parent) else {
            return Ok(());
        };
        let candidates = match field {
            Some((name, field_start)) => {
                let id = self.field_id(name)?;
                match info.fields.iter().find(|(field, _)| *field == id) {
                    Some((_, symbols)) => symbols.as_slice(),
                    None => return Err(QueryError::structure(self.source, field_start)),
                }
            }
            None => info.children.as_slice(),
        };

        let symbol = match child.concrete() {
            Some(symbol) => symbol,
            None if child.supertype != 0 && child.symbol == WILDCARD_SYMBOL => child.supertype,
            None => return Ok(()),
        };
        if self.language.extras().contains(&symbol) || self.fits(symbol, candidates) {
            return Ok(());
        }
        let offset = field.map_or(offset, |(_, field_start)| field_start);
        Err(QueryError::structure(self.source, offset))
    }

    fn fits(&self, symbol: Symbol, candidates: &[Symbol]) -> bool {
        candidates.contains(&symbol)
            || candidates.iter().any(|&candidate| {
                self.language.node_kind_is_supertype(candidate)
                    && self.language.subtypes_for_supertype(candidate).contains(&symbol)
            })
    }

    /// Whether the leading node of the pattern can be one of the children of
    /// a repetition, so that a match may span several siblings.
    fn is_non_local(&self, item: &Item, repeated: &FxHashSet<Symbol>) -> Result<bool, QueryError> {
        if !self.language.has_node_types() {
            return Ok(true);
        }
        let mut leading = Vec::new();
        self.leading_nodes(item, &mut leading);
        for node in leading {
            let resolved = self.resolve(node)?;
            let Some(symbol) = resolved.concrete() else {
                return Ok(!repeated.is_empty());
            };
            if repeated.contains(&symbol) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The node items a match of `item` can begin with. A wildcard root with
    /// children is represented by its first child.
    fn leading_nodes<'i>(&self, item: &'i Item, out: &mut Vec<&'i NodeItem>) {
        match &item.kind {
            ItemKind::Node(node) => {
                let mut children = child_items(&node.children);
                match (children.next(), children.next()) {
                    (Some(first), Some(_)) if matches!(node.kind, NodeKind::Wildcard { .. }) => {
                        self.leading_nodes(first, out);
                    }
                    _ => out.push(node),
                }
            }
            ItemKind::Group(children) => {
                if let Some(first) = child_items(children).next() {
                    self.leading_nodes(first, out);
                }
            }
            ItemKind::Alternation(branches) => {
                for branch in branches {
                    self.leading_nodes(branch, out);
                }
            }
        }
    }

    fn item_quantifiers(&self, item: &Item) -> FxHashMap<u32, CaptureQuantifier> {
        let mut quantifiers = match &item.kind {
            ItemKind::Node(NodeItem { children, .. }) | ItemKind::Group(children) => {
                let mut sum = FxHashMap::default();
                for child in child_items(children) {
                    for (id, quantifier) in self.item_quantifiers(child) {
                        let entry: &mut CaptureQuantifier = sum.entry(id).or_default();
                        *entry = entry.add(quantifier);
                    }
                }
                sum
            }
            ItemKind::Alternation(branches) => {
                let mut joined: Option<FxHashMap<u32, CaptureQuantifier>> = None;
                for branch in branches {
                    let branch = self.item_quantifiers(branch);
                    joined = Some(match joined {
                        None => branch,
                        Some(joined) => join(joined, branch),
                    });
                }
                joined.unwrap_or_default()
            }
        };
        for capture in &item.captures {
            let Some(id) = self.capture_names.iter().position(|known| **known == *capture.text) else {
                continue;
            };
            let entry = quantifiers.entry(id as u32).or_default();
            *entry = entry.add(CaptureQuantifier::One);
        }
        for quantifier in &item.quantifiers {
            let quantifier = match quantifier {
                Quantifier::ZeroOrOne => CaptureQuantifier::ZeroOrOne,
                Quantifier::ZeroOrMore => CaptureQuantifier::ZeroOrMore,
                Quantifier::OneOrMore => CaptureQuantifier::OneOrMore,
            };
            for value in quantifiers.values_mut() {
                *value = value.mul(quantifier);
            }
        }
        quantifiers
    }
}

fn join(
    left: FxHashMap<u32, CaptureQuantifier>,
    right: FxHashMap<u32, CaptureQuantifier>,
) -> FxHashMap<u32, CaptureQuantifier> {
    left.keys()
        .chain(right.keys())
        .map(|&id| {
            let left = left.get(&id).copied().unwrap_or_default();
            let right = right.get(&id).copied().unwrap_or_default();
            (id, left.join(right))
        })
        .collect()
}

/// Decides for each node step whether reaching it means the match will
/// complete: every remaining step must be a required child of a known
/// parent, and no text predicate may inspect it.
struct Guarantees<'a, 'c> {
    compiler: &'a Compiler<'c>,
    text_captures: FxHashSet<u32>,
    offsets: Vec<(usize, bool)>,
}

impl Guarantees<'_, '_> {
    fn has_text_capture(&self, item: &Item) -> bool {
        let captured = item.captures.iter().any(|capture| {
            self.compiler
                .capture_names
                .iter()
                .position(|known| **known == *capture.text)
                .is_some_and(|id| self.text_captures.contains(&(id as u32)))
        });
        captured
            || match &item.kind {
                ItemKind::Node(NodeItem { children, .. }) | ItemKind::Group(children) => {
                    child_items(children).any(|child| self.has_text_capture(child))
                }
                ItemKind::Alternation(branches) => branches.iter().any(|branch| self.has_text_capture(branch)),
            }
    }

    fn is_skippable(&self, item: &Item) -> bool {
        item.quantifiers.iter().any(|quantifier| *quantifier != Quantifier::OneOrMore)
            && !self.has_text_capture(item)
    }

    /// Whether `item` always matches once its parent has matched.
    fn is_certain(&self, item: &Item, parent: Option<Symbol>, anchored: bool) -> Result<bool, QueryError> {
        let ItemKind::Node(node) = &item.kind else {
            return Ok(false);
        };
        let Some(parent) = parent else {
            return Ok(false);
        };
        if anchored
            || !item.quantifiers.is_empty()
            || !node.negated_fields.is_empty()
            || matches!(node.kind, NodeKind::Missing { .. } | NodeKind::Error)
            || item.captures.iter().any(|capture| {
                self.compiler
                    .capture_names
                    .iter()
                    .position(|known| **known == *capture.text)
                    .is_some_and(|id| self.text_captures.contains(&(id as u32)))
            })
        {
            return Ok(false);
        }
        let Some(info) = self.compiler.language.node_type_info(parent) else {
            return Ok(false);
        };
        let resolved = self.compiler.resolve(node)?;
        let Some(field) = &item.field else {
            return Ok(resolved.concrete().is_some_and(|symbol| {
                resolved.supertype == 0 && info.required_children.contains(&symbol)
            }));
        };
        let field = self.compiler.field_id(field)?;
        if !info.required_fields.contains(&field) {
            return Ok(false);
        }
        let Some((_, types)) = info.fields.iter().find(|(id, _)| *id == field) else {
            return Ok(false);
        };
        let language = self.compiler.language;
        Ok(match (resolved.symbol, resolved.supertype) {
            (WILDCARD_SYMBOL, 0) => {
                !resolved.flags.contains(StepFlags::NAMED)
                    || types.iter().all(|&symbol| language.node_kind_is_named(symbol))
            }
            (WILDCARD_SYMBOL, supertype) => types.iter().all(|&symbol| {
                symbol == supertype || language.subtypes_for_supertype(supertype).contains(&symbol)
            }),
            (symbol, 0) => types.as_slice() == [symbol],
            _ => false,
        })
    }

    /// Whether `item` and everything inside it always matches.
    fn is_fully_certain(&self, item: &Item, parent: Option<Symbol>, anchored: bool) -> Result<bool, QueryError> {
        match &item.kind {
            ItemKind::Node(node) => {
                if !self.is_certain(item, parent, anchored)? {
                    return Ok(false);
                }
                let symbol = self.compiler.resolve(node)?.concrete();
                self.are_children_certain(&node.children, symbol)
            }
            ItemKind::Group(children) if item.quantifiers.is_empty() && !anchored => {
                self.are_children_certain(children, parent)
            }
            _ => Ok(false),
        }
    }

    fn are_children_certain(&self, children: &[Child], parent: Option<Symbol>) -> Result<bool, QueryError> {
        let anchored = has_anchor(children);
        for child in child_items(children) {
            if !self.is_skippable(child) && !self.is_fully_certain(child, parent, anchored)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Records a verdict for every node step among `items`.
    ///
    /// `rest_certain` tells whether everything that follows these siblings
    /// in enclosing nodes always matches. `fallible` marks siblings that are
    /// themselves optional or alternatives.
    fn walk(
        &mut self,
        items: &[&Item],
        anchored: bool,
        parent: Option<Symbol>,
        rest_certain: bool,
        fallible: bool,
    ) -> Result<(), QueryError> {
        for (index, item) in items.iter().enumerate() {
            let mut later_certain = true;
            for later in &items[index + 1..] {
                if !self.is_skippable(later) && !self.is_fully_certain(later, parent, anchored)? {
                    later_certain = false;
                    break;
                }
            }
            let rest = rest_certain && later_certain;
            match &item.kind {
                ItemKind::Node(node) => {
                    let certain = !fallible && self.is_certain(item, parent, anchored)?;
                    let symbol = self.compiler.resolve(node)?.concrete();
                    let children_certain = self.are_children_certain(&node.children, symbol)?;
                    let guaranteed = parent.is_some() && certain && children_certain && rest;
                    self.offsets.push((item.start, guaranteed));

                    let children: Vec<&Item> = child_items(&node.children).collect();
                    let inner_rest = rest && (parent.is_none() || certain);
                    self.walk(&children, has_anchor(&node.children), symbol, inner_rest, false)?;
                }
                ItemKind::Group(children) => {
                    let group: Vec<&Item> = child_items(children).collect();
                    let fallible = fallible || !item.quantifiers.is_empty();
                    self.walk(&group, has_anchor(children), parent, rest, fallible)?;
                }
                ItemKind::Alternation(branches) => {
                    for branch in branches {
                        if parent.is_none() {
                            self.walk(&[branch], false, None, rest, fallible)?;
                        } else {
                            self.walk(&[branch], false, parent, false, true)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
