use std::cmp::Ordering;
use std::fmt;

use bitflags::bitflags;
use loam_language::{ERROR, ERROR_REPEAT, Language, StateId, Symbol};
use loam_span::{Length, TextSize};
use smallvec::SmallVec;
use triomphe::Arc;

/// Parse state recorded on nodes that must not be reused as a unit.
pub const STATE_NONE: StateId = u16::MAX;

pub const ERROR_COST_PER_RECOVERY: u32 = 500;
pub const ERROR_COST_PER_MISSING_TREE: u32 = 110;
pub const ERROR_COST_PER_SKIPPED_TREE: u32 = 100;
pub const ERROR_COST_PER_SKIPPED_LINE: u32 = 30;
pub const ERROR_COST_PER_SKIPPED_CHAR: u32 = 1;

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct SubtreeFlags: u16 {
        const VISIBLE = 1 << 0;
        const NAMED = 1 << 1;
        /// May appear anywhere, outside the grammar's structure.
        const EXTRA = 1 << 2;
        /// Built under ambiguity or next to an error; cannot be reused whole.
        const FRAGILE_LEFT = 1 << 3;
        const FRAGILE_RIGHT = 1 << 4;
        const HAS_CHANGES = 1 << 5;
        const HAS_EXTERNAL_TOKENS = 1 << 6;
        const HAS_EXTERNAL_SCANNER_STATE_CHANGE = 1 << 7;
        /// Lexing depended on the column, so edits earlier on the row
        /// invalidate it.
        const DEPENDS_ON_COLUMN = 1 << 8;
        const IS_MISSING = 1 << 9;
        const IS_KEYWORD = 1 << 10;
    }
}

/// Serialized external scanner state carried by external tokens.
pub type ExternalScannerState = SmallVec<[u8; 24]>;

/// An immutable, shareable syntax tree node.
///
/// Cloning is a reference count bump. Nodes are only mutated through
/// [`Subtree::make_mut`], which copies the node first if it is shared.
#[derive(Clone)]
pub struct Subtree(pub(crate) Arc<SubtreeData>);

#[derive(Clone)]
pub struct SubtreeData {
    pub(crate) symbol: Symbol,
    pub(crate) parse_state: StateId,
    pub(crate) padding: Length,
    pub(crate) size: Length,
    pub(crate) lookahead_bytes: u32,
    pub(crate) error_cost: u32,
    pub(crate) flags: SubtreeFlags,
    pub(crate) children: Vec<Subtree>,
    pub(crate) visible_child_count: u32,
    pub(crate) named_child_count: u32,
    pub(crate) visible_descendant_count: u32,
    pub(crate) dynamic_precedence: i32,
    pub(crate) repeat_depth: u32,
    pub(crate) production_id: u16,
    pub(crate) first_leaf_symbol: Symbol,
    pub(crate) first_leaf_parse_state: StateId,
    pub(crate) external_scanner_state: ExternalScannerState,
    pub(crate) lookahead_char: char,
}

impl SubtreeData {
    fn leaf(symbol: Symbol, padding: Length, size: Length, language: &Language) -> Self {
        let metadata = language.symbol_metadata(symbol);
        let mut flags = SubtreeFlags::empty();
        flags.set(SubtreeFlags::VISIBLE, metadata.visible);
        flags.set(SubtreeFlags::NAMED, metadata.named);
        flags.set(SubtreeFlags::EXTRA, symbol == loam_language::END);
        Self {
            symbol,
            parse_state: 0,
            padding,
            size,
            lookahead_bytes: 0,
            error_cost: 0,
            flags,
            children: Vec::new(),
            visible_child_count: 0,
            named_child_count: 0,
            visible_descendant_count: 0,
            dynamic_precedence: 0,
            repeat_depth: 0,
            production_id: 0,
            first_leaf_symbol: 0,
            first_leaf_parse_state: 0,
            external_scanner_state: ExternalScannerState::new(),
            lookahead_char: '\0',
        }
    }

    #[inline]
    fn has(&self, flag: SubtreeFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Changes the symbol, along with the visibility that comes with it.
    pub fn set_symbol(&mut self, symbol: Symbol, language: &Language) {
        let metadata = language.symbol_metadata(symbol);
        self.symbol = symbol;
        self.flags.set(SubtreeFlags::VISIBLE, metadata.visible);
        self.flags.set(SubtreeFlags::NAMED, metadata.named);
    }

    pub fn set_parse_state(&mut self, state: StateId) {
        self.parse_state = state;
    }

    pub fn set_extra(&mut self, extra: bool) {
        self.flags.set(SubtreeFlags::EXTRA, extra);
    }

    pub fn set_fragile(&mut self, left: bool, right: bool) {
        self.flags.set(SubtreeFlags::FRAGILE_LEFT, left);
        self.flags.set(SubtreeFlags::FRAGILE_RIGHT, right);
    }

    pub fn set_has_changes(&mut self, has_changes: bool) {
        self.flags.set(SubtreeFlags::HAS_CHANGES, has_changes);
    }

    pub fn set_depends_on_column(&mut self, depends_on_column: bool) {
        self.flags.set(SubtreeFlags::DEPENDS_ON_COLUMN, depends_on_column);
    }

    pub fn set_is_keyword(&mut self, is_keyword: bool) {
        self.flags.set(SubtreeFlags::IS_KEYWORD, is_keyword);
    }

    /// Marks a token produced by the external scanner and stores the state the
    /// scanner had after producing it.
    pub fn set_external_scanner_state(&mut self, state: &[u8], changed: bool) {
        self.flags.insert(SubtreeFlags::HAS_EXTERNAL_TOKENS);
        self.flags.set(SubtreeFlags::HAS_EXTERNAL_SCANNER_STATE_CHANGE, changed);
        self.external_scanner_state = ExternalScannerState::from_slice(state);
    }

    pub fn add_dynamic_precedence(&mut self, precedence: i32) {
        self.dynamic_precedence += precedence;
    }

    pub fn set_padding(&mut self, padding: Length) {
        self.padding = padding;
    }

    pub fn set_lookahead_bytes(&mut self, lookahead_bytes: u32) {
        self.lookahead_bytes = lookahead_bytes;
    }

    pub fn children_mut(&mut self) -> &mut Vec<Subtree> {
        &mut self.children
    }

    /// Recomputes everything that is derived from the children.
    pub fn summarize(&mut self, language: &Language) {
        self.named_child_count = 0;
        self.visible_child_count = 0;
        self.error_cost = 0;
        self.repeat_depth = 0;
        self.visible_descendant_count = 0;
        self.dynamic_precedence = 0;
        self.flags.remove(
            SubtreeFlags::HAS_EXTERNAL_TOKENS
                | SubtreeFlags::DEPENDS_ON_COLUMN
                | SubtreeFlags::HAS_EXTERNAL_SCANNER_STATE_CHANGE,
        );

        let is_error = self.symbol == ERROR || self.symbol == ERROR_REPEAT;
        let alias_sequence = language.alias_sequence(self.production_id);
        let mut structural_index = 0;
        let mut lookahead_end_byte = 0;

        for (index, child) in self.children.iter().enumerate() {
            if self.size.extent.row == 0 && child.depends_on_column() {
                self.flags.insert(SubtreeFlags::DEPENDS_ON_COLUMN);
            }
            if child.has_external_scanner_state_change() {
                self.flags.insert(SubtreeFlags::HAS_EXTERNAL_SCANNER_STATE_CHANGE);
            }

            if index == 0 {
                self.padding = child.padding();
                self.size = child.size();
            } else {
                self.size += child.total_size();
            }

            let child_lookahead_end_byte =
                u32::from(self.padding.bytes + self.size.bytes) + child.lookahead_bytes();
            lookahead_end_byte = lookahead_end_byte.max(child_lookahead_end_byte);

            if child.symbol() != ERROR_REPEAT {
                self.error_cost += child.error_cost();
            }

            let grandchild_count = child.child_count();
            if is_error
                && !child.extra()
                && !(child.is_error() && grandchild_count == 0)
            {
                if child.visible() {
                    self.error_cost += ERROR_COST_PER_SKIPPED_TREE;
                } else if grandchild_count > 0 {
                    self.error_cost += ERROR_COST_PER_SKIPPED_TREE * child.visible_child_count();
                }
            }

            self.dynamic_precedence += child.dynamic_precedence();
            self.visible_descendant_count += child.visible_descendant_count();

            let alias = alias_sequence.get(structural_index).copied().unwrap_or(0);
            if alias != 0 && !child.extra() {
                self.visible_descendant_count += 1;
                self.visible_child_count += 1;
                if language.symbol_metadata(alias).named {
                    self.named_child_count += 1;
                }
            } else if child.visible() {
                self.visible_descendant_count += 1;
                self.visible_child_count += 1;
                if child.named() {
                    self.named_child_count += 1;
                }
            } else if grandchild_count > 0 {
                self.visible_child_count += child.visible_child_count();
                self.named_child_count += child.named_child_count();
            }

            if child.has_external_tokens() {
                self.flags.insert(SubtreeFlags::HAS_EXTERNAL_TOKENS);
            }

            if child.is_error() {
                self.flags.insert(SubtreeFlags::FRAGILE_LEFT | SubtreeFlags::FRAGILE_RIGHT);
                self.parse_state = STATE_NONE;
            }

            if !child.extra() {
                structural_index += 1;
            }
        }

        self.lookahead_bytes =
            lookahead_end_byte.saturating_sub(u32::from(self.padding.bytes + self.size.bytes));

        if is_error {
            self.error_cost += ERROR_COST_PER_RECOVERY
                + ERROR_COST_PER_SKIPPED_CHAR * u32::from(self.size.bytes)
                + ERROR_COST_PER_SKIPPED_LINE * self.size.extent.row;
        }

        if let (Some(first), Some(last)) = (self.children.first(), self.children.last()) {
            self.first_leaf_symbol = first.leaf_symbol();
            self.first_leaf_parse_state = first.leaf_parse_state();
            if first.fragile_left() {
                self.flags.insert(SubtreeFlags::FRAGILE_LEFT);
            }
            if last.fragile_right() {
                self.flags.insert(SubtreeFlags::FRAGILE_RIGHT);
            }

            if self.children.len() >= 2
                && !self.has(SubtreeFlags::VISIBLE)
                && !self.has(SubtreeFlags::NAMED)
                && first.symbol() == self.symbol
            {
                self.repeat_depth = first.repeat_depth().max(last.repeat_depth()) + 1;
            }
        }
    }
}

impl Drop for SubtreeData {
    fn drop(&mut self) {
        // Release deep trees without recursion.
        let mut stack = std::mem::take(&mut self.children);
        while let Some(mut child) = stack.pop() {
            if let Some(data) = Arc::get_mut(&mut child.0) {
                stack.append(&mut data.children);
            }
        }
    }
}

impl Subtree {
    /// A token produced by the lexer.
    pub fn new_leaf(
        symbol: Symbol,
        padding: Length,
        size: Length,
        lookahead_bytes: u32,
        parse_state: StateId,
        language: &Language,
    ) -> Self {
        let mut data = SubtreeData::leaf(symbol, padding, size, language);
        data.lookahead_bytes = lookahead_bytes;
        data.parse_state = parse_state;
        Self(Arc::new(data))
    }

    /// A token covering characters that no lex state accepts.
    pub fn new_error(
        lookahead_char: char,
        padding: Length,
        size: Length,
        lookahead_bytes: u32,
        parse_state: StateId,
        language: &Language,
    ) -> Self {
        let mut data = SubtreeData::leaf(ERROR, padding, size, language);
        data.lookahead_bytes = lookahead_bytes;
        data.parse_state = parse_state;
        data.lookahead_char = lookahead_char;
        data.flags.insert(SubtreeFlags::FRAGILE_LEFT | SubtreeFlags::FRAGILE_RIGHT);
        Self(Arc::new(data))
    }

    /// A zero-width token inserted by error recovery.
    pub fn new_missing_leaf(
        symbol: Symbol,
        padding: Length,
        lookahead_bytes: u32,
        language: &Language,
    ) -> Self {
        let mut data = SubtreeData::leaf(symbol, padding, Length::ZERO, language);
        data.lookahead_bytes = lookahead_bytes;
        data.flags.insert(SubtreeFlags::IS_MISSING);
        Self(Arc::new(data))
    }

    /// A nonterminal over `children`.
    pub fn new_node(
        symbol: Symbol,
        children: Vec<Subtree>,
        production_id: u16,
        language: &Language,
    ) -> Self {
        let fragile = symbol == ERROR || symbol == ERROR_REPEAT;
        let mut data = SubtreeData::leaf(symbol, Length::ZERO, Length::ZERO, language);
        data.flags.remove(SubtreeFlags::EXTRA);
        data.set_fragile(fragile, fragile);
        data.children = children;
        data.production_id = production_id;
        data.summarize(language);
        Self(Arc::new(data))
    }

    /// An `ERROR` node wrapping `children`.
    pub fn new_error_node(children: Vec<Subtree>, extra: bool, language: &Language) -> Self {
        let mut result = Self::new_node(ERROR, children, 0, language);
        result.make_mut().set_extra(extra);
        result
    }

    /// Mutable access, copying the node first if it is shared.
    pub fn make_mut(&mut self) -> &mut SubtreeData {
        Arc::make_mut(&mut self.0)
    }

    /// Mutable access if this is the only reference to the node.
    pub fn get_mut(&mut self) -> Option<&mut SubtreeData> {
        Arc::get_mut(&mut self.0)
    }

    #[inline]
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    #[inline]
    pub fn symbol(&self) -> Symbol {
        self.0.symbol
    }

    #[inline]
    pub fn parse_state(&self) -> StateId {
        self.0.parse_state
    }

    #[inline]
    pub fn padding(&self) -> Length {
        self.0.padding
    }

    #[inline]
    pub fn size(&self) -> Length {
        self.0.size
    }

    #[inline]
    pub fn total_size(&self) -> Length {
        self.0.padding + self.0.size
    }

    #[inline]
    pub fn total_bytes(&self) -> TextSize {
        self.total_size().bytes
    }

    #[inline]
    pub fn lookahead_bytes(&self) -> u32 {
        self.0.lookahead_bytes
    }

    pub fn error_cost(&self) -> u32 {
        if self.is_missing() {
            ERROR_COST_PER_MISSING_TREE + ERROR_COST_PER_RECOVERY
        } else {
            self.0.error_cost
        }
    }

    #[inline]
    pub fn flags(&self) -> SubtreeFlags {
        self.0.flags
    }

    #[inline]
    pub fn visible(&self) -> bool {
        self.0.has(SubtreeFlags::VISIBLE)
    }

    #[inline]
    pub fn named(&self) -> bool {
        self.0.has(SubtreeFlags::NAMED)
    }

    #[inline]
    pub fn extra(&self) -> bool {
        self.0.has(SubtreeFlags::EXTRA)
    }

    #[inline]
    pub fn fragile_left(&self) -> bool {
        self.0.has(SubtreeFlags::FRAGILE_LEFT)
    }

    #[inline]
    pub fn fragile_right(&self) -> bool {
        self.0.has(SubtreeFlags::FRAGILE_RIGHT)
    }

    #[inline]
    pub fn is_fragile(&self) -> bool {
        self.fragile_left() || self.fragile_right()
    }

    #[inline]
    pub fn has_changes(&self) -> bool {
        self.0.has(SubtreeFlags::HAS_CHANGES)
    }

    #[inline]
    pub fn has_external_tokens(&self) -> bool {
        self.0.has(SubtreeFlags::HAS_EXTERNAL_TOKENS)
    }

    #[inline]
    pub fn has_external_scanner_state_change(&self) -> bool {
        self.0.has(SubtreeFlags::HAS_EXTERNAL_SCANNER_STATE_CHANGE)
    }

    #[inline]
    pub fn depends_on_column(&self) -> bool {
        self.0.has(SubtreeFlags::DEPENDS_ON_COLUMN)
    }

    #[inline]
    pub fn is_missing(&self) -> bool {
        self.0.has(SubtreeFlags::IS_MISSING)
    }

    #[inline]
    pub fn is_keyword(&self) -> bool {
        self.0.has(SubtreeFlags::IS_KEYWORD)
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.0.symbol == ERROR
    }

    #[inline]
    pub fn is_eof(&self) -> bool {
        self.0.symbol == loam_language::END
    }

    #[inline]
    pub fn children(&self) -> &[Subtree] {
        &self.0.children
    }

    #[inline]
    pub fn child_count(&self) -> usize {
        self.0.children.len()
    }

    pub fn visible_child_count(&self) -> u32 {
        if self.0.children.is_empty() { 0 } else { self.0.visible_child_count }
    }

    pub fn named_child_count(&self) -> u32 {
        if self.0.children.is_empty() { 0 } else { self.0.named_child_count }
    }

    pub fn visible_descendant_count(&self) -> u32 {
        self.0.visible_descendant_count
    }

    pub fn dynamic_precedence(&self) -> i32 {
        self.0.dynamic_precedence
    }

    pub fn repeat_depth(&self) -> u32 {
        self.0.repeat_depth
    }

    pub fn production_id(&self) -> u16 {
        self.0.production_id
    }

    /// Symbol of the first token under this node.
    pub fn leaf_symbol(&self) -> Symbol {
        if self.0.children.is_empty() { self.0.symbol } else { self.0.first_leaf_symbol }
    }

    /// Parse state in which the first token under this node was lexed.
    pub fn leaf_parse_state(&self) -> StateId {
        if self.0.children.is_empty() { self.0.parse_state } else { self.0.first_leaf_parse_state }
    }

    pub fn lookahead_char(&self) -> char {
        self.0.lookahead_char
    }

    /// The scanner state stored on an external token.
    pub fn external_scanner_state(&self) -> &[u8] {
        if self.has_external_tokens() && self.0.children.is_empty() {
            &self.0.external_scanner_state
        } else {
            &[]
        }
    }

    /// The rightmost external token under this node.
    pub fn last_external_token(&self) -> Option<&Subtree> {
        if !self.has_external_tokens() {
            return None;
        }
        let mut tree = self;
        while !tree.0.children.is_empty() {
            tree = tree.0.children.iter().rev().find(|child| child.has_external_tokens())?;
        }
        Some(tree)
    }

    /// Structural comparison used to choose between equivalent ambiguous
    /// parses.
    pub fn compare(&self, other: &Subtree) -> Ordering {
        let mut stack = vec![(self, other)];
        while let Some((left, right)) = stack.pop() {
            let ordering = left
                .symbol()
                .cmp(&right.symbol())
                .then(left.child_count().cmp(&right.child_count()));
            if ordering != Ordering::Equal {
                return ordering;
            }
            stack.extend(left.children().iter().zip(right.children()).rev());
        }
        Ordering::Equal
    }
}

/// Compares the scanner states that follow two (possibly absent) external
/// tokens.
pub fn external_scanner_state_eq(left: Option<&Subtree>, right: Option<&Subtree>) -> bool {
    let left = left.map_or(&[][..], Subtree::external_scanner_state);
    let right = right.map_or(&[][..], Subtree::external_scanner_state);
    left == right
}

impl fmt::Debug for Subtree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subtree")
            .field("symbol", &self.symbol())
            .field("padding", &u32::from(self.padding().bytes))
            .field("size", &u32::from(self.size().bytes))
            .field("children", &self.child_count())
            .finish()
    }
}
