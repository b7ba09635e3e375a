use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::Utf8Error;

use loam_language::{ERROR, FieldId, Language, StateId, Symbol};
use loam_span::{InputEdit, Length, Point, Range, TextSize};

use crate::{STATE_NONE, Subtree, Tree, TreeCursor};

/// A view of one node at its position in a tree.
///
/// Nodes are cheap handles: they borrow the tree and carry only the node's
/// absolute start position and the alias it is displayed under.
#[derive(Clone, Copy)]
pub struct Node<'tree> {
    tree: &'tree Tree,
    subtree: &'tree Subtree,
    /// Start of the node's content, after its padding.
    position: Length,
    alias: Symbol,
}

/// Iterates the direct children of a node, hidden ones included.
struct Children<'tree> {
    tree: &'tree Tree,
    parent: &'tree Subtree,
    position: Length,
    child_index: usize,
    structural_child_index: usize,
    alias_sequence: &'tree [Symbol],
}

impl<'tree> Iterator for Children<'tree> {
    type Item = Node<'tree>;

    fn next(&mut self) -> Option<Node<'tree>> {
        let child = self.parent.children().get(self.child_index)?;
        let mut alias = 0;
        if !child.extra() {
            alias = self.alias_sequence.get(self.structural_child_index).copied().unwrap_or(0);
            self.structural_child_index += 1;
        }
        if self.child_index > 0 {
            self.position += child.padding();
        }
        let node = Node::new(self.tree, child, self.position, alias);
        self.position += child.size();
        self.child_index += 1;
        Some(node)
    }
}

impl<'tree> Node<'tree> {
    pub(crate) fn new(
        tree: &'tree Tree,
        subtree: &'tree Subtree,
        position: Length,
        alias: Symbol,
    ) -> Self {
        Self { tree, subtree, position, alias }
    }

    fn iterate_children(&self) -> Children<'tree> {
        Children {
            tree: self.tree,
            parent: self.subtree,
            position: self.position,
            child_index: 0,
            structural_child_index: 0,
            alias_sequence: self.language().alias_sequence(self.subtree.production_id()),
        }
    }

    /// Whether the node shows up among its parent's children.
    fn is_relevant(&self, include_anonymous: bool) -> bool {
        if include_anonymous {
            self.subtree.visible() || self.alias != 0
        } else if self.alias != 0 {
            self.language().node_kind_is_named(self.alias)
        } else {
            self.subtree.visible() && self.subtree.named()
        }
    }

    fn relevant_child_count(&self, include_anonymous: bool) -> usize {
        if include_anonymous {
            self.subtree.visible_child_count() as usize
        } else {
            self.subtree.named_child_count() as usize
        }
    }

    #[doc(hidden)]
    pub fn subtree(&self) -> &'tree Subtree {
        self.subtree
    }

    #[doc(hidden)]
    pub fn tree(&self) -> &'tree Tree {
        self.tree
    }

    pub(crate) fn start(&self) -> Length {
        self.position
    }

    #[doc(hidden)]
    pub fn alias(&self) -> Symbol {
        self.alias
    }

    pub fn id(&self) -> usize {
        self.subtree.id()
    }

    /// Node kind id, after aliasing.
    pub fn kind_id(&self) -> Symbol {
        let symbol = if self.alias != 0 { self.alias } else { self.subtree.symbol() };
        self.language().public_symbol(symbol)
    }

    /// Node kind id as produced by the grammar, ignoring aliases.
    pub fn grammar_id(&self) -> Symbol {
        self.subtree.symbol()
    }

    pub fn kind(&self) -> &'tree str {
        let symbol = if self.alias != 0 { self.alias } else { self.subtree.symbol() };
        self.language().symbol_name(symbol)
    }

    pub fn grammar_name(&self) -> &'tree str {
        self.language().symbol_name(self.subtree.symbol())
    }

    pub fn language(&self) -> &'tree Language {
        self.tree.language()
    }

    pub fn is_named(&self) -> bool {
        if self.alias != 0 {
            self.language().node_kind_is_named(self.alias)
        } else {
            self.subtree.named()
        }
    }

    pub fn is_extra(&self) -> bool {
        self.subtree.extra()
    }

    pub fn is_error(&self) -> bool {
        self.kind_id() == ERROR
    }

    pub fn is_missing(&self) -> bool {
        self.subtree.is_missing()
    }

    pub fn has_changes(&self) -> bool {
        self.subtree.has_changes()
    }

    pub fn has_error(&self) -> bool {
        self.subtree.error_cost() > 0
    }

    pub fn parse_state(&self) -> StateId {
        let state = self.subtree.parse_state();
        if state == STATE_NONE { state } else { self.language().primary_state(state) }
    }

    /// The state the parser moved to after this node.
    pub fn next_parse_state(&self) -> StateId {
        let state = self.parse_state();
        if state == STATE_NONE {
            return STATE_NONE;
        }
        self.language().next_state(state, self.grammar_id())
    }

    pub fn start_byte(&self) -> usize {
        u32::from(self.position.bytes) as usize
    }

    pub fn end_byte(&self) -> usize {
        u32::from(self.position.bytes + self.subtree.size().bytes) as usize
    }

    pub fn byte_range(&self) -> std::ops::Range<usize> {
        self.start_byte()..self.end_byte()
    }

    pub fn start_position(&self) -> Point {
        self.position.extent
    }

    pub fn end_position(&self) -> Point {
        self.position.extent + self.subtree.size().extent
    }

    pub fn range(&self) -> Range {
        let end = self.position + self.subtree.size();
        Range::new(self.position.bytes, end.bytes, self.position.extent, end.extent)
    }

    pub fn child_count(&self) -> usize {
        self.relevant_child_count(true)
    }

    pub fn named_child_count(&self) -> usize {
        self.relevant_child_count(false)
    }

    pub fn descendant_count(&self) -> usize {
        self.subtree.visible_descendant_count() as usize + 1
    }

    fn nth_child(&self, mut index: usize, include_anonymous: bool) -> Option<Self> {
        let mut node = *self;
        'descend: loop {
            let mut seen = 0;
            for child in node.iterate_children() {
                if child.is_relevant(include_anonymous) {
                    if seen == index {
                        return Some(child);
                    }
                    seen += 1;
                } else {
                    let grandchild_index = index - seen;
                    let grandchild_count = child.relevant_child_count(include_anonymous);
                    if grandchild_index < grandchild_count {
                        node = child;
                        index = grandchild_index;
                        continue 'descend;
                    }
                    seen += grandchild_count;
                }
            }
            return None;
        }
    }

    pub fn child(&self, index: usize) -> Option<Self> {
        self.nth_child(index, true)
    }

    pub fn named_child(&self, index: usize) -> Option<Self> {
        self.nth_child(index, false)
    }

    pub fn child_by_field_name(&self, field_name: &str) -> Option<Self> {
        let field_id = self.language().field_id_for_name(field_name)?;
        self.child_by_field_id(field_id)
    }

    /// The first child with the given field, looking through hidden nodes
    /// that pass the field on to their visible descendants.
    pub fn child_by_field_id(&self, field_id: FieldId) -> Option<Self> {
        let mut node = *self;
        'restart: loop {
            if field_id == 0 || node.subtree.child_count() == 0 {
                return None;
            }
            let field_map = node.language().field_map(node.subtree.production_id());
            let first = field_map.partition_point(|entry| entry.field_id < field_id);
            let last = field_map.partition_point(|entry| entry.field_id <= field_id);
            let entries = &field_map[first..last];
            let mut entry_index = 0;
            let mut children = node.iterate_children();
            while let Some(child) = children.next() {
                if child.is_extra() {
                    continue;
                }
                let Some(entry) = entries.get(entry_index) else {
                    return None;
                };
                let structural_index = children.structural_child_index - 1;
                if structural_index < entry.child_index as usize {
                    continue;
                }

                if entry.inherited {
                    if entry_index + 1 == entries.len() {
                        node = child;
                        continue 'restart;
                    }
                    if let Some(result) = child.child_by_field_id(field_id) {
                        return Some(result);
                    }
                    entry_index += 1;
                } else if child.is_relevant(true) {
                    return Some(child);
                } else if child.subtree.child_count() > 0 {
                    return child.child(0);
                } else {
                    entry_index += 1;
                }
            }
            return None;
        }
    }

    fn field_name_for_structural_child(&self, structural_index: usize) -> Option<&'tree str> {
        let language = self.language();
        language
            .field_map(self.subtree.production_id())
            .iter()
            .find(|entry| !entry.inherited && entry.child_index as usize == structural_index)
            .and_then(|entry| language.field_name_for_id(entry.field_id))
    }

    fn field_name_for_nth_child(
        &self,
        mut index: usize,
        include_anonymous: bool,
    ) -> Option<&'tree str> {
        let mut node = *self;
        let mut inherited_field_name = None;
        'descend: loop {
            let mut seen = 0;
            let mut children = node.iterate_children();
            while let Some(child) = children.next() {
                let structural_index = children.structural_child_index.saturating_sub(1);
                if child.is_relevant(include_anonymous) {
                    if seen == index {
                        if child.is_extra() {
                            return None;
                        }
                        return node
                            .field_name_for_structural_child(structural_index)
                            .or(inherited_field_name);
                    }
                    seen += 1;
                } else {
                    let grandchild_index = index - seen;
                    let grandchild_count = child.relevant_child_count(include_anonymous);
                    if grandchild_index < grandchild_count {
                        if let Some(name) = node.field_name_for_structural_child(structural_index)
                        {
                            inherited_field_name = Some(name);
                        }
                        node = child;
                        index = grandchild_index;
                        continue 'descend;
                    }
                    seen += grandchild_count;
                }
            }
            return None;
        }
    }

    pub fn field_name_for_child(&self, child_index: u32) -> Option<&'tree str> {
        self.field_name_for_nth_child(child_index as usize, true)
    }

    pub fn field_name_for_named_child(&self, named_child_index: u32) -> Option<&'tree str> {
        self.field_name_for_nth_child(named_child_index as usize, false)
    }

    /// Iterates the visible children, reusing `cursor`'s allocation.
    pub fn children<'cursor>(
        &self,
        cursor: &'cursor mut TreeCursor<'tree>,
    ) -> impl ExactSizeIterator<Item = Node<'tree>> + use<'tree, 'cursor> {
        cursor.reset(*self);
        cursor.goto_first_child();
        (0..self.child_count()).map(move |_| {
            let result = cursor.node();
            cursor.goto_next_sibling();
            result
        })
    }

    pub fn named_children<'cursor>(
        &self,
        cursor: &'cursor mut TreeCursor<'tree>,
    ) -> impl ExactSizeIterator<Item = Node<'tree>> + use<'tree, 'cursor> {
        cursor.reset(*self);
        cursor.goto_first_child();
        (0..self.named_child_count()).map(move |_| {
            while !cursor.node().is_named() {
                if !cursor.goto_next_sibling() {
                    break;
                }
            }
            let result = cursor.node();
            cursor.goto_next_sibling();
            result
        })
    }

    pub fn children_by_field_name<'cursor>(
        &self,
        field_name: &str,
        cursor: &'cursor mut TreeCursor<'tree>,
    ) -> impl Iterator<Item = Node<'tree>> + use<'tree, 'cursor> {
        let field_id = self.language().field_id_for_name(field_name);
        let mut done = field_id.is_none();
        if !done {
            cursor.reset(*self);
            cursor.goto_first_child();
        }
        std::iter::from_fn(move || {
            if done {
                return None;
            }
            while cursor.field_id() != field_id {
                if !cursor.goto_next_sibling() {
                    return None;
                }
            }
            let result = cursor.node();
            if !cursor.goto_next_sibling() {
                done = true;
            }
            Some(result)
        })
    }

    pub fn children_by_field_id<'cursor>(
        &self,
        field_id: FieldId,
        cursor: &'cursor mut TreeCursor<'tree>,
    ) -> impl Iterator<Item = Node<'tree>> + use<'tree, 'cursor> {
        cursor.reset(*self);
        cursor.goto_first_child();
        let mut done = false;
        std::iter::from_fn(move || {
            if done {
                return None;
            }
            while cursor.field_id() != Some(field_id) {
                if !cursor.goto_next_sibling() {
                    return None;
                }
            }
            let result = cursor.node();
            if !cursor.goto_next_sibling() {
                done = true;
            }
            Some(result)
        })
    }

    /// The visible node containing this one.
    ///
    /// This walks down from the root, so it costs time proportional to the
    /// depth of the node.
    pub fn parent(&self) -> Option<Self> {
        let mut node = self.tree.root_node();
        if node.id() == self.id() {
            return None;
        }
        loop {
            match node.child_with_descendant(*self) {
                Some(next) if next.id() != self.id() => node = next,
                _ => return Some(node),
            }
        }
    }

    /// The child of this node that contains `descendant`, or `descendant`
    /// itself if it is a direct child.
    pub fn child_with_descendant(&self, descendant: Self) -> Option<Self> {
        let start_byte = descendant.position.bytes;
        let end_byte = start_byte + descendant.subtree.size().bytes;
        let is_empty = start_byte == end_byte;

        let mut node = *self;
        loop {
            let mut children = node.iterate_children();
            loop {
                let child = children.next()?;
                if child.position.bytes > start_byte {
                    return None;
                }
                if child.id() == descendant.id() {
                    return Some(child);
                }
                node = child;
                // An empty descendant may sit at the boundary of a child.
                if is_empty && children.position.bytes >= end_byte && child.child_count() > 0 {
                    if let Some(inner) = child.child_with_descendant(descendant) {
                        return Some(if child.is_relevant(true) { child } else { inner });
                    }
                }
                let reaches_end = if is_empty {
                    children.position.bytes > end_byte
                } else {
                    children.position.bytes >= end_byte
                };
                if reaches_end && child.child_count() > 0 {
                    break;
                }
            }
            if node.is_relevant(true) {
                return Some(node);
            }
        }
    }

    fn next_sibling_impl(&self, include_anonymous: bool) -> Option<Self> {
        let target_end_byte = self.position.bytes + self.subtree.size().bytes;
        let start_byte = self.position.bytes;
        let mut node = self.parent();
        let mut later_node: Option<Self> = None;
        let mut later_node_is_relevant = false;

        while let Some(current) = node {
            let mut later_child = None;
            let mut later_child_is_relevant = false;
            let mut child_containing_target = None;

            let mut children = current.iterate_children();
            while let Some(child) = children.next() {
                if children.position.bytes <= target_end_byte {
                    continue;
                }
                let child_start_byte = child.position.bytes;
                let contains_target = if start_byte == target_end_byte {
                    child_start_byte < start_byte
                } else {
                    child_start_byte <= start_byte
                };

                if contains_target {
                    if !child.subtree.ptr_eq(self.subtree) {
                        child_containing_target = Some(child);
                    }
                } else if child.is_relevant(include_anonymous) {
                    later_child = Some(child);
                    later_child_is_relevant = true;
                    break;
                } else if child.relevant_child_count(include_anonymous) > 0 {
                    later_child = Some(child);
                    later_child_is_relevant = false;
                    break;
                }
            }

            if let Some(containing) = child_containing_target {
                if later_child.is_some() {
                    later_node = later_child;
                    later_node_is_relevant = later_child_is_relevant;
                }
                node = Some(containing);
            } else if later_child_is_relevant {
                return later_child;
            } else if later_child.is_some() {
                node = later_child;
            } else if later_node_is_relevant {
                return later_node;
            } else {
                node = later_node.take();
                later_node_is_relevant = false;
            }
        }
        None
    }

    fn prev_sibling_impl(&self, include_anonymous: bool) -> Option<Self> {
        let self_is_empty = self.subtree.total_bytes() == TextSize::new(0);
        let target_end_byte = self.position.bytes + self.subtree.size().bytes;
        let mut node = self.parent();
        let mut earlier_node: Option<Self> = None;
        let mut earlier_node_is_relevant = false;

        while let Some(current) = node {
            let mut earlier_child = None;
            let mut earlier_child_is_relevant = false;
            let mut child_containing_target = None;

            let mut children = current.iterate_children();
            while let Some(child) = children.next() {
                if child.id() == self.id() {
                    break;
                }
                let end = children.position.bytes;
                if end > target_end_byte
                    || (end == target_end_byte
                        && (!self_is_empty
                            || has_trailing_empty_descendant(child.subtree, self.subtree)))
                {
                    child_containing_target = Some(child);
                    break;
                }
                if child.is_relevant(include_anonymous) {
                    earlier_child = Some(child);
                    earlier_child_is_relevant = true;
                } else if child.relevant_child_count(include_anonymous) > 0 {
                    earlier_child = Some(child);
                    earlier_child_is_relevant = false;
                }
            }

            if let Some(containing) = child_containing_target {
                if earlier_child.is_some() {
                    earlier_node = earlier_child;
                    earlier_node_is_relevant = earlier_child_is_relevant;
                }
                node = Some(containing);
            } else if earlier_child_is_relevant {
                return earlier_child;
            } else if earlier_child.is_some() {
                node = earlier_child;
            } else if earlier_node_is_relevant {
                return earlier_node;
            } else {
                node = earlier_node.take();
                earlier_node_is_relevant = false;
            }
        }
        None
    }

    pub fn next_sibling(&self) -> Option<Self> {
        self.next_sibling_impl(true)
    }

    pub fn prev_sibling(&self) -> Option<Self> {
        self.prev_sibling_impl(true)
    }

    pub fn next_named_sibling(&self) -> Option<Self> {
        self.next_sibling_impl(false)
    }

    pub fn prev_named_sibling(&self) -> Option<Self> {
        self.prev_sibling_impl(false)
    }

    fn first_child_for_byte_impl(&self, byte: usize, include_anonymous: bool) -> Option<Self> {
        let mut node = *self;
        'descend: loop {
            for child in node.iterate_children() {
                if child.end_byte() > byte {
                    if child.is_relevant(include_anonymous) {
                        return Some(child);
                    }
                    if child.subtree.child_count() > 0 {
                        node = child;
                        continue 'descend;
                    }
                }
            }
            return None;
        }
    }

    pub fn first_child_for_byte(&self, byte: usize) -> Option<Self> {
        self.first_child_for_byte_impl(byte, true)
    }

    pub fn first_named_child_for_byte(&self, byte: usize) -> Option<Self> {
        self.first_child_for_byte_impl(byte, false)
    }

    fn descendant_for_byte_range_impl(
        &self,
        start: usize,
        end: usize,
        include_anonymous: bool,
    ) -> Option<Self> {
        if start > end {
            return None;
        }
        let mut node = *self;
        let mut last_visible_node = *self;
        'descend: loop {
            let mut children = node.iterate_children();
            while let Some(child) = children.next() {
                let node_end = u32::from(children.position.bytes) as usize;
                if node_end < end {
                    continue;
                }
                let is_empty = child.start_byte() == node_end;
                if if is_empty { node_end < start } else { node_end <= start } {
                    continue;
                }
                if start < child.start_byte() {
                    break;
                }
                node = child;
                if node.is_relevant(include_anonymous) {
                    last_visible_node = node;
                }
                continue 'descend;
            }
            return Some(last_visible_node);
        }
    }

    fn descendant_for_point_range_impl(
        &self,
        start: Point,
        end: Point,
        include_anonymous: bool,
    ) -> Option<Self> {
        if start > end {
            return None;
        }
        let mut node = *self;
        let mut last_visible_node = *self;
        'descend: loop {
            let mut children = node.iterate_children();
            while let Some(child) = children.next() {
                let node_end = children.position.extent;
                if node_end < end {
                    continue;
                }
                let is_empty = child.start_position() == node_end;
                if if is_empty { node_end < start } else { node_end <= start } {
                    continue;
                }
                if start < child.start_position() {
                    break;
                }
                node = child;
                if node.is_relevant(include_anonymous) {
                    last_visible_node = node;
                }
                continue 'descend;
            }
            return Some(last_visible_node);
        }
    }

    pub fn descendant_for_byte_range(&self, start: usize, end: usize) -> Option<Self> {
        self.descendant_for_byte_range_impl(start, end, true)
    }

    pub fn named_descendant_for_byte_range(&self, start: usize, end: usize) -> Option<Self> {
        self.descendant_for_byte_range_impl(start, end, false)
    }

    pub fn descendant_for_point_range(&self, start: Point, end: Point) -> Option<Self> {
        self.descendant_for_point_range_impl(start, end, true)
    }

    pub fn named_descendant_for_point_range(&self, start: Point, end: Point) -> Option<Self> {
        self.descendant_for_point_range_impl(start, end, false)
    }

    pub fn to_sexp(&self) -> String {
        crate::sexp::write(self.subtree, self.alias, self.language())
    }

    pub fn utf8_text<'a>(&self, source: &'a [u8]) -> Result<&'a str, Utf8Error> {
        std::str::from_utf8(&source[self.start_byte()..self.end_byte()])
    }

    /// The node's text in a UTF-16 document, where byte offsets are twice
    /// the code unit index.
    pub fn utf16_text<'a>(&self, source: &'a [u16]) -> &'a [u16] {
        &source[self.start_byte() / 2..self.end_byte() / 2]
    }

    pub fn walk(&self) -> TreeCursor<'tree> {
        TreeCursor::new(*self)
    }

    /// Moves a retained node so that it reflects an edit made to its tree.
    pub fn edit(&mut self, edit: &InputEdit) {
        let mut start_byte = self.position.bytes;
        let mut start_point = self.position.extent;
        edit.edit_point(&mut start_point, &mut start_byte);
        self.position = Length::new(start_byte, start_point);
    }
}

fn has_trailing_empty_descendant(tree: &Subtree, other: &Subtree) -> bool {
    for child in tree.children().iter().rev() {
        if child.total_bytes() > TextSize::new(0) {
            break;
        }
        if child.ptr_eq(other) || has_trailing_empty_descendant(child, other) {
            return true;
        }
    }
    false
}

impl PartialEq for Node<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree)
            && self.id() == other.id()
            && self.position.bytes == other.position.bytes
    }
}

impl Eq for Node<'_> {}

impl Hash for Node<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
        self.position.bytes.hash(state);
    }
}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{Node {} {} - {}}}", self.kind(), self.start_position(), self.end_position())
    }
}

impl fmt::Display for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sexp())
    }
}

#[cfg(test)]
mod tests;
