use loam_language::{FieldId, Language, Symbol};
use loam_span::{Length, Point};
use smallvec::SmallVec;

use crate::{Node, Subtree, Tree};

#[derive(Debug, Clone, Copy)]
struct Entry<'tree> {
    subtree: &'tree Subtree,
    /// Start of the node's content, after its padding.
    position: Length,
    child_index: usize,
    structural_child_index: usize,
    descendant_index: usize,
}

/// Result of one low-level cursor move.
#[doc(hidden)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStep {
    None,
    /// Landed on a hidden node that has visible descendants.
    Hidden,
    Visible,
}

/// What the query engine needs to know about the cursor's current node.
#[doc(hidden)]
#[derive(Debug, Clone, Default)]
pub struct CursorStatus {
    pub field_id: FieldId,
    pub has_later_siblings: bool,
    pub has_later_named_siblings: bool,
    pub can_have_later_siblings_with_this_field: bool,
    pub supertypes: SmallVec<[Symbol; 4]>,
}

/// Iterates the children of the cursor's current node as stack entries.
struct ChildEntries<'tree> {
    parent: &'tree Subtree,
    alias_sequence: &'tree [Symbol],
    position: Length,
    child_index: usize,
    structural_child_index: usize,
    descendant_index: usize,
}

impl<'tree> ChildEntries<'tree> {
    fn next(&mut self) -> Option<(Entry<'tree>, bool)> {
        let child = self.parent.children().get(self.child_index)?;
        let entry = Entry {
            subtree: child,
            position: self.position,
            child_index: self.child_index,
            structural_child_index: self.structural_child_index,
            descendant_index: self.descendant_index,
        };
        let mut visible = child.visible();
        if !child.extra() {
            visible |= self.alias_sequence.get(self.structural_child_index).is_some_and(|&a| a != 0);
            self.structural_child_index += 1;
        }
        self.descendant_index += child.visible_descendant_count() as usize;
        if visible {
            self.descendant_index += 1;
        }
        self.position += child.size();
        self.child_index += 1;
        if let Some(next) = self.parent.children().get(self.child_index) {
            self.position += next.padding();
        }
        Some((entry, visible))
    }
}

/// A stateful walker over the visible nodes of a tree.
///
/// The cursor keeps the whole path from the node it was created on, so
/// moving to siblings and parents does not search from the root.
#[derive(Clone)]
pub struct TreeCursor<'tree> {
    tree: &'tree Tree,
    stack: Vec<Entry<'tree>>,
    root_alias: Symbol,
}

impl<'tree> TreeCursor<'tree> {
    pub fn new(node: Node<'tree>) -> Self {
        let mut cursor = Self { tree: node.tree(), stack: Vec::new(), root_alias: 0 };
        cursor.reset(node);
        cursor
    }

    fn language(&self) -> &'tree Language {
        self.tree.language()
    }

    fn last(&self) -> &Entry<'tree> {
        // The stack always holds the root entry.
        &self.stack[self.stack.len() - 1]
    }

    /// Re-roots the cursor at `node`.
    pub fn reset(&mut self, node: Node<'tree>) {
        self.tree = node.tree();
        self.root_alias = node.alias();
        self.stack.clear();
        self.stack.push(Entry {
            subtree: node.subtree(),
            position: node.start(),
            child_index: 0,
            structural_child_index: 0,
            descendant_index: 0,
        });
    }

    /// Copies the position of another cursor into this one.
    pub fn reset_to(&mut self, cursor: &Self) {
        self.tree = cursor.tree;
        self.root_alias = cursor.root_alias;
        self.stack.clone_from(&cursor.stack);
    }

    fn is_entry_visible(&self, index: usize) -> bool {
        let entry = &self.stack[index];
        if index == 0 || entry.subtree.visible() {
            true
        } else if !entry.subtree.extra() {
            let parent = &self.stack[index - 1];
            self.language().alias_at(parent.subtree.production_id(), entry.structural_child_index)
                != 0
        } else {
            false
        }
    }

    fn iterate_children(&self) -> ChildEntries<'tree> {
        let last = *self.last();
        let mut descendant_index = last.descendant_index;
        if self.is_entry_visible(self.stack.len() - 1) {
            descendant_index += 1;
        }
        ChildEntries {
            parent: last.subtree,
            alias_sequence: self.language().alias_sequence(last.subtree.production_id()),
            position: last.position,
            child_index: 0,
            structural_child_index: 0,
            descendant_index,
        }
    }

    /// The node the cursor is on.
    pub fn node(&self) -> Node<'tree> {
        let last = self.last();
        let is_extra = last.subtree.extra();
        let mut alias = if is_extra { 0 } else { self.root_alias };
        if self.stack.len() > 1 && !is_extra {
            let parent = &self.stack[self.stack.len() - 2];
            alias =
                self.language().alias_at(parent.subtree.production_id(), last.structural_child_index);
        }
        Node::new(self.tree, last.subtree, last.position, alias)
    }

    /// Field of the current node within its visible parent, looking through
    /// hidden wrappers.
    pub fn field_id(&self) -> Option<FieldId> {
        let language = self.language();
        for index in (1..self.stack.len()).rev() {
            let entry = &self.stack[index];
            let parent = &self.stack[index - 1];
            if index != self.stack.len() - 1 && self.is_entry_visible(index) {
                break;
            }
            if entry.subtree.extra() {
                break;
            }
            let field = language.field_map(parent.subtree.production_id()).iter().find(|map| {
                !map.inherited && map.child_index as usize == entry.structural_child_index
            });
            if let Some(map) = field {
                return Some(map.field_id);
            }
        }
        None
    }

    pub fn field_name(&self) -> Option<&'tree str> {
        self.field_id().and_then(|id| self.language().field_name_for_id(id))
    }

    /// Number of visible ancestors between the cursor's root and its node.
    pub fn depth(&self) -> u32 {
        (1..self.stack.len()).filter(|&index| self.is_entry_visible(index)).count() as u32
    }

    /// Pre-order index of the current node among the root's descendants.
    pub fn descendant_index(&self) -> usize {
        self.last().descendant_index
    }

    #[doc(hidden)]
    pub fn goto_first_child_step(&mut self) -> CursorStep {
        let mut children = self.iterate_children();
        while let Some((entry, visible)) = children.next() {
            if visible {
                self.stack.push(entry);
                return CursorStep::Visible;
            }
            if entry.subtree.visible_child_count() > 0 {
                self.stack.push(entry);
                return CursorStep::Hidden;
            }
        }
        CursorStep::None
    }

    #[doc(hidden)]
    pub fn goto_last_child_step(&mut self) -> CursorStep {
        let mut children = self.iterate_children();
        let mut found = None;
        while let Some((entry, visible)) = children.next() {
            if visible {
                found = Some((entry, CursorStep::Visible));
            } else if entry.subtree.visible_child_count() > 0 {
                found = Some((entry, CursorStep::Hidden));
            }
        }
        match found {
            Some((entry, step)) => {
                self.stack.push(entry);
                step
            }
            None => CursorStep::None,
        }
    }

    #[doc(hidden)]
    pub fn goto_next_sibling_step(&mut self) -> CursorStep {
        let initial_len = self.stack.len();
        let mut popped = Vec::new();
        while self.stack.len() > 1 {
            let was_visible = self.is_entry_visible(self.stack.len() - 1);
            let Some(entry) = self.stack.pop() else {
                break;
            };
            popped.push(entry);
            if was_visible && self.stack.len() + 1 < initial_len {
                break;
            }

            let parent = *self.last();
            let mut children = ChildEntries {
                parent: parent.subtree,
                alias_sequence: self.language().alias_sequence(parent.subtree.production_id()),
                position: entry.position,
                child_index: entry.child_index,
                structural_child_index: entry.structural_child_index,
                descendant_index: entry.descendant_index,
            };
            children.next();
            while let Some((sibling, visible)) = children.next() {
                if visible {
                    self.stack.push(sibling);
                    return CursorStep::Visible;
                }
                if sibling.subtree.visible_child_count() > 0 {
                    self.stack.push(sibling);
                    return CursorStep::Hidden;
                }
            }
        }
        self.stack.extend(popped.into_iter().rev());
        CursorStep::None
    }

    #[doc(hidden)]
    pub fn goto_previous_sibling_step(&mut self) -> CursorStep {
        let initial_len = self.stack.len();
        let mut popped = Vec::new();
        while self.stack.len() > 1 {
            let was_visible = self.is_entry_visible(self.stack.len() - 1);
            let Some(entry) = self.stack.pop() else {
                break;
            };
            popped.push(entry);
            if was_visible && self.stack.len() + 1 < initial_len {
                break;
            }

            let mut children = self.iterate_children();
            let mut found = None;
            while let Some((sibling, visible)) = children.next() {
                if sibling.child_index >= entry.child_index {
                    break;
                }
                if visible {
                    found = Some((sibling, CursorStep::Visible));
                } else if sibling.subtree.visible_child_count() > 0 {
                    found = Some((sibling, CursorStep::Hidden));
                }
            }
            if let Some((sibling, step)) = found {
                self.stack.push(sibling);
                return step;
            }
        }
        self.stack.extend(popped.into_iter().rev());
        CursorStep::None
    }

    /// Moves to the first visible child. Returns `false` if there is none.
    pub fn goto_first_child(&mut self) -> bool {
        loop {
            match self.goto_first_child_step() {
                CursorStep::Hidden => {}
                CursorStep::Visible => return true,
                CursorStep::None => return false,
            }
        }
    }

    /// Moves to the last visible child.
    ///
    /// This is slower than [`goto_first_child`](Self::goto_first_child)
    /// because every child has to be visited.
    pub fn goto_last_child(&mut self) -> bool {
        loop {
            match self.goto_last_child_step() {
                CursorStep::Hidden => {}
                CursorStep::Visible => return true,
                CursorStep::None => return false,
            }
        }
    }

    pub fn goto_next_sibling(&mut self) -> bool {
        match self.goto_next_sibling_step() {
            CursorStep::Hidden => {
                self.goto_first_child();
                true
            }
            CursorStep::Visible => true,
            CursorStep::None => false,
        }
    }

    /// Moves to the previous visible sibling.
    ///
    /// Children only record forward offsets, so this rescans the parent's
    /// children up to the current one.
    pub fn goto_previous_sibling(&mut self) -> bool {
        match self.goto_previous_sibling_step() {
            CursorStep::Hidden => {
                self.goto_last_child();
                true
            }
            CursorStep::Visible => true,
            CursorStep::None => false,
        }
    }

    pub fn goto_parent(&mut self) -> bool {
        for index in (0..self.stack.len().saturating_sub(1)).rev() {
            if self.is_entry_visible(index) {
                self.stack.truncate(index + 1);
                return true;
            }
        }
        false
    }

    fn goto_first_child_for(&mut self, goal_byte: u32, goal_point: Point) -> Option<usize> {
        let initial_len = self.stack.len();
        let mut visible_child_index = 0;
        'descend: loop {
            let mut children = self.iterate_children();
            while let Some((entry, visible)) = children.next() {
                let end = entry.position + entry.subtree.size();
                let at_goal = u32::from(end.bytes) > goal_byte && end.extent > goal_point;
                let visible_child_count = entry.subtree.visible_child_count() as usize;
                if at_goal {
                    if visible {
                        self.stack.push(entry);
                        return Some(visible_child_index);
                    }
                    if visible_child_count > 0 {
                        self.stack.push(entry);
                        continue 'descend;
                    }
                } else if visible {
                    visible_child_index += 1;
                } else {
                    visible_child_index += visible_child_count;
                }
            }
            break;
        }
        self.stack.truncate(initial_len);
        None
    }

    /// Moves to the first child that extends beyond `byte` and returns its
    /// index among the visible children.
    pub fn goto_first_child_for_byte(&mut self, byte: usize) -> Option<usize> {
        self.goto_first_child_for(byte as u32, Point::ZERO)
    }

    pub fn goto_first_child_for_point(&mut self, point: Point) -> Option<usize> {
        self.goto_first_child_for(0, point)
    }

    /// Moves to the node with the given pre-order index among the descendants
    /// of the cursor's root.
    pub fn goto_descendant(&mut self, goal: usize) {
        loop {
            let index = self.stack.len() - 1;
            let entry = &self.stack[index];
            let next_descendant_index = entry.descendant_index
                + usize::from(self.is_entry_visible(index))
                + entry.subtree.visible_descendant_count() as usize;
            if entry.descendant_index <= goal && next_descendant_index > goal {
                break;
            }
            if self.stack.len() <= 1 {
                return;
            }
            self.stack.pop();
        }

        'descend: loop {
            let mut children = self.iterate_children();
            if children.descendant_index > goal {
                return;
            }
            while let Some((entry, visible)) = children.next() {
                if children.descendant_index > goal {
                    self.stack.push(entry);
                    if visible && entry.descendant_index == goal {
                        return;
                    }
                    continue 'descend;
                }
            }
            return;
        }
    }

    /// The nearest visible ancestor of the current node.
    #[doc(hidden)]
    pub fn parent_node(&self) -> Option<Node<'tree>> {
        let language = self.language();
        for index in (0..self.stack.len().saturating_sub(1)).rev() {
            let entry = &self.stack[index];
            let mut alias = 0;
            let mut is_visible = true;
            if index > 0 {
                let parent = &self.stack[index - 1];
                alias = language.alias_at(parent.subtree.production_id(), entry.structural_child_index);
                is_visible = alias != 0 || entry.subtree.visible();
            }
            if is_visible {
                return Some(Node::new(self.tree, entry.subtree, entry.position, alias));
            }
        }
        None
    }

    /// Field, sibling and supertype facts about the current node, gathered
    /// through its hidden ancestors.
    #[doc(hidden)]
    pub fn current_status(&self) -> CursorStatus {
        let language = self.language();
        let mut status = CursorStatus::default();
        for index in (1..self.stack.len()).rev() {
            let entry = &self.stack[index];
            let parent = &self.stack[index - 1];
            let production_id = parent.subtree.production_id();
            let symbol_at = |subtree: &Subtree, structural_index: usize| {
                let alias = language.alias_at(production_id, structural_index);
                if !subtree.extra() && alias != 0 { alias } else { subtree.symbol() }
            };

            let entry_symbol = symbol_at(entry.subtree, entry.structural_child_index);
            let entry_metadata = language.symbol_metadata(entry_symbol);
            if index != self.stack.len() - 1 && entry_metadata.visible {
                break;
            }
            if entry_metadata.supertype {
                status.supertypes.push(entry_symbol);
            }

            if !status.has_later_siblings {
                let mut structural_index = entry.structural_child_index;
                if !entry.subtree.extra() {
                    structural_index += 1;
                }
                for sibling in parent.subtree.children().iter().skip(entry.child_index + 1) {
                    let metadata = language.symbol_metadata(symbol_at(sibling, structural_index));
                    if metadata.visible {
                        status.has_later_siblings = true;
                        if status.has_later_named_siblings {
                            break;
                        }
                        if metadata.named {
                            status.has_later_named_siblings = true;
                            break;
                        }
                    } else if sibling.visible_child_count() > 0 {
                        status.has_later_siblings = true;
                        if status.has_later_named_siblings {
                            break;
                        }
                        if sibling.named_child_count() > 0 {
                            status.has_later_named_siblings = true;
                            break;
                        }
                    }
                    if !sibling.extra() {
                        structural_index += 1;
                    }
                }
            }

            if !entry.subtree.extra() {
                let field_map = language.field_map(production_id);
                if status.field_id == 0 {
                    if let Some(map) = field_map.iter().find(|map| {
                        !map.inherited && map.child_index as usize == entry.structural_child_index
                    }) {
                        status.field_id = map.field_id;
                    }
                }
                if status.field_id != 0
                    && field_map.iter().any(|map| {
                        map.field_id == status.field_id
                            && map.child_index as usize > entry.structural_child_index
                    })
                {
                    status.can_have_later_siblings_with_this_field = true;
                }
            }
        }
        status
    }
}

#[cfg(test)]
mod tests;
