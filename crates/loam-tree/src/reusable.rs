use crate::Subtree;

#[derive(Debug, Clone)]
struct Entry {
    tree: Subtree,
    child_index: usize,
    byte_offset: u32,
}

/// Walks the nodes of a previous tree in document order, offering each one
/// to the parser as a candidate for reuse.
#[derive(Debug, Clone, Default)]
pub struct ReusableNode {
    stack: Vec<Entry>,
    last_external_token: Option<Subtree>,
}

impl ReusableNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts over at the children of `tree`. The root itself is never
    /// offered, since accepting a parse reshapes it.
    pub fn reset(&mut self, tree: &Subtree) {
        self.clear();
        self.stack.push(Entry { tree: tree.clone(), child_index: 0, byte_offset: 0 });
        if !self.descend() {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        self.stack.clear();
        self.last_external_token = None;
    }

    /// The current candidate, if any remain.
    pub fn tree(&self) -> Option<&Subtree> {
        self.stack.last().map(|entry| &entry.tree)
    }

    /// Byte offset of the current candidate's padding.
    pub fn byte_offset(&self) -> u32 {
        self.stack.last().map_or(u32::MAX, |entry| entry.byte_offset)
    }

    /// The last external token before the current candidate.
    pub fn last_external_token(&self) -> Option<&Subtree> {
        self.last_external_token.as_ref()
    }

    /// Moves past the current candidate to the next node in document order.
    pub fn advance(&mut self) {
        let Some(last) = self.stack.last() else {
            return;
        };
        let byte_offset = last.byte_offset + u32::from(last.tree.total_bytes());
        if last.tree.has_external_tokens() {
            self.last_external_token = last.tree.last_external_token().cloned();
        }

        let (tree, next_index) = loop {
            let Some(popped) = self.stack.pop() else {
                return;
            };
            let Some(parent) = self.stack.last() else {
                return;
            };
            let next_index = popped.child_index + 1;
            if let Some(tree) = parent.tree.children().get(next_index) {
                break (tree.clone(), next_index);
            }
        };
        self.stack.push(Entry { tree, child_index: next_index, byte_offset });
    }

    /// Moves to the first child of the current candidate.
    pub fn descend(&mut self) -> bool {
        let Some(last) = self.stack.last() else {
            return false;
        };
        match last.tree.children().first() {
            Some(child) => {
                let entry = Entry { tree: child.clone(), child_index: 0, byte_offset: last.byte_offset };
                self.stack.push(entry);
                true
            }
            None => false,
        }
    }

    /// Moves past the first leaf under the current candidate.
    pub fn advance_past_leaf(&mut self) {
        while self.descend() {}
        self.advance();
    }
}
