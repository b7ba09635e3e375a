use loam_language::{Language, Symbol};
use triomphe::Arc;

use crate::{Subtree, SubtreeData};

impl Subtree {
    /// Rebalances left-leaning chains of hidden repetition nodes so that
    /// their depth grows logarithmically with the number of repetitions.
    ///
    /// Nodes that are shared with another tree are left as they are.
    pub fn balance(&mut self, language: &Language) {
        self.balance_with(language, || true);
    }

    /// Like [`Subtree::balance`], but asks `keep_going` before each node and
    /// stops early when it returns `false`. Returns whether balancing ran to
    /// completion. Balancing again later picks up whatever is still
    /// unbalanced.
    pub fn balance_with(&mut self, language: &Language, mut keep_going: impl FnMut() -> bool) -> bool {
        let mut stack: Vec<&mut SubtreeData> = Vec::new();
        if self.child_count() > 0 {
            if let Some(data) = self.get_mut() {
                stack.push(data);
            }
        }

        while let Some(tree) = stack.pop() {
            if !keep_going() {
                return false;
            }
            if tree.repeat_depth > 0 {
                let first = tree.children.first().map_or(0, Subtree::repeat_depth);
                let last = tree.children.last().map_or(0, Subtree::repeat_depth);
                if first > last {
                    let mut count = (first - last) / 2;
                    while count > 0 {
                        compress(tree, count, language);
                        count /= 2;
                    }
                }
            }

            for child in &mut tree.children {
                if child.child_count() > 0 {
                    if let Some(data) = child.get_mut() {
                        stack.push(data);
                    }
                }
            }
        }
        true
    }
}

/// Performs up to `count` right rotations down the leftmost spine of `root`.
fn compress(root: &mut SubtreeData, count: u32, language: &Language) {
    let symbol = root.symbol;
    let mut spine: Vec<Subtree> = Vec::new();

    for _ in 0..count {
        let tree = match spine.last_mut() {
            Some(last) => Arc::make_mut(&mut last.0),
            None => &mut *root,
        };
        match rotate(tree, symbol) {
            Some(grandchild) => spine.push(grandchild),
            None => break,
        }
    }

    if spine.is_empty() {
        return;
    }

    while let Some(mut tree) = spine.pop() {
        let data = Arc::make_mut(&mut tree.0);
        if let Some(child) = data.children.last_mut() {
            Arc::make_mut(&mut child.0).summarize(language);
        }
        data.summarize(language);
        let parent = match spine.last_mut() {
            Some(last) => Arc::make_mut(&mut last.0),
            None => &mut *root,
        };
        parent.children.insert(0, tree);
    }
    root.summarize(language);
}

/// Rotates `tree`'s first child `C` and its first child `G` so that `G`
/// takes `C`'s place and `C` becomes `G`'s last child. Returns the detached
/// `G`, whose slot in `tree.children[0]` is left empty for the caller to
/// refill.
fn rotate(tree: &mut SubtreeData, symbol: Symbol) -> Option<Subtree> {
    if tree.children.len() < 2 {
        return None;
    }
    let child = tree.children.first_mut()?;
    if !is_rotatable(child, symbol) {
        return None;
    }
    let grandchild = child.get_mut()?.children.first_mut()?;
    if !is_rotatable(grandchild, symbol) {
        return None;
    }

    let mut child = tree.children.remove(0);
    let child_data = Arc::make_mut(&mut child.0);
    let mut grandchild = child_data.children.remove(0);
    let grandchild_data = Arc::make_mut(&mut grandchild.0);
    if let Some(last) = grandchild_data.children.pop() {
        child_data.children.insert(0, last);
    }
    grandchild_data.children.push(child);
    Some(grandchild)
}

fn is_rotatable(tree: &mut Subtree, symbol: Symbol) -> bool {
    tree.symbol() == symbol && tree.child_count() >= 2 && tree.get_mut().is_some()
}
