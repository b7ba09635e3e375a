use loam_language::{ERROR, ERROR_STATE, Language, Symbol};
use loam_span::{Length, Range, TextSize, ranges_intersect};

use crate::subtree::external_scanner_state_eq;
use crate::{STATE_NONE, Subtree};

/// Appends `start..end`, merging it into the previous range when they touch.
fn push_range(ranges: &mut Vec<Range>, start: Length, end: Length) {
    if let Some(last) = ranges.last_mut() {
        if start.bytes <= last.end_byte {
            last.end_byte = end.bytes;
            last.end_point = end.extent;
            return;
        }
    }
    if start.bytes < end.bytes {
        ranges.push(Range::new(start.bytes, end.bytes, start.extent, end.extent));
    }
}

fn min_length(left: Length, right: Length) -> Length {
    if left.bytes <= right.bytes { left } else { right }
}

#[derive(Clone, Copy)]
struct Entry<'a> {
    subtree: &'a Subtree,
    /// Start of the node's padding.
    position: Length,
    child_index: usize,
    structural_child_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Differs,
    MayDiffer,
    Matches,
}

/// Walks one tree in document order, one visible node at a time, visiting
/// each node's padding separately from its content.
struct Walker<'a> {
    stack: Vec<Entry<'a>>,
    language: &'a Language,
    visible_depth: u32,
    in_padding: bool,
    prev_external_token: Option<&'a Subtree>,
}

impl<'a> Walker<'a> {
    fn new(tree: &'a Subtree, language: &'a Language) -> Self {
        Self {
            stack: vec![Entry {
                subtree: tree,
                position: Length::ZERO,
                child_index: 0,
                structural_child_index: 0,
            }],
            language,
            visible_depth: 1,
            in_padding: false,
            prev_external_token: None,
        }
    }

    fn done(&self) -> bool {
        self.stack.is_empty()
    }

    fn start_position(&self) -> Length {
        let Some(entry) = self.stack.last() else {
            return Length::ZERO;
        };
        if self.in_padding { entry.position } else { entry.position + entry.subtree.padding() }
    }

    fn end_position(&self) -> Length {
        let Some(entry) = self.stack.last() else {
            return Length::ZERO;
        };
        let result = entry.position + entry.subtree.padding();
        if self.in_padding { result } else { result + entry.subtree.size() }
    }

    fn is_visible(&self) -> bool {
        let Some(entry) = self.stack.last() else {
            return false;
        };
        if entry.subtree.visible() {
            return true;
        }
        match self.stack.len().checked_sub(2).map(|index| &self.stack[index]) {
            Some(parent) => {
                self.language.alias_at(parent.subtree.production_id(), entry.structural_child_index)
                    != 0
            }
            None => false,
        }
    }

    /// The innermost visible node at the current position, with its alias
    /// and start byte.
    fn visible_state(&self) -> Option<(&'a Subtree, Symbol, TextSize)> {
        let mut index = self.stack.len().checked_sub(1)?;
        if self.in_padding {
            index = index.checked_sub(1)?;
        }
        loop {
            let entry = &self.stack[index];
            let alias = match index.checked_sub(1) {
                Some(parent) => self
                    .language
                    .alias_at(self.stack[parent].subtree.production_id(), entry.structural_child_index),
                None => 0,
            };
            if entry.subtree.visible() || alias != 0 {
                return Some((entry.subtree, alias, entry.position.bytes));
            }
            index = index.checked_sub(1)?;
        }
    }

    fn ascend(&mut self) {
        if self.done() {
            return;
        }
        if self.is_visible() && !self.in_padding {
            self.visible_depth -= 1;
        }
        if self.stack.last().is_some_and(|entry| entry.child_index > 0) {
            self.in_padding = false;
        }
        self.stack.pop();
    }

    fn descend(&mut self, goal_position: TextSize) -> bool {
        if self.in_padding {
            return false;
        }
        'descend: loop {
            let Some(&entry) = self.stack.last() else {
                return false;
            };
            let mut position = entry.position;
            let mut structural_child_index = 0;
            for (child_index, child) in entry.subtree.children().iter().enumerate() {
                let child_left = position + child.padding();
                let child_right = child_left + child.size();
                if child_right.bytes > goal_position {
                    self.stack.push(Entry {
                        subtree: child,
                        position,
                        child_index,
                        structural_child_index,
                    });
                    if self.is_visible() {
                        if child_left.bytes > goal_position {
                            self.in_padding = true;
                        } else {
                            self.visible_depth += 1;
                        }
                        return true;
                    }
                    continue 'descend;
                }
                position = child_right;
                if !child.extra() {
                    structural_child_index += 1;
                }
            }
            return false;
        }
    }

    fn advance(&mut self) {
        if self.in_padding {
            self.in_padding = false;
            if self.is_visible() {
                self.visible_depth += 1;
            } else {
                self.descend(TextSize::new(0));
            }
            return;
        }

        loop {
            if self.is_visible() {
                self.visible_depth -= 1;
            }
            let Some(entry) = self.stack.pop() else {
                return;
            };
            let Some(parent) = self.stack.last().map(|parent| parent.subtree) else {
                return;
            };
            let child_index = entry.child_index + 1;
            if entry.subtree.has_external_tokens() {
                self.prev_external_token = entry.subtree.last_external_token();
            }
            let position = entry.position + entry.subtree.total_size();
            let mut structural_child_index = entry.structural_child_index;
            if !entry.subtree.extra() {
                structural_child_index += 1;
            }
            if let Some(next) = parent.children().get(child_index) {
                self.stack.push(Entry {
                    subtree: next,
                    position,
                    child_index,
                    structural_child_index,
                });
                if self.is_visible() {
                    if u32::from(next.padding().bytes) > 0 {
                        self.in_padding = true;
                    } else {
                        self.visible_depth += 1;
                    }
                } else {
                    self.descend(TextSize::new(0));
                }
                return;
            }
        }
    }

    fn compare(&self, other: &Self) -> Comparison {
        let (old, new) = match (self.visible_state(), other.visible_state()) {
            (None, None) => return Comparison::Matches,
            (Some(old), Some(new)) => (old, new),
            _ => return Comparison::Differs,
        };
        let (old_tree, old_alias, old_start) = old;
        let (new_tree, new_alias, new_start) = new;
        if old_alias != new_alias || old_tree.symbol() != new_tree.symbol() {
            return Comparison::Differs;
        }

        let old_state = old_tree.parse_state();
        let new_state = new_tree.parse_state();
        let old_has_external_tokens = old_tree.has_external_tokens();
        if old_start != new_start
            || old_tree.symbol() == ERROR
            || old_tree.size().bytes != new_tree.size().bytes
            || old_state == STATE_NONE
            || new_state == STATE_NONE
            || (old_state == ERROR_STATE) != (new_state == ERROR_STATE)
            || old_tree.error_cost() != new_tree.error_cost()
            || old_has_external_tokens != new_tree.has_external_tokens()
            || old_tree.has_changes()
            || (old_has_external_tokens
                && !external_scanner_state_eq(self.prev_external_token, other.prev_external_token))
        {
            return Comparison::MayDiffer;
        }
        Comparison::Matches
    }
}

/// Ranges of the document whose syntactic structure differs between an
/// edited old tree and the tree produced by reparsing it.
pub(crate) fn changed_ranges(
    old_tree: &Subtree,
    new_tree: &Subtree,
    language: &Language,
    included_range_differences: &[Range],
) -> Vec<Range> {
    let mut results = Vec::new();
    let mut old_walker = Walker::new(old_tree, language);
    let mut new_walker = Walker::new(new_tree, language);
    let mut difference_index = 0;

    let mut position = old_walker.start_position();
    let mut next_position = new_walker.start_position();
    if position.bytes < next_position.bytes {
        push_range(&mut results, position, next_position);
        position = next_position;
    } else if position.bytes > next_position.bytes {
        push_range(&mut results, next_position, position);
    }

    loop {
        let mut comparison = old_walker.compare(&new_walker);

        // Text that moved in or out of the included ranges can change a
        // subtree that otherwise looks identical.
        if comparison == Comparison::Matches
            && ranges_intersect(
                included_range_differences,
                difference_index,
                position.bytes,
                old_walker.end_position().bytes,
            )
        {
            comparison = Comparison::MayDiffer;
        }

        let mut is_changed = false;
        match comparison {
            Comparison::Matches => {
                next_position = old_walker.end_position();
            }
            Comparison::MayDiffer => {
                if old_walker.descend(position.bytes) {
                    if !new_walker.descend(position.bytes) {
                        is_changed = true;
                        next_position = old_walker.end_position();
                    }
                } else if new_walker.descend(position.bytes) {
                    is_changed = true;
                    next_position = new_walker.end_position();
                } else {
                    next_position =
                        min_length(old_walker.end_position(), new_walker.end_position());
                }
            }
            Comparison::Differs => {
                is_changed = true;
                next_position = min_length(old_walker.end_position(), new_walker.end_position());
            }
        }

        while !old_walker.done() && old_walker.end_position().bytes <= next_position.bytes {
            old_walker.advance();
        }
        while !new_walker.done() && new_walker.end_position().bytes <= next_position.bytes {
            new_walker.advance();
        }

        while old_walker.visible_depth > new_walker.visible_depth {
            old_walker.ascend();
        }
        while new_walker.visible_depth > old_walker.visible_depth {
            new_walker.ascend();
        }

        if is_changed {
            push_range(&mut results, position, next_position);
        }
        position = next_position;

        while included_range_differences
            .get(difference_index)
            .is_some_and(|range| range.end_byte <= position.bytes)
        {
            difference_index += 1;
        }

        if old_walker.done() || new_walker.done() {
            break;
        }
    }

    let old_size = old_tree.total_size();
    let new_size = new_tree.total_size();
    if old_size.bytes < new_size.bytes {
        push_range(&mut results, old_size, new_size);
    } else if new_size.bytes < old_size.bytes {
        push_range(&mut results, new_size, old_size);
    }

    results
}
