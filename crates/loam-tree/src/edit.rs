use loam_span::{InputEdit, Length};
use triomphe::Arc;

use crate::Subtree;

/// An edit expressed in the coordinate space of one subtree, where zero is
/// the start of the subtree's padding.
#[derive(Debug, Clone, Copy)]
struct Edit {
    start: Length,
    old_end: Length,
    new_end: Length,
}

impl Subtree {
    /// Adjusts positions for a text edit and flags every node whose text or
    /// lookahead overlaps it.
    ///
    /// Only the path to the edited region is copied; nodes shared with
    /// other trees are never mutated in place.
    pub fn edit(&mut self, input_edit: &InputEdit) {
        let mut stack: Vec<(&mut Subtree, Edit)> = vec![(
            self,
            Edit {
                start: input_edit.start(),
                old_end: input_edit.old_end(),
                new_end: input_edit.new_end(),
            },
        )];

        while let Some((tree, mut edit)) = stack.pop() {
            let is_noop = edit.old_end.bytes == edit.start.bytes
                && edit.new_end.bytes == edit.start.bytes;
            let mut is_pure_insertion = edit.old_end.bytes == edit.start.bytes;
            let invalidate_first_row = tree.depends_on_column();

            let mut padding = tree.padding();
            let mut size = tree.size();
            let total_size = padding + size;
            let end_byte = u32::from(total_size.bytes) + tree.lookahead_bytes();
            let start_byte = u32::from(edit.start.bytes);
            if start_byte > end_byte || (is_noop && start_byte == end_byte) {
                continue;
            }

            if edit.old_end.bytes <= padding.bytes {
                // Entirely inside the leading padding: only the padding moves.
                padding = edit.new_end + (padding - edit.old_end);
            } else if edit.start.bytes < padding.bytes {
                // Starts in the padding and reaches into the content.
                size = size.saturating_sub(edit.old_end - padding);
                padding = edit.new_end;
            } else if edit.start.bytes < total_size.bytes
                || (edit.start.bytes == total_size.bytes && is_pure_insertion)
            {
                size = (edit.new_end - padding) + total_size.saturating_sub(edit.old_end);
            }

            let data = Arc::make_mut(&mut tree.0);
            data.padding = padding;
            data.size = size;
            data.set_has_changes(true);

            let mut child_right = Length::ZERO;
            for (index, child) in data.children.iter_mut().enumerate() {
                let child_size = child.total_size();
                let child_left = child_right;
                child_right = child_left + child_size;

                if u32::from(child_right.bytes) + child.lookahead_bytes() < start_byte {
                    continue;
                }

                // Stop at the first child that starts after the edit. Nodes
                // that depend on the column stay invalid to the end of their
                // first row.
                let starts_after = child_left.bytes > edit.old_end.bytes
                    || (child_left.bytes == edit.old_end.bytes
                        && u32::from(child_size.bytes) > 0
                        && index > 0);
                if starts_after
                    && (!invalidate_first_row || child_left.extent.row > padding.extent.row)
                {
                    break;
                }

                let child_edit = Edit {
                    start: edit.start.saturating_sub(child_left),
                    old_end: edit.old_end.saturating_sub(child_left),
                    new_end: edit.new_end.saturating_sub(child_left),
                };

                // Inserted text belongs to the first child touching the edit;
                // later children only shrink.
                if child_right.bytes > edit.start.bytes
                    || (child_right.bytes == edit.start.bytes && is_pure_insertion)
                {
                    edit.new_end = edit.start;
                    is_pure_insertion = false;
                }

                stack.push((child, child_edit));
            }
        }
    }
}
