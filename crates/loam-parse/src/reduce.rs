//! Shifting, reducing and accepting, and choosing between the stack versions
//! and trees that ambiguities produce.

use std::cmp::Ordering;

use loam_language::{ERROR_STATE, START_STATE, StateId, Symbol};
use loam_tree::{ERROR_COST_PER_SKIPPED_TREE, STATE_NONE, Subtree};

use crate::session::Session;
use crate::stack::StackVersion;

pub(crate) const MAX_VERSION_COUNT: usize = 6;
const MAX_VERSION_COUNT_OVERFLOW: usize = 4;
const MAX_COST_DIFFERENCE: u32 = 18 * ERROR_COST_PER_SKIPPED_TREE;

/// How promising a stack version is.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ErrorStatus {
    pub(crate) cost: u32,
    pub(crate) node_count: u32,
    pub(crate) dynamic_precedence: i32,
    pub(crate) is_in_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorComparison {
    TakeLeft,
    PreferLeft,
    None,
    PreferRight,
    TakeRight,
}

impl ErrorStatus {
    /// Compares two versions. The `Take` outcomes mean the other version is
    /// not worth keeping at all.
    pub(crate) fn compare(self, other: Self) -> ErrorComparison {
        if !self.is_in_error && other.is_in_error {
            return if self.cost < other.cost {
                ErrorComparison::TakeLeft
            } else {
                ErrorComparison::PreferLeft
            };
        }
        if self.is_in_error && !other.is_in_error {
            return if other.cost < self.cost {
                ErrorComparison::TakeRight
            } else {
                ErrorComparison::PreferRight
            };
        }
        if self.cost < other.cost {
            return if (other.cost - self.cost) * (1 + self.node_count) > MAX_COST_DIFFERENCE {
                ErrorComparison::TakeLeft
            } else {
                ErrorComparison::PreferLeft
            };
        }
        if other.cost < self.cost {
            return if (self.cost - other.cost) * (1 + other.node_count) > MAX_COST_DIFFERENCE {
                ErrorComparison::TakeRight
            } else {
                ErrorComparison::PreferRight
            };
        }
        match self.dynamic_precedence.cmp(&other.dynamic_precedence) {
            Ordering::Greater => ErrorComparison::PreferLeft,
            Ordering::Less => ErrorComparison::PreferRight,
            Ordering::Equal => ErrorComparison::None,
        }
    }
}

/// Splits off the extras at the end of `subtrees`.
pub(crate) fn remove_trailing_extras(subtrees: &mut Vec<Subtree>) -> Vec<Subtree> {
    let keep = subtrees.iter().rposition(|tree| !tree.extra()).map_or(0, |index| index + 1);
    subtrees.split_off(keep)
}

impl Session<'_, '_, '_> {
    pub(crate) fn shift(
        &mut self,
        version: StackVersion,
        state: StateId,
        mut lookahead: Subtree,
        extra: bool,
    ) {
        let is_leaf = lookahead.child_count() == 0;
        if extra != lookahead.extra() && is_leaf {
            lookahead.make_mut().set_extra(extra);
        }
        let last_external_token = lookahead.last_external_token().cloned();
        self.engine.stack.push(version, Some(lookahead), !is_leaf, state);
        if last_external_token.is_some() {
            self.engine.stack.set_last_external_token(version, last_external_token);
        }
    }

    /// Pops `count` subtrees from `version` along every path and pushes a
    /// `symbol` node over each. Returns the first version this created.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn reduce(
        &mut self,
        version: StackVersion,
        symbol: Symbol,
        count: u32,
        dynamic_precedence: i32,
        production_id: u16,
        is_fragile: bool,
        end_of_non_terminal_extra: bool,
    ) -> Option<StackVersion> {
        let language = self.language;
        let initial_version_count = self.engine.stack.version_count();
        let slices = self.engine.stack.pop_count(version, count);
        let slice_count = slices.len();
        let halted_version_count = self.engine.stack.halted_version_count();
        let mut removed_version_count = 0;

        let mut slices = slices.into_iter().peekable();
        while let Some(slice) = slices.next() {
            let slice_version = slice.version - removed_version_count;

            // New versions may exceed the cap until the stack is condensed,
            // but only by so much.
            if slice_version > MAX_VERSION_COUNT + MAX_VERSION_COUNT_OVERFLOW + halted_version_count {
                self.engine.stack.remove_version(slice_version);
                removed_version_count += 1;
                while slices.next_if(|next| next.version == slice.version).is_some() {
                    log!(self, "aborting reduce with too many versions");
                }
                continue;
            }

            let mut children = slice.subtrees;
            let mut trailing_extras = remove_trailing_extras(&mut children);
            let mut parent = Subtree::new_node(symbol, children, production_id, language);

            // Paths that reached the same stack node produce one version;
            // keep the best of their trees.
            while let Some(next) = slices.next_if(|next| next.version == slice.version) {
                let mut next_children = next.subtrees;
                let next_trailing_extras = remove_trailing_extras(&mut next_children);
                let candidate = Subtree::new_node(symbol, next_children, production_id, language);
                if self.select_tree(Some(&parent), &candidate) {
                    parent = candidate;
                    trailing_extras = next_trailing_extras;
                }
            }

            let state = self.engine.stack.state(slice_version);
            let next_state = language.next_state(state, symbol);
            let data = parent.make_mut();
            if end_of_non_terminal_extra && next_state == state {
                data.set_extra(true);
            }
            if is_fragile || slice_count > 1 || initial_version_count > 1 {
                data.set_fragile(true, true);
                data.set_parse_state(STATE_NONE);
            } else {
                data.set_parse_state(state);
            }
            data.add_dynamic_precedence(dynamic_precedence);

            self.engine.stack.push(slice_version, Some(parent), false, next_state);
            for extra in trailing_extras {
                self.engine.stack.push(slice_version, Some(extra), false, next_state);
            }

            for other in 0..slice_version {
                if other != version && self.engine.stack.merge(other, slice_version) {
                    removed_version_count += 1;
                    break;
                }
            }
        }

        (self.engine.stack.version_count() > initial_version_count).then_some(initial_version_count)
    }

    /// Finishes `version` at the end of input, keeping the resulting tree if
    /// it beats the best one found so far.
    pub(crate) fn accept(&mut self, version: StackVersion, lookahead: Subtree) {
        let language = self.language;
        debug_assert!(lookahead.is_eof());
        self.engine.stack.push(version, Some(lookahead), false, START_STATE);

        let slices = self.engine.stack.pop_all(version);
        let Some(first_version) = slices.first().map(|slice| slice.version) else {
            self.engine.stack.halt(version);
            return;
        };

        for slice in slices {
            let mut trees = slice.subtrees;
            let Some(index) = trees.iter().rposition(|tree| !tree.extra()) else {
                continue;
            };
            // The topmost real node becomes the root, adopting the extras
            // around it.
            let top = trees.remove(index);
            let children = top.children().to_vec();
            trees.splice(index..index, children);
            let root = Subtree::new_node(top.symbol(), trees, top.production_id(), language);
            self.engine.accept_count += 1;

            let keep = match &self.engine.finished_tree {
                Some(finished) => {
                    let finished = finished.clone();
                    self.select_tree(Some(&finished), &root)
                }
                None => true,
            };
            if keep {
                self.engine.finished_tree = Some(root);
            }
        }

        self.engine.stack.remove_version(first_version);
        self.engine.stack.halt(version);
    }

    /// Whether `right` should replace `left` as the tree for a span of input.
    pub(crate) fn select_tree(&mut self, left: Option<&Subtree>, right: &Subtree) -> bool {
        let Some(left) = left else {
            return true;
        };
        let language = self.language;
        let name = |tree: &Subtree| language.symbol_name(tree.symbol());

        if right.error_cost() < left.error_cost() {
            log!(self, "select_smaller_error symbol:{}, over_symbol:{}", name(right), name(left));
            return true;
        }
        if left.error_cost() < right.error_cost() {
            log!(self, "select_smaller_error symbol:{}, over_symbol:{}", name(left), name(right));
            return false;
        }
        if right.dynamic_precedence() > left.dynamic_precedence() {
            log!(
                self,
                "select_higher_precedence symbol:{}, prec:{}, over_symbol:{}, other_prec:{}",
                name(right),
                right.dynamic_precedence(),
                name(left),
                left.dynamic_precedence()
            );
            return true;
        }
        if left.dynamic_precedence() > right.dynamic_precedence() {
            log!(
                self,
                "select_higher_precedence symbol:{}, prec:{}, over_symbol:{}, other_prec:{}",
                name(left),
                left.dynamic_precedence(),
                name(right),
                right.dynamic_precedence()
            );
            return false;
        }
        if left.error_cost() > 0 {
            return true;
        }

        match left.compare(right) {
            Ordering::Less => {
                log!(self, "select_earlier symbol:{}, over_symbol:{}", name(left), name(right));
                false
            }
            Ordering::Greater => {
                log!(self, "select_earlier symbol:{}, over_symbol:{}", name(right), name(left));
                true
            }
            Ordering::Equal => {
                log!(self, "select_existing symbol:{}, over_symbol:{}", name(left), name(right));
                false
            }
        }
    }

    pub(crate) fn version_status(&mut self, version: StackVersion) -> ErrorStatus {
        let stack = &mut self.engine.stack;
        let is_paused = stack.is_paused(version);
        let mut cost = stack.error_cost(version);
        if is_paused {
            cost += ERROR_COST_PER_SKIPPED_TREE;
        }
        ErrorStatus {
            cost,
            node_count: stack.node_count_since_error(version),
            dynamic_precedence: stack.dynamic_precedence(version),
            is_in_error: is_paused || stack.state(version) == ERROR_STATE,
        }
    }

    /// Whether some other version, or the finished tree, is clearly better
    /// than `version` would be at `cost`.
    pub(crate) fn better_version_exists(
        &mut self,
        version: StackVersion,
        is_in_error: bool,
        cost: u32,
    ) -> bool {
        if self.engine.finished_tree.as_ref().is_some_and(|tree| tree.error_cost() <= cost) {
            return true;
        }

        let position = self.engine.stack.position(version);
        let status = ErrorStatus {
            cost,
            is_in_error,
            dynamic_precedence: self.engine.stack.dynamic_precedence(version),
            node_count: self.engine.stack.node_count_since_error(version),
        };

        for other in 0..self.engine.stack.version_count() {
            if other == version
                || !self.engine.stack.is_active(other)
                || self.engine.stack.position(other).bytes < position.bytes
            {
                continue;
            }
            match status.compare(self.version_status(other)) {
                ErrorComparison::TakeRight => return true,
                ErrorComparison::PreferRight if self.engine.stack.can_merge(other, version) => {
                    return true;
                }
                _ => {}
            }
        }
        false
    }

    /// Removes halted and hopeless versions, merges equivalent ones, orders
    /// the rest from most to least promising and starts error recovery on
    /// the best paused version. Returns the lowest error cost among versions
    /// that are not recovering from an error.
    pub(crate) fn condense_stack(&mut self) -> u32 {
        let mut made_changes = false;
        let mut min_error_cost = u32::MAX;

        let mut i = 0;
        while i < self.engine.stack.version_count() {
            if self.engine.stack.is_halted(i) {
                self.engine.stack.remove_version(i);
                continue;
            }

            let status_i = self.version_status(i);
            if !status_i.is_in_error && status_i.cost < min_error_cost {
                min_error_cost = status_i.cost;
            }

            let mut removed_i = false;
            let mut j = 0;
            while j < i {
                let status_j = self.version_status(j);
                match status_j.compare(status_i) {
                    ErrorComparison::TakeLeft => {
                        made_changes = true;
                        self.engine.stack.remove_version(i);
                        removed_i = true;
                        break;
                    }
                    ErrorComparison::PreferLeft | ErrorComparison::None => {
                        if self.engine.stack.merge(j, i) {
                            made_changes = true;
                            removed_i = true;
                            break;
                        }
                        j += 1;
                    }
                    ErrorComparison::PreferRight => {
                        made_changes = true;
                        if self.engine.stack.merge(j, i) {
                            removed_i = true;
                            break;
                        }
                        self.engine.stack.swap_versions(i, j);
                        j += 1;
                    }
                    ErrorComparison::TakeRight => {
                        made_changes = true;
                        self.engine.stack.remove_version(j);
                        i -= 1;
                    }
                }
            }
            if !removed_i {
                i += 1;
            }
        }

        while self.engine.stack.version_count() > MAX_VERSION_COUNT {
            self.engine.stack.remove_version(MAX_VERSION_COUNT);
            made_changes = true;
        }

        // Recover from an error on the best paused version, unless an
        // unpaused version is ahead of it. Other paused versions are dropped.
        let mut has_unpaused_version = false;
        let mut count = self.engine.stack.version_count();
        let mut i = 0;
        while i < count {
            if self.engine.stack.is_paused(i) {
                if !has_unpaused_version && (self.engine.accept_count as usize) < MAX_VERSION_COUNT {
                    log!(self, "resume version:{i}");
                    min_error_cost = self.engine.stack.error_cost(i);
                    if let Some(lookahead) = self.engine.stack.resume(i) {
                        self.handle_error(i, lookahead);
                    }
                    has_unpaused_version = true;
                } else {
                    self.engine.stack.remove_version(i);
                    made_changes = true;
                    count -= 1;
                    continue;
                }
            } else {
                has_unpaused_version = true;
            }
            i += 1;
        }

        if made_changes {
            log!(self, "condense");
            self.log_stack();
        }
        min_error_cost
    }
}
