//! Error recovery.
//!
//! A version with no valid action for its lookahead is paused. When the
//! stack is condensed, the best paused version enters the error state here:
//! it performs the reductions still possible, tries inserting a single
//! missing token, and then either pops back to an earlier state where the
//! lookahead is valid or skips the lookahead inside an `ERROR` node.

use loam_language::{END, ERROR_REPEAT, ERROR_STATE, ParseAction, START_STATE, StateId, Symbol};
use loam_tree::{
    ERROR_COST_PER_SKIPPED_CHAR, ERROR_COST_PER_SKIPPED_LINE, ERROR_COST_PER_SKIPPED_TREE, Subtree,
};
use smallvec::SmallVec;

use crate::reduce::{MAX_VERSION_COUNT, remove_trailing_extras};
use crate::session::Session;
use crate::stack::StackVersion;

const MAX_SUMMARY_DEPTH: u32 = 16;

#[derive(Debug, Clone, Copy)]
struct ReduceAction {
    symbol: Symbol,
    count: u8,
    dynamic_precedence: i16,
    production_id: u16,
}

impl Session<'_, '_, '_> {
    /// Starts error recovery on `version`, which could not handle
    /// `lookahead`.
    pub(crate) fn handle_error(&mut self, version: StackVersion, mut lookahead: Subtree) {
        let language = self.language;
        let previous_version_count = self.engine.stack.version_count();

        // A skipped token may have blocked a reduction that any other
        // lookahead would allow.
        self.do_all_potential_reductions(version, END);
        let version_count = self.engine.stack.version_count();
        let position = self.engine.stack.position(version);

        let mut did_insert_missing_token = false;
        let mut current = version;
        while current < version_count {
            if !did_insert_missing_token {
                let state = self.engine.stack.state(current);
                for missing_symbol in 1..language.token_count() as Symbol {
                    let state_after_missing_symbol = language.next_state(state, missing_symbol);
                    if state_after_missing_symbol == 0 || state_after_missing_symbol == state {
                        continue;
                    }
                    if !language.has_reduce_action(state_after_missing_symbol, lookahead.leaf_symbol()) {
                        continue;
                    }

                    // Outside of the included ranges the lexer snaps forward,
                    // so the missing token's padding comes from the lexer.
                    self.engine.lexer.reset(position);
                    self.engine.lexer.mark_end();
                    let padding = self.engine.lexer.token_end_position().saturating_sub(position);
                    let lookahead_bytes =
                        u32::from(lookahead.total_bytes()) + lookahead.lookahead_bytes();

                    let version_with_missing_tree = self.engine.stack.copy_version(current);
                    let missing_tree =
                        Subtree::new_missing_leaf(missing_symbol, padding, lookahead_bytes, language);
                    self.engine.stack.push(
                        version_with_missing_tree,
                        Some(missing_tree),
                        false,
                        state_after_missing_symbol,
                    );

                    if self.do_all_potential_reductions(version_with_missing_tree, lookahead.leaf_symbol()) {
                        log!(
                            self,
                            "recover_with_missing symbol:{}, state:{}",
                            language.symbol_name(missing_symbol),
                            self.engine.stack.state(version_with_missing_tree)
                        );
                        did_insert_missing_token = true;
                        break;
                    }
                }
            }

            self.engine.stack.push(current, None, false, ERROR_STATE);
            current = if current == version { previous_version_count } else { current + 1 };
        }

        for _ in previous_version_count..version_count {
            let did_merge = self.engine.stack.merge(version, previous_version_count);
            debug_assert!(did_merge);
        }

        self.engine.stack.record_summary(version, MAX_SUMMARY_DEPTH);

        // Recover with the current lookahead right away, so that its
        // lookahead bytes are accounted for in the tree.
        if lookahead.child_count() > 0 {
            self.breakdown_lookahead(&mut lookahead, ERROR_STATE);
        }
        self.recover(version, lookahead);

        self.log_stack();
    }

    /// Performs every reduction available to `starting_version` under
    /// `lookahead_symbol`, or under any terminal if it is `END`. Returns
    /// whether one of the resulting versions can shift the lookahead.
    pub(crate) fn do_all_potential_reductions(
        &mut self,
        starting_version: StackVersion,
        lookahead_symbol: Symbol,
    ) -> bool {
        let language = self.language;
        let initial_version_count = self.engine.stack.version_count();
        let mut can_shift_lookahead_symbol = false;
        let mut version = starting_version;
        let mut reduce_actions = SmallVec::<[ReduceAction; 4]>::new();

        for iteration in 0usize.. {
            let version_count = self.engine.stack.version_count();
            if version >= version_count {
                break;
            }

            let merged = (initial_version_count..version)
                .any(|other| self.engine.stack.merge(other, version));
            if merged {
                continue;
            }

            let state = self.engine.stack.state(version);
            let mut has_shift_action = false;
            reduce_actions.clear();

            let symbols = if lookahead_symbol != END {
                lookahead_symbol..lookahead_symbol + 1
            } else {
                1..language.token_count() as Symbol
            };
            for symbol in symbols {
                for action in &language.table_entry(state, symbol).actions {
                    match *action {
                        ParseAction::Shift { extra, repetition, .. } => {
                            if !extra && !repetition {
                                has_shift_action = true;
                            }
                        }
                        ParseAction::Recover => has_shift_action = true,
                        ParseAction::Reduce { symbol, child_count, dynamic_precedence, production_id }
                            if child_count > 0 =>
                        {
                            let exists = reduce_actions
                                .iter()
                                .any(|action| action.symbol == symbol && action.count == child_count);
                            if !exists {
                                reduce_actions.push(ReduceAction {
                                    symbol,
                                    count: child_count,
                                    dynamic_precedence,
                                    production_id,
                                });
                            }
                        }
                        _ => {}
                    }
                }
            }

            let mut reduction_version = None;
            for action in &reduce_actions {
                reduction_version = self.reduce(
                    version,
                    action.symbol,
                    u32::from(action.count),
                    i32::from(action.dynamic_precedence),
                    action.production_id,
                    true,
                    false,
                );
            }

            if has_shift_action {
                can_shift_lookahead_symbol = true;
            } else if let Some(reduction_version) =
                reduction_version.filter(|_| iteration < MAX_VERSION_COUNT)
            {
                self.engine.stack.renumber_version(reduction_version, version);
                continue;
            } else if lookahead_symbol != END {
                self.engine.stack.remove_version(version);
            }

            version = if version == starting_version { version_count } else { version + 1 };
        }

        can_shift_lookahead_symbol
    }

    /// Pops `depth` subtrees from `version`, wraps them in an `ERROR` node
    /// and resumes in `goal_state`.
    fn recover_to_state(&mut self, version: StackVersion, depth: u32, goal_state: StateId) -> bool {
        let language = self.language;
        let slices = self.engine.stack.pop_count(version, depth);
        let mut previous_version = None;

        for slice in slices {
            if Some(slice.version) == previous_version {
                continue;
            }
            if self.engine.stack.state(slice.version) != goal_state {
                self.engine.stack.halt(slice.version);
                continue;
            }

            let mut subtrees = slice.subtrees;
            let error_trees = self.engine.stack.pop_error(slice.version);
            if let Some(error_tree) = error_trees.first() {
                debug_assert_eq!(error_trees.len(), 1);
                subtrees.splice(0..0, error_tree.children().iter().cloned());
            }

            let trailing_extras = remove_trailing_extras(&mut subtrees);
            if !subtrees.is_empty() {
                let error = Subtree::new_error_node(subtrees, true, language);
                self.engine.stack.push(slice.version, Some(error), false, goal_state);
            }
            for extra in trailing_extras {
                self.engine.stack.push(slice.version, Some(extra), false, goal_state);
            }

            previous_version = Some(slice.version);
        }

        previous_version.is_some()
    }

    /// Handles `lookahead` on a version in the error state: returns to an
    /// earlier state where it is valid, skips it, or both, keeping whichever
    /// outcomes are not clearly worse than another version.
    pub(crate) fn recover(&mut self, version: StackVersion, mut lookahead: Subtree) {
        let language = self.language;
        let mut did_recover = false;
        let previous_version_count = self.engine.stack.version_count();
        let position = self.engine.stack.position(version);
        let summary = self.engine.stack.summary(version).map(<[_]>::to_vec);
        let node_count_since_error = self.engine.stack.node_count_since_error(version);
        let current_error_cost = self.engine.stack.error_cost(version);

        // First choice: an earlier state recorded when the error began, in
        // which the lookahead is valid.
        if let Some(summary) = summary.filter(|_| !lookahead.is_error()) {
            for entry in summary {
                if entry.state == ERROR_STATE || entry.position.bytes == position.bytes {
                    continue;
                }
                let mut depth = entry.depth;
                if node_count_since_error > 0 {
                    depth += 1;
                }

                let would_merge = (0..previous_version_count).any(|other| {
                    self.engine.stack.state(other) == entry.state
                        && self.engine.stack.position(other).bytes == position.bytes
                });
                if would_merge {
                    continue;
                }

                let new_cost = current_error_cost
                    + entry.depth * ERROR_COST_PER_SKIPPED_TREE
                    + u32::from(position.bytes - entry.position.bytes) * ERROR_COST_PER_SKIPPED_CHAR
                    + position.extent.row.saturating_sub(entry.position.extent.row)
                        * ERROR_COST_PER_SKIPPED_LINE;
                if self.better_version_exists(version, false, new_cost) {
                    break;
                }

                if language.has_actions(entry.state, lookahead.symbol())
                    && self.recover_to_state(version, depth, entry.state)
                {
                    did_recover = true;
                    log!(self, "recover_to_previous state:{}, depth:{depth}", entry.state);
                    self.log_stack();
                    break;
                }
            }
        }

        // Versions halted while trying to recover are dropped.
        let mut i = previous_version_count;
        while i < self.engine.stack.version_count() {
            if self.engine.stack.is_active(i) {
                i += 1;
            } else {
                log!(self, "removed paused version:{i}");
                self.engine.stack.remove_version(i);
                self.log_stack();
            }
        }

        if lookahead.is_eof() {
            log!(self, "recover_eof");
            let parent = Subtree::new_error_node(Vec::new(), false, language);
            self.engine.stack.push(version, Some(parent), false, START_STATE);
            self.accept(version, lookahead);
            return;
        }

        // Second choice: skip the lookahead. Not worth it with too many
        // versions around, or when the lookahead changed the scanner state.
        if did_recover
            && (self.engine.stack.version_count() > MAX_VERSION_COUNT
                || lookahead.has_external_scanner_state_change())
        {
            self.engine.stack.halt(version);
            return;
        }

        let new_cost = current_error_cost
            + ERROR_COST_PER_SKIPPED_TREE
            + u32::from(lookahead.total_bytes()) * ERROR_COST_PER_SKIPPED_CHAR
            + lookahead.total_size().extent.row * ERROR_COST_PER_SKIPPED_LINE;
        if self.better_version_exists(version, false, new_cost) {
            self.engine.stack.halt(version);
            return;
        }

        // Extras are skipped as extras, so they add no cost.
        let is_extra = matches!(
            language.actions(START_STATE, lookahead.symbol()).last(),
            Some(ParseAction::Shift { extra: true, .. })
        );
        if is_extra {
            lookahead.make_mut().set_extra(true);
        }

        log!(self, "skip_token symbol:{}", language.symbol_name(lookahead.symbol()));
        let last_external_token = lookahead.last_external_token().cloned();
        let mut error_repeat = Subtree::new_node(ERROR_REPEAT, vec![lookahead], 0, language);

        // Tokens already skipped sit in an ERROR_REPEAT on top of the stack.
        // Nest that one inside the new node.
        if node_count_since_error > 0 {
            let mut slices = self.engine.stack.pop_count(version, 1);
            if slices.len() > 1 {
                slices.truncate(1);
                let keep = slices[0].version + 1;
                while self.engine.stack.version_count() > keep {
                    self.engine.stack.remove_version(keep);
                }
            }
            if let Some(slice) = slices.pop() {
                self.engine.stack.renumber_version(slice.version, version);
                let mut subtrees = slice.subtrees;
                subtrees.push(error_repeat);
                error_repeat = Subtree::new_node(ERROR_REPEAT, subtrees, 0, language);
            }
        }

        self.engine.stack.push(version, Some(error_repeat), false, ERROR_STATE);
        if last_external_token.is_some() {
            self.engine.stack.set_last_external_token(version, last_external_token);
        }

        let mut has_error = true;
        for other in 0..self.engine.stack.version_count() {
            if !self.version_status(other).is_in_error {
                has_error = false;
                break;
            }
        }
        self.engine.has_error = has_error;
    }
}
