//! The main parse loop: advancing stack versions token by token, lexing and
//! reusing subtrees from the previous tree.

use std::sync::atomic::Ordering;
use std::time::Instant;

use loam_language::{
    END, ERROR, ERROR_STATE, Language, LexMode, ParseAction, SERIALIZATION_BUFFER_SIZE, START_STATE,
    StateId, TableEntry,
};
use loam_lexer::TextInput;
use loam_span::{Length, TextSize, included_range_differences, ranges_intersect};
use loam_tree::{Subtree, Tree, external_scanner_state_eq};

use crate::parser::{Engine, ParseState, ProgressFn, TokenCache};
use crate::stack::StackVersion;

const OP_COUNT_PER_TIMEOUT_CHECK: u32 = 100;

/// One call to parse: the parser's persistent state together with the
/// language, input and callbacks of this call.
pub(crate) struct Session<'a, 'i, 'p> {
    pub(crate) engine: &'a mut Engine,
    pub(crate) language: &'a Language,
    pub(crate) input: &'a mut (dyn TextInput + 'i),
    pub(crate) progress: Option<&'a mut ProgressFn<'p>>,
}

impl<'a> Session<'a, '_, '_> {
    pub(crate) fn run(&mut self, old_tree: Option<&Tree>) -> Option<Tree> {
        if self.has_outstanding_parse() {
            log!(self, "resume_parsing");
            tracing::debug!(target: "loam", "resuming halted parse");
        } else {
            self.engine.external_scanner =
                self.language.external_scanner().map(|scanner| (scanner.create)());
            match old_tree {
                Some(old_tree) => {
                    self.engine.included_range_differences = included_range_differences(
                        old_tree.included_ranges(),
                        self.engine.lexer.included_ranges(),
                    );
                    self.engine.reusable_node.reset(old_tree.root_subtree());
                    log!(self, "parse_after_edit");
                    self.log_tree(old_tree.root_subtree());
                    for index in 0..self.engine.included_range_differences.len() {
                        let range = self.engine.included_range_differences[index];
                        log!(
                            self,
                            "different_included_range {} - {}",
                            u32::from(range.start_byte),
                            u32::from(range.end_byte)
                        );
                    }
                    tracing::debug!(target: "loam", "starting incremental parse");
                }
                None => {
                    self.engine.reusable_node.clear();
                    log!(self, "new_parse");
                    tracing::debug!(target: "loam", "starting parse");
                }
            }
        }

        if !self.engine.canceled_balancing {
            let mut last_position = 0;
            loop {
                let mut version = 0;
                let mut version_count;
                let mut position = 0;
                loop {
                    version_count = self.engine.stack.version_count();
                    if version >= version_count {
                        break;
                    }
                    let allow_node_reuse = version_count == 1;
                    while self.engine.stack.is_active(version) {
                        let stack_position = self.engine.stack.position(version);
                        log!(
                            self,
                            "process version:{version}, version_count:{}, state:{}, row:{}, col:{}",
                            self.engine.stack.version_count(),
                            self.engine.stack.state(version),
                            stack_position.extent.row,
                            stack_position.extent.column
                        );
                        if !self.advance(version, allow_node_reuse) {
                            tracing::debug!(target: "loam", "parse halted");
                            return None;
                        }
                        self.log_stack();

                        position = u32::from(self.engine.stack.position(version).bytes);
                        if position > last_position || (version > 0 && position == last_position) {
                            last_position = position;
                            break;
                        }
                    }
                    version += 1;
                }

                // Drop in-progress versions once a finished tree beats them
                // all, so that its nodes are no longer shared with the stack.
                let min_error_cost = self.condense_stack();
                let finished_cost = self.engine.finished_tree.as_ref().map(Subtree::error_cost);
                if finished_cost.is_some_and(|cost| cost < min_error_cost) {
                    self.engine.stack.clear();
                    break;
                }

                let engine = &mut *self.engine;
                while let Some(range) =
                    engine.included_range_differences.get(engine.included_range_difference_index)
                {
                    if u32::from(range.end_byte) <= position {
                        engine.included_range_difference_index += 1;
                    } else {
                        break;
                    }
                }

                if version_count == 0 {
                    break;
                }
            }
        }

        let Some(mut root) = self.engine.finished_tree.take() else {
            tracing::error!(target: "loam", "parse ended without a tree");
            self.engine.reset();
            return None;
        };
        self.engine.stack.clear();
        self.engine.token_cache = TokenCache::default();
        let language = self.language;
        if !root.balance_with(language, || self.check_progress(None)) {
            self.engine.finished_tree = Some(root);
            self.engine.canceled_balancing = true;
            tracing::debug!(target: "loam", "parse halted while balancing");
            return None;
        }
        self.engine.canceled_balancing = false;
        log!(self, "done");
        self.log_tree(&root);
        tracing::debug!(target: "loam", error_cost = root.error_cost(), "finished parse");

        let tree = Tree::new(root, language.clone(), self.engine.lexer.included_ranges().to_vec());
        self.engine.reset();
        Some(tree)
    }

    fn has_outstanding_parse(&mut self) -> bool {
        let engine = &mut *self.engine;
        engine.canceled_balancing
            || engine.external_scanner.is_some()
            || engine.stack.state(0) != START_STATE
            || engine.stack.node_count_since_error(0) != 0
    }

    /// Counts one unit of work and, every so often, asks whether the parse
    /// should halt. Returns `false` to halt.
    pub(crate) fn check_progress(&mut self, position: Option<u32>) -> bool {
        let engine = &mut *self.engine;
        engine.operation_count += 1;
        if engine.operation_count >= OP_COUNT_PER_TIMEOUT_CHECK {
            engine.operation_count = 0;
        }
        if let Some(position) = position {
            engine.parse_state =
                ParseState { current_byte_offset: position as usize, has_error: engine.has_error };
        }
        if engine.operation_count != 0 {
            return true;
        }

        let canceled = engine
            .cancellation_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed) != 0);
        let timed_out = engine.end_time.is_some_and(|end_time| Instant::now() > end_time);
        let parse_state = engine.parse_state;
        let vetoed = !canceled
            && !timed_out
            && self.progress.as_deref_mut().is_some_and(|callback| callback(&parse_state).is_break());
        !(canceled || timed_out || vetoed)
    }

    /// Takes one step on a stack version: shifts a token, performs the
    /// reductions it calls for, or pauses the version at an error. Returns
    /// `false` if the parse was halted.
    fn advance(&mut self, version: StackVersion, allow_node_reuse: bool) -> bool {
        let language: &'a Language = self.language;
        let mut state = self.engine.stack.state(version);
        let position = u32::from(self.engine.stack.position(version).bytes);
        let last_external_token = self.engine.stack.last_external_token(version).cloned();

        let mut did_reuse = true;
        let mut lookahead: Option<Subtree> = None;
        let mut table_entry: &'a TableEntry = language.table_entry(state, ERROR);

        if allow_node_reuse {
            if let Some((tree, entry)) =
                self.reuse_node(version, &mut state, position, last_external_token.as_ref())
            {
                lookahead = Some(tree);
                table_entry = entry;
            }
        }

        let mut needs_lex = false;
        if lookahead.is_none() {
            did_reuse = false;
            match self.cached_token(state, position, last_external_token.as_ref()) {
                Some((token, entry)) => {
                    lookahead = Some(token);
                    table_entry = entry;
                }
                None => needs_lex = true,
            }
        }

        loop {
            if needs_lex {
                needs_lex = false;
                lookahead = self.lex(version, state);
                match &lookahead {
                    Some(token) => {
                        self.engine.token_cache = TokenCache {
                            token: Some(token.clone()),
                            last_external_token: last_external_token.clone(),
                            byte_index: position,
                        };
                        table_entry = language.table_entry(state, token.symbol());
                    }
                    None => table_entry = language.table_entry(state, END),
                }
            }

            if !self.check_progress(Some(position)) {
                return false;
            }

            let mut last_reduction_version = None;
            for action in &table_entry.actions {
                match *action {
                    ParseAction::Shift { state: shift_state, extra, repetition } => {
                        if repetition {
                            continue;
                        }
                        let Some(mut token) = lookahead.take() else {
                            continue;
                        };
                        let mut next_state = if extra {
                            log!(self, "shift_extra");
                            state
                        } else {
                            log!(self, "shift state:{shift_state}");
                            shift_state
                        };
                        if token.child_count() > 0 {
                            self.breakdown_lookahead(&mut token, state);
                            next_state = language.next_state(state, token.symbol());
                        }
                        self.shift(version, next_state, token, extra);
                        if did_reuse {
                            self.engine.reusable_node.advance();
                        }
                        return true;
                    }
                    ParseAction::Reduce { symbol, child_count, dynamic_precedence, production_id } => {
                        let is_fragile = table_entry.actions.len() > 1;
                        let end_of_non_terminal_extra = lookahead.is_none();
                        log!(
                            self,
                            "reduce sym:{}, child_count:{child_count}",
                            language.symbol_name(symbol)
                        );
                        if let Some(reduction_version) = self.reduce(
                            version,
                            symbol,
                            u32::from(child_count),
                            i32::from(dynamic_precedence),
                            production_id,
                            is_fragile,
                            end_of_non_terminal_extra,
                        ) {
                            last_reduction_version = Some(reduction_version);
                        }
                    }
                    ParseAction::Accept => {
                        let Some(token) = lookahead.take() else {
                            continue;
                        };
                        log!(self, "accept");
                        self.accept(version, token);
                        return true;
                    }
                    ParseAction::Recover => {
                        let Some(mut token) = lookahead.take() else {
                            continue;
                        };
                        if token.child_count() > 0 {
                            self.breakdown_lookahead(&mut token, ERROR_STATE);
                        }
                        self.recover(version, token);
                        if did_reuse {
                            self.engine.reusable_node.advance();
                        }
                        return true;
                    }
                }
            }

            // A reduction happened: continue with the lookahead in the state
            // it led to.
            if let Some(reduction_version) = last_reduction_version {
                self.engine.stack.renumber_version(reduction_version, version);
                self.log_stack();
                state = self.engine.stack.state(version);
                match &lookahead {
                    None => needs_lex = true,
                    Some(token) => table_entry = language.table_entry(state, token.leaf_symbol()),
                }
                continue;
            }

            let Some(mut token) = lookahead.take() else {
                self.engine.stack.halt(version);
                return true;
            };

            // A keyword that is invalid here may still be a valid word.
            let keyword_capture_token = language.keyword_capture_token();
            if token.is_keyword() && token.symbol() != keyword_capture_token {
                let entry = language.table_entry(state, keyword_capture_token);
                if !entry.is_empty() {
                    log!(
                        self,
                        "switch from_keyword:{}, to_word_token:{}",
                        language.symbol_name(token.symbol()),
                        language.symbol_name(keyword_capture_token)
                    );
                    token.make_mut().set_symbol(keyword_capture_token, language);
                    lookahead = Some(token);
                    table_entry = entry;
                    continue;
                }
            }

            if state == ERROR_STATE {
                self.recover(version, token);
                return true;
            }

            // A reused subtree that cannot be shifted here is broken down so
            // that its first token gets another chance.
            if self.breakdown_top_of_stack(version) {
                state = self.engine.stack.state(version);
                needs_lex = true;
                continue;
            }

            log!(self, "detect_error lookahead:{}", language.symbol_name(token.symbol()));
            self.engine.stack.pause(version, token);
            return true;
        }
    }

    /// Looks for a subtree of the previous tree that starts at `position` and
    /// can be shifted as a whole in `state`.
    fn reuse_node(
        &mut self,
        version: StackVersion,
        state: &mut StateId,
        position: u32,
        last_external_token: Option<&Subtree>,
    ) -> Option<(Subtree, &'a TableEntry)> {
        let language: &'a Language = self.language;
        while let Some(tree) = self.engine.reusable_node.tree() {
            let result = tree.clone();
            let byte_offset = self.engine.reusable_node.byte_offset();
            // An end-of-input node covers whatever included ranges follow it.
            let end_byte_offset = if result.is_eof() {
                u32::MAX
            } else {
                byte_offset + u32::from(result.total_bytes())
            };
            let name = language.symbol_name(result.symbol());

            if byte_offset > position {
                log!(self, "before_reusable_node symbol:{name}");
                break;
            }

            if byte_offset < position {
                log!(self, "past_reusable_node symbol:{name}");
                if end_byte_offset <= position || !self.engine.reusable_node.descend() {
                    self.engine.reusable_node.advance();
                }
                continue;
            }

            if !external_scanner_state_eq(
                self.engine.reusable_node.last_external_token(),
                last_external_token,
            ) {
                log!(self, "reusable_node_has_different_external_scanner_state symbol:{name}");
                self.engine.reusable_node.advance();
                continue;
            }

            let reason = if result.has_changes() {
                Some("has_changes")
            } else if result.is_error() {
                Some("is_error")
            } else if result.is_missing() {
                Some("is_missing")
            } else if result.is_fragile() {
                Some("is_fragile")
            } else if self.has_included_range_difference(byte_offset, end_byte_offset) {
                Some("contains_different_included_range")
            } else {
                None
            };
            if let Some(reason) = reason {
                log!(self, "cant_reuse_node_{reason} tree:{name}");
                if !self.engine.reusable_node.descend() {
                    self.engine.reusable_node.advance();
                    self.breakdown_top_of_stack(version);
                    *state = self.engine.stack.state(version);
                }
                continue;
            }

            let leaf_symbol = result.leaf_symbol();
            let table_entry = language.table_entry(*state, leaf_symbol);
            if !self.can_reuse_first_leaf(*state, &result, table_entry) {
                log!(
                    self,
                    "cant_reuse_node symbol:{name}, first_leaf_symbol:{}",
                    language.symbol_name(leaf_symbol)
                );
                self.engine.reusable_node.advance_past_leaf();
                break;
            }

            log!(self, "reuse_node symbol:{name}");
            return Some((result, table_entry));
        }
        None
    }

    fn has_included_range_difference(&self, start: u32, end: u32) -> bool {
        ranges_intersect(
            &self.engine.included_range_differences,
            self.engine.included_range_difference_index,
            TextSize::new(start),
            TextSize::new(end),
        )
    }

    /// Whether a token lexed in another state would have come out the same
    /// if it had been lexed in `state`.
    fn can_reuse_first_leaf(&self, state: StateId, tree: &Subtree, table_entry: &TableEntry) -> bool {
        let language = self.language;
        let current_lex_mode = language.lex_mode(state);
        let leaf_symbol = tree.leaf_symbol();
        let leaf_lex_mode = language.lex_mode(tree.leaf_parse_state());

        // At the end of a non-terminal extra the lexer is not consulted.
        if current_lex_mode == LexMode::END_OF_NON_TERMINAL_EXTRA {
            return false;
        }

        if !table_entry.is_empty()
            && leaf_lex_mode == current_lex_mode
            && (leaf_symbol != language.keyword_capture_token()
                || (!tree.is_keyword() && tree.parse_state() == state))
        {
            return true;
        }

        // Empty tokens are only reusable in states with the same lookaheads.
        if u32::from(tree.size().bytes) == 0 && leaf_symbol != END {
            return false;
        }

        current_lex_mode.external_lex_state == 0 && table_entry.reusable
    }

    fn cached_token(
        &self,
        state: StateId,
        position: u32,
        last_external_token: Option<&Subtree>,
    ) -> Option<(Subtree, &'a TableEntry)> {
        let language: &'a Language = self.language;
        let cache = &self.engine.token_cache;
        let token = cache.token.as_ref()?;
        if cache.byte_index != position
            || !external_scanner_state_eq(cache.last_external_token.as_ref(), last_external_token)
        {
            return None;
        }
        let table_entry = language.table_entry(state, token.symbol());
        self.can_reuse_first_leaf(state, token, table_entry).then(|| (token.clone(), table_entry))
    }

    /// Lexes the next token for `version`, which is in `parse_state`.
    /// Returns `None` where a non-terminal extra ends and no token is needed.
    fn lex(&mut self, version: StackVersion, parse_state: StateId) -> Option<Subtree> {
        let language: &'a Language = self.language;
        let mut lex_mode = language.lex_mode(parse_state);
        if lex_mode == LexMode::END_OF_NON_TERMINAL_EXTRA {
            log!(self, "no_lookahead_after_non_terminal_extra");
            return None;
        }

        let start_position = self.engine.stack.position(version);
        let external_token = self.engine.stack.last_external_token(version).cloned();

        let mut found_external_token = false;
        let mut error_mode = parse_state == ERROR_STATE;
        let mut skipped_error = false;
        let mut called_get_column = false;
        let mut first_error_character = '\0';
        let mut error_start_position = Length::ZERO;
        let mut error_end_position = Length::ZERO;
        let mut lookahead_end_byte = 0;
        let mut scanner_state = [0; SERIALIZATION_BUFFER_SIZE];
        let mut scanner_state_len = 0;
        let mut scanner_state_changed = false;
        self.engine.lexer.reset(start_position);

        loop {
            let current_position = self.engine.lexer.current_position();

            if lex_mode.external_lex_state != 0 {
                log!(
                    self,
                    "lex_external state:{}, row:{}, column:{}",
                    lex_mode.external_lex_state,
                    current_position.extent.row,
                    current_position.extent.column
                );
                let engine = &mut *self.engine;
                let scanner = engine.external_scanner.as_mut();
                let valid_tokens = language.enabled_external_tokens(lex_mode.external_lex_state);
                if let (Some(scanner), Some(valid_tokens)) = (scanner, valid_tokens) {
                    let mut session = engine.lexer.session(&mut *self.input);
                    session.start();
                    scanner.deserialize(
                        external_token.as_ref().map_or(&[][..], Subtree::external_scanner_state),
                    );
                    let mut found = scanner.scan(&mut session, valid_tokens);
                    engine.lexer.finish(&mut lookahead_end_byte);

                    if found {
                        scanner_state_len =
                            scanner.serialize(&mut scanner_state).min(SERIALIZATION_BUFFER_SIZE);
                        let previous_state = external_token
                            .as_ref()
                            .map_or(&[][..], Subtree::external_scanner_state);
                        scanner_state_changed = previous_state != &scanner_state[..scanner_state_len];

                        // An empty token that leaves the scanner unchanged
                        // would be produced forever.
                        if engine.lexer.token_end_position().bytes <= current_position.bytes
                            && !scanner_state_changed
                        {
                            let symbol = external_symbol(language, engine.lexer.result_symbol());
                            let token_is_extra =
                                language.next_state(parse_state, symbol) == parse_state;
                            if error_mode
                                || !engine.stack.has_advanced_since_error(version)
                                || token_is_extra
                            {
                                found = false;
                                log!(
                                    self,
                                    "ignore_empty_external_token symbol:{}",
                                    language.symbol_name(symbol)
                                );
                            }
                        }
                    }

                    if found {
                        found_external_token = true;
                        called_get_column = self.engine.lexer.did_get_column();
                        break;
                    }
                    self.engine.lexer.reset(current_position);
                }
            }

            log!(
                self,
                "lex_internal state:{}, row:{}, column:{}",
                lex_mode.lex_state,
                current_position.extent.row,
                current_position.extent.column
            );
            let engine = &mut *self.engine;
            let mut session = engine.lexer.session(&mut *self.input);
            session.start();
            let found = (language.lex_fn())(&mut session, lex_mode.lex_state);
            engine.lexer.finish(&mut lookahead_end_byte);
            if found {
                called_get_column = engine.lexer.did_get_column();
                break;
            }

            if !error_mode {
                error_mode = true;
                lex_mode = language.lex_mode(ERROR_STATE);
                engine.lexer.reset(start_position);
                continue;
            }

            if !skipped_error {
                log!(self, "skip_unrecognized_character");
                skipped_error = true;
                let lexer = &self.engine.lexer;
                error_start_position = lexer.token_start_position();
                error_end_position = lexer.token_start_position();
                first_error_character = lexer.lookahead();
            }

            let lexer = &mut self.engine.lexer;
            if lexer.current_position().bytes == error_end_position.bytes {
                if lexer.eof() {
                    lexer.set_result_symbol(ERROR);
                    break;
                }
                lexer.advance(&mut *self.input, false);
            }
            error_end_position = lexer.current_position();
        }

        let token = if skipped_error {
            let padding = error_start_position - start_position;
            let size = error_end_position - error_start_position;
            let lookahead_bytes =
                lookahead_end_byte.saturating_sub(u32::from(error_end_position.bytes));
            Subtree::new_error(
                first_error_character,
                padding,
                size,
                lookahead_bytes,
                parse_state,
                language,
            )
        } else {
            let lexer = &mut self.engine.lexer;
            let mut symbol = lexer.result_symbol();
            let token_start = lexer.token_start_position();
            let token_end = lexer.token_end_position();
            let padding = token_start - start_position;
            let size = token_end - token_start;
            let lookahead_bytes = lookahead_end_byte.saturating_sub(u32::from(token_end.bytes));
            let mut is_keyword = false;

            if found_external_token {
                symbol = external_symbol(language, symbol);
            } else if symbol == language.keyword_capture_token() && symbol != END {
                if let Some(keyword_lex_fn) = language.keyword_lex_fn() {
                    lexer.reset(token_start);
                    let mut session = lexer.session(&mut *self.input);
                    session.start();
                    is_keyword = keyword_lex_fn(&mut session, 0);
                    let keyword = lexer.result_symbol();
                    if is_keyword
                        && lexer.token_end_position().bytes == token_end.bytes
                        && language.has_actions(parse_state, keyword)
                    {
                        symbol = keyword;
                    }
                }
            }

            let mut token =
                Subtree::new_leaf(symbol, padding, size, lookahead_bytes, parse_state, language);
            let data = token.make_mut();
            data.set_is_keyword(is_keyword);
            data.set_depends_on_column(called_get_column);
            if found_external_token {
                data.set_external_scanner_state(
                    &scanner_state[..scanner_state_len],
                    scanner_state_changed,
                );
            }
            token
        };

        log!(
            self,
            "lexed_lookahead sym:{}, size:{}",
            language.symbol_name(token.symbol()),
            u32::from(token.total_bytes())
        );
        Some(token)
    }

    /// Replaces the subtree on top of the stack that was shifted whole from
    /// the previous tree with its children.
    pub(crate) fn breakdown_top_of_stack(&mut self, version: StackVersion) -> bool {
        let language = self.language;
        let mut did_break_down = false;
        loop {
            let slices = self.engine.stack.pop_pending(version);
            if slices.is_empty() {
                break;
            }
            did_break_down = true;
            let mut pending = false;

            for slice in slices {
                let mut state = self.engine.stack.state(slice.version);
                let mut subtrees = slice.subtrees.into_iter();
                let Some(parent) = subtrees.next() else {
                    continue;
                };

                for child in parent.children() {
                    pending = child.child_count() > 0;
                    if child.is_error() {
                        state = ERROR_STATE;
                    } else if !child.extra() {
                        state = language.next_state(state, child.symbol());
                    }
                    self.engine.stack.push(slice.version, Some(child.clone()), pending, state);
                }
                for tree in subtrees {
                    self.engine.stack.push(slice.version, Some(tree), false, state);
                }

                log!(self, "breakdown_top_of_stack tree:{}", language.symbol_name(parent.symbol()));
                self.log_stack();
            }

            if !pending {
                break;
            }
        }
        did_break_down
    }

    /// Descends from a reused lookahead to the first of its descendants that
    /// was parsed in `state`.
    pub(crate) fn breakdown_lookahead(&mut self, lookahead: &mut Subtree, state: StateId) {
        let mut descendant = None;
        while let Some(tree) = self.engine.reusable_node.tree() {
            if tree.child_count() == 0 || tree.parse_state() == state {
                break;
            }
            log!(self, "state_mismatch sym:{}", self.language.symbol_name(tree.symbol()));
            self.engine.reusable_node.descend();
            descendant = self.engine.reusable_node.tree().cloned();
        }
        if let Some(tree) = descendant {
            *lookahead = tree;
        }
    }

    pub(crate) fn log_stack(&mut self) {
        let engine = &mut *self.engine;
        if let Some(out) = &mut engine.dot_graph {
            let result = engine
                .stack
                .print_dot_graph(self.language, out)
                .and_then(|()| out.write_all(b"\n\n"));
            if let Err(error) = result {
                tracing::warn!(%error, "failed to write dot graph");
            }
        }
    }

    pub(crate) fn log_tree(&mut self, tree: &Subtree) {
        if let Some(out) = &mut self.engine.dot_graph {
            if let Err(error) = tree.print_dot_graph(self.language, out) {
                tracing::warn!(%error, "failed to write dot graph");
            }
        }
    }
}

/// Maps an external scanner's token index to its grammar symbol.
fn external_symbol(language: &Language, index: u16) -> u16 {
    language
        .external_scanner()
        .and_then(|scanner| scanner.symbol_map.get(index as usize).copied())
        .unwrap_or(ERROR)
}
