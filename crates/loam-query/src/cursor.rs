use std::cell::RefCell;
use std::cmp::{Ordering, Reverse};
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{ControlFlow, Range};
use std::rc::Rc;
use std::time::{Duration, Instant};

use loam_language::ERROR;
use loam_span::Point;
use loam_tree::{CursorStatus, CursorStep, Node, TreeCursor};

use crate::query::{PatternEntry, Query, StepFlags, WILDCARD_SYMBOL};
use crate::TextProvider;

/// Operations between checks of the timeout and the progress callback.
const OPERATIONS_PER_CHECK: u32 = 100;
/// Largest accepted match limit.
const MAX_MATCH_LIMIT: u32 = 1 << 16;

/// A caller hook consulted while a query runs. Returning `Break` halts the
/// iteration.
pub(crate) type QueryProgressFn<'a> = dyn FnMut(&QueryCursorState) -> ControlFlow<()> + 'a;

/// Where a query execution currently stands, as reported to progress
/// callbacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryCursorState {
    pub(crate) current_byte_offset: usize,
}

impl QueryCursorState {
    pub fn current_byte_offset(&self) -> usize {
        self.current_byte_offset
    }
}

/// Per-call options for [`QueryCursor::matches_with_options`] and
/// [`QueryCursor::captures_with_options`].
#[derive(Default)]
pub struct QueryCursorOptions<'a> {
    pub(crate) progress_callback: Option<&'a mut QueryProgressFn<'a>>,
}

impl<'a> QueryCursorOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a callback that is invoked periodically while matching and
    /// may halt it. Matches found before the halt are still returned.
    #[must_use]
    pub fn progress_callback<F: FnMut(&QueryCursorState) -> ControlFlow<()>>(
        mut self,
        callback: &'a mut F,
    ) -> Self {
        self.progress_callback = Some(callback);
        self
    }
}

impl fmt::Debug for QueryCursorOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCursorOptions")
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

/// A node captured by a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryCapture<'tree> {
    pub node: Node<'tree>,
    pub index: u32,
}

/// A completed match of one pattern.
#[derive(Debug)]
pub struct QueryMatch<'tree> {
    pub pattern_index: usize,
    pub captures: Vec<QueryCapture<'tree>>,
    id: u32,
    removed: Rc<RefCell<Vec<u32>>>,
}

impl<'tree> QueryMatch<'tree> {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Drops the match from the cursor, so that no further captures of it
    /// are returned.
    pub fn remove(&self) {
        self.removed.borrow_mut().push(self.id);
    }

    pub fn nodes_for_capture_index(&self, index: u32) -> impl Iterator<Item = Node<'tree>> + '_ {
        self.captures.iter().filter(move |capture| capture.index == index).map(|capture| capture.node)
    }

    fn satisfies_text_predicates<T, I>(
        &self,
        query: &Query,
        text_provider: &mut T,
        buffers: &mut (Vec<u8>, Vec<u8>),
    ) -> bool
    where
        T: TextProvider<I>,
        I: AsRef<[u8]>,
    {
        query
            .text_predicates(self.pattern_index)
            .iter()
            .all(|predicate| predicate.is_satisfied(&self.captures, text_provider, buffers))
    }
}

/// Range restrictions and limits shared by every execution of a cursor.
#[derive(Debug, Clone, Copy)]
struct Settings {
    start_byte: usize,
    end_byte: usize,
    start_point: Point,
    end_point: Point,
    max_start_depth: u32,
    match_limit: u32,
    timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            start_byte: 0,
            end_byte: usize::MAX,
            start_point: Point::ZERO,
            end_point: Point::MAX,
            max_start_depth: u32::MAX,
            match_limit: u32::MAX,
            timeout: None,
        }
    }
}

impl Settings {
    /// Whether `node` ends before the range starts. An empty node at the
    /// start of the range is inside it.
    fn precedes(&self, node: Node<'_>) -> bool {
        (node.end_byte() <= self.start_byte && node.start_byte() < self.start_byte)
            || (node.end_position() <= self.start_point && node.start_position() < self.start_point)
    }

    fn follows(&self, node: Node<'_>) -> bool {
        node.start_byte() >= self.end_byte || node.start_position() >= self.end_point
    }

    fn set_byte_range(&mut self, range: Range<usize>) {
        let end = if range.end == 0 { usize::MAX } else { range.end };
        if range.start <= end {
            self.start_byte = range.start;
            self.end_byte = end;
        }
    }

    fn set_point_range(&mut self, range: Range<Point>) {
        let end = if range.end == Point::ZERO { Point::MAX } else { range.end };
        if range.start <= end {
            self.start_point = range.start;
            self.end_point = end;
        }
    }
}

/// Runs queries over syntax trees.
///
/// A cursor holds the range restrictions and limits applied to each
/// execution, and reports whether the last one ran out of room for
/// in-progress matches.
#[derive(Debug, Default)]
pub struct QueryCursor {
    settings: Settings,
    did_exceed_match_limit: bool,
}

impl QueryCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn match_limit(&self) -> u32 {
        self.settings.match_limit
    }

    /// Bounds the number of in-progress matches that may hold captures at
    /// once. The limit is clamped to `1..=65536`.
    pub fn set_match_limit(&mut self, limit: u32) {
        self.settings.match_limit = limit.clamp(1, MAX_MATCH_LIMIT);
    }

    /// Whether the last execution had to drop in-progress matches because
    /// of the match limit.
    pub fn did_exceed_match_limit(&self) -> bool {
        self.did_exceed_match_limit
    }

    pub fn timeout_micros(&self) -> u64 {
        self.settings.timeout.map_or(0, |timeout| timeout.as_micros() as u64)
    }

    /// Zero disables the timeout.
    pub fn set_timeout_micros(&mut self, timeout_micros: u64) {
        self.settings.timeout = (timeout_micros > 0).then(|| Duration::from_micros(timeout_micros));
    }

    /// Restricts matches to those that intersect `range`. An end of zero
    /// means the end of the input.
    pub fn set_byte_range(&mut self, range: Range<usize>) -> &mut Self {
        self.settings.set_byte_range(range);
        self
    }

    pub fn set_point_range(&mut self, range: Range<Point>) -> &mut Self {
        self.settings.set_point_range(range);
        self
    }

    /// Only starts matches on nodes at most `max_start_depth` levels below
    /// the node passed to the query. `None` removes the restriction.
    pub fn set_max_start_depth(&mut self, max_start_depth: Option<u32>) -> &mut Self {
        self.settings.max_start_depth = max_start_depth.unwrap_or(u32::MAX);
        self
    }

    /// Iterates the matches of `query` inside `node` in the order they
    /// complete.
    pub fn matches<'query, 'tree, T, I>(
        &'query mut self,
        query: &'query Query,
        node: Node<'tree>,
        text_provider: T,
    ) -> QueryMatches<'query, 'tree, T, I>
    where
        T: TextProvider<I>,
        I: AsRef<[u8]>,
    {
        self.matches_with_options(query, node, text_provider, QueryCursorOptions::default())
    }

    pub fn matches_with_options<'query, 'tree, T, I>(
        &'query mut self,
        query: &'query Query,
        node: Node<'tree>,
        text_provider: T,
        options: QueryCursorOptions<'query>,
    ) -> QueryMatches<'query, 'tree, T, I>
    where
        T: TextProvider<I>,
        I: AsRef<[u8]>,
    {
        self.did_exceed_match_limit = false;
        QueryMatches {
            exec: Execution::new(query, node, self.settings),
            cursor: self,
            text_provider,
            buffers: Default::default(),
            progress: options.progress_callback,
            removed: Rc::default(),
            _phantom: PhantomData,
        }
    }

    /// Iterates individual captures of `query` inside `node` in order of
    /// their position in the text.
    pub fn captures<'query, 'tree, T, I>(
        &'query mut self,
        query: &'query Query,
        node: Node<'tree>,
        text_provider: T,
    ) -> QueryCaptures<'query, 'tree, T, I>
    where
        T: TextProvider<I>,
        I: AsRef<[u8]>,
    {
        self.captures_with_options(query, node, text_provider, QueryCursorOptions::default())
    }

    pub fn captures_with_options<'query, 'tree, T, I>(
        &'query mut self,
        query: &'query Query,
        node: Node<'tree>,
        text_provider: T,
        options: QueryCursorOptions<'query>,
    ) -> QueryCaptures<'query, 'tree, T, I>
    where
        T: TextProvider<I>,
        I: AsRef<[u8]>,
    {
        self.did_exceed_match_limit = false;
        QueryCaptures {
            exec: Execution::new(query, node, self.settings),
            cursor: self,
            text_provider,
            buffers: Default::default(),
            progress: options.progress_callback,
            removed: Rc::default(),
            _phantom: PhantomData,
        }
    }
}

/// A partial match of one pattern.
#[derive(Debug, Clone)]
struct State<'tree> {
    id: Option<u32>,
    pattern_index: usize,
    step_index: usize,
    start_depth: u32,
    consumed_capture_count: usize,
    /// Present once the state has claimed one of the limited capture lists.
    captures: Option<Vec<QueryCapture<'tree>>>,
    seeking_immediate_match: bool,
    has_in_progress_alternatives: bool,
    dead: bool,
}

/// The walk of one query over one tree.
struct Execution<'query, 'tree> {
    query: &'query Query,
    cursor: TreeCursor<'tree>,
    settings: Settings,
    states: Vec<State<'tree>>,
    finished: Vec<State<'tree>>,
    depth: u32,
    on_visible_node: bool,
    ascending: bool,
    halted: bool,
    did_exceed_match_limit: bool,
    capture_lists_in_use: u32,
    next_state_id: u32,
    operation_count: u32,
    end_time: Option<Instant>,
}

impl<'query, 'tree> Execution<'query, 'tree> {
    fn new(query: &'query Query, node: Node<'tree>, settings: Settings) -> Self {
        tracing::debug!(
            target: "loam",
            patterns = query.pattern_count(),
            node = node.kind(),
            "query execution started"
        );
        Self {
            query,
            cursor: TreeCursor::new(node),
            settings,
            states: Vec::new(),
            finished: Vec::new(),
            depth: 0,
            on_visible_node: true,
            ascending: false,
            halted: false,
            did_exceed_match_limit: false,
            capture_lists_in_use: 0,
            next_state_id: 0,
            operation_count: 0,
            end_time: settings.timeout.map(|timeout| Instant::now() + timeout),
        }
    }

    fn release(&mut self, state: &State<'tree>) {
        if state.captures.is_some() {
            self.capture_lists_in_use = self.capture_lists_in_use.saturating_sub(1);
        }
    }

    fn take_id(&mut self) -> u32 {
        let id = self.next_state_id;
        self.next_state_id = self.next_state_id.wrapping_add(1);
        id
    }

    fn remove_state(&mut self, index: usize) {
        let state = self.states.remove(index);
        self.release(&state);
    }

    /// The in-progress state whose next unreturned capture comes first, as
    /// `(index, start byte, pattern index)`. Captures before the range are
    /// skipped along the way.
    fn first_in_progress_capture(&mut self) -> Option<(usize, usize, usize)> {
        let mut result: Option<(usize, usize, usize)> = None;
        let mut index = 0;
        while index < self.states.len() {
            let state = &mut self.states[index];
            let next = match &state.captures {
                Some(captures) if !state.dead => captures.get(state.consumed_capture_count).map(|capture| capture.node),
                _ => None,
            };
            let Some(node) = next else {
                index += 1;
                continue;
            };
            if self.settings.precedes(node) {
                state.consumed_capture_count += 1;
                continue;
            }
            let start = node.start_byte();
            let pattern_index = state.pattern_index;
            let is_better = result.is_none_or(|(_, best_start, best_pattern)| {
                start < best_start || (start == best_start && pattern_index < best_pattern)
            });
            if is_better {
                result = Some((index, start, pattern_index));
            }
            index += 1;
        }
        result
    }

    /// Claims a capture list, taking one from the in-progress state with the
    /// earliest unreturned capture when the limit is reached. That state is
    /// killed. `preserve` is never chosen.
    fn acquire_capture_list(&mut self, preserve: Option<usize>) -> bool {
        if self.capture_lists_in_use < self.settings.match_limit {
            self.capture_lists_in_use += 1;
            return true;
        }
        self.did_exceed_match_limit = true;
        let victim = self.first_in_progress_capture().map(|(index, ..)| index).filter(|&index| Some(index) != preserve);
        let Some(victim) = victim else {
            return false;
        };
        let state = &mut self.states[victim];
        tracing::trace!(
            target: "loam",
            pattern = state.pattern_index,
            "match limit reached, dropping in-progress match"
        );
        state.dead = true;
        state.captures = None;
        true
    }

    fn add_capture(&mut self, index: usize, node: Node<'tree>, capture_ids: &[u32]) {
        if self.states[index].dead {
            return;
        }
        if self.states[index].captures.is_none() {
            if !self.acquire_capture_list(None) {
                self.states[index].dead = true;
                return;
            }
            self.states[index].captures = Some(Vec::new());
        }
        if let Some(captures) = &mut self.states[index].captures {
            captures.extend(capture_ids.iter().map(|&capture| QueryCapture { node, index: capture }));
        }
    }

    /// Inserts a copy of the state at `index` at position `at`.
    fn copy_state(&mut self, index: usize, at: usize) -> bool {
        let copy = self.states[index].clone();
        if copy.captures.is_some() && !self.acquire_capture_list(Some(index)) {
            return false;
        }
        self.states.insert(at, copy);
        true
    }

    fn add_state(&mut self, entry: PatternEntry) {
        let step = &self.query.steps[entry.step_index];
        let start_depth = self.depth - u32::from(step.depth);

        // Keep states ordered by start depth, then by pattern.
        let mut index = self.states.len();
        while index > 0 {
            let previous = &self.states[index - 1];
            if previous.start_depth < start_depth {
                break;
            }
            if previous.start_depth == start_depth {
                if previous.pattern_index < entry.pattern_index {
                    break;
                }
                if previous.pattern_index == entry.pattern_index && previous.step_index == entry.step_index {
                    return;
                }
            }
            index -= 1;
        }

        tracing::trace!(
            target: "loam",
            pattern = entry.pattern_index,
            step = entry.step_index,
            depth = start_depth,
            "start state"
        );
        self.states.insert(
            index,
            State {
                id: None,
                pattern_index: entry.pattern_index,
                step_index: entry.step_index,
                start_depth,
                consumed_capture_count: 0,
                captures: None,
                seeking_immediate_match: true,
                has_in_progress_alternatives: false,
                dead: false,
            },
        );
    }

    fn should_stop(&mut self, progress: &mut Option<&mut QueryProgressFn<'_>>) -> bool {
        self.operation_count += 1;
        if self.operation_count < OPERATIONS_PER_CHECK {
            return false;
        }
        self.operation_count = 0;
        if self.end_time.is_some_and(|end_time| Instant::now() > end_time) {
            tracing::debug!(target: "loam", "query timed out");
            return true;
        }
        if let Some(progress) = progress.as_deref_mut() {
            let state = QueryCursorState { current_byte_offset: self.cursor.node().start_byte() };
            if progress(&state).is_break() {
                tracing::debug!(target: "loam", "query cancelled by progress callback");
                return true;
            }
        }
        false
    }

    fn halt(&mut self) {
        self.halted = true;
        for state in mem::take(&mut self.states) {
            self.release(&state);
        }
    }

    /// Walks the tree until at least one match finishes. Returns `false`
    /// when the walk is over.
    fn advance(&mut self, progress: &mut Option<&mut QueryProgressFn<'_>>) -> bool {
        let mut did_match = false;
        loop {
            if self.halted {
                return did_match;
            }
            if did_match {
                return true;
            }
            if self.should_stop(progress) {
                self.halt();
                return did_match;
            }

            if self.ascending {
                did_match |= self.leave_node();
            } else {
                did_match |= self.enter_node();
            }
        }
    }

    /// Retires states that cannot continue past the current node and moves
    /// to the next one.
    fn leave_node(&mut self) -> bool {
        let mut did_match = false;
        if self.on_visible_node {
            let depth = self.depth;
            let mut index = 0;
            while index < self.states.len() {
                let state = &self.states[index];
                let step = &self.query.steps[state.step_index];
                if step.is_done() {
                    if state.start_depth > depth || depth == 0 {
                        let state = self.states.remove(index);
                        tracing::trace!(target: "loam", pattern = state.pattern_index, "finished match");
                        self.finished.push(state);
                        did_match = true;
                        continue;
                    }
                } else if state.start_depth + u32::from(step.depth) > depth {
                    self.remove_state(index);
                    continue;
                }
                index += 1;
            }
        }

        match self.cursor.goto_next_sibling_step() {
            CursorStep::Visible => {
                if !self.on_visible_node {
                    self.depth += 1;
                    self.on_visible_node = true;
                }
                self.ascending = false;
            }
            CursorStep::Hidden => {
                if self.on_visible_node {
                    self.depth -= 1;
                    self.on_visible_node = false;
                }
                self.ascending = false;
            }
            CursorStep::None => {
                if self.cursor.goto_parent() {
                    if self.on_visible_node {
                        self.depth -= 1;
                    } else {
                        self.on_visible_node = true;
                    }
                } else {
                    tracing::trace!(target: "loam", "query reached the end of the tree");
                    self.halt();
                }
            }
        }
        did_match
    }

    /// Starts and advances states on the current node, then decides whether
    /// to descend into it.
    fn enter_node(&mut self) -> bool {
        let node = self.cursor.node();
        let parent = self.cursor.parent_node();
        let settings = self.settings;
        let parent_precedes = parent.is_some_and(|parent| settings.precedes(parent));
        let parent_follows = parent.is_some_and(|parent| settings.follows(parent));
        let node_precedes = parent_precedes || settings.precedes(node);
        let node_follows = parent_follows || settings.follows(node);
        let parent_intersects = !parent_precedes && !parent_follows;
        let node_intersects = !node_precedes && !node_follows;

        if node_follows && self.states.is_empty() {
            tracing::trace!(target: "loam", "query passed the end of the range");
            self.halt();
            return false;
        }

        let mut did_match = false;
        if self.on_visible_node {
            let parent_is_error = parent.is_some_and(|parent| parent.kind_id() == ERROR);
            let status = self.cursor.current_status();
            self.start_states(node, &status, node_intersects, parent_intersects && !parent_is_error);
            self.update_states(node, &status);
            did_match = self.merge_states();
        }

        let mut needs_descent = node_intersects;
        if !needs_descent {
            let depth = self.depth;
            needs_descent = self.states.iter().any(|state| {
                let step = &self.query.steps[state.step_index];
                !step.is_done() && state.start_depth + u32::from(step.depth) > depth
            });
        }
        if needs_descent {
            match self.cursor.goto_first_child_step() {
                CursorStep::Visible => {
                    self.depth += 1;
                    self.on_visible_node = true;
                    return did_match;
                }
                CursorStep::Hidden => {
                    self.on_visible_node = false;
                    return did_match;
                }
                CursorStep::None => {}
            }
        }
        self.ascending = true;
        did_match
    }

    fn start_states(
        &mut self,
        node: Node<'tree>,
        status: &CursorStatus,
        rooted_in_range: bool,
        unrooted_in_range: bool,
    ) {
        let query = self.query;
        let symbol = node.kind_id();
        let max_start_depth = self.settings.max_start_depth;
        if self.depth > max_start_depth {
            return;
        }
        let wildcard_entries = if symbol == ERROR { &[][..] } else { &query.wildcard_starts[..] };
        let symbol_entries = query.symbol_starts.get(&symbol).map_or(&[][..], Vec::as_slice);
        for &entry in wildcard_entries.iter().chain(symbol_entries) {
            let step = &query.steps[entry.step_index];
            let pattern = &query.patterns[entry.pattern_index];
            let in_range = if pattern.is_rooted { rooted_in_range } else { unrooted_in_range };
            let field_fits = step.field == 0 || step.field == status.field_id;
            let supertype_fits = step.symbol != WILDCARD_SYMBOL || step.supertype == 0 || !status.supertypes.is_empty();
            if in_range && field_fits && supertype_fits {
                self.add_state(entry);
            }
        }
    }

    /// Advances every state that waits on a node at the current depth.
    fn update_states(&mut self, node: Node<'tree>, status: &CursorStatus) {
        let query = self.query;
        let symbol = node.kind_id();
        let is_named = node.is_named();
        let is_missing = node.is_missing();
        let is_error = symbol == ERROR;

        let mut index = 0;
        while index < self.states.len() {
            let state = &mut self.states[index];
            state.has_in_progress_alternatives = false;
            let step = &query.steps[state.step_index];
            if state.start_depth + u32::from(step.depth) != self.depth {
                index += 1;
                continue;
            }

            let mut node_matches = if step.symbol == WILDCARD_SYMBOL {
                if step.flags.contains(StepFlags::MISSING) {
                    is_missing
                } else {
                    !is_error && (is_named || !step.flags.contains(StepFlags::NAMED))
                }
            } else {
                symbol == step.symbol && (!step.flags.contains(StepFlags::MISSING) || is_missing)
            };
            let mut later_sibling_can_match = status.has_later_siblings;
            if (step.flags.contains(StepFlags::IMMEDIATE) && is_named) || state.seeking_immediate_match {
                later_sibling_can_match = false;
            }
            if step.flags.contains(StepFlags::LAST_CHILD) && status.has_later_named_siblings {
                node_matches = false;
            }
            if step.supertype != 0 && !status.supertypes.contains(&step.supertype) {
                node_matches = false;
            }
            if step.field != 0 {
                if step.field == status.field_id {
                    if !status.can_have_later_siblings_with_this_field {
                        later_sibling_can_match = false;
                    }
                } else {
                    node_matches = false;
                }
            }
            if step.negated_fields.iter().any(|&field| node.child_by_field_id(field).is_some()) {
                node_matches = false;
            }

            if !node_matches {
                if !later_sibling_can_match {
                    self.remove_state(index);
                } else {
                    index += 1;
                }
                continue;
            }

            // Keep a copy that waits for a later sibling, in case this
            // branch of the match fails deeper down.
            let mut copies = 0;
            let keeps_waiting = later_sibling_can_match
                && (step.flags.contains(StepFlags::CONTAINS_CAPTURES) || query.step_is_fallible(state.step_index));
            if keeps_waiting && self.copy_state(index, index + 1) {
                copies += 1;
            }

            if !step.capture_ids.is_empty() {
                self.add_capture(index, node, &step.capture_ids);
            }
            if self.states[index].dead {
                self.remove_state(index);
                index += copies;
                continue;
            }

            let seeks_immediate = step.symbol == WILDCARD_SYMBOL && !step.flags.contains(StepFlags::NAMED);
            let targets = query.expand(self.states[index].step_index + 1);
            for (offset, &target) in targets.iter().enumerate() {
                let at = if offset == 0 {
                    index
                } else {
                    if !self.copy_state(index, index + offset) {
                        continue;
                    }
                    copies += 1;
                    index + offset
                };
                let state = &mut self.states[at];
                state.step_index = target;
                state.seeking_immediate_match =
                    seeks_immediate && query.steps[target].flags.contains(StepFlags::IMMEDIATE);
            }
            index += 1 + copies;
        }
    }

    /// Removes dead and redundant states and collects finished ones.
    fn merge_states(&mut self) -> bool {
        let mut did_match = false;
        let mut index = 0;
        while index < self.states.len() {
            if self.states[index].dead {
                self.remove_state(index);
                continue;
            }

            let mut did_remove = false;
            let mut other = index + 1;
            while other < self.states.len() {
                let (left, right) = (&self.states[index], &self.states[other]);
                if right.start_depth != left.start_depth || right.pattern_index != left.pattern_index {
                    break;
                }
                let (left_contains_right, right_contains_left) = compare_captures(left, right);
                let same_step = left.step_index == right.step_index;
                if left_contains_right {
                    if same_step {
                        self.remove_state(other);
                        continue;
                    }
                    self.states[other].has_in_progress_alternatives = true;
                }
                if right_contains_left {
                    if same_step {
                        self.remove_state(index);
                        did_remove = true;
                        break;
                    }
                    self.states[index].has_in_progress_alternatives = true;
                }
                other += 1;
            }
            if did_remove {
                continue;
            }

            let state = &self.states[index];
            if self.query.steps[state.step_index].is_done() && !state.has_in_progress_alternatives {
                let state = self.states.remove(index);
                tracing::trace!(target: "loam", pattern = state.pattern_index, "finished match");
                self.finished.push(state);
                did_match = true;
                continue;
            }
            index += 1;
        }
        did_match
    }

    fn next_match(&mut self, progress: &mut Option<&mut QueryProgressFn<'_>>) -> Option<State<'tree>> {
        if self.finished.is_empty() && !self.advance(progress) {
            return None;
        }
        if self.finished.is_empty() {
            return None;
        }
        let mut state = self.finished.remove(0);
        if state.id.is_none() {
            state.id = Some(self.take_id());
        }
        self.release(&state);
        Some(state)
    }

    /// Returns the finished state that holds the next capture in text order,
    /// with the index of that capture.
    fn next_capture(&mut self, progress: &mut Option<&mut QueryProgressFn<'_>>) -> Option<(State<'tree>, usize)> {
        loop {
            let first_unfinished = self.first_in_progress_capture();
            let (mut best_start, mut best_pattern) =
                first_unfinished.map_or((usize::MAX, usize::MAX), |(_, start, pattern)| (start, pattern));
            let mut best = None;
            let mut index = 0;
            while index < self.finished.len() {
                let settings = self.settings;
                let state = &mut self.finished[index];
                let next = state
                    .captures
                    .as_ref()
                    .and_then(|captures| captures.get(state.consumed_capture_count))
                    .map(|capture| capture.node);
                let Some(node) = next else {
                    let state = self.finished.remove(index);
                    self.release(&state);
                    continue;
                };
                if settings.precedes(node) || settings.follows(node) {
                    state.consumed_capture_count += 1;
                    continue;
                }
                let start = node.start_byte();
                if start < best_start || (start == best_start && state.pattern_index < best_pattern) {
                    best = Some(index);
                    best_start = start;
                    best_pattern = state.pattern_index;
                }
                index += 1;
            }

            if let Some(index) = best {
                if self.finished[index].id.is_none() {
                    let id = self.take_id();
                    self.finished[index].id = Some(id);
                }
                let state = &mut self.finished[index];
                let capture_index = state.consumed_capture_count;
                state.consumed_capture_count += 1;
                return Some((state.clone(), capture_index));
            }

            // No finished capture can be returned before the earliest
            // unfinished one. Give that match up if it blocks new matches.
            if let Some((index, ..)) = first_unfinished {
                if self.capture_lists_in_use >= self.settings.match_limit {
                    tracing::trace!(
                        target: "loam",
                        pattern = self.states[index].pattern_index,
                        "abandoning in-progress match"
                    );
                    self.did_exceed_match_limit = true;
                    self.remove_state(index);
                }
            }

            if !self.advance(progress) && self.finished.is_empty() {
                return None;
            }
        }
    }

    fn remove_match(&mut self, id: u32) {
        if let Some(index) = self.finished.iter().position(|state| state.id == Some(id)) {
            let state = self.finished.remove(index);
            self.release(&state);
            return;
        }
        if let Some(index) = self.states.iter().position(|state| state.id == Some(id)) {
            self.remove_state(index);
        }
    }
}

/// Whether each state's captures include all of the other's, comparing by
/// position. Only states that agree on every shared capture can contain one
/// another.
fn compare_captures(left: &State<'_>, right: &State<'_>) -> (bool, bool) {
    let empty = Vec::new();
    let left_captures = left.captures.as_ref().unwrap_or(&empty);
    let right_captures = right.captures.as_ref().unwrap_or(&empty);
    let mut left_contains_right = true;
    let mut right_contains_left = true;
    let (mut i, mut j) = (0, 0);
    loop {
        match (left_captures.get(i), right_captures.get(j)) {
            (Some(a), Some(b)) => {
                if a.node.id() == b.node.id() && a.index == b.index {
                    i += 1;
                    j += 1;
                    continue;
                }
                // Earlier nodes first, and outer nodes before inner ones.
                let a_key = (a.node.start_byte(), Reverse(a.node.end_byte()));
                let b_key = (b.node.start_byte(), Reverse(b.node.end_byte()));
                match a_key.cmp(&b_key) {
                    Ordering::Less => {
                        right_contains_left = false;
                        i += 1;
                    }
                    Ordering::Greater => {
                        left_contains_right = false;
                        j += 1;
                    }
                    Ordering::Equal => return (false, false),
                }
            }
            (Some(_), None) => {
                right_contains_left = false;
                break;
            }
            (None, Some(_)) => {
                left_contains_right = false;
                break;
            }
            (None, None) => break,
        }
    }
    (left_contains_right, right_contains_left)
}

/// Iterator over the matches of a query. Matches whose text predicates fail
/// are skipped.
pub struct QueryMatches<'query, 'tree, T: TextProvider<I>, I: AsRef<[u8]>> {
    exec: Execution<'query, 'tree>,
    cursor: &'query mut QueryCursor,
    text_provider: T,
    buffers: (Vec<u8>, Vec<u8>),
    progress: Option<&'query mut QueryProgressFn<'query>>,
    removed: Rc<RefCell<Vec<u32>>>,
    _phantom: PhantomData<fn(I)>,
}

impl<T: TextProvider<I>, I: AsRef<[u8]>> QueryMatches<'_, '_, T, I> {
    pub fn set_byte_range(&mut self, range: Range<usize>) {
        self.exec.settings.set_byte_range(range);
    }

    pub fn set_point_range(&mut self, range: Range<Point>) {
        self.exec.settings.set_point_range(range);
    }
}

impl<'tree, T: TextProvider<I>, I: AsRef<[u8]>> Iterator for QueryMatches<'_, 'tree, T, I> {
    type Item = QueryMatch<'tree>;

    fn next(&mut self) -> Option<Self::Item> {
        for id in mem::take(&mut *self.removed.borrow_mut()) {
            self.exec.remove_match(id);
        }
        loop {
            let state = self.exec.next_match(&mut self.progress);
            self.cursor.did_exceed_match_limit |= self.exec.did_exceed_match_limit;
            let state = state?;
            let query_match = QueryMatch {
                pattern_index: state.pattern_index,
                captures: state.captures.unwrap_or_default(),
                id: state.id.unwrap_or_default(),
                removed: Rc::clone(&self.removed),
            };
            if query_match.satisfies_text_predicates(self.exec.query, &mut self.text_provider, &mut self.buffers) {
                return Some(query_match);
            }
        }
    }
}

impl<T: TextProvider<I>, I: AsRef<[u8]>> std::iter::FusedIterator for QueryMatches<'_, '_, T, I> {}

/// Iterator over individual captures of a query, in text order. Each item is
/// the match that produced the capture and the capture's position in it.
pub struct QueryCaptures<'query, 'tree, T: TextProvider<I>, I: AsRef<[u8]>> {
    exec: Execution<'query, 'tree>,
    cursor: &'query mut QueryCursor,
    text_provider: T,
    buffers: (Vec<u8>, Vec<u8>),
    progress: Option<&'query mut QueryProgressFn<'query>>,
    removed: Rc<RefCell<Vec<u32>>>,
    _phantom: PhantomData<fn(I)>,
}

impl<T: TextProvider<I>, I: AsRef<[u8]>> QueryCaptures<'_, '_, T, I> {
    pub fn set_byte_range(&mut self, range: Range<usize>) {
        self.exec.settings.set_byte_range(range);
    }

    pub fn set_point_range(&mut self, range: Range<Point>) {
        self.exec.settings.set_point_range(range);
    }
}

impl<'tree, T: TextProvider<I>, I: AsRef<[u8]>> Iterator for QueryCaptures<'_, 'tree, T, I> {
    type Item = (QueryMatch<'tree>, usize);

    fn next(&mut self) -> Option<Self::Item> {
        for id in mem::take(&mut *self.removed.borrow_mut()) {
            self.exec.remove_match(id);
        }
        loop {
            let next = self.exec.next_capture(&mut self.progress);
            self.cursor.did_exceed_match_limit |= self.exec.did_exceed_match_limit;
            let (state, capture_index) = next?;
            let id = state.id.unwrap_or_default();
            let query_match = QueryMatch {
                pattern_index: state.pattern_index,
                captures: state.captures.unwrap_or_default(),
                id,
                removed: Rc::clone(&self.removed),
            };
            if query_match.satisfies_text_predicates(self.exec.query, &mut self.text_provider, &mut self.buffers) {
                return Some((query_match, capture_index));
            }
            self.exec.remove_match(id);
        }
    }
}

impl<T: TextProvider<I>, I: AsRef<[u8]>> std::iter::FusedIterator for QueryCaptures<'_, '_, T, I> {}
