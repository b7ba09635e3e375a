//! The graph-structured parse stack.
//!
//! Each stack version is a head pointing into a shared graph of nodes. Nodes
//! link back to their predecessors through the subtree that was pushed
//! between them, so versions that diverged during an ambiguity share their
//! common prefix, and versions that reconverge can be merged by adding links.

use std::io;

use loam_language::{ERROR_REPEAT, ERROR_STATE, Language, START_STATE, StateId};
use loam_span::Length;
use loam_tree::{ERROR_COST_PER_RECOVERY, Subtree, external_scanner_state_eq};
use smallvec::SmallVec;

pub(crate) type StackVersion = usize;

const MAX_LINK_COUNT: usize = 8;
const MAX_ITERATOR_COUNT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeId(u32);

#[derive(Clone)]
struct Link {
    node: NodeId,
    subtree: Option<Subtree>,
    is_pending: bool,
}

struct StackNode {
    state: StateId,
    position: Length,
    links: SmallVec<[Link; 2]>,
    error_cost: u32,
    node_count: u32,
    dynamic_precedence: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Active,
    Paused,
    Halted,
}

/// A state that was on the stack when error recovery began, and how many
/// subtrees deep it was.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SummaryEntry {
    pub(crate) position: Length,
    pub(crate) depth: u32,
    pub(crate) state: StateId,
}

struct Head {
    node: NodeId,
    summary: Option<Vec<SummaryEntry>>,
    node_count_at_last_error: u32,
    last_external_token: Option<Subtree>,
    lookahead_when_paused: Option<Subtree>,
    status: Status,
}

impl Head {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            summary: None,
            node_count_at_last_error: 0,
            last_external_token: None,
            lookahead_when_paused: None,
            status: Status::Active,
        }
    }
}

/// The subtrees popped along one path, and the version left behind at the
/// node where the path ended.
pub(crate) struct StackSlice {
    pub(crate) subtrees: Vec<Subtree>,
    pub(crate) version: StackVersion,
}

#[derive(Clone)]
struct Walker {
    node: NodeId,
    subtrees: Vec<Subtree>,
    subtree_count: u32,
    is_pending: bool,
}

#[derive(Clone, Copy)]
struct Visit {
    pop: bool,
    stop: bool,
}

impl Visit {
    const NONE: Self = Self { pop: false, stop: false };
    const POP: Self = Self { pop: true, stop: false };
    const STOP: Self = Self { pop: false, stop: true };
    const POP_AND_STOP: Self = Self { pop: true, stop: true };
}

pub(crate) struct Stack {
    nodes: Vec<StackNode>,
    heads: Vec<Head>,
}

impl Stack {
    pub(crate) fn new() -> Self {
        let mut stack = Self { nodes: Vec::new(), heads: Vec::new() };
        stack.clear();
        stack
    }

    /// Drops every version and node, leaving a single version at the start
    /// state.
    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.heads.clear();
        let base = self.new_node(None, None, false, START_STATE);
        self.heads.push(Head::new(base));
    }

    pub(crate) fn version_count(&self) -> usize {
        self.heads.len()
    }

    pub(crate) fn halted_version_count(&self) -> usize {
        self.heads.iter().filter(|head| head.status == Status::Halted).count()
    }

    pub(crate) fn state(&self, version: StackVersion) -> StateId {
        self.node(self.heads[version].node).state
    }

    pub(crate) fn position(&self, version: StackVersion) -> Length {
        self.node(self.heads[version].node).position
    }

    pub(crate) fn last_external_token(&self, version: StackVersion) -> Option<&Subtree> {
        self.heads[version].last_external_token.as_ref()
    }

    pub(crate) fn set_last_external_token(&mut self, version: StackVersion, token: Option<Subtree>) {
        self.heads[version].last_external_token = token;
    }

    pub(crate) fn error_cost(&self, version: StackVersion) -> u32 {
        let head = &self.heads[version];
        let node = self.node(head.node);
        let mut cost = node.error_cost;
        let at_recovery_start =
            node.state == ERROR_STATE && node.links.first().is_some_and(|link| link.subtree.is_none());
        if head.status == Status::Paused || at_recovery_start {
            cost += ERROR_COST_PER_RECOVERY;
        }
        cost
    }

    pub(crate) fn node_count_since_error(&mut self, version: StackVersion) -> u32 {
        let node_count = self.node(self.heads[version].node).node_count;
        let head = &mut self.heads[version];
        if node_count < head.node_count_at_last_error {
            head.node_count_at_last_error = node_count;
        }
        node_count - head.node_count_at_last_error
    }

    pub(crate) fn dynamic_precedence(&self, version: StackVersion) -> i32 {
        self.node(self.heads[version].node).dynamic_precedence
    }

    pub(crate) fn summary(&self, version: StackVersion) -> Option<&[SummaryEntry]> {
        self.heads[version].summary.as_deref()
    }

    pub(crate) fn is_active(&self, version: StackVersion) -> bool {
        self.heads[version].status == Status::Active
    }

    pub(crate) fn is_paused(&self, version: StackVersion) -> bool {
        self.heads[version].status == Status::Paused
    }

    pub(crate) fn is_halted(&self, version: StackVersion) -> bool {
        self.heads[version].status == Status::Halted
    }

    /// Pushes `subtree` and moves the version to `state`. Pushing `None`
    /// marks the start of error recovery.
    pub(crate) fn push(
        &mut self,
        version: StackVersion,
        subtree: Option<Subtree>,
        pending: bool,
        state: StateId,
    ) {
        let is_discontinuity = subtree.is_none();
        let previous = self.heads[version].node;
        let node = self.new_node(Some(previous), subtree, pending, state);
        let node_count = self.node(node).node_count;
        let head = &mut self.heads[version];
        if is_discontinuity {
            head.node_count_at_last_error = node_count;
        }
        head.node = node;
    }

    /// Pops `count` non-extra subtrees along every path, creating a version
    /// for each distinct node reached.
    pub(crate) fn pop_count(&mut self, version: StackVersion, count: u32) -> Vec<StackSlice> {
        self.iterate(version, Some(count as usize), |_, walker| {
            if walker.subtree_count == count { Visit::POP_AND_STOP } else { Visit::NONE }
        })
    }

    /// Pops a subtree that was shifted without being broken down. The first
    /// slice replaces `version`.
    pub(crate) fn pop_pending(&mut self, version: StackVersion) -> Vec<StackSlice> {
        let mut slices = self.iterate(version, Some(0), |_, walker| {
            if walker.subtree_count >= 1 {
                if walker.is_pending { Visit::POP_AND_STOP } else { Visit::STOP }
            } else {
                Visit::NONE
            }
        });
        if let Some(first) = slices.first_mut() {
            self.renumber_version(first.version, version);
            first.version = version;
        }
        slices
    }

    /// Pops the error node on top of the stack, if there is one.
    pub(crate) fn pop_error(&mut self, version: StackVersion) -> Vec<Subtree> {
        let node = self.node(self.heads[version].node);
        let has_error = node
            .links
            .iter()
            .any(|link| link.subtree.as_ref().is_some_and(Subtree::is_error));
        if !has_error {
            return Vec::new();
        }

        let mut found_error = false;
        let mut slices = self.iterate(version, Some(1), |_, walker| {
            if walker.subtrees.is_empty() {
                return Visit::NONE;
            }
            if !found_error && walker.subtrees[0].is_error() {
                found_error = true;
                Visit::POP_AND_STOP
            } else {
                Visit::STOP
            }
        });
        match slices.pop() {
            Some(slice) => {
                self.renumber_version(slice.version, version);
                slice.subtrees
            }
            None => Vec::new(),
        }
    }

    /// Pops everything down to the base of the stack.
    pub(crate) fn pop_all(&mut self, version: StackVersion) -> Vec<StackSlice> {
        self.iterate(version, Some(0), |node, _| {
            if node.links.is_empty() { Visit::POP } else { Visit::NONE }
        })
    }

    /// Records the states reachable within `max_depth` subtrees of the top,
    /// for use as recovery targets.
    pub(crate) fn record_summary(&mut self, version: StackVersion, max_depth: u32) {
        let mut summary: Vec<SummaryEntry> = Vec::new();
        self.iterate(version, None, |node, walker| {
            let depth = walker.subtree_count;
            if depth > max_depth {
                return Visit::STOP;
            }
            for entry in summary.iter().rev() {
                if entry.depth < depth {
                    break;
                }
                if entry.depth == depth && entry.state == node.state {
                    return Visit::NONE;
                }
            }
            summary.push(SummaryEntry { position: node.position, depth, state: node.state });
            Visit::NONE
        });
        self.heads[version].summary = Some(summary);
    }

    /// Whether the version has consumed any input since it last entered the
    /// error state.
    pub(crate) fn has_advanced_since_error(&self, version: StackVersion) -> bool {
        let head = &self.heads[version];
        let mut node = self.node(head.node);
        if node.error_cost == 0 {
            return true;
        }
        while let Some(link) = node.links.first() {
            let Some(subtree) = &link.subtree else { break };
            if u32::from(subtree.total_bytes()) > 0 {
                return true;
            }
            if node.node_count > head.node_count_at_last_error && subtree.error_cost() == 0 {
                node = self.node(link.node);
                continue;
            }
            break;
        }
        false
    }

    pub(crate) fn remove_version(&mut self, version: StackVersion) {
        self.heads.remove(version);
    }

    /// Moves version `from` into the slot of `to`, replacing it.
    pub(crate) fn renumber_version(&mut self, from: StackVersion, to: StackVersion) {
        if from == to {
            return;
        }
        debug_assert!(to < from);
        let mut source = self.heads.remove(from);
        let target = &mut self.heads[to];
        if source.summary.is_none() {
            source.summary = target.summary.take();
        }
        *target = source;
    }

    pub(crate) fn swap_versions(&mut self, first: StackVersion, second: StackVersion) {
        self.heads.swap(first, second);
    }

    pub(crate) fn copy_version(&mut self, version: StackVersion) -> StackVersion {
        let head = &self.heads[version];
        let copy = Head {
            node: head.node,
            summary: None,
            node_count_at_last_error: head.node_count_at_last_error,
            last_external_token: head.last_external_token.clone(),
            lookahead_when_paused: head.lookahead_when_paused.clone(),
            status: head.status,
        };
        self.heads.push(copy);
        self.heads.len() - 1
    }

    /// Merges `second` into `first` when both sit in the same state at the
    /// same position.
    pub(crate) fn merge(&mut self, first: StackVersion, second: StackVersion) -> bool {
        if !self.can_merge(first, second) {
            return false;
        }
        let target = self.heads[first].node;
        let links = self.node(self.heads[second].node).links.clone();
        for link in links {
            self.add_link(target, link);
        }
        if self.node(target).state == ERROR_STATE {
            self.heads[first].node_count_at_last_error = self.node(target).node_count;
        }
        self.remove_version(second);
        true
    }

    pub(crate) fn can_merge(&self, first: StackVersion, second: StackVersion) -> bool {
        let (head1, head2) = (&self.heads[first], &self.heads[second]);
        let (node1, node2) = (self.node(head1.node), self.node(head2.node));
        head1.status == Status::Active
            && head2.status == Status::Active
            && node1.state == node2.state
            && node1.position.bytes == node2.position.bytes
            && node1.error_cost == node2.error_cost
            && external_scanner_state_eq(
                head1.last_external_token.as_ref(),
                head2.last_external_token.as_ref(),
            )
    }

    pub(crate) fn halt(&mut self, version: StackVersion) {
        self.heads[version].status = Status::Halted;
    }

    /// Parks a version that cannot handle `lookahead` until the other
    /// versions have had their turn.
    pub(crate) fn pause(&mut self, version: StackVersion, lookahead: Subtree) {
        let node_count = self.node(self.heads[version].node).node_count;
        let head = &mut self.heads[version];
        head.status = Status::Paused;
        head.lookahead_when_paused = Some(lookahead);
        head.node_count_at_last_error = node_count;
    }

    /// Reactivates a paused version and hands back the lookahead it stopped
    /// at.
    pub(crate) fn resume(&mut self, version: StackVersion) -> Option<Subtree> {
        let head = &mut self.heads[version];
        debug_assert_eq!(head.status, Status::Paused);
        head.status = Status::Active;
        head.lookahead_when_paused.take()
    }

    /// Writes every live version and the nodes they reach in the DOT
    /// language.
    pub(crate) fn print_dot_graph(&self, language: &Language, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "digraph stack {{")?;
        writeln!(out, "rankdir=\"RL\";")?;
        writeln!(out, "edge [arrowhead=none]")?;

        let mut pending = Vec::new();
        for (index, head) in self.heads.iter().enumerate() {
            if head.status == Status::Halted {
                continue;
            }
            let node = self.node(head.node);
            writeln!(out, "node_head_{index} [shape=none, label=\"\"]")?;
            write!(out, "node_head_{index} -> node_{} [", head.node.0)?;
            if head.status == Status::Paused {
                write!(out, "color=red ")?;
            }
            write!(
                out,
                "label={index}, fontcolor=blue, weight=10000, labeltooltip=\"node_count: {}\\nerror_cost: {}",
                node.node_count.saturating_sub(head.node_count_at_last_error),
                self.error_cost(index),
            )?;
            if let Some(summary) = &head.summary {
                write!(out, "\\nsummary:")?;
                for entry in summary {
                    write!(out, " {}", entry.state)?;
                }
            }
            if let Some(token) = &head.last_external_token {
                write!(out, "\\nexternal_scanner_state:")?;
                for byte in token.external_scanner_state() {
                    write!(out, " {byte:2X}")?;
                }
            }
            writeln!(out, "\"]")?;
            pending.push(head.node);
        }

        let mut visited = vec![false; self.nodes.len()];
        while let Some(id) = pending.pop() {
            if std::mem::replace(&mut visited[id.0 as usize], true) {
                continue;
            }
            let node = self.node(id);
            write!(out, "node_{} [", id.0)?;
            let extra_only = node.links.len() == 1
                && node.links[0].subtree.as_ref().is_some_and(Subtree::extra);
            if node.state == ERROR_STATE {
                write!(out, "label=\"?\"")?;
            } else if extra_only {
                write!(out, "shape=point margin=0 label=\"\"")?;
            } else {
                write!(out, "label=\"{}\"", node.state)?;
            }
            writeln!(
                out,
                " tooltip=\"position: {},{}\\nnode_count:{}\\nerror_cost: {}\\ndynamic_precedence: {}\"];",
                node.position.extent.row + 1,
                node.position.extent.column,
                node.node_count,
                node.error_cost,
                node.dynamic_precedence,
            )?;

            for link in &node.links {
                write!(out, "node_{} -> node_{} [", id.0, link.node.0)?;
                if link.is_pending {
                    write!(out, "style=dashed ")?;
                }
                match &link.subtree {
                    None => write!(out, "color=red")?,
                    Some(subtree) => {
                        if subtree.extra() {
                            write!(out, "fontcolor=gray ")?;
                        }
                        let quote = if subtree.visible() && !subtree.named() { "'" } else { "" };
                        write!(out, "label=\"{quote}")?;
                        for c in language.symbol_name(subtree.symbol()).chars() {
                            match c {
                                '"' | '\\' => write!(out, "\\{c}")?,
                                '\n' => write!(out, "\\n")?,
                                c => write!(out, "{c}")?,
                            }
                        }
                        write!(
                            out,
                            "{quote}\" labeltooltip=\"error_cost: {}\\ndynamic_precedence: {}\"",
                            subtree.error_cost(),
                            subtree.dynamic_precedence(),
                        )?;
                    }
                }
                writeln!(out, "];")?;
                pending.push(link.node);
            }
        }

        writeln!(out, "}}")
    }

    fn node(&self, id: NodeId) -> &StackNode {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut StackNode {
        &mut self.nodes[id.0 as usize]
    }

    fn new_node(
        &mut self,
        previous: Option<NodeId>,
        subtree: Option<Subtree>,
        is_pending: bool,
        state: StateId,
    ) -> NodeId {
        let mut node = StackNode {
            state,
            position: Length::ZERO,
            links: SmallVec::new(),
            error_cost: 0,
            node_count: 0,
            dynamic_precedence: 0,
        };
        if let Some(previous) = previous {
            let previous_node = self.node(previous);
            node.position = previous_node.position;
            node.error_cost = previous_node.error_cost;
            node.dynamic_precedence = previous_node.dynamic_precedence;
            node.node_count = previous_node.node_count;
            if let Some(subtree) = &subtree {
                node.error_cost += subtree.error_cost();
                node.position += subtree.total_size();
                node.node_count += subtree_node_count(subtree);
                node.dynamic_precedence += subtree.dynamic_precedence();
            }
            node.links.push(Link { node: previous, subtree, is_pending });
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    fn add_link(&mut self, target: NodeId, link: Link) {
        if link.node == target {
            return;
        }

        for index in 0..self.node(target).links.len() {
            let existing = self.node(target).links[index].clone();
            if !subtree_is_equivalent(existing.subtree.as_ref(), link.subtree.as_ref()) {
                continue;
            }

            // Two links between the same pair of nodes: keep the preferred
            // subtree instead of recording the ambiguity.
            if existing.node == link.node {
                let new_precedence = link.subtree.as_ref().map_or(0, Subtree::dynamic_precedence);
                let old_precedence =
                    existing.subtree.as_ref().map_or(0, Subtree::dynamic_precedence);
                if new_precedence > old_precedence {
                    let base = self.node(link.node).dynamic_precedence;
                    let node = self.node_mut(target);
                    node.links[index].subtree = link.subtree;
                    node.dynamic_precedence = base + new_precedence;
                }
                return;
            }

            let (existing_node, link_node) = (self.node(existing.node), self.node(link.node));
            if existing_node.state == link_node.state
                && existing_node.position.bytes == link_node.position.bytes
                && existing_node.error_cost == link_node.error_cost
            {
                let next_links = link_node.links.clone();
                let mut dynamic_precedence = link_node.dynamic_precedence;
                for next in next_links {
                    self.add_link(existing.node, next);
                }
                if let Some(subtree) = &link.subtree {
                    dynamic_precedence += subtree.dynamic_precedence();
                }
                let node = self.node_mut(target);
                node.dynamic_precedence = node.dynamic_precedence.max(dynamic_precedence);
                return;
            }
        }

        if self.node(target).links.len() == MAX_LINK_COUNT {
            return;
        }

        let linked = self.node(link.node);
        let mut node_count = linked.node_count;
        let mut dynamic_precedence = linked.dynamic_precedence;
        if let Some(subtree) = &link.subtree {
            node_count += subtree_node_count(subtree);
            dynamic_precedence += subtree.dynamic_precedence();
        }
        let node = self.node_mut(target);
        node.links.push(link);
        node.node_count = node.node_count.max(node_count);
        node.dynamic_precedence = node.dynamic_precedence.max(dynamic_precedence);
    }

    fn add_version(&mut self, original: StackVersion, node: NodeId) -> StackVersion {
        let original = &self.heads[original];
        let head = Head {
            node_count_at_last_error: original.node_count_at_last_error,
            last_external_token: original.last_external_token.clone(),
            ..Head::new(node)
        };
        self.heads.push(head);
        self.heads.len() - 1
    }

    fn add_slice(
        &mut self,
        slices: &mut Vec<StackSlice>,
        original: StackVersion,
        node: NodeId,
        subtrees: Vec<Subtree>,
    ) {
        for index in (0..slices.len()).rev() {
            let version = slices[index].version;
            if self.heads[version].node == node {
                slices.insert(index + 1, StackSlice { subtrees, version });
                return;
            }
        }
        let version = self.add_version(original, node);
        slices.push(StackSlice { subtrees, version });
    }

    /// Walks every path down from the head of `version`. `visit` decides at
    /// each node whether to pop the path walked so far and whether to keep
    /// walking. Subtrees are collected only when `capacity` is given.
    fn iterate(
        &mut self,
        version: StackVersion,
        capacity: Option<usize>,
        mut visit: impl FnMut(&StackNode, &Walker) -> Visit,
    ) -> Vec<StackSlice> {
        let include_subtrees = capacity.is_some();
        let mut slices = Vec::new();
        let mut walkers = vec![Walker {
            node: self.heads[version].node,
            subtrees: Vec::with_capacity(capacity.unwrap_or(0)),
            subtree_count: 0,
            is_pending: true,
        }];

        while !walkers.is_empty() {
            let mut index = 0;
            let mut size = walkers.len();
            while index < size {
                let id = walkers[index].node;
                let action = visit(self.node(id), &walkers[index]);
                let link_count = self.node(id).links.len();
                let should_stop = action.stop || link_count == 0;

                if action.pop {
                    let mut subtrees = if should_stop {
                        std::mem::take(&mut walkers[index].subtrees)
                    } else {
                        walkers[index].subtrees.clone()
                    };
                    subtrees.reverse();
                    self.add_slice(&mut slices, version, id, subtrees);
                }

                if should_stop {
                    walkers.remove(index);
                    size -= 1;
                    continue;
                }

                for link_index in 1..=link_count {
                    let (link, target) = if link_index == link_count {
                        (self.node(id).links[0].clone(), index)
                    } else {
                        if walkers.len() >= MAX_ITERATOR_COUNT {
                            continue;
                        }
                        walkers.push(walkers[index].clone());
                        (self.node(id).links[link_index].clone(), walkers.len() - 1)
                    };

                    let walker = &mut walkers[target];
                    walker.node = link.node;
                    match link.subtree {
                        Some(subtree) => {
                            if !subtree.extra() {
                                walker.subtree_count += 1;
                                if !link.is_pending {
                                    walker.is_pending = false;
                                }
                            }
                            if include_subtrees {
                                walker.subtrees.push(subtree);
                            }
                        }
                        None => {
                            walker.subtree_count += 1;
                            walker.is_pending = false;
                        }
                    }
                }
                index += 1;
            }
        }

        slices
    }
}

fn subtree_node_count(subtree: &Subtree) -> u32 {
    let mut count = subtree.visible_descendant_count();
    if subtree.visible() {
        count += 1;
    }
    // Hidden error chains still count as progress.
    if subtree.symbol() == ERROR_REPEAT {
        count += 1;
    }
    count
}

fn subtree_is_equivalent(left: Option<&Subtree>, right: Option<&Subtree>) -> bool {
    let (left, right) = match (left, right) {
        (None, None) => return true,
        (Some(left), Some(right)) => (left, right),
        _ => return false,
    };
    if left.ptr_eq(right) {
        return true;
    }
    if left.symbol() != right.symbol() {
        return false;
    }
    if left.error_cost() > 0 && right.error_cost() > 0 {
        return true;
    }
    left.padding().bytes == right.padding().bytes
        && left.size().bytes == right.size().bytes
        && left.child_count() == right.child_count()
        && left.extra() == right.extra()
        && external_scanner_state_eq(Some(left), Some(right))
}

#[cfg(test)]
mod tests;
