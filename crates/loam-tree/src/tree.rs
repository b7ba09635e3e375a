use std::fmt;
use std::io;

use loam_language::{Language, Symbol};
use loam_span::{InputEdit, Length, Point, Range, edit_included_ranges, included_range_differences};

use crate::changed_ranges::changed_ranges;
use crate::{Node, Subtree, TreeCursor};

/// A syntax tree produced by a parse.
///
/// Cloning shares every node with the original; editing a clone copies only
/// the nodes on the path to the edit.
#[derive(Clone)]
pub struct Tree {
    root: Subtree,
    language: Language,
    included_ranges: Vec<Range>,
}

impl Tree {
    pub fn new(root: Subtree, language: Language, included_ranges: Vec<Range>) -> Self {
        Self { root, language, included_ranges }
    }

    #[doc(hidden)]
    pub fn root_subtree(&self) -> &Subtree {
        &self.root
    }

    pub fn root_node(&self) -> Node<'_> {
        Node::new(self, &self.root, self.root.padding(), 0)
    }

    /// The root node, positioned as if the document started at the given
    /// offset.
    pub fn root_node_with_offset(&self, offset_bytes: usize, offset_extent: Point) -> Node<'_> {
        let offset = Length::new((offset_bytes as u32).into(), offset_extent);
        Node::new(self, &self.root, offset + self.root.padding(), 0)
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    /// The ranges of the document that were parsed.
    pub fn included_ranges(&self) -> &[Range] {
        &self.included_ranges
    }

    /// Brings the tree in sync with an edit to its source text so that it
    /// can be passed to the next parse.
    pub fn edit(&mut self, edit: &InputEdit) {
        edit_included_ranges(&mut self.included_ranges, edit);
        self.root.edit(edit);
    }

    pub fn walk(&self) -> TreeCursor<'_> {
        self.root_node().walk()
    }

    /// Ranges whose syntax differs between this tree, which must have been
    /// edited to match the new source, and `new_tree`, parsed from it.
    pub fn changed_ranges(&self, new_tree: &Self) -> impl ExactSizeIterator<Item = Range> + use<> {
        let differences = included_range_differences(&self.included_ranges, &new_tree.included_ranges);
        changed_ranges(&self.root, &new_tree.root, &self.language, &differences).into_iter()
    }

    /// Writes the tree in the DOT language.
    pub fn print_dot_graph(&self, out: &mut impl io::Write) -> io::Result<()> {
        self.root.print_dot_graph(&self.language, out)
    }
}

impl Subtree {
    /// Writes this subtree in the DOT language.
    pub fn print_dot_graph(&self, language: &Language, out: &mut impl io::Write) -> io::Result<()> {
        writeln!(out, "digraph tree {{")?;
        writeln!(out, "edge [arrowhead=none]")?;
        write_dot_node(out, self, language, 0, 0)?;
        writeln!(out, "}}")
    }
}

fn write_dot_node(
    out: &mut impl io::Write,
    tree: &Subtree,
    language: &Language,
    start_offset: u32,
    alias: Symbol,
) -> io::Result<()> {
    let symbol = if alias != 0 { alias } else { tree.symbol() };
    let end_offset = start_offset + u32::from(tree.total_bytes());
    write!(out, "tree_{:x} [label=\"", tree.id())?;
    write_dot_string(out, language.symbol_name(symbol))?;
    write!(out, "\"")?;
    if tree.child_count() == 0 {
        write!(out, ", shape=plaintext")?;
    }
    if tree.extra() {
        write!(out, ", fontcolor=gray")?;
    }
    write!(
        out,
        ", tooltip=\"range: {start_offset} - {end_offset}\nstate: {}\nerror-cost: {}\n\
         has-changes: {}\ndepends-on-column: {}\ndescendant-count: {}\n\
         repeat-depth: {}\nlookahead-bytes: {}",
        tree.parse_state(),
        tree.error_cost(),
        u8::from(tree.has_changes()),
        u8::from(tree.depends_on_column()),
        tree.visible_descendant_count(),
        tree.repeat_depth(),
        tree.lookahead_bytes(),
    )?;
    if tree.is_error() && tree.child_count() == 0 && tree.lookahead_char() != '\0' {
        write!(out, "\ncharacter: '{}'", tree.lookahead_char())?;
    }
    writeln!(out, "\"]")?;

    let mut child_start_offset = start_offset;
    let mut structural_index = 0;
    for (index, child) in tree.children().iter().enumerate() {
        let mut child_alias = 0;
        if !child.extra() {
            child_alias = language.alias_at(tree.production_id(), structural_index);
            structural_index += 1;
        }
        write_dot_node(out, child, language, child_start_offset, child_alias)?;
        writeln!(out, "tree_{:x} -> tree_{:x} [tooltip={index}]", tree.id(), child.id())?;
        child_start_offset += u32::from(child.total_bytes());
    }
    Ok(())
}

fn write_dot_string(out: &mut impl io::Write, text: &str) -> io::Result<()> {
    for c in text.chars() {
        match c {
            '"' => write!(out, "\\\"")?,
            '\n' => write!(out, "\\n")?,
            '\t' => write!(out, "\\t")?,
            c => write!(out, "{c}")?,
        }
    }
    Ok(())
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{Tree {:?}}}", self.root_node())
    }
}
