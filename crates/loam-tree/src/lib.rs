//! Persistent syntax trees: the shared [`Subtree`] nodes built by the parser,
//! the [`Tree`] that owns a root, and the [`Node`] and [`TreeCursor`] views
//! used to read them.

mod balance;
mod changed_ranges;
mod cursor;
mod edit;
mod node;
mod reusable;
mod sexp;
mod subtree;
mod tree;

pub use cursor::{CursorStatus, CursorStep, TreeCursor};
pub use node::Node;
pub use reusable::ReusableNode;
pub use subtree::{
    ERROR_COST_PER_MISSING_TREE, ERROR_COST_PER_RECOVERY, ERROR_COST_PER_SKIPPED_CHAR,
    ERROR_COST_PER_SKIPPED_LINE, ERROR_COST_PER_SKIPPED_TREE, ExternalScannerState, STATE_NONE,
    Subtree, SubtreeData, SubtreeFlags, external_scanner_state_eq,
};
pub use tree::Tree;
