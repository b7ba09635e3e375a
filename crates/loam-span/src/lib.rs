//! Byte offsets, row/column points, and the edit arithmetic shared by every
//! other crate in the workspace.

mod edit;
mod length;
mod point;
mod range;

pub use edit::{InputEdit, edit_included_ranges};
pub use length::Length;
pub use point::Point;
pub use range::{Range, included_range_differences, ranges_intersect};
pub use text_size::{TextRange, TextSize};
