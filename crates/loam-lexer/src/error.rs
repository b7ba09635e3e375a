/// An included range list that is unsorted, overlapping or inverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Incorrect range by index: {index}")]
pub struct IncludedRangesError {
    /// Index of the first range that breaks the ordering.
    pub index: usize,
}
