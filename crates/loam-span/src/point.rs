use std::fmt;
use std::ops::{Add, Sub};

/// A position in a document as a zero-based row and a byte column within
/// that row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Point {
    pub row: u32,
    pub column: u32,
}

impl Point {
    pub const ZERO: Self = Self { row: 0, column: 0 };
    pub const MAX: Self = Self { row: u32::MAX, column: u32::MAX };

    #[inline]
    pub const fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }

    /// Extent of `text` when laid out starting at row zero.
    pub fn of(text: &[u8]) -> Self {
        let mut point = Self::ZERO;
        for &byte in text {
            if byte == b'\n' {
                point.row += 1;
                point.column = 0;
            } else {
                point.column += 1;
            }
        }
        point
    }
}

impl Add for Point {
    type Output = Self;

    /// Appends a relative extent: a row delta resets the column.
    #[inline]
    fn add(self, other: Self) -> Self {
        if other.row > 0 {
            Self::new(self.row.saturating_add(other.row), other.column)
        } else {
            Self::new(self.row, self.column.saturating_add(other.column))
        }
    }
}

impl Sub for Point {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        if self.row > other.row {
            Self::new(self.row - other.row, self.column)
        } else {
            Self::new(0, self.column.saturating_sub(other.column))
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.column)
    }
}
