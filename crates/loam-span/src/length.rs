use std::ops::{Add, AddAssign, Sub};

use text_size::TextSize;

use crate::Point;

/// The size of a span of text, measured both in bytes and in rows/columns.
///
/// Lengths are relative: adding a length that spans a newline replaces the
/// column of the left operand instead of extending it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Length {
    pub bytes: TextSize,
    pub extent: Point,
}

impl Length {
    pub const ZERO: Self = Self { bytes: TextSize::new(0), extent: Point::ZERO };
    pub const MAX: Self = Self { bytes: TextSize::new(u32::MAX), extent: Point::MAX };

    #[inline]
    pub const fn new(bytes: TextSize, extent: Point) -> Self {
        Self { bytes, extent }
    }

    /// Length of `text` laid out from the start of a row.
    pub fn of(text: &[u8]) -> Self {
        Self { bytes: TextSize::new(text.len() as u32), extent: Point::of(text) }
    }

    /// Like `-`, but clamps to zero when `other` is not strictly shorter.
    #[inline]
    pub fn saturating_sub(self, other: Self) -> Self {
        if self.bytes > other.bytes { self - other } else { Self::ZERO }
    }
}

impl Add for Length {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        let bytes = u32::from(self.bytes).saturating_add(other.bytes.into());
        Self { bytes: TextSize::new(bytes), extent: self.extent + other.extent }
    }
}

impl AddAssign for Length {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Sub for Length {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        let bytes = u32::from(self.bytes).saturating_sub(other.bytes.into());
        Self { bytes: TextSize::new(bytes), extent: self.extent - other.extent }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn len(bytes: u32, row: u32, column: u32) -> Length {
        Length::new(bytes.into(), Point::new(row, column))
    }

    #[test]
    fn add_across_rows() {
        assert_eq!(len(3, 0, 3) + len(4, 1, 2), len(7, 1, 2));
        assert_eq!(len(3, 0, 3) + len(4, 0, 4), len(7, 0, 7));
    }

    #[test]
    fn saturating_sub_clamps() {
        assert_eq!(len(3, 0, 3).saturating_sub(len(5, 0, 5)), Length::ZERO);
        assert_eq!(len(3, 0, 3).saturating_sub(len(3, 0, 3)), Length::ZERO);
        assert_eq!(len(7, 1, 2).saturating_sub(len(3, 0, 3)), len(4, 1, 2));
    }

    #[test]
    fn of_text() {
        assert_eq!(Length::of(b"a\nbc"), len(4, 1, 2));
    }
}
