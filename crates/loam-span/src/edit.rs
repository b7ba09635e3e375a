use text_size::TextSize;

use crate::{Length, Point, Range};

/// A single text replacement: the bytes in `start_byte..old_end_byte` were
/// replaced by text now occupying `start_byte..new_end_byte`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputEdit {
    pub start_byte: TextSize,
    pub old_end_byte: TextSize,
    pub new_end_byte: TextSize,
    pub start_position: Point,
    pub old_end_position: Point,
    pub new_end_position: Point,
}

impl InputEdit {
    #[inline]
    pub fn start(&self) -> Length {
        Length::new(self.start_byte, self.start_position)
    }

    #[inline]
    pub fn old_end(&self) -> Length {
        Length::new(self.old_end_byte, self.old_end_position)
    }

    #[inline]
    pub fn new_end(&self) -> Length {
        Length::new(self.new_end_byte, self.new_end_position)
    }

    /// Moves a retained position so that it refers to the same text after
    /// the edit. Positions inside the replaced text snap to its new end.
    pub fn edit_point(&self, point: &mut Point, byte: &mut TextSize) {
        if *byte >= self.old_end_byte {
            *byte = self.new_end_byte + (*byte - self.old_end_byte);
            *point = self.new_end_position + (*point - self.old_end_position);
        } else if *byte > self.start_byte {
            *byte = self.new_end_byte;
            *point = self.new_end_position;
        }
    }

    /// Moves a retained range so that it covers the same text after the
    /// edit. An unbounded end stays unbounded.
    pub fn edit_range(&self, range: &mut Range) {
        if range.end_byte >= self.old_end_byte {
            if u32::from(range.end_byte) != u32::MAX {
                match self.shift(range.end_byte) {
                    Some(end_byte) => {
                        range.end_byte = end_byte;
                        range.end_point =
                            self.new_end_position + (range.end_point - self.old_end_position);
                    }
                    None => {
                        range.end_byte = TextSize::new(u32::MAX);
                        range.end_point = Point::MAX;
                    }
                }
            }
        } else if range.end_byte > self.start_byte {
            range.end_byte = self.start_byte;
            range.end_point = self.start_position;
        }

        if range.start_byte >= self.old_end_byte {
            match self.shift(range.start_byte) {
                Some(start_byte) => {
                    range.start_byte = start_byte;
                    range.start_point =
                        self.new_end_position + (range.start_point - self.old_end_position);
                }
                None => {
                    range.start_byte = TextSize::new(u32::MAX);
                    range.start_point = Point::MAX;
                }
            }
        } else if range.start_byte > self.start_byte {
            range.start_byte = self.start_byte;
            range.start_point = self.start_position;
        }
    }

    /// Translates a byte at or after the old end into post-edit coordinates.
    fn shift(&self, byte: TextSize) -> Option<TextSize> {
        u32::from(self.new_end_byte)
            .checked_add(u32::from(byte) - u32::from(self.old_end_byte))
            .map(TextSize::new)
    }
}

/// Applies an edit to a sorted list of included ranges.
pub fn edit_included_ranges(ranges: &mut [Range], edit: &InputEdit) {
    for range in ranges {
        edit.edit_range(range);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(start: u32, old_end: u32, new_end: u32) -> InputEdit {
        InputEdit {
            start_byte: start.into(),
            old_end_byte: old_end.into(),
            new_end_byte: new_end.into(),
            start_position: Point::new(0, start),
            old_end_position: Point::new(0, old_end),
            new_end_position: Point::new(0, new_end),
        }
    }

    fn range(start: u32, end: u32) -> Range {
        Range::new(start.into(), end.into(), Point::new(0, start), Point::new(0, end))
    }

    #[test]
    fn points_after_edit_shift() {
        let edit = edit(3, 5, 9);
        let (mut point, mut byte) = (Point::new(0, 7), TextSize::new(7));
        edit.edit_point(&mut point, &mut byte);
        assert_eq!((point, u32::from(byte)), (Point::new(0, 11), 11));
    }

    #[test]
    fn points_inside_edit_snap_to_new_end() {
        let edit = edit(3, 8, 4);
        let (mut point, mut byte) = (Point::new(0, 5), TextSize::new(5));
        edit.edit_point(&mut point, &mut byte);
        assert_eq!((point, u32::from(byte)), (Point::new(0, 4), 4));

        let (mut point, mut byte) = (Point::new(0, 2), TextSize::new(2));
        edit.edit_point(&mut point, &mut byte);
        assert_eq!((point, u32::from(byte)), (Point::new(0, 2), 2));
    }

    #[test]
    fn ranges_follow_deletion() {
        let mut ranges = [range(0, 5), range(15, 29), range(39, 53), range(62, 68)];
        edit_included_ranges(&mut ranges, &edit(29, 53, 29));
        assert_eq!(ranges, [range(0, 5), range(15, 29), range(29, 29), range(38, 44)]);
    }

    #[test]
    fn unbounded_range_stays_unbounded() {
        let mut whole = Range::default();
        edit(3, 5, 10).edit_range(&mut whole);
        assert_eq!(whole, Range::default());
    }
}
