use text_size::{TextRange, TextSize};

use crate::{Length, Point};

/// A half-open span of a document, in both bytes and points.
///
/// An end of `u32::MAX` bytes and `Point::MAX` means "until the end of the
/// document".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub start_byte: TextSize,
    pub end_byte: TextSize,
    pub start_point: Point,
    pub end_point: Point,
}

impl Range {
    #[inline]
    pub const fn new(
        start_byte: TextSize,
        end_byte: TextSize,
        start_point: Point,
        end_point: Point,
    ) -> Self {
        Self { start_byte, end_byte, start_point, end_point }
    }

    pub(crate) fn between(start: Length, end: Length) -> Self {
        Self::new(start.bytes, end.bytes, start.extent, end.extent)
    }

    /// The byte span of this range.
    #[inline]
    pub fn byte_range(&self) -> TextRange {
        TextRange::new(self.start_byte, self.end_byte.max(self.start_byte))
    }

    #[inline]
    pub fn start(&self) -> Length {
        Length::new(self.start_byte, self.start_point)
    }

    #[inline]
    pub fn end(&self) -> Length {
        Length::new(self.end_byte, self.end_point)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start_byte >= self.end_byte
    }
}

impl Default for Range {
    /// The whole document.
    fn default() -> Self {
        Self::new(TextSize::new(0), TextSize::new(u32::MAX), Point::ZERO, Point::MAX)
    }
}

/// Returns the byte spans whose inclusion differs between two sorted range
/// lists: covered by one list but not by the other.
pub fn included_range_differences(old: &[Range], new: &[Range]) -> Vec<Range> {
    let mut differences: Vec<Range> = Vec::new();
    let mut push = |start: Length, end: Length| {
        if let Some(last) = differences.last_mut() {
            if start.bytes <= last.end_byte {
                last.end_byte = end.bytes;
                last.end_point = end.extent;
                return;
            }
        }
        if start.bytes < end.bytes {
            differences.push(Range::between(start, end));
        }
    };

    let (mut old_index, mut new_index) = (0, 0);
    let mut current = Length::ZERO;
    let (mut in_old, mut in_new) = (false, false);

    while old_index < old.len() || new_index < new.len() {
        let next_old = match old.get(old_index) {
            Some(range) if in_old => range.end(),
            Some(range) => range.start(),
            None => Length::MAX,
        };
        let next_new = match new.get(new_index) {
            Some(range) if in_new => range.end(),
            Some(range) => range.start(),
            None => Length::MAX,
        };

        if next_old.bytes < next_new.bytes {
            if in_old != in_new {
                push(current, next_old);
            }
            if in_old {
                old_index += 1;
            }
            current = next_old;
            in_old = !in_old;
        } else if next_new.bytes < next_old.bytes {
            if in_old != in_new {
                push(current, next_new);
            }
            if in_new {
                new_index += 1;
            }
            current = next_new;
            in_new = !in_new;
        } else {
            if in_old != in_new {
                push(current, next_new);
            }
            if in_old {
                old_index += 1;
            }
            if in_new {
                new_index += 1;
            }
            in_old = !in_old;
            in_new = !in_new;
            current = next_new;
        }
    }

    differences
}

/// Whether any range at or after `start_index` overlaps `start..end`.
pub fn ranges_intersect(
    ranges: &[Range],
    start_index: usize,
    start: TextSize,
    end: TextSize,
) -> bool {
    for range in ranges.iter().skip(start_index) {
        if range.end_byte > start {
            return range.start_byte < end;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u32, end: u32) -> Range {
        Range::new(start.into(), end.into(), Point::new(0, start), Point::new(0, end))
    }

    #[test]
    fn default_covers_everything() {
        let range = Range::default();
        assert_eq!(u32::from(range.start_byte), 0);
        assert_eq!(u32::from(range.end_byte), u32::MAX);
        assert_eq!(range.end_point, Point::MAX);
    }

    #[test]
    fn identical_lists_have_no_differences() {
        let ranges = [range(0, 5), range(10, 20)];
        assert!(included_range_differences(&ranges, &ranges).is_empty());
    }

    #[test]
    fn differences_cover_symmetric_difference() {
        let old = [range(0, 5), range(10, 20)];
        let new = [range(0, 5), range(15, 25)];
        assert_eq!(included_range_differences(&old, &new), vec![range(10, 15), range(20, 25)]);
    }

    #[test]
    fn adjacent_differences_merge() {
        let old = [range(0, 10)];
        let new = [range(10, 20)];
        assert_eq!(included_range_differences(&old, &new), vec![range(0, 20)]);
    }

    #[test]
    fn intersection() {
        let ranges = [range(0, 5), range(10, 20)];
        assert!(ranges_intersect(&ranges, 0, 3.into(), 4.into()));
        assert!(!ranges_intersect(&ranges, 0, 5.into(), 10.into()));
        assert!(ranges_intersect(&ranges, 1, 5.into(), 11.into()));
        assert!(!ranges_intersect(&ranges, 0, 20.into(), 30.into()));
    }
}
