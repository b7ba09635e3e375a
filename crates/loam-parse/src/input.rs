use loam_lexer::TextInput;
use loam_span::Point;

const CHUNK_UNITS: usize = 1024;

/// UTF-16 code units served to the lexer as bytes in one byte order.
pub(crate) struct Utf16Input<'a> {
    units: &'a [u16],
    to_bytes: fn(u16) -> [u8; 2],
}

impl<'a> Utf16Input<'a> {
    pub(crate) fn little_endian(units: &'a [u16]) -> Self {
        Self { units, to_bytes: u16::to_le_bytes }
    }

    pub(crate) fn big_endian(units: &'a [u16]) -> Self {
        Self { units, to_bytes: u16::to_be_bytes }
    }
}

impl TextInput for Utf16Input<'_> {
    fn read(&mut self, byte: usize, _: Point, chunk: &mut Vec<u8>) {
        let Some(rest) = self.units.get(byte / 2..) else { return };
        let to_bytes = self.to_bytes;
        chunk.extend(rest.iter().take(CHUNK_UNITS).flat_map(|&unit| to_bytes(unit)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_bytes_in_order() {
        let units: Vec<u16> = "ab".encode_utf16().collect();
        let mut chunk = Vec::new();
        Utf16Input::little_endian(&units).read(2, Point::ZERO, &mut chunk);
        assert_eq!(chunk, [b'b', 0]);

        chunk.clear();
        Utf16Input::big_endian(&units).read(0, Point::ZERO, &mut chunk);
        assert_eq!(chunk, [0, b'a', 0, b'b']);

        chunk.clear();
        Utf16Input::big_endian(&units).read(10, Point::ZERO, &mut chunk);
        assert!(chunk.is_empty());
    }
}
