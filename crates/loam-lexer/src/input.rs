use loam_span::Point;

/// A source of document text, read in chunks.
pub trait TextInput {
    /// Appends the text starting at `byte` to `chunk`, which is empty on
    /// entry. Leaving it empty signals the end of the input.
    fn read(&mut self, byte: usize, point: Point, chunk: &mut Vec<u8>);
}

/// Input served from a contiguous buffer.
#[derive(Debug, Clone, Copy)]
pub struct SliceInput<'a>(pub &'a [u8]);

impl TextInput for SliceInput<'_> {
    fn read(&mut self, byte: usize, _: Point, chunk: &mut Vec<u8>) {
        if let Some(rest) = self.0.get(byte..) {
            chunk.extend_from_slice(rest);
        }
    }
}

/// Input served by a callback that returns the text at a position.
pub struct FnInput<F>(pub F);

impl<F, T> TextInput for FnInput<F>
where
    F: FnMut(usize, Point) -> T,
    T: AsRef<[u8]>,
{
    fn read(&mut self, byte: usize, point: Point, chunk: &mut Vec<u8>) {
        let text = (self.0)(byte, point);
        chunk.extend_from_slice(text.as_ref());
    }
}

/// Decodes one code point from the front of a byte slice, returning the code
/// point and the number of bytes it occupied. A negative code point marks an
/// invalid sequence.
pub type DecodeFn = fn(&[u8]) -> (i32, u32);

/// How the bytes of the input map to code points.
#[derive(Debug, Clone, Copy)]
pub enum InputEncoding {
    Utf8,
    Utf16LE,
    Utf16BE,
    Custom(DecodeFn),
}

impl InputEncoding {
    pub(crate) fn decode(self, bytes: &[u8]) -> (i32, u32) {
        match self {
            InputEncoding::Utf8 => decode_utf8(bytes),
            InputEncoding::Utf16LE => decode_utf16_le(bytes),
            InputEncoding::Utf16BE => decode_utf16_be(bytes),
            InputEncoding::Custom(decode) => decode(bytes),
        }
    }
}

pub fn decode_utf8(bytes: &[u8]) -> (i32, u32) {
    let prefix = &bytes[..bytes.len().min(4)];
    let valid = match std::str::from_utf8(prefix) {
        Ok(text) => text,
        Err(error) => std::str::from_utf8(&prefix[..error.valid_up_to()]).unwrap_or_default(),
    };
    match valid.chars().next() {
        Some(c) => (c as i32, c.len_utf8() as u32),
        None => (-1, 1),
    }
}

pub fn decode_utf16_le(bytes: &[u8]) -> (i32, u32) {
    decode_utf16(bytes, u16::from_le_bytes)
}

pub fn decode_utf16_be(bytes: &[u8]) -> (i32, u32) {
    decode_utf16(bytes, u16::from_be_bytes)
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> (i32, u32) {
    let units = bytes.chunks_exact(2).take(2).map(|pair| unit([pair[0], pair[1]]));
    match char::decode_utf16(units).next() {
        Some(Ok(c)) => (c as i32, c.len_utf16() as u32 * 2),
        Some(Err(_)) => (-1, 2),
        None => (-1, bytes.len().clamp(1, 2) as u32),
    }
}
