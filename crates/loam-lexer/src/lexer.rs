use std::fmt;

use loam_language::{LexContext, Symbol};
use loam_span::{Length, Point, Range, TextSize};

use crate::{IncludedRangesError, InputEncoding, LogType, Logger, TextInput};

const BYTE_ORDER_MARK: char = '\u{feff}';

/// Scanning state that survives between tokens and between resumed parses.
///
/// The lexer only holds a copy of the current chunk of text. Operations that
/// may need more text take the [`TextInput`] explicitly.
pub struct Lexer {
    lookahead: char,
    decode_error: bool,
    lookahead_size: u32,
    result_symbol: Symbol,

    current_position: Length,
    token_start_position: Length,
    token_end_position: Option<Length>,

    included_ranges: Vec<Range>,
    current_included_range_index: usize,

    chunk: Vec<u8>,
    chunk_start: usize,

    column: Option<u32>,
    did_get_column: bool,

    encoding: InputEncoding,
    logger: Option<Logger>,
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Lexer {
    pub fn new() -> Self {
        Self {
            lookahead: '\0',
            decode_error: false,
            lookahead_size: 0,
            result_symbol: 0,
            current_position: Length::ZERO,
            token_start_position: Length::ZERO,
            token_end_position: None,
            included_ranges: vec![Range::default()],
            current_included_range_index: 0,
            chunk: Vec::new(),
            chunk_start: 0,
            column: Some(0),
            did_get_column: false,
            encoding: InputEncoding::Utf8,
            logger: None,
        }
    }

    pub fn set_logger(&mut self, logger: Option<Logger>) -> Option<Logger> {
        std::mem::replace(&mut self.logger, logger)
    }

    pub fn logger(&self) -> Option<&Logger> {
        self.logger.as_ref()
    }

    pub fn has_logger(&self) -> bool {
        self.logger.is_some()
    }

    /// Sends a message to the caller's logger and to `tracing`.
    pub fn log(&mut self, kind: LogType, message: fmt::Arguments<'_>) {
        tracing::trace!(target: "loam", %kind, "{message}");
        if let Some(logger) = &mut self.logger {
            logger(kind, &message.to_string());
        }
    }

    /// Switches to a new text input, dropping the cached chunk.
    pub fn set_input(&mut self, encoding: InputEncoding) {
        self.encoding = encoding;
        self.clear_chunk();
        self.goto(self.current_position);
    }

    pub fn included_ranges(&self) -> &[Range] {
        &self.included_ranges
    }

    /// Restricts scanning to `ranges`, which must be sorted and disjoint. An
    /// empty list means the whole document.
    pub fn set_included_ranges(&mut self, ranges: &[Range]) -> Result<(), IncludedRangesError> {
        let mut previous_byte = TextSize::new(0);
        for (index, range) in ranges.iter().enumerate() {
            if range.start_byte < previous_byte || range.end_byte < range.start_byte {
                return Err(IncludedRangesError { index });
            }
            previous_byte = range.end_byte;
        }

        self.included_ranges =
            if ranges.is_empty() { vec![Range::default()] } else { ranges.to_vec() };
        self.goto(self.current_position);
        Ok(())
    }

    #[inline]
    pub fn current_position(&self) -> Length {
        self.current_position
    }

    #[inline]
    pub fn token_start_position(&self) -> Length {
        self.token_start_position
    }

    /// End of the last token; meaningful after [`Lexer::finish`].
    #[inline]
    pub fn token_end_position(&self) -> Length {
        self.token_end_position.unwrap_or(self.current_position)
    }

    #[inline]
    pub fn result_symbol(&self) -> Symbol {
        self.result_symbol
    }

    pub fn set_result_symbol(&mut self, symbol: Symbol) {
        self.result_symbol = symbol;
    }

    #[inline]
    pub fn lookahead(&self) -> char {
        self.lookahead
    }

    pub fn did_get_column(&self) -> bool {
        self.did_get_column
    }

    pub fn eof(&self) -> bool {
        self.current_included_range_index == self.included_ranges.len()
    }

    /// Moves to `position` unless the lexer is already there.
    pub fn reset(&mut self, position: Length) {
        if position.bytes != self.current_position.bytes {
            self.goto(position);
        }
    }

    /// Prepares to scan a token at the current position.
    pub fn start(&mut self, input: &mut dyn TextInput) {
        self.token_start_position = self.current_position;
        self.token_end_position = None;
        self.result_symbol = 0;
        self.did_get_column = false;
        if !self.eof() {
            if self.chunk.is_empty() {
                self.get_chunk(input);
            }
            if self.lookahead_size == 0 {
                self.get_lookahead(input);
            }
            if u32::from(self.current_position.bytes) == 0 && self.lookahead == BYTE_ORDER_MARK {
                self.do_advance(input, true);
            }
        }
    }

    /// Completes a token and widens `lookahead_end_byte` to cover every byte
    /// the scan looked at.
    pub fn finish(&mut self, lookahead_end_byte: &mut u32) {
        if self.token_end_position.is_none() {
            self.mark_end();
        }

        let mut current_lookahead_end_byte = u32::from(self.current_position.bytes) + 1;
        // Deciding that a sequence is invalid may require the bytes after it.
        if self.decode_error {
            current_lookahead_end_byte += 4;
        }
        if current_lookahead_end_byte > *lookahead_end_byte {
            *lookahead_end_byte = current_lookahead_end_byte;
        }
    }

    pub fn mark_end(&mut self) {
        // A token that stops at the start of an included range ends where the
        // previous range did.
        if self.current_included_range_index > 0 {
            let index = self.current_included_range_index;
            if let Some(range) = self.included_ranges.get(index) {
                if self.current_position.bytes == range.start_byte {
                    let previous = self.included_ranges[index - 1];
                    self.token_end_position = Some(previous.end());
                    return;
                }
            }
        }
        self.token_end_position = Some(self.current_position);
    }

    pub fn is_at_included_range_start(&self) -> bool {
        self.included_ranges
            .get(self.current_included_range_index)
            .is_some_and(|range| range.start_byte == self.current_position.bytes)
    }

    /// Borrows the lexer together with its input for a lex function.
    pub fn session<'a>(&'a mut self, input: &'a mut dyn TextInput) -> LexSession<'a> {
        LexSession { lexer: self, input }
    }

    pub fn advance(&mut self, input: &mut dyn TextInput, skip: bool) {
        if self.chunk.is_empty() {
            return;
        }
        if self.logger.is_some() || tracing::enabled!(tracing::Level::TRACE) {
            let action = if skip { "skip" } else { "consume" };
            let lookahead = self.lookahead;
            if (' '..='~').contains(&lookahead) {
                self.log(LogType::Lex, format_args!("{action} character:'{lookahead}'"));
            } else {
                self.log(LogType::Lex, format_args!("{action} character:{}", lookahead as u32));
            }
        }
        self.do_advance(input, skip);
    }

    /// Number of characters between the start of the row and the lookahead.
    pub fn column(&mut self, input: &mut dyn TextInput) -> u32 {
        self.did_get_column = true;
        if let Some(column) = self.column {
            return column;
        }

        let goal_byte = self.current_position.bytes;
        let row_start = Length::new(
            goal_byte - TextSize::new(self.current_position.extent.column),
            Point::new(self.current_position.extent.row, 0),
        );
        self.goto(row_start);
        self.get_chunk(input);

        let mut column = 0;
        if !self.eof() {
            self.get_lookahead(input);
            while self.current_position.bytes < goal_byte && !self.chunk.is_empty() {
                column += 1;
                self.do_advance(input, false);
                if self.eof() {
                    break;
                }
            }
        }
        self.column = Some(column);
        column
    }

    fn do_advance(&mut self, input: &mut dyn TextInput, skip: bool) {
        if self.lookahead_size > 0 {
            if self.lookahead == '\n' {
                self.current_position.extent.row += 1;
                self.current_position.extent.column = 0;
                self.column = Some(0);
            } else {
                self.current_position.extent.column += self.lookahead_size;
                self.column = self.column.map(|column| column + 1);
            }
            self.current_position.bytes += TextSize::new(self.lookahead_size);
        }

        let mut in_range = true;
        loop {
            let Some(range) = self.included_ranges.get(self.current_included_range_index) else {
                in_range = false;
                break;
            };
            if self.current_position.bytes < range.end_byte && range.end_byte != range.start_byte {
                break;
            }
            self.current_included_range_index += 1;
            match self.included_ranges.get(self.current_included_range_index) {
                Some(next) => {
                    self.current_position = next.start();
                    self.column = None;
                }
                None => {
                    in_range = false;
                    break;
                }
            }
        }

        if skip {
            self.token_start_position = self.current_position;
        }

        if in_range {
            let position = self.position_bytes();
            if position < self.chunk_start || position >= self.chunk_start + self.chunk.len() {
                self.get_chunk(input);
            }
            self.get_lookahead(input);
        } else {
            self.clear_chunk();
            self.lookahead = '\0';
            self.decode_error = false;
            self.lookahead_size = 1;
        }
    }

    /// Moves to the first included position at or after `position`.
    fn goto(&mut self, position: Length) {
        if position.bytes != self.current_position.bytes {
            self.column = if position.extent.column == 0 { Some(0) } else { None };
        }
        self.current_position = position;

        let found = self.included_ranges.iter().enumerate().find(|(_, range)| {
            range.end_byte > self.current_position.bytes && range.end_byte > range.start_byte
        });

        match found {
            Some((index, range)) => {
                if range.start_byte >= self.current_position.bytes {
                    self.current_position = range.start();
                    self.column = None;
                }
                self.current_included_range_index = index;
                let position = self.position_bytes();
                if !self.chunk.is_empty()
                    && (position < self.chunk_start
                        || position >= self.chunk_start + self.chunk.len())
                {
                    self.clear_chunk();
                }
                self.lookahead_size = 0;
                self.lookahead = '\0';
                self.decode_error = false;
            }
            None => {
                self.current_included_range_index = self.included_ranges.len();
                if let Some(last) = self.included_ranges.last() {
                    self.current_position = last.end();
                }
                self.clear_chunk();
                self.lookahead_size = 1;
                self.lookahead = '\0';
                self.decode_error = false;
            }
        }
    }

    fn get_chunk(&mut self, input: &mut dyn TextInput) {
        self.chunk_start = self.position_bytes();
        self.chunk.clear();
        input.read(self.chunk_start, self.current_position.extent, &mut self.chunk);
        if self.chunk.is_empty() {
            self.current_included_range_index = self.included_ranges.len();
        }
    }

    fn clear_chunk(&mut self) {
        self.chunk.clear();
        self.chunk_start = 0;
    }

    fn get_lookahead(&mut self, input: &mut dyn TextInput) {
        let offset = self.position_bytes().saturating_sub(self.chunk_start);
        let remaining = self.chunk.get(offset..).unwrap_or_default();
        if remaining.is_empty() {
            self.lookahead_size = 1;
            self.lookahead = '\0';
            self.decode_error = false;
            return;
        }

        let (mut code_point, mut size) = self.encoding.decode(remaining);
        // A character split across chunks is decoded again from a fresh chunk.
        if code_point < 0 && remaining.len() < 4 {
            self.get_chunk(input);
            (code_point, size) = self.encoding.decode(&self.chunk);
        }

        match u32::try_from(code_point).ok().and_then(char::from_u32) {
            Some(c) => {
                self.lookahead = c;
                self.lookahead_size = size.max(1);
                self.decode_error = false;
            }
            None => {
                self.lookahead = char::REPLACEMENT_CHARACTER;
                self.lookahead_size = 1;
                self.decode_error = true;
            }
        }
    }

    #[inline]
    fn position_bytes(&self) -> usize {
        u32::from(self.current_position.bytes) as usize
    }
}

impl fmt::Debug for Lexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lexer")
            .field("current_position", &self.current_position)
            .field("lookahead", &self.lookahead)
            .field("included_ranges", &self.included_ranges)
            .finish_non_exhaustive()
    }
}

/// A [`Lexer`] bound to its input for the duration of one scan.
pub struct LexSession<'a> {
    lexer: &'a mut Lexer,
    input: &'a mut dyn TextInput,
}

impl LexSession<'_> {
    pub fn lexer(&mut self) -> &mut Lexer {
        &mut *self.lexer
    }

    pub fn start(&mut self) {
        self.lexer.start(&mut *self.input);
    }
}

impl LexContext for LexSession<'_> {
    fn lookahead(&self) -> char {
        self.lexer.lookahead
    }

    fn advance(&mut self, skip: bool) {
        self.lexer.advance(&mut *self.input, skip);
    }

    fn mark_end(&mut self) {
        self.lexer.mark_end();
    }

    fn set_result_symbol(&mut self, symbol: Symbol) {
        self.lexer.result_symbol = symbol;
    }

    fn column(&mut self) -> u32 {
        self.lexer.column(&mut *self.input)
    }

    fn is_at_included_range_start(&self) -> bool {
        self.lexer.is_at_included_range_start()
    }

    fn eof(&self) -> bool {
        self.lexer.eof()
    }
}

#[cfg(test)]
mod tests;
