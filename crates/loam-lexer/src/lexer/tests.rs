use loam_span::Point;

use super::*;
use crate::{FnInput, SliceInput, decode_utf16_le};

/// Scans one run of alphanumerics after skipping spaces, returning the token
/// span and the lookahead end.
fn scan_word(lexer: &mut Lexer, input: &mut dyn TextInput) -> Option<(u32, u32, u32)> {
    let mut session = lexer.session(input);
    session.start();
    while session.lookahead() == ' ' {
        session.advance(true);
    }
    if session.eof() {
        return None;
    }
    while session.lookahead().is_alphanumeric() {
        session.advance(false);
    }
    let lexer = session.lexer();
    let mut lookahead_end = 0;
    lexer.finish(&mut lookahead_end);
    Some((
        lexer.token_start_position().bytes.into(),
        lexer.token_end_position().bytes.into(),
        lookahead_end,
    ))
}

fn range(start: u32, end: u32) -> Range {
    Range::new(start.into(), end.into(), Point::new(0, start), Point::new(0, end))
}

#[test]
fn scans_words_and_skips_padding() {
    let mut lexer = Lexer::new();
    let mut input = SliceInput(b"ab  cd");
    assert_eq!(scan_word(&mut lexer, &mut input), Some((0, 2, 3)));
    assert_eq!(scan_word(&mut lexer, &mut input), Some((4, 6, 7)));
    assert_eq!(scan_word(&mut lexer, &mut input), None);
    assert!(lexer.eof());
}

#[test]
fn reads_chunks_lazily() {
    let text = b"one two";
    let mut reads = Vec::new();
    let mut lexer = Lexer::new();
    let mut input = FnInput(|byte: usize, _: Point| {
        reads.push(byte);
        text.get(byte..(byte + 1).min(text.len())).unwrap_or_default()
    });
    assert_eq!(scan_word(&mut lexer, &mut input), Some((0, 3, 4)));
    drop(input);
    assert_eq!(reads, vec![0, 1, 2, 3]);
}

#[test]
fn tokens_span_included_ranges() {
    let mut lexer = Lexer::new();
    lexer.set_included_ranges(&[range(2, 4), range(6, 8)]).unwrap();
    let mut input = SliceInput(b"xxabyycdzz");
    assert_eq!(scan_word(&mut lexer, &mut input), Some((2, 8, 9)));
    assert!(lexer.eof());
}

#[test]
fn token_ending_at_range_start_ends_at_previous_range() {
    let mut lexer = Lexer::new();
    lexer.set_included_ranges(&[range(0, 2), range(5, 8)]).unwrap();
    let mut input = SliceInput(b"ab---cd");
    let mut session = lexer.session(&mut input);
    session.start();
    session.advance(false);
    session.advance(false);
    assert!(session.is_at_included_range_start());
    session.mark_end();
    assert_eq!(u32::from(lexer.token_end_position().bytes), 2);
    assert_eq!(u32::from(lexer.current_position().bytes), 5);
}

#[test]
fn rejects_unordered_ranges() {
    let mut lexer = Lexer::new();
    let error = lexer.set_included_ranges(&[range(0, 5), range(4, 9)]).unwrap_err();
    assert_eq!(error.index, 1);
    let error = lexer.set_included_ranges(&[range(6, 5)]).unwrap_err();
    assert_eq!(error.to_string(), "Incorrect range by index: 0");
    assert_eq!(lexer.included_ranges(), &[Range::default()]);

    lexer.set_included_ranges(&[range(0, 5), range(5, 9)]).unwrap();
    assert_eq!(lexer.included_ranges().len(), 2);
    lexer.set_included_ranges(&[]).unwrap();
    assert_eq!(lexer.included_ranges(), &[Range::default()]);
}

#[test]
fn skips_byte_order_mark() {
    let mut lexer = Lexer::new();
    let mut input = SliceInput("\u{feff}word".as_bytes());
    assert_eq!(scan_word(&mut lexer, &mut input).map(|(start, end, _)| (start, end)), Some((3, 7)));
}

#[test]
fn columns_count_characters() {
    let text = "ab\n  cd".as_bytes();
    let mut lexer = Lexer::new();
    let mut input = SliceInput(text);
    scan_word(&mut lexer, &mut input);
    let mut session = lexer.session(&mut input);
    session.start();
    while session.lookahead().is_whitespace() {
        session.advance(true);
    }
    assert_eq!(session.column(), 2);
    assert!(lexer.did_get_column());

    let mut lexer = Lexer::new();
    lexer.reset(Length::new(6.into(), Point::new(1, 3)));
    let mut session = lexer.session(&mut input);
    session.start();
    assert_eq!(session.column(), 3);
    assert_eq!(session.lookahead(), 'd');
}

#[test]
fn invalid_bytes_widen_lookahead() {
    let mut lexer = Lexer::new();
    let mut input = SliceInput(b"ab\xff");
    let (_, end, lookahead_end) = scan_word(&mut lexer, &mut input).unwrap();
    assert_eq!(end, 2);
    assert_eq!(lookahead_end, 7);
    assert_eq!(lexer.lookahead(), char::REPLACEMENT_CHARACTER);
}

#[test]
fn utf16_positions_count_bytes() {
    let bytes: Vec<u8> = "héllo x".encode_utf16().flat_map(u16::to_le_bytes).collect();
    let mut lexer = Lexer::new();
    lexer.set_input(InputEncoding::Custom(decode_utf16_le));
    let mut input = SliceInput(&bytes);
    assert_eq!(scan_word(&mut lexer, &mut input).map(|(start, end, _)| (start, end)), Some((0, 10)));
    assert_eq!(lexer.token_end_position().extent, Point::new(0, 10));
}

#[test]
fn logger_sees_characters() {
    use std::sync::{Arc, Mutex};

    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&messages);
    let mut lexer = Lexer::new();
    lexer.set_logger(Some(Box::new(move |kind: LogType, message: &str| {
        sink.lock().unwrap().push(format!("{kind}: {message}"));
    })));
    let mut input = SliceInput(b" a");
    scan_word(&mut lexer, &mut input);
    assert_eq!(
        *messages.lock().unwrap(),
        vec!["lex: skip character:' '".to_owned(), "lex: consume character:'a'".to_owned()]
    );
}
