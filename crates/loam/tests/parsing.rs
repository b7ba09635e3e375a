use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use expect_test::expect;
use loam::{InputEdit, Language, Parser, Point, TextSize, Tree};

fn parser(language: &Language) -> Parser {
    let mut parser = Parser::new();
    parser.set_language(language).unwrap();
    parser
}

/// Serves the text one byte at a time and remembers which offsets were read.
struct ReadRecorder<'a> {
    content: &'a [u8],
    indices_read: Vec<usize>,
}

impl<'a> ReadRecorder<'a> {
    fn new(content: &'a str) -> Self {
        Self { content: content.as_bytes(), indices_read: Vec::new() }
    }

    fn read(&mut self, offset: usize) -> &'a [u8] {
        if offset >= self.content.len() {
            return &[];
        }
        if let Err(index) = self.indices_read.binary_search(&offset) {
            self.indices_read.insert(index, offset);
        }
        &self.content[offset..offset + 1]
    }

    /// Runs of consecutive bytes that were read.
    fn strings_read(&self) -> Vec<&'a str> {
        let mut strings = Vec::new();
        let mut run: Option<(usize, usize)> = None;
        for &index in &self.indices_read {
            run = match run {
                Some((start, end)) if end == index => Some((start, end + 1)),
                Some((start, end)) => {
                    strings.push(std::str::from_utf8(&self.content[start..end]).unwrap());
                    Some((index, index + 1))
                }
                None => Some((index, index + 1)),
            };
        }
        if let Some((start, end)) = run {
            strings.push(std::str::from_utf8(&self.content[start..end]).unwrap());
        }
        strings
    }
}

fn insert(tree: &mut Tree, text: &mut String, offset: usize, inserted: &str) {
    let start_position = Point::of(text[..offset].as_bytes());
    text.insert_str(offset, inserted);
    let new_end = offset + inserted.len();
    tree.edit(&InputEdit {
        start_byte: TextSize::new(offset as u32),
        old_end_byte: TextSize::new(offset as u32),
        new_end_byte: TextSize::new(new_end as u32),
        start_position,
        old_end_position: start_position,
        new_end_position: Point::of(text[..new_end].as_bytes()),
    });
}

#[test]
fn rust_items() {
    let mut parser = parser(&loam::grammars::rust());
    let tree = parser.parse("struct Stuff {} fn main() {}", None).unwrap();
    let root = tree.root_node();
    assert_eq!(root.kind(), "source_file");
    assert_eq!(root.child_count(), 2);
    let kinds: Vec<_> = (0..root.child_count()).filter_map(|index| root.child(index)).map(|child| child.kind()).collect();
    assert_eq!(kinds, ["struct_item", "function_item"]);
    assert!(!root.has_error());
}

#[test]
fn edit_at_start_relexes_only_the_changed_tokens() {
    let language = loam::grammars::javascript();
    let mut parser = parser(&language);
    let mut text = String::from("123 + 456 * (10 + x);");
    let mut tree = parser.parse(&text, None).unwrap();
    expect![[r#"(program (expression_statement (binary_expression left: (number) right: (binary_expression left: (number) right: (parenthesized_expression (binary_expression left: (number) right: (identifier)))))))"#]]
        .assert_eq(&tree.root_node().to_sexp());

    insert(&mut tree, &mut text, 3, " || 5");
    let mut recorder = ReadRecorder::new(&text);
    let new_tree = parser.parse_with(&mut |offset, _| recorder.read(offset), Some(&tree)).unwrap();

    assert_eq!(recorder.strings_read(), ["123 || 5 "]);
    let fresh = self::parser(&language).parse(&text, None).unwrap();
    assert_eq!(new_tree.root_node().to_sexp(), fresh.root_node().to_sexp());
}

#[test]
fn edit_in_the_middle_reuses_surrounding_statements() {
    let language = loam::grammars::javascript();
    let mut parser = parser(&language);
    let mut text = String::from("let a = 1;\nlet b = 2;\nlet c = 3;\n");
    let mut tree = parser.parse(&text, None).unwrap();

    insert(&mut tree, &mut text, 20, " + b");
    let mut recorder = ReadRecorder::new(&text);
    let new_tree = parser.parse_with(&mut |offset, _| recorder.read(offset), Some(&tree)).unwrap();

    let fresh = self::parser(&language).parse(&text, None).unwrap();
    assert_eq!(new_tree.root_node().to_sexp(), fresh.root_node().to_sexp());
    let read: usize = recorder.strings_read().iter().map(|string| string.len()).sum();
    assert!(read < text.len(), "read {:?}", recorder.strings_read());
}

#[test]
fn cancellation_from_another_thread() {
    let mut parser = parser(&loam::grammars::json());
    let flag = Arc::new(AtomicUsize::new(0));
    parser.set_cancellation_flag(Some(Arc::clone(&flag)));

    let canceller = thread::spawn({
        let flag = Arc::clone(&flag);
        move || {
            thread::sleep(Duration::from_millis(50));
            flag.store(1, Ordering::SeqCst);
        }
    });

    let mut endless = |offset: usize, _: Point| -> &'static [u8] {
        if offset == 0 { b"[" } else { &b"0, "[(offset - 1) % 3..] }
    };
    let tree = parser.parse_with(&mut endless, None);
    canceller.join().unwrap();
    assert!(tree.is_none());

    flag.store(0, Ordering::SeqCst);
    parser.reset();
    let tree = parser.parse("[0, 1]", None).unwrap();
    assert_eq!(tree.root_node().to_sexp(), "(document (array (number) (number)))");
}
