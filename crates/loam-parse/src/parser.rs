use std::fmt;
use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::{Duration, Instant};

use loam_language::{ExternalScanner, Language, LanguageError};
use loam_lexer::{
    FnInput, IncludedRangesError, InputEncoding, Lexer, LogType, Logger, SliceInput, TextInput,
};
use loam_span::{Length, Point, Range};
use loam_tree::{ReusableNode, Subtree, Tree};

use crate::input::Utf16Input;
use crate::session::Session;
use crate::stack::Stack;

/// A caller hook consulted while parsing. Returning `Break` halts the parse.
pub(crate) type ProgressFn<'a> = dyn FnMut(&ParseState) -> ControlFlow<()> + 'a;

/// Where a parse currently stands, as reported to progress callbacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseState {
    pub(crate) current_byte_offset: usize,
    pub(crate) has_error: bool,
}

impl ParseState {
    pub fn current_byte_offset(&self) -> usize {
        self.current_byte_offset
    }

    pub fn has_error(&self) -> bool {
        self.has_error
    }
}

/// Per-call options for [`Parser::parse_with_options`].
#[derive(Default)]
pub struct ParseOptions<'a> {
    pub(crate) progress_callback: Option<&'a mut ProgressFn<'a>>,
}

impl<'a> ParseOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a callback that is invoked periodically during the parse and
    /// may halt it. A halted parse can be resumed by parsing again.
    #[must_use]
    pub fn progress_callback<F: FnMut(&ParseState) -> ControlFlow<()>>(
        mut self,
        callback: &'a mut F,
    ) -> Self {
        self.progress_callback = Some(callback);
        self
    }
}

impl fmt::Debug for ParseOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseOptions")
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

/// The last token that was lexed, kept so that other stack versions at the
/// same position do not lex it again.
#[derive(Default)]
pub(crate) struct TokenCache {
    pub(crate) token: Option<Subtree>,
    pub(crate) last_external_token: Option<Subtree>,
    pub(crate) byte_index: u32,
}

/// Everything the parser keeps between calls, including the state of a
/// parse that was halted before it finished.
pub(crate) struct Engine {
    pub(crate) lexer: Lexer,
    pub(crate) stack: Stack,
    pub(crate) reusable_node: ReusableNode,
    pub(crate) finished_tree: Option<Subtree>,
    pub(crate) token_cache: TokenCache,
    pub(crate) external_scanner: Option<Box<dyn ExternalScanner>>,
    pub(crate) dot_graph: Option<Box<dyn io::Write + Send>>,
    pub(crate) included_range_differences: Vec<Range>,
    pub(crate) included_range_difference_index: usize,
    pub(crate) timeout: Option<Duration>,
    pub(crate) end_time: Option<Instant>,
    pub(crate) cancellation_flag: Option<Arc<AtomicUsize>>,
    pub(crate) operation_count: u32,
    pub(crate) accept_count: u32,
    pub(crate) has_error: bool,
    pub(crate) canceled_balancing: bool,
    pub(crate) parse_state: ParseState,
}

impl Engine {
    fn new() -> Self {
        Self {
            lexer: Lexer::new(),
            stack: Stack::new(),
            reusable_node: ReusableNode::new(),
            finished_tree: None,
            token_cache: TokenCache::default(),
            external_scanner: None,
            dot_graph: None,
            included_range_differences: Vec::new(),
            included_range_difference_index: 0,
            timeout: None,
            end_time: None,
            cancellation_flag: None,
            operation_count: 0,
            accept_count: 0,
            has_error: false,
            canceled_balancing: false,
            parse_state: ParseState::default(),
        }
    }

    /// Forgets any halted parse.
    pub(crate) fn reset(&mut self) {
        self.external_scanner = None;
        self.reusable_node.clear();
        self.lexer.reset(Length::ZERO);
        self.stack.clear();
        self.token_cache = TokenCache::default();
        self.finished_tree = None;
        self.accept_count = 0;
        self.has_error = false;
        self.canceled_balancing = false;
        self.parse_state = ParseState::default();
    }

    pub(crate) fn is_logging(&self) -> bool {
        self.lexer.has_logger()
            || self.dot_graph.is_some()
            || tracing::enabled!(target: "loam", tracing::Level::TRACE)
    }

    pub(crate) fn log_message(&mut self, message: &str) {
        self.lexer.log(LogType::Parse, format_args!("{message}"));
        if let Some(out) = &mut self.dot_graph {
            let mut label = String::with_capacity(message.len());
            for c in message.chars() {
                if c == '"' || c == '\\' {
                    label.push('\\');
                }
                label.push(c);
            }
            if let Err(error) = write!(out, "graph {{\nlabel=\"{label}\"\n}}\n\n") {
                tracing::warn!(%error, "failed to write dot graph");
            }
        }
    }
}

/// An incremental parser.
///
/// A parser is configured with a [`Language`] and then turns source text into
/// [`Tree`]s. Passing the previous tree of an edited document to the next
/// parse lets unchanged subtrees be reused instead of rebuilt.
///
/// A parse halted by the timeout, the cancellation flag or a progress callback
/// returns `None`. Parsing again continues where it stopped unless the parser
/// was [`reset`](Parser::reset) or given a new language in between.
pub struct Parser {
    language: Option<Language>,
    engine: Engine,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self { language: None, engine: Engine::new() }
    }

    /// Sets the grammar used by later parses. Languages built for an
    /// unsupported table version are rejected and leave the parser as it was.
    pub fn set_language(&mut self, language: &Language) -> Result<(), LanguageError> {
        language.check_version()?;
        self.engine.reset();
        self.language = Some(language.clone());
        Ok(())
    }

    pub fn language(&self) -> Option<&Language> {
        self.language.as_ref()
    }

    /// Installs a callback that receives a description of every lex and parse
    /// action. Returns the previous logger.
    pub fn set_logger(&mut self, logger: Option<Logger>) -> Option<Logger> {
        self.engine.lexer.set_logger(logger)
    }

    pub fn logger(&self) -> Option<&Logger> {
        self.engine.lexer.logger()
    }

    /// Writes graphs of the parse stack and of every finished tree to `out`
    /// in the DOT language while parsing.
    pub fn print_dot_graphs(&mut self, out: impl io::Write + Send + 'static) {
        self.engine.dot_graph = Some(Box::new(out));
    }

    pub fn stop_printing_dot_graphs(&mut self) {
        self.engine.dot_graph = None;
    }

    /// Parses a UTF-8 document.
    pub fn parse(&mut self, text: impl AsRef<[u8]>, old_tree: Option<&Tree>) -> Option<Tree> {
        let mut input = SliceInput(text.as_ref());
        self.parse_input(&mut input, InputEncoding::Utf8, old_tree, ParseOptions::default())
    }

    /// Parses UTF-8 text read through `callback`, which returns the text
    /// starting at a byte offset and point. An empty slice ends the input.
    pub fn parse_with<T, F>(&mut self, callback: &mut F, old_tree: Option<&Tree>) -> Option<Tree>
    where
        T: AsRef<[u8]>,
        F: FnMut(usize, Point) -> T,
    {
        self.parse_with_options(callback, old_tree, ParseOptions::default())
    }

    pub fn parse_with_options<T, F>(
        &mut self,
        callback: &mut F,
        old_tree: Option<&Tree>,
        options: ParseOptions<'_>,
    ) -> Option<Tree>
    where
        T: AsRef<[u8]>,
        F: FnMut(usize, Point) -> T,
    {
        let mut input = FnInput(callback);
        self.parse_input(&mut input, InputEncoding::Utf8, old_tree, options)
    }

    /// Parses UTF-16 text stored in little-endian byte order. Offsets in the
    /// resulting tree are byte offsets into that encoding.
    pub fn parse_utf16_le(&mut self, text: &[u16], old_tree: Option<&Tree>) -> Option<Tree> {
        let mut input = Utf16Input::little_endian(text);
        self.parse_input(&mut input, InputEncoding::Utf16LE, old_tree, ParseOptions::default())
    }

    pub fn parse_utf16_be(&mut self, text: &[u16], old_tree: Option<&Tree>) -> Option<Tree> {
        let mut input = Utf16Input::big_endian(text);
        self.parse_input(&mut input, InputEncoding::Utf16BE, old_tree, ParseOptions::default())
    }

    /// Parses text read through `callback` and decoded with `encoding`.
    pub fn parse_custom_encoding<T, F>(
        &mut self,
        callback: &mut F,
        encoding: InputEncoding,
        old_tree: Option<&Tree>,
        options: ParseOptions<'_>,
    ) -> Option<Tree>
    where
        T: AsRef<[u8]>,
        F: FnMut(usize, Point) -> T,
    {
        let mut input = FnInput(callback);
        self.parse_input(&mut input, encoding, old_tree, options)
    }

    /// Parses from any [`TextInput`].
    pub fn parse_input(
        &mut self,
        input: &mut dyn TextInput,
        encoding: InputEncoding,
        old_tree: Option<&Tree>,
        options: ParseOptions<'_>,
    ) -> Option<Tree> {
        let language = self.language.clone()?;
        let engine = &mut self.engine;
        engine.lexer.set_input(encoding);
        engine.included_range_differences.clear();
        engine.included_range_difference_index = 0;
        engine.operation_count = 0;
        engine.end_time = engine.timeout.map(|timeout| Instant::now() + timeout);

        let mut session = Session {
            engine,
            language: &language,
            input,
            progress: options.progress_callback,
        };
        session.run(old_tree)
    }

    /// Discards the state of a halted parse, so that the next parse starts
    /// from the beginning of the document.
    pub fn reset(&mut self) {
        self.engine.reset();
    }

    /// Maximum duration of a single parse call, in microseconds. Zero means
    /// no limit.
    pub fn timeout_micros(&self) -> u64 {
        self.engine.timeout.map_or(0, |timeout| timeout.as_micros() as u64)
    }

    pub fn set_timeout_micros(&mut self, timeout_micros: u64) {
        self.engine.timeout =
            (timeout_micros > 0).then(|| Duration::from_micros(timeout_micros));
    }

    pub fn included_ranges(&self) -> &[Range] {
        self.engine.lexer.included_ranges()
    }

    /// Restricts parsing to `ranges`, which must be sorted and must not
    /// overlap. An empty slice includes the whole document. On error the
    /// previous ranges are kept.
    pub fn set_included_ranges(&mut self, ranges: &[Range]) -> Result<(), IncludedRangesError> {
        self.engine.lexer.set_included_ranges(ranges)
    }

    pub fn cancellation_flag(&self) -> Option<&Arc<AtomicUsize>> {
        self.engine.cancellation_flag.as_ref()
    }

    /// Installs a flag that halts the parse once it holds a nonzero value.
    pub fn set_cancellation_flag(&mut self, flag: Option<Arc<AtomicUsize>>) {
        self.engine.cancellation_flag = flag;
    }
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("language", &self.language.as_ref().and_then(Language::name))
            .field("timeout", &self.engine.timeout)
            .field("lexer", &self.engine.lexer)
            .finish_non_exhaustive()
    }
}
