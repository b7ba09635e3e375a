use std::fmt;

/// Which part of the engine produced a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogType {
    Parse,
    Lex,
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogType::Parse => "parse",
            LogType::Lex => "lex",
        })
    }
}

/// A caller-installed sink for the engine's human-readable trace.
pub type Logger = Box<dyn FnMut(LogType, &str) + Send>;
