use loam_language::Symbol;

/// A grammar that cannot be turned into parse tables.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrammarError {
    #[error("grammar has no rules")]
    NoRules,
    #[error("undefined symbol `{0}`")]
    UndefinedSymbol(String),
    #[error("`{0}` is defined more than once")]
    DuplicateName(String),
    #[error("token `{name}` was declared with id {found}, but its position gives id {expected}")]
    TokenId { name: String, expected: Symbol, found: Symbol },
    #[error("extra `{0}` is not a token")]
    InvalidExtra(String),
    #[error("word token `{0}` is not a named token")]
    InvalidWord(String),
    #[error("alias `{0}` must wrap a single symbol")]
    InvalidAlias(String),
    #[error("supertype `{0}` must be a hidden rule")]
    InvalidSupertype(String),
    #[error("unresolved conflict on `{lookahead}` between {}", .rules.join(", "))]
    Conflict { lookahead: String, rules: Vec<String> },
    #[error("grammar needs {0} entries, more than a table can index")]
    TooLarge(usize),
}
