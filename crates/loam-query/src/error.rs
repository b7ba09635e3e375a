/// What kind of mistake a [`QueryError`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryErrorKind {
    Syntax,
    NodeType,
    Field,
    Capture,
    Predicate,
    Structure,
    Language,
}

/// A query that could not be compiled.
///
/// For node type, field and capture errors `message` is the offending name.
/// For syntax and structure errors it is the source line with a caret under
/// the error position.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", describe(.row, .column, .kind, .message))]
pub struct QueryError {
    pub row: usize,
    pub column: usize,
    pub offset: usize,
    pub message: String,
    pub kind: QueryErrorKind,
}

fn describe(row: &usize, column: &usize, kind: &QueryErrorKind, message: &str) -> String {
    let prefix = match kind {
        QueryErrorKind::Field => "Invalid field name ",
        QueryErrorKind::NodeType => "Invalid node type ",
        QueryErrorKind::Capture => "Invalid capture name ",
        QueryErrorKind::Predicate => "Invalid predicate: ",
        QueryErrorKind::Structure => "Impossible pattern:\n",
        QueryErrorKind::Syntax => "Invalid syntax:\n",
        QueryErrorKind::Language => return message.to_owned(),
    };
    format!("Query error at {}:{}. {prefix}{message}", row + 1, column + 1)
}

impl QueryError {
    fn located(source: &str, offset: usize, kind: QueryErrorKind, message: String) -> Self {
        let offset = offset.min(source.len());
        let line_start = source[..offset].rfind('\n').map_or(0, |index| index + 1);
        let row = source[..line_start].matches('\n').count();
        Self { row, column: offset - line_start, offset, message, kind }
    }

    /// An error pointing at `offset` with the offending line as its message.
    pub(crate) fn positioned(source: &str, offset: usize, kind: QueryErrorKind) -> Self {
        let offset = offset.min(source.len());
        let line_start = source[..offset].rfind('\n').map_or(0, |index| index + 1);
        let line_end = source[offset..].find('\n').map_or(source.len(), |index| offset + index);
        let line = &source[line_start..line_end];
        let message = if line.is_empty() {
            "Unexpected EOF".to_owned()
        } else {
            format!("{line}\n{}^", " ".repeat(offset - line_start))
        };
        Self::located(source, offset, kind, message)
    }

    pub(crate) fn syntax(source: &str, offset: usize) -> Self {
        Self::positioned(source, offset, QueryErrorKind::Syntax)
    }

    pub(crate) fn structure(source: &str, offset: usize) -> Self {
        Self::positioned(source, offset, QueryErrorKind::Structure)
    }

    /// An error naming the identifier at `offset`.
    pub(crate) fn name(source: &str, offset: usize, kind: QueryErrorKind, name: &str) -> Self {
        Self::located(source, offset, kind, name.to_owned())
    }

    /// Predicate errors are reported on the row their pattern starts on.
    pub(crate) fn predicate(row: usize, message: String) -> Self {
        Self { row, column: 0, offset: 0, message, kind: QueryErrorKind::Predicate }
    }
}
