use crate::{LANGUAGE_VERSION, MIN_COMPATIBLE_LANGUAGE_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LanguageError {
    #[error(
        "Incompatible language version {0}. Expected minimum {MIN_COMPATIBLE_LANGUAGE_VERSION}, maximum {LANGUAGE_VERSION}"
    )]
    Version(usize),
}
