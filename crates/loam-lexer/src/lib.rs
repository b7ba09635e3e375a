//! Token-level scanning over caller-supplied text.
//!
//! The lexer never sees a whole document. It pulls chunks from a
//! [`TextInput`] as it advances, decodes them with an [`InputEncoding`] and
//! only visits the byte spans listed in its included ranges. Tokens are
//! reported in document coordinates.

mod error;
mod input;
mod lexer;
mod log;

pub use error::IncludedRangesError;
pub use input::{
    DecodeFn, FnInput, InputEncoding, SliceInput, TextInput, decode_utf8, decode_utf16_be,
    decode_utf16_le,
};
pub use lexer::{LexSession, Lexer};
pub use log::{LogType, Logger};
