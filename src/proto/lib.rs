//! Crate implementing the SSYNC wire protocol: the line-oriented framing
//! carried inside a long-lived HTTP request, the missing-check row codec,
//! and the timeout-bounded reader both phases consume.

pub mod frame;
pub mod line_reader;
pub mod missing;

pub use frame::*;
pub use line_reader::{LineReader, WireError};
pub use missing::{decode_missing, encode_missing, encode_wanted, LocalVersion, MissingEntry};
