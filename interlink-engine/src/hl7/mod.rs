//! HL7 v2.x support: field paths, the lazy parsed view, ACK generation,
//! and MLLP framing.
//!
//! Parsing is delimiter-aware (delimiters are discovered from the MSH
//! segment of each message) and lazy: nothing is parsed until the first
//! field access, and resolved paths are memoised.

pub mod ack;
pub mod mllp;
pub mod parsed;
pub mod path;

pub use ack::{build_ack, AckCode};
pub use mllp::{read_frame, unwrap_frame, wrap, CARRIAGE_RETURN, END_BLOCK, START_BLOCK};
pub use parsed::{Delimiters, ParsedView};
pub use path::FieldPath;
