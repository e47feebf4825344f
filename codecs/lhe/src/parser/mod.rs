//! Bit-level reading and writing
//!
//! Every multi-bit field of the wire format is MSB-first within
//! bytes; field boundaries are bits, not bytes.

mod reader;
mod writer;

pub use reader::LheReader;
pub use writer::BitWriter;
