//! Multiplexed dump archives.
//!
//! archivemux interleaves the records of many concurrently dumped
//! collections into one self-describing byte stream and splits that stream
//! back into per-collection record files.
//!
//! # Crate Structure
//!
//! - [`frame`] - Record framing, block grammar, headers and the prelude codec
//! - [`mux`] - Multiplexer/demultiplexer engines and whole-archive helpers

/// Re-export frame types.
pub mod frame {
    pub use archivemux_frame::*;
}

/// Re-export mux types.
pub mod mux {
    pub use archivemux_mux::*;
}
