//! Warckit: streaming WARC and ARC archive tool
//!
//! This crate provides both a library API and a binary CLI application
//! for reading and writing Web ARChive (WARC, ISO 28500) files and legacy
//! ARC files in a single forward pass at bounded memory.
//!
//! The main entrypoints are [`archive::ArchiveIterator`] for reading and
//! [`builder::RecordBuilder`] with [`writer::WarcWriter`] for writing.
//! Reading layers length limiting, per-member gzip handling, chunked
//! transfer decoding, content decompression, and digest verification over
//! any `std::io::Read` source, seekable or not.

pub mod archive;
pub mod builder;
pub mod chunked;
pub mod compress;
pub mod digest;
pub mod error;
pub mod fields;
pub mod headers;
pub mod io;
pub mod loader;
pub mod record;
pub mod recompress;
pub mod util;
pub mod writer;

#[cfg(feature = "bin")]
#[doc(hidden)]
pub mod app;
