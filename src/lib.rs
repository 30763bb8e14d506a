//! Warcstream: streaming WARC reading and writing
//!
//! This crate reads and writes files in the WARC (Web ARChive) format as a
//! single forward pass over a byte stream. It does not build indexes,
//! seek, or decompress; wrap the input in a decompressor first if the
//! archive is compressed.
//!
//! Reading goes through [`read::ArchiveIterator`], which yields one
//! [`record::WarcRecord`] at a time. A record exposes its parsed headers,
//! a bounded reader over its payload, optional lazily parsed HTTP headers,
//! and digest verification. Writing goes through
//! [`record::WarcRecord::write`], which serialises a record with correct
//! framing, content length, and (optionally) freshly computed digests.
//!
//! ```
//! use std::io::{Cursor, Read};
//!
//! use warcstream::read::{ArchiveIterator, ArchiveIteratorConfig};
//!
//! let data = b"WARC/1.1\r\nWARC-Type: resource\r\nContent-Length: 2\r\n\r\nhi\r\n\r\n";
//! let mut archive = ArchiveIterator::new(Cursor::new(data.as_slice()), ArchiveIteratorConfig::default());
//!
//! while let Some(mut record) = archive.next_record().unwrap() {
//!     let mut block = Vec::new();
//!     record.read_to_end(&mut block).unwrap();
//! }
//! ```

pub mod digest;
pub mod error;
pub mod headers;
pub mod io;
pub mod parse;
pub mod read;
pub mod record;
