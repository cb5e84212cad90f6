//! chunked-slab-cache: slab caching for chunked matrix extraction.
//!
//! Reading a row or column of a chunked matrix means decoding whole chunks.
//! The caches here decide which decoded chunks ("slabs") stay resident in a
//! bounded budget, and batch decoding work when the access sequence is known
//! in advance.

pub mod cache;
pub mod config;
pub mod simulate;
