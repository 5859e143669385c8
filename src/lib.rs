//! # revdex
//!
//! A compressed, disk-resident inverted index built with bounded memory.
//!
//! ## Features
//!
//! - Group varint compression of gap-encoded posting lists
//! - Blocked dictionary with front-of-block term offsets
//! - Single-pass in-memory inversion (SPIMI) into temporary segments
//! - Multi-way segment merge into the final index
//! - Generic external merge sort with pluggable record codecs
//! - Pluggable storage backends and memory policies

pub mod cli;
pub mod codec;
pub mod error;
pub mod index;
pub mod policy;
pub mod sorting;
pub mod spimi;
pub mod storage;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
