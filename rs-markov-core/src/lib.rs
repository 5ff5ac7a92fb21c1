//! Markov chain text generation library.
//!
//! This crate provides a trainable weighted random walk generator:
//! - N-gram extraction from an opaque token stream
//! - Two link storage backends (in-memory with JSON/binary snapshots, SQLite)
//! - Forward and backward weighted random walks
//! - Reply seeding and candidate ranking
//!
//! Tokenization and text formatting are left to the caller.

/// Generator, parser, walks, reply and ranking.
pub mod model;

/// Link storage contract and backends.
pub mod storage;

/// Error type shared by the whole crate.
pub mod error;

/// I/O utilities (file loading, path helpers).
pub mod io;

pub use error::{Error, Result};
