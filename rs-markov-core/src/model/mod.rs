//! Top-level module for the Markov chain generator.
//!
//! This module provides:
//! - The token model and link observations (`Token`, `Link`)
//! - N-gram extraction (`Parser`, `LevelParser`)
//! - Weighted random walks over a storage (`Walk`)
//! - A high-level generator (`Markov`) with reply strategies and
//!   candidate ranking

/// Tokens, link observations and dataset key suffixes.
pub mod token;

/// Sliding-window n-gram extraction.
///
/// Turns a lazy token stream into a lazy stream of links, one per
/// configured state size.
pub mod parser;

/// JSON settings helpers (deep merge, separator lookup).
pub mod settings;

/// Weighted edge sampling and lazy forward/backward walks.
pub mod walk;

/// Iterator decorator logging progress while training.
pub mod progress;

/// High-level generator: parser + storage + random source.
pub mod markov;

/// Reply strategies (continue after, continue before, topical reply).
pub mod reply;

/// Candidate scoring and ranking, with a registry of named scorers.
pub mod rank;

pub use markov::Markov;
pub use parser::{LevelParser, LevelParserSettings, Parser, ParserSettings};
pub use rank::{Rank, RankSettings, Scorer};
pub use reply::{Candidates, ReplyInput, ReplyMode};
pub use token::{Link, Token};
pub use walk::Walk;
