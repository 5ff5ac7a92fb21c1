use thiserror::Error;

/// Errors raised by the chain store and walk engine.
///
/// Two "missing" outcomes are deliberately distinguished:
/// - a dataset looked up without `create` is an error (`DatasetNotFound`)
/// - a state that was never observed is not an error, it is a dead end
#[derive(Error, Debug)]
pub enum Error {
	/// Invalid configuration (state sizes, level count, rank bounds).
	#[error("Invalid configuration: {0}")]
	Config(String),

	#[error("Dataset not found: {0}")]
	DatasetNotFound(String),

	/// Backward traversal was requested on a storage that does not track it.
	#[error("Backward links are not tracked by this storage")]
	BackwardDisabled,

	/// Weighted sampling fell through the candidate list.
	#[error("Invalid link count sum: {0}")]
	InvalidLinkCount(u64),

	#[error("Unknown scorer: {0}")]
	UnknownScorer(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("SQLite error: {0}")]
	Sqlite(#[from] rusqlite::Error),

	#[error("Binary snapshot error: {0}")]
	Postcard(#[from] postcard::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
