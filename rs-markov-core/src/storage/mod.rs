//! Link storage backends.
//!
//! Every backend implements the [`Storage`] contract: state key handling,
//! dataset lookup, link insertion, link lookup and traversal, separator
//! rewrite and persistence. Weighted sampling is implemented once on top of
//! this contract (see `model::walk`), backends only store.
//!
//! - [`MemoryStorage`]: dataset → state key → compact edge record, JSON or
//!   binary snapshot persistence.
//! - [`SqliteStorage`]: interned nodes and datasets in a SQLite database.

use std::fmt::Debug;
use std::path::Path;

use serde_json::Value;

use crate::error::Result;
use crate::model::settings;
use crate::model::token::Link;

/// In-memory backend with scalar/array edge record promotion.
pub mod memory;

/// Relational backend (SQLite) with node and dataset interning.
pub mod sqlite;

pub use memory::{EdgeRecord, MemoryStorage};
pub use sqlite::SqliteStorage;

/// One outgoing (or incoming, when walking backward) edge of a state.
///
/// - `count`: number of observations, always >= 1
/// - `value`: token produced by following the edge, `None` for a boundary
/// - `node`: backend-specific neighbor handle (unit for in-memory storage,
///   neighbor node id for SQLite)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge<N> {
	pub count: u64,
	pub value: Option<String>,
	pub node: N,
}

/// Joins state tokens with `separator`.
pub(crate) fn join_with<I, S>(separator: &str, state: I) -> String
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	let mut joined = String::new();
	for (i, token) in state.into_iter().enumerate() {
		if i > 0 {
			joined.push_str(separator);
		}
		joined.push_str(token.as_ref());
	}
	joined
}

/// Last `size` tokens of `tokens`, left-padded with `""`.
pub(crate) fn pad_state(tokens: &[String], size: usize) -> Vec<String> {
	let skip = tokens.len().saturating_sub(size);
	let mut state: Vec<String> = std::iter::repeat_n(String::new(), size.saturating_sub(tokens.len())).collect();
	state.extend(tokens[skip..].iter().cloned());
	state
}

/// Storage contract shared by all backends.
///
/// # Notes
/// - Mutating operations take `&mut self`; lookups used while walking take
///   `&self`. Training and generation can't be interleaved on one storage.
/// - `replace_separator` is the only bulk mutation and completes before any
///   other call can observe the storage.
pub trait Storage {
	/// Resolved dataset handle.
	type Dataset: Clone + Debug;
	/// State handle used while walking.
	type State: Clone + Debug;
	/// Neighbor handle carried by an [`Edge`].
	type Node: Clone + Debug;

	/// Free-form persisted settings (always a JSON object).
	fn settings(&self) -> &Value;

	fn settings_mut(&mut self) -> &mut Value;

	/// Active state separator.
	fn separator(&self) -> &str;

	fn separator_mut(&mut self) -> &mut String;

	fn split_state(&self, state: &str) -> Vec<String> {
		state.split(self.separator()).map(str::to_owned).collect()
	}

	fn join_state<I, S>(&self, state: I) -> String
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		join_with(self.separator(), state)
	}

	/// Rewrites every stored state key, replacing `old` by `new`.
	///
	/// A no-op when `old == new`. Doesn't change the active separator.
	fn replace_separator(&mut self, old: &str, new: &str) -> Result<()>;

	/// Rewrites stored keys and makes `separator` the active separator.
	fn set_separator(&mut self, separator: &str) -> Result<()> {
		let old = self.separator().to_owned();
		self.replace_separator(&old, separator)?;
		*self.separator_mut() = separator.to_owned();
		Ok(())
	}

	/// Looks up an existing dataset.
	///
	/// # Errors
	/// Returns `Error::DatasetNotFound` if no link was ever added to it.
	fn find_dataset(&self, key: &str) -> Result<Self::Dataset>;

	/// Returns the dataset, creating it if missing.
	fn create_dataset(&mut self, key: &str) -> Result<Self::Dataset>;

	fn get_dataset(&mut self, key: &str, create: bool) -> Result<Self::Dataset> {
		if create {
			self.create_dataset(key)
		} else {
			self.find_dataset(key)
		}
	}

	/// Records link observations, creating datasets lazily.
	fn add_links<I>(&mut self, links: I) -> Result<()>
	where
		I: IntoIterator<Item = Link>;

	/// Resolves the state made of the last `size` tokens (left-padded).
	///
	/// Returns `Ok(None)` when the backend knows the state was never
	/// observed. This is a normal dead end, not an error.
	fn get_state(&self, tokens: &[String], size: usize) -> Result<Option<Self::State>>;

	/// State keys of one dataset containing `substring` (case-insensitive),
	/// sorted.
	fn get_states(&self, dataset: &str, substring: &str) -> Result<Vec<String>>;

	/// Edges leaving `state` (or entering it when `backward`), in stored order.
	///
	/// # Errors
	/// Returns `Error::BackwardDisabled` if `backward` is requested on a
	/// storage that does not track backward links.
	fn get_links(&self, dataset: &Self::Dataset, state: &Self::State, backward: bool) -> Result<Vec<Edge<Self::Node>>>;

	/// Moves `state` along `edge`.
	fn follow_link(&self, edge: &Edge<Self::Node>, state: Self::State, backward: bool) -> Self::State;

	/// Deep-merges `overrides` into the settings.
	///
	/// If the merged settings define another state separator, stored keys
	/// are rewritten to it.
	fn merge_settings(&mut self, overrides: &Value) -> Result<()> {
		settings::extend(self.settings_mut(), overrides);
		let separator = settings::separator(self.settings());
		if separator != self.separator() {
			self.set_separator(&separator)?;
		}
		Ok(())
	}

	/// Records the active separator in the settings and persists the storage.
	fn save(&mut self, path: Option<&Path>) -> Result<()> {
		let separator = Value::String(self.separator().to_owned());
		settings::set(self.settings_mut(), "storage", "state_separator", separator);
		self.do_save(path)
	}

	/// Backend-specific persistence.
	fn do_save(&mut self, path: Option<&Path>) -> Result<()>;

	/// Releases backing resources.
	fn close(self) -> Result<()>
	where
		Self: Sized;
}
