use std::collections::{HashMap, HashSet};
use std::path::Path;

use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::settings;
use crate::model::token::Link;
use super::{join_with, pad_state, Edge, Storage};

const SCHEMA: &str = "
	PRAGMA foreign_keys = 1;
	CREATE TABLE IF NOT EXISTS main (
		settings TEXT NOT NULL DEFAULT '{}'
	);
	CREATE TABLE IF NOT EXISTS datasets (
		id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
		key TEXT NOT NULL
	);
	CREATE TABLE IF NOT EXISTS nodes (
		id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
		value TEXT NOT NULL
	);
	CREATE TABLE IF NOT EXISTS links (
		dataset INTEGER NOT NULL REFERENCES datasets (id),
		source INTEGER NOT NULL REFERENCES nodes (id),
		target INTEGER REFERENCES nodes (id),
		value TEXT,
		bvalue TEXT,
		count INTEGER NOT NULL DEFAULT 1
	);
	CREATE UNIQUE INDEX IF NOT EXISTS node ON nodes (value);
	CREATE INDEX IF NOT EXISTS link_source ON links (source, dataset);
	CREATE INDEX IF NOT EXISTS link_target ON links (target, dataset);
";

/// SQLite link storage.
///
/// # Layout
/// - `main`: one row holding the settings as JSON text
/// - `datasets`: interned dataset keys
/// - `nodes`: interned joined states (unique on value)
/// - `links`: `(dataset, source, target, value, bvalue, count)`, where
///   `target` is the node reached by following the link (`NULL` for a
///   boundary), `value` the produced token and `bvalue` the token produced
///   when walking the link backward
///
/// # Notes
/// - One connection, operations are strictly serial.
/// - The upsert in `add_links` (`UPDATE` then `INSERT ... WHERE changes() = 0`)
///   assumes a single writer per database.
#[derive(Debug)]
pub struct SqliteStorage {
	conn: Connection,
	settings: Value,
	separator: String,
	/// Dataset key → id, loaded on open.
	datasets: HashMap<String, i64>,
	/// Node value → id, filled while interning.
	nodes: HashMap<String, i64>,
}

impl SqliteStorage {
	/// Wraps a connection, creating the tables if needed.
	///
	/// # Parameters
	/// - `conn`: open database connection.
	/// - `settings`: settings to use. If `None`, the settings stored in the
	///   `main` table are loaded (or `{}` for a new database).
	pub fn new(conn: Connection, settings: Option<Value>) -> Result<Self> {
		register_functions(&conn)?;
		conn.execute_batch(SCHEMA)?;
		let settings = match settings {
			Some(settings) => settings::normalize(Some(settings)),
			None => settings::normalize(read_settings(&conn)?),
		};
		let separator = settings::separator(&settings);
		let datasets = read_datasets(&conn)?;

		let mut storage = Self { conn, settings, separator, datasets, nodes: HashMap::new() };
		storage.write_settings()?;
		Ok(storage)
	}

	/// Creates an empty in-memory database.
	pub fn in_memory(settings: Option<Value>) -> Result<Self> {
		Self::new(Connection::open_in_memory()?, settings)
	}

	/// Opens (or creates) a database file and loads its settings.
	pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
		let storage = Self::new(Connection::open(&path)?, None)?;
		log::info!("Opened {} ({} dataset(s))", path.as_ref().display(), storage.datasets.len());
		Ok(storage)
	}

	/// Table names of the database.
	pub fn tables(&self) -> Result<HashSet<String>> {
		let mut stmt = self.conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
		let names = stmt
			.query_map([], |row| row.get::<_, String>(0))?
			.collect::<rusqlite::Result<HashSet<_>>>()?;
		Ok(names)
	}

	/// Interned id of a node value, if it exists.
	pub fn node_id(&self, value: &str) -> Result<Option<i64>> {
		if let Some(&id) = self.nodes.get(value) {
			return Ok(Some(id));
		}
		let id = self
			.conn
			.query_row("SELECT id FROM nodes WHERE value = ?1", params![value], |row| row.get(0))
			.optional()?;
		Ok(id)
	}

	fn write_settings(&mut self) -> Result<()> {
		let data = serde_json::to_string(&self.settings)?;
		let updated = self.conn.execute("UPDATE main SET settings = ?1", params![data])?;
		if updated == 0 {
			self.conn.execute("INSERT INTO main (settings) VALUES (?1)", params![data])?;
		}
		Ok(())
	}

	fn insert_links<I>(&mut self, links: I) -> Result<usize>
	where
		I: IntoIterator<Item = Link>,
	{
		let tx = self.conn.transaction()?;
		let mut inserted = 0;
		for link in links {
			let source = intern_node(&tx, &mut self.nodes, &join_with(&self.separator, &link.source))?;
			let target = match link.successor() {
				Some(next) => Some(intern_node(&tx, &mut self.nodes, &join_with(&self.separator, &next))?),
				None => None,
			};
			let dataset = intern_dataset(&tx, &mut self.datasets, &link.dataset)?;

			tx.prepare_cached(
				"UPDATE links SET count = count + 1
				 WHERE dataset = ?1 AND source = ?2 AND target IS ?3",
			)?
			.execute(params![dataset, source, target])?;
			tx.prepare_cached(
				"INSERT INTO links (dataset, source, target, value, bvalue)
				 SELECT ?1, ?2, ?3, ?4, ?5
				 WHERE (SELECT changes() = 0)",
			)?
			.execute(params![dataset, source, target, link.target, link.source.first()])?;
			inserted += 1;
		}
		tx.commit()?;
		Ok(inserted)
	}
}

fn read_settings(conn: &Connection) -> Result<Option<Value>> {
	let text: Option<String> = conn
		.query_row("SELECT settings FROM main LIMIT 1", [], |row| row.get(0))
		.optional()?;
	match text {
		Some(text) => Ok(Some(serde_json::from_str(&text)?)),
		None => Ok(None),
	}
}

fn read_datasets(conn: &Connection) -> Result<HashMap<String, i64>> {
	let mut stmt = conn.prepare("SELECT key, id FROM datasets")?;
	let datasets = stmt
		.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
		.collect::<rusqlite::Result<HashMap<_, _>>>()?;
	Ok(datasets)
}

/// Returns the id of a node, inserting it on a miss.
fn intern_node(conn: &Connection, cache: &mut HashMap<String, i64>, value: &str) -> Result<i64> {
	if let Some(&id) = cache.get(value) {
		return Ok(id);
	}
	let found: Option<i64> = conn
		.prepare_cached("SELECT id FROM nodes WHERE value = ?1")?
		.query_row(params![value], |row| row.get(0))
		.optional()?;
	let id = match found {
		Some(id) => id,
		None => {
			conn.prepare_cached("INSERT INTO nodes (value) VALUES (?1)")?.execute(params![value])?;
			conn.last_insert_rowid()
		}
	};
	cache.insert(value.to_owned(), id);
	Ok(id)
}

/// Returns the id of a dataset, inserting it on a miss.
fn intern_dataset(conn: &Connection, cache: &mut HashMap<String, i64>, key: &str) -> Result<i64> {
	if let Some(&id) = cache.get(key) {
		return Ok(id);
	}
	conn.execute("INSERT INTO datasets (key) VALUES (?1)", params![key])?;
	let id = conn.last_insert_rowid();
	cache.insert(key.to_owned(), id);
	log::debug!("Created dataset {:?} (id {})", key, id);
	Ok(id)
}

/// Registers `fold_case(text)`: Unicode lowercase, same folding as
/// `str::to_lowercase` (the builtin `lower` only folds ASCII).
fn register_functions(conn: &Connection) -> Result<()> {
	conn.create_scalar_function(
		"fold_case",
		1,
		FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
		|ctx| {
			let value: String = ctx.get(0)?;
			Ok(value.to_lowercase())
		},
	)?;
	Ok(())
}

impl Storage for SqliteStorage {
	type Dataset = i64;
	type State = i64;
	type Node = Option<i64>;

	fn settings(&self) -> &Value {
		&self.settings
	}

	fn settings_mut(&mut self) -> &mut Value {
		&mut self.settings
	}

	fn separator(&self) -> &str {
		&self.separator
	}

	fn separator_mut(&mut self) -> &mut String {
		&mut self.separator
	}

	/// Rewrites every node value in one transaction.
	///
	/// # Errors
	/// A rewrite that would make two node values equal fails on the unique
	/// index and is rolled back.
	fn replace_separator(&mut self, old: &str, new: &str) -> Result<()> {
		if old == new {
			return Ok(());
		}
		let tx = self.conn.transaction()?;
		tx.execute("UPDATE nodes SET value = replace(value, ?1, ?2)", params![old, new])?;
		tx.commit()?;
		self.nodes.clear();
		log::debug!("Replaced state separator {:?} with {:?}", old, new);
		Ok(())
	}

	fn find_dataset(&self, key: &str) -> Result<i64> {
		self.datasets
			.get(key)
			.copied()
			.ok_or_else(|| Error::DatasetNotFound(key.to_owned()))
	}

	fn create_dataset(&mut self, key: &str) -> Result<i64> {
		intern_dataset(&self.conn, &mut self.datasets, key)
	}

	/// Inserts every link in one transaction.
	///
	/// On failure the transaction is rolled back and the id caches are
	/// reloaded from the database.
	fn add_links<I>(&mut self, links: I) -> Result<()>
	where
		I: IntoIterator<Item = Link>,
	{
		match self.insert_links(links) {
			Ok(inserted) => {
				log::debug!("Added {} link(s)", inserted);
				Ok(())
			}
			Err(e) => {
				self.nodes.clear();
				self.datasets = read_datasets(&self.conn)?;
				Err(e)
			}
		}
	}

	fn get_state(&self, tokens: &[String], size: usize) -> Result<Option<i64>> {
		let key = join_with(&self.separator, pad_state(tokens, size));
		self.node_id(&key)
	}

	/// Case-insensitive (Unicode) substring search through `fold_case`.
	fn get_states(&self, dataset: &str, substring: &str) -> Result<Vec<String>> {
		let dataset = self.find_dataset(dataset)?;
		let mut stmt = self.conn.prepare_cached(
			"SELECT DISTINCT nodes.value
			 FROM nodes
			 INNER JOIN links ON links.source = nodes.id AND links.dataset = ?1
			 WHERE instr(fold_case(nodes.value), ?2) > 0
			 ORDER BY nodes.value",
		)?;
		let states = stmt
			.query_map(params![dataset, substring.to_lowercase()], |row| row.get::<_, String>(0))?
			.collect::<rusqlite::Result<Vec<_>>>()?;
		Ok(states)
	}

	fn get_links(&self, dataset: &i64, state: &i64, backward: bool) -> Result<Vec<Edge<Option<i64>>>> {
		let query = if backward {
			"SELECT count, bvalue, source FROM links WHERE dataset = ?1 AND target = ?2 ORDER BY rowid"
		} else {
			"SELECT count, value, target FROM links WHERE dataset = ?1 AND source = ?2 ORDER BY rowid"
		};
		let mut stmt = self.conn.prepare_cached(query)?;
		let edges = stmt
			.query_map(params![dataset, state], |row| {
				Ok(Edge {
					count: row.get::<_, i64>(0)?.max(0) as u64,
					value: row.get(1)?,
					node: row.get(2)?,
				})
			})?
			.collect::<rusqlite::Result<Vec<_>>>()?;
		Ok(edges)
	}

	/// Rows already carry the neighbor id. A boundary edge has none and
	/// leaves the state unchanged.
	fn follow_link(&self, edge: &Edge<Option<i64>>, state: i64, _backward: bool) -> i64 {
		edge.node.unwrap_or(state)
	}

	/// Writes the settings to the `main` table. With a path, a copy of the
	/// whole database is also written there (`VACUUM INTO`, the file must not
	/// exist).
	fn do_save(&mut self, path: Option<&Path>) -> Result<()> {
		self.write_settings()?;
		if let Some(path) = path {
			self.conn.execute("VACUUM INTO ?1", params![path.to_string_lossy().into_owned()])?;
			log::info!("Saved database copy to {}", path.display());
		}
		Ok(())
	}

	fn close(self) -> Result<()> {
		self.conn.close().map_err(|(_, e)| Error::Sqlite(e))
	}
}
