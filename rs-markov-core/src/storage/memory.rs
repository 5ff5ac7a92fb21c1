use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::io::{create_writer, open_reader};
use crate::model::settings;
use crate::model::token::Link;
use super::{join_with, pad_state, Edge, Storage};

/// Compact record of the edges leaving one state.
///
/// Most states have a single successor, so a record starts as a scalar pair
/// and is promoted in place to parallel arrays on the second distinct
/// target.
///
/// ## Persisted form
/// - JSON: `[count, target]` or `[[counts...], [targets...]]`
/// - binary snapshot: tagged variants
///
/// ## Invariants
/// - Every count is >= 1
/// - In `Many`, both vectors have the same length and targets are distinct
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EdgeRecord {
	Single(u64, Option<String>),
	Many(Vec<u64>, Vec<Option<String>>),
}

impl EdgeRecord {
	pub fn new(target: Option<String>, count: u64) -> Self {
		EdgeRecord::Single(count, target)
	}

	/// Records `count` more observations of the transition toward `target`.
	///
	/// - Same target as a scalar record: its count is increased.
	/// - Different target on a scalar record: promotes to arrays.
	/// - Array record: linear scan, increment on hit, append otherwise.
	pub fn add(&mut self, target: Option<String>, count: u64) {
		match self {
			EdgeRecord::Single(old_count, old_target) if *old_target == target => *old_count += count,
			EdgeRecord::Single(old_count, old_target) => {
				let promoted = EdgeRecord::Many(vec![*old_count, count], vec![old_target.take(), target]);
				*self = promoted;
			}
			EdgeRecord::Many(counts, targets) => match targets.iter().position(|t| *t == target) {
				Some(i) => counts[i] += count,
				None => {
					counts.push(count);
					targets.push(target);
				}
			},
		}
	}

	/// Edges in stored order.
	pub fn edges(&self) -> Vec<Edge<()>> {
		match self {
			EdgeRecord::Single(count, value) => vec![Edge { count: *count, value: value.clone(), node: () }],
			EdgeRecord::Many(counts, values) => counts
				.iter()
				.zip(values)
				.map(|(count, value)| Edge { count: *count, value: value.clone(), node: () })
				.collect(),
		}
	}

	/// Total number of observations.
	pub fn total(&self) -> u64 {
		match self {
			EdgeRecord::Single(count, _) => *count,
			EdgeRecord::Many(counts, _) => counts.iter().sum(),
		}
	}

	/// Adds every transition of `other` to this record.
	pub fn merge(&mut self, other: &Self) {
		for edge in other.edges() {
			self.add(edge.value, edge.count);
		}
	}
}

/// JSON shape of an [`EdgeRecord`].
#[derive(Serialize)]
#[serde(untagged)]
enum CompactRef<'a> {
	Single(u64, &'a Option<String>),
	Many(&'a [u64], &'a [Option<String>]),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Compact {
	Single(u64, Option<String>),
	Many(Vec<u64>, Vec<Option<String>>),
}

/// Binary shape of an [`EdgeRecord`] (postcard can't read untagged data).
#[derive(Serialize)]
enum TaggedRef<'a> {
	Single(u64, &'a Option<String>),
	Many(&'a [u64], &'a [Option<String>]),
}

#[derive(Deserialize)]
enum Tagged {
	Single(u64, Option<String>),
	Many(Vec<u64>, Vec<Option<String>>),
}

impl Serialize for EdgeRecord {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		if serializer.is_human_readable() {
			match self {
				EdgeRecord::Single(count, target) => CompactRef::Single(*count, target),
				EdgeRecord::Many(counts, targets) => CompactRef::Many(counts, targets),
			}
			.serialize(serializer)
		} else {
			match self {
				EdgeRecord::Single(count, target) => TaggedRef::Single(*count, target),
				EdgeRecord::Many(counts, targets) => TaggedRef::Many(counts, targets),
			}
			.serialize(serializer)
		}
	}
}

impl<'de> Deserialize<'de> for EdgeRecord {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
		let (single, many) = if deserializer.is_human_readable() {
			match Compact::deserialize(deserializer)? {
				Compact::Single(count, target) => (Some((count, target)), None),
				Compact::Many(counts, targets) => (None, Some((counts, targets))),
			}
		} else {
			match Tagged::deserialize(deserializer)? {
				Tagged::Single(count, target) => (Some((count, target)), None),
				Tagged::Many(counts, targets) => (None, Some((counts, targets))),
			}
		};
		match (single, many) {
			(Some((count, target)), _) => Ok(EdgeRecord::Single(count, target)),
			(None, Some((counts, targets))) if counts.len() == targets.len() => Ok(EdgeRecord::Many(counts, targets)),
			_ => Err(serde::de::Error::custom("edge record counts and targets differ in length")),
		}
	}
}

/// One dataset: joined state key → edge record.
pub type Dataset = HashMap<String, EdgeRecord>;

/// Persisted JSON document.
#[derive(Serialize)]
struct DocumentRef<'a> {
	settings: &'a Value,
	nodes: &'a HashMap<String, Dataset>,
	backward: &'a Option<HashMap<String, Dataset>>,
}

#[derive(Deserialize)]
struct Document {
	#[serde(default)]
	settings: Option<Value>,
	#[serde(default)]
	nodes: HashMap<String, Dataset>,
	#[serde(default)]
	backward: Option<HashMap<String, Dataset>>,
}

/// Persisted binary snapshot. Settings are embedded as JSON text.
#[derive(Serialize)]
struct SnapshotRef<'a> {
	settings: String,
	nodes: &'a HashMap<String, Dataset>,
	backward: &'a Option<HashMap<String, Dataset>>,
}

#[derive(Deserialize)]
struct Snapshot {
	settings: String,
	nodes: HashMap<String, Dataset>,
	backward: Option<HashMap<String, Dataset>>,
}

/// In-memory link storage.
///
/// # Responsibilities
/// - Map every dataset to `joined state → EdgeRecord`
/// - Optionally mirror every link into a backward twin map keyed by the
///   successor window, with the predecessor token as value
/// - Persist to a JSON document or a compact binary snapshot
///
/// # Notes
/// - `get_states` scans every key of a dataset: cost is linear in the
///   number of distinct states.
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryStorage {
	settings: Value,
	separator: String,
	nodes: HashMap<String, Dataset>,
	backward: Option<HashMap<String, Dataset>>,
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new(None, false)
	}
}

impl MemoryStorage {
	/// Creates an empty storage.
	///
	/// # Parameters
	/// - `settings`: persisted settings, `None` (or a non-object) means `{}`.
	///   The separator is read from `settings.storage.state_separator`.
	/// - `backward`: also track backward links.
	pub fn new(settings: Option<Value>, backward: bool) -> Self {
		let settings = settings::normalize(settings);
		let separator = settings::separator(&settings);
		Self {
			settings,
			separator,
			nodes: HashMap::new(),
			backward: if backward { Some(HashMap::new()) } else { None },
		}
	}

	/// Whether backward links are tracked.
	pub fn backward(&self) -> bool {
		self.backward.is_some()
	}

	/// Forward datasets.
	pub fn nodes(&self) -> &HashMap<String, Dataset> {
		&self.nodes
	}

	/// Backward datasets, if tracked.
	pub fn backward_nodes(&self) -> Option<&HashMap<String, Dataset>> {
		self.backward.as_ref()
	}

	/// Loads a storage from a JSON document.
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
		let storage = Self::from_reader(open_reader(&path)?)?;
		log::info!("Loaded {} dataset(s) from {}", storage.nodes.len(), path.as_ref().display());
		Ok(storage)
	}

	pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
		let document: Document = serde_json::from_reader(reader)?;
		let settings = settings::normalize(document.settings);
		let separator = settings::separator(&settings);
		Ok(Self { settings, separator, nodes: document.nodes, backward: document.backward })
	}

	/// Writes the JSON document (settings are written as they are, use
	/// [`Storage::save`] to record the separator first).
	pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
		let document = DocumentRef { settings: &self.settings, nodes: &self.nodes, backward: &self.backward };
		serde_json::to_writer(writer, &document)?;
		Ok(())
	}

	/// Saves a compact binary snapshot (postcard).
	pub fn save_binary<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
		let separator = Value::String(self.separator.clone());
		settings::set(&mut self.settings, "storage", "state_separator", separator);
		let snapshot = SnapshotRef {
			settings: serde_json::to_string(&self.settings)?,
			nodes: &self.nodes,
			backward: &self.backward,
		};
		let bytes = postcard::to_stdvec(&snapshot)?;
		std::fs::write(&path, bytes)?;
		log::info!("Saved binary snapshot to {}", path.as_ref().display());
		Ok(())
	}

	/// Loads a binary snapshot written by [`MemoryStorage::save_binary`].
	pub fn load_binary<P: AsRef<Path>>(path: P) -> Result<Self> {
		let bytes = std::fs::read(&path)?;
		let snapshot: Snapshot = postcard::from_bytes(&bytes)?;
		let settings = settings::normalize(Some(serde_json::from_str(&snapshot.settings)?));
		let separator = settings::separator(&settings);
		Ok(Self { settings, separator, nodes: snapshot.nodes, backward: snapshot.backward })
	}

	/// Merges another storage into this one (counts are summed).
	///
	/// # Errors
	/// Returns `Error::Config` if the separators differ.
	pub fn merge(&mut self, other: &Self) -> Result<()> {
		if self.separator != other.separator {
			return Err(Error::Config(format!(
				"State separator mismatch: self={:?}, other={:?}",
				self.separator, other.separator
			)));
		}
		merge_datasets(&mut self.nodes, &other.nodes);
		if let (Some(mine), Some(theirs)) = (self.backward.as_mut(), other.backward.as_ref()) {
			merge_datasets(mine, theirs);
		}
		Ok(())
	}
}

fn merge_datasets(dst: &mut HashMap<String, Dataset>, src: &HashMap<String, Dataset>) {
	for (key, dataset) in src {
		let existing = dst.entry(key.clone()).or_default();
		for (state, record) in dataset {
			match existing.get_mut(state) {
				Some(found) => found.merge(record),
				None => {
					existing.insert(state.clone(), record.clone());
				}
			}
		}
	}
}

fn add_link(dataset: &mut Dataset, source: String, target: Option<String>) {
	match dataset.get_mut(&source) {
		Some(record) => record.add(target, 1),
		None => {
			dataset.insert(source, EdgeRecord::new(target, 1));
		}
	}
}

/// Fails if two state keys of one dataset become equal once `old` is
/// replaced by `new`.
fn check_rewrite(datasets: &HashMap<String, Dataset>, old: &str, new: &str) -> Result<()> {
	for (name, dataset) in datasets {
		let mut seen = HashSet::with_capacity(dataset.len());
		for key in dataset.keys() {
			let rewritten = key.replace(old, new);
			if seen.contains(&rewritten) {
				return Err(Error::Config(format!(
					"State separator {:?} makes two states of dataset {:?} equal to {:?}",
					new, name, rewritten
				)));
			}
			seen.insert(rewritten);
		}
	}
	Ok(())
}

fn rewrite_keys(datasets: &mut HashMap<String, Dataset>, old: &str, new: &str) {
	for dataset in datasets.values_mut() {
		let rewritten: Dataset = dataset.drain().map(|(key, record)| (key.replace(old, new), record)).collect();
		*dataset = rewritten;
	}
}

impl Storage for MemoryStorage {
	type Dataset = String;
	type State = VecDeque<String>;
	type Node = ();

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

	/// Rewrites forward and backward keys.
	///
	/// # Errors
	/// Returns `Error::Config`, leaving every key untouched, if the rewrite
	/// would merge two distinct states.
	fn replace_separator(&mut self, old: &str, new: &str) -> Result<()> {
		if old == new {
			return Ok(());
		}
		check_rewrite(&self.nodes, old, new)?;
		if let Some(backward) = self.backward.as_ref() {
			check_rewrite(backward, old, new)?;
		}
		rewrite_keys(&mut self.nodes, old, new);
		if let Some(backward) = self.backward.as_mut() {
			rewrite_keys(backward, old, new);
		}
		log::debug!("Replaced state separator {:?} with {:?}", old, new);
		Ok(())
	}

	fn find_dataset(&self, key: &str) -> Result<String> {
		if self.nodes.contains_key(key) {
			Ok(key.to_owned())
		} else {
			Err(Error::DatasetNotFound(key.to_owned()))
		}
	}

	fn create_dataset(&mut self, key: &str) -> Result<String> {
		self.nodes.entry(key.to_owned()).or_default();
		if let Some(backward) = self.backward.as_mut() {
			backward.entry(key.to_owned()).or_default();
		}
		Ok(key.to_owned())
	}

	fn add_links<I>(&mut self, links: I) -> Result<()>
	where
		I: IntoIterator<Item = Link>,
	{
		for link in links {
			let source = join_with(&self.separator, &link.source);
			let reverse = match (link.successor(), link.source.first()) {
				(Some(next), Some(first)) => Some((join_with(&self.separator, &next), first.clone())),
				_ => None,
			};
			log::trace!("{} {:?} -> {:?}", link.dataset, source, link.target);

			self.create_dataset(&link.dataset)?;
			if let Some(dataset) = self.nodes.get_mut(&link.dataset) {
				add_link(dataset, source, link.target);
			}
			if let (Some(backward), Some((next, first))) = (self.backward.as_mut(), reverse) {
				if let Some(dataset) = backward.get_mut(&link.dataset) {
					add_link(dataset, next, Some(first));
				}
			}
		}
		Ok(())
	}

	/// Always resolves: the padded window itself is the state. Unknown
	/// states surface as an empty link list.
	fn get_state(&self, tokens: &[String], size: usize) -> Result<Option<VecDeque<String>>> {
		Ok(Some(pad_state(tokens, size).into()))
	}

	fn get_states(&self, dataset: &str, substring: &str) -> Result<Vec<String>> {
		let dataset = self.nodes.get(dataset).ok_or_else(|| Error::DatasetNotFound(dataset.to_owned()))?;
		let needle = substring.to_lowercase();
		let mut states: Vec<String> = dataset
			.keys()
			.filter(|key| key.to_lowercase().contains(&needle))
			.cloned()
			.collect();
		states.sort();
		Ok(states)
	}

	fn get_links(&self, dataset: &String, state: &VecDeque<String>, backward: bool) -> Result<Vec<Edge<()>>> {
		let datasets = if backward {
			self.backward.as_ref().ok_or(Error::BackwardDisabled)?
		} else {
			&self.nodes
		};
		let key = join_with(&self.separator, state);
		Ok(datasets
			.get(dataset)
			.and_then(|dataset| dataset.get(&key))
			.map(EdgeRecord::edges)
			.unwrap_or_default())
	}

	fn follow_link(&self, edge: &Edge<()>, mut state: VecDeque<String>, backward: bool) -> VecDeque<String> {
		let value = edge.value.clone().unwrap_or_default();
		if backward {
			state.pop_back();
			state.push_front(value);
		} else {
			state.pop_front();
			state.push_back(value);
		}
		state
	}

	/// Writes the JSON document to `path`, or to stdout if `None`.
	fn do_save(&mut self, path: Option<&Path>) -> Result<()> {
		match path {
			Some(path) => {
				let mut writer = create_writer(path)?;
				self.to_writer(&mut writer)?;
				writer.flush()?;
				log::info!("Saved {} dataset(s) to {}", self.nodes.len(), path.display());
			}
			None => {
				let stdout = std::io::stdout();
				let mut lock = stdout.lock();
				self.to_writer(&mut lock)?;
				lock.flush()?;
			}
		}
		Ok(())
	}

	fn close(self) -> Result<()> {
		Ok(())
	}
}
