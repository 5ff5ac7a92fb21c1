use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::{json, Value};

use crate::error::Result;
use crate::storage::Storage;
use super::parser::{Parser, ParserSettings};
use super::progress::{Progress, DEFAULT_STEP};
use super::settings;
use super::token::{size_dataset, Token};
use super::walk::Walk;

/// Markov chain generator: a parser, a storage and a random source.
///
/// # Responsibilities
/// - Train: parse token streams and record the links in the storage
/// - Generate: start weighted random walks (forward or backward)
/// - Persist the parser configuration in the storage settings so that a
///   loaded storage rebuilds the same generator
///
/// # Notes
/// - Training needs `&mut self`, a running walk borrows `self`. The two
///   can't be interleaved.
#[derive(Debug)]
pub struct Markov<S: Storage> {
	parser: Parser,
	storage: S,
	rng: StdRng,
}

impl<S: Storage> Markov<S> {
	/// Creates a generator seeded from the thread RNG.
	pub fn new(parser: Parser, storage: S) -> Self {
		Self { parser, storage, rng: StdRng::from_rng(&mut rand::rng()) }
	}

	/// Creates a generator with a fixed seed (reproducible walks).
	pub fn with_seed(parser: Parser, storage: S, seed: u64) -> Self {
		Self { parser, storage, rng: StdRng::seed_from_u64(seed) }
	}

	/// Rebuilds a generator from the settings of a loaded storage.
	///
	/// The parser is read from `settings.markov.parser` (default parser if
	/// absent).
	///
	/// # Errors
	/// Returns an error if the stored parser settings are malformed or invalid.
	pub fn from_storage(storage: S) -> Result<Self> {
		let parser = match storage.settings().get("markov").and_then(|markov| markov.get("parser")) {
			Some(value) => {
				let parser_settings: ParserSettings = serde_json::from_value(value.clone())?;
				Parser::from_settings(&parser_settings)?
			}
			None => Parser::default(),
		};
		log::debug!("Loaded parser {:?}", parser.settings());
		Ok(Self::new(parser, storage))
	}

	/// Deep-merges `overrides` into the storage settings, then rebuilds the
	/// generator from them.
	pub fn from_storage_with(mut storage: S, overrides: &Value) -> Result<Self> {
		storage.merge_settings(overrides)?;
		Self::from_storage(storage)
	}

	/// Reseeds the random source.
	pub fn seed(&mut self, seed: u64) {
		self.rng = StdRng::seed_from_u64(seed);
	}

	pub fn parser(&self) -> &Parser {
		&self.parser
	}

	pub fn parser_mut(&mut self) -> &mut Parser {
		&mut self.parser
	}

	pub fn storage(&self) -> &S {
		&self.storage
	}

	pub fn storage_mut(&mut self) -> &mut S {
		&mut self.storage
	}

	pub(crate) fn parts_mut(&mut self) -> (&Parser, &S, &mut StdRng) {
		(&self.parser, &self.storage, &mut self.rng)
	}

	/// Parses `tokens` and records the resulting links.
	///
	/// # Parameters
	/// - `tokens`: token stream.
	/// - `part`: `true` if the stream continues in a later call.
	/// - `dataset`: dataset key prefix.
	///
	/// # Returns
	/// The number of recorded links.
	pub fn data<I>(&mut self, tokens: I, part: bool, dataset: &str) -> Result<usize>
	where
		I: IntoIterator<Item = Token>,
	{
		let mut links = Progress::new(self.parser.parse(tokens, part, dataset), "Links", DEFAULT_STEP);
		self.storage.add_links(&mut links)?;
		Ok(links.total())
	}

	/// State size used when none is given: the first configured one.
	pub fn default_state_size(&self) -> usize {
		self.parser.state_sizes().first().copied().unwrap_or(1)
	}

	/// Starts a random walk.
	///
	/// # Parameters
	/// - `state_size`: dataset state size (first configured size if `None`).
	/// - `start`: start tokens, the last `state_size` ones (left-padded) form
	///   the start state.
	/// - `dataset`: dataset key prefix.
	/// - `backward`: walk the chain backward.
	///
	/// # Returns
	/// A lazy walk, empty when the start state was never observed.
	///
	/// # Errors
	/// Returns `Error::DatasetNotFound` if nothing was recorded in the dataset.
	pub fn generate(
		&mut self,
		state_size: Option<usize>,
		start: &[String],
		dataset: &str,
		backward: bool,
	) -> Result<Walk<'_, S, StdRng>> {
		let size = state_size.unwrap_or_else(|| self.default_state_size());
		let key = format!("{}{}", dataset, size_dataset(size));
		let dataset = self.storage.find_dataset(&key)?;
		let state = self.storage.get_state(start, size)?;
		log::debug!("Walk {:?} from {:?} (backward: {})", key, start, backward);
		Ok(Walk::new(&self.storage, dataset, state, backward, &mut self.rng))
	}

	/// Generator settings stored under `settings.markov`.
	pub fn settings_json(&self) -> Result<Value> {
		Ok(json!({ "parser": serde_json::to_value(self.parser.settings())? }))
	}

	/// Stores the generator settings and saves the storage.
	pub fn save(&mut self, path: Option<&Path>) -> Result<()> {
		let markov = self.settings_json()?;
		if let Some(parser) = markov.get("parser") {
			settings::set(self.storage.settings_mut(), "markov", "parser", parser.clone());
		}
		self.storage.save(path)
	}

	/// Gives back the storage.
	pub fn into_storage(self) -> S {
		self.storage
	}

	pub fn close(self) -> Result<()> {
		self.storage.close()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::Error;
	use crate::storage::MemoryStorage;

	fn words(text: &str) -> Vec<Token> {
		text.split_whitespace()
			.map(|w| if w == "END" { Token::End } else { Token::word(w) })
			.collect()
	}

	fn start(tokens: &[&str]) -> Vec<String> {
		tokens.iter().map(|&t| t.to_owned()).collect()
	}

	#[test]
	fn data_records_links() {
		let mut markov = Markov::with_seed(Parser::default(), MemoryStorage::new(None, false), 0);
		assert_eq!(markov.data(words("a b END a b c END"), false, "").unwrap(), 7);
		let record = &markov.storage().nodes()[":1"]["b"];
		assert_eq!(record.total(), 2);
	}

	#[test]
	fn first_step_is_deterministic() {
		let mut markov = Markov::with_seed(Parser::default(), MemoryStorage::new(None, false), 3);
		markov.data(words("a b END a b c END"), false, "").unwrap();
		for _ in 0..20 {
			let mut walk = markov.generate(None, &start(&["a"]), "", false).unwrap();
			assert_eq!(walk.next().unwrap().unwrap(), "b");
		}
	}

	#[test]
	fn branching_after_b() {
		let mut markov = Markov::with_seed(Parser::default(), MemoryStorage::new(None, false), 11);
		markov.data(words("a b END a b c END"), false, "").unwrap();
		let mut ended = 0;
		let mut continued = 0;
		for _ in 0..1000 {
			let tokens: Vec<String> = markov.generate(None, &start(&["b"]), "", false).unwrap().collect::<Result<_>>().unwrap();
			match tokens.as_slice() {
				[] => ended += 1,
				[c] if c == "c" => continued += 1,
				other => panic!("unexpected walk {:?}", other),
			}
		}
		assert!(ended > 350 && continued > 350, "ended {} continued {}", ended, continued);
	}

	#[test]
	fn generate_from_unknown_state_or_dataset() {
		let mut markov = Markov::with_seed(Parser::default(), MemoryStorage::new(None, false), 0);
		markov.data(words("a b END"), false, "").unwrap();
		assert!(markov.generate(None, &start(&["q"]), "", false).unwrap().next().is_none());
		assert!(matches!(markov.generate(Some(2), &start(&["a"]), "", false), Err(Error::DatasetNotFound(_))));
	}

	#[test]
	fn save_and_restore_parser() {
		let parser = Parser::new(vec![2, 1], false).unwrap();
		let mut markov = Markov::with_seed(parser.clone(), MemoryStorage::new(None, false), 0);
		markov.data(words("a b c END"), false, "").unwrap();
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("markov.json");
		markov.save(Some(path.as_path())).unwrap();

		let restored = Markov::from_storage(MemoryStorage::load(&path).unwrap()).unwrap();
		assert_eq!(restored.parser(), &parser);
		assert_eq!(restored.default_state_size(), 2);
		assert_eq!(restored.storage().nodes(), markov.storage().nodes());
	}

	#[test]
	fn from_storage_with_overrides() {
		let storage = MemoryStorage::new(
			Some(json!({"markov": {"parser": {"state_sizes": [1], "reset_on_boundary": true}}})),
			false,
		);
		let overrides = json!({"markov": {"parser": {"state_sizes": [3]}}});
		let markov = Markov::from_storage_with(storage, &overrides).unwrap();
		assert_eq!(markov.parser().state_sizes(), &[3]);
		assert!(markov.parser().reset_on_boundary());
	}

	#[test]
	fn invalid_stored_parser() {
		let storage = MemoryStorage::new(
			Some(json!({"markov": {"parser": {"state_sizes": [0], "reset_on_boundary": true}}})),
			false,
		);
		assert!(matches!(Markov::from_storage(storage), Err(Error::Config(_))));
	}
}
