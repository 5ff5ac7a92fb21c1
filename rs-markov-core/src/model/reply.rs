use rand::rngs::StdRng;
use rand::seq::IndexedRandom;

use crate::error::{Error, Result};
use crate::storage::{pad_state, Storage};
use super::markov::Markov;
use super::rank::Rank;
use super::token::{size_dataset, Token};
use super::walk::Walk;

/// Minimum length (in characters) of a word searched first by a topical reply.
pub const LONG_WORD_LENGTH: usize = 4;

/// How generation is anchored to the input text.
///
/// # Variants
/// - `End`: continue after the input
/// - `Start`: continue before the input (backward walk)
/// - `Reply`: topical reply, seeded from a state that contains an input word
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplyMode {
	#[default]
	End,
	Start,
	Reply,
}

/// Reply parameters.
///
/// # Invariants
/// - `state_size`, if set, is >= 1
/// - `long_word_length` is >= 1
#[derive(Clone, Debug, PartialEq)]
pub struct ReplyInput {
	/// Anchoring strategy.
	pub mode: ReplyMode,
	/// Dataset key prefix.
	pub dataset: String,
	/// Maximum number of tokens generated per walk.
	pub max_length: Option<usize>,
	/// State size (first configured parser size if `None`).
	state_size: Option<usize>,
	/// Words at least this long are searched first.
	long_word_length: usize,
}

impl Default for ReplyInput {
	fn default() -> Self {
		Self {
			mode: ReplyMode::End,
			dataset: String::new(),
			max_length: None,
			state_size: None,
			long_word_length: LONG_WORD_LENGTH,
		}
	}
}

impl ReplyInput {
	pub fn new(mode: ReplyMode) -> Self {
		Self { mode, ..Self::default() }
	}

	pub fn state_size(&self) -> Option<usize> {
		self.state_size
	}

	/// # Errors
	/// Returns `Error::Config` for a state size of 0.
	pub fn set_state_size(&mut self, state_size: Option<usize>) -> Result<()> {
		if state_size == Some(0) {
			return Err(Error::Config("state size <= 0".to_owned()));
		}
		self.state_size = state_size;
		Ok(())
	}

	pub fn long_word_length(&self) -> usize {
		self.long_word_length
	}

	/// # Errors
	/// Returns `Error::Config` for a length of 0.
	pub fn set_long_word_length(&mut self, length: usize) -> Result<()> {
		if length == 0 {
			return Err(Error::Config("long word length <= 0".to_owned()));
		}
		self.long_word_length = length;
		Ok(())
	}
}

/// Precomputed anchor of a reply.
#[derive(Clone, Debug)]
enum Seed {
	/// Forward walk from `state`, output prefixed by the input words.
	After { state: Vec<String> },
	/// Backward walk from `state`, output followed by the input words.
	Before { state: Vec<String> },
	/// Backward then forward walk around one of the matching states.
	Topic { states: Vec<String> },
	/// Plain forward walk from the empty state.
	Unseeded,
}

/// Unbounded lazy stream of independent reply candidates.
///
/// Every item is a complete candidate (list of tokens). Items are generated
/// on demand, take as many as needed.
pub struct Candidates<'a, S: Storage> {
	storage: &'a S,
	rng: &'a mut StdRng,
	dataset: S::Dataset,
	size: usize,
	max_length: Option<usize>,
	words: Vec<String>,
	seed: Seed,
}

impl<S: Storage> Candidates<'_, S> {
	/// Runs one walk from `tokens`, stopping after `max_length` tokens.
	fn walk(&mut self, tokens: &[String], backward: bool) -> Result<Vec<String>> {
		let state = self.storage.get_state(tokens, self.size)?;
		let walk = Walk::new(self.storage, self.dataset.clone(), state, backward, &mut *self.rng);
		match self.max_length {
			Some(max_length) => walk.take(max_length).collect(),
			None => walk.collect(),
		}
	}

	fn candidate(&mut self) -> Result<Vec<String>> {
		match self.seed.clone() {
			Seed::After { state } => {
				let mut output = self.words.clone();
				output.extend(self.walk(&state, false)?);
				Ok(output)
			}
			Seed::Before { state } => {
				let mut output = self.walk(&state, true)?;
				output.reverse();
				output.extend(self.words.iter().cloned());
				Ok(output)
			}
			Seed::Topic { states } => {
				let key = match states.choose(&mut *self.rng) {
					Some(key) => key.clone(),
					None => return self.walk(&[], false),
				};
				log::debug!("Reply seed {:?}", key);
				let seed = self.storage.split_state(&key);
				let mut output = self.walk(&seed, true)?;
				output.reverse();
				output.extend(seed.iter().filter(|token| !token.is_empty()).cloned());
				output.extend(self.walk(&seed, false)?);
				Ok(output)
			}
			Seed::Unseeded => self.walk(&[], false),
		}
	}
}

impl<S: Storage> Iterator for Candidates<'_, S> {
	type Item = Result<Vec<String>>;

	fn next(&mut self) -> Option<Self::Item> {
		Some(self.candidate())
	}
}

/// Dataset states containing one of `words`, deduplicated and sorted.
fn matching_states<S: Storage>(storage: &S, dataset: &str, words: &[&String]) -> Result<Vec<String>> {
	let mut states = Vec::new();
	for word in words {
		states.extend(storage.get_states(dataset, word)?);
	}
	states.sort();
	states.dedup();
	Ok(states)
}

impl<S: Storage> Markov<S> {
	/// Prepares reply candidates for `tokens`.
	///
	/// # Parameters
	/// - `input`: reply parameters.
	/// - `tokens`: input text, as tokens (only words are used, except for
	///   `ReplyMode::End` that replays all tokens through the parser).
	///
	/// # Behavior
	/// - `End`: the input (without its trailing `Token::End` markers) is
	///   replayed through a copy of the parser, its window is the start state
	///   of a forward walk. Candidates are the input words followed by the
	///   walk.
	/// - `Start`: the first `state_size` input words (left-padded) are the
	///   start state of a backward walk. Candidates are the reversed walk
	///   followed by the input words.
	/// - `Reply`: states containing a long input word are searched (short
	///   words only if no long word matches). Each candidate picks one match,
	///   walks backward and forward from it, and is the reversed backward walk,
	///   the match tokens and the forward walk. Without any match, candidates
	///   are plain forward walks.
	///
	/// # Errors
	/// - `Error::DatasetNotFound` if nothing was recorded in the dataset.
	/// - Any storage error.
	pub fn candidates(&mut self, input: &ReplyInput, tokens: &[Token]) -> Result<Candidates<'_, S>> {
		let size = input.state_size().unwrap_or_else(|| self.default_state_size());
		let key = format!("{}{}", input.dataset, size_dataset(size));
		let (parser, storage, rng) = self.parts_mut();
		let dataset = storage.find_dataset(&key)?;
		let words: Vec<String> = tokens.iter().filter_map(Token::as_word).map(str::to_owned).collect();

		let seed = match input.mode {
			ReplyMode::End => {
				// A trailing boundary would reset the window and drop the input
				let end = tokens.iter().rposition(|token| *token != Token::End).map_or(0, |i| i + 1);
				let mut parser = parser.clone();
				parser.reset();
				parser.parse(tokens[..end].iter().cloned(), true, &input.dataset).for_each(drop);
				Seed::After { state: parser.window() }
			}
			ReplyMode::Start => {
				let first = &words[..words.len().min(size)];
				Seed::Before { state: pad_state(first, size) }
			}
			ReplyMode::Reply => {
				let (long, short): (Vec<&String>, Vec<&String>) = words
					.iter()
					.partition(|word| word.chars().count() >= input.long_word_length());
				let mut states = matching_states(storage, &key, &long)?;
				if states.is_empty() {
					states = matching_states(storage, &key, &short)?;
				}
				log::debug!("{} reply seed(s) for {:?}", states.len(), words);
				if states.is_empty() { Seed::Unseeded } else { Seed::Topic { states } }
			}
		};

		Ok(Candidates { storage, rng, dataset, size, max_length: input.max_length, words, seed })
	}

	/// Generates one reply candidate.
	pub fn reply(&mut self, input: &ReplyInput, tokens: &[Token]) -> Result<Vec<String>> {
		match self.candidates(input, tokens)?.next() {
			Some(candidate) => candidate,
			None => Ok(Vec::new()),
		}
	}

	/// Draws `rank.size()` candidates, joins their tokens with spaces and
	/// lets `rank` choose one.
	pub fn reply_ranked(&mut self, input: &ReplyInput, tokens: &[Token], rank: &Rank) -> Result<Option<String>> {
		let drawn = self
			.candidates(input, tokens)?
			.take(rank.size())
			.map(|candidate| candidate.map(|words| words.join(" ")))
			.collect::<Result<Vec<String>>>()?;
		let (_, _, rng) = self.parts_mut();
		rank.choose(drawn.into_iter().map(Ok), rng)
	}
}
