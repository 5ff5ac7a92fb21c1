use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::LazyLock;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Scores a generated candidate. Higher is better.
pub trait Scorer: Debug {
	/// Registry name of the scorer.
	fn name(&self) -> &'static str;

	fn score(&self, candidate: &str) -> f64;
}

/// Gives every candidate the same score.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Const;

impl Scorer for Const {
	fn name(&self) -> &'static str {
		"const"
	}

	fn score(&self, _candidate: &str) -> f64 {
		1.0
	}
}

/// Scores the shape of a sentence.
///
/// Averages three features, each clamped to `[0, 1]`:
/// - closeness of the word count to `opt_words`
/// - closeness of the long word count to `opt_long_words` (squared distance)
/// - closeness of the long word ratio to `opt_long_word_ratio`
///
/// A long word has at least `long_word_length` characters.
#[derive(Clone, Debug, PartialEq)]
pub struct WordShape {
	pub opt_words: f64,
	pub opt_long_words: f64,
	pub opt_long_word_ratio: f64,
	pub long_word_length: usize,
}

impl Default for WordShape {
	fn default() -> Self {
		Self { opt_words: 8.0, opt_long_words: 4.0, opt_long_word_ratio: 0.6, long_word_length: 4 }
	}
}

impl WordShape {
	/// Raw (unclamped) features of `candidate`.
	pub fn features(&self, candidate: &str) -> [f64; 3] {
		let words = words(candidate);
		let count = words.len() as f64;
		let long = words.iter().filter(|word| word.chars().count() >= self.long_word_length).count() as f64;
		let ratio = if words.is_empty() { 0.0 } else { long / count };
		[
			1.0 - (1.0 - count / self.opt_words).abs(),
			1.0 - (1.0 - long / self.opt_long_words).abs().powi(2),
			1.0 - (1.0 - ratio / self.opt_long_word_ratio).abs(),
		]
	}
}

impl Scorer for WordShape {
	fn name(&self) -> &'static str {
		"word_shape"
	}

	fn score(&self, candidate: &str) -> f64 {
		let features = self.features(candidate);
		let score = features.iter().map(|x| x.clamp(0.0, 1.0)).sum::<f64>() / features.len() as f64;
		log::trace!("{:.4} {:?} {:?}", score, features, candidate);
		score
	}
}

/// Words of a candidate, punctuation stripped.
fn words(candidate: &str) -> Vec<&str> {
	candidate
		.split_whitespace()
		.map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()))
		.filter(|word| !word.is_empty())
		.collect()
}

type ScorerConstructor = fn() -> Box<dyn Scorer>;

static SCORERS: LazyLock<HashMap<&'static str, ScorerConstructor>> = LazyLock::new(|| {
	let mut scorers: HashMap<&'static str, ScorerConstructor> = HashMap::new();
	scorers.insert("const", || Box::new(Const));
	scorers.insert("word_shape", || Box::new(WordShape::default()));
	scorers
});

/// Builds a registered scorer.
///
/// # Errors
/// Returns `Error::UnknownScorer` if `name` is not registered.
pub fn scorer(name: &str) -> Result<Box<dyn Scorer>> {
	SCORERS
		.get(name)
		.map(|constructor| constructor())
		.ok_or_else(|| Error::UnknownScorer(name.to_owned()))
}

/// Registered scorer names, sorted.
pub fn scorer_names() -> Vec<&'static str> {
	let mut names: Vec<&'static str> = SCORERS.keys().copied().collect();
	names.sort_unstable();
	names
}

/// Serializable rank configuration (stored under `settings.markov.rank`).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RankSettings {
	pub scorer: String,
	pub size: usize,
	pub remove: f64,
}

impl Default for RankSettings {
	fn default() -> Self {
		Self { scorer: "const".to_owned(), size: 10, remove: 0.5 }
	}
}

/// Candidate ranking: draw `size` candidates, drop the worst `remove`
/// fraction, pick one of the survivors at random.
///
/// # Invariants
/// - `size >= 1`
/// - `0 <= remove <= 1`
#[derive(Debug)]
pub struct Rank {
	size: usize,
	remove: f64,
	scorer: Box<dyn Scorer>,
}

impl Rank {
	/// # Errors
	/// Returns `Error::Config` if `size == 0` or `remove` is outside `[0, 1]`.
	pub fn new(size: usize, remove: f64, scorer: Box<dyn Scorer>) -> Result<Self> {
		let mut rank = Self { size: 1, remove: 0.0, scorer };
		rank.set_size(size)?;
		rank.set_remove(remove)?;
		Ok(rank)
	}

	pub fn from_settings(settings: &RankSettings) -> Result<Self> {
		Self::new(settings.size, settings.remove, scorer(&settings.scorer)?)
	}

	pub fn settings(&self) -> RankSettings {
		RankSettings { scorer: self.scorer.name().to_owned(), size: self.size, remove: self.remove }
	}

	pub fn size(&self) -> usize {
		self.size
	}

	pub fn remove(&self) -> f64 {
		self.remove
	}

	pub fn scorer(&self) -> &dyn Scorer {
		self.scorer.as_ref()
	}

	/// Sets the number of candidates drawn by `choose`.
	///
	/// # Errors
	/// Returns `Error::Config` if `size == 0`.
	pub fn set_size(&mut self, size: usize) -> Result<()> {
		if size == 0 {
			return Err(Error::Config("rank size <= 0".to_owned()));
		}
		self.size = size;
		Ok(())
	}

	/// Sets the removed fraction.
	///
	/// # Errors
	/// Returns `Error::Config` if `remove` is outside `[0, 1]`.
	pub fn set_remove(&mut self, remove: f64) -> Result<()> {
		if !(0.0..=1.0).contains(&remove) {
			return Err(Error::Config(format!("rank remove must be between 0.0 and 1.0, got {}", remove)));
		}
		self.remove = remove;
		Ok(())
	}

	/// Sorts candidates by descending score (stable) and keeps the best
	/// `max(1, n - floor(remove * n))`.
	///
	/// An empty input gives an empty output.
	pub fn filter<T: AsRef<str>>(&self, candidates: Vec<T>) -> Vec<T> {
		let mut scored: Vec<(f64, T)> = candidates
			.into_iter()
			.map(|candidate| (self.scorer.score(candidate.as_ref()), candidate))
			.collect();
		scored.sort_by(|a, b| b.0.total_cmp(&a.0));

		let n = scored.len();
		let keep = n.saturating_sub((self.remove * n as f64).floor() as usize).max(1).min(n);
		scored.truncate(keep);

		if log::log_enabled!(log::Level::Debug) {
			for (score, candidate) in &scored {
				log::debug!("{} {:.4} {:?}", self.scorer.name(), score, candidate.as_ref());
			}
		}
		scored.into_iter().map(|(_, candidate)| candidate).collect()
	}

	/// Draws up to `size` candidates, filters them and picks one survivor
	/// uniformly.
	///
	/// # Returns
	/// `Ok(None)` if `candidates` yields nothing.
	///
	/// # Errors
	/// The first error yielded by `candidates`.
	pub fn choose<T, I, R>(&self, candidates: I, rng: &mut R) -> Result<Option<T>>
	where
		T: AsRef<str>,
		I: IntoIterator<Item = Result<T>>,
		R: Rng,
	{
		let drawn = candidates.into_iter().take(self.size).collect::<Result<Vec<T>>>()?;
		let mut survivors = self.filter(drawn);
		if survivors.is_empty() {
			return Ok(None);
		}
		let index = rng.random_range(0..survivors.len());
		Ok(Some(survivors.swap_remove(index)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	fn candidates(n: usize) -> Vec<String> {
		(0..n).map(|i| format!("candidate {}", i)).collect()
	}

	#[test]
	fn filter_keeps_half() {
		let rank = Rank::new(10, 0.5, Box::new(Const)).unwrap();
		assert_eq!(rank.filter(candidates(10)).len(), 5);
	}

	#[test]
	fn filter_keeps_all() {
		let rank = Rank::new(10, 0.0, Box::new(Const)).unwrap();
		assert_eq!(rank.filter(candidates(10)), candidates(10));
	}

	#[test]
	fn filter_keeps_at_least_one() {
		let rank = Rank::new(10, 1.0, Box::new(Const)).unwrap();
		assert_eq!(rank.filter(candidates(3)), vec!["candidate 0"]);
		assert!(rank.filter(Vec::<String>::new()).is_empty());
	}

	#[test]
	fn filter_sorts_by_score() {
		let rank = Rank::new(3, 0.5, Box::new(WordShape::default())).unwrap();
		let good = "these quite lovely words form a nice sentence";
		let kept = rank.filter(vec!["a", good, "b c"]);
		assert_eq!(kept, vec![good, "b c"]);
	}

	#[test]
	fn invalid_bounds() {
		assert!(matches!(Rank::new(0, 0.5, Box::new(Const)), Err(Error::Config(_))));
		assert!(matches!(Rank::new(1, 1.5, Box::new(Const)), Err(Error::Config(_))));
		assert!(matches!(Rank::new(1, -0.1, Box::new(Const)), Err(Error::Config(_))));
	}

	#[test]
	fn choose_among_survivors() {
		let rank = Rank::new(4, 0.5, Box::new(WordShape::default())).unwrap();
		let mut rng = StdRng::seed_from_u64(5);
		let drawn = vec!["x", "these quite lovely words form a nice sentence", "y", "long words here"]
			.into_iter()
			.map(Ok)
			.chain(std::iter::repeat_with(|| Ok("never drawn")));
		let chosen = rank.choose(drawn, &mut rng).unwrap().unwrap();
		assert!(chosen == "these quite lovely words form a nice sentence" || chosen == "long words here");
		assert_eq!(rank.choose(Vec::<Result<String>>::new(), &mut rng).unwrap(), None);
	}

	#[test]
	fn word_shape_scores() {
		let shape = WordShape::default();
		assert_eq!(shape.score(""), 0.0);
		let best = "alpha bravo charlie delta and so on x";
		assert!((shape.score(best) - (1.0 + 1.0 + (1.0 - (1.0 - 0.5 / 0.6_f64).abs())) / 3.0).abs() < 1e-9);
		assert!(shape.score(best) > shape.score("a b"));
	}

	#[test]
	fn registry_round_trip() {
		assert_eq!(scorer_names(), vec!["const", "word_shape"]);
		assert_eq!(scorer("word_shape").unwrap().name(), "word_shape");
		assert!(matches!(scorer("nope"), Err(Error::UnknownScorer(_))));

		let settings = RankSettings { scorer: "word_shape".to_owned(), size: 3, remove: 0.25 };
		let rank = Rank::from_settings(&settings).unwrap();
		assert_eq!(rank.settings(), settings);
		let json = serde_json::to_value(&settings).unwrap();
		assert_eq!(serde_json::from_value::<RankSettings>(json).unwrap(), settings);
	}
}
