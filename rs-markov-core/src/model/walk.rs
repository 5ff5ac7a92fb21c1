use rand::Rng;

use crate::error::{Error, Result};
use crate::storage::{Edge, Storage};

/// Picks one edge of `state` using weighted random sampling.
///
/// The probability of selecting an edge is proportional to its count.
///
/// # Parameters
/// - `storage`: storage holding the links.
/// - `dataset`: resolved dataset.
/// - `state`: current state.
/// - `backward`: follow incoming edges instead of outgoing ones.
/// - `rng`: random source.
///
/// # Returns
/// - `Ok(Some(edge))`: the selected edge
/// - `Ok(None)`: the state has no edge (dead end)
///
/// # Errors
/// - `Error::InvalidLinkCount` if the cumulative scan falls through, which
///   means the stored counts are corrupt.
/// - Any storage error.
///
/// # Notes
/// - O(n) scan over the edges, in stored order. The result only depends on
///   that order and the RNG stream.
pub fn random_link<S, R>(
	storage: &S,
	dataset: &S::Dataset,
	state: &S::State,
	backward: bool,
	rng: &mut R,
) -> Result<Option<Edge<S::Node>>>
where
	S: Storage,
	R: Rng,
{
	let edges = storage.get_links(dataset, state, backward)?;
	if edges.is_empty() {
		return Ok(None);
	}

	let total: u64 = edges.iter().map(|edge| edge.count).sum();
	if total == 0 {
		return Err(Error::InvalidLinkCount(0));
	}

	let mut r = rng.random_range(0..total);
	for edge in edges {
		if r < edge.count {
			return Ok(Some(edge));
		}
		r -= edge.count;
	}

	Err(Error::InvalidLinkCount(total))
}

/// Lazy weighted random walk over a storage.
///
/// Each step draws one edge of the current state and follows it, yielding
/// the token it produces.
///
/// The walk ends:
/// - on a dead end (no edge)
/// - on a boundary edge (no token)
/// - walking backward, on the padding token `""` (start of a segment)
///
/// An error is yielded once, then the walk is over.
/// Dropping the walk early has no side effect.
pub struct Walk<'a, S: Storage, R: Rng> {
	storage: &'a S,
	dataset: S::Dataset,
	state: Option<S::State>,
	backward: bool,
	rng: &'a mut R,
}

impl<'a, S: Storage, R: Rng> Walk<'a, S, R> {
	/// Starts a walk from `state`.
	///
	/// A `None` state (never observed) gives an empty walk.
	pub fn new(
		storage: &'a S,
		dataset: S::Dataset,
		state: Option<S::State>,
		backward: bool,
		rng: &'a mut R,
	) -> Self {
		Self { storage, dataset, state, backward, rng }
	}

	/// Whether the walk goes backward.
	pub fn backward(&self) -> bool {
		self.backward
	}

	fn step(&mut self, state: S::State) -> Result<Option<String>> {
		let edge = match random_link(self.storage, &self.dataset, &state, self.backward, &mut *self.rng)? {
			Some(edge) => edge,
			None => return Ok(None),
		};
		let value = match &edge.value {
			Some(value) if !(self.backward && value.is_empty()) => value.clone(),
			_ => return Ok(None),
		};
		self.state = Some(self.storage.follow_link(&edge, state, self.backward));
		Ok(Some(value))
	}
}

impl<S: Storage, R: Rng> Iterator for Walk<'_, S, R> {
	type Item = Result<String>;

	fn next(&mut self) -> Option<Self::Item> {
		let state = self.state.take()?;
		self.step(state).transpose()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	use rand::SeedableRng;
	use rand::rngs::StdRng;

	use crate::model::token::Link;
	use crate::storage::MemoryStorage;

	fn link(source: &[&str], target: Option<&str>) -> Link {
		Link::new(
			"0".to_owned(),
			source.iter().map(|&s| s.to_owned()).collect(),
			target.map(str::to_owned),
		)
	}

	fn state(tokens: &[&str]) -> std::collections::VecDeque<String> {
		tokens.iter().map(|&t| t.to_owned()).collect()
	}

	#[test]
	fn dead_end_is_none() {
		let mut storage = MemoryStorage::new(None, false);
		storage.add_links(vec![link(&["x"], Some("y"))]).unwrap();
		let dataset = storage.find_dataset("0").unwrap();
		let mut rng = StdRng::seed_from_u64(0);
		assert_eq!(random_link(&storage, &dataset, &state(&["z"]), false, &mut rng).unwrap(), None);
		let edge = random_link(&storage, &dataset, &state(&["x"]), false, &mut rng).unwrap().unwrap();
		assert_eq!(edge.value.as_deref(), Some("y"));
	}

	#[test]
	fn sampling_is_fair() {
		let mut storage = MemoryStorage::new(None, false);
		storage
			.add_links(vec![
				link(&["x"], Some("a")),
				link(&["x"], Some("b")),
				link(&["x"], Some("c")),
				link(&["x"], Some("d")),
			])
			.unwrap();
		let dataset = storage.find_dataset("0").unwrap();
		let mut rng = StdRng::seed_from_u64(42);
		let mut seen: HashMap<String, usize> = HashMap::new();
		for _ in 0..10_000 {
			let edge = random_link(&storage, &dataset, &state(&["x"]), false, &mut rng).unwrap().unwrap();
			*seen.entry(edge.value.unwrap()).or_insert(0) += 1;
		}
		assert_eq!(seen.len(), 4);
		for (target, count) in seen {
			assert!((500..=6000).contains(&count), "{} drawn {} times", target, count);
		}
	}

	#[test]
	fn sampling_follows_counts() {
		let mut storage = MemoryStorage::new(None, false);
		let mut links = vec![link(&["x"], Some("rare"))];
		links.extend((0..9).map(|_| link(&["x"], Some("common"))));
		storage.add_links(links).unwrap();
		let dataset = storage.find_dataset("0").unwrap();
		let mut rng = StdRng::seed_from_u64(7);
		let common = (0..1000)
			.filter(|_| {
				let edge = random_link(&storage, &dataset, &state(&["x"]), false, &mut rng).unwrap().unwrap();
				edge.value.as_deref() == Some("common")
			})
			.count();
		assert!(common > 800, "common drawn {} times", common);
	}

	#[test]
	fn walk_forward_until_boundary() {
		let mut storage = MemoryStorage::new(None, false);
		storage
			.add_links(vec![link(&[""], Some("a")), link(&["a"], Some("b")), link(&["b"], None)])
			.unwrap();
		let mut rng = StdRng::seed_from_u64(1);
		let walk = Walk::new(&storage, "0".to_owned(), Some(state(&[""])), false, &mut rng);
		let tokens: Vec<String> = walk.collect::<Result<_>>().unwrap();
		assert_eq!(tokens, vec!["a", "b"]);
	}

	#[test]
	fn walk_backward_until_padding() {
		let mut storage = MemoryStorage::new(None, true);
		storage
			.add_links(vec![link(&["", ""], Some("a")), link(&["", "a"], Some("b")), link(&["a", "b"], Some("c"))])
			.unwrap();
		let mut rng = StdRng::seed_from_u64(1);
		let walk = Walk::new(&storage, "0".to_owned(), Some(state(&["b", "c"])), true, &mut rng);
		assert!(walk.backward());
		let tokens: Vec<String> = walk.collect::<Result<_>>().unwrap();
		assert_eq!(tokens, vec!["a"]);
	}

	#[test]
	fn walk_from_unknown_state_is_empty() {
		let storage = MemoryStorage::new(None, false);
		let mut rng = StdRng::seed_from_u64(1);
		let mut walk = Walk::new(&storage, "0".to_owned(), None, false, &mut rng);
		assert!(walk.next().is_none());
	}

	#[test]
	fn walk_backward_disabled_yields_error_once() {
		let storage = MemoryStorage::new(None, false);
		let mut rng = StdRng::seed_from_u64(1);
		let mut walk = Walk::new(&storage, "0".to_owned(), Some(state(&["x"])), true, &mut rng);
		assert!(matches!(walk.next(), Some(Err(Error::BackwardDisabled))));
		assert!(walk.next().is_none());
	}
}
