/// A single item of the token stream consumed by the parser.
///
/// # Variants
/// - `Word(String)`: an ordinary, opaque token value.
/// - `End`: segment boundary (end of sentence, end of image row, ...).
/// - `Start(String)`: forces the sliding window to the given seed value
///   instead of sliding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
	Word(String),
	End,
	Start(String),
}

impl Token {
	/// Shorthand for `Token::Word`.
	pub fn word<S: Into<String>>(value: S) -> Self {
		Token::Word(value.into())
	}

	/// Returns the word value, or `None` for boundary markers.
	pub fn as_word(&self) -> Option<&str> {
		match self {
			Token::Word(w) => Some(w),
			_ => None,
		}
	}
}

impl From<&str> for Token {
	fn from(value: &str) -> Self {
		Token::Word(value.to_owned())
	}
}

/// One link observation emitted by the parser.
///
/// - `dataset`: dataset key (prefix + suffixes)
/// - `source`: window of the last `n` tokens, padded with `""`
/// - `target`: next token, or `None` when the window was closed by a boundary
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
	pub dataset: String,
	pub source: Vec<String>,
	pub target: Option<String>,
}

impl Link {
	pub fn new(dataset: String, source: Vec<String>, target: Option<String>) -> Self {
		Self { dataset, source, target }
	}

	/// Window reached after following this link forward.
	///
	/// Returns `None` for boundary links (no successor).
	pub fn successor(&self) -> Option<Vec<String>> {
		let target = self.target.as_ref()?;
		let mut next: Vec<String> = self.source.iter().skip(1).cloned().collect();
		next.push(target.clone());
		Some(next)
	}
}

/// Dataset key suffix for a state size.
pub fn size_dataset(state_size: usize) -> String {
	format!(":{}", state_size)
}

/// Dataset key suffix for a hierarchical level.
pub fn level_dataset(level: usize) -> String {
	format!("@{}", level)
}

/// Dataset key suffix for a channel.
pub fn channel_dataset(channel: &str) -> String {
	format!("#{}", channel)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn suffixes_never_collide() {
		for n in 0..5 {
			assert!(!size_dataset(n).is_empty());
			assert_ne!(size_dataset(n), size_dataset(n + 1));
			assert_ne!(level_dataset(n), level_dataset(n + 1));
			assert_ne!(size_dataset(n), level_dataset(n));
			assert_ne!(channel_dataset(&n.to_string()), size_dataset(n));
		}
	}

	#[test]
	fn successor_window() {
		let link = Link::new(":2".into(), vec!["x".into(), "y".into()], Some("z".into()));
		assert_eq!(link.successor(), Some(vec!["y".to_owned(), "z".to_owned()]));

		let end = Link::new(":2".into(), vec!["x".into(), "y".into()], None);
		assert_eq!(end.successor(), None);
	}
}
