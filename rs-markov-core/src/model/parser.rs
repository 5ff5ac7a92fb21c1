use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use super::token::{channel_dataset, level_dataset, size_dataset, Link, Token};

/// Serializable parser configuration.
///
/// Stored in the store settings so that a loaded store can rebuild the
/// parser it was trained with.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ParserSettings {
	pub state_sizes: Vec<usize>,
	pub reset_on_boundary: bool,
}

impl Default for ParserSettings {
	fn default() -> Self {
		Self { state_sizes: vec![1], reset_on_boundary: true }
	}
}

/// Turns a token stream into a stream of link observations.
///
/// The parser keeps a single sliding window sized to the largest configured
/// state size. For every ordinary token it emits one link per state size,
/// using the last `s` entries of the window as source, before sliding.
///
/// # Invariants
/// - `state_sizes` is non-empty and every size is >= 1
/// - `window.len() == state_size == max(state_sizes)`
#[derive(Clone, Debug)]
pub struct Parser {
	state_sizes: Vec<usize>,
	state_size: usize,
	reset_on_boundary: bool,
	window: VecDeque<String>,
	/// `true` when no segment is open (nothing to close on a boundary).
	end: bool,
}

impl Default for Parser {
	fn default() -> Self {
		Self {
			state_sizes: vec![1],
			state_size: 1,
			reset_on_boundary: true,
			window: VecDeque::from(vec![String::new()]),
			end: true,
		}
	}
}

impl PartialEq for Parser {
	/// Two parsers are equal when they are configured the same way,
	/// whatever their current window.
	fn eq(&self, other: &Self) -> bool {
		self.state_sizes == other.state_sizes && self.reset_on_boundary == other.reset_on_boundary
	}
}

impl Parser {
	/// Creates a parser.
	///
	/// # Errors
	/// Returns `Error::Config` if `state_sizes` is empty or contains 0.
	pub fn new(state_sizes: Vec<usize>, reset_on_boundary: bool) -> Result<Self> {
		let mut parser = Self { reset_on_boundary, ..Self::default() };
		parser.set_state_sizes(state_sizes)?;
		Ok(parser)
	}

	pub fn from_settings(settings: &ParserSettings) -> Result<Self> {
		Self::new(settings.state_sizes.clone(), settings.reset_on_boundary)
	}

	pub fn settings(&self) -> ParserSettings {
		ParserSettings {
			state_sizes: self.state_sizes.clone(),
			reset_on_boundary: self.reset_on_boundary,
		}
	}

	pub fn state_sizes(&self) -> &[usize] {
		&self.state_sizes
	}

	/// Window length (largest configured state size).
	pub fn state_size(&self) -> usize {
		self.state_size
	}

	pub fn reset_on_boundary(&self) -> bool {
		self.reset_on_boundary
	}

	/// Current window content, oldest token first.
	pub fn window(&self) -> Vec<String> {
		self.window.iter().cloned().collect()
	}

	/// Replaces the configured state sizes.
	///
	/// The window is rebuilt (and cleared) only if the sizes change.
	///
	/// # Errors
	/// Returns `Error::Config` if `state_sizes` is empty or contains 0.
	/// The parser is left untouched in that case.
	pub fn set_state_sizes(&mut self, state_sizes: Vec<usize>) -> Result<()> {
		if state_sizes.is_empty() {
			return Err(Error::Config("parser state sizes are empty".to_owned()));
		}
		if state_sizes.iter().any(|&s| s == 0) {
			return Err(Error::Config(format!("parser state size <= 0: {:?}", state_sizes)));
		}
		if state_sizes == self.state_sizes {
			return Ok(());
		}
		// Impossible to be empty, checked above
		self.state_size = state_sizes.iter().copied().max().unwrap_or(1);
		self.state_sizes = state_sizes;
		self.window = std::iter::repeat_n(String::new(), self.state_size).collect();
		self.end = true;
		Ok(())
	}

	/// Clears the window (all padding) and closes the current segment.
	pub fn reset(&mut self) {
		for entry in self.window.iter_mut() {
			entry.clear();
		}
		self.end = true;
	}

	/// Parses a token stream into link observations.
	///
	/// # Parameters
	/// - `tokens`: token stream, consumed lazily.
	/// - `part`: `true` if more input will follow in a later call. When
	///   `false`, a final boundary is flushed once the input is exhausted and
	///   the window is reset.
	/// - `dataset`: dataset key prefix, the size suffix is appended per link.
	///
	/// # Notes
	/// - Links are produced on demand. Dropping the iterator early leaves the
	///   window where parsing stopped and skips the final flush.
	pub fn parse<I>(&mut self, tokens: I, part: bool, dataset: &str) -> Links<'_, I::IntoIter>
	where
		I: IntoIterator<Item = Token>,
	{
		Links {
			parser: self,
			tokens: tokens.into_iter(),
			part,
			dataset: dataset.to_owned(),
			pending: VecDeque::new(),
			finished: false,
		}
	}

	fn feed(&mut self, token: Token, dataset: &str, out: &mut VecDeque<Link>) {
		match token {
			Token::Word(word) => {
				self.emit(dataset, Some(&word), out);
				self.window.pop_front();
				self.window.push_back(word);
				self.end = false;
			}
			Token::End => self.boundary(dataset, out),
			Token::Start(seed) => {
				self.reset();
				self.window.pop_front();
				self.window.push_back(seed);
				self.end = false;
			}
		}
	}

	/// Closes the open segment, if any.
	fn boundary(&mut self, dataset: &str, out: &mut VecDeque<Link>) {
		if !self.end {
			self.emit(dataset, None, out);
			if self.reset_on_boundary {
				self.reset();
			}
		}
		self.end = true;
	}

	fn emit(&self, dataset: &str, target: Option<&str>, out: &mut VecDeque<Link>) {
		for &size in &self.state_sizes {
			let start = self.state_size - size;
			let source: Vec<String> = self.window.iter().skip(start).cloned().collect();
			out.push_back(Link::new(
				format!("{}{}", dataset, size_dataset(size)),
				source,
				target.map(str::to_owned),
			));
		}
	}
}

/// Lazy link stream returned by [`Parser::parse`].
pub struct Links<'p, I> {
	parser: &'p mut Parser,
	tokens: I,
	part: bool,
	dataset: String,
	pending: VecDeque<Link>,
	finished: bool,
}

impl<I: Iterator<Item = Token>> Iterator for Links<'_, I> {
	type Item = Link;

	fn next(&mut self) -> Option<Link> {
		loop {
			if let Some(link) = self.pending.pop_front() {
				return Some(link);
			}
			if self.finished {
				return None;
			}
			match self.tokens.next() {
				Some(token) => self.parser.feed(token, &self.dataset, &mut self.pending),
				None => {
					self.finished = true;
					if !self.part {
						self.parser.boundary(&self.dataset, &mut self.pending);
						self.parser.reset();
					}
				}
			}
		}
	}
}

/// Serializable level parser configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LevelParserSettings {
	pub levels: usize,
	pub parsers: Vec<ParserSettings>,
}

/// One parser per hierarchical level (ex. image resolution levels).
///
/// Level `L` links get `level_dataset(L)` appended to their dataset key,
/// after the state size suffix. Channel links (`parse_channel`) also get
/// `channel_dataset(C)` after the level suffix.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelParser {
	levels: usize,
	parsers: Vec<Parser>,
	/// Longest parser list ever assigned, restored when `levels` grows.
	parsers_max: Vec<Parser>,
}

impl LevelParser {
	/// Creates a level parser.
	///
	/// - An empty `parsers` list means one default parser.
	/// - A shorter list is filled with copies of its last parser.
	/// - A longer list is truncated, the extra parsers are kept aside.
	///
	/// # Errors
	/// Returns `Error::Config` if `levels == 0`.
	pub fn new(levels: usize, parsers: Vec<Parser>) -> Result<Self> {
		if levels == 0 {
			return Err(Error::Config("level count <= 0".to_owned()));
		}
		let mut level_parser = Self { levels, parsers: Vec::new(), parsers_max: Vec::new() };
		level_parser.set_parsers(parsers);
		Ok(level_parser)
	}

	pub fn from_settings(settings: &LevelParserSettings) -> Result<Self> {
		let parsers = settings
			.parsers
			.iter()
			.map(Parser::from_settings)
			.collect::<Result<Vec<_>>>()?;
		Self::new(settings.levels, parsers)
	}

	pub fn settings(&self) -> LevelParserSettings {
		LevelParserSettings {
			levels: self.levels,
			parsers: self.parsers.iter().map(Parser::settings).collect(),
		}
	}

	pub fn levels(&self) -> usize {
		self.levels
	}

	pub fn parsers(&self) -> &[Parser] {
		&self.parsers
	}

	/// Changes the level count.
	///
	/// # Errors
	/// Returns `Error::Config` if `levels == 0`, leaving the parser untouched.
	pub fn set_levels(&mut self, levels: usize) -> Result<()> {
		if levels == 0 {
			return Err(Error::Config("level count <= 0".to_owned()));
		}
		self.levels = levels;
		let parsers = self.parsers_max.clone();
		self.set_parsers(parsers);
		Ok(())
	}

	pub fn set_parsers(&mut self, mut parsers: Vec<Parser>) {
		if parsers.is_empty() {
			parsers.push(Parser::default());
		}
		let mut filled: Vec<Parser> = parsers.iter().take(self.levels).cloned().collect();
		while filled.len() < self.levels {
			// Not empty, at least one parser was pushed above
			let last = filled[filled.len() - 1].clone();
			filled.push(last);
		}
		self.parsers_max = if parsers.len() > filled.len() { parsers } else { filled.clone() };
		self.parsers = filled;
	}

	pub fn reset(&mut self) {
		for parser in self.parsers.iter_mut() {
			parser.reset();
		}
	}

	/// Parses one token stream per level.
	///
	/// Extra streams beyond `levels` are ignored.
	pub fn parse<L, I>(&mut self, levels: L, part: bool, dataset: &str) -> impl Iterator<Item = Link>
	where
		L: IntoIterator<Item = I>,
		I: IntoIterator<Item = Token>,
	{
		self.parse_suffixed(levels, part, dataset, String::new())
	}

	/// Parses one token stream per level of a single channel (ex. one color
	/// component of an image). Channels are independent datasets.
	pub fn parse_channel<L, I>(&mut self, levels: L, part: bool, dataset: &str, channel: &str) -> impl Iterator<Item = Link>
	where
		L: IntoIterator<Item = I>,
		I: IntoIterator<Item = Token>,
	{
		self.parse_suffixed(levels, part, dataset, channel_dataset(channel))
	}

	fn parse_suffixed<L, I>(&mut self, levels: L, part: bool, dataset: &str, channel: String) -> impl Iterator<Item = Link>
	where
		L: IntoIterator<Item = I>,
		I: IntoIterator<Item = Token>,
	{
		let prefix = dataset.to_owned();
		self.parsers
			.iter_mut()
			.enumerate()
			.zip(levels)
			.flat_map(move |((level, parser), tokens)| {
				let suffix = level_dataset(level) + &channel;
				parser.parse(tokens, part, &prefix).map(move |mut link| {
					link.dataset.push_str(&suffix);
					link
				})
			})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn words(values: &[&str]) -> Vec<Token> {
		values.iter().map(|&v| Token::from(v)).collect()
	}

	fn parse(parser: &mut Parser, tokens: Vec<Token>, part: bool) -> Vec<(String, Option<String>)> {
		parser
			.parse(tokens, part, "")
			.map(|link| (link.source.join(" "), link.target))
			.collect()
	}

	fn pair(source: &str, target: &str) -> (String, Option<String>) {
		(source.to_owned(), Some(target.to_owned()))
	}

	fn end(source: &str) -> (String, Option<String>) {
		(source.to_owned(), None)
	}

	#[test]
	fn invalid_state_sizes() {
		assert!(matches!(Parser::new(vec![1, 0, 2], true), Err(Error::Config(_))));
		assert!(matches!(Parser::new(vec![], true), Err(Error::Config(_))));

		let mut parser = Parser::default();
		assert!(parser.set_state_sizes(vec![0]).is_err());
		assert_eq!(parser.state_sizes(), &[1]);
		assert_eq!(parser.state_size(), 1);
	}

	#[test]
	fn state_sizes_rebuild_window() {
		let mut parser = Parser::default();
		parser.set_state_sizes(vec![2, 1]).unwrap();
		assert_eq!(parser.state_size(), 2);
		assert_eq!(parser.window(), vec!["", ""]);

		parser.parse(words(&["test"]), true, "").for_each(drop);
		assert_eq!(parser.window(), vec!["", "test"]);

		// Same sizes keep the window
		parser.set_state_sizes(vec![2, 1]).unwrap();
		assert_eq!(parser.window(), vec!["", "test"]);

		parser.set_state_sizes(vec![3]).unwrap();
		assert_eq!(parser.window(), vec!["", "", ""]);
	}

	#[test]
	fn single_size_without_boundary() {
		let mut parser = Parser::default();
		assert_eq!(
			parse(&mut parser, words(&["a", "b", "c"]), true),
			vec![pair("", "a"), pair("a", "b"), pair("b", "c")]
		);
	}

	#[test]
	fn final_flush_and_reset() {
		let mut parser = Parser::default();
		assert!(parse(&mut parser, vec![], false).is_empty());
		assert_eq!(
			parse(&mut parser, words(&["a", "b"]), false),
			vec![pair("", "a"), pair("a", "b"), end("b")]
		);
		assert_eq!(parser.window(), vec![""]);
	}

	#[test]
	fn partial_input_keeps_window() {
		let mut parser = Parser::default();
		parse(&mut parser, words(&["a", "b", "c"]), true);
		let mut tokens = words(&["a", "b"]);
		tokens.push(Token::End);
		tokens.push(Token::word("c"));
		assert_eq!(
			parse(&mut parser, tokens, false),
			vec![pair("c", "a"), pair("a", "b"), end("b"), pair("", "c"), end("c")]
		);
	}

	#[test]
	fn redundant_boundaries_are_ignored() {
		let mut parser = Parser::default();
		let tokens = vec![Token::word("a"), Token::End, Token::End, Token::word("c")];
		assert_eq!(
			parse(&mut parser, tokens, true),
			vec![pair("", "a"), end("a"), pair("", "c")]
		);
		assert_eq!(parse(&mut parser, vec![Token::End; 4], true), vec![end("c")]);
	}

	#[test]
	fn boundary_without_reset() {
		let mut parser = Parser::new(vec![2], false).unwrap();
		let tokens = vec![Token::word("a"), Token::End, Token::word("b")];
		assert_eq!(
			parse(&mut parser, tokens, true),
			vec![pair(" ", "a"), end(" a"), pair(" a", "b")]
		);
	}

	#[test]
	fn start_seeds_the_window() {
		let mut parser = Parser::new(vec![3], true).unwrap();
		let mut tokens = words(&["a", "b", "c"]);
		tokens.push(Token::Start("d".to_owned()));
		tokens.push(Token::word("e"));
		assert_eq!(
			parse(&mut parser, tokens, true),
			vec![pair("  ", "a"), pair("  a", "b"), pair(" a b", "c"), pair("  d", "e")]
		);
	}

	#[test]
	fn multiple_sizes_use_dataset_suffixes() {
		let mut parser = Parser::new(vec![1, 2], true).unwrap();
		let links: Vec<Link> = parser.parse(words(&["a", "b"]), true, "pre").collect();
		assert_eq!(links.len(), 4);
		assert_eq!(links[0].dataset, "pre:1");
		assert_eq!(links[1].dataset, "pre:2");
		assert_eq!(links[2].source, vec!["a"]);
		assert_eq!(links[3].source, vec!["", "a"]);
	}

	#[test]
	fn settings_round_trip() {
		let parser = Parser::new(vec![1, 2, 3], false).unwrap();
		let json = serde_json::to_value(parser.settings()).unwrap();
		let settings: ParserSettings = serde_json::from_value(json).unwrap();
		assert_eq!(Parser::from_settings(&settings).unwrap(), parser);
	}

	#[test]
	fn level_parser_fill_and_restore() {
		let mut parser = LevelParser::new(1, vec![]).unwrap();
		assert_eq!(parser.parsers(), &[Parser::default()]);
		assert!(LevelParser::new(0, vec![]).is_err());
		assert!(parser.set_levels(0).is_err());

		parser.set_levels(2).unwrap();
		assert_eq!(parser.parsers(), &[Parser::default(), Parser::default()]);

		let level = Parser::new(vec![2, 3], true).unwrap();
		parser.set_parsers(vec![level.clone()]);
		assert_eq!(parser.parsers(), &[level.clone(), level.clone()]);

		parser.set_parsers(vec![Parser::default(), level.clone(), Parser::default()]);
		assert_eq!(parser.parsers(), &[Parser::default(), level.clone()]);

		parser.set_levels(1).unwrap();
		assert_eq!(parser.parsers(), &[Parser::default()]);
		parser.set_levels(2).unwrap();
		assert_eq!(parser.parsers()[1], level);
	}

	#[test]
	fn level_parser_appends_level_suffix() {
		let mut parser = LevelParser::new(2, vec![]).unwrap();
		let levels = vec![words(&["a"]), words(&["b"]), words(&["ignored"])];
		let links: Vec<Link> = parser.parse(levels, true, "img").collect();
		assert_eq!(links.len(), 2);
		assert_eq!(links[0].dataset, "img:1@0");
		assert_eq!(links[0].target.as_deref(), Some("a"));
		assert_eq!(links[1].dataset, "img:1@1");
	}

	#[test]
	fn level_parser_appends_channel_suffix() {
		let mut parser = LevelParser::new(2, vec![]).unwrap();
		let levels = vec![words(&["a"]), words(&["b"])];
		let datasets: Vec<String> = parser.parse_channel(levels, true, "img", "R").map(|link| link.dataset).collect();
		assert_eq!(datasets, vec!["img:1@0#R", "img:1@1#R"]);
	}

	#[test]
	fn level_parser_settings_round_trip() {
		let parser = LevelParser::new(3, vec![Parser::new(vec![2], false).unwrap()]).unwrap();
		let loaded = LevelParser::from_settings(&parser.settings()).unwrap();
		assert_eq!(loaded, parser);
	}
}
