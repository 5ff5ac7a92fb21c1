/// Default number of items between two progress messages.
pub const DEFAULT_STEP: usize = 10_000;

/// Iterator decorator reporting progress through `log`.
///
/// Forwards every item unchanged and counts them. Every `step` items an
/// `info` message is logged; the total is logged at `debug` level once the
/// inner iterator is exhausted.
pub struct Progress<I> {
	inner: I,
	label: String,
	step: usize,
	count: usize,
	done: bool,
}

impl<I: Iterator> Progress<I> {
	/// Wraps `inner`.
	///
	/// # Parameters
	/// - `inner`: iterator to observe.
	/// - `label`: prefix of the log messages.
	/// - `step`: items between two messages (a step of 0 disables them).
	pub fn new<S: Into<String>>(inner: I, label: S, step: usize) -> Self {
		Self { inner, label: label.into(), step, count: 0, done: false }
	}

	/// Number of items forwarded so far.
	pub fn total(&self) -> usize {
		self.count
	}
}

impl<I: Iterator> Iterator for Progress<I> {
	type Item = I::Item;

	fn next(&mut self) -> Option<Self::Item> {
		match self.inner.next() {
			Some(item) => {
				self.count += 1;
				if self.step > 0 && self.count % self.step == 0 {
					log::info!("{}: {}", self.label, self.count);
				}
				Some(item)
			}
			None => {
				if !self.done {
					self.done = true;
					log::debug!("{}: {} total", self.label, self.count);
				}
				None
			}
		}
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		self.inner.size_hint()
	}
}
