/// Infallible variants of the str splitters; absent delimiters yield the
/// full input on one side and an empty string on the other.
pub trait SplitInfallible {
	fn split_once_infallible(&self, delim: &str) -> (&str, &str);

	fn rsplit_once_infallible(&self, delim: &str) -> (&str, &str);
}

impl SplitInfallible for str {
	#[inline]
	fn split_once_infallible(&self, delim: &str) -> (&str, &str) {
		self.split_once(delim).unwrap_or((self, ""))
	}

	#[inline]
	fn rsplit_once_infallible(&self, delim: &str) -> (&str, &str) {
		self.rsplit_once(delim).unwrap_or((self, ""))
	}
}
