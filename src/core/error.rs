use std::fmt;

/// Error type for the whole workspace. The first group carries the
/// user-visible taxonomy: how a variant maps onto an HTTP reply is the api
/// crate's concern.
#[derive(thiserror::Error)]
pub enum Error {
	/// Malformed request input; generic bad-request.
	#[error("{0}")]
	BadRequest(String),

	/// The position token failed to parse.
	#[error("{0}")]
	BadToken(String),

	/// The position token parsed but is not owned by the connection or has
	/// been superseded. Clients recognise this and restart the stream.
	#[error("{0}")]
	UnknownPos(String),

	/// Requested object does not exist; recovered locally on most paths.
	#[error("{0}")]
	NotFound(String),

	/// Storage engine failure.
	#[error("{0}")]
	Database(String),

	/// Configuration failure at startup.
	#[error("{0}")]
	Config(String),

	/// Catch-all for internal invariant failures.
	#[error("{0}")]
	Internal(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Figment(#[from] Box<figment::Error>),
}

impl Error {
	#[inline]
	#[must_use]
	pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound(_)) }

	#[inline]
	#[must_use]
	pub fn is_unknown_pos(&self) -> bool { matches!(self, Self::UnknownPos(_)) }

	/// Name of the variant for terse logging.
	#[must_use]
	pub fn kind(&self) -> &'static str {
		match self {
			| Self::BadRequest(_) => "BadRequest",
			| Self::BadToken(_) => "BadToken",
			| Self::UnknownPos(_) => "UnknownPos",
			| Self::NotFound(_) => "NotFound",
			| Self::Database(_) => "Database",
			| Self::Config(_) => "Config",
			| Self::Internal(_) => "Internal",
			| Self::Io(_) => "Io",
			| Self::Json(_) => "Json",
			| Self::Figment(_) => "Figment",
		}
	}
}

impl fmt::Debug for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {self}", self.kind())
	}
}

impl From<figment::Error> for Error {
	fn from(e: figment::Error) -> Self { Self::Figment(Box::new(e)) }
}

/// Construct an [`Error`]: `err!(Variant("format {args}"))` or, with no
/// variant, `err!("format {args}")` for [`Error::Internal`].
#[macro_export]
macro_rules! err {
	($variant:ident($($args:tt)+)) => {
		$crate::Error::$variant(::std::format!($($args)+))
	};

	($($args:tt)+) => {
		$crate::Error::Internal(::std::format!($($args)+))
	};
}

/// Construct an `Err(Error)`; counterpart to `err!`.
#[macro_export]
macro_rules! Err {
	($($args:tt)+) => {
		Err($crate::err!($($args)+))
	};
}
