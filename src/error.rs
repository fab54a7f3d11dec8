//! Error codes

/// Errors that can occur when using this library.
///
/// Every variant except [`Error::Ldap`] and [`Error::Io`] is a semantic kind.
/// Those two carry raw provider failures; they are produced by connection
/// implementations and rewritten by [`translate`](crate::translate::translate)
/// before any result leaves the [`DirectoryTemplate`](crate::DirectoryTemplate).
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// The target name does not exist in the directory.
	#[error("Name not found: {0}")]
	NameNotFound(String),
	/// An entry with the target name already exists.
	#[error("Name already bound: {0}")]
	NameAlreadyBound(String),
	/// The target entry still has subordinate entries.
	#[error("Entry is not a leaf: {0}")]
	ContextNotEmpty(String),
	/// A server imposed size, time or administrative limit was reached.
	#[error("Limit exceeded: {0}")]
	LimitExceeded(String),
	/// The server returned incomplete results, e.g. because a referral was
	/// not followed.
	#[error("Partial results: {0}")]
	PartialResult(String),
	/// A distinguished name could not be parsed or composed.
	#[error("Malformed name: {0}")]
	MalformedName(String),
	/// A filter could not be encoded from the given value.
	#[error("Invalid filter value: {0}")]
	InvalidFilter(String),
	/// The directory refused the supplied credentials.
	#[error("Authentication failed: {0}")]
	Authentication(String),
	/// The bound principal lacks the rights for the operation.
	#[error("Insufficient access rights: {0}")]
	NoPermission(String),
	/// The connection to the directory failed, timed out or was unavailable.
	#[error("Communication failure: {0}")]
	Communication(String),
	/// A search expected to yield exactly one entry yielded none.
	#[error("Expected exactly one result, found none")]
	EmptyResult,
	/// A search expected to yield exactly one entry yielded more.
	#[error("Incorrect result count: expected {expected}, found {actual}")]
	IncorrectResultCount {
		/// The number of results the caller expected.
		expected: usize,
		/// The number of results actually returned.
		actual: usize,
	},
	/// An entry context was used in a state that makes the call meaningless.
	#[error("Illegal operation state: {0}")]
	IllegalOperationState(String),
	/// Any directory failure without a more specific kind.
	#[error("Directory operation failed: {message}")]
	DirectoryOperation {
		/// The LDAP result code, if the failure carried one.
		code: Option<u32>,
		/// The diagnostic message of the original failure.
		message: String,
	},
	/// Configuration or attribute contents did not conform to the expected
	/// syntax.
	#[error("Invalid data: {0}")]
	Invalid(String),
	/// Raw I/O failure, e.g. while reading TLS material.
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// Raw protocol failure reported by `ldap3`.
	#[error(transparent)]
	Ldap(#[from] ldap3::LdapError),
}

impl Error {
	/// Whether this error still carries an untranslated provider failure.
	#[must_use]
	pub fn is_raw(&self) -> bool {
		matches!(self, Error::Io(_) | Error::Ldap(_))
	}
}
