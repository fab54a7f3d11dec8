//! Collaborators of the template: connection providers, raw directory
//! connections and the hooks callers can plug into an operation.
//!
//! Implementations report failures as raw [`Error::Ldap`] or [`Error::Io`]
//! values; the [`DirectoryTemplate`](crate::DirectoryTemplate) translates
//! them.
use std::{
	fmt,
	ops::{Deref, DerefMut},
	time::Duration,
};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
	entry::{Attributes, EntryIdentification, Modification},
	error::Error,
	name::DistinguishedName,
	query::{SearchQuery, SearchScope},
};

/// Attribute list requesting no attributes at all (RFC 4511 section 4.5.1.8)
pub const NO_ATTRIBUTES: &str = "1.1";

/// A search as handed to a [`DirectoryConnection`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
	/// Search base, relative to the provider base
	pub base: DistinguishedName,
	/// Encoded filter
	pub filter: String,
	/// Search depth
	pub scope: SearchScope,
	/// Maximum number of entries, 0 for unlimited
	pub size_limit: i32,
	/// Server side time limit
	pub time_limit: Option<Duration>,
	/// Attributes to return; empty means all
	pub attributes: Vec<String>,
	/// Whether the caller maps whole entry objects. Informational only:
	/// connections may use it as a hint, the `ldap3` connection ignores it.
	pub return_objects: bool,
}

impl SearchRequest {
	/// The request for a query with the given effective return-objects flag.
	#[must_use]
	pub fn from_query(query: &SearchQuery, return_objects: bool) -> Self {
		Self {
			base: query.base().clone(),
			filter: query.filter().to_string(),
			scope: query.search_scope(),
			size_limit: query.limit(),
			time_limit: query.time_limit_value(),
			attributes: query.returned_attributes().to_vec(),
			return_objects,
		}
	}

	/// A one-level search below `base` matching every entry.
	#[must_use]
	pub fn children(base: DistinguishedName, attributes: Vec<String>) -> Self {
		Self {
			base,
			filter: "(objectClass=*)".to_owned(),
			scope: SearchScope::OneLevel,
			size_limit: 0,
			time_limit: None,
			attributes,
			return_objects: false,
		}
	}
}

/// One entry of a search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResultEntry {
	/// Entry name, relative to the provider base
	pub name: DistinguishedName,
	/// Returned attributes
	pub attributes: Attributes,
}

/// A lazily consumed search result.
#[async_trait]
pub trait EntryStream: Send {
	/// The next entry, or `None` once the result is exhausted.
	async fn next(&mut self) -> Result<Option<SearchResultEntry>, Error>;

	/// Ends the search, abandoning any entries not yet read, and reports the
	/// final result of the operation.
	async fn close(&mut self) -> Result<(), Error>;
}

/// A raw session with the directory.
///
/// All names are relative to the base of the provider that opened the
/// connection.
#[async_trait]
pub trait DirectoryConnection: Send {
	/// Starts a search.
	async fn search(&mut self, request: &SearchRequest) -> Result<Box<dyn EntryStream>, Error>;

	/// Creates an entry.
	async fn bind(&mut self, name: &DistinguishedName, attributes: &Attributes)
		-> Result<(), Error>;

	/// Deletes a leaf entry.
	async fn unbind(&mut self, name: &DistinguishedName) -> Result<(), Error>;

	/// Applies attribute modifications to an entry.
	async fn modify_attributes(
		&mut self,
		name: &DistinguishedName,
		modifications: &[Modification],
	) -> Result<(), Error>;

	/// Moves or renames an entry.
	async fn rename(
		&mut self,
		old_name: &DistinguishedName,
		new_name: &DistinguishedName,
	) -> Result<(), Error>;

	/// Ends the session.
	async fn close(&mut self) -> Result<(), Error>;

	/// Replaces an entry, creating it if it does not exist.
	async fn rebind(
		&mut self,
		name: &DistinguishedName,
		attributes: &Attributes,
	) -> Result<(), Error> {
		match self.unbind(name).await {
			Ok(()) => {}
			Err(Error::Ldap(ldap3::LdapError::LdapResult { result }))
				if result.rc == crate::translate::rc::NO_SUCH_OBJECT => {}
			Err(err) => return Err(err),
		}
		self.bind(name, attributes).await
	}

	/// Reads a single entry. Missing entries surface as the server's
	/// `noSuchObject` result, or as [`Error::NameNotFound`] if the server
	/// returned nothing at all.
	async fn lookup(
		&mut self,
		name: &DistinguishedName,
		attributes: &[String],
	) -> Result<SearchResultEntry, Error> {
		let request = SearchRequest {
			scope: SearchScope::Base,
			return_objects: true,
			..SearchRequest::children(name.clone(), attributes.to_vec())
		};
		let mut entries = collect(self.search(&request).await?).await?;
		if entries.is_empty() {
			return Err(Error::NameNotFound(name.to_string()));
		}
		Ok(entries.swap_remove(0))
	}

	/// Names of the immediate children of an entry.
	async fn list(&mut self, name: &DistinguishedName) -> Result<Vec<DistinguishedName>, Error> {
		let request = SearchRequest::children(name.clone(), vec![NO_ATTRIBUTES.to_owned()]);
		let entries = collect(self.search(&request).await?).await?;
		Ok(entries.into_iter().map(|entry| entry.name).collect())
	}

	/// The immediate children of an entry with all their attributes.
	async fn list_bindings(
		&mut self,
		name: &DistinguishedName,
	) -> Result<Vec<SearchResultEntry>, Error> {
		let request = SearchRequest {
			return_objects: true,
			..SearchRequest::children(name.clone(), vec!["*".to_owned()])
		};
		collect(self.search(&request).await?).await
	}
}

/// Drains a stream, closing it on every path.
async fn collect(mut stream: Box<dyn EntryStream>) -> Result<Vec<SearchResultEntry>, Error> {
	let mut entries = Vec::new();
	let drained = async {
		while let Some(entry) = stream.next().await? {
			entries.push(entry);
		}
		Ok::<(), Error>(())
	}
	.await;
	let closed = stream.close().await;
	drained?;
	closed?;
	Ok(entries)
}

/// Source of directory connections.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
	/// A connection for reading.
	async fn read_only(&self) -> Result<Box<dyn DirectoryConnection>, Error>;

	/// A connection for reading and writing.
	async fn read_write(&self) -> Result<Box<dyn DirectoryConnection>, Error>;

	/// A connection bound as `principal`. Fails if the directory rejects the
	/// credential.
	async fn authenticated(
		&self,
		principal: &DistinguishedName,
		credential: &str,
	) -> Result<Box<dyn DirectoryConnection>, Error>;

	/// The name all names passed to this provider's connections are relative
	/// to.
	fn base(&self) -> DistinguishedName {
		DistinguishedName::root()
	}
}

/// What a connection was acquired for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
	/// Searches and lookups
	ReadOnly,
	/// Writes
	ReadWrite,
	/// Bound as an authenticated principal
	Authenticated,
}

/// An acquired connection. Must be released exactly once through
/// [`ConnectionHandle::release`].
pub struct ConnectionHandle {
	/// The raw session
	connection: Box<dyn DirectoryConnection>,
	/// Acquisition tag
	mode: AccessMode,
	/// Set by `release`
	released: bool,
}

impl ConnectionHandle {
	/// Wraps a freshly opened connection.
	#[must_use]
	pub fn new(connection: Box<dyn DirectoryConnection>, mode: AccessMode) -> Self {
		Self { connection, mode, released: false }
	}

	/// What this handle was acquired for.
	#[must_use]
	pub fn mode(&self) -> AccessMode {
		self.mode
	}

	/// Closes the connection. Failures are logged and otherwise ignored.
	pub async fn release(mut self) {
		self.released = true;
		match self.connection.close().await {
			Ok(()) => debug!("Released {:?} connection", self.mode),
			Err(err) => warn!("Failed to release {:?} connection: {err}", self.mode),
		}
	}
}

impl Deref for ConnectionHandle {
	type Target = dyn DirectoryConnection;

	fn deref(&self) -> &Self::Target {
		&*self.connection
	}
}

impl DerefMut for ConnectionHandle {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut *self.connection
	}
}

impl Drop for ConnectionHandle {
	fn drop(&mut self) {
		if !self.released {
			warn!("{:?} connection dropped without being released", self.mode);
		}
	}
}

impl fmt::Debug for ConnectionHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConnectionHandle")
			.field("mode", &self.mode)
			.field("released", &self.released)
			.finish_non_exhaustive()
	}
}

/// Hooks run on the connection before and after a search.
#[async_trait]
pub trait OperationProcessor: Send {
	/// Runs after acquisition, before the search starts.
	async fn pre_process(&mut self, connection: &mut ConnectionHandle) -> Result<(), Error>;

	/// Runs after the search, also when it failed.
	async fn post_process(&mut self, connection: &mut ConnectionHandle) -> Result<(), Error>;
}

/// Work done on the connection of a successfully authenticated principal.
#[async_trait]
pub trait AuthenticatedEntryCallback: Send {
	/// Called once with the connection bound as the authenticated entry.
	async fn execute_with_context(
		&mut self,
		connection: &mut ConnectionHandle,
		identification: &EntryIdentification,
	) -> Result<(), Error>;
}
