//! The execution template: every directory operation runs as acquire,
//! execute, release, with raw failures translated on the way out.
use std::{fmt, sync::Arc};

use futures::future::BoxFuture;
use tracing::{debug, info};

use crate::{
	config::Config,
	connection::{
		AccessMode, AuthenticatedEntryCallback, ConnectionHandle, ConnectionProvider,
		OperationProcessor, SearchRequest,
	},
	entry::{Attributes, DirContext, EntryIdentification, Modification},
	error::Error,
	filter::Filter,
	ldap::LdapContextSource,
	mapper::{single_result, EntryHandler, Mapper, MappingCollector},
	name::{DistinguishedName, IntoName},
	query::{SearchQuery, SearchScope},
	translate::translate,
};

/// Runs directory operations with guaranteed connection release and
/// translated errors.
///
/// The template holds no per-call state. Configure it once, before sharing
/// it between tasks.
#[derive(Clone)]
pub struct DirectoryTemplate {
	/// Source of connections
	provider: Arc<dyn ConnectionProvider>,
	/// Treat partial results as the clean end of a search
	ignore_partial_result: bool,
}

impl fmt::Debug for DirectoryTemplate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DirectoryTemplate")
			.field("base", &self.provider.base().to_string())
			.field("ignore_partial_result", &self.ignore_partial_result)
			.finish_non_exhaustive()
	}
}

impl DirectoryTemplate {
	/// A template drawing connections from `provider`.
	#[must_use]
	pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
		Self { provider, ignore_partial_result: false }
	}

	/// A template connecting to the servers of the given configuration.
	#[must_use]
	pub fn from_config(config: Config) -> Self {
		let ignore_partial_result = config.ignore_partial_result;
		Self::new(Arc::new(LdapContextSource::new(config)))
			.ignore_partial_result(ignore_partial_result)
	}

	/// Whether partial results end a search silently instead of failing it.
	#[must_use]
	pub fn ignore_partial_result(mut self, ignore: bool) -> Self {
		self.ignore_partial_result = ignore;
		self
	}

	/// The connection provider.
	#[must_use]
	pub fn provider(&self) -> &Arc<dyn ConnectionProvider> {
		&self.provider
	}

	/// Acquires a read-only or read-write connection.
	async fn acquire(&self, mode: AccessMode) -> Result<ConnectionHandle, Error> {
		let connection = match mode {
			AccessMode::ReadWrite => self.provider.read_write().await,
			AccessMode::ReadOnly => self.provider.read_only().await,
			AccessMode::Authenticated => {
				return Err(Error::IllegalOperationState(
					"authenticated connections are only opened by authenticate".to_owned(),
				));
			}
		}
		.map_err(translate)?;
		debug!("Acquired {mode:?} connection");
		Ok(ConnectionHandle::new(connection, mode))
	}

	/// Runs `operation` on a read-only connection.
	///
	/// The closure receives the acquired handle and must not keep it. The
	/// future it returns may only borrow the handle, so move any other data
	/// it needs into it.
	pub async fn execute_read_only<T, F>(&self, operation: F) -> Result<T, Error>
	where
		F: for<'c> FnOnce(&'c mut ConnectionHandle) -> BoxFuture<'c, Result<T, Error>> + Send,
		T: Send,
	{
		self.execute(AccessMode::ReadOnly, operation).await
	}

	/// Runs `operation` on a read-write connection. See
	/// [`DirectoryTemplate::execute_read_only`].
	pub async fn execute_read_write<T, F>(&self, operation: F) -> Result<T, Error>
	where
		F: for<'c> FnOnce(&'c mut ConnectionHandle) -> BoxFuture<'c, Result<T, Error>> + Send,
		T: Send,
	{
		self.execute(AccessMode::ReadWrite, operation).await
	}

	/// Acquire, run, release, translate.
	async fn execute<T, F>(&self, mode: AccessMode, operation: F) -> Result<T, Error>
	where
		F: for<'c> FnOnce(&'c mut ConnectionHandle) -> BoxFuture<'c, Result<T, Error>> + Send,
		T: Send,
	{
		let mut handle = self.acquire(mode).await?;
		let result = operation(&mut handle).await;
		handle.release().await;
		result.map_err(translate)
	}

	/// Searches and maps every entry.
	pub async fn search<T: Send>(
		&self,
		query: &SearchQuery,
		mapper: &Mapper<'_, T>,
	) -> Result<Vec<T>, Error> {
		self.search_with(query, mapper, None).await
	}

	/// Searches and maps every entry, running `processor` around the search.
	pub async fn search_with<T: Send>(
		&self,
		query: &SearchQuery,
		mapper: &Mapper<'_, T>,
		processor: Option<&mut dyn OperationProcessor>,
	) -> Result<Vec<T>, Error> {
		let return_objects = query.effective_return_objects(mapper.is_context_mapper());
		let mut collector = MappingCollector::new(mapper);
		self.run_search(query, return_objects, &mut collector, processor).await?;
		Ok(collector.into_results())
	}

	/// Walks the search result, handing every entry to `handler`.
	pub async fn search_with_handler(
		&self,
		query: &SearchQuery,
		handler: &mut dyn EntryHandler,
		processor: Option<&mut dyn OperationProcessor>,
	) -> Result<(), Error> {
		let return_objects = query.effective_return_objects(false);
		self.run_search(query, return_objects, handler, processor).await
	}

	/// Searches for exactly one entry.
	///
	/// Every entry is mapped before the count is checked. No entries yields
	/// [`Error::EmptyResult`], several [`Error::IncorrectResultCount`].
	pub async fn search_for_single_result<T: Send>(
		&self,
		query: &SearchQuery,
		mapper: &Mapper<'_, T>,
	) -> Result<T, Error> {
		single_result(self.search(query, mapper).await?)
	}

	/// The search protocol: acquire, pre-process, stream, post-process,
	/// release.
	async fn run_search(
		&self,
		query: &SearchQuery,
		return_objects: bool,
		handler: &mut dyn EntryHandler,
		mut processor: Option<&mut dyn OperationProcessor>,
	) -> Result<(), Error> {
		let mut handle = self.acquire(AccessMode::ReadOnly).await?;
		let pre = match processor.as_deref_mut() {
			Some(processor) => processor.pre_process(&mut handle).await,
			None => Ok(()),
		};
		let result = match pre {
			Ok(()) => {
				let streamed = self.stream(&mut handle, query, return_objects, handler).await;
				let post = match processor {
					Some(processor) => processor.post_process(&mut handle).await,
					None => Ok(()),
				};
				match (streamed, post) {
					(Ok(()), post) => post,
					(Err(err), Err(post_err)) => {
						debug!("Post-processing failed after search error: {post_err}");
						Err(err)
					}
					(Err(err), Ok(())) => Err(err),
				}
			}
			Err(err) => Err(err),
		};
		handle.release().await;
		result.map_err(translate)
	}

	/// Streams the entries of a search into `handler`, closing the stream on
	/// every path.
	async fn stream(
		&self,
		handle: &mut ConnectionHandle,
		query: &SearchQuery,
		return_objects: bool,
		handler: &mut dyn EntryHandler,
	) -> Result<(), Error> {
		let request = SearchRequest::from_query(query, return_objects);
		let base = self.provider.base();
		let walked = match handle.search(&request).await {
			Ok(mut stream) => {
				let walked = async {
					while let Some(entry) = stream.next().await? {
						let context = DirContext::existing(entry.name, base.clone(), entry.attributes);
						handler.handle_entry(&context)?;
					}
					Ok::<(), Error>(())
				}
				.await;
				let closed = stream.close().await;
				match walked {
					Ok(()) => closed,
					Err(err) => {
						if let Err(close_err) = closed {
							debug!("Closing search after error failed: {close_err}");
						}
						Err(err)
					}
				}
			}
			Err(err) => Err(err),
		};
		match walked.map_err(translate) {
			Err(Error::PartialResult(message)) if self.ignore_partial_result => {
				debug!("Ignoring partial result: {message}");
				Ok(())
			}
			other => other,
		}
	}

	/// Reads a single entry.
	pub async fn lookup(&self, name: impl IntoName) -> Result<DirContext, Error> {
		let name = name.into_name()?;
		let mut handle = self.acquire(AccessMode::ReadOnly).await?;
		let result = handle.lookup(&name, &[]).await;
		handle.release().await;
		let entry = result.map_err(translate)?;
		Ok(DirContext::existing(entry.name, self.provider.base(), entry.attributes))
	}

	/// Reads a single entry and maps it.
	pub async fn lookup_with<T: Send>(
		&self,
		name: impl IntoName,
		mapper: &Mapper<'_, T>,
	) -> Result<T, Error> {
		mapper.map(&self.lookup(name).await?)
	}

	/// Names of the immediate children of an entry, relative to it.
	pub async fn list(&self, name: impl IntoName) -> Result<Vec<DistinguishedName>, Error> {
		let name = name.into_name()?;
		let children = self.list_children(&name, AccessMode::ReadOnly).await?;
		Ok(children.into_iter().filter_map(|child| child.relative_to(&name)).collect())
	}

	/// Maps every immediate child of an entry.
	pub async fn list_bindings<T: Send>(
		&self,
		name: impl IntoName,
		mapper: &Mapper<'_, T>,
	) -> Result<Vec<T>, Error> {
		let name = name.into_name()?;
		let mut handle = self.acquire(AccessMode::ReadOnly).await?;
		let result = handle.list_bindings(&name).await;
		handle.release().await;
		let base = self.provider.base();
		result
			.map_err(translate)?
			.into_iter()
			.map(|entry| mapper.map(&DirContext::existing(entry.name, base.clone(), entry.attributes)))
			.collect()
	}

	/// Names of the immediate children of an entry, relative to the provider
	/// base.
	async fn list_children(
		&self,
		name: &DistinguishedName,
		mode: AccessMode,
	) -> Result<Vec<DistinguishedName>, Error> {
		let mut handle = self.acquire(mode).await?;
		let result = handle.list(name).await;
		handle.release().await;
		result.map_err(translate)
	}

	/// Creates an entry.
	pub async fn bind(&self, name: impl IntoName, attributes: &Attributes) -> Result<(), Error> {
		let name = name.into_name()?;
		let mut handle = self.acquire(AccessMode::ReadWrite).await?;
		let result = handle.bind(&name, attributes).await;
		handle.release().await;
		result.map_err(translate)
	}

	/// Creates the entry described by a context that is not bound yet.
	pub async fn bind_context(&self, context: &DirContext) -> Result<(), Error> {
		let name = unbound_name(context, "bind")?;
		self.bind(name, context.attributes()).await
	}

	/// Replaces an entry, creating it if it does not exist.
	pub async fn rebind(&self, name: impl IntoName, attributes: &Attributes) -> Result<(), Error> {
		let name = name.into_name()?;
		let mut handle = self.acquire(AccessMode::ReadWrite).await?;
		let result = handle.rebind(&name, attributes).await;
		handle.release().await;
		result.map_err(translate)
	}

	/// Replaces the entry described by a context that is not bound yet.
	pub async fn rebind_context(&self, context: &DirContext) -> Result<(), Error> {
		let name = unbound_name(context, "rebind")?;
		self.rebind(name, context.attributes()).await
	}

	/// Deletes a leaf entry.
	pub async fn unbind(&self, name: impl IntoName) -> Result<(), Error> {
		let name = name.into_name()?;
		let mut handle = self.acquire(AccessMode::ReadWrite).await?;
		let result = handle.unbind(&name).await;
		handle.release().await;
		result.map_err(translate)
	}

	/// Deletes an entry, and with `recursive` its whole subtree.
	///
	/// Children are deleted before their parent. Every listing and every
	/// deletion uses its own connection. A failure stops the walk; entries
	/// deleted up to that point stay deleted.
	pub async fn unbind_recursive(&self, name: impl IntoName, recursive: bool) -> Result<(), Error> {
		let name = name.into_name()?;
		if !recursive {
			return self.unbind(name).await;
		}
		// (name, children already scheduled)
		let mut stack = vec![(name, false)];
		while let Some((name, expanded)) = stack.pop() {
			if expanded {
				debug!("Deleting {name}");
				self.unbind(&name).await?;
				continue;
			}
			let children = self.list_children(&name, AccessMode::ReadWrite).await?;
			stack.push((name, true));
			stack.extend(children.into_iter().rev().map(|child| (child, false)));
		}
		Ok(())
	}

	/// Moves or renames an entry.
	pub async fn rename(&self, old_name: impl IntoName, new_name: impl IntoName) -> Result<(), Error> {
		let old_name = old_name.into_name()?;
		let new_name = new_name.into_name()?;
		let mut handle = self.acquire(AccessMode::ReadWrite).await?;
		let result = handle.rename(&old_name, &new_name).await;
		handle.release().await;
		result.map_err(translate)
	}

	/// Applies modifications to an entry.
	pub async fn modify_attributes(
		&self,
		name: impl IntoName,
		modifications: &[Modification],
	) -> Result<(), Error> {
		let name = name.into_name()?;
		let mut handle = self.acquire(AccessMode::ReadWrite).await?;
		let result = handle.modify_attributes(&name, modifications).await;
		handle.release().await;
		result.map_err(translate)
	}

	/// Writes the changes tracked by a context read from the directory.
	pub async fn modify_attributes_context(&self, context: &DirContext) -> Result<(), Error> {
		let Some(name) = context.dn() else {
			return Err(Error::IllegalOperationState(
				"cannot modify an entry without a name".to_owned(),
			));
		};
		if !context.is_update_mode() {
			return Err(Error::IllegalOperationState(format!(
				"{name} is not bound; use bind_context to create it"
			)));
		}
		self.modify_attributes(name, &context.modification_items()).await
	}

	/// Verifies `credential` for the single entry matching `filter` below
	/// `base`, then runs `callback` on a connection bound as that entry.
	///
	/// Returns `false` if no entry or more than one entry matches, if the
	/// directory rejects the credential or if the callback fails. Failures of
	/// the search itself are returned as errors.
	pub async fn authenticate(
		&self,
		base: impl IntoName,
		filter: impl Into<Filter>,
		credential: &str,
		callback: Option<&mut dyn AuthenticatedEntryCallback>,
	) -> Result<bool, Error> {
		let query = SearchQuery::new(base, filter)?.scope(SearchScope::Subtree);
		let identify = Mapper::context(|context: &DirContext| {
			context
				.identification()
				.ok_or_else(|| Error::IllegalOperationState("entry without a name".to_owned()))
		});
		let identities = self.search(&query, &identify).await?;
		let identity = match <[EntryIdentification; 1]>::try_from(identities) {
			Ok([identity]) => identity,
			Err(found) => {
				info!(
					"Authentication failed: {} entries match {} below {}",
					found.len(),
					query.filter(),
					query.base()
				);
				return Ok(false);
			}
		};

		let connection =
			match self.provider.authenticated(identity.absolute_name(), credential).await {
				Ok(connection) => connection,
				Err(err) => {
					info!(
						"Authentication failed for {}: {}",
						identity.absolute_name(),
						translate(err)
					);
					return Ok(false);
				}
			};
		let mut handle = ConnectionHandle::new(connection, AccessMode::Authenticated);
		let outcome = match callback {
			Some(callback) => callback.execute_with_context(&mut handle, &identity).await,
			None => Ok(()),
		};
		handle.release().await;
		match outcome {
			Ok(()) => Ok(true),
			Err(err) => {
				info!(
					"Callback for authenticated entry {} failed: {}",
					identity.absolute_name(),
					translate(err)
				);
				Ok(false)
			}
		}
	}
}

/// The name of a context about to be bound. Bound or unnamed contexts are
/// rejected.
fn unbound_name<'c>(
	context: &'c DirContext,
	operation: &str,
) -> Result<&'c DistinguishedName, Error> {
	if context.is_update_mode() {
		return Err(Error::IllegalOperationState(format!(
			"cannot {operation} a context that is already bound; use modify_attributes_context"
		)));
	}
	context.dn().ok_or_else(|| {
		Error::IllegalOperationState(format!("cannot {operation} a context without a name"))
	})
}
