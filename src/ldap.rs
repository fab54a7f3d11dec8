//! Connection provider backed by `ldap3`.
use std::{collections::HashSet, fmt, time::Duration};

use async_trait::async_trait;
use ldap3::{
	adapters::{Adapter, EntriesOnly, PagedResults},
	LdapConnAsync, SearchEntry, SearchOptions, SearchStream,
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
	config::Config,
	connection::{
		ConnectionProvider, DirectoryConnection, EntryStream, SearchRequest, SearchResultEntry,
	},
	entry::{Attributes, Modification},
	error::Error,
	name::{DistinguishedName, ValueComparison},
};

/// Opens `ldap3` connections to the configured servers.
#[derive(Debug, Clone)]
pub struct LdapContextSource {
	/// The configuration of the LDAP client.
	config: Config,
}

impl LdapContextSource {
	/// Create a new [`LdapContextSource`] with the given configuration.
	#[must_use]
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// The configuration of this context source.
	#[must_use]
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Connects to the first server that accepts the connection and binds as
	/// `principal`, or anonymously if there is none.
	async fn connect(&self, principal: Option<(&str, &str)>) -> Result<LdapConnection, Error> {
		let settings = self.config.connection.to_settings().await?;
		let mut last_error = None;
		for url in &self.config.urls {
			let (conn, ldap) =
				match LdapConnAsync::from_url_with_settings(settings.clone(), url).await {
					Ok(connection) => connection,
					Err(err) => {
						warn!("Failed to connect to {url}: {err}");
						last_error = Some(err);
						continue;
					}
				};
			let driver = tokio::spawn(async move {
				if let Err(err) = conn.drive().await {
					warn!("Ldap connection error {err}");
				}
			});
			debug!("Connected to {url}");

			let mut connection = LdapConnection {
				ldap,
				driver: Some(driver),
				base: self.config.base.clone(),
				page_size: self.config.page_size,
				operation_timeout: self.config.connection.operation_timeout,
			};
			if let Some((user, password)) = principal {
				if let Err(err) = connection.simple_bind(user, password).await {
					if let Err(close_err) = connection.close().await {
						debug!("Closing rejected connection failed: {close_err}");
					}
					return Err(err);
				}
			}
			return Ok(connection);
		}
		Err(last_error.map_or_else(
			|| Error::Invalid("No server URLs configured".to_owned()),
			Error::Ldap,
		))
	}

	/// The configured principal, unless it is empty.
	fn principal(&self) -> Option<(&str, &str)> {
		(!self.config.user_dn.is_empty())
			.then_some((self.config.user_dn.as_str(), self.config.password.as_str()))
	}
}

#[async_trait]
impl ConnectionProvider for LdapContextSource {
	async fn read_only(&self) -> Result<Box<dyn DirectoryConnection>, Error> {
		let principal = if self.config.anonymous_read_only { None } else { self.principal() };
		Ok(Box::new(self.connect(principal).await?))
	}

	async fn read_write(&self) -> Result<Box<dyn DirectoryConnection>, Error> {
		Ok(Box::new(self.connect(self.principal()).await?))
	}

	async fn authenticated(
		&self,
		principal: &DistinguishedName,
		credential: &str,
	) -> Result<Box<dyn DirectoryConnection>, Error> {
		let principal = principal.to_string();
		Ok(Box::new(self.connect(Some((principal.as_str(), credential))).await?))
	}

	fn base(&self) -> DistinguishedName {
		self.config.base.clone()
	}
}

/// A session with an LDAP server.
pub struct LdapConnection {
	/// The `ldap3` operation handle
	ldap: ldap3::Ldap,
	/// Background task driving the connection
	driver: Option<JoinHandle<()>>,
	/// Base all names are relative to
	base: DistinguishedName,
	/// Page size for the paged results control
	page_size: Option<i32>,
	/// Timeout for every operation
	operation_timeout: Duration,
}

impl fmt::Debug for LdapConnection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LdapConnection")
			.field("base", &self.base)
			.field("page_size", &self.page_size)
			.field("operation_timeout", &self.operation_timeout)
			.finish_non_exhaustive()
	}
}

impl LdapConnection {
	/// Binds the session as `user`.
	async fn simple_bind(&mut self, user: &str, password: &str) -> Result<(), Error> {
		self.ldap.with_timeout(self.operation_timeout).simple_bind(user, password).await?.success()?;
		Ok(())
	}

	/// The full name of `name`.
	fn absolute(&self, name: &DistinguishedName) -> String {
		name.prepend(&self.base).to_string()
	}
}

/// Makes a name returned by the server relative to `base`. Names outside of
/// it are kept as they are. The server may spell the base in another case.
fn relative(dn: &str, base: &DistinguishedName) -> Result<DistinguishedName, Error> {
	let name = DistinguishedName::parse(dn)?;
	Ok(match name.relative_to_with(base, ValueComparison::CaseInsensitive) {
		Some(relative) => relative,
		None => name,
	})
}

/// The server side time limit in whole seconds, rounded up so a sub-second
/// limit does not become 0 (no limit).
fn time_limit_secs(limit: Duration) -> i32 {
	let secs = limit.as_secs().saturating_add(u64::from(limit.subsec_nanos() > 0));
	i32::try_from(secs).unwrap_or(i32::MAX)
}

#[async_trait]
impl DirectoryConnection for LdapConnection {
	async fn search(&mut self, request: &SearchRequest) -> Result<Box<dyn EntryStream>, Error> {
		let mut adapters: Vec<Box<dyn Adapter<_, _>>> = vec![Box::new(EntriesOnly::new())];
		if let Some(page_size) = self.page_size {
			adapters.push(Box::new(PagedResults::new(page_size)));
		}
		let mut options = SearchOptions::new().sizelimit(request.size_limit);
		if let Some(time_limit) = request.time_limit {
			options = options.timelimit(time_limit_secs(time_limit));
		}
		let attributes =
			if request.attributes.is_empty() { vec!["*".to_owned()] } else { request.attributes.clone() };
		let base = self.absolute(&request.base);

		let stream = self
			.ldap
			.with_search_options(options)
			.with_timeout(self.operation_timeout)
			.streaming_search_with(adapters, &base, request.scope.into(), &request.filter, attributes)
			.await?;
		Ok(Box::new(LdapEntryStream { stream, base: self.base.clone() }))
	}

	async fn bind(
		&mut self,
		name: &DistinguishedName,
		attributes: &Attributes,
	) -> Result<(), Error> {
		let text = attributes.iter().map(|(name, values)| {
			let values = values.iter().map(|value| value.as_bytes().to_vec()).collect::<HashSet<_>>();
			(name.as_bytes().to_vec(), values)
		});
		let binary = attributes
			.iter_binary()
			.map(|(name, values)| (name.as_bytes().to_vec(), values.iter().cloned().collect::<HashSet<_>>()));
		let attrs: Vec<(Vec<u8>, HashSet<Vec<u8>>)> = text.chain(binary).collect();
		let dn = self.absolute(name);
		self.ldap.with_timeout(self.operation_timeout).add(&dn, attrs).await?.success()?;
		Ok(())
	}

	async fn unbind(&mut self, name: &DistinguishedName) -> Result<(), Error> {
		let dn = self.absolute(name);
		self.ldap.with_timeout(self.operation_timeout).delete(&dn).await?.success()?;
		Ok(())
	}

	async fn modify_attributes(
		&mut self,
		name: &DistinguishedName,
		modifications: &[Modification],
	) -> Result<(), Error> {
		let mods: Vec<ldap3::Mod<String>> = modifications.iter().map(Into::into).collect();
		let dn = self.absolute(name);
		self.ldap.with_timeout(self.operation_timeout).modify(&dn, mods).await?.success()?;
		Ok(())
	}

	async fn rename(
		&mut self,
		old_name: &DistinguishedName,
		new_name: &DistinguishedName,
	) -> Result<(), Error> {
		let Some(rdn) = new_name.leaf() else {
			return Err(Error::MalformedName("Cannot rename an entry to the root".to_owned()));
		};
		let rdn = rdn.to_string();
		let parent = self.absolute(&new_name.parent().unwrap_or_default());
		let dn = self.absolute(old_name);
		self.ldap
			.with_timeout(self.operation_timeout)
			.modifydn(&dn, &rdn, true, Some(&parent))
			.await?
			.success()?;
		Ok(())
	}

	async fn close(&mut self) -> Result<(), Error> {
		self.ldap.unbind().await?;
		if let Some(driver) = self.driver.take() {
			if let Err(err) = driver.await {
				warn!("Failed to join background task: {err}");
			}
		}
		Ok(())
	}
}

/// Entries of a running `ldap3` search.
struct LdapEntryStream {
	/// The search
	stream: SearchStream<'static, String, Vec<String>>,
	/// Base the returned names are made relative to
	base: DistinguishedName,
}

#[async_trait]
impl EntryStream for LdapEntryStream {
	async fn next(&mut self) -> Result<Option<SearchResultEntry>, Error> {
		let Some(entry) = self.stream.next().await?.map(SearchEntry::construct) else {
			return Ok(None);
		};
		let name = relative(&entry.dn, &self.base)?;
		Ok(Some(SearchResultEntry { name, attributes: entry.into() }))
	}

	async fn close(&mut self) -> Result<(), Error> {
		self.stream.finish().await.success()?;
		Ok(())
	}
}
