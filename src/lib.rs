//! Run operations against an LDAP directory server without leaking
//! connections or raw protocol errors.
//!
//! Every operation of the [`DirectoryTemplate`] acquires a connection from a
//! [`ConnectionProvider`], runs, and releases the connection again, whatever
//! the outcome. Failures reported by the server are translated into the
//! semantic kinds of [`error::Error`] on the way out, so callers can match on
//! "name not found" or "name already bound" instead of LDAP result codes.
//!
//! For a general primer on LDAP, the [introduction] in the `ldap3` crate which
//! is used here for interfacing with LDAP is an excellent resource. The site
//! "firstyear's blog-a-log" also has [a guide][firstyear] which is more
//! visually oriented and goes into more detail about searching
//!
//! [introduction]: https://github.com/inejge/ldap3/blob/master/LDAP-primer.md
//! [firstyear]: https://fy.blackhats.net.au/blog/html/pages/ldap_guide_part_1_foundations.html
//!
//! # Getting started
//! A minimal example of using the template might look like so:
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use url::Url;
//! use ldap_template::{
//!     config::Config, Attributes, DirectoryTemplate, EntryExt, Filter, Mapper, SearchQuery,
//! };
//!
//! // Configuration can also be deserialized with serde. It's hand-constructed
//! // here for demonstration purposes.
//! let config = Config {
//!     urls: vec![Url::parse("ldap://localhost:1389")?],
//!     base: "dc=example,dc=org".parse()?,
//!     user_dn: "cn=admin,dc=example,dc=org".to_owned(),
//!     password: "verysecret".to_owned(),
//!     ..Config::default()
//! };
//! let template = DirectoryTemplate::from_config(config);
//!
//! let query = SearchQuery::new("ou=users", Filter::eq("objectClass", "inetOrgPerson"))?;
//! let names = template
//!     .search(&query, &Mapper::attributes(|entry: &Attributes| {
//!         Ok(entry.attr_first("displayName").map(str::to_owned))
//!     }))
//!     .await?;
//! println!("Found users: {names:?}");
//!
//! // Tear down a whole subtree, children first
//! template.unbind_recursive("ou=users", true).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//! * Connections are opened per operation; there is no pooling.
//! * Referrals are not followed. They end a search with a partial result,
//!   see [`DirectoryTemplate::ignore_partial_result`].
//! * [secrecy](https://docs.rs/secrecy) is not used for storing the bind
//!   password, it probably should be

pub mod config;
pub mod connection;
pub mod entry;
pub mod error;
pub mod filter;
pub mod ldap;
pub mod mapper;
#[cfg(test)]
mod memory;
pub mod name;
pub mod query;
pub mod template;
pub mod translate;

pub use ldap3::{self, SearchEntry};

pub use crate::{
	config::{Config, ConnectionConfig, TLSConfig},
	connection::{
		AccessMode, AuthenticatedEntryCallback, ConnectionHandle, ConnectionProvider,
		DirectoryConnection, OperationProcessor,
	},
	entry::{Attributes, DirContext, EntryExt, EntryIdentification, Modification},
	error::Error,
	filter::Filter,
	ldap::LdapContextSource,
	mapper::{EntryHandler, Mapper},
	name::{DistinguishedName, ValueComparison},
	query::{SearchQuery, SearchScope},
	template::DirectoryTemplate,
};
