//! Search parameters
use std::time::Duration;

use crate::{
	error::Error,
	filter::Filter,
	name::{DistinguishedName, IntoName},
};

/// How deep a search descends from its base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchScope {
	/// Only the base entry itself
	Base,
	/// The immediate children of the base
	OneLevel,
	/// The base and every entry below it
	#[default]
	Subtree,
}

impl From<SearchScope> for ldap3::Scope {
	fn from(scope: SearchScope) -> Self {
		match scope {
			SearchScope::Base => ldap3::Scope::Base,
			SearchScope::OneLevel => ldap3::Scope::OneLevel,
			SearchScope::Subtree => ldap3::Scope::Subtree,
		}
	}
}

/// A search: base, filter, scope, limits and the attributes to return.
///
/// Defaults to subtree scope, no limits and all attributes. Whether entry
/// objects are materialised is left to the mapper unless set with
/// [`SearchQuery::return_objects`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
	/// Search base, relative to the context source base
	base: DistinguishedName,
	/// Search filter
	filter: Filter,
	/// Search depth
	scope: SearchScope,
	/// Maximum number of entries; 0 means unlimited
	size_limit: i32,
	/// Server side time limit
	time_limit: Option<Duration>,
	/// Attributes to return; empty means all
	attributes: Vec<String>,
	/// Explicit request to materialise entry objects
	return_objects: Option<bool>,
}

impl SearchQuery {
	/// Creates a subtree search. Textual bases are parsed, so
	/// `SearchQuery::new("ou=people", ..)` and
	/// `SearchQuery::new(&DistinguishedName::parse("ou=people")?, ..)` are the
	/// same query.
	pub fn new(base: impl IntoName, filter: impl Into<Filter>) -> Result<Self, Error> {
		Ok(Self {
			base: base.into_name()?,
			filter: filter.into(),
			scope: SearchScope::default(),
			size_limit: 0,
			time_limit: None,
			attributes: Vec::new(),
			return_objects: None,
		})
	}

	/// Sets the scope.
	#[must_use]
	pub fn scope(mut self, scope: SearchScope) -> Self {
		self.scope = scope;
		self
	}

	/// Limits the number of returned entries.
	#[must_use]
	pub fn size_limit(mut self, size_limit: i32) -> Self {
		self.size_limit = size_limit;
		self
	}

	/// Limits the time the server spends on the search.
	#[must_use]
	pub fn time_limit(mut self, time_limit: Duration) -> Self {
		self.time_limit = Some(time_limit);
		self
	}

	/// Restricts the returned attributes.
	#[must_use]
	pub fn attributes<S: Into<String>>(mut self, attributes: impl IntoIterator<Item = S>) -> Self {
		self.attributes = attributes.into_iter().map(Into::into).collect();
		self
	}

	/// Requests (or suppresses) materialised entry objects. Ignored by
	/// context mappers, which always need them.
	#[must_use]
	pub fn return_objects(mut self, return_objects: bool) -> Self {
		self.return_objects = Some(return_objects);
		self
	}

	/// The search base.
	#[must_use]
	pub fn base(&self) -> &DistinguishedName {
		&self.base
	}

	/// The filter.
	#[must_use]
	pub fn filter(&self) -> &Filter {
		&self.filter
	}

	/// The scope.
	#[must_use]
	pub fn search_scope(&self) -> SearchScope {
		self.scope
	}

	/// The size limit, 0 for none.
	#[must_use]
	pub fn limit(&self) -> i32 {
		self.size_limit
	}

	/// The time limit.
	#[must_use]
	pub fn time_limit_value(&self) -> Option<Duration> {
		self.time_limit
	}

	/// The attributes to return. Empty means all.
	#[must_use]
	pub fn returned_attributes(&self) -> &[String] {
		&self.attributes
	}

	/// The explicit return-objects request, if any.
	#[must_use]
	pub fn explicit_return_objects(&self) -> Option<bool> {
		self.return_objects
	}

	/// The return-objects flag actually used. A context mapper forces it on,
	/// overriding an explicit `false`.
	#[must_use]
	pub fn effective_return_objects(&self, context_mapper: bool) -> bool {
		context_mapper || self.return_objects.unwrap_or(false)
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]

	use super::{SearchQuery, SearchScope};
	use crate::name::DistinguishedName;

	#[test]
	fn defaults() {
		let query = SearchQuery::new("ou=people", "(objectclass=person)").unwrap();
		assert_eq!(query.search_scope(), SearchScope::Subtree);
		assert!(query.returned_attributes().is_empty());
		assert_eq!(query.limit(), 0);
		assert_eq!(query.time_limit_value(), None);
		assert_eq!(query.explicit_return_objects(), None);
	}

	#[test]
	fn textual_and_structured_base_are_equal() {
		let text = SearchQuery::new("ou=people,dc=example", "(cn=*)").unwrap();
		let name = DistinguishedName::parse("OU=people, dc=example").unwrap();
		let structured = SearchQuery::new(&name, "(cn=*)").unwrap();
		assert_eq!(text, structured);
	}

	#[test]
	fn malformed_base_is_rejected() {
		assert!(SearchQuery::new("cn=\\zz", "(cn=*)").is_err());
	}

	#[test]
	fn context_mapper_forces_return_objects() {
		let query = SearchQuery::new("", "(cn=*)").unwrap().return_objects(false);
		assert!(query.effective_return_objects(true));
		assert!(!query.effective_return_objects(false));
		let query = query.return_objects(true);
		assert!(query.effective_return_objects(false));
	}
}
