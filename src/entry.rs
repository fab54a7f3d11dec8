//! Directory entries: attribute sets, entry contexts and modifications.
use std::collections::{BTreeMap, HashSet};

use ldap3::SearchEntry;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::{error::Error, name::DistinguishedName};

/// Configuration for which variant of ISO8601 to use for parsing and
/// serializing time. Configured according the syntax definition
/// `( 1.3.6.1.4.1.1466.115.121.1.24 DESC 'Generalized Time' )` described in
/// RFC4517 section 3.1.13
pub const TIME_FORMAT: &[time::format_description::FormatItem] =
	time::macros::format_description!("[year][month][day][hour][minute][second]Z");

/// A set of attributes with case-insensitive names.
///
/// Names are folded to lowercase on insertion. Textual and binary values are
/// kept apart, mirroring how `ldap3` reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
	/// UTF-8 values
	text: BTreeMap<String, Vec<String>>,
	/// Values that were not valid UTF-8
	binary: BTreeMap<String, Vec<Vec<u8>>>,
}

impl Attributes {
	/// An empty attribute set.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Builder form of [`Attributes::put`].
	#[must_use]
	pub fn with<V: Into<String>>(
		mut self,
		name: &str,
		values: impl IntoIterator<Item = V>,
	) -> Self {
		self.put(name, values);
		self
	}

	/// Replaces all textual values of an attribute.
	pub fn put<V: Into<String>>(&mut self, name: &str, values: impl IntoIterator<Item = V>) {
		self.text.insert(fold(name), values.into_iter().map(Into::into).collect());
	}

	/// Replaces all binary values of an attribute.
	pub fn put_binary(&mut self, name: &str, values: Vec<Vec<u8>>) {
		self.binary.insert(fold(name), values);
	}

	/// Adds a textual value unless it is already present.
	pub fn add_value(&mut self, name: &str, value: impl Into<String>) {
		let value = value.into();
		let values = self.text.entry(fold(name)).or_default();
		if !values.contains(&value) {
			values.push(value);
		}
	}

	/// Removes one textual value. The attribute disappears with its last
	/// value.
	pub fn remove_value(&mut self, name: &str, value: &str) {
		let key = fold(name);
		if let Some(values) = self.text.get_mut(&key) {
			values.retain(|v| v != value);
			if values.is_empty() {
				self.text.remove(&key);
			}
		}
	}

	/// Removes an attribute with all its values, returning the textual ones.
	pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
		let key = fold(name);
		let binary = self.binary.remove(&key);
		self.text.remove(&key).or_else(|| binary.map(|_| Vec::new()))
	}

	/// All textual values of an attribute.
	#[must_use]
	pub fn get(&self, name: &str) -> Option<&[String]> {
		self.text.get(&fold(name)).map(Vec::as_slice)
	}

	/// All binary values of an attribute.
	#[must_use]
	pub fn get_binary(&self, name: &str) -> Option<&[Vec<u8>]> {
		self.binary.get(&fold(name)).map(Vec::as_slice)
	}

	/// Whether the attribute is present with any kind of value.
	#[must_use]
	pub fn contains(&self, name: &str) -> bool {
		let key = fold(name);
		self.text.contains_key(&key) || self.binary.contains_key(&key)
	}

	/// Names of all present attributes, sorted and lowercase.
	#[must_use]
	pub fn names(&self) -> Vec<&str> {
		let mut names: Vec<&str> =
			self.text.keys().chain(self.binary.keys()).map(String::as_str).collect();
		names.sort_unstable();
		names.dedup();
		names
	}

	/// Number of distinct attributes.
	#[must_use]
	pub fn len(&self) -> usize {
		self.names().len()
	}

	/// Whether no attribute is present.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.text.is_empty() && self.binary.is_empty()
	}

	/// Iterates over the textual attributes.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
		self.text.iter().map(|(name, values)| (name.as_str(), values.as_slice()))
	}

	/// Iterates over the binary attributes.
	pub fn iter_binary(&self) -> impl Iterator<Item = (&str, &[Vec<u8>])> {
		self.binary.iter().map(|(name, values)| (name.as_str(), values.as_slice()))
	}

	/// Keeps only the named attributes. An empty list or `*` keeps all.
	#[must_use]
	pub fn select(mut self, names: &[String]) -> Self {
		if names.is_empty() || names.iter().any(|name| name == "*") {
			return self;
		}
		let wanted: HashSet<String> = names.iter().map(|name| fold(name)).collect();
		self.text.retain(|name, _| wanted.contains(name));
		self.binary.retain(|name, _| wanted.contains(name));
		self
	}
}

impl From<SearchEntry> for Attributes {
	fn from(entry: SearchEntry) -> Self {
		let mut attributes = Attributes::new();
		for (name, values) in entry.attrs {
			attributes.put(&name, values);
		}
		for (name, values) in entry.bin_attrs {
			attributes.put_binary(&name, values);
		}
		attributes
	}
}

/// Attribute names are case-insensitive.
fn fold(name: &str) -> String {
	name.to_ascii_lowercase()
}

/// An extension trait for anything holding attributes that provides
/// convenience methods for extracting data.
pub trait EntryExt {
	/// Get the first value of an attribute. Will return `None` if attribute
	/// value is not valid UTF-8.
	fn attr_first(&self, attr: &str) -> Option<&str>;

	/// Get the first value of an attribute, in binary form
	fn bin_attr_first(&self, attr: &str) -> Option<&[u8]>;

	/// Get the first value of an attribute, interpreted as a boolean.
	fn bool_first(&self, attr: &str) -> Option<Result<bool, Error>> {
		match self.attr_first(attr) {
			Some("TRUE") => Some(Ok(true)),
			Some("FALSE") => Some(Ok(false)),
			Some(_) => Some(Err(Error::Invalid(attr.to_owned()))),
			None => None,
		}
	}

	/// Get the first value of an attribute, interpreted as Generalized Time.
	fn time_first(&self, attr: &str) -> Option<Result<OffsetDateTime, Error>> {
		self.attr_first(attr).map(|value| {
			PrimitiveDateTime::parse(value, &TIME_FORMAT)
				.map(PrimitiveDateTime::assume_utc)
				.map_err(|_| Error::Invalid(attr.to_owned()))
		})
	}
}

impl EntryExt for Attributes {
	fn attr_first(&self, attr: &str) -> Option<&str> {
		self.get(attr)?.first().map(String::as_str)
	}

	fn bin_attr_first(&self, attr: &str) -> Option<&[u8]> {
		if let Some(values) = self.get(attr) {
			return values.first().map(String::as_bytes);
		}
		self.get_binary(attr)?.first().map(Vec::as_slice)
	}
}

impl EntryExt for DirContext {
	fn attr_first(&self, attr: &str) -> Option<&str> {
		self.attributes.attr_first(attr)
	}

	fn bin_attr_first(&self, attr: &str) -> Option<&[u8]> {
		self.attributes.bin_attr_first(attr)
	}
}

/// A change to one attribute of an existing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
	/// Add the values to the attribute.
	Add(String, Vec<String>),
	/// Replace all values of the attribute.
	Replace(String, Vec<String>),
	/// Remove the values, or the whole attribute if no values are given.
	Remove(String, Vec<String>),
}

impl Modification {
	/// Name of the modified attribute.
	#[must_use]
	pub fn attribute(&self) -> &str {
		match self {
			Modification::Add(name, _)
			| Modification::Replace(name, _)
			| Modification::Remove(name, _) => name,
		}
	}

	/// Applies the modification to an attribute set.
	pub fn apply(&self, attributes: &mut Attributes) {
		match self {
			Modification::Add(name, values) => {
				for value in values {
					attributes.add_value(name, value.clone());
				}
			}
			Modification::Replace(name, values) if values.is_empty() => {
				attributes.remove(name);
			}
			Modification::Replace(name, values) => attributes.put(name, values.iter().cloned()),
			Modification::Remove(name, values) if values.is_empty() => {
				attributes.remove(name);
			}
			Modification::Remove(name, values) => {
				for value in values {
					attributes.remove_value(name, value);
				}
			}
		}
	}
}

impl From<&Modification> for ldap3::Mod<String> {
	fn from(modification: &Modification) -> Self {
		match modification.clone() {
			Modification::Add(name, values) => ldap3::Mod::Add(name, values.into_iter().collect()),
			Modification::Replace(name, values) => {
				ldap3::Mod::Replace(name, values.into_iter().collect())
			}
			Modification::Remove(name, values) => {
				ldap3::Mod::Delete(name, values.into_iter().collect())
			}
		}
	}
}

/// The absolute and base-relative name of an entry, handed to the callback
/// of [`DirectoryTemplate::authenticate`](crate::DirectoryTemplate::authenticate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryIdentification {
	/// Full name in the directory namespace
	absolute: DistinguishedName,
	/// Name relative to the context source base
	relative: DistinguishedName,
}

impl EntryIdentification {
	/// Creates an identification from both forms of the name.
	#[must_use]
	pub fn new(absolute: DistinguishedName, relative: DistinguishedName) -> Self {
		Self { absolute, relative }
	}

	/// The full name, usable as a bind principal.
	#[must_use]
	pub fn absolute_name(&self) -> &DistinguishedName {
		&self.absolute
	}

	/// The name relative to the context source base.
	#[must_use]
	pub fn relative_name(&self) -> &DistinguishedName {
		&self.relative
	}
}

/// One directory entry together with its name, the context source base and,
/// for entries read from the directory, the attributes as they were loaded.
///
/// Contexts created with [`DirContext::new`] describe entries that are not
/// bound yet. Contexts produced by searches and lookups are in update mode:
/// they represent existing entries and track changes as [`Modification`]s.
#[derive(Debug, Clone, Default)]
pub struct DirContext {
	/// Name relative to `base`; unset for unnamed contexts
	dn: Option<DistinguishedName>,
	/// Base of the context source the entry was read through
	base: DistinguishedName,
	/// Current attributes
	attributes: Attributes,
	/// Attributes as loaded; `Some` in update mode
	original: Option<Attributes>,
}

impl DirContext {
	/// A context for an entry that does not exist yet.
	#[must_use]
	pub fn new(dn: DistinguishedName) -> Self {
		Self { dn: Some(dn), ..Self::default() }
	}

	/// A context without a name.
	#[must_use]
	pub fn unnamed() -> Self {
		Self::default()
	}

	/// A context for an existing entry, as read from the directory.
	#[must_use]
	pub fn existing(dn: DistinguishedName, base: DistinguishedName, attributes: Attributes) -> Self {
		Self { dn: Some(dn), base, original: Some(attributes.clone()), attributes }
	}

	/// The name relative to the base, if set.
	#[must_use]
	pub fn dn(&self) -> Option<&DistinguishedName> {
		self.dn.as_ref()
	}

	/// Sets the name relative to the base.
	pub fn set_dn(&mut self, dn: DistinguishedName) {
		self.dn = Some(dn);
	}

	/// The base of the context source.
	#[must_use]
	pub fn base(&self) -> &DistinguishedName {
		&self.base
	}

	/// The full name of the entry: its name joined with the base.
	#[must_use]
	pub fn name_in_namespace(&self) -> Option<DistinguishedName> {
		self.dn.as_ref().map(|dn| dn.prepend(&self.base))
	}

	/// Both forms of the entry's name.
	#[must_use]
	pub fn identification(&self) -> Option<EntryIdentification> {
		let relative = self.dn.clone()?;
		Some(EntryIdentification::new(relative.prepend(&self.base), relative))
	}

	/// Whether this context represents an entry already bound in the
	/// directory.
	#[must_use]
	pub fn is_update_mode(&self) -> bool {
		self.original.is_some()
	}

	/// The current attributes.
	#[must_use]
	pub fn attributes(&self) -> &Attributes {
		&self.attributes
	}

	/// Replaces the values of an attribute with a single value.
	pub fn set_attribute_value(&mut self, name: &str, value: impl Into<String>) {
		self.attributes.put(name, [value.into()]);
	}

	/// Replaces the values of an attribute.
	pub fn set_attribute_values<V: Into<String>>(
		&mut self,
		name: &str,
		values: impl IntoIterator<Item = V>,
	) {
		self.attributes.put(name, values);
	}

	/// Adds a value to an attribute.
	pub fn add_attribute_value(&mut self, name: &str, value: impl Into<String>) {
		self.attributes.add_value(name, value);
	}

	/// Removes a single value from an attribute.
	pub fn remove_attribute_value(&mut self, name: &str, value: &str) {
		self.attributes.remove_value(name, value);
	}

	/// Removes an attribute entirely.
	pub fn remove_attribute(&mut self, name: &str) {
		self.attributes.remove(name);
	}

	/// The changes made since the entry was loaded. Empty unless in update
	/// mode.
	#[must_use]
	pub fn modification_items(&self) -> Vec<Modification> {
		let Some(original) = &self.original else {
			return Vec::new();
		};
		let mut items = Vec::new();
		for (name, values) in self.attributes.iter() {
			if original.get(name) != Some(values) {
				items.push(Modification::Replace(name.to_owned(), values.to_vec()));
			}
		}
		for (name, _) in original.iter() {
			if self.attributes.get(name).is_none() {
				items.push(Modification::Remove(name.to_owned(), Vec::new()));
			}
		}
		items
	}
}
