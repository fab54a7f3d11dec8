//! Distinguished names: parsing, canonical rendering and composition.
//!
//! A [`DistinguishedName`] is an ordered sequence of relative distinguished
//! names ([`Rdn`]), stored in textual order: the leaf comes first and the most
//! significant (root-ward) component last. The empty sequence is the root.
//!
//! Values are kept unescaped in memory. Rendering always produces the same
//! canonical escaped form, regardless of how the input was escaped:
//! ```
//! use ldap_template::DistinguishedName;
//!
//! let name: DistinguishedName = r"CN=Doe\2C John , OU=people,dc=example".parse()?;
//! assert_eq!(name.leaf().map(|rdn| rdn.value()), Some("Doe, John"));
//! assert_eq!(name.to_string(), r"cn=Doe\, John,ou=people,dc=example");
//! # Ok::<(), ldap_template::error::Error>(())
//! ```
use std::{
	cmp::Ordering,
	fmt,
	hash::{Hash, Hasher},
	str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Characters escaped with a backslash anywhere inside a rendered value.
const SPECIAL: &[char] = &[',', '+', '"', '\\', '<', '>', ';'];

/// How attribute values are compared when matching names.
///
/// Keys are always compared case-insensitively. Whether values are depends on
/// the matching rule the directory uses for the naming attribute, which is
/// why it can be chosen per comparison with [`DistinguishedName::matches`].
/// The [`PartialEq`] implementation uses [`ValueComparison::CaseSensitive`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueComparison {
	/// Values must match exactly.
	#[default]
	CaseSensitive,
	/// Values are compared ignoring case.
	CaseInsensitive,
}

/// A single `key=value` assertion within an [`Rdn`].
#[derive(Debug, Clone)]
pub struct RdnComponent {
	/// Attribute type, as given
	key: String,
	/// Unescaped attribute value
	value: String,
}

impl RdnComponent {
	/// Creates a component, validating the attribute type.
	pub fn new(key: impl Into<String>, value: impl Into<String>) -> Result<Self, Error> {
		let key = key.into();
		if !is_valid_key(&key) {
			return Err(Error::MalformedName(format!("invalid attribute type '{key}'")));
		}
		Ok(Self { key, value: value.into() })
	}

	/// The attribute type.
	#[must_use]
	pub fn key(&self) -> &str {
		&self.key
	}

	/// The unescaped attribute value.
	#[must_use]
	pub fn value(&self) -> &str {
		&self.value
	}

	/// Compares two components using the given value comparison.
	fn matches(&self, other: &Self, comparison: ValueComparison) -> bool {
		self.key.eq_ignore_ascii_case(&other.key)
			&& match comparison {
				ValueComparison::CaseSensitive => self.value == other.value,
				ValueComparison::CaseInsensitive => {
					self.value.to_lowercase() == other.value.to_lowercase()
				}
			}
	}

	/// Writes the canonical form: lowercase key, escaped value.
	fn render(&self, out: &mut String) {
		out.push_str(&self.key.to_ascii_lowercase());
		out.push('=');
		escape_value(&self.value, out);
	}
}

impl PartialEq for RdnComponent {
	fn eq(&self, other: &Self) -> bool {
		self.matches(other, ValueComparison::CaseSensitive)
	}
}

impl Eq for RdnComponent {}

impl Hash for RdnComponent {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.key.to_ascii_lowercase().hash(state);
		self.value.hash(state);
	}
}

impl Ord for RdnComponent {
	fn cmp(&self, other: &Self) -> Ordering {
		self.key
			.to_ascii_lowercase()
			.cmp(&other.key.to_ascii_lowercase())
			.then_with(|| self.value.cmp(&other.value))
	}
}

impl PartialOrd for RdnComponent {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

/// A relative distinguished name: one or more components joined by `+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rdn {
	/// Never empty
	components: Vec<RdnComponent>,
}

impl Rdn {
	/// Creates a single-valued RDN.
	pub fn new(key: impl Into<String>, value: impl Into<String>) -> Result<Self, Error> {
		Ok(Self { components: vec![RdnComponent::new(key, value)?] })
	}

	/// Creates a multi-valued RDN from its components.
	pub fn from_components(components: Vec<RdnComponent>) -> Result<Self, Error> {
		if components.is_empty() {
			return Err(Error::MalformedName("an RDN needs at least one component".to_owned()));
		}
		Ok(Self { components })
	}

	/// All components, in the order given.
	#[must_use]
	pub fn components(&self) -> &[RdnComponent] {
		&self.components
	}

	/// The attribute type of the first component.
	#[must_use]
	pub fn key(&self) -> &str {
		self.components[0].key()
	}

	/// The value of the first component.
	#[must_use]
	pub fn value(&self) -> &str {
		self.components[0].value()
	}

	/// Writes the canonical form of this RDN.
	fn render(&self, out: &mut String) {
		for (i, component) in self.components.iter().enumerate() {
			if i > 0 {
				out.push('+');
			}
			component.render(out);
		}
	}

	/// Compares two RDNs using the given value comparison.
	fn matches(&self, other: &Self, comparison: ValueComparison) -> bool {
		self.components.len() == other.components.len()
			&& self.components.iter().zip(&other.components).all(|(a, b)| a.matches(b, comparison))
	}
}

impl fmt::Display for Rdn {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut out = String::new();
		self.render(&mut out);
		f.write_str(&out)
	}
}

/// A hierarchical name identifying a directory entry.
///
/// Immutable: composition methods return new names. The only in-place
/// building API is [`DistinguishedName::push`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DistinguishedName {
	/// Leaf first, root-ward last
	rdns: Vec<Rdn>,
}

impl DistinguishedName {
	/// The empty name, denoting the root of the directory tree.
	#[must_use]
	pub const fn root() -> Self {
		Self { rdns: Vec::new() }
	}

	/// Parses the textual (RFC 4514) form of a name.
	///
	/// Components are split on unescaped `,` (or the legacy `;`) and `+`,
	/// surrounding whitespace is trimmed and values are unescaped. Quoted
	/// values are accepted. An empty or blank string is the root.
	pub fn parse(text: &str) -> Result<Self, Error> {
		if text.trim().is_empty() {
			return Ok(Self::root());
		}
		let mut rdns = Vec::new();
		for raw_rdn in split(text)? {
			let components =
				raw_rdn.into_iter().map(parse_component).collect::<Result<Vec<_>, _>>()?;
			rdns.push(Rdn { components });
		}
		Ok(Self { rdns })
	}

	/// Builds a name from RDNs given leaf first.
	#[must_use]
	pub fn from_rdns(rdns: Vec<Rdn>) -> Self {
		Self { rdns }
	}

	/// Whether this is the root (empty) name.
	#[must_use]
	pub fn is_root(&self) -> bool {
		self.rdns.is_empty()
	}

	/// Number of RDNs.
	#[must_use]
	pub fn len(&self) -> usize {
		self.rdns.len()
	}

	/// Whether this name has no RDNs. Same as [`DistinguishedName::is_root`].
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.rdns.is_empty()
	}

	/// The RDNs, leaf first.
	#[must_use]
	pub fn rdns(&self) -> &[Rdn] {
		&self.rdns
	}

	/// The least significant RDN, i.e. the entry's own name.
	#[must_use]
	pub fn leaf(&self) -> Option<&Rdn> {
		self.rdns.first()
	}

	/// The name of the parent entry. The root has none.
	#[must_use]
	pub fn parent(&self) -> Option<Self> {
		(!self.is_root()).then(|| Self { rdns: self.rdns[1..].to_vec() })
	}

	/// Returns the name of the child `key=value` below this name.
	pub fn with(&self, key: impl Into<String>, value: impl Into<String>) -> Result<Self, Error> {
		Ok(self.child(Rdn::new(key, value)?))
	}

	/// Returns the name of the child `rdn` below this name.
	#[must_use]
	pub fn child(&self, rdn: Rdn) -> Self {
		let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
		rdns.push(rdn);
		rdns.extend_from_slice(&self.rdns);
		Self { rdns }
	}

	/// Adds `key=value` as the new leaf of this name, in place.
	pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), Error> {
		self.rdns.insert(0, Rdn::new(key, value)?);
		Ok(())
	}

	/// Returns `prefix` joined root-ward of this name.
	///
	/// `cn=child` prepended with `ou=people,dc=example` becomes
	/// `cn=child,ou=people,dc=example`.
	#[must_use]
	pub fn prepend(&self, prefix: &Self) -> Self {
		let mut rdns = self.rdns.clone();
		rdns.extend_from_slice(&prefix.rdns);
		Self { rdns }
	}

	/// Returns `suffix` joined leaf-ward of this name.
	///
	/// `ou=people,dc=example` appended with `cn=child` becomes
	/// `cn=child,ou=people,dc=example`.
	#[must_use]
	pub fn append(&self, suffix: &Self) -> Self {
		suffix.prepend(self)
	}

	/// Strips `base` off the root-ward end of this name. Returns `None` if
	/// this name is not `base` or below it.
	#[must_use]
	pub fn relative_to(&self, base: &Self) -> Option<Self> {
		self.relative_to_with(base, ValueComparison::CaseSensitive)
	}

	/// [`DistinguishedName::relative_to`] with the given value comparison.
	#[must_use]
	pub fn relative_to_with(&self, base: &Self, comparison: ValueComparison) -> Option<Self> {
		let split = self.rdns.len().checked_sub(base.rdns.len())?;
		let matched =
			self.rdns[split..].iter().zip(&base.rdns).all(|(a, b)| a.matches(b, comparison));
		matched.then(|| Self { rdns: self.rdns[..split].to_vec() })
	}

	/// Whether this name is strictly below `ancestor`.
	#[must_use]
	pub fn is_descendant_of(&self, ancestor: &Self) -> bool {
		self.rdns.len() > ancestor.rdns.len() && self.relative_to(ancestor).is_some()
	}

	/// Whether `descendant` is strictly below this name.
	#[must_use]
	pub fn is_ancestor_of(&self, descendant: &Self) -> bool {
		descendant.is_descendant_of(self)
	}

	/// Whether this name is an immediate child of `parent`.
	#[must_use]
	pub fn is_child_of(&self, parent: &Self) -> bool {
		self.rdns.len() == parent.rdns.len() + 1 && self.is_descendant_of(parent)
	}

	/// Compares two names with the given value comparison.
	#[must_use]
	pub fn matches(&self, other: &Self, comparison: ValueComparison) -> bool {
		self.rdns.len() == other.rdns.len()
			&& self.rdns.iter().zip(&other.rdns).all(|(a, b)| a.matches(b, comparison))
	}
}

impl Ord for DistinguishedName {
	/// Orders root-ward components first, so ancestors sort before their
	/// descendants.
	fn cmp(&self, other: &Self) -> Ordering {
		self.rdns.iter().rev().cmp(other.rdns.iter().rev())
	}
}

impl PartialOrd for DistinguishedName {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl fmt::Display for DistinguishedName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut out = String::new();
		for (i, rdn) in self.rdns.iter().enumerate() {
			if i > 0 {
				out.push(',');
			}
			rdn.render(&mut out);
		}
		f.write_str(&out)
	}
}

impl FromStr for DistinguishedName {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl TryFrom<String> for DistinguishedName {
	type Error = Error;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::parse(&value)
	}
}

impl From<DistinguishedName> for String {
	fn from(name: DistinguishedName) -> Self {
		name.to_string()
	}
}

/// Anything a template operation accepts as the name of an entry.
///
/// String forms are parsed before the directory is contacted, so a malformed
/// name fails with [`Error::MalformedName`] without acquiring a connection,
/// and a valid one behaves exactly like the equivalent structured name.
pub trait IntoName {
	/// Converts into a structured name.
	fn into_name(self) -> Result<DistinguishedName, Error>;
}

impl IntoName for DistinguishedName {
	fn into_name(self) -> Result<DistinguishedName, Error> {
		Ok(self)
	}
}

impl IntoName for &DistinguishedName {
	fn into_name(self) -> Result<DistinguishedName, Error> {
		Ok(self.clone())
	}
}

impl IntoName for &str {
	fn into_name(self) -> Result<DistinguishedName, Error> {
		DistinguishedName::parse(self)
	}
}

impl IntoName for String {
	fn into_name(self) -> Result<DistinguishedName, Error> {
		DistinguishedName::parse(&self)
	}
}

impl IntoName for &String {
	fn into_name(self) -> Result<DistinguishedName, Error> {
		DistinguishedName::parse(self)
	}
}

/// Attribute types are descriptors (`cn`, `x-custom`) or numeric OIDs.
fn is_valid_key(key: &str) -> bool {
	!key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

/// Splits a name into RDNs and their raw (still escaped) components.
fn split(text: &str) -> Result<Vec<Vec<&str>>, Error> {
	let mut rdns = Vec::new();
	let mut components = Vec::new();
	let mut start = 0;
	let mut escaped = false;
	let mut quoted = false;
	for (i, c) in text.char_indices() {
		if escaped {
			escaped = false;
			continue;
		}
		match c {
			'\\' => escaped = true,
			'"' => quoted = !quoted,
			'+' if !quoted => {
				components.push(&text[start..i]);
				start = i + 1;
			}
			',' | ';' if !quoted => {
				components.push(&text[start..i]);
				rdns.push(std::mem::take(&mut components));
				start = i + 1;
			}
			_ => {}
		}
	}
	if escaped {
		return Err(Error::MalformedName(format!("dangling escape at the end of '{text}'")));
	}
	if quoted {
		return Err(Error::MalformedName(format!("unterminated quote in '{text}'")));
	}
	components.push(&text[start..]);
	rdns.push(components);
	Ok(rdns)
}

/// Parses one raw `key=value` component.
fn parse_component(raw: &str) -> Result<RdnComponent, Error> {
	let (key, value) = raw
		.split_once('=')
		.ok_or_else(|| Error::MalformedName(format!("missing '=' in '{}'", raw.trim())))?;
	let key = key.trim();
	if !is_valid_key(key) {
		return Err(Error::MalformedName(format!("invalid attribute type '{key}'")));
	}
	let value = trim_value(value);
	let value = match value.strip_prefix('"') {
		Some(quoted) => {
			let inner = quoted
				.strip_suffix('"')
				.filter(|inner| !ends_with_escape(inner))
				.ok_or_else(|| Error::MalformedName(format!("unterminated quote in '{raw}'")))?;
			unescape(inner)?
		}
		None => unescape(value)?,
	};
	Ok(RdnComponent { key: key.to_owned(), value })
}

/// Trims unescaped surrounding spaces, keeping an escaped trailing space.
/// Other whitespace is part of the value.
fn trim_value(value: &str) -> &str {
	let value = value.trim_start_matches(' ');
	let trimmed = value.trim_end_matches(' ');
	if trimmed.len() < value.len() && ends_with_escape(trimmed) {
		&value[..=trimmed.len()]
	} else {
		trimmed
	}
}

/// Whether the text ends in an unescaped backslash.
fn ends_with_escape(text: &str) -> bool {
	text.bytes().rev().take_while(|&b| b == b'\\').count() % 2 == 1
}

/// Resolves `\c` and `\hh` escapes. Hex escapes are bytes of the UTF-8
/// encoding, so multi-byte characters may be split across several of them.
fn unescape(value: &str) -> Result<String, Error> {
	let mut bytes = Vec::with_capacity(value.len());
	let mut chars = value.chars();
	while let Some(c) = chars.next() {
		if c != '\\' {
			let mut buf = [0; 4];
			bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
			continue;
		}
		match chars.next() {
			Some(hi) if hi.is_ascii_hexdigit() => {
				let byte = hi
					.to_digit(16)
					.zip(chars.next().and_then(|lo| lo.to_digit(16)))
					.and_then(|(hi, lo)| u8::try_from(hi * 16 + lo).ok())
					.ok_or_else(|| Error::MalformedName(format!("invalid hex escape in '{value}'")))?;
				bytes.push(byte);
			}
			Some(special @ (' ' | '"' | '#' | '+' | ',' | ';' | '<' | '=' | '>' | '\\')) => {
				bytes.push(special as u8);
			}
			Some(other) => {
				return Err(Error::MalformedName(format!("invalid escape '\\{other}' in '{value}'")));
			}
			None => {
				return Err(Error::MalformedName(format!("dangling escape in '{value}'")));
			}
		}
	}
	String::from_utf8(bytes)
		.map_err(|_| Error::MalformedName(format!("escapes in '{value}' are not valid UTF-8")))
}

/// Writes the canonical escaped form of a value.
fn escape_value(value: &str, out: &mut String) {
	let last = value.chars().count().saturating_sub(1);
	for (i, c) in value.chars().enumerate() {
		match c {
			c if SPECIAL.contains(&c) => {
				out.push('\\');
				out.push(c);
			}
			' ' if i == 0 || i == last => out.push_str("\\ "),
			'#' if i == 0 => out.push_str("\\#"),
			'\0' => out.push_str("\\00"),
			c => out.push(c),
		}
	}
}
