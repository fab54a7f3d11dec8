//! Search filter construction with RFC 4515 escaping.
//!
//! ```
//! use ldap_template::Filter;
//!
//! let filter = Filter::and([
//! 	Filter::eq("objectclass", "person"),
//! 	Filter::lte("foo", "*bar(fie)"),
//! 	Filter::not(Filter::present("mail")),
//! ]);
//! assert_eq!(filter.to_string(), r"(&(objectclass=person)(foo<=\2abar\28fie\29)(!(mail=*)))");
//! ```
use std::fmt;

use crate::error::Error;

/// A value on the right hand side of a filter predicate.
///
/// Text is escaped when encoded; numbers are rendered as plain decimal text.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterValue(Repr);

/// Internal representation of a [`FilterValue`]
#[derive(Debug, Clone, PartialEq)]
enum Repr {
	/// Escaped on encoding
	Text(String),
	/// Rendered verbatim
	Integer(i64),
	/// Finite, rendered verbatim
	Decimal(f64),
}

impl FilterValue {
	/// Creates a numeric value from a float, rejecting NaN and infinities.
	pub fn decimal(value: f64) -> Result<Self, Error> {
		if value.is_finite() {
			Ok(Self(Repr::Decimal(value)))
		} else {
			Err(Error::InvalidFilter(format!("{value} is not a finite number")))
		}
	}

	/// Writes the encoded value.
	fn encode(&self, out: &mut String) {
		match &self.0 {
			Repr::Text(text) => escape(text, out),
			Repr::Integer(number) => out.push_str(&number.to_string()),
			Repr::Decimal(number) => out.push_str(&number.to_string()),
		}
	}
}

impl From<&str> for FilterValue {
	fn from(value: &str) -> Self {
		Self(Repr::Text(value.to_owned()))
	}
}

impl From<String> for FilterValue {
	fn from(value: String) -> Self {
		Self(Repr::Text(value))
	}
}

impl From<i64> for FilterValue {
	fn from(value: i64) -> Self {
		Self(Repr::Integer(value))
	}
}

impl From<i32> for FilterValue {
	fn from(value: i32) -> Self {
		Self(Repr::Integer(value.into()))
	}
}

impl From<u32> for FilterValue {
	fn from(value: u32) -> Self {
		Self(Repr::Integer(value.into()))
	}
}

impl TryFrom<f64> for FilterValue {
	type Error = Error;

	fn try_from(value: f64) -> Result<Self, Self::Error> {
		Self::decimal(value)
	}
}

/// Comparison operator of a simple predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
	/// `=`
	Equal,
	/// `<=`
	LessOrEqual,
	/// `>=`
	GreaterOrEqual,
	/// `~=`
	Approx,
}

impl Operator {
	/// The textual operator.
	#[must_use]
	pub fn as_str(self) -> &'static str {
		match self {
			Operator::Equal => "=",
			Operator::LessOrEqual => "<=",
			Operator::GreaterOrEqual => ">=",
			Operator::Approx => "~=",
		}
	}
}

/// A tree of filter predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
	/// `(attribute<op>value)`
	Compare {
		/// Attribute description
		attribute: String,
		/// Comparison operator
		operator: Operator,
		/// Right hand side, escaped on encoding
		value: FilterValue,
	},
	/// `(attribute=*)`
	Present(String),
	/// `(attribute=pattern)` where `*` in the pattern is a wildcard and every
	/// other reserved character is escaped.
	Like {
		/// Attribute description
		attribute: String,
		/// Pattern with `*` wildcards
		pattern: String,
	},
	/// `(&...)`
	And(Vec<Filter>),
	/// `(|...)`
	Or(Vec<Filter>),
	/// `(!...)`
	Not(Box<Filter>),
	/// Filter text supplied by the caller, passed through verbatim.
	Raw(String),
}

impl Filter {
	/// `(attribute=value)`
	pub fn eq(attribute: impl Into<String>, value: impl Into<FilterValue>) -> Self {
		Self::compare(attribute, Operator::Equal, value)
	}

	/// `(attribute<=value)`
	pub fn lte(attribute: impl Into<String>, value: impl Into<FilterValue>) -> Self {
		Self::compare(attribute, Operator::LessOrEqual, value)
	}

	/// `(attribute>=value)`
	pub fn gte(attribute: impl Into<String>, value: impl Into<FilterValue>) -> Self {
		Self::compare(attribute, Operator::GreaterOrEqual, value)
	}

	/// `(attribute~=value)`
	pub fn approx(attribute: impl Into<String>, value: impl Into<FilterValue>) -> Self {
		Self::compare(attribute, Operator::Approx, value)
	}

	/// A simple predicate with an arbitrary operator.
	pub fn compare(
		attribute: impl Into<String>,
		operator: Operator,
		value: impl Into<FilterValue>,
	) -> Self {
		Self::Compare { attribute: attribute.into(), operator, value: value.into() }
	}

	/// `(attribute=*)`
	pub fn present(attribute: impl Into<String>) -> Self {
		Self::Present(attribute.into())
	}

	/// `(attribute=pattern)` keeping `*` as a wildcard.
	pub fn like(attribute: impl Into<String>, pattern: impl Into<String>) -> Self {
		Self::Like { attribute: attribute.into(), pattern: pattern.into() }
	}

	/// Conjunction of all given filters.
	pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
		Self::And(filters.into_iter().collect())
	}

	/// Disjunction of all given filters.
	pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
		Self::Or(filters.into_iter().collect())
	}

	/// Negation.
	#[allow(clippy::should_implement_trait)]
	pub fn not(filter: Filter) -> Self {
		Self::Not(Box::new(filter))
	}

	/// Caller-supplied filter text, used verbatim.
	pub fn raw(text: impl Into<String>) -> Self {
		Self::Raw(text.into())
	}

	/// Appends the encoded filter to `out`.
	pub fn encode(&self, out: &mut String) {
		match self {
			Filter::Compare { attribute, operator, value } => {
				out.push('(');
				out.push_str(attribute);
				out.push_str(operator.as_str());
				value.encode(out);
				out.push(')');
			}
			Filter::Present(attribute) => {
				out.push('(');
				out.push_str(attribute);
				out.push_str("=*)");
			}
			Filter::Like { attribute, pattern } => {
				out.push('(');
				out.push_str(attribute);
				out.push('=');
				for (i, part) in pattern.split('*').enumerate() {
					if i > 0 {
						out.push('*');
					}
					escape(part, out);
				}
				out.push(')');
			}
			Filter::And(filters) => encode_group('&', filters, out),
			Filter::Or(filters) => encode_group('|', filters, out),
			Filter::Not(filter) => {
				out.push_str("(!");
				filter.encode(out);
				out.push(')');
			}
			Filter::Raw(text) => out.push_str(text),
		}
	}
}

impl fmt::Display for Filter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut out = String::new();
		self.encode(&mut out);
		f.write_str(&out)
	}
}

impl From<&str> for Filter {
	fn from(text: &str) -> Self {
		Self::raw(text)
	}
}

impl From<String> for Filter {
	fn from(text: String) -> Self {
		Self::raw(text)
	}
}

impl From<&Filter> for Filter {
	fn from(filter: &Filter) -> Self {
		filter.clone()
	}
}

/// Encodes `(<op>child child ...)`.
fn encode_group(op: char, filters: &[Filter], out: &mut String) {
	out.push('(');
	out.push(op);
	for filter in filters {
		filter.encode(out);
	}
	out.push(')');
}

/// Escapes `*`, `(`, `)`, `\` and NUL as `\` followed by two hex digits.
pub fn escape(value: &str, out: &mut String) {
	for c in value.chars() {
		match c {
			'*' => out.push_str("\\2a"),
			'(' => out.push_str("\\28"),
			')' => out.push_str("\\29"),
			'\\' => out.push_str("\\5c"),
			'\0' => out.push_str("\\00"),
			c => out.push(c),
		}
	}
}
