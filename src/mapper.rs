//! Conversion of search results into caller-defined values, one entry at a
//! time.
use std::fmt;

use crate::{
	entry::{Attributes, DirContext},
	error::Error,
};

/// Maps the attributes of one entry.
pub trait AttributesMapper<T>: Send + Sync {
	/// Produces the value for one entry.
	fn map_from_attributes(&self, attributes: &Attributes) -> Result<T, Error>;
}

impl<T, F> AttributesMapper<T> for F
where
	F: Fn(&Attributes) -> Result<T, Error> + Send + Sync,
{
	fn map_from_attributes(&self, attributes: &Attributes) -> Result<T, Error> {
		self(attributes)
	}
}

/// Maps a whole entry context, including its name.
pub trait ContextMapper<T>: Send + Sync {
	/// Produces the value for one entry.
	fn map_from_context(&self, context: &DirContext) -> Result<T, Error>;
}

impl<T, F> ContextMapper<T> for F
where
	F: Fn(&DirContext) -> Result<T, Error> + Send + Sync,
{
	fn map_from_context(&self, context: &DirContext) -> Result<T, Error> {
		self(context)
	}
}

/// The mapping callback of a search.
pub enum Mapper<'m, T> {
	/// Sees only the attributes.
	Attributes(Box<dyn AttributesMapper<T> + 'm>),
	/// Sees the entry context. Forces entry objects to be returned.
	Context(Box<dyn ContextMapper<T> + 'm>),
}

impl<'m, T> Mapper<'m, T> {
	/// An attributes mapper from a closure.
	pub fn attributes<F>(mapper: F) -> Self
	where
		F: Fn(&Attributes) -> Result<T, Error> + Send + Sync + 'm,
	{
		Self::Attributes(Box::new(mapper))
	}

	/// A context mapper from a closure.
	pub fn context<F>(mapper: F) -> Self
	where
		F: Fn(&DirContext) -> Result<T, Error> + Send + Sync + 'm,
	{
		Self::Context(Box::new(mapper))
	}

	/// Whether this mapper needs materialised entry objects.
	#[must_use]
	pub fn is_context_mapper(&self) -> bool {
		matches!(self, Self::Context(_))
	}

	/// Maps one entry.
	pub fn map(&self, context: &DirContext) -> Result<T, Error> {
		match self {
			Self::Attributes(mapper) => mapper.map_from_attributes(context.attributes()),
			Self::Context(mapper) => mapper.map_from_context(context),
		}
	}
}

impl<T> fmt::Debug for Mapper<'_, T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Attributes(_) => f.write_str("Mapper::Attributes"),
			Self::Context(_) => f.write_str("Mapper::Context"),
		}
	}
}

/// Sink called once per entry of a bare search walk.
pub trait EntryHandler: Send {
	/// Handles one entry. An error aborts the search.
	fn handle_entry(&mut self, context: &DirContext) -> Result<(), Error>;
}

impl<F> EntryHandler for F
where
	F: FnMut(&DirContext) -> Result<(), Error> + Send,
{
	fn handle_entry(&mut self, context: &DirContext) -> Result<(), Error> {
		self(context)
	}
}

/// Handler collecting the mapped value of every entry in enumeration order.
#[derive(Debug)]
pub struct MappingCollector<'a, 'm, T> {
	/// Mapping callback
	mapper: &'a Mapper<'m, T>,
	/// Values mapped so far
	results: Vec<T>,
}

impl<'a, 'm, T> MappingCollector<'a, 'm, T> {
	/// A collector with no results yet.
	#[must_use]
	pub fn new(mapper: &'a Mapper<'m, T>) -> Self {
		Self { mapper, results: Vec::new() }
	}

	/// The collected values.
	#[must_use]
	pub fn into_results(self) -> Vec<T> {
		self.results
	}
}

impl<T: Send> EntryHandler for MappingCollector<'_, '_, T> {
	fn handle_entry(&mut self, context: &DirContext) -> Result<(), Error> {
		self.results.push(self.mapper.map(context)?);
		Ok(())
	}
}

/// Extracts the only element of a fully mapped result.
pub(crate) fn single_result<T>(mut results: Vec<T>) -> Result<T, Error> {
	match results.len() {
		0 => Err(Error::EmptyResult),
		1 => results.pop().ok_or(Error::EmptyResult),
		actual => Err(Error::IncorrectResultCount { expected: 1, actual }),
	}
}
