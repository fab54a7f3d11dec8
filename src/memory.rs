//! In-memory directory used by the unit tests. Answers with the same raw
//! `ldap3` result codes a server would and records every call.
#![allow(clippy::unwrap_used, clippy::missing_docs_in_private_items)]

use std::{
	collections::{BTreeMap, HashMap, VecDeque},
	sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use ldap3::{LdapError, LdapResult};

use crate::{
	connection::{
		AccessMode, ConnectionProvider, DirectoryConnection, EntryStream, SearchRequest,
		SearchResultEntry,
	},
	entry::{Attributes, Modification},
	error::Error,
	name::DistinguishedName,
	query::SearchScope,
	translate::rc,
};

/// Something the directory was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
	Acquire(AccessMode),
	Release(AccessMode),
	Search(SearchRequest),
	StreamClosed,
	Bind(DistinguishedName),
	Unbind(DistinguishedName),
	Modify(DistinguishedName, Vec<Modification>),
	Rename(DistinguishedName, DistinguishedName),
	/// Recorded by test hooks
	Note(&'static str),
}

#[derive(Debug, Default)]
struct State {
	base: DistinguishedName,
	entries: BTreeMap<DistinguishedName, Attributes>,
	events: Vec<Event>,
	credentials: HashMap<DistinguishedName, String>,
	fail_search: Option<u32>,
	partial_after: Option<usize>,
	referral_on_close: bool,
	fail_acquire: bool,
	fail_release: bool,
}

/// Shared handle on an in-memory directory tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
	state: Arc<Mutex<State>>,
}

pub fn raw(code: u32) -> Error {
	Error::Ldap(LdapError::LdapResult {
		result: LdapResult {
			rc: code,
			matched: String::new(),
			text: String::new(),
			refs: Vec::new(),
			ctrls: Vec::new(),
		},
	})
}

pub fn dn(text: &str) -> DistinguishedName {
	DistinguishedName::parse(text).unwrap()
}

impl MemoryDirectory {
	fn lock(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap()
	}

	pub fn with_base(self, base: &str) -> Self {
		self.lock().base = dn(base);
		self
	}

	/// Adds an entry named relative to the base.
	pub fn insert(&self, name: &str, attributes: Attributes) {
		self.lock().entries.insert(dn(name), attributes);
	}

	pub fn contains(&self, name: &str) -> bool {
		self.lock().entries.contains_key(&dn(name))
	}

	pub fn attributes(&self, name: &str) -> Option<Attributes> {
		self.lock().entries.get(&dn(name)).cloned()
	}

	pub fn set_password(&self, principal: &str, password: &str) {
		self.lock().credentials.insert(dn(principal), password.to_owned());
	}

	pub fn fail_search(&self, code: u32) {
		self.lock().fail_search = Some(code);
	}

	/// Streams end with a referral after this many entries.
	pub fn partial_after(&self, count: usize) {
		self.lock().partial_after = Some(count);
	}

	/// Searches yield every entry and report a referral as their final result.
	pub fn referral_on_close(&self) {
		self.lock().referral_on_close = true;
	}

	pub fn fail_acquire(&self) {
		self.lock().fail_acquire = true;
	}

	pub fn fail_release(&self) {
		self.lock().fail_release = true;
	}

	pub fn record(&self, event: Event) {
		self.lock().events.push(event);
	}

	pub fn events(&self) -> Vec<Event> {
		self.lock().events.clone()
	}

	pub fn clear_events(&self) {
		self.lock().events.clear();
	}

	pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
		self.lock().events.iter().filter(|event| predicate(event)).count()
	}

	pub fn searches(&self) -> Vec<SearchRequest> {
		self.lock()
			.events
			.iter()
			.filter_map(|event| match event {
				Event::Search(request) => Some(request.clone()),
				_ => None,
			})
			.collect()
	}

	fn connect(&self, mode: AccessMode) -> Result<Box<dyn DirectoryConnection>, Error> {
		let mut state = self.lock();
		if state.fail_acquire {
			return Err(Error::Io(std::io::Error::new(
				std::io::ErrorKind::ConnectionRefused,
				"refused",
			)));
		}
		state.events.push(Event::Acquire(mode));
		Ok(Box::new(MemoryConnection { directory: self.clone(), mode }))
	}
}

#[async_trait]
impl ConnectionProvider for MemoryDirectory {
	async fn read_only(&self) -> Result<Box<dyn DirectoryConnection>, Error> {
		self.connect(AccessMode::ReadOnly)
	}

	async fn read_write(&self) -> Result<Box<dyn DirectoryConnection>, Error> {
		self.connect(AccessMode::ReadWrite)
	}

	async fn authenticated(
		&self,
		principal: &DistinguishedName,
		credential: &str,
	) -> Result<Box<dyn DirectoryConnection>, Error> {
		let accepted = self.lock().credentials.get(principal).is_some_and(|p| p == credential);
		if !accepted {
			return Err(raw(rc::INVALID_CREDENTIALS));
		}
		self.connect(AccessMode::Authenticated)
	}

	fn base(&self) -> DistinguishedName {
		self.lock().base.clone()
	}
}

struct MemoryConnection {
	directory: MemoryDirectory,
	mode: AccessMode,
}

fn in_scope(name: &DistinguishedName, base: &DistinguishedName, scope: SearchScope) -> bool {
	match scope {
		SearchScope::Base => name == base,
		SearchScope::OneLevel => name.is_child_of(base),
		SearchScope::Subtree => name == base || name.is_descendant_of(base),
	}
}

fn has_children(state: &State, name: &DistinguishedName) -> bool {
	state.entries.keys().any(|other| other.is_child_of(name))
}

#[async_trait]
impl DirectoryConnection for MemoryConnection {
	async fn search(&mut self, request: &SearchRequest) -> Result<Box<dyn EntryStream>, Error> {
		let mut state = self.directory.lock();
		state.events.push(Event::Search(request.clone()));
		if let Some(code) = state.fail_search {
			return Err(raw(code));
		}
		if !request.base.is_root() && !state.entries.contains_key(&request.base) {
			return Err(raw(rc::NO_SUCH_OBJECT));
		}
		let mut entries = VecDeque::new();
		for (name, attributes) in &state.entries {
			if in_scope(name, &request.base, request.scope) && evaluate(&request.filter, attributes)
			{
				entries.push_back(SearchResultEntry {
					name: name.clone(),
					attributes: attributes.clone().select(&request.attributes),
				});
			}
		}
		let limit = usize::try_from(request.size_limit).unwrap();
		Ok(Box::new(MemoryStream {
			directory: self.directory.clone(),
			entries,
			yielded: 0,
			partial_after: state.partial_after,
			referral_on_close: state.referral_on_close,
			size_limit: (limit > 0).then_some(limit),
		}))
	}

	async fn bind(
		&mut self,
		name: &DistinguishedName,
		attributes: &Attributes,
	) -> Result<(), Error> {
		let mut state = self.directory.lock();
		state.events.push(Event::Bind(name.clone()));
		if state.entries.contains_key(name) {
			return Err(raw(rc::ENTRY_ALREADY_EXISTS));
		}
		let parent_exists = name
			.parent()
			.is_some_and(|parent| parent.is_root() || state.entries.contains_key(&parent));
		if !parent_exists {
			return Err(raw(rc::NO_SUCH_OBJECT));
		}
		state.entries.insert(name.clone(), attributes.clone());
		Ok(())
	}

	async fn unbind(&mut self, name: &DistinguishedName) -> Result<(), Error> {
		let mut state = self.directory.lock();
		state.events.push(Event::Unbind(name.clone()));
		if !state.entries.contains_key(name) {
			return Err(raw(rc::NO_SUCH_OBJECT));
		}
		if has_children(&state, name) {
			return Err(raw(rc::NOT_ALLOWED_ON_NON_LEAF));
		}
		state.entries.remove(name);
		Ok(())
	}

	async fn modify_attributes(
		&mut self,
		name: &DistinguishedName,
		modifications: &[Modification],
	) -> Result<(), Error> {
		let mut state = self.directory.lock();
		state.events.push(Event::Modify(name.clone(), modifications.to_vec()));
		let Some(attributes) = state.entries.get_mut(name) else {
			return Err(raw(rc::NO_SUCH_OBJECT));
		};
		for modification in modifications {
			modification.apply(attributes);
		}
		Ok(())
	}

	async fn rename(
		&mut self,
		old_name: &DistinguishedName,
		new_name: &DistinguishedName,
	) -> Result<(), Error> {
		let mut state = self.directory.lock();
		state.events.push(Event::Rename(old_name.clone(), new_name.clone()));
		if state.entries.contains_key(new_name) {
			return Err(raw(rc::ENTRY_ALREADY_EXISTS));
		}
		if has_children(&state, old_name) {
			return Err(raw(rc::NOT_ALLOWED_ON_NON_LEAF));
		}
		let Some(attributes) = state.entries.remove(old_name) else {
			return Err(raw(rc::NO_SUCH_OBJECT));
		};
		state.entries.insert(new_name.clone(), attributes);
		Ok(())
	}

	async fn close(&mut self) -> Result<(), Error> {
		let mut state = self.directory.lock();
		state.events.push(Event::Release(self.mode));
		if state.fail_release {
			return Err(Error::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone")));
		}
		Ok(())
	}
}

struct MemoryStream {
	directory: MemoryDirectory,
	entries: VecDeque<SearchResultEntry>,
	yielded: usize,
	partial_after: Option<usize>,
	referral_on_close: bool,
	size_limit: Option<usize>,
}

#[async_trait]
impl EntryStream for MemoryStream {
	async fn next(&mut self) -> Result<Option<SearchResultEntry>, Error> {
		if self.partial_after == Some(self.yielded) {
			return Err(raw(rc::REFERRAL));
		}
		if self.size_limit == Some(self.yielded) && !self.entries.is_empty() {
			return Err(raw(rc::SIZE_LIMIT_EXCEEDED));
		}
		let entry = self.entries.pop_front();
		if entry.is_some() {
			self.yielded += 1;
		}
		Ok(entry)
	}

	async fn close(&mut self) -> Result<(), Error> {
		self.directory.record(Event::StreamClosed);
		if self.referral_on_close {
			return Err(raw(rc::REFERRAL));
		}
		Ok(())
	}
}

/// Evaluates the subset of RFC 4515 the tests use: `&`, `|`, `!`, equality
/// and presence.
fn evaluate(filter: &str, attributes: &Attributes) -> bool {
	matches!(evaluate_item(filter.trim(), attributes), Some((true, "")))
}

fn evaluate_item<'f>(filter: &'f str, attributes: &Attributes) -> Option<(bool, &'f str)> {
	let body = filter.strip_prefix('(')?;
	match body.chars().next()? {
		op @ ('&' | '|') => {
			let mut rest = &body[1..];
			let mut values = Vec::new();
			while !rest.starts_with(')') {
				let (value, remaining) = evaluate_item(rest, attributes)?;
				values.push(value);
				rest = remaining;
			}
			let value =
				if op == '&' { values.iter().all(|v| *v) } else { values.iter().any(|v| *v) };
			Some((value, &rest[1..]))
		}
		'!' => {
			let (value, rest) = evaluate_item(&body[1..], attributes)?;
			Some((!value, rest.strip_prefix(')')?))
		}
		_ => {
			let end = body.find(')')?;
			let (attribute, value) = body[..end].split_once('=')?;
			let matched = if value == "*" {
				attributes.contains(attribute)
			} else {
				let wanted = unescape(value);
				attributes
					.get(attribute)
					.is_some_and(|values| values.iter().any(|v| v.eq_ignore_ascii_case(&wanted)))
			};
			Some((matched, &body[end + 1..]))
		}
	}
}

fn unescape(value: &str) -> String {
	let mut out = String::new();
	let mut chars = value.chars();
	while let Some(c) = chars.next() {
		if c == '\\' {
			let hex: String = chars.by_ref().take(2).collect();
			out.push(char::from(u8::from_str_radix(&hex, 16).unwrap()));
		} else {
			out.push(c);
		}
	}
	out
}
