//! Translation of raw provider failures into the semantic error kinds.
use ldap3::{LdapError, LdapResult};

use crate::error::Error;

/// LDAP result codes (RFC 4511 section 4.1.9) with a dedicated error kind.
pub mod rc {
	/// `timeLimitExceeded`
	pub const TIME_LIMIT_EXCEEDED: u32 = 3;
	/// `sizeLimitExceeded`
	pub const SIZE_LIMIT_EXCEEDED: u32 = 4;
	/// `partialResults`, only sent by LDAPv2 servers
	pub const PARTIAL_RESULTS: u32 = 9;
	/// `referral`
	pub const REFERRAL: u32 = 10;
	/// `adminLimitExceeded`
	pub const ADMIN_LIMIT_EXCEEDED: u32 = 11;
	/// `noSuchObject`
	pub const NO_SUCH_OBJECT: u32 = 32;
	/// `invalidDNSyntax`
	pub const INVALID_DN_SYNTAX: u32 = 34;
	/// `inappropriateAuthentication`
	pub const INAPPROPRIATE_AUTHENTICATION: u32 = 48;
	/// `invalidCredentials`
	pub const INVALID_CREDENTIALS: u32 = 49;
	/// `insufficientAccessRights`
	pub const INSUFFICIENT_ACCESS_RIGHTS: u32 = 50;
	/// `busy`
	pub const BUSY: u32 = 51;
	/// `unavailable`
	pub const UNAVAILABLE: u32 = 52;
	/// `notAllowedOnNonLeaf`
	pub const NOT_ALLOWED_ON_NON_LEAF: u32 = 66;
	/// `entryAlreadyExists`
	pub const ENTRY_ALREADY_EXISTS: u32 = 68;
}

/// Maps a raw provider failure to its semantic error kind.
///
/// Semantic errors pass through unchanged, so translating twice yields the
/// same kind as translating once. Every input yields exactly one output.
#[must_use]
pub fn translate(error: Error) -> Error {
	match error {
		Error::Ldap(LdapError::LdapResult { result }) => from_result(&result),
		Error::Ldap(err @ (LdapError::Io { .. } | LdapError::Timeout { .. })) => {
			Error::Communication(err.to_string())
		}
		Error::Ldap(err) => Error::DirectoryOperation { code: None, message: err.to_string() },
		Error::Io(err) => Error::Communication(err.to_string()),
		translated => translated,
	}
}

/// Maps a non-successful operation result by its result code.
fn from_result(result: &LdapResult) -> Error {
	let message = describe(result);
	match result.rc {
		rc::TIME_LIMIT_EXCEEDED | rc::SIZE_LIMIT_EXCEEDED | rc::ADMIN_LIMIT_EXCEEDED => {
			Error::LimitExceeded(message)
		}
		rc::PARTIAL_RESULTS | rc::REFERRAL => Error::PartialResult(message),
		rc::NO_SUCH_OBJECT => Error::NameNotFound(message),
		rc::INVALID_DN_SYNTAX => Error::MalformedName(message),
		rc::INAPPROPRIATE_AUTHENTICATION | rc::INVALID_CREDENTIALS => Error::Authentication(message),
		rc::INSUFFICIENT_ACCESS_RIGHTS => Error::NoPermission(message),
		rc::BUSY | rc::UNAVAILABLE => Error::Communication(message),
		rc::NOT_ALLOWED_ON_NON_LEAF => Error::ContextNotEmpty(message),
		rc::ENTRY_ALREADY_EXISTS => Error::NameAlreadyBound(message),
		code => Error::DirectoryOperation { code: Some(code), message },
	}
}

/// Diagnostic text of a result, falling back to the matched name and the
/// numeric code when the server sent no text.
fn describe(result: &LdapResult) -> String {
	match (result.text.is_empty(), result.matched.is_empty()) {
		(false, _) => result.text.clone(),
		(true, false) => format!("result code {} (matched '{}')", result.rc, result.matched),
		(true, true) => format!("result code {}", result.rc),
	}
}
