//! Config for the LDAP context source.
use std::{io::BufReader, path::PathBuf, sync::Arc, time::Duration};

use ldap3::LdapConnSettings;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{error::Error, name::DistinguishedName};

/// LDAP configuration.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Config {
	/// The URLs of the servers, tried in order until one accepts the
	/// connection. Supports ldap, ldaps, and ldapi schemes
	pub urls: Vec<Url>,
	/// The name every name handed to the template is relative to
	#[serde(default)]
	pub base: DistinguishedName,
	/// The principal used for read-write (and, unless anonymous, read-only)
	/// connections. Empty for anonymous access
	#[serde(default)]
	pub user_dn: String,
	/// The password of `user_dn`
	#[serde(default)]
	pub password: String,
	/// Skip the bind on read-only connections
	#[serde(default)]
	pub anonymous_read_only: bool,
	/// End searches silently when the server reports partial results
	#[serde(default)]
	pub ignore_partial_result: bool,
	/// If set, enables the [simple paged search control] and sets the page size
	/// to the given value
	///
	/// [simple paged search control]: https://www.rfc-editor.org/rfc/rfc2696.html
	#[serde(default)]
	pub page_size: Option<i32>,
	/// Connection settings.
	#[serde(default)]
	pub connection: ConnectionConfig,
}

impl Config {
	/// The server URLs as one space separated string.
	#[must_use]
	pub fn provider_url_string(&self) -> String {
		self.urls.iter().map(Url::as_str).collect::<Vec<_>>().join(" ")
	}
}

/// Configuration for how to connect to the LDAP server
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
	/// Timeout to establish a connection in seconds.
	pub timeout: u64,

	/// LDAP operation timeout. For search per reply.
	pub operation_timeout: Duration,

	/// TLS config
	#[serde(default)]
	pub tls: TLSConfig,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		Self { timeout: 5, operation_timeout: Duration::from_secs(30), tls: TLSConfig::default() }
	}
}

/// TLS Configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TLSConfig {
	/// Use StartTLS extended operation for establishing a secure connection,
	/// rather than TLS on a dedicated port.
	#[serde(default)]
	pub starttls: bool,

	/// Disable verification of TLS certificates
	#[serde(default)]
	pub no_tls_verify: bool,

	/// TLS root certificates path
	pub root_certificates_path: Option<PathBuf>,

	/// Path of the TLS client key to use for the connection
	pub client_key_path: Option<PathBuf>,

	/// Path of the TLS client certificate to use for the connection
	pub client_certificate_path: Option<PathBuf>,
}

impl ConnectionConfig {
	/// Create a [`LdapConnSettings`] based on this [`ConnectionConfig`]
	pub(crate) async fn to_settings(&self) -> Result<LdapConnSettings, Error> {
		let mut settings = LdapConnSettings::new();

		settings = settings.set_conn_timeout(Duration::from_secs(self.timeout));
		settings = settings.set_starttls(self.tls.starttls);
		settings = settings.set_no_tls_verify(self.tls.no_tls_verify);

		if let Some(path) = &self.tls.root_certificates_path {
			let mut roots = RootCertStore::empty();
			let certificates = read_certificates(tokio::fs::read(path).await?)
				.map_err(|_| Error::Invalid("Could not read root certificate".to_owned()))?;
			let (added, _) = roots.add_parsable_certificates(&certificates);
			if added == 0 {
				return Err(Error::Invalid("Could not read root certificate".to_owned()));
			}

			let builder = ClientConfig::builder().with_safe_defaults().with_root_certificates(roots);
			let config = match (&self.tls.client_key_path, &self.tls.client_certificate_path) {
				(Some(key_path), Some(cert_path)) => {
					let chain = read_certificates(tokio::fs::read(cert_path).await?)?
						.into_iter()
						.map(Certificate)
						.collect();
					let key = read_private_key(tokio::fs::read(key_path).await?)?;
					builder.with_client_auth_cert(chain, key).map_err(|_| {
						Error::Invalid("Could not read client certificates".to_owned())
					})?
				}
				(None, None) => builder.with_no_client_auth(),
				_ => Err(Error::Invalid(
					"Both a client certificate and key file in PKCS8 format must be specified"
						.to_owned(),
				))?,
			};
			settings = settings.set_config(Arc::new(config));
		}
		Ok(settings)
	}
}

/// Reads every certificate of a PEM file.
fn read_certificates(pem: Vec<u8>) -> Result<Vec<Vec<u8>>, Error> {
	let certificates = rustls_pemfile::certs(&mut BufReader::new(pem.as_slice()))
		.map_err(|_| Error::Invalid("Could not parse PEM certificates".to_owned()))?;
	if certificates.is_empty() {
		return Err(Error::Invalid("No certificate found".to_owned()));
	}
	Ok(certificates)
}

/// Reads the first PKCS8 private key of a PEM file.
fn read_private_key(pem: Vec<u8>) -> Result<PrivateKey, Error> {
	rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(pem.as_slice()))
		.map_err(|_| Error::Invalid("Could not parse PEM private key".to_owned()))?
		.into_iter()
		.next()
		.map(PrivateKey)
		.ok_or_else(|| Error::Invalid("No PKCS8 private key found".to_owned()))
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used, clippy::expect_used, clippy::items_after_statements)]

	use std::{io::ErrorKind, path::PathBuf, time::Duration};

	use url::Url;

	use super::{Config, ConnectionConfig, TLSConfig};
	use crate::error;

	#[test]
	fn test_provider_url_string() -> Result<(), Box<dyn std::error::Error>> {
		let config = Config {
			urls: vec![Url::parse("ldap://127.0.0.1:389")?, Url::parse("ldap://127.0.0.2:389")?],
			..Config::default()
		};
		assert_eq!(config.provider_url_string(), "ldap://127.0.0.1:389 ldap://127.0.0.2:389");

		let config = Config { urls: vec![Url::parse("ldaps://ldap.example.org")?], ..config };
		assert_eq!(config.provider_url_string(), "ldaps://ldap.example.org");
		Ok(())
	}

	#[test]
	fn test_defaults() {
		let config = Config::default();
		assert!(config.base.is_root());
		assert!(!config.ignore_partial_result);
		assert_eq!(config.page_size, None);
		assert_eq!(config.connection.timeout, 5);
		assert_eq!(config.connection.operation_timeout, Duration::from_secs(30));
		assert!(config.connection.tls.root_certificates_path.is_none());
	}

	#[tokio::test]
	async fn test_plain_settings() -> Result<(), Box<dyn std::error::Error>> {
		ConnectionConfig::default().to_settings().await?;
		Ok(())
	}

	#[tokio::test]
	async fn test_tls_config() -> Result<(), Box<dyn std::error::Error>> {
		fn config(root: &str, key: Option<&str>, cert: Option<&str>) -> ConnectionConfig {
			ConnectionConfig {
				tls: TLSConfig {
					client_key_path: key.map(PathBuf::from),
					client_certificate_path: cert.map(PathBuf::from),
					root_certificates_path: Some(PathBuf::from(root)),
					starttls: false,
					no_tls_verify: false,
				},
				timeout: 5,
				operation_timeout: Duration::from_secs(5),
			}
		}

		// invalid crt test
		assert!(matches!(
			config("src/config.rs", None, None).to_settings().await.err().unwrap(),
			error::Error::Invalid(_)
		));

		// invalid path test
		assert!(matches!(
			config("invalid_path", Some("invalid_path"), Some("invalid_path"))
				.to_settings()
				.await
				.err()
				.unwrap(),
			error::Error::Io(io_err) if io_err.kind() == ErrorKind::NotFound
		));

		Ok(())
	}
}
