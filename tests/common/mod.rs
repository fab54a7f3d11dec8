use std::error::Error;

use ldap3::{LdapConnAsync, SearchEntry};
use ldap_template::{config::Config, DirectoryTemplate};
use url::Url;

pub const BASE: &str = "dc=example,dc=org";
pub const ADMIN: &str = "cn=admin,dc=example,dc=org";
pub const ADMIN_PASSWORD: &str = "adminpassword";

#[must_use]
pub fn config() -> Config {
	Config {
		urls: vec![Url::parse("ldap://localhost:1389").unwrap()],
		base: BASE.parse().unwrap(),
		user_dn: ADMIN.to_owned(),
		password: ADMIN_PASSWORD.to_owned(),
		..Config::default()
	}
}

#[must_use]
pub fn template() -> DirectoryTemplate {
	DirectoryTemplate::from_config(config())
}

pub async fn ldap_connect() -> Result<ldap3::Ldap, Box<dyn Error>> {
	let (conn, mut ldap) = LdapConnAsync::new("ldap://localhost:1389").await?;
	let _handle = tokio::spawn(async move {
		if let Err(err) = conn.drive().await {
			panic!("Ldap connection error {err}");
		}
	});
	ldap.simple_bind(ADMIN, ADMIN_PASSWORD).await?;
	Ok(ldap)
}

pub async fn ldap_add_organizational_unit(
	ldap: &mut ldap3::Ldap,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("ou={},{BASE}", ou),
		vec![("objectClass", ["organizationalUnit"].into())],
	)
	.await?
	.success()?;
	Ok(())
}

pub async fn ldap_add_user(
	ldap: &mut ldap3::Ldap,
	cn: &str,
	sn: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("cn={},ou=users,{BASE}", cn),
		vec![
			("objectClass", ["inetOrgPerson"].into()),
			("sn", [sn].into()),
			("userPassword", [format!("{cn}-password").as_str()].into()),
		],
	)
	.await?
	.success()?;
	Ok(())
}

pub async fn ldap_search_user(
	ldap: &mut ldap3::Ldap,
	cn: &str,
) -> Result<Option<SearchEntry>, Box<dyn Error>> {
	let result = ldap
		.search(
			&format!("cn={},ou=users,{BASE}", cn),
			ldap3::Scope::Base,
			"(objectClass=inetOrgPerson)",
			vec!["*"],
		)
		.await?;
	if result.1.rc == 32 {
		return Ok(None);
	}
	let (entries, _res) = result.success()?;
	Ok(entries.first().cloned().map(SearchEntry::construct))
}

/// Removes the `ou=users` subtree left over by an earlier run.
pub async fn ldap_cleanup_users(ldap: &mut ldap3::Ldap) {
	let (entries, _) = match ldap
		.search(&format!("ou=users,{BASE}"), ldap3::Scope::OneLevel, "(objectClass=*)", vec!["1.1"])
		.await
		.and_then(|result| result.success())
	{
		Ok(result) => result,
		Err(_) => return,
	};
	for entry in entries {
		let _ = ldap.delete(&SearchEntry::construct(entry).dn).await;
	}
	let _ = ldap.delete(&format!("ou=users,{BASE}")).await;
}
