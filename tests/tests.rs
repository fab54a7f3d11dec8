#![allow(
	clippy::dbg_macro,
	clippy::expect_used,
	clippy::missing_docs_in_private_items,
	clippy::print_stderr,
	clippy::print_stdout,
	clippy::unwrap_used
)]
use std::error::Error;

use ldap_template::{
	error::Error as TemplateError, Attributes, DirContext, DistinguishedName, EntryExt, Filter,
	Mapper, Modification, SearchQuery, SearchScope,
};
use serial_test::serial;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

mod common;

use common::{
	ldap_add_organizational_unit, ldap_add_user, ldap_cleanup_users, ldap_connect,
	ldap_search_user, template,
};

fn display_name() -> Mapper<'static, Option<String>> {
	Mapper::attributes(|entry: &Attributes| Ok(entry.attr_first("displayName").map(str::to_owned)))
}

fn person(cn: &str, display_name: &str) -> Attributes {
	Attributes::new()
		.with("objectClass", ["inetOrgPerson"])
		.with("cn", [cn])
		.with("sn", [cn])
		.with("displayName", [display_name])
}

#[ignore = "docker"]
#[tokio::test]
#[serial]
async fn ldap_search_test() -> Result<(), Box<dyn Error>> {
	let tracing_filter = EnvFilter::default().add_directive(LevelFilter::DEBUG.into());
	let _ = tracing_subscriber::fmt().with_env_filter(tracing_filter).try_init();

	let mut ldap = ldap_connect().await?;
	ldap_cleanup_users(&mut ldap).await;
	ldap_add_organizational_unit(&mut ldap, "users").await?;

	let template = template();
	for (cn, name) in [("user01", "MyName1"), ("user02", "MyName2"), ("user03", "MyName3")] {
		template.bind(format!("cn={cn},ou=users"), &person(cn, name)).await?;
	}

	let query = SearchQuery::new("ou=users", Filter::eq("objectClass", "inetOrgPerson"))?;
	let mut names = template.search(&query, &display_name()).await?;
	names.sort();
	assert_eq!(
		names,
		[Some("MyName1".to_owned()), Some("MyName2".to_owned()), Some("MyName3".to_owned())]
	);

	let structured = SearchQuery::new(
		DistinguishedName::root().with("ou", "users")?,
		Filter::eq("objectClass", "inetOrgPerson"),
	)?;
	let mut same = template.search(&structured, &display_name()).await?;
	same.sort();
	assert_eq!(names, same);

	let single = SearchQuery::new("ou=users", Filter::eq("cn", "user02"))?;
	assert_eq!(
		template.search_for_single_result(&single, &display_name()).await?.as_deref(),
		Some("MyName2")
	);
	assert!(matches!(
		template.search_for_single_result(&query, &display_name()).await,
		Err(TemplateError::IncorrectResultCount { expected: 1, actual: 3 })
	));

	let one_level = SearchQuery::new("", Filter::eq("objectClass", "inetOrgPerson"))?
		.scope(SearchScope::OneLevel);
	assert!(template.search(&one_level, &display_name()).await?.is_empty());

	template.unbind_recursive("ou=users", true).await?;
	ldap.unbind().await?;

	Ok(())
}

#[ignore = "docker"]
#[tokio::test]
#[serial]
async fn ldap_write_test() -> Result<(), Box<dyn Error>> {
	let mut ldap = ldap_connect().await?;
	ldap_cleanup_users(&mut ldap).await;
	ldap_add_organizational_unit(&mut ldap, "users").await?;
	ldap_add_user(&mut ldap, "user01", "User1").await?;

	let template = template();
	assert!(matches!(
		template.bind("cn=user01,ou=users", &person("user01", "Again")).await,
		Err(TemplateError::NameAlreadyBound(_))
	));

	template
		.modify_attributes(
			"cn=user01,ou=users",
			&[Modification::Add("displayName".to_owned(), vec!["MyName1".to_owned()])],
		)
		.await?;
	let entry = ldap_search_user(&mut ldap, "user01").await?.unwrap();
	assert_eq!(entry.attrs["displayName"], ["MyName1"]);

	let mut context = template.lookup("cn=user01,ou=users").await?;
	assert_eq!(
		context.name_in_namespace().unwrap().to_string(),
		"cn=user01,ou=users,dc=example,dc=org"
	);
	context.set_attribute_value("displayName", "MyNameNew");
	template.modify_attributes_context(&context).await?;
	let entry = ldap_search_user(&mut ldap, "user01").await?.unwrap();
	assert_eq!(entry.attrs["displayName"], ["MyNameNew"]);
	assert!(matches!(
		template.bind_context(&context).await,
		Err(TemplateError::IllegalOperationState(_))
	));

	let mut fresh = DirContext::new("cn=user02,ou=users".parse()?);
	fresh.set_attribute_values("objectClass", ["inetOrgPerson"]);
	fresh.set_attribute_value("sn", "User2");
	template.bind_context(&fresh).await?;
	assert!(ldap_search_user(&mut ldap, "user02").await?.is_some());

	template.rename("cn=user02,ou=users", "cn=user03,ou=users").await?;
	assert!(ldap_search_user(&mut ldap, "user02").await?.is_none());
	assert!(ldap_search_user(&mut ldap, "user03").await?.is_some());

	assert!(matches!(
		template.unbind_recursive("ou=users", false).await,
		Err(TemplateError::ContextNotEmpty(_))
	));
	template.unbind_recursive("ou=users", true).await?;
	for name in ["cn=user01,ou=users", "cn=user03,ou=users", "ou=users"] {
		assert!(matches!(template.lookup(name).await, Err(TemplateError::NameNotFound(_))));
	}
	ldap.unbind().await?;

	Ok(())
}

#[ignore = "docker"]
#[tokio::test]
#[serial]
async fn ldap_authenticate_test() -> Result<(), Box<dyn Error>> {
	let mut ldap = ldap_connect().await?;
	ldap_cleanup_users(&mut ldap).await;
	ldap_add_organizational_unit(&mut ldap, "users").await?;
	ldap_add_user(&mut ldap, "user01", "User1").await?;
	ldap_add_user(&mut ldap, "user02", "Shared").await?;
	ldap_add_user(&mut ldap, "user03", "Shared").await?;

	let template = template();
	assert!(template.authenticate("ou=users", Filter::eq("cn", "user01"), "user01-password", None).await?);
	assert!(!template.authenticate("ou=users", Filter::eq("cn", "user01"), "wrong", None).await?);
	assert!(!template.authenticate("ou=users", Filter::eq("cn", "nobody"), "x", None).await?);
	assert!(
		!template.authenticate("ou=users", Filter::eq("sn", "Shared"), "user02-password", None).await?
	);

	template.unbind_recursive("ou=users", true).await?;
	ldap.unbind().await?;

	Ok(())
}
