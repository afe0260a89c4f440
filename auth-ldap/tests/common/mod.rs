// Common test utilities

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dav_auth_ldap::client::{BindOutcome, DirectoryClient, DirectoryConnector, DirectoryEntry};
use dav_auth_ldap::error::DirectoryError;

pub const READER_DN: &str = "cn=reader,dc=example,dc=com";
pub const READER_SECRET: &str = "readersecret";

/// An account known to the scripted directory.
pub struct MockUser {
    pub uid: String,
    pub dn: String,
    pub password: String,
    pub member_of: Vec<String>,
}

impl MockUser {
    pub fn new(uid: &str, password: &str) -> Self {
        Self {
            uid: uid.to_string(),
            dn: format!("uid={},ou=people,dc=example,dc=com", uid),
            password: password.to_string(),
            member_of: Vec::new(),
        }
    }

    pub fn member_of(mut self, groups: &[&str]) -> Self {
        self.member_of = groups.iter().map(|g| g.to_string()).collect();
        self
    }
}

/// Everything the scripted directory observed, for assertions.
#[derive(Default)]
pub struct CallLog {
    pub connects: usize,
    pub open: usize,
    pub bound_dns: Vec<String>,
    pub filters: Vec<String>,
    pub searched_attrs: Vec<Vec<String>>,
}

/// Scripted in-memory directory server.
#[derive(Default)]
pub struct MockDirectory {
    pub users: Vec<MockUser>,
    /// Refuse connections after the first one, simulating the directory
    /// going away between the resolve and verify phases.
    pub fail_second_connect: bool,
    pub calls: Mutex<CallLog>,
}

impl MockDirectory {
    pub fn with_users(users: Vec<MockUser>) -> Arc<Self> {
        Arc::new(Self {
            users,
            ..Default::default()
        })
    }
}

/// Transparent wrapper so the connector trait can be implemented on a
/// shared directory handle. Implementing a foreign trait directly on
/// `Arc<MockDirectory>` is forbidden by the orphan rule from this external
/// test crate (`Arc` is not `#[fundamental]`); a local newtype sidesteps
/// that without changing any observed behavior.
pub struct MockConnector(pub Arc<MockDirectory>);

#[async_trait]
impl DirectoryConnector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn DirectoryClient>, DirectoryError> {
        let mut calls = self.0.calls.lock().unwrap();
        calls.connects += 1;
        if self.0.fail_second_connect && calls.connects > 1 {
            return Err(DirectoryError::Unavailable(
                "connection refused".to_string(),
            ));
        }
        calls.open += 1;
        Ok(Box::new(MockConnection {
            dir: Arc::clone(&self.0),
        }))
    }
}

struct MockConnection {
    dir: Arc<MockDirectory>,
}

#[async_trait]
impl DirectoryClient for MockConnection {
    async fn bind(&mut self, dn: &str, secret: &str) -> Result<BindOutcome, DirectoryError> {
        self.dir
            .calls
            .lock()
            .unwrap()
            .bound_dns
            .push(dn.to_string());

        if dn == READER_DN {
            return Ok(if secret == READER_SECRET {
                BindOutcome::Bound
            } else {
                BindOutcome::InvalidCredentials
            });
        }
        match self.dir.users.iter().find(|u| u.dn == dn) {
            Some(user) if user.password == secret => Ok(BindOutcome::Bound),
            _ => Ok(BindOutcome::InvalidCredentials),
        }
    }

    async fn search(
        &mut self,
        _base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        {
            let mut calls = self.dir.calls.lock().unwrap();
            calls.filters.push(filter.to_string());
            calls
                .searched_attrs
                .push(attrs.iter().map(|a| a.to_string()).collect());
        }

        let want_groups = attrs.contains(&"memberOf");
        Ok(self
            .dir
            .users
            .iter()
            .filter(|u| filter.contains(&format!("={}", u.uid)))
            .map(|u| {
                let mut entry_attrs = HashMap::new();
                if want_groups && !u.member_of.is_empty() {
                    entry_attrs.insert("memberOf".to_string(), u.member_of.clone());
                }
                DirectoryEntry {
                    dn: u.dn.clone(),
                    attrs: entry_attrs,
                }
            })
            .collect())
    }

    async fn unbind(&mut self) -> Result<(), DirectoryError> {
        self.dir.calls.lock().unwrap().open -= 1;
        Ok(())
    }
}
