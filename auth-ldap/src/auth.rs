//! LDAP credential validation
//!
//! Two-phase login against a directory server:
//! - Resolve: bind with a read-only reader identity and search for the DN
//!   of the user to authenticate
//! - Verify: bind again as the resolved DN with the supplied password
//!
//! The reader identity is only ever used to search; the user's own bind is
//! the sole authority for success or failure.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::{BindOutcome, DirectoryClient, DirectoryConnector, Ldap3Connector};
use crate::config::LdapConfig;
use crate::error::AuthError;

/// Attribute holding group membership DNs.
const GROUP_ATTR: &str = "memberOf";
/// OID selector asking the server to return no attributes at all.
const NO_ATTRS: &str = "1.1";

/// Identity resolved by a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// The login name, returned unchanged.
    pub username: String,
    /// Group names parsed from the membership attribute; empty unless
    /// group loading is enabled.
    pub groups: HashSet<String>,
}

/// DN and raw membership values captured during the resolve phase.
struct ResolvedUser {
    dn: String,
    member_of: Vec<String>,
}

/// Validates username/password pairs against a directory server.
///
/// Stateless across calls apart from the immutable configuration; safe for
/// concurrent use. Every login opens and closes its own connections.
pub struct LdapAuthenticator {
    config: LdapConfig,
    connector: Arc<dyn DirectoryConnector>,
}

impl LdapAuthenticator {
    /// Build an authenticator backed by the ldap3 client. Environment
    /// overrides for the reader identity are resolved here, and invalid
    /// configuration (bad URI, missing filter placeholder, unloadable TLS
    /// material) is rejected before the first login attempt.
    pub fn new(config: LdapConfig) -> Result<Self, AuthError> {
        let mut config = config;
        config.apply_env_overrides();
        config.validate()?;
        let connector = Arc::new(Ldap3Connector::from_config(&config)?);
        Ok(Self::with_connector(config, connector))
    }

    /// Wire up an alternative directory backend.
    pub fn with_connector(config: LdapConfig, connector: Arc<dyn DirectoryConnector>) -> Self {
        info!("LDAP authenticator initialized for {}", config.uri);
        Self { config, connector }
    }

    /// Validate credentials.
    ///
    /// Returns `Ok(Some(_))` with the original username on success and
    /// `Ok(None)` for an unknown user or a wrong password. Configuration
    /// and transport problems are raised, never folded into a quiet
    /// failure.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<AuthenticatedUser>, AuthError> {
        // An empty password would be sent as an anonymous bind, which the
        // server answers with success.
        if password.is_empty() {
            return Ok(None);
        }

        let resolved = match self.resolve(username).await? {
            Some(resolved) => resolved,
            None => return Ok(None),
        };

        self.verify(resolved, username, password).await
    }

    /// Phase 1: bind as the reader and search for the user's DN.
    async fn resolve(&self, username: &str) -> Result<Option<ResolvedUser>, AuthError> {
        let mut conn = self
            .connector
            .connect()
            .await
            .map_err(|e| AuthError::Configuration(format!("LDAP connection failed: {}", e)))?;
        let outcome = self.resolve_with(conn.as_mut(), username).await;
        let _ = conn.unbind().await;
        outcome
    }

    async fn resolve_with(
        &self,
        conn: &mut dyn DirectoryClient,
        username: &str,
    ) -> Result<Option<ResolvedUser>, AuthError> {
        match conn
            .bind(&self.config.reader_dn, &self.config.reader_secret)
            .await
        {
            Ok(BindOutcome::Bound) => {}
            Ok(BindOutcome::InvalidCredentials) => {
                return Err(AuthError::Configuration(
                    "LDAP reader credentials rejected".to_string(),
                ));
            }
            Err(e) => {
                return Err(AuthError::Configuration(format!(
                    "LDAP reader bind failed: {}",
                    e
                )));
            }
        }

        let filter = self.config.build_filter(username);
        let attrs = if self.config.load_groups {
            vec![GROUP_ATTR]
        } else {
            vec![NO_ATTRS]
        };
        let entries = conn
            .search(&self.config.base_dn, &filter, &attrs)
            .await
            .map_err(|e| AuthError::Configuration(format!("LDAP search failed: {}", e)))?;

        let mut entries = entries.into_iter();
        let mut entry = match entries.next() {
            Some(entry) => entry,
            None => {
                debug!("LDAP search returned no results");
                return Ok(None);
            }
        };
        if entries.next().is_some() {
            debug!("LDAP search returned more than one entry, using the first");
        }
        debug!("LDAP auth user: {}", entry.dn);

        let member_of = entry.attrs.remove(GROUP_ATTR).unwrap_or_default();
        Ok(Some(ResolvedUser {
            dn: entry.dn,
            member_of,
        }))
    }

    /// Phase 2: bind as the resolved DN with the caller's password.
    async fn verify(
        &self,
        user: ResolvedUser,
        username: &str,
        password: &str,
    ) -> Result<Option<AuthenticatedUser>, AuthError> {
        let mut conn = self
            .connector
            .connect()
            .await
            .map_err(|e| AuthError::Transport(format!("LDAP connection failed: {}", e)))?;
        let outcome = conn.bind(&user.dn, password).await;
        let _ = conn.unbind().await;

        match outcome {
            Ok(BindOutcome::Bound) => {}
            Ok(BindOutcome::InvalidCredentials) => return Ok(None),
            Err(e) => {
                return Err(AuthError::Transport(format!("LDAP bind failed: {}", e)));
            }
        }

        let groups = if self.config.load_groups {
            let groups = group_names(&user.member_of);
            debug!("LDAP auth groups of user: {:?}", groups);
            groups
        } else {
            HashSet::new()
        };

        Ok(Some(AuthenticatedUser {
            username: username.to_string(),
            groups,
        }))
    }
}

/// Leading RDN value of each membership DN, deduplicated:
/// `cn=admins,ou=groups,dc=x` becomes `admins`.
fn group_names(member_of: &[String]) -> HashSet<String> {
    member_of
        .iter()
        .filter_map(|dn| dn.split(',').next())
        .filter_map(|rdn| rdn.split_once('='))
        .map(|(_, name)| name.to_string())
        .collect()
}
