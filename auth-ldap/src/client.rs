//! Directory client capability
//!
//! One abstract client over the directory wire protocol, with a single
//! concrete ldap3 backend selected when the authenticator is constructed.
//! Connections are scoped resources: the authenticator opens a fresh one
//! per phase of a login call and unbinds it on every exit path.

use std::collections::HashMap;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use native_tls::{Certificate, Identity, TlsConnector};

use crate::config::{LdapConfig, TlsOptions};
use crate::error::{AuthError, DirectoryError};

/// LDAP result code for invalidCredentials.
const RC_INVALID_CREDENTIALS: u32 = 49;

/// Result of a bind attempt. A rejected credential is a value, not an
/// error; every other non-success result code surfaces as
/// [`DirectoryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    Bound,
    InvalidCredentials,
}

/// A single directory entry returned by a search.
#[derive(Debug, Clone, Default)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

/// One connection to the directory.
#[async_trait]
pub trait DirectoryClient: Send {
    /// Authenticate the connection as `dn`.
    async fn bind(&mut self, dn: &str, secret: &str) -> Result<BindOutcome, DirectoryError>;

    /// Subtree search under `base`, returning the listed attributes.
    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    /// Close the connection.
    async fn unbind(&mut self) -> Result<(), DirectoryError>;
}

/// Opens directory connections; one per phase of a login call.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DirectoryClient>, DirectoryError>;
}

/// ldap3-backed connector.
///
/// Connection settings, including the TLS trust material, are assembled
/// once at construction and reused for every connection.
pub struct Ldap3Connector {
    uri: String,
    settings: LdapConnSettings,
}

impl Ldap3Connector {
    /// Build the connector, loading TLS material eagerly so that a broken
    /// TLS setup fails here instead of on the first login.
    pub fn from_config(config: &LdapConfig) -> Result<Self, AuthError> {
        let mut settings = LdapConnSettings::new().set_conn_timeout(config.timeout);
        if let Some(tls) = &config.tls {
            settings = settings
                .set_connector(tls_connector(tls)?)
                .set_no_tls_verify(!tls.verify_peer);
        }
        Ok(Self {
            uri: config.uri.clone(),
            settings,
        })
    }
}

#[async_trait]
impl DirectoryConnector for Ldap3Connector {
    async fn connect(&self) -> Result<Box<dyn DirectoryClient>, DirectoryError> {
        let (conn, ldap) = LdapConnAsync::with_settings(self.settings.clone(), &self.uri).await?;
        ldap3::drive!(conn);
        Ok(Box::new(Ldap3Client { ldap }))
    }
}

struct Ldap3Client {
    ldap: Ldap,
}

#[async_trait]
impl DirectoryClient for Ldap3Client {
    async fn bind(&mut self, dn: &str, secret: &str) -> Result<BindOutcome, DirectoryError> {
        let res = self.ldap.simple_bind(dn, secret).await?;
        if res.rc == RC_INVALID_CREDENTIALS {
            return Ok(BindOutcome::InvalidCredentials);
        }
        res.success()?;
        Ok(BindOutcome::Bound)
    }

    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let (entries, _) = self
            .ldap
            .search(base, Scope::Subtree, filter, attrs.to_vec())
            .await?
            .success()?;
        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| DirectoryEntry {
                dn: entry.dn,
                attrs: entry.attrs,
            })
            .collect())
    }

    async fn unbind(&mut self) -> Result<(), DirectoryError> {
        self.ldap.unbind().await?;
        Ok(())
    }
}

/// Assemble the TLS connector from the configured trust material. Every
/// field must resolve; a partial TLS setup is a configuration error.
fn tls_connector(tls: &TlsOptions) -> Result<TlsConnector, AuthError> {
    let mut builder = TlsConnector::builder();

    let ca = std::fs::read(&tls.ca_file).map_err(|e| {
        AuthError::Configuration(format!("cannot read CA bundle {}: {}", tls.ca_file.display(), e))
    })?;
    let blocks = pem::parse_many(&ca).map_err(|e| {
        AuthError::Configuration(format!("invalid CA bundle {}: {}", tls.ca_file.display(), e))
    })?;
    if blocks.is_empty() {
        return Err(AuthError::Configuration(format!(
            "no certificates in CA bundle {}",
            tls.ca_file.display()
        )));
    }
    for block in &blocks {
        let cert = Certificate::from_der(block.contents()).map_err(|e| {
            AuthError::Configuration(format!(
                "invalid certificate in {}: {}",
                tls.ca_file.display(),
                e
            ))
        })?;
        builder.add_root_certificate(cert);
    }

    let cert = std::fs::read(&tls.cert_file).map_err(|e| {
        AuthError::Configuration(format!(
            "cannot read client certificate {}: {}",
            tls.cert_file.display(),
            e
        ))
    })?;
    let key = std::fs::read(&tls.key_file).map_err(|e| {
        AuthError::Configuration(format!(
            "cannot read client key {}: {}",
            tls.key_file.display(),
            e
        ))
    })?;
    let identity = Identity::from_pkcs8(&cert, &key)
        .map_err(|e| AuthError::Configuration(format!("invalid client identity: {}", e)))?;
    builder.identity(identity);

    builder.min_protocol_version(Some(tls.min_version.into()));
    if !tls.verify_peer {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }

    builder
        .build()
        .map_err(|e| AuthError::Configuration(format!("TLS setup failed: {}", e)))
}
