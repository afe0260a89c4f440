//! LDAP configuration
//!
//! Owned by the host's config loader and handed to the authenticator once
//! at startup; never mutated afterwards. The reader identity may be
//! overridden through the process environment, resolved a single time when
//! the authenticator is built.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use ldap3::ldap_escape;
use url::Url;

use crate::error::AuthError;

/// Placeholder in the search filter template, substituted with the
/// (escaped) login name.
pub const USERNAME_PLACEHOLDER: &str = "{username}";

/// Environment variable overriding [`LdapConfig::reader_dn`].
pub const ENV_READER_DN: &str = "AUTH_LDAP_READER_DN";
/// Environment variable overriding [`LdapConfig::reader_secret`].
pub const ENV_READER_SECRET: &str = "AUTH_LDAP_SECRET";

/// LDAP configuration
#[derive(Clone)]
pub struct LdapConfig {
    /// Directory endpoint, `ldap://` or `ldaps://`.
    pub uri: String,
    /// Subtree root under which user search is scoped.
    pub base_dn: String,
    /// DN of a directory user with read access to the user accounts.
    pub reader_dn: String,
    /// Password of the reader DN. Never logged.
    pub reader_secret: String,
    /// Search filter template containing [`USERNAME_PLACEHOLDER`].
    pub filter: String,
    /// Whether to resolve group memberships after a successful login.
    pub load_groups: bool,
    /// Connect timeout enforced by the transport.
    pub timeout: Duration,
    /// TLS material, required when the URI requests encrypted transport.
    pub tls: Option<TlsOptions>,
}

impl Default for LdapConfig {
    fn default() -> Self {
        Self {
            uri: "ldap://localhost:389".to_string(),
            base_dn: "dc=example,dc=com".to_string(),
            reader_dn: String::new(),
            reader_secret: String::new(),
            filter: "(uid={username})".to_string(),
            load_groups: false,
            timeout: Duration::from_secs(5),
            tls: None,
        }
    }
}

impl fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdapConfig")
            .field("uri", &self.uri)
            .field("base_dn", &self.base_dn)
            .field("reader_dn", &self.reader_dn)
            .field("reader_secret", &"<redacted>")
            .field("filter", &self.filter)
            .field("load_groups", &self.load_groups)
            .field("timeout", &self.timeout)
            .field("tls", &self.tls)
            .finish()
    }
}

impl LdapConfig {
    /// Overlay the reader identity from the process environment. The
    /// environment takes precedence over file-provided values.
    pub fn apply_env_overrides(&mut self) {
        self.overlay(|name| std::env::var(name).ok());
    }

    fn overlay(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dn) = var(ENV_READER_DN) {
            self.reader_dn = dn;
        }
        if let Some(secret) = var(ENV_READER_SECRET) {
            self.reader_secret = secret;
        }
    }

    /// Reject setups that cannot work, before the first login attempt.
    pub fn validate(&self) -> Result<(), AuthError> {
        let url = Url::parse(&self.uri)
            .map_err(|e| AuthError::Configuration(format!("invalid LDAP URI {}: {}", self.uri, e)))?;
        match url.scheme() {
            "ldap" => {}
            "ldaps" => {
                if self.tls.is_none() {
                    return Err(AuthError::Configuration(
                        "ldaps transport requested but TLS options are missing".to_string(),
                    ));
                }
            }
            other => {
                return Err(AuthError::Configuration(format!(
                    "unsupported LDAP URI scheme: {}",
                    other
                )));
            }
        }
        if !self.filter.contains(USERNAME_PLACEHOLDER) {
            return Err(AuthError::Configuration(format!(
                "search filter {:?} is missing the {} placeholder",
                self.filter, USERNAME_PLACEHOLDER
            )));
        }
        Ok(())
    }

    /// Substitute the login name into the filter template. LDAP filter
    /// metacharacters in the name are escaped.
    pub fn build_filter(&self, username: &str) -> String {
        self.filter
            .replace(USERNAME_PLACEHOLDER, ldap_escape(username).as_ref())
    }
}

/// TLS material for encrypted directory transport.
///
/// All fields are required: a partially specified TLS setup is rejected
/// when the authenticator is built, never silently skipped.
#[derive(Debug, Clone)]
pub struct TlsOptions {
    /// Client private key (PEM, PKCS#8).
    pub key_file: PathBuf,
    /// Client certificate (PEM).
    pub cert_file: PathBuf,
    /// CA certificate bundle used as the trust anchor (PEM).
    pub ca_file: PathBuf,
    /// Minimum accepted protocol version.
    pub min_version: TlsVersion,
    /// Verify the server certificate against the trust anchor.
    pub verify_peer: bool,
}

/// Minimum accepted TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    Tlsv10,
    Tlsv11,
    #[default]
    Tlsv12,
}

impl From<TlsVersion> for native_tls::Protocol {
    fn from(val: TlsVersion) -> Self {
        match val {
            TlsVersion::Tlsv10 => native_tls::Protocol::Tlsv10,
            TlsVersion::Tlsv11 => native_tls::Protocol::Tlsv11,
            TlsVersion::Tlsv12 => native_tls::Protocol::Tlsv12,
        }
    }
}
