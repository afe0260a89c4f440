//! Error types for the LDAP authenticator

use thiserror::Error;

/// Failures surfaced to the host's authentication dispatch.
///
/// A wrong password or an unknown user is not an error: `login` answers
/// those with `Ok(None)`. Everything here means the directory integration
/// itself is broken and should alert operators.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The directory integration is misconfigured: reader bind rejected,
    /// search setup failed, or TLS material did not load.
    #[error("invalid LDAP configuration: {0}")]
    Configuration(String),

    /// The directory became unreachable while verifying the user's
    /// password. Distinct from a wrong password, which is a quiet result.
    #[error("LDAP transport failure: {0}")]
    Transport(String),
}

/// Errors produced by a [`DirectoryClient`](crate::client::DirectoryClient)
/// implementation.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Ldap(#[from] ldap3::LdapError),

    /// The directory endpoint could not be reached.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}
