//! Registry module for OCI registry interactions
//!
//! This module provides the retrying HTTP client, the registry auth handshake
//! and the remote repository handle used as a copy source or destination.

pub mod auth;
pub mod repository;
pub mod retry;

pub use auth::{AuthClient, AuthScope};
pub use repository::Repository;
pub use retry::{RetryClient, RetryPolicy};

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::Result;
use crate::logging::Logger;

/// Build the authenticating client: retrying base client, fresh token cache
/// and the given store as credential source.
pub fn authenticating_client(
    credentials: CredentialStore,
    config: &Config,
    logger: Logger,
) -> Result<AuthClient> {
    let base = RetryClient::new(config, logger.clone())?;
    Ok(AuthClient::new(base, credentials, logger))
}
