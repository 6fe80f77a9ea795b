//! Error types and handlers for package transfer operations

pub mod handlers;

use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PackageError>;

#[derive(Error, Debug)]
pub enum PackageError {
    /// Credential store unreadable, malformed, or a credential helper failed
    #[error("Credential store error: {0}")]
    CredentialStore(String),

    /// Malformed registry reference
    #[error("Invalid reference '{reference}': {reason}")]
    ReferenceParse { reference: String, reason: String },

    /// Local directory inaccessible, unreadable or unhashable
    #[error(
        "Local store error{}: {message}",
        .path.as_ref().map(|p| format!(" at {}", p.display())).unwrap_or_default()
    )]
    LocalStore {
        message: String,
        path: Option<PathBuf>,
    },

    /// Manifest construction or encoding failure
    #[error("Manifest pack error: {0}")]
    ManifestPack(String),

    /// Tag rejected by the local store
    #[error("Tag error for '{reference}': {message}")]
    Tag { reference: String, message: String },

    /// Remote copy failure: network, auth, protocol or remote rejection
    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl PackageError {
    pub fn reference_parse(reference: &str, reason: impl Into<String>) -> Self {
        PackageError::ReferenceParse {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }

    pub fn local_store(message: impl Into<String>, path: Option<&Path>) -> Self {
        PackageError::LocalStore {
            message: message.into(),
            path: path.map(Path::to_path_buf),
        }
    }

    pub fn tag(reference: &str, message: impl Into<String>) -> Self {
        PackageError::Tag {
            reference: reference.to_string(),
            message: message.into(),
        }
    }

    /// Fold any failure raised while copying into a transfer error.
    ///
    /// Cancellation passes through untouched so callers can still tell it apart.
    pub fn into_transfer(self) -> Self {
        match self {
            PackageError::Transfer(_) | PackageError::Cancelled => self,
            other => PackageError::Transfer(other.to_string()),
        }
    }
}

impl From<std::io::Error> for PackageError {
    fn from(err: std::io::Error) -> Self {
        PackageError::LocalStore {
            message: err.to_string(),
            path: None,
        }
    }
}

impl From<reqwest::Error> for PackageError {
    fn from(err: reqwest::Error) -> Self {
        handlers::NetworkErrorHandler::handle_network_error(&err, "registry request")
    }
}
