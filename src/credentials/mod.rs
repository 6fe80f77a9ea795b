//! Docker-compatible credential store
//!
//! Reads a Docker `config.json` and answers credential lookups per registry
//! host. Static entries under `auths` are served directly; hosts configured
//! with `credHelpers` (or the global `credsStore`) are delegated to the
//! matching `docker-credential-<helper>` executable.

mod helper;

use crate::error::{PackageError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Key Docker stores Docker Hub credentials under
pub const DOCKER_HUB_SERVER: &str = "https://index.docker.io/v1/";
const DOCKER_HUB_HOSTS: [&str; 3] = ["docker.io", "registry-1.docker.io", "index.docker.io"];

/// Credentials for one registry; all fields empty means anonymous
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
    /// OAuth2 refresh token (Docker's `identitytoken`)
    pub refresh_token: String,
}

impl Credential {
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty() && self.refresh_token.is_empty()
    }

    pub fn has_basic(&self) -> bool {
        !self.username.is_empty() || !self.password.is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    #[serde(default)]
    creds_store: Option<String>,
    #[serde(default)]
    cred_helpers: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    identitytoken: Option<String>,
}

/// Read-only view over a Docker credentials file
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    path: Option<PathBuf>,
    auths: HashMap<String, Credential>,
    creds_store: Option<String>,
    cred_helpers: HashMap<String, String>,
}

impl CredentialStore {
    /// A store that never has credentials
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Load the store at `path`; a missing file is an empty store
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::anonymous());
        };

        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    path: Some(path.to_path_buf()),
                    ..Self::default()
                });
            }
            Err(e) => {
                return Err(PackageError::CredentialStore(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let mut store = Self::parse(&contents).map_err(|e| match e {
            PackageError::CredentialStore(msg) => {
                PackageError::CredentialStore(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    /// Parse the contents of a `config.json`
    pub fn parse(contents: &str) -> Result<Self> {
        let file: DockerConfigFile = if contents.trim().is_empty() {
            DockerConfigFile::default()
        } else {
            serde_json::from_str(contents)
                .map_err(|e| PackageError::CredentialStore(format!("malformed config: {}", e)))?
        };

        let mut auths = HashMap::new();
        for (server, entry) in file.auths {
            let credential = decode_entry(&server, entry)?;
            auths.insert(normalize_server(&server), credential);
        }

        let cred_helpers = file
            .cred_helpers
            .into_iter()
            .map(|(server, helper)| (normalize_server(&server), helper))
            .collect();

        Ok(Self {
            path: None,
            auths,
            creds_store: file.creds_store.filter(|s| !s.is_empty()),
            cred_helpers,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Credentials for a registry host such as `registry.example.com:5000`
    pub async fn get(&self, registry: &str) -> Result<Credential> {
        let key = normalize_server(registry);

        if let Some(helper_name) = self.cred_helpers.get(&key) {
            return helper::get(helper_name, &server_url(&key)).await;
        }
        if let Some(credential) = self.auths.get(&key) {
            return Ok(credential.clone());
        }
        if let Some(helper_name) = &self.creds_store {
            return helper::get(helper_name, &server_url(&key)).await;
        }

        Ok(Credential::default())
    }
}

fn decode_entry(server: &str, entry: AuthEntry) -> Result<Credential> {
    let mut credential = Credential {
        username: entry.username.unwrap_or_default(),
        password: entry.password.unwrap_or_default(),
        refresh_token: entry.identitytoken.unwrap_or_default(),
    };

    if let Some(auth) = entry.auth.filter(|a| !a.is_empty()) {
        let decoded = STANDARD.decode(auth.trim()).map_err(|e| {
            PackageError::CredentialStore(format!("invalid auth for {}: {}", server, e))
        })?;
        let decoded = String::from_utf8(decoded).map_err(|e| {
            PackageError::CredentialStore(format!("invalid auth for {}: {}", server, e))
        })?;
        let (username, password) = decoded.split_once(':').ok_or_else(|| {
            PackageError::CredentialStore(format!(
                "invalid auth for {}: expected username:password",
                server
            ))
        })?;
        credential.username = username.to_string();
        credential.password = password.to_string();
    }

    Ok(credential)
}

/// Reduce `https://host/v1/` style keys to the bare host
fn normalize_server(server: &str) -> String {
    let without_scheme = server
        .strip_prefix("https://")
        .or_else(|| server.strip_prefix("http://"))
        .unwrap_or(server);
    let host = without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_ascii_lowercase();

    if DOCKER_HUB_HOSTS.contains(&host.as_str()) {
        "index.docker.io".to_string()
    } else {
        host
    }
}

/// Server URL handed to credential helpers
fn server_url(key: &str) -> String {
    if key == "index.docker.io" {
        DOCKER_HUB_SERVER.to_string()
    } else {
        key.to_string()
    }
}
