//! Authenticating registry client
//!
//! Wraps the retrying HTTP client with the registry auth handshake: a `401`
//! carrying a `WWW-Authenticate` challenge is answered with basic credentials
//! or a bearer token obtained from the challenge realm, and the resulting
//! `Authorization` header is cached per registry and scope.

use crate::credentials::{Credential, CredentialStore};
use crate::error::handlers::HttpErrorHandler;
use crate::error::{PackageError, Result};
use crate::logging::Logger;
use crate::registry::retry::RetryClient;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue, WWW_AUTHENTICATE};
use reqwest::{Method, Request, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

/// Client id sent with OAuth2 refresh-token grants
const OAUTH2_CLIENT_ID: &str = "package-oci";

/// Parsed `WWW-Authenticate` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChallenge {
    Basic,
    Bearer {
        realm: String,
        service: String,
        scope: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// What a request needs access to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthScope {
    pub registry: String,
    pub repository: String,
    pub push: bool,
}

impl AuthScope {
    pub fn pull(registry: &str, repository: &str) -> Self {
        Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            push: false,
        }
    }

    pub fn push(registry: &str, repository: &str) -> Self {
        Self {
            push: true,
            ..Self::pull(registry, repository)
        }
    }

    /// Token scope string, e.g. `repository:pkg:pull,push`
    pub fn scope(&self) -> String {
        let actions = if self.push { "pull,push" } else { "pull" };
        format!("repository:{}:{}", self.repository, actions)
    }
}

/// In-memory cache of `Authorization` header values keyed by registry and scope
#[derive(Debug, Default)]
pub struct AuthCache {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl AuthCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, registry: &str, scope: &str) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(&(registry.to_string(), scope.to_string()))
            .cloned()
    }

    fn set(&self, registry: &str, scope: &str, header: String) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert((registry.to_string(), scope.to_string()), header);
        }
    }
}

/// HTTP client that resolves registry credentials on demand
#[derive(Debug)]
pub struct AuthClient {
    client: RetryClient,
    cache: AuthCache,
    credentials: CredentialStore,
    logger: Logger,
}

impl AuthClient {
    pub fn new(client: RetryClient, credentials: CredentialStore, logger: Logger) -> Self {
        Self {
            client,
            cache: AuthCache::new(),
            credentials,
            logger,
        }
    }

    /// Start building a request; send it with [`AuthClient::send`]
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.http().request(method, url)
    }

    /// Send a request, answering an auth challenge once if the registry asks
    pub async fn send(&self, mut request: Request, scope: &AuthScope) -> Result<Response> {
        let scope_key = scope.scope();
        if let Some(header) = self.cache.get(&scope.registry, &scope_key) {
            set_authorization(&mut request, &header)?;
        }

        let mut retry = request.try_clone().ok_or_else(|| {
            PackageError::Transfer("request body cannot be replayed".to_string())
        })?;
        let response = self.client.send(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(challenge) = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|h| h.to_str().ok())
            .and_then(parse_auth_challenge)
        else {
            return Ok(response);
        };

        let credential = self.credentials.get(&scope.registry).await?;
        let header = match challenge {
            AuthChallenge::Basic => {
                if !credential.has_basic() {
                    self.logger
                        .verbose(&format!("No credentials for {}", scope.registry));
                    return Ok(response);
                }
                self.logger
                    .verbose(&format!("Using basic authentication for {}", scope.registry));
                basic_header(&credential)
            }
            AuthChallenge::Bearer {
                realm,
                service,
                scope: challenge_scope,
            } => {
                let scopes = merge_scopes(&scope_key, challenge_scope.as_deref());
                self.logger.verbose(&format!(
                    "Requesting token from {} for {}",
                    realm,
                    scopes.join(" ")
                ));
                let token = self.fetch_token(&realm, &service, &scopes, &credential).await?;
                format!("Bearer {}", token)
            }
        };

        self.cache.set(&scope.registry, &scope_key, header.clone());
        set_authorization(&mut retry, &header)?;
        self.client.send(retry).await
    }

    async fn fetch_token(
        &self,
        realm: &str,
        service: &str,
        scopes: &[String],
        credential: &Credential,
    ) -> Result<String> {
        let mut url = Url::parse(realm)
            .map_err(|e| PackageError::Transfer(format!("invalid auth realm '{}': {}", realm, e)))?;

        let request = if !credential.refresh_token.is_empty() {
            let body = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("grant_type", "refresh_token")
                .append_pair("refresh_token", &credential.refresh_token)
                .append_pair("service", service)
                .append_pair("scope", &scopes.join(" "))
                .append_pair("client_id", OAUTH2_CLIENT_ID)
                .finish();
            self.client
                .http()
                .post(url)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body)
        } else {
            {
                let mut query = url.query_pairs_mut();
                if !service.is_empty() {
                    query.append_pair("service", service);
                }
                for scope in scopes {
                    query.append_pair("scope", scope);
                }
            }
            let builder = self.client.http().get(url);
            if credential.has_basic() {
                builder.basic_auth(&credential.username, Some(&credential.password))
            } else {
                builder
            }
        };

        let request = request.build()?;
        let response = self.client.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HttpErrorHandler::handle_auth_error(status, &body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PackageError::Transfer(format!("Failed to parse token response: {}", e)))?;
        token
            .token
            .filter(|t| !t.is_empty())
            .or(token.access_token.filter(|t| !t.is_empty()))
            .ok_or_else(|| PackageError::Transfer("token response carried no token".to_string()))
    }
}

fn set_authorization(request: &mut Request, header: &str) -> Result<()> {
    let value = HeaderValue::from_str(header)
        .map_err(|e| PackageError::Transfer(format!("invalid authorization header: {}", e)))?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

fn basic_header(credential: &Credential) -> String {
    let raw = format!("{}:{}", credential.username, credential.password);
    format!("Basic {}", STANDARD.encode(raw))
}

/// Requested scope first, then any extra scopes the challenge names
fn merge_scopes(requested: &str, challenge: Option<&str>) -> Vec<String> {
    let mut scopes = vec![requested.to_string()];
    for scope in challenge.unwrap_or_default().split_whitespace() {
        if !scopes.iter().any(|s| s == scope) {
            scopes.push(scope.to_string());
        }
    }
    scopes
}

/// Parse `Basic realm=".."` or `Bearer realm="..",service="..",scope=".."`
///
/// Quoted values may contain commas, as in `scope="repository:a:pull,push"`.
pub fn parse_auth_challenge(header: &str) -> Option<AuthChallenge> {
    let header = header.trim();
    let (scheme, params) = match header.split_once(' ') {
        Some((scheme, params)) => (scheme, params),
        None => (header, ""),
    };

    if scheme.eq_ignore_ascii_case("basic") {
        return Some(AuthChallenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let params = parse_params(params);
    let realm = params.get("realm")?.clone();
    Some(AuthChallenge::Bearer {
        realm,
        service: params.get("service").cloned().unwrap_or_default(),
        scope: params.get("scope").cloned(),
    })
}

fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.extend(chars.next()),
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
        }

        params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    params
}
