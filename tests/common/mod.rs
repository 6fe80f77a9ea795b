//! In-memory OCI registry for integration tests
//!
//! Serves the subset of the distribution API the tool uses, optionally behind
//! basic auth or a bearer token handshake, and counts every request it receives.

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const TEST_TOKEN: &str = "test-registry-token";

#[derive(Debug, Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// How the registry guards `/v2/`
#[derive(Debug, Clone)]
pub enum AuthMode {
    /// `WWW-Authenticate: Basic`; every request carries the credentials
    Basic(BasicCredentials),
    /// Bearer challenge; tokens come from `GET /token` with basic credentials
    /// or from a `POST /token` refresh-token grant
    Bearer {
        credentials: Option<BasicCredentials>,
        refresh_token: Option<String>,
    },
}

impl BasicCredentials {
    fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn header(&self) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", self.username, self.password)))
    }
}

#[derive(Default)]
pub struct RegistryState {
    /// (repository, digest) to blob bytes
    blobs: Mutex<HashMap<(String, String), Vec<u8>>>,
    /// (repository, tag or digest) to (media type, manifest bytes)
    manifests: Mutex<HashMap<(String, String), (String, Vec<u8>)>>,
    /// Upload session id to repository
    uploads: Mutex<HashMap<String, String>>,
    requests: AtomicUsize,
    token_requests: AtomicUsize,
    refresh_grants: AtomicUsize,
    auth: Option<AuthMode>,
    addr: String,
}

impl RegistryState {
    fn record(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct TestRegistry {
    pub state: Arc<RegistryState>,
    pub addr: String,
    server: JoinHandle<()>,
}

impl TestRegistry {
    /// Anonymous registry
    pub async fn start() -> Self {
        Self::start_with(None).await
    }

    /// Registry that answers `401` with a bearer challenge until a token is presented
    pub async fn start_with_auth(username: &str, password: &str) -> Self {
        Self::start_with(Some(AuthMode::Bearer {
            credentials: Some(BasicCredentials::new(username, password)),
            refresh_token: None,
        }))
        .await
    }

    /// Registry that answers `401` with a basic challenge
    pub async fn start_with_basic_auth(username: &str, password: &str) -> Self {
        Self::start_with(Some(AuthMode::Basic(BasicCredentials::new(username, password)))).await
    }

    /// Bearer registry whose token endpoint only honours a refresh-token grant
    pub async fn start_with_refresh_token(refresh_token: &str) -> Self {
        Self::start_with(Some(AuthMode::Bearer {
            credentials: None,
            refresh_token: Some(refresh_token.to_string()),
        }))
        .await
    }

    async fn start_with(auth: Option<AuthMode>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(RegistryState {
            auth,
            addr: addr.clone(),
            ..RegistryState::default()
        });

        let app = Router::new()
            .route("/token", get(issue_token).post(refresh_grant))
            .route("/v2/{*path}", any(distribution))
            .with_state(Arc::clone(&state));

        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            addr,
            server,
        }
    }

    pub fn reference(&self, repository_and_tag: &str) -> String {
        format!("{}/{}", self.addr, repository_and_tag)
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub fn token_request_count(&self) -> usize {
        self.state.token_requests.load(Ordering::SeqCst)
    }

    pub fn refresh_grant_count(&self) -> usize {
        self.state.refresh_grants.load(Ordering::SeqCst)
    }

    pub fn blob_count(&self) -> usize {
        self.state.blobs.lock().unwrap().len()
    }

    /// Store a manifest under `tag` and its digest without checking what it references
    pub fn insert_manifest(&self, repository: &str, tag: &str, media_type: &str, content: &[u8]) -> String {
        let digest = sha256_digest(content);
        let mut manifests = self.state.manifests.lock().unwrap();
        for reference in [tag, digest.as_str()] {
            manifests.insert(
                (repository.to_string(), reference.to_string()),
                (media_type.to_string(), content.to_vec()),
            );
        }
        digest
    }

    /// Media type and bytes of a manifest by tag or digest
    pub fn manifest(&self, repository: &str, reference: &str) -> Option<(String, Vec<u8>)> {
        self.state
            .manifests
            .lock()
            .unwrap()
            .get(&(repository.to_string(), reference.to_string()))
            .cloned()
    }
}

impl Drop for TestRegistry {
    fn drop(&mut self) {
        self.server.abort();
    }
}

pub fn sha256_digest(content: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content)))
}

/// Every file beneath `root`, keyed by its relative path
pub fn read_tree(root: &Path) -> HashMap<String, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, files: &mut HashMap<String, Vec<u8>>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, files);
            } else {
                let relative = path.strip_prefix(root).unwrap().to_string_lossy().into_owned();
                files.insert(relative, std::fs::read(&path).unwrap());
            }
        }
    }

    let mut files = HashMap::new();
    walk(root, root, &mut files);
    files
}

async fn issue_token(
    State(state): State<Arc<RegistryState>>,
    headers: HeaderMap,
) -> Response {
    state.record();
    state.token_requests.fetch_add(1, Ordering::SeqCst);

    let Some(AuthMode::Bearer {
        credentials: Some(expected),
        ..
    }) = &state.auth
    else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());
    if presented != Some(expected.header().as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    axum::Json(serde_json::json!({ "token": TEST_TOKEN })).into_response()
}

/// OAuth2 `grant_type=refresh_token` form post
async fn refresh_grant(State(state): State<Arc<RegistryState>>, body: Bytes) -> Response {
    state.record();
    state.token_requests.fetch_add(1, Ordering::SeqCst);

    let Some(AuthMode::Bearer {
        refresh_token: Some(expected),
        ..
    }) = &state.auth
    else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let form: HashMap<String, String> = url::form_urlencoded::parse(&body).into_owned().collect();
    let granted = form.get("grant_type").map(String::as_str) == Some("refresh_token")
        && form.get("refresh_token") == Some(expected)
        && form.get("scope").is_some_and(|scope| scope.starts_with("repository:"));
    if !granted {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    state.refresh_grants.fetch_add(1, Ordering::SeqCst);
    axum::Json(serde_json::json!({ "access_token": TEST_TOKEN })).into_response()
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = serde_json::json!({ "errors": [{ "code": code, "message": message }] });
    (status, axum::Json(body)).into_response()
}

fn challenge(state: &RegistryState, repository: &str) -> Response {
    let value = match &state.auth {
        Some(AuthMode::Basic(_)) => r#"Basic realm="test-registry""#.to_string(),
        _ => format!(
            r#"Bearer realm="http://{}/token",service="test-registry",scope="repository:{}:pull""#,
            state.addr, repository
        ),
    };
    let mut response = error_response(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "authentication required");
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, value.parse().unwrap());
    response
}

/// Route `/v2/<repository>/{manifests,blobs}/...` by hand so repositories may contain slashes
async fn distribution(
    State(state): State<Arc<RegistryState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.record();
    let path = uri.path().trim_start_matches("/v2/").to_string();

    let repository = path
        .split_once("/blobs/")
        .or_else(|| path.split_once("/manifests/"))
        .map(|(repo, _)| repo.to_string())
        .unwrap_or_default();

    if let Some(mode) = &state.auth {
        let expected = match mode {
            AuthMode::Basic(credentials) => credentials.header(),
            AuthMode::Bearer { .. } => format!("Bearer {}", TEST_TOKEN),
        };
        let authorized = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .is_some_and(|h| h == expected);
        if !authorized {
            return challenge(&state, &repository);
        }
    }

    if let Some((repo, session)) = path.split_once("/blobs/uploads/") {
        if session.is_empty() && method == Method::POST {
            let id = uuid::Uuid::new_v4().to_string();
            state.uploads.lock().unwrap().insert(id.clone(), repo.to_string());
            return Response::builder()
                .status(StatusCode::ACCEPTED)
                .header(header::LOCATION, format!("/v2/{}/blobs/uploads/{}", repo, id))
                .header(header::RANGE, "0-0")
                .body(Body::empty())
                .unwrap();
        }
        if method == Method::PUT {
            return complete_upload(&state, repo, session, uri.query().unwrap_or_default(), body);
        }
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    if let Some((repo, reference)) = path.split_once("/manifests/") {
        return match method {
            Method::GET | Method::HEAD => get_manifest(&state, repo, reference, method == Method::HEAD),
            Method::PUT => put_manifest(&state, repo, reference, &headers, body),
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        };
    }

    if let Some((repo, digest)) = path.split_once("/blobs/") {
        let blobs = state.blobs.lock().unwrap();
        return match (blobs.get(&(repo.to_string(), digest.to_string())), method) {
            (Some(content), Method::GET) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .header("Docker-Content-Digest", digest)
                .body(Body::from(content.clone()))
                .unwrap(),
            (Some(content), Method::HEAD) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, content.len())
                .header("Docker-Content-Digest", digest)
                .body(Body::empty())
                .unwrap(),
            (None, Method::GET | Method::HEAD) => {
                error_response(StatusCode::NOT_FOUND, "BLOB_UNKNOWN", "blob unknown to registry")
            }
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        };
    }

    StatusCode::NOT_FOUND.into_response()
}

fn complete_upload(state: &RegistryState, repo: &str, session: &str, query: &str, body: Bytes) -> Response {
    if state.uploads.lock().unwrap().remove(session).is_none() {
        return error_response(StatusCode::NOT_FOUND, "BLOB_UPLOAD_UNKNOWN", "upload unknown");
    }

    let digest = url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "digest")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default();
    if digest != sha256_digest(&body) {
        return error_response(StatusCode::BAD_REQUEST, "DIGEST_INVALID", "digest mismatch");
    }

    state
        .blobs
        .lock()
        .unwrap()
        .insert((repo.to_string(), digest.clone()), body.to_vec());
    Response::builder()
        .status(StatusCode::CREATED)
        .header(header::LOCATION, format!("/v2/{}/blobs/{}", repo, digest))
        .header("Docker-Content-Digest", digest)
        .body(Body::empty())
        .unwrap()
}

fn get_manifest(state: &RegistryState, repo: &str, reference: &str, head: bool) -> Response {
    let manifests = state.manifests.lock().unwrap();
    let Some((media_type, content)) = manifests.get(&(repo.to_string(), reference.to_string())) else {
        return error_response(StatusCode::NOT_FOUND, "MANIFEST_UNKNOWN", "manifest unknown");
    };

    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, media_type.as_str())
        .header("Docker-Content-Digest", sha256_digest(content));
    if head {
        builder
            .header(header::CONTENT_LENGTH, content.len())
            .body(Body::empty())
            .unwrap()
    } else {
        builder.body(Body::from(content.clone())).unwrap()
    }
}

fn put_manifest(state: &RegistryState, repo: &str, reference: &str, headers: &HeaderMap, body: Bytes) -> Response {
    let media_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let digest = sha256_digest(&body);
    if reference.starts_with("sha256:") && reference != digest {
        return error_response(StatusCode::BAD_REQUEST, "DIGEST_INVALID", "digest mismatch");
    }

    // Referenced blobs must already be present
    let manifest: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "MANIFEST_INVALID", "invalid manifest"),
    };
    let mut referenced: Vec<String> = manifest["layers"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|layer| layer["digest"].as_str().map(str::to_string))
        .collect();
    referenced.extend(manifest["config"]["digest"].as_str().map(str::to_string));
    {
        let blobs = state.blobs.lock().unwrap();
        if let Some(missing) = referenced
            .iter()
            .find(|d| !blobs.contains_key(&(repo.to_string(), d.to_string())))
        {
            return error_response(
                StatusCode::BAD_REQUEST,
                "MANIFEST_BLOB_UNKNOWN",
                &format!("blob unknown: {}", missing),
            );
        }
    }

    let mut manifests = state.manifests.lock().unwrap();
    let entry = (media_type, body.to_vec());
    manifests.insert((repo.to_string(), digest.clone()), entry.clone());
    manifests.insert((repo.to_string(), reference.to_string()), entry);

    Response::builder()
        .status(StatusCode::CREATED)
        .header(header::LOCATION, format!("/v2/{}/manifests/{}", repo, digest))
        .header("Docker-Content-Digest", digest)
        .body(Body::empty())
        .unwrap()
}
