//! Remote repository handle
//!
//! Implements [`ContentStore`] over the OCI distribution API:
//! - Manifests: `GET/HEAD/PUT /v2/{name}/manifests/{reference}`
//! - Blobs: `GET/HEAD /v2/{name}/blobs/{digest}`
//! - Blob upload: `POST /v2/{name}/blobs/uploads/` then a monolithic `PUT` to the
//!   returned location with `?digest=`

use crate::config::Config;
use crate::digest::DigestUtils;
use crate::error::handlers::HttpErrorHandler;
use crate::error::{PackageError, Result};
use crate::logging::Logger;
use crate::oci::{Descriptor, MANIFEST_MEDIA_TYPES, Reference};
use crate::registry::auth::{AuthClient, AuthScope};
use crate::store::ContentStore;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::{Method, Response, StatusCode};
use url::Url;

const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

/// A remote repository bound to an authenticating client
#[derive(Debug)]
pub struct Repository {
    reference: Reference,
    base_url: Url,
    client: AuthClient,
    logger: Logger,
}

impl Repository {
    /// Bind a parsed reference to a client; performs no network I/O
    pub fn new(reference: Reference, client: AuthClient, config: &Config) -> Result<Self> {
        let base = format!(
            "{}://{}/v2/{}/",
            config.scheme(),
            reference.registry_host(),
            reference.repository
        );
        let base_url = Url::parse(&base).map_err(|e| {
            PackageError::reference_parse(&reference.to_string(), format!("invalid registry URL: {}", e))
        })?;

        Ok(Self {
            reference,
            base_url,
            client,
            logger: config.logger(),
        })
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    fn endpoint(&self, kind: &str, reference: &str) -> Result<Url> {
        self.base_url
            .join(&format!("{}/{}", kind, reference))
            .map_err(|e| PackageError::Transfer(format!("invalid endpoint for {}: {}", reference, e)))
    }

    /// Endpoint for content addressed by a descriptor digest
    fn content_endpoint(&self, kind: &str, desc: &Descriptor) -> Result<Url> {
        if !DigestUtils::is_valid_digest(&desc.digest) {
            return Err(PackageError::Transfer(format!("invalid digest: {:?}", desc.digest)));
        }
        self.endpoint(kind, &desc.digest)
    }

    fn pull_scope(&self) -> AuthScope {
        AuthScope::pull(&self.reference.registry, &self.reference.repository)
    }

    fn push_scope(&self) -> AuthScope {
        AuthScope::push(&self.reference.registry, &self.reference.repository)
    }

    fn manifest_accept() -> String {
        MANIFEST_MEDIA_TYPES.join(", ")
    }

    async fn failure(response: Response, operation: &str) -> PackageError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        HttpErrorHandler::handle_registry_error(status, &body, operation)
    }

    async fn put_manifest(&self, desc: &Descriptor, content: Vec<u8>, reference: &str) -> Result<()> {
        let url = self.endpoint("manifests", reference)?;
        self.logger.detail(&format!(
            "Uploading manifest {} as {}",
            DigestUtils::format_digest_short(&desc.digest),
            reference
        ));

        let request = self
            .client
            .request(Method::PUT, url)
            .header(CONTENT_TYPE, &desc.media_type)
            .body(content)
            .build()?;
        let response = self.client.send(request, &self.push_scope()).await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::failure(response, &format!("manifest upload to {}", reference)).await)
        }
    }

    async fn upload_blob(&self, desc: &Descriptor, content: Vec<u8>) -> Result<()> {
        let start_url = self.endpoint("blobs", "uploads/")?;
        let request = self.client.request(Method::POST, start_url).build()?;
        let response = self.client.send(request, &self.push_scope()).await?;
        if response.status() != StatusCode::ACCEPTED && !response.status().is_success() {
            return Err(Self::failure(response, "blob upload start").await);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| PackageError::Transfer("No Location header in upload response".to_string()))?;
        // Relative locations resolve against the registry root
        let mut upload_url = self.base_url.join(location).map_err(|e| {
            PackageError::Transfer(format!("invalid upload location '{}': {}", location, e))
        })?;
        upload_url.query_pairs_mut().append_pair("digest", &desc.digest);

        let request = self
            .client
            .request(Method::PUT, upload_url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(content)
            .build()?;
        let response = self.client.send(request, &self.push_scope()).await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::failure(
                response,
                &format!("blob upload of {}", DigestUtils::format_digest_short(&desc.digest)),
            )
            .await)
        }
    }
}

#[async_trait]
impl ContentStore for Repository {
    async fn fetch(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        let (url, accept) = if desc.is_manifest() {
            (self.content_endpoint("manifests", desc)?, desc.media_type.clone())
        } else {
            (self.content_endpoint("blobs", desc)?, "*/*".to_string())
        };

        let request = self
            .client
            .request(Method::GET, url)
            .header(ACCEPT, accept)
            .build()?;
        let response = self.client.send(request, &self.pull_scope()).await?;
        if !response.status().is_success() {
            return Err(Self::failure(
                response,
                &format!("fetch of {}", DigestUtils::format_digest_short(&desc.digest)),
            )
            .await);
        }

        let content = response.bytes().await?.to_vec();
        self.logger.detail(&format!(
            "Fetched {} ({})",
            DigestUtils::format_digest_short(&desc.digest),
            self.logger.format_size(content.len() as u64)
        ));
        Ok(content)
    }

    async fn exists(&self, desc: &Descriptor) -> Result<bool> {
        let kind = if desc.is_manifest() { "manifests" } else { "blobs" };
        let url = self.content_endpoint(kind, desc)?;
        let mut builder = self.client.request(Method::HEAD, url);
        if desc.is_manifest() {
            builder = builder.header(ACCEPT, &desc.media_type);
        }

        let response = self.client.send(builder.build()?, &self.pull_scope()).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::failure(
                response,
                &format!("existence check of {}", DigestUtils::format_digest_short(&desc.digest)),
            )
            .await),
        }
    }

    async fn push(&self, desc: &Descriptor, content: Vec<u8>) -> Result<()> {
        if desc.is_manifest() {
            self.put_manifest(desc, content, &desc.digest).await
        } else {
            self.upload_blob(desc, content).await
        }
    }

    /// Resolve a tag or digest with a manifest GET
    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        let url = self.endpoint("manifests", reference)?;
        let request = self
            .client
            .request(Method::GET, url)
            .header(ACCEPT, Self::manifest_accept())
            .build()?;
        let response = self.client.send(request, &self.pull_scope()).await?;
        if !response.status().is_success() {
            return Err(Self::failure(response, &format!("manifest fetch of {}", reference)).await);
        }

        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_string())
            .ok_or_else(|| {
                PackageError::Transfer(format!("manifest {} has no content type", reference))
            })?;
        let advertised = response
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        let content = response.bytes().await?;
        let desc = Descriptor::from_bytes(&media_type, &content);

        if let Some(advertised) = advertised {
            if advertised != desc.digest {
                return Err(PackageError::Transfer(format!(
                    "registry reported digest {} for {}, content hashes to {}",
                    advertised, reference, desc.digest
                )));
            }
        }
        if DigestUtils::is_valid_digest(reference) && reference != desc.digest {
            return Err(PackageError::Transfer(format!(
                "manifest fetched by {} hashes to {}",
                reference, desc.digest
            )));
        }

        self.logger.detail(&format!(
            "Resolved {} to {}",
            reference,
            DigestUtils::format_digest_short(&desc.digest)
        ));
        Ok(desc)
    }

    async fn tag(&self, desc: &Descriptor, reference: &str) -> Result<()> {
        let content = self.fetch(desc).await?;
        self.put_manifest(desc, content, reference).await
    }

    async fn push_reference(&self, desc: &Descriptor, content: Vec<u8>, reference: &str) -> Result<()> {
        self.put_manifest(desc, content, reference).await
    }
}
