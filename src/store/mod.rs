//! Content stores
//!
//! A content store offers content-addressable read and write plus tagging.
//! Two implementations exist: [`LocalStore`] over a directory and
//! [`crate::registry::Repository`] over a remote registry. The transfer
//! pipelines pick one as source and the other as destination.

pub mod archive;
pub mod local;

pub use local::LocalStore;

use crate::error::Result;
use crate::oci::Descriptor;
use async_trait::async_trait;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Read the content a descriptor points at
    async fn fetch(&self, desc: &Descriptor) -> Result<Vec<u8>>;

    async fn exists(&self, desc: &Descriptor) -> Result<bool>;

    /// Store content under its descriptor
    async fn push(&self, desc: &Descriptor, content: Vec<u8>) -> Result<()>;

    /// Look up the descriptor a tag or digest points at
    async fn resolve(&self, reference: &str) -> Result<Descriptor>;

    /// Point `reference` at existing content
    async fn tag(&self, desc: &Descriptor, reference: &str) -> Result<()>;

    /// Store content and tag it in one step
    async fn push_reference(&self, desc: &Descriptor, content: Vec<u8>, reference: &str) -> Result<()> {
        self.push(desc, content).await?;
        self.tag(desc, reference).await
    }
}
