//! OCI data model: references, descriptors and manifests
//!
//! Media types and annotation keys shared by the local store, the registry
//! client and the transfer pipelines live here.

pub mod descriptor;
pub mod manifest;
pub mod reference;

pub use descriptor::Descriptor;
pub use manifest::{ImageManifest, successors};
pub use reference::Reference;

/// Artifact type stamped on every packed package manifest
pub const PACKAGE_ARTIFACT_TYPE: &str = "application/vnd.elastic.package";

pub const MEDIA_TYPE_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_EMPTY_JSON: &str = "application/vnd.oci.empty.v1+json";
pub const MEDIA_TYPE_LAYER_TAR: &str = "application/vnd.oci.image.layer.v1.tar";
pub const MEDIA_TYPE_LAYER_TAR_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Media types that carry references to other content
pub const MANIFEST_MEDIA_TYPES: [&str; 4] = [
    MEDIA_TYPE_IMAGE_MANIFEST,
    MEDIA_TYPE_IMAGE_INDEX,
    MEDIA_TYPE_DOCKER_MANIFEST,
    MEDIA_TYPE_DOCKER_MANIFEST_LIST,
];

pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";
pub const ANNOTATION_CREATED: &str = "org.opencontainers.image.created";
/// Digest of the uncompressed tarball of a packed directory
pub const ANNOTATION_CONTENT_DIGEST: &str = "io.deis.oras.content.digest";
/// Marks a tarball that must be extracted on pull
pub const ANNOTATION_UNPACK: &str = "io.deis.oras.content.unpack";
