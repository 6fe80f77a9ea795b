//! OCI image manifests and graph traversal

use crate::digest::DigestUtils;
use crate::error::{PackageError, Result};
use crate::oci::{ANNOTATION_CREATED, Descriptor, MEDIA_TYPE_IMAGE_MANIFEST};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// OCI image manifest, version 1.1 shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ImageManifest {
    /// Build an artifact manifest over the given layers
    ///
    /// The config is the empty JSON descriptor; with no layers the empty
    /// descriptor doubles as the only layer.
    pub fn for_artifact(artifact_type: &str, layers: Vec<Descriptor>) -> Result<Self> {
        if artifact_type.is_empty() {
            return Err(PackageError::ManifestPack(
                "artifact type is required".to_string(),
            ));
        }
        if !is_valid_media_type(artifact_type) {
            return Err(PackageError::ManifestPack(format!(
                "invalid artifact type: {}",
                artifact_type
            )));
        }
        if let Some(bad) = layers.iter().find(|l| !is_valid_media_type(&l.media_type)) {
            return Err(PackageError::ManifestPack(format!(
                "invalid layer media type: {}",
                bad.media_type
            )));
        }

        let layers = if layers.is_empty() {
            vec![Descriptor::empty_json()]
        } else {
            layers
        };

        let created = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut annotations = BTreeMap::new();
        annotations.insert(ANNOTATION_CREATED.to_string(), created);

        Ok(Self {
            schema_version: 2,
            media_type: MEDIA_TYPE_IMAGE_MANIFEST.to_string(),
            artifact_type: Some(artifact_type.to_string()),
            config: Descriptor::empty_json(),
            layers,
            subject: None,
            annotations: Some(annotations),
        })
    }

    /// Canonical JSON bytes and the descriptor addressing them
    pub fn encode(&self) -> Result<(Descriptor, Vec<u8>)> {
        let content = serde_json::to_vec(self)
            .map_err(|e| PackageError::ManifestPack(format!("failed to encode manifest: {}", e)))?;
        let mut desc = Descriptor::from_bytes(&self.media_type, &content);
        desc.artifact_type = self.artifact_type.clone();
        desc.annotations = self.annotations.clone();
        Ok((desc, content))
    }
}

/// Fields that link a manifest or index to other content
#[derive(Debug, Deserialize)]
struct GraphNode {
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
    subject: Option<Descriptor>,
}

/// Direct successors of a node in the content graph
///
/// Blobs have none; manifests point at config, layers and subject; indexes
/// at their manifests.
pub fn successors(desc: &Descriptor, content: &[u8]) -> Result<Vec<Descriptor>> {
    if !desc.is_manifest() {
        return Ok(Vec::new());
    }

    let node: GraphNode = serde_json::from_slice(content).map_err(|e| {
        PackageError::Transfer(format!("failed to decode manifest {}: {}", desc.digest, e))
    })?;

    let mut nodes = Vec::new();
    nodes.extend(node.subject);
    nodes.extend(node.config);
    nodes.extend(node.layers);
    nodes.extend(node.manifests);
    if let Some(bad) = nodes.iter().find(|d| !DigestUtils::is_valid_digest(&d.digest)) {
        return Err(PackageError::Transfer(format!(
            "manifest {} references an invalid digest: {:?}",
            desc.digest, bad.digest
        )));
    }
    Ok(nodes)
}

/// RFC 6838 `type/subtype` check, parameters not allowed
fn is_valid_media_type(media_type: &str) -> bool {
    fn valid_name(name: &str) -> bool {
        let mut chars = name.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric())
            && name.len() <= 127
            && chars.all(|c| c.is_ascii_alphanumeric() || "!#$&-^_.+".contains(c))
    }

    match media_type.split_once('/') {
        Some((kind, subtype)) => valid_name(kind) && valid_name(subtype),
        None => false,
    }
}
