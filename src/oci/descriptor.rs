//! Content descriptors

use crate::digest::DigestUtils;
use crate::oci::{
    ANNOTATION_CONTENT_DIGEST, ANNOTATION_TITLE, ANNOTATION_UNPACK, MANIFEST_MEDIA_TYPES,
    MEDIA_TYPE_EMPTY_JSON,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Content `{}` shared by every empty config
pub const EMPTY_JSON: &[u8] = b"{}";

/// Points at a piece of content by media type, digest and size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    pub fn new(media_type: &str, digest: &str, size: u64) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest: digest.to_string(),
            size,
            data: None,
            artifact_type: None,
            annotations: None,
        }
    }

    /// Describe in-memory content
    pub fn from_bytes(media_type: &str, content: &[u8]) -> Self {
        Self::new(
            media_type,
            &DigestUtils::compute_digest(content),
            content.len() as u64,
        )
    }

    /// The empty JSON descriptor used as config of artifact manifests
    pub fn empty_json() -> Self {
        let mut desc = Self::from_bytes(MEDIA_TYPE_EMPTY_JSON, EMPTY_JSON);
        desc.data = Some(STANDARD.encode(EMPTY_JSON));
        desc
    }

    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// File or directory name this content is stored under, if any
    pub fn title(&self) -> Option<&str> {
        self.annotation(ANNOTATION_TITLE).filter(|t| !t.is_empty())
    }

    pub fn is_unpack(&self) -> bool {
        self.annotation(ANNOTATION_UNPACK) == Some("true")
    }

    pub fn content_digest(&self) -> Option<&str> {
        self.annotation(ANNOTATION_CONTENT_DIGEST)
    }

    pub fn is_manifest(&self) -> bool {
        MANIFEST_MEDIA_TYPES.contains(&self.media_type.as_str())
    }

    /// Same content, regardless of annotations
    pub fn same_content(&self, other: &Descriptor) -> bool {
        self.digest == other.digest && self.size == other.size
    }
}
