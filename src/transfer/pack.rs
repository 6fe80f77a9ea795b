//! Artifact manifest packing

use crate::error::{PackageError, Result};
use crate::oci::descriptor::EMPTY_JSON;
use crate::oci::{Descriptor, ImageManifest};
use crate::store::ContentStore;

/// Build an artifact manifest over `layers` and store it, with its empty config, in `store`
///
/// Returns the manifest descriptor. Any failure is reported as a manifest pack error.
pub async fn pack_manifest(
    store: &dyn ContentStore,
    artifact_type: &str,
    layers: Vec<Descriptor>,
) -> Result<Descriptor> {
    let manifest = ImageManifest::for_artifact(artifact_type, layers)?;
    let (desc, content) = manifest.encode()?;

    let config = Descriptor::empty_json();
    if !store.exists(&config).await.map_err(into_pack_error)? {
        store
            .push(&config, EMPTY_JSON.to_vec())
            .await
            .map_err(into_pack_error)?;
    }
    store.push(&desc, content).await.map_err(into_pack_error)?;

    Ok(desc)
}

fn into_pack_error(err: PackageError) -> PackageError {
    match err {
        PackageError::ManifestPack(_) | PackageError::Cancelled => err,
        other => PackageError::ManifestPack(other.to_string()),
    }
}
