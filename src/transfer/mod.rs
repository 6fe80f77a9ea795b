//! Pull and push pipelines
//!
//! Each pipeline resolves credentials, binds the reference to a repository
//! handle, wraps the local directory in a [`LocalStore`] and hands the actual
//! transfer to [`copy`]. The local store is closed on every exit path.

pub mod copy;
pub mod pack;

pub use copy::copy;
pub use pack::pack_manifest;

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::{PackageError, Result};
use crate::logging::Logger;
use crate::oci::{Descriptor, PACKAGE_ARTIFACT_TYPE, Reference};
use crate::registry::{Repository, authenticating_client};
use crate::store::{ContentStore, LocalStore};
use std::future::Future;
use std::path::Path;

/// Download the package at `reference` into `destdir`
///
/// Returns the descriptor of the pulled manifest. Failures while copying are
/// reported as transfer errors.
pub async fn pull_package(config: &Config, reference: &str, destdir: &Path) -> Result<Descriptor> {
    let logger = config.logger();
    logger.section("Pulling package");

    let repository = repository(config, reference, &logger)?;
    let store = LocalStore::create(destdir, logger.clone())?;

    let target = repository.reference().reference().to_string();
    logger.step(&format!("Pulling {} into {}", repository.reference(), destdir.display()));
    let result = copy(&repository, &target, &store, &target, &logger)
        .await
        .map_err(PackageError::into_transfer);
    let closed = store.close();

    let desc = result?;
    closed?;
    logger.success(&format!(
        "Pulled {} ({}) in {}",
        repository.reference(),
        desc.digest,
        logger.format_duration(logger.elapsed())
    ));
    Ok(desc)
}

/// Pack `sourcedir` as a single-layer package and upload it to `reference`
///
/// Returns the descriptor of the pushed manifest.
pub async fn push_package(config: &Config, sourcedir: &Path, reference: &str) -> Result<Descriptor> {
    let logger = config.logger();
    logger.section("Pushing package");

    let store = LocalStore::open(sourcedir, logger.clone())?;
    let result = push_from_store(config, &store, reference, &logger).await;
    let closed = store.close();

    let desc = result?;
    closed?;
    logger.success(&format!(
        "Pushed {} ({}) in {}",
        reference,
        desc.digest,
        logger.format_duration(logger.elapsed())
    ));
    Ok(desc)
}

async fn push_from_store(
    config: &Config,
    store: &LocalStore,
    reference: &str,
    logger: &Logger,
) -> Result<Descriptor> {
    logger.step(&format!("Packing {}", store.root().display()));
    let layer = store.add(".", "", "")?;
    let manifest = pack_manifest(store, PACKAGE_ARTIFACT_TYPE, vec![layer]).await?;
    logger.info(&format!("Packed manifest {}", manifest.digest));

    let repository = repository(config, reference, logger)?;
    let tag = match &repository.reference().digest {
        Some(digest) => {
            return Err(PackageError::tag(
                reference,
                format!("digest {} cannot be used as a tag", digest),
            ));
        }
        None => repository.reference().reference().to_string(),
    };
    store.tag(&manifest, &tag).await?;

    logger.step(&format!("Uploading to {}", repository.reference()));
    copy(store, &tag, &repository, &tag, logger)
        .await
        .map_err(PackageError::into_transfer)
}

/// Credential resolution plus handle construction; no network I/O
fn repository(config: &Config, reference: &str, logger: &Logger) -> Result<Repository> {
    let credentials = CredentialStore::load(config.credentials_path.as_deref())?;
    if let Some(path) = credentials.path() {
        logger.detail(&format!("Using credentials from {}", path.display()));
    }
    let client = authenticating_client(credentials, config, logger.clone())?;
    let reference = Reference::parse(reference)?;
    Repository::new(reference, client, config)
}

/// Run `operation` unless `signal` completes first
///
/// The losing future is dropped, which aborts in-flight requests and releases
/// any local store it owns.
pub async fn with_cancellation<T, F, S>(operation: F, signal: S) -> Result<T>
where
    F: Future<Output = Result<T>>,
    S: Future<Output = ()>,
{
    tokio::select! {
        result = operation => result,
        _ = signal => Err(PackageError::Cancelled),
    }
}
