//! End-to-end push and pull against an in-process registry

mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::{TestRegistry, read_tree, sha256_digest};
use package_oci::config::Config;
use package_oci::logging::Logger;
use package_oci::oci::{ImageManifest, MEDIA_TYPE_IMAGE_MANIFEST, PACKAGE_ARTIFACT_TYPE};
use package_oci::registry::RetryPolicy;
use package_oci::store::LocalStore;
use package_oci::{PackageError, pull_package, push_package};
use std::fs;
use std::path::Path;
use std::time::Duration;

fn test_config() -> Config {
    Config {
        plain_http: true,
        quiet: true,
        timeout: Duration::from_secs(10),
        retry: RetryPolicy {
            max_retries: 1,
            min_wait: Duration::from_millis(10),
            max_wait: Duration::from_millis(20),
            factor: 1.5,
        },
        ..Config::default()
    }
}

fn write_package(root: &Path) {
    fs::create_dir_all(root.join("data_stream").join("access")).unwrap();
    fs::create_dir_all(root.join("img")).unwrap();
    fs::write(root.join("manifest.yml"), b"name: nginx\nversion: 1.2.0\n").unwrap();
    fs::write(root.join("changelog.yml"), b"- version: 1.2.0\n").unwrap();
    fs::write(
        root.join("data_stream").join("access").join("fields.yml"),
        b"- name: nginx.access.remote_ip_list\n  type: array\n",
    )
    .unwrap();
    fs::write(root.join("img").join("logo.svg"), [0u8, 159, 146, 150, 255]).unwrap();
}

#[tokio::test]
async fn test_push_then_pull_round_trip() {
    let registry = TestRegistry::start().await;
    let source = tempfile::tempdir().unwrap();
    write_package(source.path());
    let reference = registry.reference("packages/nginx:1.2.0");

    let pushed = push_package(&test_config(), source.path(), &reference)
        .await
        .unwrap();
    assert_eq!(pushed.media_type, MEDIA_TYPE_IMAGE_MANIFEST);
    assert_eq!(registry.blob_count(), 2);

    let (media_type, content) = registry.manifest("packages/nginx", "1.2.0").unwrap();
    assert_eq!(media_type, MEDIA_TYPE_IMAGE_MANIFEST);
    assert_eq!(sha256_digest(&content), pushed.digest);
    let manifest: ImageManifest = serde_json::from_slice(&content).unwrap();
    assert_eq!(manifest.artifact_type.as_deref(), Some(PACKAGE_ARTIFACT_TYPE));
    assert_eq!(manifest.layers.len(), 1);
    assert_eq!(manifest.layers[0].title(), Some("."));

    let dest = tempfile::tempdir().unwrap();
    let target = dest.path().join("nginx-1.2.0");
    let pulled = pull_package(&test_config(), &reference, &target).await.unwrap();

    assert_eq!(pulled.digest, pushed.digest);
    assert_eq!(read_tree(&target), read_tree(source.path()));
}

#[tokio::test]
async fn test_second_push_skips_existing_blobs() {
    let registry = TestRegistry::start().await;
    let source = tempfile::tempdir().unwrap();
    write_package(source.path());

    push_package(&test_config(), source.path(), &registry.reference("packages/nginx:1.2.0"))
        .await
        .unwrap();
    let blobs = registry.blob_count();
    push_package(&test_config(), source.path(), &registry.reference("packages/nginx:latest"))
        .await
        .unwrap();

    assert_eq!(registry.blob_count(), blobs);
    assert!(registry.manifest("packages/nginx", "latest").is_some());
}

#[tokio::test]
async fn test_pull_malformed_reference_makes_no_requests() {
    let registry = TestRegistry::start().await;
    let dest = tempfile::tempdir().unwrap();

    for reference in ["", "UPPER/case", "localhost:5000/pkg:bad tag"] {
        let err = pull_package(&test_config(), reference, dest.path())
            .await
            .unwrap_err();
        assert!(
            matches!(err, PackageError::ReferenceParse { .. }),
            "unexpected error for {:?}: {:?}",
            reference,
            err
        );
    }
    assert_eq!(registry.request_count(), 0);
}

#[tokio::test]
async fn test_push_missing_directory_makes_no_requests() {
    let registry = TestRegistry::start().await;
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");

    let err = push_package(&test_config(), &missing, &registry.reference("packages/nginx:1.2.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, PackageError::LocalStore { .. }));
    assert_eq!(registry.request_count(), 0);
}

#[tokio::test]
async fn test_pull_unknown_tag_is_transfer_error() {
    let registry = TestRegistry::start().await;
    let dest = tempfile::tempdir().unwrap();

    let err = pull_package(&test_config(), &registry.reference("packages/nginx:9.9.9"), dest.path())
        .await
        .unwrap_err();
    match err {
        PackageError::Transfer(message) => assert!(message.contains("not found"), "{}", message),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_registry_fails_after_retries() {
    let source = tempfile::tempdir().unwrap();
    write_package(source.path());

    let err = push_package(&test_config(), source.path(), "127.0.0.1:1/packages/nginx:1.2.0")
        .await
        .unwrap_err();
    assert!(matches!(err, PackageError::Transfer(_)));

    // The store was released, so the directory opens again
    let store = LocalStore::open(source.path(), Logger::new_quiet()).unwrap();
    store.add(".", "", "").unwrap();
    store.close().unwrap();
}

#[tokio::test]
async fn test_store_reopens_after_success() {
    let registry = TestRegistry::start().await;
    let source = tempfile::tempdir().unwrap();
    write_package(source.path());
    let reference = registry.reference("packages/nginx:1.2.0");

    push_package(&test_config(), source.path(), &reference).await.unwrap();
    push_package(&test_config(), source.path(), &reference).await.unwrap();

    let dest = tempfile::tempdir().unwrap();
    pull_package(&test_config(), &reference, dest.path()).await.unwrap();
    pull_package(&test_config(), &reference, dest.path()).await.unwrap();
    assert_eq!(read_tree(dest.path()), read_tree(source.path()));
}

#[tokio::test]
async fn test_bearer_auth_with_credentials_file() {
    let registry = TestRegistry::start_with_auth("alice", "s3cret").await;
    let source = tempfile::tempdir().unwrap();
    write_package(source.path());

    let docker_dir = tempfile::tempdir().unwrap();
    let credentials_path = docker_dir.path().join("config.json");
    let auth = STANDARD.encode("alice:s3cret");
    fs::write(
        &credentials_path,
        format!(r#"{{"auths":{{"{}":{{"auth":"{}"}}}}}}"#, registry.addr, auth),
    )
    .unwrap();
    let config = test_config().with_credentials_path(Some(credentials_path));
    let reference = registry.reference("packages/nginx:1.2.0");

    push_package(&config, source.path(), &reference).await.unwrap();
    assert!(registry.token_request_count() >= 1);

    let dest = tempfile::tempdir().unwrap();
    pull_package(&config, &reference, dest.path()).await.unwrap();
    assert_eq!(read_tree(dest.path()), read_tree(source.path()));
}

#[tokio::test]
async fn test_bearer_auth_without_credentials_is_rejected() {
    let registry = TestRegistry::start_with_auth("alice", "s3cret").await;
    let dest = tempfile::tempdir().unwrap();

    let err = pull_package(&test_config(), &registry.reference("packages/nginx:1.2.0"), dest.path())
        .await
        .unwrap_err();
    assert!(matches!(err, PackageError::Transfer(_)));
}

#[tokio::test]
async fn test_malformed_credentials_file() {
    let registry = TestRegistry::start().await;
    let dir = tempfile::tempdir().unwrap();
    let credentials_path = dir.path().join("config.json");
    fs::write(&credentials_path, b"{ not json").unwrap();
    let config = test_config().with_credentials_path(Some(credentials_path));

    let err = pull_package(&config, &registry.reference("packages/nginx:1.2.0"), dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, PackageError::CredentialStore(_)));
    assert_eq!(registry.request_count(), 0);
}

#[tokio::test]
async fn test_pull_rejects_manifest_with_malformed_digests() {
    let registry = TestRegistry::start().await;
    let config_digests = [
        "sha256:a\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}",
        "sha256:../../other/blobs/x",
    ];

    for (i, digest) in config_digests.iter().enumerate() {
        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_IMAGE_MANIFEST,
            "config": { "mediaType": "application/vnd.oci.empty.v1+json", "digest": digest, "size": 2 },
            "layers": [],
        });
        let tag = format!("{}.0.0", i + 1);
        registry.insert_manifest(
            "packages/nginx",
            &tag,
            MEDIA_TYPE_IMAGE_MANIFEST,
            &serde_json::to_vec(&manifest).unwrap(),
        );

        let dest = tempfile::tempdir().unwrap();
        let err = pull_package(
            &test_config(),
            &registry.reference(&format!("packages/nginx:{}", tag)),
            dest.path(),
        )
        .await
        .unwrap_err();

        match err {
            PackageError::Transfer(message) => {
                assert!(message.contains("invalid digest"), "{}", message)
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(read_tree(dest.path()).is_empty());
    }
}

#[tokio::test]
async fn test_basic_auth_with_credentials_file() {
    let registry = TestRegistry::start_with_basic_auth("alice", "s3cret").await;
    let source = tempfile::tempdir().unwrap();
    write_package(source.path());

    let docker_dir = tempfile::tempdir().unwrap();
    let credentials_path = docker_dir.path().join("config.json");
    fs::write(
        &credentials_path,
        format!(
            r#"{{"auths":{{"http://{}":{{"username":"alice","password":"s3cret"}}}}}}"#,
            registry.addr
        ),
    )
    .unwrap();
    let config = test_config().with_credentials_path(Some(credentials_path));
    let reference = registry.reference("packages/nginx:1.2.0");

    push_package(&config, source.path(), &reference).await.unwrap();
    let dest = tempfile::tempdir().unwrap();
    pull_package(&config, &reference, dest.path()).await.unwrap();

    assert_eq!(read_tree(dest.path()), read_tree(source.path()));
    assert_eq!(registry.token_request_count(), 0);
}

#[tokio::test]
async fn test_basic_auth_without_credentials_is_rejected() {
    let registry = TestRegistry::start_with_basic_auth("alice", "s3cret").await;
    let source = tempfile::tempdir().unwrap();
    write_package(source.path());

    let err = push_package(&test_config(), source.path(), &registry.reference("packages/nginx:1.2.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, PackageError::Transfer(_)));
    assert_eq!(registry.blob_count(), 0);
}

#[tokio::test]
async fn test_identity_token_uses_refresh_grant() {
    let registry = TestRegistry::start_with_refresh_token("refresh-abc").await;
    let source = tempfile::tempdir().unwrap();
    write_package(source.path());

    let docker_dir = tempfile::tempdir().unwrap();
    let credentials_path = docker_dir.path().join("config.json");
    fs::write(
        &credentials_path,
        format!(r#"{{"auths":{{"{}":{{"identitytoken":"refresh-abc"}}}}}}"#, registry.addr),
    )
    .unwrap();
    let config = test_config().with_credentials_path(Some(credentials_path));
    let reference = registry.reference("packages/nginx:1.2.0");

    push_package(&config, source.path(), &reference).await.unwrap();
    let dest = tempfile::tempdir().unwrap();
    pull_package(&config, &reference, dest.path()).await.unwrap();

    assert_eq!(read_tree(dest.path()), read_tree(source.path()));
    assert!(registry.refresh_grant_count() >= 1);
    assert_eq!(registry.refresh_grant_count(), registry.token_request_count());
}
