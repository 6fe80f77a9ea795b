//! Local directory content store
//!
//! A [`LocalStore`] wraps a directory so it can act as the source of a push
//! or the destination of a pull:
//!
//! ```text
//! root/
//!   <title>          // named file content, or an extracted directory
//! <tempdir>/
//!   layer-N.tar.gz   // directories packed by `add`
//! ```
//!
//! Untitled content (configs, manifests) and tags are kept in memory. The
//! store must be closed once the command is done; dropping it closes it too.

use crate::digest::DigestUtils;
use crate::error::{PackageError, Result};
use crate::logging::Logger;
use crate::oci::{
    ANNOTATION_CONTENT_DIGEST, ANNOTATION_TITLE, ANNOTATION_UNPACK, Descriptor,
    MEDIA_TYPE_LAYER_TAR, MEDIA_TYPE_LAYER_TAR_GZIP,
};
use crate::store::ContentStore;
use crate::store::archive::ArchiveUtils;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::TempDir;

/// Where the bytes of a stored descriptor live
#[derive(Debug)]
enum Location {
    Memory(Vec<u8>),
    File(PathBuf),
    /// Extracted directory; the tarball itself is not kept
    Unpacked(PathBuf),
}

#[derive(Debug)]
struct Entry {
    desc: Descriptor,
    location: Location,
}

#[derive(Debug, Default)]
struct StoreState {
    closed: bool,
    temp_dir: Option<TempDir>,
    /// Content by digest
    entries: HashMap<String, Entry>,
    /// Title to digest
    names: HashMap<String, String>,
    tags: HashMap<String, Descriptor>,
}

/// Content store over a local directory
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    state: Mutex<StoreState>,
    logger: Logger,
}

impl LocalStore {
    /// Open an existing directory
    pub fn open(root: &Path, logger: Logger) -> Result<Self> {
        let metadata = fs::metadata(root).map_err(|e| {
            PackageError::local_store(format!("cannot access directory: {}", e), Some(root))
        })?;
        if !metadata.is_dir() {
            return Err(PackageError::local_store("not a directory", Some(root)));
        }

        logger.detail(&format!("Opened local store at {}", root.display()));
        Ok(Self {
            root: root.to_path_buf(),
            state: Mutex::new(StoreState::default()),
            logger,
        })
    }

    /// Create the directory, and any missing parents, then open it
    pub fn create(root: &Path, logger: Logger) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| {
            PackageError::local_store(format!("cannot create directory: {}", e), Some(root))
        })?;
        Self::open(root, logger)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Add a file or directory under `name`
    ///
    /// An empty `path` means `name`; relative paths resolve against the root.
    /// An empty `media_type` picks the layer type matching the content kind.
    /// Directories are packed into a gzip tarball flagged for unpacking.
    pub fn add(&self, name: &str, media_type: &str, path: &str) -> Result<Descriptor> {
        if name.is_empty() {
            return Err(PackageError::local_store("content name is empty", Some(&self.root)));
        }

        let mut state = self.open_state()?;
        if state.names.contains_key(name) {
            return Err(PackageError::local_store(
                format!("duplicate content name: {}", name),
                Some(&self.root),
            ));
        }

        let path = if path.is_empty() { name } else { path };
        let source = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.root.join(path)
        };
        let metadata = fs::metadata(&source).map_err(|e| {
            PackageError::local_store(format!("cannot read content: {}", e), Some(&source))
        })?;

        let (desc, location) = if metadata.is_dir() {
            let index = state.entries.len();
            let temp_dir = match state.temp_dir.take() {
                Some(dir) => dir,
                None => tempfile::Builder::new()
                    .prefix("package-oci-")
                    .tempdir()
                    .map_err(|e| {
                        PackageError::local_store(format!("cannot create temporary directory: {}", e), None)
                    })?,
            };
            let blob_path = temp_dir.path().join(format!("layer-{}.tar.gz", index));
            state.temp_dir = Some(temp_dir);

            self.logger.detail(&format!("Packing directory {}", source.display()));
            let packed = ArchiveUtils::pack_directory(&source, &blob_path)?;
            let media_type = if media_type.is_empty() {
                MEDIA_TYPE_LAYER_TAR_GZIP
            } else {
                media_type
            };
            let desc = Descriptor::new(media_type, &packed.digest, packed.size)
                .with_annotation(ANNOTATION_TITLE, name)
                .with_annotation(ANNOTATION_CONTENT_DIGEST, &packed.tar_digest)
                .with_annotation(ANNOTATION_UNPACK, "true");
            (desc, Location::File(blob_path))
        } else {
            let (digest, size) = ArchiveUtils::hash_file(&source)?;
            let media_type = if media_type.is_empty() {
                MEDIA_TYPE_LAYER_TAR
            } else {
                media_type
            };
            let desc = Descriptor::new(media_type, &digest, size).with_annotation(ANNOTATION_TITLE, name);
            (desc, Location::File(source))
        };

        self.logger.detail(&format!(
            "Added {} as {} ({})",
            name,
            DigestUtils::format_digest_short(&desc.digest),
            self.logger.format_size(desc.size)
        ));
        state.names.insert(name.to_string(), desc.digest.clone());
        state.entries.insert(
            desc.digest.clone(),
            Entry {
                desc: desc.clone(),
                location,
            },
        );
        Ok(desc)
    }

    /// Release the store: drop in-memory content and remove temporary files
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock()?;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.entries.clear();
        state.names.clear();
        state.tags.clear();

        if let Some(temp_dir) = state.temp_dir.take() {
            let path = temp_dir.path().to_path_buf();
            temp_dir.close().map_err(|e| {
                PackageError::local_store(format!("cannot remove temporary files: {}", e), Some(&path))
            })?;
        }
        self.logger.detail(&format!("Closed local store at {}", self.root.display()));
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|state| state.closed).unwrap_or(true)
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| PackageError::local_store("store state poisoned", Some(&self.root)))
    }

    fn open_state(&self) -> Result<MutexGuard<'_, StoreState>> {
        let state = self.lock()?;
        if state.closed {
            return Err(PackageError::local_store("store is closed", Some(&self.root)));
        }
        Ok(state)
    }

    /// Join a title onto the root, refusing anything that would land outside it
    fn resolve_title(&self, title: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for component in Path::new(title).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(PackageError::local_store(
                        format!("path traversal disallowed: {}", title),
                        Some(&self.root),
                    ));
                }
            }
        }
        Ok(path)
    }
}

#[async_trait]
impl ContentStore for LocalStore {
    async fn fetch(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        let state = self.open_state()?;
        let entry = state.entries.get(&desc.digest).ok_or_else(|| {
            PackageError::local_store(format!("content not found: {}", desc.digest), Some(&self.root))
        })?;

        match &entry.location {
            Location::Memory(content) => Ok(content.clone()),
            Location::File(path) => fs::read(path).map_err(|e| {
                PackageError::local_store(format!("cannot read content: {}", e), Some(path))
            }),
            Location::Unpacked(path) => Err(PackageError::local_store(
                format!("content {} was extracted and cannot be read back", desc.digest),
                Some(path),
            )),
        }
    }

    async fn exists(&self, desc: &Descriptor) -> Result<bool> {
        let state = self.open_state()?;
        Ok(state.entries.contains_key(&desc.digest))
    }

    async fn push(&self, desc: &Descriptor, content: Vec<u8>) -> Result<()> {
        let mut state = self.open_state()?;
        DigestUtils::verify_descriptor(desc, &content)?;

        let location = match desc.title() {
            None => Location::Memory(content),
            Some(title) => {
                if let Some(existing) = state.names.get(title) {
                    if *existing != desc.digest {
                        return Err(PackageError::local_store(
                            format!("duplicate content name: {}", title),
                            Some(&self.root),
                        ));
                    }
                }

                let target = self.resolve_title(title)?;
                if desc.is_unpack() {
                    self.logger.detail(&format!("Extracting {} into {}", title, target.display()));
                    ArchiveUtils::unpack_archive(&content, &target, desc.content_digest())?;
                    state.names.insert(title.to_string(), desc.digest.clone());
                    Location::Unpacked(target)
                } else {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent).map_err(|e| {
                            PackageError::local_store(format!("cannot create directory: {}", e), Some(parent))
                        })?;
                    }
                    fs::write(&target, &content).map_err(|e| {
                        PackageError::local_store(format!("cannot write content: {}", e), Some(&target))
                    })?;
                    self.logger.detail(&format!("Wrote {}", target.display()));
                    state.names.insert(title.to_string(), desc.digest.clone());
                    Location::File(target)
                }
            }
        };

        state.entries.insert(
            desc.digest.clone(),
            Entry {
                desc: desc.clone(),
                location,
            },
        );
        Ok(())
    }

    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        let state = self.open_state()?;
        if let Some(desc) = state.tags.get(reference) {
            return Ok(desc.clone());
        }
        state
            .entries
            .get(reference)
            .map(|entry| entry.desc.clone())
            .ok_or_else(|| {
                PackageError::local_store(format!("reference not found: {}", reference), Some(&self.root))
            })
    }

    async fn tag(&self, desc: &Descriptor, reference: &str) -> Result<()> {
        if reference.is_empty() {
            return Err(PackageError::tag(reference, "empty tag"));
        }
        let mut state = self.open_state().map_err(|e| PackageError::tag(reference, e.to_string()))?;
        if !state.entries.contains_key(&desc.digest) {
            return Err(PackageError::tag(
                reference,
                format!("content not found: {}", desc.digest),
            ));
        }

        self.logger.detail(&format!(
            "Tagged {} as {}",
            DigestUtils::format_digest_short(&desc.digest),
            reference
        ));
        state.tags.insert(reference.to_string(), desc.clone());
        Ok(())
    }
}

impl Drop for LocalStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            self.logger.warning(&format!("Failed to close local store: {}", e));
        }
    }
}
