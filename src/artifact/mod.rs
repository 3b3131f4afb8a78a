//! Artifact store
//!
//! Uploads boot artifacts to the storage host the scheduler downloads from
//! and maintains the image catalog: one directory per bundle, made visible
//! by an `img-meta.yaml` document written after all of its files are in
//! place. A bundle whose upload failed part way therefore never shows up in
//! [`ArtifactStore::list_catalog`].

mod catalog;
mod compress;
mod remote;
mod sftp;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::config::StorageSettings;

pub use catalog::{default_prefix, default_prefix_today, ImageMetadata, METADATA_FILE};
pub use compress::{gz_sibling, gzip_to_sibling, is_compressed, sha256_file, GZ_SUFFIX};
pub use remote::{DirEntry, EntryKind, RemoteError, RemoteFs};
pub use sftp::{SftpConfig, SftpRemote};

/// Artifact store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage connection failed: {0}")]
    Connection(String),

    #[error("image {0} not found")]
    NotFound(String),

    #[error("malformed metadata for {name}: {message}")]
    Format { name: String, message: String },

    #[error("local file does not exist: {}", .0.display())]
    MissingLocalFile(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("remote operation failed: {0}")]
    Remote(String),
}

impl From<RemoteError> for StoreError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound(path) => StoreError::NotFound(path),
            RemoteError::Connection(msg) => StoreError::Connection(msg),
            RemoteError::Io(msg) => StoreError::Remote(msg),
        }
    }
}

/// A file placed on the storage host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredArtifact {
    /// Path relative to the storage root
    pub remote_name: String,
    /// HTTP URL the file can be downloaded from
    pub url: String,
    pub sha256: String,
    pub bytes: u64,
}

impl StoredArtifact {
    pub fn file_name(&self) -> &str {
        self.remote_name
            .rsplit('/')
            .next()
            .unwrap_or(&self.remote_name)
    }
}

/// Uploads and catalog access over a remote file store
pub struct ArtifactStore<R: RemoteFs> {
    remote: R,
    download_base: String,
    storage_root: String,
}

impl ArtifactStore<SftpRemote> {
    /// Open an SFTP session to the configured storage host
    pub fn connect(settings: &StorageSettings) -> Result<Self, StoreError> {
        let remote = SftpRemote::connect(SftpConfig::from(settings)).map_err(|e| {
            tracing::error!(host = %settings.host, error = %e, "storage connection failed");
            StoreError::from(e)
        })?;
        Ok(Self::new(remote, settings.download_base(), &settings.root))
    }
}

impl<R: RemoteFs> ArtifactStore<R> {
    pub fn new(remote: R, download_base: impl Into<String>, storage_root: impl Into<String>) -> Self {
        Self {
            remote,
            download_base: download_base.into().trim_end_matches('/').to_string(),
            storage_root: storage_root.into().trim_end_matches('/').to_string(),
        }
    }

    /// Upload one file under `prefix`, compressing it first if asked.
    ///
    /// The compressed copy is written next to the local file. Files that
    /// already end in `.gz` are sent as they are.
    pub fn upload(
        &mut self,
        local: &Path,
        prefix: Option<&str>,
        compress: bool,
    ) -> Result<StoredArtifact, StoreError> {
        require_local(local)?;

        let path = if compress && !is_compressed(local) {
            gzip_to_sibling(local)?
        } else {
            local.to_path_buf()
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StoreError::MissingLocalFile(local.to_path_buf()))?;
        let prefix = prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty());
        let remote_name = match prefix {
            Some(prefix) => {
                self.remote.create_dir_all(prefix)?;
                format!("{}/{}", prefix, file_name)
            }
            None => file_name,
        };

        let sha256 = sha256_file(&path)?;
        let bytes = self.remote.put(&path, &remote_name)?;
        let url = format!("{}/{}", self.download_base, remote_name);
        tracing::debug!(url = %url, "file download url");

        Ok(StoredArtifact {
            remote_name,
            url,
            sha256,
            bytes,
        })
    }

    /// Upload a kernel and root filesystem and register them as a bundle.
    ///
    /// The root filesystem is always stored compressed.
    pub fn upload_image_pair(
        &mut self,
        prefix: &str,
        kernel: &Path,
        rootfs: &Path,
        device: &str,
    ) -> Result<ImageMetadata, StoreError> {
        require_local(kernel)?;
        require_local(rootfs)?;

        let kernel = self.upload(kernel, Some(prefix), false)?;
        let rootfs = self.upload(rootfs, Some(prefix), true)?;

        let metadata = ImageMetadata {
            device: device.to_string(),
            kernel: Some(self.file_url(&kernel)),
            rootfs: Some(self.file_url(&rootfs)),
            image: None,
            patch: None,
            compressed: true,
            checksums: checksums(&[&kernel, &rootfs]),
        };
        self.write_metadata(prefix, &metadata)?;
        Ok(metadata)
    }

    /// Upload a disk image and its patch and register them as a bundle.
    ///
    /// The image is stored compressed, the patch as it is.
    pub fn upload_image_single(
        &mut self,
        prefix: &str,
        image: &Path,
        patch: &Path,
        device: &str,
    ) -> Result<ImageMetadata, StoreError> {
        require_local(image)?;
        require_local(patch)?;

        let image = self.upload(image, Some(prefix), true)?;
        let patch = self.upload(patch, Some(prefix), false)?;

        let metadata = ImageMetadata {
            device: device.to_string(),
            kernel: None,
            rootfs: None,
            image: Some(self.file_url(&image)),
            patch: Some(self.file_url(&patch)),
            compressed: true,
            checksums: checksums(&[&image, &patch]),
        };
        self.write_metadata(prefix, &metadata)?;
        Ok(metadata)
    }

    /// Names of all top-level directories holding a metadata document
    pub fn list_catalog(&mut self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in self.remote.list_dir(".")?.into_iter().filter(DirEntry::is_dir) {
            match self.remote.read(&metadata_path(&entry.name)) {
                Ok(contents) => {
                    tracing::debug!(
                        image = %entry.name,
                        metadata = %String::from_utf8_lossy(&contents),
                        "catalog entry"
                    );
                    names.push(entry.name);
                }
                Err(RemoteError::Connection(msg)) => return Err(StoreError::Connection(msg)),
                Err(e) => tracing::debug!(dir = %entry.name, error = %e, "not an image bundle"),
            }
        }
        names.sort();
        Ok(names)
    }

    /// Metadata of a registered bundle
    pub fn get_metadata(&mut self, name: &str) -> Result<ImageMetadata, StoreError> {
        let name = name.trim_matches('/');
        let contents = match self.remote.read(&metadata_path(name)) {
            Ok(contents) => contents,
            Err(RemoteError::NotFound(_)) => return Err(StoreError::NotFound(name.to_string())),
            Err(e) => return Err(e.into()),
        };

        let text = String::from_utf8(contents).map_err(|e| StoreError::Format {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        let metadata = ImageMetadata::from_yaml(&text).map_err(|e| StoreError::Format {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        tracing::debug!(image = %name, metadata = ?metadata, "image metadata");
        Ok(metadata)
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn into_remote(self) -> R {
        self.remote
    }

    /// URL a job on the scheduler host reads the file from
    fn file_url(&self, artifact: &StoredArtifact) -> String {
        format!("file://{}/{}", self.storage_root, artifact.remote_name)
    }

    fn write_metadata(&mut self, prefix: &str, metadata: &ImageMetadata) -> Result<(), StoreError> {
        let prefix = prefix.trim_matches('/');
        let yaml = metadata.to_yaml().map_err(|e| StoreError::Format {
            name: prefix.to_string(),
            message: e.to_string(),
        })?;
        self.remote.write(&metadata_path(prefix), yaml.as_bytes())?;
        tracing::info!(image = %prefix, device = %metadata.device, "image registered");
        Ok(())
    }
}

fn metadata_path(name: &str) -> String {
    format!("{}/{}", name, METADATA_FILE)
}

fn require_local(path: &Path) -> Result<(), StoreError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(StoreError::MissingLocalFile(path.to_path_buf()))
    }
}

fn checksums(artifacts: &[&StoredArtifact]) -> BTreeMap<String, String> {
    artifacts
        .iter()
        .map(|a| (a.file_name().to_string(), a.sha256.clone()))
        .collect()
}
