//! Catalog entries
//!
//! Every registered image bundle has an `img-meta.yaml` next to its files.
//! The entry records how a job should download the files and whether the
//! root filesystem is gzip-compressed.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::job::{DeviceKind, ImageSource, JobError, JobRequest};

/// Name of the metadata document inside a bundle directory
pub const METADATA_FILE: &str = "img-meta.yaml";

/// Metadata of a registered image bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rootfs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(default)]
    pub compressed: bool,
    /// SHA-256 of each uploaded file, keyed by remote file name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checksums: BTreeMap<String, String>,
}

impl ImageMetadata {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Check the fields the device needs and drop the ones it ignores.
    ///
    /// A rootfs with a `.gz` suffix is always treated as compressed.
    pub fn normalize(mut self) -> Result<Self, JobError> {
        if self.device.trim().is_empty() {
            return Err(JobError::MissingMetadata("device".to_string()));
        }

        match DeviceKind::for_device(&self.device) {
            DeviceKind::SingleImage => {
                require(&self.image, "image")?;
                require(&self.patch, "patch")?;
                self.kernel = None;
                self.rootfs = None;
            }
            DeviceKind::KernelRootfs => {
                require(&self.kernel, "kernel")?;
                require(&self.rootfs, "rootfs")?;
                if self.rootfs.as_deref().map(|r| r.ends_with(".gz")).unwrap_or(false) {
                    self.compressed = true;
                }
                self.image = None;
                self.patch = None;
            }
        }
        Ok(self)
    }

    /// Job request booting this image, without tests
    pub fn to_request(&self) -> Result<JobRequest, JobError> {
        let meta = self.clone().normalize()?;
        let source = match (meta.kernel, meta.rootfs, meta.image) {
            (Some(kernel), Some(rootfs), _) => ImageSource::KernelRootfs { kernel, rootfs },
            (_, _, Some(image)) => ImageSource::Image {
                image,
                patch: meta.patch,
            },
            _ => return Err(JobError::MissingMetadata("image files".to_string())),
        };
        Ok(JobRequest::new(meta.device, source)?.with_compressed(meta.compressed))
    }
}

fn require(field: &Option<String>, name: &str) -> Result<(), JobError> {
    match field {
        Some(value) if !value.is_empty() => Ok(()),
        _ => Err(JobError::MissingMetadata(name.to_string())),
    }
}

/// Bundle name used when the caller gives none: `<device><YYYY-MM-DD>`
pub fn default_prefix(device: &str, date: NaiveDate) -> String {
    format!("{}{}", device, date.format("%Y-%m-%d"))
}

/// [`default_prefix`] for today's local date
pub fn default_prefix_today(device: &str) -> String {
    default_prefix(device, chrono::Local::now().date_naive())
}
