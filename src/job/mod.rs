//! Job requests
//!
//! A [`JobRequest`] is the structured input to document building: the device
//! to run on, where its boot artifacts are downloaded from, and the tests to
//! run. The device decides which artifacts are required: `iot2000` boots a
//! single disk image, every other device boots a kernel plus root filesystem.

mod suite;
mod test_spec;

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::Serialize;
use thiserror::Error;

pub use suite::{ImageRef, SuiteFile};
pub use test_spec::{TestDefinition, TestSpec};

/// Devices a job document can be built for
pub const SUPPORTED_DEVICES: [&str; 3] = ["qemux86", "qemux86-64", "iot2000"];

/// Device booting a single disk image
pub const IOT_DEVICE: &str = "iot2000";

/// Job request errors
#[derive(Debug, Error)]
pub enum JobError {
    #[error("device {device} requires {expected}")]
    SourceMismatch { device: String, expected: &'static str },

    #[error("invalid {field} URL: {url}")]
    InvalidUrl { field: &'static str, url: String },

    #[error("invalid test: {0}")]
    InvalidTest(String),

    #[error("invalid image metadata: missing {0}")]
    MissingMetadata(String),

    #[error("invalid suite file {path}: {message}")]
    Suite { path: String, message: String },
}

/// How a device boots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    KernelRootfs,
    SingleImage,
}

impl DeviceKind {
    pub fn for_device(device: &str) -> Self {
        if device == IOT_DEVICE {
            DeviceKind::SingleImage
        } else {
            DeviceKind::KernelRootfs
        }
    }
}

/// Boot artifacts of a job, as download URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ImageSource {
    KernelRootfs { kernel: String, rootfs: String },
    Image { image: String, patch: Option<String> },
}

impl ImageSource {
    fn kind(&self) -> DeviceKind {
        match self {
            ImageSource::KernelRootfs { .. } => DeviceKind::KernelRootfs,
            ImageSource::Image { .. } => DeviceKind::SingleImage,
        }
    }

    fn urls(&self) -> Vec<(&'static str, &str)> {
        match self {
            ImageSource::KernelRootfs { kernel, rootfs } => {
                vec![("kernel", kernel.as_str()), ("rootfs", rootfs.as_str())]
            }
            ImageSource::Image { image, patch } => {
                let mut urls = vec![("image", image.as_str())];
                if let Some(patch) = patch {
                    urls.push(("patch", patch.as_str()));
                }
                urls
            }
        }
    }
}

/// Everything needed to build one job document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    device: String,
    source: ImageSource,
    compressed: bool,
    tests: Vec<TestSpec>,
}

impl JobRequest {
    /// Validate the source against the device.
    ///
    /// `compressed` defaults to whether the rootfs carries a `.gz` suffix.
    pub fn new(device: impl Into<String>, source: ImageSource) -> Result<Self, JobError> {
        let device = device.into();

        let kind = DeviceKind::for_device(&device);
        if source.kind() != kind {
            return Err(JobError::SourceMismatch {
                device,
                expected: match kind {
                    DeviceKind::KernelRootfs => "kernel and rootfs",
                    DeviceKind::SingleImage => "an image",
                },
            });
        }

        for (field, url) in source.urls() {
            if !is_download_url(url) {
                return Err(JobError::InvalidUrl {
                    field,
                    url: url.to_string(),
                });
            }
        }

        let compressed = match &source {
            ImageSource::KernelRootfs { rootfs, .. } => rootfs.ends_with(".gz"),
            ImageSource::Image { .. } => false,
        };

        Ok(Self {
            device,
            source,
            compressed,
            tests: Vec::new(),
        })
    }

    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    pub fn with_test(mut self, test: TestSpec) -> Self {
        self.tests.push(test);
        self
    }

    pub fn with_tests(mut self, tests: impl IntoIterator<Item = TestSpec>) -> Self {
        self.tests.extend(tests);
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    pub fn compressed(&self) -> bool {
        self.compressed
    }

    pub fn tests(&self) -> &[TestSpec] {
        &self.tests
    }

    pub fn kernel(&self) -> Option<&str> {
        match &self.source {
            ImageSource::KernelRootfs { kernel, .. } => Some(kernel),
            ImageSource::Image { .. } => None,
        }
    }

    pub fn rootfs(&self) -> Option<&str> {
        match &self.source {
            ImageSource::KernelRootfs { rootfs, .. } => Some(rootfs),
            ImageSource::Image { .. } => None,
        }
    }

    pub fn image(&self) -> Option<&str> {
        match &self.source {
            ImageSource::Image { image, .. } => Some(image),
            ImageSource::KernelRootfs { .. } => None,
        }
    }

    pub fn patch(&self) -> Option<&str> {
        match &self.source {
            ImageSource::Image { patch, .. } => patch.as_deref(),
            ImageSource::KernelRootfs { .. } => None,
        }
    }

    /// Distinct roles across all tests
    pub fn roles(&self) -> BTreeSet<String> {
        self.tests
            .iter()
            .flat_map(|test| test.roles.iter().cloned())
            .collect()
    }

    pub fn is_multinode(&self) -> bool {
        self.tests.iter().any(|test| !test.roles.is_empty())
    }
}

/// http(s) or file URL without whitespace
pub fn is_download_url(url: &str) -> bool {
    static URL: OnceLock<Option<Regex>> = OnceLock::new();
    URL.get_or_init(|| Regex::new(r"^(https?|file)://\S+$").ok())
        .as_ref()
        .map(|re| re.is_match(url))
        .unwrap_or(false)
}
