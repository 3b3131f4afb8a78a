//! Command flows
//!
//! Each flow strings the library components together for one CLI command:
//! - `submit-job`: parse a job document, validate, submit
//! - `run-test`: suite file -> image metadata -> job request -> document ->
//!   validate -> submit
//! - `upload-image`: upload boot artifacts and register them in the catalog

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::artifact::{default_prefix_today, ArtifactStore, ImageMetadata, RemoteFs, StoreError};
use crate::config::{Config, ConfigError};
use crate::document::{BuildError, DocumentError, JobDocument, JobDocumentBuilder, TemplateRenderer};
use crate::failure::FailureKind;
use crate::host::{SchedulerClient, SchedulerError, Submission};
use crate::job::{ImageRef, JobError, SuiteFile, IOT_DEVICE};

/// Configuration key naming the image used when none is given
pub const DEFAULT_IMAGE_KEY: &str = "lava.default_image";

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("cannot read {path}: {message}")]
    Read { path: String, message: String },

    #[error("no image given on the command line, in the suite or as lava.default_image")]
    NoImage,

    #[error("job definition rejected by the scheduler")]
    Rejected,

    #[error("device {device} takes {expected}")]
    WrongFiles { device: String, expected: &'static str },
}

impl PipelineError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            PipelineError::Config(e) => e.failure_kind(),
            PipelineError::Job(e) => e.failure_kind(),
            PipelineError::Build(e) => e.failure_kind(),
            PipelineError::Document(e) => e.failure_kind(),
            PipelineError::Store(e) => e.failure_kind(),
            PipelineError::Scheduler(e) => e.failure_kind(),
            PipelineError::Read { .. }
            | PipelineError::NoImage
            | PipelineError::Rejected
            | PipelineError::WrongFiles { .. } => FailureKind::LocalValidation,
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        self.failure_kind().exit_code().as_i32()
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Submit a job document file as it is
pub fn submit_job(client: &SchedulerClient, path: &Path, wait: bool) -> PipelineResult<Submission> {
    let text = fs::read_to_string(path).map_err(|e| PipelineError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let document = JobDocument::parse(&text)?;
    validate_and_submit(client, &document, wait)
}

/// Options of the `run-test` flow
#[derive(Debug, Clone, Default)]
pub struct RunTestOptions {
    pub suite: PathBuf,
    /// Catalog name overriding the suite's image
    pub image: Option<String>,
    /// Catalog name used when neither the option nor the suite names one
    pub default_image: Option<String>,
    pub wait: bool,
}

impl RunTestOptions {
    pub fn new(suite: impl Into<PathBuf>) -> Self {
        Self {
            suite: suite.into(),
            wait: true,
            ..Self::default()
        }
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    /// Take the default image from the configuration
    pub fn with_config(mut self, config: &Config) -> Self {
        self.default_image = config.get_str(DEFAULT_IMAGE_KEY).map(str::to_string);
        self
    }
}

/// Run a test suite.
///
/// The storage host is only contacted when the image is given by catalog
/// name; `connect_store` is not called otherwise.
pub fn run_test<T, R, F>(
    client: &SchedulerClient,
    builder: &JobDocumentBuilder<T>,
    options: &RunTestOptions,
    connect_store: F,
) -> PipelineResult<Submission>
where
    T: TemplateRenderer,
    R: RemoteFs,
    F: FnOnce() -> PipelineResult<ArtifactStore<R>>,
{
    let suite = SuiteFile::load(&options.suite)?;
    let image = match (&options.image, suite.image, &options.default_image) {
        (Some(name), _, _) => ImageRef::Name(name.clone()),
        (None, Some(image), _) => image,
        (None, None, Some(name)) => ImageRef::Name(name.clone()),
        (None, None, None) => return Err(PipelineError::NoImage),
    };

    let metadata = match image {
        ImageRef::Name(name) => {
            tracing::info!(image = %name, "using catalog image");
            connect_store()?.get_metadata(&name)?
        }
        ImageRef::Inline(metadata) => metadata,
    };

    let request = metadata.to_request()?.with_tests(suite.tests);
    tracing::info!(
        device = %request.device(),
        tests = request.tests().len(),
        multinode = request.is_multinode(),
        "building job"
    );
    let document = builder.build(&request)?;
    validate_and_submit(client, &document, options.wait)
}

fn validate_and_submit(
    client: &SchedulerClient,
    document: &JobDocument,
    wait: bool,
) -> PipelineResult<Submission> {
    if !client.validate(document)? {
        return Err(PipelineError::Rejected);
    }
    Ok(client.submit(document, wait)?)
}

/// Files making up an image bundle
#[derive(Debug, Clone)]
pub enum ImageFiles {
    KernelRootfs { kernel: PathBuf, rootfs: PathBuf },
    Image { image: PathBuf, patch: PathBuf },
}

/// Upload an image bundle and register it in the catalog.
///
/// Without a prefix the bundle is named `<device><YYYY-MM-DD>`.
pub fn upload_image<R: RemoteFs>(
    store: &mut ArtifactStore<R>,
    device: &str,
    files: &ImageFiles,
    prefix: Option<&str>,
) -> PipelineResult<(String, ImageMetadata)> {
    let prefix = prefix
        .map(str::to_string)
        .unwrap_or_else(|| default_prefix_today(device));

    let metadata = match (files, device == IOT_DEVICE) {
        (ImageFiles::KernelRootfs { kernel, rootfs }, false) => {
            store.upload_image_pair(&prefix, kernel, rootfs, device)?
        }
        (ImageFiles::Image { image, patch }, true) => {
            store.upload_image_single(&prefix, image, patch, device)?
        }
        (_, true) => {
            return Err(PipelineError::WrongFiles {
                device: device.to_string(),
                expected: "--image and --patch",
            })
        }
        (_, false) => {
            return Err(PipelineError::WrongFiles {
                device: device.to_string(),
                expected: "--kernel and --rootfs",
            })
        }
    };
    tracing::info!(image = %prefix, "upload complete");
    Ok((prefix, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryRemote;

    #[test]
    fn test_upload_rejects_wrong_file_kind() {
        let mut store = ArtifactStore::new(MemoryRemote::new(), "http://h/lava-files", "/data");
        let files = ImageFiles::KernelRootfs {
            kernel: "bzImage".into(),
            rootfs: "rootfs.ext4".into(),
        };
        let err = upload_image(&mut store, IOT_DEVICE, &files, Some("p")).unwrap_err();
        assert!(matches!(err, PipelineError::WrongFiles { .. }));
        assert_eq!(err.exit_code(), 60);
    }

    #[test]
    fn test_exit_codes_follow_failure_kind() {
        let err = PipelineError::from(ConfigError::Missing("lava.server.host".to_string()));
        assert_eq!(err.exit_code(), 10);
        assert_eq!(PipelineError::NoImage.exit_code(), 60);
        assert_eq!(
            PipelineError::from(StoreError::Connection("refused".to_string())).exit_code(),
            20
        );
    }

    #[test]
    fn test_run_test_options_from_config() {
        let mut config = Config::builtin();
        config
            .set(DEFAULT_IMAGE_KEY, serde_json::Value::String("core".to_string()))
            .unwrap();
        let options = RunTestOptions::new("suite.yaml").with_config(&config);
        assert_eq!(options.default_image.as_deref(), Some("core"));
        assert!(options.wait);
    }
}
