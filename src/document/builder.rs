//! Job document builder

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use super::templates::BuiltinTemplates;
use super::{DocumentError, JobDocument};
use crate::job::{JobRequest, TestSpec, SUPPORTED_DEVICES};

/// Template rendering failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("no template for device {0}")]
    NoTemplate(String),

    #[error("template rendering failed: {0}")]
    Failed(String),
}

/// Document building errors
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("device {0} is not supported")]
    UnsupportedDevice(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Values a device template is rendered with
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateContext {
    pub device: String,
    pub kernel_url: Option<String>,
    pub rootfs_url: Option<String>,
    pub image_url: Option<String>,
    pub patch_url: Option<String>,
    /// Root filesystem (or disk image) is gzip-compressed
    pub compression: bool,
    pub multinode: bool,
    /// Distinct roles across all tests, sorted
    pub roles: Vec<String>,
    pub tests: Vec<TestSpec>,
}

impl TemplateContext {
    pub fn from_request(request: &JobRequest) -> Self {
        let roles: Vec<String> = request.roles().into_iter().collect();
        Self {
            device: request.device().to_string(),
            kernel_url: request.kernel().map(str::to_string),
            rootfs_url: request.rootfs().map(str::to_string),
            image_url: request.image().map(str::to_string),
            patch_url: request.patch().map(str::to_string),
            compression: request.compressed(),
            multinode: !roles.is_empty(),
            roles,
            tests: request.tests().to_vec(),
        }
    }

    pub fn has_tests(&self) -> bool {
        !self.tests.is_empty()
    }
}

/// Renders the job text for a device
pub trait TemplateRenderer {
    fn render(&self, device: &str, context: &TemplateContext) -> Result<String, RenderError>;
}

/// Builds job documents from requests
pub struct JobDocumentBuilder<R = BuiltinTemplates> {
    renderer: R,
    allowed: BTreeSet<String>,
}

impl Default for JobDocumentBuilder<BuiltinTemplates> {
    fn default() -> Self {
        Self::new()
    }
}

impl JobDocumentBuilder<BuiltinTemplates> {
    pub fn new() -> Self {
        Self::with_renderer(BuiltinTemplates::default())
    }
}

impl<R: TemplateRenderer> JobDocumentBuilder<R> {
    /// Builder over a custom renderer, allowing the supported devices
    pub fn with_renderer(renderer: R) -> Self {
        Self {
            renderer,
            allowed: SUPPORTED_DEVICES.iter().map(|d| d.to_string()).collect(),
        }
    }

    /// Replace the device allow-list
    pub fn with_allowed_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = devices.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_supported(&self, device: &str) -> bool {
        self.allowed.contains(device)
    }

    /// Render and parse the document for a request
    pub fn build(&self, request: &JobRequest) -> Result<JobDocument, BuildError> {
        let device = request.device();
        if !self.is_supported(device) {
            tracing::error!(device = %device, "device not supported");
            return Err(BuildError::UnsupportedDevice(device.to_string()));
        }
        tracing::debug!(device = %device, "found job template");

        let context = TemplateContext::from_request(request);
        let text = self.renderer.render(device, &context)?;
        let document = JobDocument::parse(&text)?;

        tracing::debug!(
            "Job Definition:\n=== BEGIN JOB DEFINITION ===\n{}\n=== END JOB DEFINITION ===",
            text.trim_end()
        );
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ImageSource;
    use std::cell::RefCell;

    struct Recording {
        seen: RefCell<Vec<TemplateContext>>,
        output: String,
    }

    impl TemplateRenderer for Recording {
        fn render(&self, _device: &str, context: &TemplateContext) -> Result<String, RenderError> {
            self.seen.borrow_mut().push(context.clone());
            Ok(self.output.clone())
        }
    }

    fn request(device: &str) -> JobRequest {
        JobRequest::new(
            device,
            ImageSource::KernelRootfs {
                kernel: "http://f/bzImage".to_string(),
                rootfs: "http://f/rootfs.gz".to_string(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_unknown_device_has_no_fallback() {
        let builder = JobDocumentBuilder::new();
        assert!(matches!(
            builder.build(&request("beaglebone")),
            Err(BuildError::UnsupportedDevice(d)) if d == "beaglebone"
        ));
    }

    #[test]
    fn test_context_forwards_roles() {
        let renderer = Recording {
            seen: RefCell::new(Vec::new()),
            output: "device_type: qemu\n".to_string(),
        };
        let builder = JobDocumentBuilder::with_renderer(renderer);
        let req = request("qemux86")
            .with_test(TestSpec::inline("a", vec![]).with_role("server"))
            .with_test(TestSpec::inline("b", vec![]).with_role("client"))
            .with_test(TestSpec::inline("c", vec![]).with_role("server"));

        builder.build(&req).unwrap();

        let seen = builder.renderer.seen.borrow();
        assert!(seen[0].multinode);
        assert_eq!(seen[0].roles, vec!["client".to_string(), "server".to_string()]);
        assert!(seen[0].compression);
    }

    #[test]
    fn test_single_node_context() {
        let context = TemplateContext::from_request(&request("qemux86"));
        assert!(!context.multinode);
        assert!(context.roles.is_empty());
        assert!(!context.has_tests());
    }

    #[test]
    fn test_custom_allow_list() {
        let renderer = Recording {
            seen: RefCell::new(Vec::new()),
            output: "device_type: bbb\n".to_string(),
        };
        let builder = JobDocumentBuilder::with_renderer(renderer).with_allowed_devices(["beaglebone"]);
        assert!(builder.build(&request("beaglebone")).is_ok());
        assert!(matches!(
            builder.build(&request("qemux86")),
            Err(BuildError::UnsupportedDevice(_))
        ));
    }

    #[test]
    fn test_unparseable_render_is_document_error() {
        let renderer = Recording {
            seen: RefCell::new(Vec::new()),
            output: "actions: [unclosed".to_string(),
        };
        let builder = JobDocumentBuilder::with_renderer(renderer);
        assert!(matches!(
            builder.build(&request("qemux86")),
            Err(BuildError::Document(DocumentError::Format(_)))
        ));
    }
}
