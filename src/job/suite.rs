//! Test suite files
//!
//! A suite file names the image to boot and the tests to run on it:
//!
//! ```yaml
//! image: qemux86-64-core          # catalog name, or an inline mapping
//! tests:
//!   - from: git
//!     repository: https://git.example.com/tests.git
//!     name: smoke.yaml
//!   - from: inline
//!     name: uname
//!     steps: ["uname -a"]
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::{JobError, TestSpec};
use crate::artifact::ImageMetadata;

/// Image a suite runs on
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    /// Name of a catalog bundle
    Name(String),
    /// Metadata given in place
    Inline(ImageMetadata),
}

/// Parsed suite file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteFile {
    #[serde(default)]
    pub image: Option<ImageRef>,
    #[serde(default)]
    pub tests: Vec<TestSpec>,
}

impl SuiteFile {
    pub fn load(path: &Path) -> Result<Self, JobError> {
        let text = fs::read_to_string(path).map_err(|e| JobError::Suite {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Parse suite text; `origin` names the source in errors
    pub fn parse(text: &str, origin: &str) -> Result<Self, JobError> {
        let suite: SuiteFile = serde_yaml::from_str(text).map_err(|e| JobError::Suite {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        if let Some(ImageRef::Name(name)) = &suite.image {
            if name.trim().is_empty() {
                return Err(JobError::Suite {
                    path: origin.to_string(),
                    message: "image name is empty".to_string(),
                });
            }
        }
        tracing::debug!(suite = %origin, tests = suite.tests.len(), "loaded suite");
        Ok(suite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_image() {
        let suite = SuiteFile::parse(
            "image: core-2024\ntests:\n  - from: git\n    repository: r.git\n    name: t.yaml\n",
            "suite.yaml",
        )
        .unwrap();
        assert_eq!(suite.image, Some(ImageRef::Name("core-2024".to_string())));
        assert_eq!(suite.tests.len(), 1);
        assert!(!suite.tests[0].is_inline());
    }

    #[test]
    fn test_inline_image() {
        let text = "\
image:
  device: qemux86
  kernel: http://f/bzImage
  rootfs: http://f/rootfs.ext4.gz
tests:
  - from: inline
    name: uname
    steps: [uname -a]
";
        let suite = SuiteFile::parse(text, "suite.yaml").unwrap();
        match suite.image {
            Some(ImageRef::Inline(meta)) => {
                assert_eq!(meta.device, "qemux86");
                assert_eq!(meta.rootfs.as_deref(), Some("http://f/rootfs.ext4.gz"));
            }
            other => panic!("unexpected image {:?}", other),
        }
    }

    #[test]
    fn test_image_is_optional() {
        let suite = SuiteFile::parse("tests: []\n", "s").unwrap();
        assert!(suite.image.is_none());
        assert!(suite.tests.is_empty());
    }

    #[test]
    fn test_errors_name_the_file() {
        let err = SuiteFile::parse("tests: [{from: svn}]\n", "bad.yaml").unwrap_err();
        assert!(matches!(err, JobError::Suite { ref path, .. } if path == "bad.yaml"));

        let err = SuiteFile::parse("image: ''\n", "empty.yaml").unwrap_err();
        assert!(err.to_string().contains("image name is empty"));

        let err = SuiteFile::load(Path::new("/nonexistent/suite.yaml")).unwrap_err();
        assert!(matches!(err, JobError::Suite { .. }));
    }
}
