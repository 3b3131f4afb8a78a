//! Job documents
//!
//! [`JobDocumentBuilder`] turns a [`JobRequest`](crate::job::JobRequest)
//! into the declarative document the scheduler executes. Text rendering is
//! delegated to a [`TemplateRenderer`]; the result is parsed into a
//! [`JobDocument`] tree that callers can inspect and adjust by dotted path
//! before submission.

mod builder;
mod templates;
mod tree;

use thiserror::Error;

pub use builder::{BuildError, JobDocumentBuilder, RenderError, TemplateContext, TemplateRenderer};
pub use templates::{paths, BuiltinTemplates};
pub use tree::{JobDocument, Node, Scalar};

/// Document access errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("malformed job document: {0}")]
    Format(String),
}
