//! Encoding backends: routing high-density codecs to an external runtime with fallback to
//! the in-process writer.

mod router;
mod runtime;

pub use router::{BackendRouter, EncodeJob, EncodeOutcome, should_use_external};
pub use runtime::{ContainerRuntime, ExternalRequest, ExternalResponse, ExternalRuntime};
