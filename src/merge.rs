//! Merge step: combine the process text and the graphic text into one document.

use crate::error::MergeError;

/// Combines the two raw generation results into the output document.
///
/// Expected to be CPU-bound and free of side effects.
pub trait Merger: Send + Sync {
    fn merge(&self, process: &str, graphic: &str) -> Result<String, MergeError>;
}

impl<F> Merger for F
where
    F: Fn(&str, &str) -> Result<String, MergeError> + Send + Sync,
{
    fn merge(&self, process: &str, graphic: &str) -> Result<String, MergeError> {
        self(process, graphic)
    }
}
