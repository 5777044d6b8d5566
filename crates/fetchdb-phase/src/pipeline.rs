//! Builds the per-request processor pipeline from the registered
//! extensions.

use std::rc::Rc;

use fetchdb_core::error::{FetchError, Result};
use fetchdb_core::traits::{DocStore, FetchExtension, FetchProcessor};
use fetchdb_core::types::FetchRequest;

use crate::profile::{ProfiledProcessor, Profiler};

/// Asks every extension once whether it participates in this request.
/// `None` opts the extension out entirely; a build failure aborts the
/// whole fetch before any document is processed.
pub(crate) fn build_processors<'a>(
    extensions: &'a [Box<dyn FetchExtension>],
    request: &FetchRequest,
    store: &'a dyn DocStore,
    profiler: &Rc<dyn Profiler>,
) -> Result<Vec<Box<dyn FetchProcessor + 'a>>> {
    let mut processors = Vec::new();
    for extension in extensions {
        match extension.processor(request, store) {
            Ok(Some(processor)) => processors.push(ProfiledProcessor::wrap(processor, profiler)),
            Ok(None) => {}
            Err(source) => return Err(FetchError::ExtensionBuild { source }),
        }
    }
    Ok(processors)
}
