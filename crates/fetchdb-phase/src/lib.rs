#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

//! Fetch phase of a search request: given the sorted doc ids the query
//! phase matched, materialize the full result records (stored fields,
//! source, nested sub-document source) in the caller's requested order.

mod assemble;
pub mod batch;
pub mod inner_hits;
pub mod nested;
pub mod phase;
mod pipeline;
pub mod plan;
pub mod profile;

pub use inner_hits::InnerHitsPhase;
pub use nested::{project_nested_source, RootCache};
pub use phase::FetchPhase;
pub use plan::FieldSelectionPlan;
