#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod schema;
pub mod store;

pub use schema::{MemField, MemSchema};
pub use store::{MemDoc, MemSegment, MemStore, MemStoreBuilder, StoreCounters};
