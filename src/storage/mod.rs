//! Relational document store: claim queue, summary persistence and prompt lookup.

pub mod store;
#[cfg(test)]
pub(crate) mod test_support;
pub mod types;

pub use store::{DOCUMENTS_TABLE, Dialect, DocumentStore, PROMPTS_TABLE};
pub use types::{ClaimedDocument, DocumentStatus, StatusCounts, StoreError};
