// Retrieval over a document's semantic index
pub mod engine;

pub use engine::{Retriever, SearchParams};
