pub mod memory;
pub mod qdrant;

pub use memory::InMemoryVectorIndex;
pub use qdrant::{QdrantConfig, QdrantStore};
