pub mod fusion;
pub mod hybrid;
pub mod sparse;

pub use fusion::reciprocal_rank_fusion;
pub use hybrid::HybridRetriever;
pub use sparse::{tokenize, SparseIndexCache};
