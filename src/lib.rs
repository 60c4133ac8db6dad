pub mod agent;
pub mod capability;
pub mod config;
pub mod error;
pub mod index;
pub mod memory;
pub mod preprocess;
pub mod recommend;
pub mod reranking;
pub mod response;
pub mod search;
pub mod types;
pub mod vision;

// Re-export primary types for convenience
pub use agent::{AssistRequest, CivicAgent, Decision};
pub use capability::Capabilities;
pub use config::EngineConfig;
pub use error::EngineError;
pub use index::{Filter, InMemoryIndex, VectorIndex};
pub use types::{Confidence, DocumentHit, Evidence, Urgency};

// Re-export common types
pub use anyhow::Result;
pub use uuid::Uuid;
