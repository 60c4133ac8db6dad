use thiserror::Error;

/// The only failure classes that surface to callers.
///
/// Degraded upstream capabilities (embedding, reranking, OCR, transcription,
/// rendering) and unreachable sub-indexes never produce an `EngineError`;
/// each call site substitutes a defined fallback instead. A request fails
/// only on invalid input or when the primary knowledge-base retrieval path
/// itself errors out.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("core retrieval failed: {0}")]
    Retrieval(String),
}

impl EngineError {
    pub fn retrieval(err: anyhow::Error) -> Self {
        Self::Retrieval(format!("{err:#}"))
    }
}
