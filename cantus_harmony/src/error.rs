//! Error types for the harmonization engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarmonyError>;

#[derive(Debug, Error)]
pub enum HarmonyError {
    /// The infilling backend is missing, released, or failed to answer.
    /// Recoverable by falling back to rule-based harmonization.
    #[error("Infilling model unavailable: {0}")]
    ModelUnavailable(String),

    /// Invalid note, pitch, or chord data handed to the engine.
    #[error("Malformed harmony step: {0}")]
    MalformedHarmonyStep(String),

    /// A write targeted a cell that the mask marks as fixed.
    #[error("Constraint violation: voice {voice} step {step} is fixed")]
    ConstraintViolation { voice: usize, step: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Episode already finished; call reset() first")]
    EpisodeFinished,

    #[error("Episode still in progress ({step}/{max_steps} steps)")]
    EpisodeInProgress { step: usize, max_steps: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MIDI error: {0}")]
    Midi(#[from] midly::Error),
}

impl HarmonyError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        HarmonyError::MalformedHarmonyStep(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        HarmonyError::InvalidConfig(msg.into())
    }
}
