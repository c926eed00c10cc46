use thiserror::Error;

/// Failure categories for toolkit operations. Every variant has been
/// reported (logged) by the time it reaches `main`; `main` only turns
/// the final status into an exit code.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Interpreter too old, package missing, or toolchain unreachable.
    #[error("environment not ready: {0}")]
    Environment(String),

    /// Missing or nonexistent input. Aborts the operation immediately.
    #[error("{0}")]
    Input(String),

    /// The external export toolchain failed during load or export.
    #[error("export toolchain failure: {0}")]
    Export(anyhow::Error),

    /// The export call reported success but the artifact is missing or
    /// implausibly small.
    #[error("artifact validation failed: {0}")]
    Validation(String),

    /// User backed out of an interactive step.
    #[error("cancelled by user")]
    Cancelled,
}
