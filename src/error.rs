//! Error taxonomy and exit-code mapping
//!
//! Fatal errors fall into three buckets that the CLI maps to process exit
//! codes: configuration errors and runtime-spawn errors exit with 1,
//! low-level bundler build failures exit with 2. A graceful stop exits 0.

use thiserror::Error;

/// Fatal error categories surfaced at the CLI boundary
#[derive(Debug, Error)]
pub enum KilnError {
    /// Invalid or rejected user configuration (schema validation, duplicate
    /// preload names, external host base path in dev mode, unknown engine)
    #[error("configuration error: {0}")]
    Config(String),

    /// The bundler reported compile errors or terminated abnormally
    #[error("build failed: {0}")]
    Build(String),

    /// The desktop runtime binary could not be resolved or spawned
    #[error("failed to launch desktop runtime: {0}")]
    Spawn(String),
}

impl KilnError {
    /// Process exit code for this error category
    pub fn exit_code(&self) -> i32 {
        match self {
            KilnError::Config(_) | KilnError::Spawn(_) => 1,
            KilnError::Build(_) => 2,
        }
    }
}

/// Exit code for an error chain: the innermost `KilnError` decides,
/// anything else is treated as a configuration/compile fatal (1).
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<KilnError>()
        .map(KilnError::exit_code)
        .unwrap_or(1)
}
