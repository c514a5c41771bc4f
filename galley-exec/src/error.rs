use thiserror::Error;

use galley_core::error::{GalleyError, LoadError, SubstError, ValidationError};

/// Errors surfaced while running a recipe.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("no recipe named '{0}' is defined")]
    UnknownRecipe(String),
    #[error("no recipes are defined")]
    NoRecipes,
    #[error("step '{0}' is not a known step")]
    UnknownStep(String),
    #[error("step '{fqname}': required output '{name}' is missing")]
    MissingRequiredOutput { fqname: String, name: String },
    #[error("no selected backend is available (tried {tried})")]
    BackendUnavailable { tried: String },
    #[error("step '{fqname}' exceeded its timeout of {seconds}s")]
    Timeout { fqname: String, seconds: u64 },
    #[error("run cancelled")]
    Cancelled,
    #[error("cab '{fqname}' failed: {message}")]
    CabFailure {
        fqname: String,
        message: String,
        stderr_tail: Vec<String>,
    },
    #[error("error spawning '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Subst(#[from] SubstError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Core(#[from] GalleyError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Step-level failures abort the enclosing recipe but are reported as a
    /// cab failure to its parent; run-level conditions propagate unchanged.
    pub fn is_step_level(&self) -> bool {
        matches!(
            self,
            RunError::CabFailure { .. }
                | RunError::MissingRequiredOutput { .. }
                | RunError::Timeout { .. }
        )
    }
}
