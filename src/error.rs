use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraderError {
    #[error("You are already in the grading queue")]
    AlreadyQueued,

    #[error("You have already submitted this version of your code for this phase. Make a new commit before submitting again")]
    DuplicateSubmission,

    #[error("Failed to access repository: {0}")]
    RepositoryAccess(String),

    #[error("Project is not structured correctly. Your project should be at the top level of your git repository.")]
    ProjectStructure { missing: PathBuf },

    #[error("Build failed: {message}")]
    BuildFailure {
        message: String,
        diagnostics: Option<String>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("External ledger error: {0}")]
    ExternalService(String),

    #[error("Data access error: {0}")]
    DataAccess(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GraderError {
    /// Message safe to show a submitter. Deployment bugs and internal faults
    /// are reported generically; the full error is logged server-side.
    pub fn user_message(&self) -> String {
        match self {
            GraderError::Configuration(_)
            | GraderError::DataAccess(_)
            | GraderError::Internal(_) => {
                "Something went wrong while grading. Please contact a TA.".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Structured details to attach to an `error` event, when available.
    pub fn details(&self) -> Option<String> {
        match self {
            GraderError::BuildFailure { diagnostics, .. } => diagnostics.clone(),
            GraderError::ProjectStructure { missing } => {
                Some(format!("No {} file found", missing.display()))
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GraderError>;
