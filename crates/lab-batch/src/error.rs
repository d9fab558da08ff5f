use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("missing operation proto in {}", path.display())]
    MissingProto { path: PathBuf },

    #[error("trial {trial_id} not initialized - needs call to init")]
    NotInitialized { trial_id: String },

    #[error("run for trial {trial_id} was deleted ({})", target.display())]
    RunDeleted { trial_id: String, target: PathBuf },

    /// The trial's operation exited non-zero; the controller exits with `code`.
    #[error("trial run exited with status {code}")]
    Exit { code: i32 },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl BatchError {
    pub fn exit_code(&self) -> i32 {
        match self {
            BatchError::Exit { code } => *code,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;
