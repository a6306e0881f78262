use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecommError {
    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Rule error: {0}")]
    Rule(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid repository URL: {0}")]
    RepoUrl(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
