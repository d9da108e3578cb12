use thiserror::Error;

/// Definitive failure of one logical request, after the retry policy ran its course
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    #[error("Authorization rejected (HTTP 401)")]
    Unauthorized,
    #[error("Permanent HTTP status {0}")]
    PermanentStatus(u16),
    #[error("No result after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("Cancelled before request")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Request failed: {0}")]
    Invoke(#[from] InvokeError),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Caller error: {0}")]
    InvalidInput(String),
    #[error("Transport setup error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl HarvestError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            HarvestError::Cancelled | HarvestError::Invoke(InvokeError::Cancelled)
        )
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
