/// Non-success response from the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("backend returned {status_code}: {body}")]
pub struct RemoteError {
    pub status_code: u16,
    pub body: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("{endpoint}: {message}")]
    Network { endpoint: String, message: String },
    #[error(transparent)]
    Status(#[from] RemoteError),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("parse response from {endpoint}: {message}")]
    Parse { endpoint: String, message: String },
    #[error("request superseded")]
    Cancelled,
    #[error("invalid input: {0}")]
    Validation(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The backend's status code, when the failure was a non-success response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Transport(TransportError::Status(remote)) => Some(remote.status_code),
            _ => None,
        }
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        Self::Transport(TransportError::Status(err))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
