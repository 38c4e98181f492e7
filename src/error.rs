use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Download failed: {0}")]
    RemoteJob(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Playback rejected: {0}")]
    TransportRejection(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
