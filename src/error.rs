use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Failures talking to the chat service or driving the terminal.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("terminal error: {0}")]
    Terminal(String),

    #[error(transparent)]
    Submit(#[from] SubmitError),
}

impl ClientError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }
}

/// Why a submission was refused before any request went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("a response is already being generated")]
    Busy,
    #[error("question is empty")]
    EmptyQuestion,
}
