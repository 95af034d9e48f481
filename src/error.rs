use thiserror::Error;

// Errors surfaced by one pipeline invocation. None of them are fatal to the host.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("missing configuration: {0}")]
    ConfigMissing(&'static str), // Required credential or field is empty.

    #[error("network error: {0}")]
    Network(String), // Transport failure, no status received.

    #[error("HTTP {0}")]
    HttpStatus(u16), // Endpoint answered with a non-2xx status.

    #[error("empty response: {0}")]
    EmptyResponse(String), // Parsed zero usable data.

    #[error("injection target not found: {0}")]
    SideEffectNotFound(String),

    #[error("a run is already in flight for {0}")]
    Busy(&'static str),

    #[error("nothing to inject")]
    NothingToInject,

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("OpenAI request error: {0}")]
    OpenAI(#[from] async_openai::error::OpenAIError), // Building wire messages failed.
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => PipelineError::HttpStatus(status.as_u16()),
            None => PipelineError::Network(err.to_string()),
        }
    }
}

impl PipelineError {
    /// Whether the failure should be shown in the output panel.
    ///
    /// Config, busy and injection problems are reported through status text
    /// or the log and leave the panel untouched.
    pub fn is_displayed(&self) -> bool {
        matches!(
            self,
            PipelineError::Network(_)
                | PipelineError::HttpStatus(_)
                | PipelineError::EmptyResponse(_)
                | PipelineError::Serialization(_)
                | PipelineError::OpenAI(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

// A world-info source could not be read. Aggregation skips the book and continues.
#[derive(Debug, Error)]
pub enum LexiconError {
    #[error("world-info source not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    #[error("Malformed world-info: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("could not create log directory: {0}")]
    Directory(#[from] std::io::Error),

    #[error("logger already installed: {0}")]
    AlreadySet(#[from] log::SetLoggerError),
}
