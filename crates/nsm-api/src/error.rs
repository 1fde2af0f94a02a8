use thiserror::Error;

#[derive(Error, Debug)]
pub enum NsmError {
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No forwarders found")]
    NoForwarders,

    #[error("Failed to provide a valid forwarder for request: {0}")]
    NoValidForwarder(String),

    #[error("No appropriate {0} found")]
    NoMatch(&'static str),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to update source connection context: {0}")]
    ContextUpdate(#[source] Box<NsmError>),

    #[error("Context timeout during find/call of network service endpoint: {0}")]
    Timeout(String),

    #[error("Context cancelled")]
    Cancelled,

    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("Forwarder not found: {0}")]
    ForwarderNotFound(String),

    #[error("Endpoint error: {0}")]
    Endpoint(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The final attempt error together with the error of the attempt before it.
    #[error("{error}. Last NSE error: {last}")]
    Combined {
        error: Box<NsmError>,
        last: Box<NsmError>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NsmError {
    /// Combines the error of the final attempt with the last recorded candidate error.
    ///
    /// Without a previous error the final error is returned as is.
    pub fn combine(error: NsmError, last: Option<NsmError>) -> NsmError {
        match last {
            Some(last) => NsmError::Combined {
                error: Box::new(error),
                last: Box::new(last),
            },
            None => error,
        }
    }

    /// Returns `true` for deadline and cancellation errors.
    pub fn is_timeout(&self) -> bool {
        matches!(self, NsmError::Timeout(_) | NsmError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, NsmError>;
