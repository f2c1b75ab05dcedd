use thiserror::Error;

/// Errors from the retrieval backend. These never terminate a session: the
/// tools convert them into explanatory result text.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Network or connection failure.
    #[error("connection error: {0}")]
    Connection(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("{service} error ({status}): {message}")]
    Api {
        /// Which backend answered.
        service: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body, verbatim.
        message: String,
    },

    /// The backend answered with a body the client cannot use.
    #[error("unexpected {service} response: {message}")]
    Malformed {
        /// Which backend answered.
        service: &'static str,
        /// What was wrong with the response.
        message: String,
    },
}
