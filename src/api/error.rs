use thiserror::Error;

/// Failure taxonomy for backend operations.
///
/// `Api` carries the backend's `detail` message when the reply body had one;
/// that text is shown to the user verbatim. Everything else falls back to a
/// caller-supplied message via [`ClientError::user_message`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request produced no backend response at all.
    #[error("network error: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    /// The backend answered with a failure status.
    #[error("backend returned {status}: {}", detail.as_deref().unwrap_or("no detail"))]
    Api { status: u16, detail: Option<String> },

    /// A success reply whose body does not match the expected shape.
    #[error("unexpected response shape: {0}")]
    Decode(String),

    /// A local file needed for a request could not be read.
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ClientError {
    /// Message to surface to the user: the backend's own `detail` when it sent
    /// one, otherwise `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ClientError::Api {
                detail: Some(detail),
                ..
            } => detail.clone(),
            _ => fallback.to_string(),
        }
    }
}

/// [`ClientError::user_message`] for errors that travelled through `anyhow`.
pub fn user_message(err: &anyhow::Error, fallback: &str) -> String {
    match err.downcast_ref::<ClientError>() {
        Some(client_err) => client_err.user_message(fallback),
        None => fallback.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_detail_is_surfaced_verbatim() {
        let err = ClientError::Api {
            status: 422,
            detail: Some("max_capacity_declared must be positive".to_string()),
        };
        assert_eq!(
            err.user_message("fallback"),
            "max_capacity_declared must be positive"
        );
    }

    #[test]
    fn missing_detail_uses_fallback() {
        let err = ClientError::Api {
            status: 500,
            detail: None,
        };
        assert_eq!(err.user_message("Could not load sessions."), "Could not load sessions.");

        let err = ClientError::Decode("not json".to_string());
        assert_eq!(err.user_message("fallback"), "fallback");
    }
}
